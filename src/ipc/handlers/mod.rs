pub mod core;
pub mod dashboard;
pub mod generation;
pub mod roster;
pub mod sessions;
pub mod setup;
pub mod text;
