//! Session content orchestration for guided-reading and intervention
//! workflows: resolve the session for a (group, date), reconcile per-student
//! records, run plan/resource generation, persist the results.

pub mod config;
pub mod dashboard;
pub mod datekey;
pub mod db;
pub mod error;
pub mod generation;
pub mod ipc;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod reconcile;
pub mod resolver;
pub mod store;
pub mod view;
pub mod workflow;
