//! Error taxonomy shared by the clients, the orchestrator and the IPC layer.

use serde::Serialize;
use thiserror::Error;

/// Failure at one of the I/O boundaries (content store, directory, generator).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::Shape(e.to_string());
        }
        match e.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => Self::Transport(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for ClientError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Shape(e.to_string())
    }
}

/// The step of a workflow that failed. Every user-facing failure names one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchTeacher,
    FetchGroups,
    FetchStudents,
    FetchSession,
    GeneratePlan,
    GenerateResources,
    Save,
    ImproveText,
    FetchDashboard,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::FetchTeacher => "fetch teacher profile",
            Self::FetchGroups => "fetch groups",
            Self::FetchStudents => "fetch students",
            Self::FetchSession => "fetch session",
            Self::GeneratePlan => "generate plan",
            Self::GenerateResources => "generate resources",
            Self::Save => "save",
            Self::ImproveText => "improve text",
            Self::FetchDashboard => "fetch dashboard data",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LessonError {
    /// A precondition failed before any I/O was attempted.
    #[error("{0}")]
    Validation(String),

    #[error("failed to {}: {source}", stage.label())]
    Stage {
        stage: Stage,
        #[source]
        source: ClientError,
    },

    #[error("a generation is already running for this session")]
    Busy,
}

impl LessonError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn at(stage: Stage, source: ClientError) -> Self {
        Self::Stage { stage, source }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// IPC error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Stage { .. } => "stage_failed",
            Self::Busy => "busy",
        }
    }
}

/// A stage failure kept alongside partial results (e.g. a plan that was
/// generated before resource generation failed).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

impl From<&LessonError> for StageFailure {
    fn from(e: &LessonError) -> Self {
        Self {
            stage: e.stage().unwrap_or(Stage::Save),
            message: e.to_string(),
        }
    }
}
