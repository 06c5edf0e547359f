use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    GuidedReading,
    Intervention,
}

impl WorkflowKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guided_reading" | "guidedreading" | "guided-reading" => Some(Self::GuidedReading),
            "intervention" => Some(Self::Intervention),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GuidedReading => "guided_reading",
            Self::Intervention => "intervention",
        }
    }
}

/// Natural key of a Session (guided reading) or LessonPlan (intervention).
///
/// `discriminator` is the teacher id for guided reading and the lesson type
/// for intervention. Build keys through `WorkflowDescriptor::key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorKey {
    pub kind: WorkflowKind,
    pub group_id: String,
    pub date: NaiveDate,
    pub discriminator: String,
}

impl AnchorKey {
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingStandard {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub grade_level: String,
    #[serde(default)]
    pub standards: Vec<TeachingStandard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group_type: String,
    pub teacher_id: String,
    /// Roster order.
    #[serde(default)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub reading_level: Option<String>,
}

/// Teacher-entered scalar fields of a session or lesson plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScalars {
    #[serde(default)]
    pub book_title: String,
    #[serde(default)]
    pub reading_level: String,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

/// Persisted Session / LessonPlan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub id: String,
    pub key: AnchorKey,
    pub teacher_id: String,
    #[serde(flatten)]
    pub scalars: SessionScalars,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Anchor {
    pub fn lesson_type(&self) -> Option<&str> {
        match self.key.kind {
            WorkflowKind::Intervention => Some(&self.key.discriminator),
            WorkflowKind::GuidedReading => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Persisted next-steps / lesson-plan content with its resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub id: String,
    pub key: AnchorKey,
    pub anchor_id: String,
    pub content_type: String,
    pub plan_text: String,
    #[serde(default)]
    pub resources: Vec<GeneratedResource>,
    #[serde(default)]
    pub prompt_sha256: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Content to be upserted under its anchor key.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContent {
    pub key: AnchorKey,
    pub anchor_id: String,
    pub content_type: String,
    pub plan_text: String,
    pub resources: Vec<GeneratedResource>,
    pub prompt_sha256: Option<String>,
}

/// Persisted activity record (guided reading) or intervention record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerStudentRecord {
    pub id: String,
    pub student_id: String,
    pub anchor_id: String,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub primary: String,
    #[serde(default)]
    pub secondary: String,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

/// Record to be upserted by `(student_id, anchor_id)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub student_id: String,
    pub anchor_id: String,
    pub content_id: Option<String>,
    pub primary: String,
    pub secondary: String,
    pub duration_minutes: Option<i64>,
}

/// One roster member with its editable fields, as presented for editing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedRecord {
    pub student_id: String,
    pub student_name: String,
    pub record_id: Option<String>,
    pub content_id: Option<String>,
    pub primary: String,
    pub secondary: String,
    pub duration_minutes: Option<i64>,
}

impl MergedRecord {
    pub fn is_blank(&self) -> bool {
        self.primary.trim().is_empty() && self.secondary.trim().is_empty()
    }
}
