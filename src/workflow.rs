//! Workflow descriptors: the two instructional workflows expressed as
//! configuration of one orchestrator rather than as separate code paths.

use chrono::NaiveDate;

use crate::error::LessonError;
use crate::model::{AnchorKey, MergedRecord, SessionScalars, TeacherProfile, WorkflowKind};

/// Appended verbatim after non-empty additional requirements.
pub const PRIORITY_INSTRUCTION: &str =
    "If additional requirements conflict with original requirements, prioritize additional requirements.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceMode {
    /// Resources are generated after every plan.
    Unconditional,
    /// Resources are generated only when the caller asks for them.
    Flagged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarField {
    BookTitle,
    ReadingLevel,
}

impl ScalarField {
    pub fn name(self) -> &'static str {
        match self {
            Self::BookTitle => "bookTitle",
            Self::ReadingLevel => "readingLevel",
        }
    }

    fn value(self, scalars: &SessionScalars) -> &str {
        match self {
            Self::BookTitle => &scalars.book_title,
            Self::ReadingLevel => &scalars.reading_level,
        }
    }
}

/// Inputs to prompt construction, borrowed from the current view.
pub struct PromptInputs<'a> {
    pub teacher: &'a TeacherProfile,
    pub key: &'a AnchorKey,
    pub scalars: &'a SessionScalars,
    pub records: &'a [MergedRecord],
    pub additional_requirements: &'a str,
}

pub struct WorkflowDescriptor {
    pub kind: WorkflowKind,
    pub content_type: &'static str,
    pub required_scalars: &'static [ScalarField],
    pub resource_mode: ResourceMode,
    /// Wire names of the two editable per-student fields.
    pub primary_field: &'static str,
    pub secondary_field: &'static str,
    pub max_resources: usize,
    /// REST collection holding the anchor records.
    pub anchor_path: &'static str,
    /// REST collection holding the per-student records.
    pub records_path: &'static str,
    /// Query parameter scoping per-student records to their anchor.
    pub anchor_param: &'static str,
    template: fn(&PromptInputs<'_>, &mut String),
}

impl std::fmt::Debug for WorkflowDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDescriptor")
            .field("kind", &self.kind)
            .field("resource_mode", &self.resource_mode)
            .finish_non_exhaustive()
    }
}

pub static GUIDED_READING: WorkflowDescriptor = WorkflowDescriptor {
    kind: WorkflowKind::GuidedReading,
    content_type: "next_steps",
    required_scalars: &[ScalarField::BookTitle, ScalarField::ReadingLevel],
    resource_mode: ResourceMode::Unconditional,
    primary_field: "activity",
    secondary_field: "comments",
    max_resources: 8,
    anchor_path: "sessions",
    records_path: "activity-records",
    anchor_param: "sessionId",
    template: guided_reading_template,
};

pub static INTERVENTION: WorkflowDescriptor = WorkflowDescriptor {
    kind: WorkflowKind::Intervention,
    content_type: "lesson_plan",
    required_scalars: &[],
    resource_mode: ResourceMode::Flagged,
    primary_field: "intervention",
    secondary_field: "interventionResults",
    max_resources: 1,
    anchor_path: "lesson-plans",
    records_path: "intervention-records",
    anchor_param: "lessonPlanId",
    template: intervention_template,
};

pub fn descriptor(kind: WorkflowKind) -> &'static WorkflowDescriptor {
    match kind {
        WorkflowKind::GuidedReading => &GUIDED_READING,
        WorkflowKind::Intervention => &INTERVENTION,
    }
}

impl WorkflowDescriptor {
    /// Builds the natural key for a selection. Intervention keys require a
    /// lesson type; guided-reading keys are scoped to the teacher.
    pub fn key(
        &self,
        group_id: &str,
        date: NaiveDate,
        teacher_id: &str,
        lesson_type: Option<&str>,
    ) -> Result<AnchorKey, LessonError> {
        let group_id = group_id.trim();
        if group_id.is_empty() {
            return Err(LessonError::validation("groupId must not be empty"));
        }
        let discriminator = match self.kind {
            WorkflowKind::GuidedReading => teacher_id.trim(),
            WorkflowKind::Intervention => lesson_type.map(str::trim).unwrap_or(""),
        };
        if discriminator.is_empty() {
            return Err(LessonError::validation(match self.kind {
                WorkflowKind::GuidedReading => "teacherId must not be empty",
                WorkflowKind::Intervention => "lessonType must not be empty",
            }));
        }
        Ok(AnchorKey {
            kind: self.kind,
            group_id: group_id.to_string(),
            date,
            discriminator: discriminator.to_string(),
        })
    }

    pub fn wants_resources(&self, requested: bool) -> bool {
        match self.resource_mode {
            ResourceMode::Unconditional => true,
            ResourceMode::Flagged => requested,
        }
    }

    /// Names of required scalar fields that are blank.
    pub fn missing_scalars(&self, scalars: &SessionScalars) -> Vec<&'static str> {
        self.required_scalars
            .iter()
            .filter(|f| f.value(scalars).trim().is_empty())
            .map(|f| f.name())
            .collect()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        if name == self.primary_field {
            Some(0)
        } else if name == self.secondary_field {
            Some(1)
        } else {
            None
        }
    }

    pub fn build_prompt(&self, inputs: &PromptInputs<'_>) -> String {
        let mut out = String::new();
        (self.template)(inputs, &mut out);
        let extra = inputs.additional_requirements.trim();
        if !extra.is_empty() {
            out.push_str("\nAdditional requirements:\n");
            out.push_str(extra);
            out.push('\n');
            out.push_str(PRIORITY_INSTRUCTION);
            out.push('\n');
        }
        out
    }
}

fn push_preamble(inputs: &PromptInputs<'_>, role: &str, out: &mut String) {
    let grade = inputs.teacher.grade_level.trim();
    if grade.is_empty() {
        out.push_str(&format!("You are an experienced teacher {}.\n", role));
    } else {
        out.push_str(&format!(
            "You are an experienced grade {} teacher {}.\n",
            grade, role
        ));
    }
    if let Some(standard) = inputs
        .teacher
        .standards
        .first()
        .map(|s| s.description.trim())
        .filter(|s| !s.is_empty())
    {
        out.push_str(&format!("Teaching standard: {}\n", standard));
    }
    out.push_str(&format!("Date: {}\n", inputs.key.date_str()));
}

fn push_students(inputs: &PromptInputs<'_>, primary: &str, secondary: &str, out: &mut String) {
    out.push_str("\nStudent notes:\n");
    for r in inputs.records.iter().filter(|r| !r.is_blank()) {
        out.push_str(&format!(
            "- {}: {}: {}; {}: {}\n",
            r.student_name,
            primary,
            r.primary.trim(),
            secondary,
            r.secondary.trim()
        ));
    }
}

fn guided_reading_template(inputs: &PromptInputs<'_>, out: &mut String) {
    push_preamble(inputs, "planning next steps for a guided reading group", out);
    out.push_str(&format!("Book: {}\n", inputs.scalars.book_title.trim()));
    out.push_str(&format!(
        "Reading level: {}\n",
        inputs.scalars.reading_level.trim()
    ));
    if let Some(minutes) = inputs.scalars.duration_minutes {
        out.push_str(&format!("Session length: {} minutes\n", minutes));
    }
    push_students(inputs, "Activity", "Comments", out);
    out.push_str(
        "\nWrite a next-steps plan in markdown for the next guided reading session. \
         Address each student by name and ground every step in the notes above.\n",
    );
}

fn intervention_template(inputs: &PromptInputs<'_>, out: &mut String) {
    push_preamble(inputs, "planning a small-group intervention lesson", out);
    out.push_str(&format!("Lesson type: {}\n", inputs.key.discriminator));
    if let Some(minutes) = inputs.scalars.duration_minutes {
        out.push_str(&format!("Lesson length: {} minutes\n", minutes));
    }
    push_students(inputs, "Intervention", "Results", out);
    out.push_str(
        "\nWrite an intervention lesson plan in markdown with objectives, materials, \
         a timed sequence of activities and a short check for understanding.\n",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TeachingStandard;

    fn teacher() -> TeacherProfile {
        TeacherProfile {
            id: "t1".into(),
            name: "Ms. Rivera".into(),
            grade_level: "2".into(),
            standards: vec![
                TeachingStandard {
                    code: "RL.2.1".into(),
                    description: "Ask and answer who, what, where questions".into(),
                },
                TeachingStandard {
                    code: "RL.2.2".into(),
                    description: "Recount stories".into(),
                },
            ],
        }
    }

    fn record(name: &str, primary: &str, secondary: &str) -> MergedRecord {
        MergedRecord {
            student_id: format!("id-{}", name),
            student_name: name.into(),
            record_id: None,
            content_id: None,
            primary: primary.into(),
            secondary: secondary.into(),
            duration_minutes: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn keys_use_teacher_or_lesson_type() {
        let gr = GUIDED_READING.key("g1", date(), "t1", Some("ignored")).unwrap();
        assert_eq!(gr.discriminator, "t1");
        let iv = INTERVENTION.key("g1", date(), "t1", Some("phonics")).unwrap();
        assert_eq!(iv.discriminator, "phonics");
        assert!(INTERVENTION.key("g1", date(), "t1", None).is_err());
        assert!(GUIDED_READING.key(" ", date(), "t1", None).is_err());
    }

    #[test]
    fn prompt_carries_priority_instruction_only_with_additional_requirements() {
        let t = teacher();
        let key = GUIDED_READING.key("g1", date(), "t1", None).unwrap();
        let scalars = SessionScalars {
            book_title: "Frog and Toad".into(),
            reading_level: "J".into(),
            duration_minutes: Some(20),
        };
        let records = vec![record("Ava", "Retold chapter 1", ""), record("Ben", "", "")];
        let base = GUIDED_READING.build_prompt(&PromptInputs {
            teacher: &t,
            key: &key,
            scalars: &scalars,
            records: &records,
            additional_requirements: "  ",
        });
        assert!(base.contains("grade 2 teacher"));
        assert!(base.contains("Teaching standard: Ask and answer who, what, where questions"));
        assert!(!base.contains("Recount stories"));
        assert!(base.contains("Book: Frog and Toad"));
        assert!(base.contains("- Ava: Activity: Retold chapter 1"));
        assert!(!base.contains("Ben"));
        assert!(!base.contains(PRIORITY_INSTRUCTION));

        let extended = GUIDED_READING.build_prompt(&PromptInputs {
            teacher: &t,
            key: &key,
            scalars: &scalars,
            records: &records,
            additional_requirements: "Keep it under 200 words",
        });
        assert!(extended.starts_with(&base));
        assert!(extended.contains("Keep it under 200 words"));
        assert!(extended.contains(PRIORITY_INSTRUCTION));
    }

    #[test]
    fn required_scalars_differ_by_workflow() {
        let blank = SessionScalars::default();
        assert_eq!(
            GUIDED_READING.missing_scalars(&blank),
            vec!["bookTitle", "readingLevel"]
        );
        assert!(INTERVENTION.missing_scalars(&blank).is_empty());
        assert!(GUIDED_READING.wants_resources(false));
        assert!(!INTERVENTION.wants_resources(false));
        assert!(INTERVENTION.wants_resources(true));
    }
}
