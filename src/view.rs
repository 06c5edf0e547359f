//! In-memory view of the current (group, date) selection. Rebuilt from
//! scratch whenever the selection changes; never shared across keys.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::StageFailure;
use crate::model::{AnchorKey, GeneratedContent, MergedRecord, SessionScalars, Student, TeacherProfile};
use crate::orchestrator::{Draft, GenerationReport, GenerationRequest, Persisted};
use crate::resolver::Resolved;
use crate::workflow::WorkflowDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImproveState {
    Idle,
    Pending,
    Done,
}

/// Per-field text-improvement status, keyed by (entity id, field name).
#[derive(Debug, Default)]
pub struct ImproveTracker {
    states: BTreeMap<(String, String), ImproveState>,
}

impl ImproveTracker {
    pub fn get(&self, entity_id: &str, field: &str) -> ImproveState {
        self.states
            .get(&(entity_id.to_string(), field.to_string()))
            .copied()
            .unwrap_or(ImproveState::Idle)
    }

    /// Marks the field pending; returns false when it already is.
    pub fn start(&mut self, entity_id: &str, field: &str) -> bool {
        let k = (entity_id.to_string(), field.to_string());
        if self.states.get(&k) == Some(&ImproveState::Pending) {
            return false;
        }
        self.states.insert(k, ImproveState::Pending);
        true
    }

    pub fn finish(&mut self, entity_id: &str, field: &str, success: bool) {
        let state = if success {
            ImproveState::Done
        } else {
            ImproveState::Idle
        };
        self.states
            .insert((entity_id.to_string(), field.to_string()), state);
    }

    pub fn to_json(&self) -> Value {
        let mut out = serde_json::Map::new();
        for ((entity, field), state) in &self.states {
            let entry = out
                .entry(entity.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Some(obj) = entry.as_object_mut() {
                obj.insert(field.clone(), json!(state));
            }
        }
        Value::Object(out)
    }
}

pub struct Selection {
    pub descriptor: &'static WorkflowDescriptor,
    pub key: AnchorKey,
    pub teacher_id: String,
    /// `None` when the directory has no profile for `teacher_id`; generation
    /// is then refused.
    pub teacher: Option<TeacherProfile>,
    pub roster: Vec<Student>,
    pub scalars: SessionScalars,
    pub records: Vec<MergedRecord>,
    pub anchor_id: Option<String>,
    pub content: Option<GeneratedContent>,
    /// Generated output not yet persisted.
    pub draft: Option<Draft>,
    pub last_failure: Option<StageFailure>,
    pub additional_requirements: String,
    pub resource_requirements: String,
    pub improve: ImproveTracker,
}

impl Selection {
    pub fn new(
        descriptor: &'static WorkflowDescriptor,
        key: AnchorKey,
        teacher_id: &str,
        teacher: Option<TeacherProfile>,
        roster: Vec<Student>,
        resolved: Resolved,
        default_duration: Option<i64>,
    ) -> Self {
        let records = crate::reconcile::merge(&roster, &resolved.records);
        let (anchor_id, scalars) = match resolved.anchor {
            Some(a) => (Some(a.id), a.scalars),
            None => (
                None,
                SessionScalars {
                    duration_minutes: default_duration,
                    ..SessionScalars::default()
                },
            ),
        };
        Self {
            descriptor,
            key,
            teacher_id: teacher_id.to_string(),
            teacher,
            roster,
            scalars,
            records,
            anchor_id,
            content: resolved.content,
            draft: None,
            last_failure: None,
            additional_requirements: String::new(),
            resource_requirements: String::new(),
            improve: ImproveTracker::default(),
        }
    }

    pub fn record_mut(&mut self, student_id: &str) -> Option<&mut MergedRecord> {
        self.records.iter_mut().find(|r| r.student_id == student_id)
    }

    pub fn field_value(&self, student_id: &str, field: &str) -> Option<String> {
        let idx = self.descriptor.field_index(field)?;
        let r = self.records.iter().find(|r| r.student_id == student_id)?;
        Some(if idx == 0 {
            r.primary.clone()
        } else {
            r.secondary.clone()
        })
    }

    /// Sets one editable field; returns false for unknown students or fields.
    pub fn set_field(&mut self, student_id: &str, field: &str, value: &str) -> bool {
        let Some(idx) = self.descriptor.field_index(field) else {
            return false;
        };
        let Some(r) = self.record_mut(student_id) else {
            return false;
        };
        if idx == 0 {
            r.primary = value.to_string();
        } else {
            r.secondary = value.to_string();
        }
        true
    }

    pub fn generation_request(&self, generate_resources: bool) -> GenerationRequest {
        GenerationRequest {
            descriptor: self.descriptor,
            key: self.key.clone(),
            teacher: self.teacher.clone(),
            scalars: self.scalars.clone(),
            records: self.records.clone(),
            additional_requirements: self.additional_requirements.clone(),
            resource_requirements: self.resource_requirements.clone(),
            generate_resources,
        }
    }

    pub fn apply_persisted(&mut self, persisted: &Persisted) {
        self.anchor_id = Some(persisted.anchor.id.clone());
        self.content = Some(persisted.content.clone());
        for saved in &persisted.records {
            if let Some(r) = self.record_mut(&saved.student_id) {
                r.record_id = Some(saved.id.clone());
                r.content_id = saved.content_id.clone();
                r.duration_minutes = saved.duration_minutes;
            }
        }
        self.draft = None;
        self.last_failure = None;
    }

    /// Folds a finished run in. Unpersisted output stays as the draft.
    pub fn apply_report(&mut self, report: &GenerationReport) {
        match &report.persisted {
            Some(p) => self.apply_persisted(p),
            None => {
                self.draft = Some(report.draft.clone());
                self.last_failure = report.failure.clone();
            }
        }
    }

    pub fn record_view(&self, student_id: &str) -> Option<Value> {
        self.records
            .iter()
            .find(|r| r.student_id == student_id)
            .map(|r| self.record_json(r))
    }

    fn record_json(&self, r: &MergedRecord) -> Value {
        let mut v = json!({
            "studentId": r.student_id,
            "name": r.student_name,
            "recordId": r.record_id,
            "contentId": r.content_id,
            "durationMinutes": r.duration_minutes,
        });
        if let Some(obj) = v.as_object_mut() {
            obj.insert(self.descriptor.primary_field.into(), json!(r.primary));
            obj.insert(self.descriptor.secondary_field.into(), json!(r.secondary));
        }
        v
    }

    pub fn to_json(&self) -> Value {
        let records: Vec<Value> = self.records.iter().map(|r| self.record_json(r)).collect();
        json!({
            "workflow": self.key.kind.as_str(),
            "groupId": self.key.group_id,
            "date": self.key.date_str(),
            "lessonType": (self.key.kind == crate::model::WorkflowKind::Intervention)
                .then(|| self.key.discriminator.clone()),
            "teacherId": self.teacher_id,
            "teacher": self.teacher,
            "anchorId": self.anchor_id,
            "scalars": self.scalars,
            "records": records,
            "content": self.content,
            "draft": self.draft,
            "lastFailure": self.last_failure,
            "additionalRequirements": self.additional_requirements,
            "resourceRequirements": self.resource_requirements,
            "improve": self.improve.to_json(),
        })
    }
}

/// The daemon's single view. `epoch` increments on every selection change so
/// late completions can tell whether they still apply.
#[derive(Default)]
pub struct ViewState {
    pub epoch: u64,
    pub selection: Option<Selection>,
}

impl ViewState {
    pub fn replace(&mut self, selection: Option<Selection>) -> u64 {
        self.epoch += 1;
        self.selection = selection;
        self.epoch
    }

    /// The selection, but only if it is still the one issued at `epoch`.
    pub fn current_mut(&mut self, epoch: u64) -> Option<&mut Selection> {
        if self.epoch != epoch {
            return None;
        }
        self.selection.as_mut()
    }

    /// The selection, if it shows `key`, whichever epoch it was opened at.
    pub fn for_key_mut(&mut self, key: &AnchorKey) -> Option<&mut Selection> {
        self.selection.as_mut().filter(|sel| &sel.key == key)
    }
}
