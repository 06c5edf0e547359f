//! Generation state machine for one (group, date) selection:
//! `Idle -> Validating -> GeneratingPlan -> GeneratingResources -> Persisting -> Settled`.
//!
//! Stages run strictly in order. A plan failure aborts before anything is
//! persisted; a resource failure keeps the plan as an unsaved draft; a save
//! failure keeps the draft so it can be saved again without regenerating.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{LessonError, Stage, StageFailure};
use crate::generation::{normalize_resources, Generator};
use crate::model::{
    Anchor, AnchorKey, GeneratedContent, GeneratedResource, MergedRecord, NewContent,
    PerStudentRecord, RecordDraft, SessionScalars, TeacherProfile,
};
use crate::store::ContentStore;
use crate::workflow::{PromptInputs, WorkflowDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Validating,
    GeneratingPlan,
    GeneratingResources,
    Persisting,
    Settled { success: bool },
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::GeneratingPlan => "generating_plan",
            Self::GeneratingResources => "generating_resources",
            Self::Persisting => "persisting",
            Self::Settled { success: true } => "settled_success",
            Self::Settled { success: false } => "settled_error",
        }
    }

    pub fn is_busy(self) -> bool {
        !matches!(self, Self::Idle | Self::Settled { .. })
    }
}

/// Per-key phase table. At most one run per key is in flight.
#[derive(Default, Clone)]
pub struct BusyGate {
    phases: Rc<RefCell<HashMap<AnchorKey, Phase>>>,
}

impl BusyGate {
    pub fn phase(&self, key: &AnchorKey) -> Phase {
        self.phases
            .borrow()
            .get(key)
            .copied()
            .unwrap_or(Phase::Idle)
    }

    pub fn is_busy(&self, key: &AnchorKey) -> bool {
        self.phase(key).is_busy()
    }

    fn begin(&self, key: &AnchorKey, first: Phase) -> Option<Reservation> {
        let mut phases = self.phases.borrow_mut();
        if phases.get(key).map(|p| p.is_busy()).unwrap_or(false) {
            return None;
        }
        phases.insert(key.clone(), first);
        Some(Reservation {
            gate: self.clone(),
            key: key.clone(),
            done: false,
        })
    }

    fn set(&self, key: &AnchorKey, phase: Phase) {
        self.phases.borrow_mut().insert(key.clone(), phase);
    }
}

/// Holds the gate for one run. Taken synchronously, before any suspension
/// point, so a second trigger for the same key is refused immediately.
/// Dropping an unfinished reservation (e.g. the task was cancelled) settles
/// the key as failed so it never stays busy.
pub struct Reservation {
    gate: BusyGate,
    key: AnchorKey,
    done: bool,
}

impl Reservation {
    pub fn key(&self) -> &AnchorKey {
        &self.key
    }

    fn advance(&self, phase: Phase) {
        tracing::debug!(group = %self.key.group_id, date = %self.key.date_str(), phase = phase.as_str(), "generation phase");
        self.gate.set(&self.key, phase);
    }

    fn finish(mut self, phase: Phase) {
        self.gate.set(&self.key, phase);
        self.done = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.done {
            self.gate.set(&self.key, Phase::Settled { success: false });
        }
    }
}

/// Everything one generation run needs, snapshotted from the view.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub descriptor: &'static WorkflowDescriptor,
    pub key: AnchorKey,
    pub teacher: Option<TeacherProfile>,
    pub scalars: SessionScalars,
    pub records: Vec<MergedRecord>,
    pub additional_requirements: String,
    /// Sent with resource generation only; independent of
    /// `additional_requirements`.
    pub resource_requirements: String,
    pub generate_resources: bool,
}

/// Generated but not necessarily persisted output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub key: AnchorKey,
    pub teacher_id: String,
    pub scalars: SessionScalars,
    pub plan_text: String,
    pub resources: Vec<GeneratedResource>,
    pub prompt_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persisted {
    pub anchor: Anchor,
    pub content: GeneratedContent,
    pub records: Vec<PerStudentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub draft: Draft,
    pub persisted: Option<Persisted>,
    pub failure: Option<StageFailure>,
}

pub struct Orchestrator {
    store: Rc<dyn ContentStore>,
    generator: Rc<dyn Generator>,
    gate: BusyGate,
}

/// Generation preconditions, checked before any call is issued.
pub fn validate(req: &GenerationRequest) -> Result<&TeacherProfile, LessonError> {
    let missing = req.descriptor.missing_scalars(&req.scalars);
    if !missing.is_empty() {
        return Err(LessonError::validation(format!(
            "{} required before generating",
            missing.join(" and ")
        )));
    }
    let Some(teacher) = req.teacher.as_ref().filter(|t| !t.id.trim().is_empty()) else {
        return Err(LessonError::validation("teacher profile is unavailable"));
    };
    if req.records.iter().all(MergedRecord::is_blank) {
        return Err(LessonError::validation(format!(
            "enter {} or {} for at least one student before generating",
            req.descriptor.primary_field, req.descriptor.secondary_field
        )));
    }
    Ok(teacher)
}

fn fingerprint(prompt: &str) -> String {
    format!("{:x}", Sha256::digest(prompt.as_bytes()))
}

/// Per-student records worth persisting: students with both fields blank are
/// skipped.
pub fn records_to_persist(
    records: &[MergedRecord],
    anchor_id: &str,
    content_id: &str,
    default_duration: Option<i64>,
) -> Vec<RecordDraft> {
    records
        .iter()
        .filter(|r| !r.is_blank())
        .map(|r| RecordDraft {
            student_id: r.student_id.clone(),
            anchor_id: anchor_id.to_string(),
            content_id: Some(content_id.to_string()),
            primary: r.primary.trim().to_string(),
            secondary: r.secondary.trim().to_string(),
            duration_minutes: r.duration_minutes.or(default_duration),
        })
        .collect()
}

impl Orchestrator {
    pub fn new(store: Rc<dyn ContentStore>, generator: Rc<dyn Generator>) -> Self {
        Self::with_gate(store, generator, BusyGate::default())
    }

    /// Runs against an existing phase table, so in-flight runs stay visible
    /// to an orchestrator rebuilt around new clients.
    pub fn with_gate(
        store: Rc<dyn ContentStore>,
        generator: Rc<dyn Generator>,
        gate: BusyGate,
    ) -> Self {
        Self {
            store,
            generator,
            gate,
        }
    }

    pub fn gate(&self) -> &BusyGate {
        &self.gate
    }

    pub fn phase(&self, key: &AnchorKey) -> Phase {
        self.gate.phase(key)
    }

    pub fn is_busy(&self, key: &AnchorKey) -> bool {
        self.gate.is_busy(key)
    }

    /// Claims the busy gate for `key`, or `None` while a run for that key is
    /// still in flight.
    pub fn reserve(&self, key: &AnchorKey) -> Option<Reservation> {
        let r = self.gate.begin(key, Phase::Validating);
        if r.is_none() {
            tracing::info!(group = %key.group_id, date = %key.date_str(), "generation already in flight; ignoring trigger");
        }
        r
    }

    /// Reserves the gate and runs the whole pipeline.
    pub async fn generate(&self, req: GenerationRequest) -> Result<GenerationReport, LessonError> {
        let ticket = self.reserve(&req.key).ok_or(LessonError::Busy)?;
        self.run(ticket, req).await
    }

    /// Runs the pipeline under an existing reservation. Returns `Err` only
    /// when no plan exists (validation or plan failure); later failures are
    /// reported in the returned report next to the draft.
    pub async fn run(
        &self,
        ticket: Reservation,
        req: GenerationRequest,
    ) -> Result<GenerationReport, LessonError> {
        if ticket.key() != &req.key {
            ticket.finish(Phase::Idle);
            return Err(LessonError::validation("reservation does not match the requested session"));
        }

        let teacher = match validate(&req) {
            Ok(t) => t,
            Err(e) => {
                ticket.finish(Phase::Idle);
                return Err(e);
            }
        };

        ticket.advance(Phase::GeneratingPlan);
        let prompt = req.descriptor.build_prompt(&PromptInputs {
            teacher,
            key: &req.key,
            scalars: &req.scalars,
            records: &req.records,
            additional_requirements: &req.additional_requirements,
        });
        let plan_text = match self.generator.generate_plan(&prompt).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(group = %req.key.group_id, error = %e, "plan generation failed");
                ticket.finish(Phase::Settled { success: false });
                return Err(LessonError::at(Stage::GeneratePlan, e));
            }
        };

        let mut draft = Draft {
            key: req.key.clone(),
            teacher_id: teacher.id.clone(),
            scalars: req.scalars.clone(),
            plan_text,
            resources: Vec::new(),
            prompt_sha256: fingerprint(&prompt),
        };

        if req.descriptor.wants_resources(req.generate_resources) {
            ticket.advance(Phase::GeneratingResources);
            match self
                .generator
                .generate_resources(&draft.plan_text, &req.resource_requirements)
                .await
            {
                Ok(raw) => {
                    draft.resources = normalize_resources(&raw, req.descriptor.max_resources);
                }
                Err(e) => {
                    tracing::warn!(group = %req.key.group_id, error = %e, "resource generation failed; keeping plan");
                    let err = LessonError::at(Stage::GenerateResources, e);
                    ticket.finish(Phase::Settled { success: false });
                    return Ok(GenerationReport {
                        draft,
                        persisted: None,
                        failure: Some(StageFailure::from(&err)),
                    });
                }
            }
        }

        ticket.advance(Phase::Persisting);
        match self.persist(req.descriptor, &draft, &req.records).await {
            Ok(persisted) => {
                tracing::info!(
                    group = %req.key.group_id,
                    date = %req.key.date_str(),
                    content_id = %persisted.content.id,
                    records = persisted.records.len(),
                    "generation settled"
                );
                ticket.finish(Phase::Settled { success: true });
                Ok(GenerationReport {
                    draft,
                    persisted: Some(persisted),
                    failure: None,
                })
            }
            Err(e) => {
                tracing::warn!(group = %req.key.group_id, error = %e, "save failed; draft kept");
                ticket.finish(Phase::Settled { success: false });
                Ok(GenerationReport {
                    draft,
                    persisted: None,
                    failure: Some(StageFailure::from(&e)),
                })
            }
        }
    }

    /// Persists an existing draft again (manual save/retry). Shares the busy
    /// gate with [`Orchestrator::generate`].
    pub async fn save(
        &self,
        descriptor: &'static WorkflowDescriptor,
        draft: &Draft,
        records: &[MergedRecord],
    ) -> Result<Persisted, LessonError> {
        let Some(ticket) = self.gate.begin(&draft.key, Phase::Persisting) else {
            return Err(LessonError::Busy);
        };
        let result = self.persist(descriptor, draft, records).await;
        ticket.finish(Phase::Settled {
            success: result.is_ok(),
        });
        result
    }

    /// Anchor first, then content (which needs the anchor id), then the
    /// per-student records (which need the content id).
    async fn persist(
        &self,
        descriptor: &WorkflowDescriptor,
        draft: &Draft,
        records: &[MergedRecord],
    ) -> Result<Persisted, LessonError> {
        let save = |e| LessonError::at(Stage::Save, e);

        let anchor = self
            .store
            .upsert_anchor(&draft.key, &draft.teacher_id, &draft.scalars)
            .await
            .map_err(save)?;

        let content = self
            .store
            .upsert_content(&NewContent {
                key: draft.key.clone(),
                anchor_id: anchor.id.clone(),
                content_type: descriptor.content_type.to_string(),
                plan_text: draft.plan_text.clone(),
                resources: draft.resources.clone(),
                prompt_sha256: Some(draft.prompt_sha256.clone()),
            })
            .await
            .map_err(save)?;

        let to_save = records_to_persist(
            records,
            &anchor.id,
            &content.id,
            draft.scalars.duration_minutes,
        );
        let saved = if to_save.is_empty() {
            Vec::new()
        } else {
            self.store
                .save_records(&draft.key, &to_save)
                .await
                .map_err(save)?
        };

        Ok(Persisted {
            anchor,
            content,
            records: saved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn merged(id: &str, primary: &str, secondary: &str) -> MergedRecord {
        MergedRecord {
            student_id: id.into(),
            student_name: id.into(),
            record_id: None,
            content_id: None,
            primary: primary.into(),
            secondary: secondary.into(),
            duration_minutes: None,
        }
    }

    #[test]
    fn blank_students_are_not_persisted() {
        let records = vec![
            merged("s1", "read p.1-4", ""),
            merged("s2", "  ", ""),
            merged("s3", "", "needs decoding help"),
            merged("s4", "", ""),
        ];
        let drafts = records_to_persist(&records, "a1", "c1", Some(25));
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].student_id, "s1");
        assert_eq!(drafts[1].student_id, "s3");
        assert!(drafts.iter().all(|d| d.content_id.as_deref() == Some("c1")));
        assert!(drafts.iter().all(|d| d.duration_minutes == Some(25)));
    }

    #[test]
    fn gate_rejects_second_ticket_until_settled() {
        let gate = BusyGate::default();
        let key = AnchorKey {
            kind: crate::model::WorkflowKind::GuidedReading,
            group_id: "g1".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            discriminator: "t1".into(),
        };
        let t = gate.begin(&key, Phase::Validating).expect("first reservation");
        assert!(gate.begin(&key, Phase::Validating).is_none());
        t.advance(Phase::GeneratingPlan);
        assert_eq!(gate.phase(&key), Phase::GeneratingPlan);
        drop(t);
        assert_eq!(gate.phase(&key), Phase::Settled { success: false });
        assert!(gate.begin(&key, Phase::Validating).is_some());
    }
}
