//! REST client for the CRUD backend. Every request carries the bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ContentStore, Directory};
use crate::error::ClientError;
use crate::model::{
    Anchor, AnchorKey, GeneratedContent, Group, NewContent, PerStudentRecord, RecordDraft,
    SessionScalars, Student, TeacherProfile, WorkflowKind,
};
use crate::workflow::{descriptor, INTERVENTION};

const GENERATED_CONTENT_PATH: &str = "next-steps";

#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

/// Wire shape of a session / lesson plan. The backend stores the key fields
/// flat; `lessonType` doubles as the intervention discriminator.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnchorDto {
    #[serde(default)]
    id: String,
    group_id: String,
    date: String,
    teacher_id: String,
    #[serde(default)]
    lesson_type: Option<String>,
    #[serde(flatten)]
    scalars: SessionScalars,
    #[serde(default)]
    updated_at: Option<String>,
}

impl AnchorDto {
    fn into_anchor(self, kind: WorkflowKind) -> Option<Anchor> {
        let date = chrono::NaiveDate::parse_from_str(self.date.get(..10)?, "%Y-%m-%d").ok()?;
        let discriminator = match kind {
            WorkflowKind::GuidedReading => self.teacher_id.clone(),
            WorkflowKind::Intervention => self.lesson_type?,
        };
        Some(Anchor {
            id: self.id,
            key: AnchorKey {
                kind,
                group_id: self.group_id,
                date,
                discriminator,
            },
            teacher_id: self.teacher_id,
            scalars: self.scalars,
            updated_at: self.updated_at,
        })
    }
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Option<Value>, ClientError> {
        let resp = self.authed(req).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<Value>, ClientError> {
        self.send(self.client.get(self.url(path)).query(query)).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
        self.send(self.client.post(self.url(path)).json(body))
            .await?
            .ok_or_else(|| ClientError::Shape(format!("empty response from POST {}", path)))
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ClientError> {
        match self.get(path, query).await? {
            Some(v) => decode_list(v),
            None => Ok(Vec::new()),
        }
    }
}

/// Reduces a zero-or-one response (object, array or null) to its single item.
fn single(v: Value) -> Option<Value> {
    match v {
        Value::Null => None,
        Value::Array(items) => items.into_iter().next(),
        Value::Object(mut obj) => match obj.remove("data") {
            Some(inner) => single(inner),
            None => Some(Value::Object(obj)),
        },
        _ => None,
    }
}

/// Accepts a bare array or an envelope `{ "data": [...] }`.
fn decode_list<T: DeserializeOwned>(v: Value) -> Result<Vec<T>, ClientError> {
    let items = match v {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => items,
            _ => return Err(ClientError::Shape("expected a list".into())),
        },
        Value::Null => Vec::new(),
        _ => return Err(ClientError::Shape("expected a list".into())),
    };
    items
        .into_iter()
        .map(|i| serde_json::from_value(i).map_err(ClientError::from))
        .collect()
}

fn key_query(key: &AnchorKey) -> Vec<(&'static str, String)> {
    let mut q = vec![("groupId", key.group_id.clone()), ("date", key.date_str())];
    match key.kind {
        WorkflowKind::GuidedReading => q.push(("teacherId", key.discriminator.clone())),
        WorkflowKind::Intervention => q.push(("lessonType", key.discriminator.clone())),
    }
    q
}

fn as_pairs<'a>(q: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    q.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

#[async_trait(?Send)]
impl ContentStore for HttpStore {
    async fn find_anchor(&self, key: &AnchorKey) -> Result<Option<Anchor>, ClientError> {
        let d = descriptor(key.kind);
        let q = key_query(key);
        let Some(body) = self.get(d.anchor_path, &as_pairs(&q)).await?.and_then(single) else {
            return Ok(None);
        };
        // An unexpected shape reads as "no session yet".
        match serde_json::from_value::<AnchorDto>(body) {
            Ok(dto) => Ok(dto.into_anchor(key.kind)),
            Err(e) => {
                tracing::warn!(path = d.anchor_path, error = %e, "ignoring malformed anchor");
                Ok(None)
            }
        }
    }

    async fn upsert_anchor(
        &self,
        key: &AnchorKey,
        teacher_id: &str,
        scalars: &SessionScalars,
    ) -> Result<Anchor, ClientError> {
        let d = descriptor(key.kind);
        let dto = AnchorDto {
            id: String::new(),
            group_id: key.group_id.clone(),
            date: key.date_str(),
            teacher_id: teacher_id.to_string(),
            lesson_type: (key.kind == WorkflowKind::Intervention)
                .then(|| key.discriminator.clone()),
            scalars: scalars.clone(),
            updated_at: None,
        };
        let body = self.post(d.anchor_path, &serde_json::to_value(&dto)?).await?;
        let saved: AnchorDto = serde_json::from_value(single(body).unwrap_or(Value::Null))?;
        saved
            .into_anchor(key.kind)
            .ok_or_else(|| ClientError::Shape(format!("{} response missing key fields", d.anchor_path)))
    }

    async fn find_content(&self, key: &AnchorKey) -> Result<Option<GeneratedContent>, ClientError> {
        let d = descriptor(key.kind);
        let mut q = key_query(key);
        q.push(("contentType", d.content_type.to_string()));
        let Some(body) = self.get(GENERATED_CONTENT_PATH, &as_pairs(&q)).await?.and_then(single)
        else {
            return Ok(None);
        };
        let mut content: GeneratedContent = serde_json::from_value(with_key(body, key))?;
        content.resources.truncate(d.max_resources);
        Ok(Some(content))
    }

    async fn upsert_content(&self, content: &NewContent) -> Result<GeneratedContent, ClientError> {
        let key = &content.key;
        let body = json!({
            "key": key,
            "groupId": key.group_id,
            "date": key.date_str(),
            "anchorId": content.anchor_id,
            "contentType": content.content_type,
            "planText": content.plan_text,
            "resources": content.resources,
            "promptSha256": content.prompt_sha256,
        });
        let saved = self.post(GENERATED_CONTENT_PATH, &body).await?;
        let saved = single(saved).ok_or_else(|| ClientError::Shape("empty content response".into()))?;
        Ok(serde_json::from_value(with_key(saved, key))?)
    }

    async fn list_records(
        &self,
        key: &AnchorKey,
        anchor_id: &str,
    ) -> Result<Vec<PerStudentRecord>, ClientError> {
        let d = descriptor(key.kind);
        let raw: Vec<Value> = self
            .get_list(d.records_path, &[(d.anchor_param, anchor_id)])
            .await?;
        raw.into_iter()
            .map(|v| serde_json::from_value(record_fields(v, key.kind, anchor_id)).map_err(ClientError::from))
            .collect()
    }

    async fn save_records(
        &self,
        key: &AnchorKey,
        records: &[RecordDraft],
    ) -> Result<Vec<PerStudentRecord>, ClientError> {
        let d = descriptor(key.kind);
        let payload: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "studentId": r.student_id,
                    d.anchor_param: r.anchor_id,
                    "contentId": r.content_id,
                    d.primary_field: r.primary,
                    d.secondary_field: r.secondary,
                    "durationMinutes": r.duration_minutes,
                })
            })
            .collect();
        let body = self
            .post(&format!("{}/bulk", d.records_path), &Value::Array(payload))
            .await?;
        let items: Vec<Value> = decode_list(body)?;
        let anchor_id = records.first().map(|r| r.anchor_id.as_str()).unwrap_or("");
        items
            .into_iter()
            .map(|v| serde_json::from_value(record_fields(v, key.kind, anchor_id)).map_err(ClientError::from))
            .collect()
    }

    async fn list_lesson_plans(&self, teacher_id: &str) -> Result<Vec<Anchor>, ClientError> {
        let raw: Vec<AnchorDto> = self
            .get_list(INTERVENTION.anchor_path, &[("teacherId", teacher_id)])
            .await?;
        Ok(raw
            .into_iter()
            .filter_map(|dto| dto.into_anchor(WorkflowKind::Intervention))
            .collect())
    }
}

/// The backend echoes flat key fields; attach the structured key we asked for.
fn with_key(mut v: Value, key: &AnchorKey) -> Value {
    if let Some(obj) = v.as_object_mut() {
        obj.insert("key".into(), json!(key));
    }
    v
}

/// Maps workflow-specific field names onto `PerStudentRecord`'s generic ones.
fn record_fields(mut v: Value, kind: WorkflowKind, anchor_id: &str) -> Value {
    let d = descriptor(kind);
    if let Some(obj) = v.as_object_mut() {
        if let Some(p) = obj.remove(d.primary_field) {
            obj.insert("primary".into(), p);
        }
        if let Some(s) = obj.remove(d.secondary_field) {
            obj.insert("secondary".into(), s);
        }
        let anchor = obj
            .remove(d.anchor_param)
            .unwrap_or_else(|| Value::String(anchor_id.to_string()));
        obj.insert("anchorId".into(), anchor);
        for field in ["primary", "secondary"] {
            if obj.get(field).map(Value::is_null).unwrap_or(false) {
                obj.insert(field.into(), Value::String(String::new()));
            }
        }
    }
    v
}

#[async_trait(?Send)]
impl Directory for HttpStore {
    async fn teacher_profile(
        &self,
        teacher_id: &str,
    ) -> Result<Option<TeacherProfile>, ClientError> {
        let Some(body) = self
            .get(&format!("teachers/{}", teacher_id), &[])
            .await?
            .and_then(single)
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(body)?))
    }

    async fn list_groups(&self, teacher_id: &str) -> Result<Vec<Group>, ClientError> {
        self.get_list("groups", &[("teacherId", teacher_id)]).await
    }

    async fn list_students(&self, teacher_id: &str) -> Result<Vec<Student>, ClientError> {
        self.get_list("students", &[("teacherId", teacher_id)]).await
    }
}
