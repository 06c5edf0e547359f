//! Client for the AI generation backend (plan, resources, text improvement).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ClientError;
use crate::model::GeneratedResource;

pub const DEFAULT_RESOURCE_TYPE: &str = "resource";
pub const DEFAULT_RESOURCE_TITLE: &str = "Generated Resource";

#[async_trait(?Send)]
pub trait Generator {
    async fn generate_plan(&self, prompt: &str) -> Result<String, ClientError>;

    /// Returns the raw response body; callers normalize it with
    /// [`normalize_resources`].
    async fn generate_resources(
        &self,
        plan_text: &str,
        additional_requirements: &str,
    ) -> Result<Value, ClientError>;

    async fn improve_text(&self, text: &str) -> Result<String, ClientError>;
}

#[derive(Clone)]
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct PlanRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    plan_text: String,
}

#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    plan_text: &'a str,
    additional_requirements: &'a str,
}

#[derive(Debug, Serialize)]
struct ImproveRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImproveResponse {
    improved_text: String,
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Value, ClientError> {
        let mut req = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let text = resp.text().await?;
        // Some deployments answer with plain text instead of JSON.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait(?Send)]
impl Generator for HttpGenerator {
    async fn generate_plan(&self, prompt: &str) -> Result<String, ClientError> {
        let body = self.post("generate-plan", &PlanRequest { prompt }).await?;
        let resp: PlanResponse = serde_json::from_value(body)?;
        if resp.plan_text.trim().is_empty() {
            return Err(ClientError::Shape("plan_text is empty".into()));
        }
        Ok(resp.plan_text)
    }

    async fn generate_resources(
        &self,
        plan_text: &str,
        additional_requirements: &str,
    ) -> Result<Value, ClientError> {
        self.post(
            "generate-resources",
            &ResourceRequest {
                plan_text,
                additional_requirements,
            },
        )
        .await
    }

    async fn improve_text(&self, text: &str) -> Result<String, ClientError> {
        let body = self.post("improve-text", &ImproveRequest { text }).await?;
        let resp: ImproveResponse = serde_json::from_value(body)?;
        Ok(resp.improved_text)
    }
}

fn structured(item: &Value) -> Option<GeneratedResource> {
    let obj = item.as_object()?;
    let resource_type = obj.get("type")?.as_str()?.to_string();
    let title = obj.get("title")?.as_str()?.to_string();
    let content = match obj.get("content")? {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };
    Some(GeneratedResource {
        resource_type,
        title,
        content,
        metadata: obj.get("metadata").filter(|m| !m.is_null()).cloned(),
    })
}

fn wrap_raw(payload: &Value) -> GeneratedResource {
    let content = match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    GeneratedResource {
        resource_type: DEFAULT_RESOURCE_TYPE.to_string(),
        title: DEFAULT_RESOURCE_TITLE.to_string(),
        content,
        metadata: None,
    }
}

fn bounded(mut list: Vec<GeneratedResource>, max: usize) -> Vec<GeneratedResource> {
    if list.len() > max {
        tracing::debug!(received = list.len(), kept = max, "resource list truncated");
        list.truncate(max);
    }
    list
}

/// Turns a resource-generation response into a structured resource list.
///
/// A `{"resources": [...]}` body whose entries all carry `type`, `title` and
/// `content` is taken as-is. Anything else (a bare string, an unstructured
/// object, a partially structured list) becomes exactly one resource with the
/// default type and title and the raw payload as content. Never fails.
pub fn normalize_resources(raw: &Value, max: usize) -> Vec<GeneratedResource> {
    let payload = raw.get("resources").unwrap_or(raw);
    if let Value::Array(items) = payload {
        let parsed: Option<Vec<GeneratedResource>> = items.iter().map(structured).collect();
        if let Some(list) = parsed {
            return bounded(list, max);
        }
    }
    if payload.is_null() || payload == &json!("") {
        if raw.as_object().map(|o| o.len() > 1).unwrap_or(false) {
            tracing::debug!("resource response has no resources");
        }
        return Vec::new();
    }
    bounded(vec![wrap_raw(payload)], max)
}
