use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::AuthClient;
use crate::error::ClientError;
use crate::telemetry::{InteractionRecord, InteractionSink};
use crate::transport::ApiRequest;

const BASE: &str = "/api/module-sessions";

/// A learner's run through one learning module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSession {
    pub id: String,
    #[serde(alias = "moduleId")]
    pub module_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone)]
pub struct ModuleSessionsApi {
    client: AuthClient,
}

impl ModuleSessionsApi {
    pub fn new(client: AuthClient) -> Self {
        Self { client }
    }

    pub async fn start(&self, module_id: &str) -> Result<ModuleSession, ClientError> {
        self.client
            .send_json(ApiRequest::post(BASE, json!({ "module_id": module_id })))
            .await
    }

    pub async fn get(&self, session_id: &str) -> Result<ModuleSession, ClientError> {
        self.client
            .send_json(ApiRequest::get(format!("{}/{}", BASE, session_id)))
            .await
    }

    pub async fn complete(&self, session_id: &str, summary: Value) -> Result<ModuleSession, ClientError> {
        self.client
            .send_json(ApiRequest::post(
                format!("{}/{}/complete", BASE, session_id),
                summary,
            ))
            .await
    }

    pub async fn record_interaction(
        &self,
        session_id: &str,
        record: &InteractionRecord,
    ) -> Result<(), ClientError> {
        let body = serde_json::to_value(record)?;
        self.client
            .send(ApiRequest::post(
                format!("{}/{}/interactions", BASE, session_id),
                body,
            ))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl InteractionSink for ModuleSessionsApi {
    async fn send_interaction(
        &self,
        session_id: &str,
        record: &InteractionRecord,
    ) -> Result<(), ClientError> {
        self.record_interaction(session_id, record).await
    }
}
