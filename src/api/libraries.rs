use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::AuthClient;
use crate::error::ClientError;
use crate::transport::ApiRequest;

const BASE: &str = "/api/libraries";

/// A user-curated collection of learning modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "moduleIds")]
    pub module_ids: Vec<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone)]
pub struct LibrariesApi {
    client: AuthClient,
}

impl LibrariesApi {
    pub fn new(client: AuthClient) -> Self {
        Self { client }
    }

    /// Backends return either a bare array or `{"libraries": [...]}`.
    pub async fn list(&self) -> Result<Vec<Library>, ClientError> {
        let body = self.client.get_json(BASE).await?;
        let items = match body {
            Value::Object(mut map) => map.remove("libraries").unwrap_or(Value::Array(Vec::new())),
            Value::Null => Value::Array(Vec::new()),
            other => other,
        };
        Ok(serde_json::from_value(items)?)
    }

    pub async fn get(&self, id: &str) -> Result<Library, ClientError> {
        self.client
            .send_json(ApiRequest::get(format!("{}/{}", BASE, id)))
            .await
    }

    pub async fn create(&self, name: &str, description: Option<&str>) -> Result<Library, ClientError> {
        self.client
            .send_json(ApiRequest::post(
                BASE,
                json!({ "name": name, "description": description }),
            ))
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        self.client.delete(&format!("{}/{}", BASE, id)).await
    }
}
