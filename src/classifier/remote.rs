//! Remote classification over the persistent connection.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::error::ClassifierError;
use super::types::{RemoteClassification, RemoteRequest};
use crate::connection::ConnectionManager;

/// `action` value of a classification request payload.
pub const CLASSIFY_ACTION: &str = "classify_intent";

/// One remote classification attempt. Retries are the façade's concern.
#[async_trait]
pub trait RemoteClassifier: Send + Sync {
    async fn classify(
        &self,
        request: &RemoteRequest,
    ) -> Result<RemoteClassification, ClassifierError>;
}

/// [`RemoteClassifier`] that sends `{"action": "classify_intent", "data": …}`
/// through a [`ConnectionManager`] and decodes the correlated response.
///
/// Connects lazily when the link is down.
#[derive(Debug, Clone)]
pub struct ConnectionRemoteClassifier {
    connection: ConnectionManager,
}

impl ConnectionRemoteClassifier {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

#[async_trait]
impl RemoteClassifier for ConnectionRemoteClassifier {
    async fn classify(
        &self,
        request: &RemoteRequest,
    ) -> Result<RemoteClassification, ClassifierError> {
        if !self.connection.state().is_connected() {
            self.connection.connect().await?;
        }
        let payload = json!({
            "action": CLASSIFY_ACTION,
            "data": serde_json::to_value(request)
                .map_err(|e| ClassifierError::Decode(format!("encode request: {e}")))?,
        });
        let response = self.connection.send_request(payload).await?;
        decode_response(response)
    }
}

/// Accept either a bare classification or one wrapped in `{"data": …}`.
fn decode_response(mut response: Value) -> Result<RemoteClassification, ClassifierError> {
    let wrapped = response.get_mut("data").map(Value::take);
    if let Some(inner) = wrapped {
        response = inner;
    }
    serde_json::from_value(response)
        .map_err(|e| ClassifierError::Decode(format!("classification response: {e}")))
}
