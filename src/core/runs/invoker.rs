use anyhow::{Context, Result};
use async_trait::async_trait;

use super::types::ReviewMetadata;

/// Shape of the external enrichment call. The engine only owns the call
/// contract; what happens behind it is the remote service's business.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvocationRequest {
    #[serde(rename = "itemKey")]
    pub item_key: String,
    #[serde(rename = "searchQuery")]
    pub search_query: String,
    pub context: Option<String>,
    pub review: Option<ReviewMetadata>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct InvocationOutcome {
    pub ok: bool,
    pub message: Option<String>,
}

#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationOutcome>;
}

/// Production invoker: posts the invocation contract as JSON to the
/// configured enrichment service.
pub struct HttpInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInvoker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationOutcome> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("enrichment call to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(InvocationOutcome {
                ok: false,
                message: Some(format!("enrichment service returned {status}: {body}")),
            });
        }

        // Callers treat an unparseable body as a plain acknowledgement.
        let outcome = response
            .json::<InvocationOutcome>()
            .await
            .unwrap_or(InvocationOutcome {
                ok: true,
                message: None,
            });
        Ok(outcome)
    }
}
