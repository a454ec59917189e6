//! Optional LLM narrator: a single text-generation call that turns a
//! [`SimulationResult`] into a free-form analysis paragraph. Disabled
//! whenever no API key is configured.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::SimulationResult;

#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("narrator HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("narrator returned no content")]
    EmptyResponse,
}

#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, result: &SimulationResult) -> Result<String, NarratorError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    text: Option<String>,
}

/// Calls a single text-generation HTTP endpoint with a prompt built
/// from the simulation's summary and impact counts.
pub struct HttpNarrator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpNarrator {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> Result<Self, NarratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint, api_key })
    }

    fn backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(3)
            .with_jitter()
    }

    fn prompt_for(result: &SimulationResult) -> String {
        format!(
            "Summarize the network impact of this change for an SRE. Summary: {}. Risk: {:?}. Affected pods: {}. Blocked connections: {}. Critical paths: {}.",
            result.summary,
            result.risk,
            result.impact.affected_pods,
            result.impact.blocked_connections,
            result.impact.critical_paths.join(", "),
        )
    }

    async fn call_once(&self, prompt: &str) -> Result<String, NarratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest { prompt, max_tokens: 256 })
            .send()
            .await?
            .error_for_status()?
            .json::<CompletionResponse>()
            .await?;

        response.text.filter(|t| !t.is_empty()).ok_or(NarratorError::EmptyResponse)
    }
}

#[async_trait]
impl Narrator for HttpNarrator {
    async fn narrate(&self, result: &SimulationResult) -> Result<String, NarratorError> {
        let prompt = Self::prompt_for(result);

        (|| async { self.call_once(&prompt).await })
            .retry(Self::backoff())
            .when(|e| matches!(e, NarratorError::Http(err) if err.is_timeout() || err.is_connect()))
            .notify(|err, dur| warn!(error = %err, delay_ms = dur.as_millis(), "retrying narrator call"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{ImpactSummary, Risk};
    use chrono::Utc;

    #[test]
    fn prompt_includes_risk_and_summary() {
        let result = SimulationResult {
            flows: vec![],
            impact: ImpactSummary { affected_pods: 2, blocked_connections: 1, affected_services: 0, critical_paths: vec!["pod/ns/database-0".to_string()] },
            recommendations: vec![],
            summary: "test summary".to_string(),
            narrative: None,
            risk: Risk::Critical,
            timestamp: Utc::now(),
        };
        let prompt = HttpNarrator::prompt_for(&result);
        assert!(prompt.contains("test summary"));
        assert!(prompt.contains("Critical"));
        assert!(prompt.contains("database-0"));
    }
}
