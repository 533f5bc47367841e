//! HTTP classification endpoint client

use async_trait::async_trait;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

use super::{ClassificationOutcome, ClassifyEndpoint, EndpointError};

const USER_AGENT: &str = "PVLIT/0.1.0 (literature triage)";
const DEFAULT_REQUESTS_PER_SECOND: u32 = 2;

/// Static configuration for one remote endpoint
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    /// Outbound request pacing; endpoints rate-limit aggressively
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
}

fn default_rps() -> u32 {
    DEFAULT_REQUESTS_PER_SECOND
}

/// Wire format of the classification response
#[derive(Debug, Clone, Deserialize)]
struct RemoteClassification {
    #[serde(default)]
    label: String,
    #[serde(default)]
    confirmed: bool,
    #[serde(rename = "secondaryLabel")]
    secondary_label: Option<String>,
}

/// reqwest-backed classification endpoint
pub struct HttpClassifyEndpoint {
    name: String,
    url: String,
    http_client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpClassifyEndpoint {
    pub fn new(config: &EndpointConfig) -> Result<Self, EndpointError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| EndpointError::Network(e.to_string()))?;

        let rps = NonZeroU32::new(config.requests_per_second.max(1))
            .unwrap_or(NonZeroU32::new(DEFAULT_REQUESTS_PER_SECOND).unwrap());
        let quota = governor::Quota::per_second(rps);

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            http_client,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    async fn request(
        &self,
        external_id: &str,
        sponsor_hint: Option<&str>,
        subject_name: Option<&str>,
    ) -> Result<(RemoteClassification, serde_json::Value), EndpointError> {
        let mut params: Vec<(&str, &str)> = vec![("articleId", external_id)];
        if let Some(hint) = sponsor_hint {
            params.push(("sponsor", hint));
        }
        if let Some(subject) = subject_name {
            params.push(("subject", subject));
        }

        let response = self
            .http_client
            .get(&self.url)
            .query(&params)
            .send()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EndpointError::Api(status.as_u16(), error_text));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EndpointError::Parse(e.to_string()))?;

        let parsed: RemoteClassification = serde_json::from_value(raw.clone())
            .map_err(|e| EndpointError::Parse(e.to_string()))?;

        Ok((parsed, raw))
    }
}

#[async_trait]
impl ClassifyEndpoint for HttpClassifyEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    /// Classify one record.
    ///
    /// Some deployed endpoints are case-sensitive on the sponsor query
    /// parameter (a documented upstream quirk): an empty classification with
    /// a sponsor hint present is retried once with the hint uppercased before
    /// giving up.
    async fn classify(
        &self,
        external_id: &str,
        sponsor_hint: Option<&str>,
        subject_name: Option<&str>,
    ) -> Result<ClassificationOutcome, EndpointError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(
            endpoint = %self.name,
            external_id = external_id,
            "Querying classification endpoint"
        );

        let (mut parsed, mut raw) = self
            .request(external_id, sponsor_hint, subject_name)
            .await?;

        if parsed.label.is_empty() {
            if let Some(hint) = sponsor_hint {
                let upper = hint.to_uppercase();
                if upper != hint {
                    tracing::debug!(
                        endpoint = %self.name,
                        external_id = external_id,
                        "Empty classification, retrying with uppercased sponsor hint"
                    );
                    self.rate_limiter.until_ready().await;
                    (parsed, raw) = self
                        .request(external_id, Some(&upper), subject_name)
                        .await?;
                }
            }
        }

        if parsed.label.is_empty() && !parsed.confirmed {
            return Err(EndpointError::EmptyClassification);
        }

        tracing::debug!(
            endpoint = %self.name,
            external_id = external_id,
            label = %parsed.label,
            confirmed = parsed.confirmed,
            "Classification received"
        );

        Ok(ClassificationOutcome {
            label: parsed.label,
            confirmed_flag: parsed.confirmed,
            secondary_label: parsed.secondary_label,
            raw_payload: raw,
        })
    }
}
