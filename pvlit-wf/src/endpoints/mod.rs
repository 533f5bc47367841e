//! Classification endpoint pool
//!
//! A fixed set of remote inference endpoints, each independently slow,
//! occasionally erroring, and sometimes unavailable. The pipeline drives them
//! through the health-tracking pool in this module; the HTTP client itself
//! lives in `http`.

mod health;
mod http;

pub use health::{EndpointHealthSnapshot, EndpointLease, EndpointPool};
pub use http::{EndpointConfig, HttpClassifyEndpoint};

use async_trait::async_trait;
use thiserror::Error;

/// Result of one classification call
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    /// Raw upstream classification string
    pub label: String,
    /// Confirmation hint, independent of the label
    pub confirmed_flag: bool,
    pub secondary_label: Option<String>,
    /// Full upstream response, kept for audit
    pub raw_payload: serde_json::Value,
}

/// Classification endpoint errors
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Endpoint returned no classification")]
    EmptyClassification,
}

/// One remote classification endpoint
#[async_trait]
pub trait ClassifyEndpoint: Send + Sync {
    /// Stable name used in health reporting and logs
    fn name(&self) -> &str;

    /// Classify one literature record
    async fn classify(
        &self,
        external_id: &str,
        sponsor_hint: Option<&str>,
        subject_name: Option<&str>,
    ) -> Result<ClassificationOutcome, EndpointError>;
}
