//! HTTP API for pvlit-wf
//!
//! Thin adapters over the allocation engine and ingestion pipeline. Identity
//! comes from headers (`X-Organization-Id`, `X-Reviewer-Id`); authentication
//! itself is handled upstream.

mod allocation;
mod health;
mod ingest;
mod sse;

pub use allocation::allocation_routes;
pub use health::health_routes;
pub use ingest::ingest_routes;
pub use sse::job_event_stream;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::Track;

pub(crate) const ORGANIZATION_HEADER: &str = "x-organization-id";
pub(crate) const REVIEWER_HEADER: &str = "x-reviewer-id";

fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Uuid, ApiError> {
    let raw = headers
        .get(name)
        .ok_or_else(|| ApiError::BadRequest(format!("Missing header: {}", name)))?
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("Invalid header value: {}", name)))?;
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::BadRequest(format!("Header {} is not a UUID: {}", name, raw)))
}

/// Organization (partition) scope for the request
pub(crate) fn organization_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    header_uuid(headers, ORGANIZATION_HEADER)
}

/// Acting reviewer for the request
pub(crate) fn reviewer_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    header_uuid(headers, REVIEWER_HEADER)
}

/// Parse the `:track` path segment
pub(crate) fn parse_track(raw: &str) -> Result<Track, ApiError> {
    Track::from_db_str(raw)
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}
