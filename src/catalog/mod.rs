//! Resource availability lookups against the remote catalog service.
//!
//! Every lookup ends in an [`Availability`]: either the snapshot the catalog
//! reported, or `Unavailable` with the reason the catalog could not be
//! consulted. There is no "no answer" value that could be mistaken for
//! "no constraints".

mod http;

pub use http::HttpCatalog;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::MAX_UNAVAILABLE_WINDOWS;
use crate::model::{Ms, Span};

/// Why a catalog lookup produced no usable snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    NotFound,
    Timeout,
    Status(u16),
    Transport(String),
    Malformed(String),
}

impl LookupFailure {
    pub fn label(&self) -> &'static str {
        match self {
            LookupFailure::NotFound => "not_found",
            LookupFailure::Timeout => "timeout",
            LookupFailure::Status(_) => "status",
            LookupFailure::Transport(_) => "transport",
            LookupFailure::Malformed(_) => "malformed",
        }
    }
}

impl std::fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupFailure::NotFound => write!(f, "resource not found in catalog"),
            LookupFailure::Timeout => write!(f, "catalog timed out"),
            LookupFailure::Status(code) => write!(f, "catalog responded with status {code}"),
            LookupFailure::Transport(e) => write!(f, "catalog unreachable: {e}"),
            LookupFailure::Malformed(e) => write!(f, "malformed catalog response: {e}"),
        }
    }
}

impl std::error::Error for LookupFailure {}

/// Catalog view of a resource, as served by `GET /api/resources/{id}`.
/// Display fields like price and duration are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResource {
    #[serde(default)]
    pub name: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub unavailable_periods: Option<Vec<UnavailablePeriod>>,
}

/// Catalog timestamps are zone-less; they are read as UTC.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnavailablePeriod {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

impl UnavailablePeriod {
    fn to_span(&self) -> Option<Span> {
        let start: Ms = self.start_time.and_utc().timestamp_millis();
        let end: Ms = self.end_time.and_utc().timestamp_millis();
        Span::try_new(start, end)
    }
}

impl CatalogResource {
    /// Validated snapshot. A window with `end <= start` makes the whole
    /// response unusable rather than being skipped.
    pub fn into_snapshot(self) -> Result<ResourceSnapshot, LookupFailure> {
        let periods = self.unavailable_periods.unwrap_or_default();
        if periods.len() > MAX_UNAVAILABLE_WINDOWS {
            return Err(LookupFailure::Malformed("too many unavailable periods".into()));
        }
        let unavailable_windows = periods
            .iter()
            .map(|p| {
                p.to_span().ok_or_else(|| {
                    LookupFailure::Malformed(format!(
                        "unavailable period {} .. {} is empty or inverted",
                        p.start_time, p.end_time
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResourceSnapshot {
            active: self.active,
            unavailable_windows,
        })
    }

    fn into_snapshot_logged(self) -> Result<ResourceSnapshot, LookupFailure> {
        debug!(
            "catalog resource {:?}: active={}, {} unavailable periods",
            self.name,
            self.active,
            self.unavailable_periods.as_ref().map_or(0, Vec::len)
        );
        self.into_snapshot()
    }
}

/// What the catalog said about a resource at lookup time. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub active: bool,
    pub unavailable_windows: Vec<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Snapshot(ResourceSnapshot),
    Unavailable(LookupFailure),
}

/// Anything that can answer "what does the catalog say about this resource".
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn get_resource(&self, resource_id: Ulid) -> Result<CatalogResource, LookupFailure>;
}

/// Single-attempt, time-bounded snapshot fetcher. No retries, no caching.
#[derive(Clone)]
pub struct AvailabilityClient {
    source: Arc<dyn CatalogSource>,
    timeout: Duration,
}

impl AvailabilityClient {
    pub fn new(source: Arc<dyn CatalogSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub async fn fetch_snapshot(&self, resource_id: Ulid) -> Availability {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.source.get_resource(resource_id))
            .await
        {
            Err(_) => Err(LookupFailure::Timeout),
            Ok(result) => result.and_then(CatalogResource::into_snapshot_logged),
        };
        metrics::histogram!(crate::observability::CATALOG_LOOKUP_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(snapshot) => Availability::Snapshot(snapshot),
            Err(cause) => {
                warn!("catalog lookup for {resource_id} failed: {cause}");
                metrics::counter!(
                    crate::observability::CATALOG_LOOKUP_FAILURES_TOTAL,
                    "cause" => cause.label()
                )
                .increment(1);
                Availability::Unavailable(cause)
            }
        }
    }
}
