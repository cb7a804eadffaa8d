//! Request deadlines
//!
//! One deadline is derived per inbound request from the Prometheus scrape
//! timeout header and shared unchanged by every upstream call the request
//! makes. Without a usable header there is no deadline and calls are
//! bounded only by the inbound connection.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Header Prometheus sets to the scrape timeout in (fractional) seconds
pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

/// How an unparseable timeout header is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutHeaderPolicy {
    /// Ignore it and run without a deadline
    #[default]
    Lenient,
    /// Fail the request
    Strict,
}

/// A timeout header value that is not a positive number of seconds
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Error parsing timeout from {header}={value}: {reason}")]
pub struct InvalidTimeout {
    pub header: &'static str,
    pub value: String,
    pub reason: String,
}

/// Point in time after which outstanding upstream calls are abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Option<Duration>,
}

impl Deadline {
    /// No deadline
    pub fn none() -> Self {
        Self {
            at: None,
            budget: None,
        }
    }

    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
            budget: Some(budget),
        }
    }

    /// Derive a deadline from the raw timeout header value
    pub fn from_header(
        value: Option<&str>,
        policy: TimeoutHeaderPolicy,
    ) -> Result<Self, InvalidTimeout> {
        let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
            return Ok(Self::none());
        };

        match parse_timeout_seconds(value) {
            Ok(budget) => Ok(Self::after(budget)),
            Err(err) => match policy {
                TimeoutHeaderPolicy::Strict => Err(err),
                TimeoutHeaderPolicy::Lenient => {
                    tracing::debug!(error = %err, "Ignoring unparseable scrape timeout");
                    Ok(Self::none())
                }
            },
        }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// The total budget this deadline was created with
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    pub fn is_bounded(&self) -> bool {
        self.at.is_some()
    }

    /// Run `fut` to completion or until the deadline passes
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Duration> {
        match self.at {
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| self.budget.unwrap_or_default()),
            None => Ok(fut.await),
        }
    }
}

fn parse_timeout_seconds(value: &str) -> Result<Duration, InvalidTimeout> {
    let invalid = |reason: String| InvalidTimeout {
        header: SCRAPE_TIMEOUT_HEADER,
        value: value.to_string(),
        reason,
    };

    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseFloatError| invalid(e.to_string()))?;

    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(invalid("timeout must be a positive number of seconds".to_string()));
    }

    Duration::try_from_secs_f64(seconds).map_err(|e| invalid(e.to_string()))
}
