//! Scrape failure taxonomy

use std::time::Duration;
use thiserror::Error;

/// Why a node (or the node list) could not be scraped
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The proxied request to the node failed or returned a non-2xx status
    #[error("Error querying /stats/summary for {node}: {source}")]
    Transport {
        node: String,
        #[source]
        source: kube::Error,
    },

    /// The node answered with something that is not a summary document
    #[error("Error unmarshaling /stats/summary response for {node}: {source}")]
    Deserialization {
        node: String,
        #[source]
        source: serde_json::Error,
    },

    /// The cluster node list could not be retrieved
    #[error("Error listing cluster nodes: {source}")]
    Enumeration {
        #[source]
        source: kube::Error,
    },

    /// The request deadline passed before the call completed
    #[error("Timed out after {after:?} waiting for {target}")]
    Timeout { target: String, after: Duration },

    /// The per-request registry could not be built or encoded
    #[error("Error building metrics exposition: {0}")]
    Exposition(#[from] prometheus::Error),
}

impl ScrapeError {
    /// Stable identifier used as a log field and metric label
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Transport { .. } => "transport",
            ScrapeError::Deserialization { .. } => "deserialization",
            ScrapeError::Enumeration { .. } => "enumeration",
            ScrapeError::Timeout { .. } => "timeout",
            ScrapeError::Exposition(_) => "exposition",
        }
    }

    /// The node this failure belongs to, if it is node-specific
    pub fn node(&self) -> Option<&str> {
        match self {
            ScrapeError::Transport { node, .. } | ScrapeError::Deserialization { node, .. } => {
                Some(node.as_str())
            }
            ScrapeError::Timeout { target, .. } if target != NODE_LIST_TARGET => {
                Some(target.as_str())
            }
            _ => None,
        }
    }
}

/// Timeout target used for the node enumeration call
pub const NODE_LIST_TARGET: &str = "node list";
