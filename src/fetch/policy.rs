//! Per-request cache policy

use crate::constants::OFFLINE_MAX_STALE_SECS;

/// How much a fetch may rely on the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Revalidate with the origin before trusting any cached copy
    Online,
    /// Serve only from cache, however stale; never touch the network
    Offline,
}

impl FetchPolicy {
    pub fn from_trust_network(trust_network: bool) -> Self {
        if trust_network {
            FetchPolicy::Online
        } else {
            FetchPolicy::Offline
        }
    }

    /// `Cache-Control` request header value for this policy
    pub fn cache_control(&self) -> String {
        match self {
            FetchPolicy::Online => "no-cache".to_string(),
            FetchPolicy::Offline => format!("max-stale={}, only-if-cached", OFFLINE_MAX_STALE_SECS),
        }
    }
}
