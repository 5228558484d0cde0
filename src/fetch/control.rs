//! Cache-Control header parsing (RFC 9111 §5.2).
//!
//! Used on both sides of a fetch:
//! - request directives (`only-if-cached`, `max-stale`, `no-cache`) decide
//!   whether the cache may answer without the origin
//! - response directives (`no-store`, `max-age`, `must-revalidate`) decide
//!   whether and for how long a response may be reused
//!
//! This is a private (single-consumer) cache, so `private` responses are
//! storable and `s-maxage` is ignored.
//!
//! # Example
//!
//! ```rust
//! use imgcache::fetch::CacheControl;
//!
//! let cc = CacheControl::parse("max-age=3600, must-revalidate");
//! assert_eq!(cc.max_age, Some(std::time::Duration::from_secs(3600)));
//! assert!(cc.must_revalidate);
//! assert!(cc.is_storable());
//! ```

use std::time::Duration;

/// Parsed Cache-Control header directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// Freshness lifetime (max-age directive)
    pub max_age: Option<Duration>,

    /// Acceptable staleness (max-stale directive, requests only).
    /// A bare `max-stale` accepts any staleness and is stored as `Duration::MAX`.
    pub max_stale: Option<Duration>,

    /// Response must not be stored (no-store directive)
    pub no_store: bool,

    /// Stored responses must be revalidated before use (no-cache directive)
    pub no_cache: bool,

    /// Only a stored response may satisfy the request (only-if-cached directive)
    pub only_if_cached: bool,

    /// Stale responses must be revalidated before use (must-revalidate directive)
    pub must_revalidate: bool,

    /// Content never changes while fresh (immutable directive)
    pub immutable: bool,
}

impl CacheControl {
    /// Parse a Cache-Control header value into structured directives.
    ///
    /// Handles comma-separated directives, with optional values for directives
    /// like `max-age=3600`. Unknown directives are ignored.
    pub fn parse(header_value: &str) -> Self {
        let mut result = Self::default();
        result.merge(header_value);
        result
    }

    /// Parse every value of a repeated Cache-Control header
    pub fn parse_all<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut result = Self::default();
        for value in values {
            result.merge(value);
        }
        result
    }

    fn merge(&mut self, header_value: &str) {
        for directive in header_value.split(',') {
            let directive = directive.trim().to_lowercase();
            if directive.is_empty() {
                continue;
            }

            if let Some((name, value)) = directive.split_once('=') {
                let value = value.trim().trim_matches('"');
                let seconds = value.parse::<u64>().ok().map(Duration::from_secs);

                match name.trim() {
                    "max-age" => {
                        if seconds.is_some() {
                            self.max_age = seconds;
                        }
                    }
                    "max-stale" => {
                        if seconds.is_some() {
                            self.max_stale = seconds;
                        }
                    }
                    _ => {
                        // Unknown directive with value, ignore
                    }
                }
            } else {
                match directive.as_str() {
                    "no-store" => self.no_store = true,
                    "no-cache" => self.no_cache = true,
                    "only-if-cached" => self.only_if_cached = true,
                    "must-revalidate" => self.must_revalidate = true,
                    "immutable" => self.immutable = true,
                    "max-stale" => self.max_stale = Some(Duration::MAX),
                    _ => {
                        // Unknown directive, ignore
                    }
                }
            }
        }
    }

    /// Whether a response carrying these directives may be stored
    pub fn is_storable(&self) -> bool {
        !self.no_store
    }

    /// Whether a stored response must be revalidated before use regardless of age
    pub fn requires_revalidation(&self) -> bool {
        self.no_cache
    }

    /// How far past its freshness lifetime a response may be served.
    ///
    /// `must-revalidate` on the response overrides any request `max-stale`.
    pub fn stale_allowance(&self, response: &CacheControl) -> Duration {
        if response.must_revalidate {
            return Duration::ZERO;
        }
        self.max_stale.unwrap_or(Duration::ZERO)
    }
}
