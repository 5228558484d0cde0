//! Cache entry types
//!
//! This module defines the structures stored per request URL:
//! - `CacheEntry`: HTTP response metadata plus a tracked, content-addressed body file
//! - `EntryDraft`: what callers hand to `put`/`update` before the body is normalized
//! - `StatusLine` and `Header`: the textual forms persisted in the index

use super::error::StorageError;
use super::resource::BodyResource;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use http::{StatusCode, Version};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// IMF-fixdate, the preferred HTTP-date form (RFC 9110 §5.6.7)
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Render a timestamp as an HTTP-date
pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP-date.
///
/// Accepts IMF-fixdate and falls back to RFC 2822 parsing so that origin
/// servers using numeric zones are still understood.
pub fn parse_http_date(value: &str) -> Result<DateTime<Utc>, StorageError> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc2822(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidDate(value.to_string()))
}

/// HTTP status line: protocol version, status code and reason phrase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
}

impl StatusLine {
    /// Status line with the canonical reason phrase for `status`
    pub fn new(version: Version, status: StatusCode) -> Self {
        Self {
            version,
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        }
    }
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn parse_version(token: &str) -> Option<Version> {
    match token {
        "HTTP/0.9" => Some(Version::HTTP_09),
        "HTTP/1.0" => Some(Version::HTTP_10),
        "HTTP/1.1" => Some(Version::HTTP_11),
        "HTTP/2" | "HTTP/2.0" => Some(Version::HTTP_2),
        "HTTP/3" | "HTTP/3.0" => Some(Version::HTTP_3),
        _ => None,
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            version_str(self.version),
            self.status.as_u16(),
            self.reason
        )
    }
}

impl FromStr for StatusLine {
    type Err = StorageError;

    /// `HTTP-version SP status-code SP [ reason-phrase ]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidStatusLine(s.to_string());
        let mut parts = s.splitn(3, ' ');

        let version = parts.next().and_then(parse_version).ok_or_else(invalid)?;
        let code = parts.next().ok_or_else(invalid)?;
        if code.len() != 3 {
            return Err(invalid());
        }
        let status = code
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(invalid)?;
        let reason = parts.next().unwrap_or_default().trim_end().to_string();

        Ok(Self {
            version,
            status,
            reason,
        })
    }
}

/// A single response header as returned by the origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

impl FromStr for Header {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = s
            .split_once(':')
            .ok_or_else(|| StorageError::InvalidHeader(s.to_string()))?;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(StorageError::InvalidHeader(s.to_string()));
        }
        Ok(Self::new(name, value.trim()))
    }
}

/// Body of a draft entry, normalized into a content-addressed file on store
pub enum EntryBody {
    /// Bytes already held in memory
    Bytes(Bytes),
    /// A reader drained to completion during normalization
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// A body file the storage already tracks (kept as is)
    Resource(Arc<BodyResource>),
}

impl fmt::Debug for EntryBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            EntryBody::Reader(_) => f.write_str("Reader"),
            EntryBody::Resource(resource) => {
                f.debug_tuple("Resource").field(&resource.path()).finish()
            }
        }
    }
}

impl From<Bytes> for EntryBody {
    fn from(bytes: Bytes) -> Self {
        EntryBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for EntryBody {
    fn from(bytes: Vec<u8>) -> Self {
        EntryBody::Bytes(Bytes::from(bytes))
    }
}

impl From<Arc<BodyResource>> for EntryBody {
    fn from(resource: Arc<BodyResource>) -> Self {
        EntryBody::Resource(resource)
    }
}

/// Entry as supplied to `put`/`update`, before its body is stored
#[derive(Debug)]
pub struct EntryDraft {
    pub request_date: DateTime<Utc>,
    pub response_date: DateTime<Utc>,
    pub status_line: StatusLine,
    pub headers: Vec<Header>,
    pub body: EntryBody,
    pub variant_map: BTreeMap<String, String>,
}

impl EntryDraft {
    /// Draft dated now with no headers and no variants
    pub fn new(status_line: StatusLine, body: impl Into<EntryBody>) -> Self {
        let now = Utc::now();
        Self {
            request_date: now,
            response_date: now,
            status_line,
            headers: Vec::new(),
            body: body.into(),
            variant_map: BTreeMap::new(),
        }
    }

    pub fn with_dates(mut self, request_date: DateTime<Utc>, response_date: DateTime<Utc>) -> Self {
        self.request_date = request_date;
        self.response_date = response_date;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_variant(mut self, dimension: impl Into<String>, value: impl Into<String>) -> Self {
        self.variant_map.insert(dimension.into(), value.into());
        self
    }
}

/// One cached response, keyed by request URL
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub url: String,
    pub request_date: DateTime<Utc>,
    pub response_date: DateTime<Utc>,
    pub status_line: StatusLine,
    pub headers: Vec<Header>,
    /// Content-addressed body file; holding the entry keeps the file alive
    pub resource: Arc<BodyResource>,
    pub variant_map: BTreeMap<String, String>,
}

impl CacheEntry {
    /// First value of the named header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    /// All values of the named header, in origin order
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.is(name))
            .map(|h| h.value.as_str())
    }

    pub fn status(&self) -> StatusCode {
        self.status_line.status
    }

    pub fn body_path(&self) -> &Path {
        self.resource.path()
    }

    /// Whether both entries share the same tracked body handle
    pub fn shares_resource_with(&self, other: &CacheEntry) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }

    /// Draft that reproduces this entry, keeping its body resource
    pub fn to_draft(&self) -> EntryDraft {
        EntryDraft {
            request_date: self.request_date,
            response_date: self.response_date,
            status_line: self.status_line.clone(),
            headers: self.headers.clone(),
            body: EntryBody::Resource(Arc::clone(&self.resource)),
            variant_map: self.variant_map.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("HTTP/1.1 200 OK", Version::HTTP_11, 200, "OK")]
    #[case("HTTP/1.0 404 Not Found", Version::HTTP_10, 404, "Not Found")]
    #[case("HTTP/2.0 304 Not Modified", Version::HTTP_2, 304, "Not Modified")]
    #[case("HTTP/2 200 OK", Version::HTTP_2, 200, "OK")]
    #[case("HTTP/1.1 203 ", Version::HTTP_11, 203, "")]
    #[case("HTTP/1.1 500", Version::HTTP_11, 500, "")]
    fn test_status_line_parses(
        #[case] line: &str,
        #[case] version: Version,
        #[case] code: u16,
        #[case] reason: &str,
    ) {
        let parsed: StatusLine = line.parse().unwrap();
        assert_eq!(parsed.version, version);
        assert_eq!(parsed.status.as_u16(), code);
        assert_eq!(parsed.reason, reason);
    }

    #[rstest]
    #[case("")]
    #[case("HTTP/1.1")]
    #[case("HTTP/1.1 2000 OK")]
    #[case("HTTP/1.1 abc OK")]
    #[case("SPDY/3 200 OK")]
    fn test_status_line_rejects_malformed(#[case] line: &str) {
        assert!(matches!(
            line.parse::<StatusLine>(),
            Err(StorageError::InvalidStatusLine(_))
        ));
    }

    #[test]
    fn test_status_line_render_parse_is_stable() {
        let line = StatusLine::new(Version::HTTP_11, StatusCode::OK);
        assert_eq!(line.to_string(), "HTTP/1.1 200 OK");
        assert_eq!(line.to_string().parse::<StatusLine>().unwrap(), line);

        let h2 = StatusLine::new(Version::HTTP_2, StatusCode::GONE);
        assert_eq!(h2.to_string().parse::<StatusLine>().unwrap(), h2);
    }

    #[test]
    fn test_header_parses_and_trims_value() {
        let header: Header = "Content-Type:   image/png ".parse().unwrap();
        assert_eq!(header.name, "Content-Type");
        assert_eq!(header.value, "image/png");
        assert_eq!(header.to_string(), "Content-Type: image/png");
    }

    #[test]
    fn test_header_value_may_contain_colons() {
        let header: Header = "Location: http://a/b".parse().unwrap();
        assert_eq!(header.value, "http://a/b");
    }

    #[test]
    fn test_header_rejects_missing_name() {
        assert!("no colon here".parse::<Header>().is_err());
        assert!(": value".parse::<Header>().is_err());
        assert!("Bad Name: value".parse::<Header>().is_err());
    }

    #[test]
    fn test_http_date_round_trip() {
        let date = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        let text = format_http_date(&date);
        assert_eq!(text, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&text).unwrap(), date);
    }

    #[test]
    fn test_http_date_accepts_numeric_zone() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 09:49:37 +0100").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap());
    }

    #[test]
    fn test_http_date_rejects_garbage() {
        assert!(matches!(
            parse_http_date("0"),
            Err(StorageError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_draft_builder_collects_headers_and_variants() {
        let draft = EntryDraft::new(
            StatusLine::new(Version::HTTP_11, StatusCode::OK),
            vec![1u8, 2, 3],
        )
        .with_header("ETag", "\"abc\"")
        .with_variant("accept", "image/png");

        assert_eq!(draft.headers, vec![Header::new("ETag", "\"abc\"")]);
        assert_eq!(draft.variant_map.get("accept").map(String::as_str), Some("image/png"));
        assert!(matches!(draft.body, EntryBody::Bytes(ref b) if b.len() == 3));
    }
}
