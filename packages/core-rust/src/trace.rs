//! W3C trace-context `traceparent` values.
//!
//! Parent/child linkage between message spans travels as data in message
//! headers rather than through ambient span state.

use std::fmt;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;

static TRACEPARENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{2})-([0-9a-f]{32})-([0-9a-f]{16})-([0-9a-f]{2})$")
        .expect("valid traceparent regex")
});

const SAMPLED_FLAG: u8 = 0x01;

/// A parsed `traceparent` header value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceParent {
    trace_id: String,
    span_id: String,
    flags: u8,
}

impl TraceParent {
    /// Parses a `traceparent` header.
    ///
    /// Returns `None` for malformed values, the forbidden version `ff`, and
    /// all-zero trace or span ids. Surrounding whitespace is ignored.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let normalized = header.trim().to_ascii_lowercase();
        let caps = TRACEPARENT_RE.captures(&normalized)?;
        let version = &caps[1];
        let trace_id = &caps[2];
        let span_id = &caps[3];
        if version == "ff" || is_all_zero(trace_id) || is_all_zero(span_id) {
            return None;
        }
        let flags = u8::from_str_radix(&caps[4], 16).ok()?;
        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            flags,
        })
    }

    /// Starts a new sampled trace with random ids.
    #[must_use]
    pub fn new_root() -> Self {
        let mut rng = rand::rng();
        let trace_id: u128 = rng.random_range(1..=u128::MAX);
        Self {
            trace_id: format!("{trace_id:032x}"),
            span_id: random_span_id(&mut rng),
            flags: SAMPLED_FLAG,
        }
    }

    /// A new span in the same trace, inheriting the flags.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: random_span_id(&mut rand::rng()),
            flags: self.flags,
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    #[must_use]
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.flags & SAMPLED_FLAG != 0
    }

    /// Renders the header value (always version `00`).
    #[must_use]
    pub fn to_header(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }
}

fn random_span_id(rng: &mut impl Rng) -> String {
    let span_id: u64 = rng.random_range(1..=u64::MAX);
    format!("{span_id:016x}")
}

fn is_all_zero(hex: &str) -> bool {
    hex.bytes().all(|b| b == b'0')
}
