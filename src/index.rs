//! Certificate index records and revocation reasons
//!
//! `index.json` is a JSON array of seven-string-field records, one per
//! issued end-entity certificate. The root certificate never appears in it.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CaError, Result};

/// Lifecycle state of an issued certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    /// Issued and not revoked
    Active,
    /// Revoked; the transition is one-way
    Revoked,
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertStatus::Active => write!(f, "active"),
            CertStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// One issued certificate as recorded in `index.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexEntry {
    /// Lowercase hex serial, zero-padded to at least two digits
    pub serial: String,
    /// Subject DN in canonical CN,O,OU,L,ST,C form
    pub subject: String,
    /// RFC 3339 UTC start of validity
    pub not_before: String,
    /// RFC 3339 UTC end of validity
    pub not_after: String,
    /// Current lifecycle state
    pub status: CertStatus,
    /// RFC 3339 UTC instant of revocation, empty while active
    pub revoked_at: String,
    /// Recognized reason name, empty while active
    pub revocation_reason: String,
}

/// Recognized revocation reasons (RFC 5280 §5.3.1 subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// Code 0
    Unspecified,
    /// Code 1
    KeyCompromise,
    /// Code 3
    AffiliationChanged,
    /// Code 4
    Superseded,
    /// Code 5
    CessationOfOperation,
}

impl RevocationReason {
    /// All recognized reasons, in code order.
    pub const ALL: [RevocationReason; 5] = [
        RevocationReason::Unspecified,
        RevocationReason::KeyCompromise,
        RevocationReason::AffiliationChanged,
        RevocationReason::Superseded,
        RevocationReason::CessationOfOperation,
    ];

    /// The reason name as stored in the index and accepted on the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "keyCompromise",
            RevocationReason::AffiliationChanged => "affiliationChanged",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessationOfOperation",
        }
    }

    /// RFC 5280 CRLReason code.
    pub fn code(&self) -> u8 {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
        }
    }

    /// Map an RFC 5280 code back to a recognized reason.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.code() == code)
    }

    /// The rcgen counterpart used when building CRL entries.
    pub fn to_rcgen(self) -> rcgen::RevocationReason {
        match self {
            RevocationReason::Unspecified => rcgen::RevocationReason::Unspecified,
            RevocationReason::KeyCompromise => rcgen::RevocationReason::KeyCompromise,
            RevocationReason::AffiliationChanged => rcgen::RevocationReason::AffiliationChanged,
            RevocationReason::Superseded => rcgen::RevocationReason::Superseded,
            RevocationReason::CessationOfOperation => {
                rcgen::RevocationReason::CessationOfOperation
            }
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| format!("unknown revocation reason {s:?}"))
    }
}

/// Format a UTC instant as RFC 3339 with second precision and `Z` suffix.
pub fn format_utc(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 UTC timestamp from the index.
///
/// Offsets other than `Z` are rejected: a hand-edited index with a local
/// offset would silently shift CRL entry times otherwise.
pub fn parse_utc(value: &str) -> Result<DateTime<Utc>> {
    if !value.ends_with('Z') {
        return Err(CaError::Storage(format!(
            "timestamp {value:?} is not UTC (expected trailing Z)"
        )));
    }
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|e| CaError::Storage(format!("invalid timestamp {value:?}: {e}")))?;
    Ok(parsed.with_timezone(&Utc))
}

/// UTC instant truncated to whole seconds, the resolution of both the
/// X.509 time types and the index timestamps.
pub fn now_utc_secs() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_opt(now.timestamp(), 0).unwrap()
}
