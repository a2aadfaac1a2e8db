//! Distinguished-name and subject-alternative-name string codecs
//!
//! The CLI surface accepts a narrow, comma-separated `TYPE=VALUE` subset of
//! RFC 4514 (no escapes, no multi-valued RDNs, no hex encoding) and SAN
//! lists of `DNS:` and `IP:` entries. Parsing and formatting are pure; all
//! I/O stays in the store.

use std::fmt;
use std::net::IpAddr;

use x509_parser::x509::X509Name;

/// Errors from the name codecs
///
/// These belong to the usage band: the facade reports them and exits
/// without touching the engine, so the message text stays terse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// Subject DN string did not parse
    InvalidSubject,
    /// SAN list entry did not parse
    InvalidSan,
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameError::InvalidSubject => write!(f, "invalid subject"),
            NameError::InvalidSan => write!(f, "invalid SAN"),
        }
    }
}

impl std::error::Error for NameError {}

/// Structured distinguished name over the recognized attribute types
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectName {
    /// CN components
    pub common_name: Vec<String>,
    /// O components
    pub organization: Vec<String>,
    /// OU components
    pub organizational_unit: Vec<String>,
    /// L components
    pub locality: Vec<String>,
    /// ST components
    pub state: Vec<String>,
    /// C components
    pub country: Vec<String>,
}

impl SubjectName {
    /// Parse a `TYPE=VALUE,TYPE=VALUE` subject string.
    ///
    /// Types are matched case-insensitively; whitespace around components,
    /// types and values is trimmed. Empty input, a component without `=`,
    /// an empty value, or an unrecognized type all fail.
    pub fn parse(input: &str) -> Result<Self, NameError> {
        if input.trim().is_empty() {
            return Err(NameError::InvalidSubject);
        }
        let mut name = SubjectName::default();
        for component in input.split(',') {
            let component = component.trim();
            let (attr, value) = component
                .split_once('=')
                .ok_or(NameError::InvalidSubject)?;
            let value = value.trim();
            if value.is_empty() {
                return Err(NameError::InvalidSubject);
            }
            match attr.trim().to_ascii_uppercase().as_str() {
                "CN" => name.common_name.push(value.to_string()),
                "O" => name.organization.push(value.to_string()),
                "OU" => name.organizational_unit.push(value.to_string()),
                "L" => name.locality.push(value.to_string()),
                "ST" => name.state.push(value.to_string()),
                "C" => name.country.push(value.to_string()),
                _ => return Err(NameError::InvalidSubject),
            }
        }
        Ok(name)
    }

    /// Format in the deterministic CN, O, OU, L, ST, C order.
    ///
    /// Empty fields are skipped; components are joined by `,` with no
    /// spaces, so formatting is stable across runs.
    pub fn format(&self) -> String {
        let mut parts = Vec::new();
        for cn in &self.common_name {
            parts.push(format!("CN={cn}"));
        }
        for o in &self.organization {
            parts.push(format!("O={o}"));
        }
        for ou in &self.organizational_unit {
            parts.push(format!("OU={ou}"));
        }
        for l in &self.locality {
            parts.push(format!("L={l}"));
        }
        for st in &self.state {
            parts.push(format!("ST={st}"));
        }
        for c in &self.country {
            parts.push(format!("C={c}"));
        }
        parts.join(",")
    }

    /// Extract the recognized attributes from a parsed X.509 name.
    pub fn from_x509_name(x509_name: &X509Name<'_>) -> Self {
        fn collect<'a, 'b: 'a>(
            iter: impl Iterator<Item = &'a x509_parser::x509::AttributeTypeAndValue<'b>>,
        ) -> Vec<String> {
            iter.filter_map(|attr| attr.as_str().ok().map(str::to_string))
                .collect()
        }
        SubjectName {
            common_name: collect(x509_name.iter_common_name()),
            organization: collect(x509_name.iter_organization()),
            organizational_unit: collect(x509_name.iter_organizational_unit()),
            locality: collect(x509_name.iter_locality()),
            state: collect(x509_name.iter_state_or_province()),
            country: collect(x509_name.iter_country()),
        }
    }
}

/// Parsed subject-alternative-name list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanList {
    /// DNS name entries
    pub dns: Vec<String>,
    /// IP address entries
    pub ips: Vec<IpAddr>,
}

impl SanList {
    /// Parse a `DNS:name,IP:addr` list. The empty string yields empty lists.
    pub fn parse(input: &str) -> Result<Self, NameError> {
        let mut san = SanList::default();
        if input.trim().is_empty() {
            return Ok(san);
        }
        for entry in input.split(',') {
            let entry = entry.trim();
            if let Some(dns) = entry.strip_prefix("DNS:") {
                let dns = dns.trim();
                if dns.is_empty() {
                    return Err(NameError::InvalidSan);
                }
                san.dns.push(dns.to_string());
            } else if let Some(ip) = entry.strip_prefix("IP:") {
                let addr: IpAddr = ip.trim().parse().map_err(|_| NameError::InvalidSan)?;
                san.ips.push(addr);
            } else {
                return Err(NameError::InvalidSan);
            }
        }
        Ok(san)
    }

    /// True when the list carries no entries at all.
    pub fn is_empty(&self) -> bool {
        self.dns.is_empty() && self.ips.is_empty()
    }
}
