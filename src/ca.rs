//! The CA state engine
//!
//! [`CertificateAuthority`] owns a data directory through a [`CaStore`] and
//! drives the certificate lifecycle over it. Every mutating operation runs
//! in two phases: a validate phase that reads state and may fail freely
//! without having written anything, and a mutate phase that stages all
//! outputs as `.tmp` siblings and then commits them with renames. The
//! rename order per operation is fixed:
//!
//! * init: `serial`, `crlnumber`, `index.json`, `ca.key`, `ca.crt`. The
//!   initialization marker lands last, so a crash mid-commit leaves a
//!   directory that still reads as uninitialized.
//! * sign: `serial`, `certs/<serial>.pem`, `index.json`. The counter
//!   advances first, so a crash can skip a serial but never reuse one.
//! * crl: `ca.crl`, `crlnumber`. A crash can reuse a CRL number but
//!   never publish a stale CRL under a fresh number.
//!
//! Revocation touches only `index.json` and collapses to a single atomic
//! replace. No state is cached across operations; every command re-reads
//! the directory it mutates.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use tracing::info;
use x509_parser::prelude::*;

use crate::error::{CaError, Result};
use crate::index::{format_utc, now_utc_secs, CertStatus, IndexEntry, RevocationReason};
use crate::name::SubjectName;
use crate::store::{self, CaStore, MODE_PRIVATE, MODE_PUBLIC};
use crate::x509::{self, CaSigner, KeyAlgorithm};

/// Result record of a successful init
#[derive(Debug)]
pub struct InitOutcome {
    /// Canonical subject DN
    pub subject: String,
    /// Key algorithm of the new CA key
    pub algorithm: KeyAlgorithm,
    /// Root certificate serial (always `01`)
    pub serial: String,
    /// RFC 3339 end of validity
    pub not_after: String,
    /// Where the root certificate was written
    pub certificate_path: PathBuf,
    /// Where the private key was written
    pub key_path: PathBuf,
}

/// Result record of a successful issuance
#[derive(Debug)]
pub struct SignOutcome {
    /// Serial assigned to the new certificate
    pub serial: String,
    /// Subject DN taken from the CSR
    pub subject: String,
    /// RFC 3339 end of validity
    pub not_after: String,
    /// Where the certificate was written
    pub certificate_path: PathBuf,
}

/// Result record of a successful revocation
#[derive(Debug)]
pub struct RevokeOutcome {
    /// Serial of the revoked certificate
    pub serial: String,
    /// Its subject DN
    pub subject: String,
    /// Recorded reason
    pub reason: RevocationReason,
    /// RFC 3339 instant of revocation
    pub revoked_at: String,
}

/// Result record of a successful CRL generation
#[derive(Debug)]
pub struct CrlOutcome {
    /// CRL number embedded in the published list
    pub crl_number: String,
    /// How many revoked certificates it carries
    pub revoked_entries: usize,
    /// RFC 3339 nextUpdate
    pub next_update: String,
    /// Where the CRL was written
    pub crl_path: PathBuf,
}

/// One row of the certificate listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    /// Certificate serial
    pub serial: String,
    /// Display status: `active`, `revoked` or `expired`
    pub status: String,
    /// Stored RFC 3339 end of validity
    pub not_after: String,
    /// Subject DN
    pub subject: String,
}

/// Revocation portion of a verification report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStatus {
    /// No CRL has been generated yet; not checked, not invalidating
    NotChecked,
    /// The current CRL does not list the certificate
    NotRevoked,
    /// The current CRL lists the certificate
    Revoked {
        /// Recorded reason name
        reason: String,
        /// RFC 3339 revocation instant from the CRL entry
        date: String,
    },
}

impl std::fmt::Display for RevocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevocationStatus::NotChecked => write!(f, "NOT CHECKED (no CRL available)"),
            RevocationStatus::NotRevoked => write!(f, "OK (not revoked)"),
            RevocationStatus::Revoked { reason, date } => {
                write!(f, "REVOKED (reason: {reason}, date: {date})")
            }
        }
    }
}

/// Verification report for one certificate
///
/// When the signature check fails the report stops there: `expiry_ok` and
/// `revocation` stay `None` and are omitted from display.
#[derive(Debug)]
pub struct VerifyReport {
    /// Overall verdict
    pub valid: bool,
    /// Certificate subject DN
    pub subject: String,
    /// Certificate serial, canonical hex
    pub serial: String,
    /// Certificate issuer DN
    pub issuer: String,
    /// RFC 3339 start of validity
    pub not_before: String,
    /// RFC 3339 end of validity
    pub not_after: String,
    /// Signature verifies under the CA public key
    pub signature_ok: bool,
    /// Now is within the validity window (absent if the signature failed)
    pub expiry_ok: Option<bool>,
    /// Revocation check result (absent if the signature failed)
    pub revocation: Option<RevocationStatus>,
}

/// The state engine over one data directory
pub struct CertificateAuthority {
    store: CaStore,
}

impl CertificateAuthority {
    /// Bind to a data directory. No I/O happens until an operation runs.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: CaStore::new(data_dir),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &CaStore {
        &self.store
    }

    fn require_initialized(&self) -> Result<()> {
        if self.store.is_initialized() {
            Ok(())
        } else {
            Err(CaError::NotInitialized)
        }
    }

    fn load_signer(&self) -> Result<CaSigner> {
        let cert_pem = self.store.read_pem(&self.store.cert_path())?;
        let key_pem = self.store.read_pem(&self.store.key_path())?;
        x509::load_signer(&cert_pem, &key_pem)
    }

    /// Initialize a new root CA in the data directory.
    pub fn init(
        &self,
        subject: &SubjectName,
        algorithm: KeyAlgorithm,
        validity_days: u32,
    ) -> Result<InitOutcome> {
        if self.store.is_initialized() {
            return Err(CaError::AlreadyInitialized(
                self.store.root().display().to_string(),
            ));
        }

        let now = now_utc_secs();
        let key = x509::generate_key_pair(algorithm)?;
        let cert = x509::build_root_certificate(subject, &key, validity_days, now)?;
        let created_certs_dir = self.store.init_layout()?;

        let staged = (|| {
            let mut stage = self.store.stage();
            stage.write(
                &self.store.serial_path(),
                &CaStore::counter_bytes(2),
                MODE_PUBLIC,
            )?;
            stage.write(
                &self.store.crl_number_path(),
                &CaStore::counter_bytes(1),
                MODE_PUBLIC,
            )?;
            stage.write(
                &self.store.index_path(),
                &CaStore::index_bytes(&[])?,
                MODE_PUBLIC,
            )?;
            stage.write(
                &self.store.key_path(),
                key.serialize_pem().as_bytes(),
                MODE_PRIVATE,
            )?;
            stage.write(&self.store.cert_path(), cert.pem().as_bytes(), MODE_PUBLIC)?;
            stage.commit()
        })();
        if staged.is_err() && created_certs_dir {
            let _ = fs::remove_dir(self.store.certs_dir());
        }
        staged?;

        info!(dir = %self.store.root().display(), "initialized CA");
        Ok(InitOutcome {
            subject: subject.format(),
            algorithm,
            serial: store::format_serial(1),
            not_after: format_utc(now + Duration::days(i64::from(validity_days))),
            certificate_path: self.store.cert_path(),
            key_path: self.store.key_path(),
        })
    }

    /// Sign a PKCS#10 request file, issuing the next serial.
    pub fn sign(&self, csr_path: &Path, validity_days: u32) -> Result<SignOutcome> {
        self.require_initialized()?;
        let csr_text = fs::read_to_string(csr_path)?;
        let validated = x509::validate_csr(&csr_text, &csr_path.display().to_string())?;

        let signer = self.load_signer()?;
        let serial_value = self.store.read_counter(&self.store.serial_path())?;
        let serial = store::format_serial(serial_value);
        let now = now_utc_secs();
        let subject = validated.subject.format();
        let not_after = format_utc(now + Duration::days(i64::from(validity_days)));

        let entry = IndexEntry {
            serial: serial.clone(),
            subject: subject.clone(),
            not_before: format_utc(now),
            not_after: not_after.clone(),
            status: CertStatus::Active,
            revoked_at: String::new(),
            revocation_reason: String::new(),
        };
        let cert = x509::build_leaf_certificate(validated, &signer, serial_value, validity_days, now)?;
        let mut entries = self.store.load_index()?;
        entries.push(entry);

        fs::create_dir_all(self.store.certs_dir())?;
        let certificate_path = self.store.issued_cert_path(&serial);
        let mut stage = self.store.stage();
        stage.write(
            &self.store.serial_path(),
            &CaStore::counter_bytes(serial_value + 1),
            MODE_PUBLIC,
        )?;
        stage.write(&certificate_path, cert.pem().as_bytes(), MODE_PUBLIC)?;
        stage.write(
            &self.store.index_path(),
            &CaStore::index_bytes(&entries)?,
            MODE_PUBLIC,
        )?;
        stage.commit()?;

        info!(serial = %serial, subject = %subject, "issued certificate");
        Ok(SignOutcome {
            serial,
            subject,
            not_after,
            certificate_path,
        })
    }

    /// Revoke an issued certificate by serial. One-way.
    pub fn revoke(&self, serial_arg: &str, reason: RevocationReason) -> Result<RevokeOutcome> {
        self.require_initialized()?;
        let wanted = store::canonical_serial(serial_arg)
            .ok_or_else(|| CaError::SerialNotFound(serial_arg.to_string()))?;
        let mut entries = self.store.load_index()?;
        let position = entries
            .iter()
            .position(|entry| entry.serial == wanted)
            .ok_or_else(|| CaError::SerialNotFound(wanted.clone()))?;
        let entry = &mut entries[position];
        if entry.status == CertStatus::Revoked {
            return Err(CaError::AlreadyRevoked(entry.serial.clone()));
        }

        entry.status = CertStatus::Revoked;
        entry.revoked_at = format_utc(now_utc_secs());
        entry.revocation_reason = reason.as_str().to_string();
        let outcome = RevokeOutcome {
            serial: entry.serial.clone(),
            subject: entry.subject.clone(),
            reason,
            revoked_at: entry.revoked_at.clone(),
        };
        self.store.save_index(&entries)?;

        info!(serial = %outcome.serial, reason = reason.as_str(), "revoked certificate");
        Ok(outcome)
    }

    /// Generate and publish a CRL over the currently revoked entries.
    pub fn generate_crl(&self, next_update_hours: u32) -> Result<CrlOutcome> {
        self.require_initialized()?;
        let signer = self.load_signer()?;
        let number = self.store.read_counter(&self.store.crl_number_path())?;
        let revoked: Vec<IndexEntry> = self
            .store
            .load_index()?
            .into_iter()
            .filter(|entry| entry.status == CertStatus::Revoked)
            .collect();
        let now = now_utc_secs();
        let crl_pem = x509::build_crl(&signer, number, next_update_hours, &revoked, now)?;

        let mut stage = self.store.stage();
        stage.write(&self.store.crl_path(), crl_pem.as_bytes(), MODE_PUBLIC)?;
        stage.write(
            &self.store.crl_number_path(),
            &CaStore::counter_bytes(number + 1),
            MODE_PUBLIC,
        )?;
        stage.commit()?;

        info!(number = %store::format_serial(number), entries = revoked.len(), "published CRL");
        Ok(CrlOutcome {
            crl_number: store::format_serial(number),
            revoked_entries: revoked.len(),
            next_update: format_utc(now + Duration::hours(i64::from(next_update_hours))),
            crl_path: self.store.crl_path(),
        })
    }

    /// List issued certificates in stored order, with display status.
    pub fn list(&self) -> Result<Vec<ListRow>> {
        self.require_initialized()?;
        let now = now_utc_secs();
        let mut rows = Vec::new();
        for entry in self.store.load_index()? {
            let status = if entry.status == CertStatus::Revoked {
                "revoked"
            } else if crate::index::parse_utc(&entry.not_after)? < now {
                "expired"
            } else {
                "active"
            };
            rows.push(ListRow {
                serial: entry.serial,
                status: status.to_string(),
                not_after: entry.not_after,
                subject: entry.subject,
            });
        }
        Ok(rows)
    }

    /// Verify a certificate against the CA: signature, validity window and
    /// revocation status. Read-only.
    pub fn verify(&self, cert_path: &Path) -> Result<VerifyReport> {
        self.require_initialized()?;
        let source = cert_path.display().to_string();
        let text = fs::read_to_string(cert_path)?;
        let parse_err = || CaError::CertParse(source.clone());
        let blocks = ::pem::parse_many(&text).map_err(|_| parse_err())?;
        let block = match blocks.as_slice() {
            [single] => single,
            _ => return Err(parse_err()),
        };
        if block.tag() != "CERTIFICATE" {
            return Err(parse_err());
        }
        let (_, cert) = X509Certificate::from_der(block.contents()).map_err(|_| parse_err())?;

        let subject = SubjectName::from_x509_name(cert.subject()).format();
        let issuer = SubjectName::from_x509_name(cert.issuer()).format();
        let serial = store::serial_from_der_bytes(cert.raw_serial());
        let not_before_ts = cert.validity().not_before.timestamp();
        let not_after_ts = cert.validity().not_after.timestamp();
        let not_before = format_timestamp(not_before_ts)?;
        let not_after = format_timestamp(not_after_ts)?;

        let ca_pem = self.store.read_pem(&self.store.cert_path())?;
        let ca_block = ::pem::parse(&ca_pem)
            .map_err(|_| CaError::Storage("stored CA certificate is not valid PEM".into()))?;
        let (_, ca_cert) = X509Certificate::from_der(ca_block.contents())
            .map_err(|e| CaError::Storage(format!("stored CA certificate does not parse: {e}")))?;

        let signature_ok = cert.verify_signature(Some(ca_cert.public_key())).is_ok();
        if !signature_ok {
            return Ok(VerifyReport {
                valid: false,
                subject,
                serial,
                issuer,
                not_before,
                not_after,
                signature_ok,
                expiry_ok: None,
                revocation: None,
            });
        }

        let now = now_utc_secs().timestamp();
        let expiry_ok = not_before_ts <= now && now <= not_after_ts;
        let revocation = self.revocation_status(&serial)?;
        let revoked = matches!(revocation, RevocationStatus::Revoked { .. });

        Ok(VerifyReport {
            valid: signature_ok && expiry_ok && !revoked,
            subject,
            serial,
            issuer,
            not_before,
            not_after,
            signature_ok,
            expiry_ok: Some(expiry_ok),
            revocation: Some(revocation),
        })
    }

    fn revocation_status(&self, serial: &str) -> Result<RevocationStatus> {
        let crl_path = self.store.crl_path();
        if !crl_path.exists() {
            return Ok(RevocationStatus::NotChecked);
        }
        let crl_pem = self.store.read_pem(&crl_path)?;
        let block = ::pem::parse(&crl_pem)
            .map_err(|_| CaError::Storage("stored CRL is not valid PEM".into()))?;
        let (_, crl) = CertificateRevocationList::from_der(block.contents())
            .map_err(|e| CaError::Storage(format!("stored CRL does not parse: {e}")))?;

        for revoked in crl.iter_revoked_certificates() {
            let entry_serial = store::canonical_serial(&format!("{:x}", revoked.user_certificate));
            if entry_serial.as_deref() != Some(serial) {
                continue;
            }
            let reason = revoked
                .extensions()
                .iter()
                .find_map(|ext| match ext.parsed_extension() {
                    ParsedExtension::ReasonCode(code) => RevocationReason::from_code(code.0),
                    _ => None,
                })
                .unwrap_or(RevocationReason::Unspecified);
            let date = format_timestamp(revoked.revocation_date.timestamp())?;
            return Ok(RevocationStatus::Revoked {
                reason: reason.as_str().to_string(),
                date,
            });
        }
        Ok(RevocationStatus::NotRevoked)
    }
}

fn format_timestamp(secs: i64) -> Result<String> {
    use chrono::TimeZone;
    chrono::Utc
        .timestamp_opt(secs, 0)
        .single()
        .map(format_utc)
        .ok_or_else(|| CaError::Storage(format!("timestamp {secs} out of range")))
}
