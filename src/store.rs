//! Data-directory persistence
//!
//! One filesystem directory is the unit of CA state: key, certificate,
//! serial and CRL counters, the JSON certificate index, the issued
//! certificates and the current CRL. All writes go through two primitives:
//! a single-file atomic replace (`.tmp` sibling + rename) and a multi-file
//! [`Stage`] whose commit renames happen in insertion order. Rename within
//! a directory is atomic on POSIX; the whole crash-safety story of the
//! engine rests on that one assumption, so it is isolated here.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CaError, Result};
use crate::index::IndexEntry;

/// File mode for private key material
pub const MODE_PRIVATE: u32 = 0o600;
/// File mode for public artifacts (certificates, CRLs, counters, index)
pub const MODE_PUBLIC: u32 = 0o644;

/// Handle on a CA data directory
#[derive(Debug, Clone)]
pub struct CaStore {
    root: PathBuf,
}

impl CaStore {
    /// Create a handle for the given data directory. No I/O happens here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the CA private key.
    pub fn key_path(&self) -> PathBuf {
        self.root.join("ca.key")
    }

    /// Path of the root certificate.
    pub fn cert_path(&self) -> PathBuf {
        self.root.join("ca.crt")
    }

    /// Path of the next-serial counter.
    pub fn serial_path(&self) -> PathBuf {
        self.root.join("serial")
    }

    /// Path of the next-CRL-number counter.
    pub fn crl_number_path(&self) -> PathBuf {
        self.root.join("crlnumber")
    }

    /// Path of the certificate index.
    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Path of the current CRL. Absence is meaningful: no CRL generated yet.
    pub fn crl_path(&self) -> PathBuf {
        self.root.join("ca.crl")
    }

    /// Directory of issued end-entity certificates.
    pub fn certs_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    /// Path of one issued certificate, by canonical serial.
    pub fn issued_cert_path(&self, serial: &str) -> PathBuf {
        self.certs_dir().join(format!("{serial}.pem"))
    }

    /// The initialization marker: both the key and the certificate exist.
    pub fn is_initialized(&self) -> bool {
        self.key_path().exists() && self.cert_path().exists()
    }

    /// Create the data directory and its `certs/` subdirectory.
    ///
    /// Idempotent for the directories; writes none of the state files.
    /// Returns whether `certs/` was newly created, so a failed init can
    /// confine its cleanup to what it actually made.
    pub fn init_layout(&self) -> Result<bool> {
        fs::create_dir_all(&self.root)?;
        let certs = self.certs_dir();
        let created = !certs.exists();
        fs::create_dir_all(&certs)?;
        Ok(created)
    }

    /// Read a counter file: trimmed lowercase hex.
    pub fn read_counter(&self, path: &Path) -> Result<u128> {
        let text = fs::read_to_string(path)?;
        let trimmed = text.trim();
        u128::from_str_radix(trimmed, 16).map_err(|_| {
            CaError::Storage(format!(
                "counter {} holds invalid hex {trimmed:?}",
                path.display()
            ))
        })
    }

    /// Counter file contents for a value: lowercase hex, newline-terminated.
    pub fn counter_bytes(value: u128) -> Vec<u8> {
        let mut bytes = format_serial(value).into_bytes();
        bytes.push(b'\n');
        bytes
    }

    /// Load and validate the certificate index.
    pub fn load_index(&self) -> Result<Vec<IndexEntry>> {
        let data = fs::read(self.index_path())?;
        let entries: Vec<IndexEntry> = serde_json::from_slice(&data)?;
        for entry in &entries {
            crate::index::parse_utc(&entry.not_before)?;
            crate::index::parse_utc(&entry.not_after)?;
            if !entry.revoked_at.is_empty() {
                crate::index::parse_utc(&entry.revoked_at)?;
            }
        }
        Ok(entries)
    }

    /// Index file contents: pretty 2-space JSON with a trailing newline.
    pub fn index_bytes(entries: &[IndexEntry]) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(entries)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Replace the index in one atomic step.
    pub fn save_index(&self, entries: &[IndexEntry]) -> Result<()> {
        atomic_write(&self.index_path(), &Self::index_bytes(entries)?, MODE_PUBLIC)
    }

    /// Read a PEM artifact as text.
    pub fn read_pem(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }

    /// Open a multi-file staging transaction. Files become visible in the
    /// order they were staged, once [`Stage::commit`] runs.
    pub fn stage(&self) -> Stage {
        Stage {
            staged: Vec::new(),
            renamed: 0,
        }
    }
}

/// Format a counter or serial value as the on-disk hex string: the
/// big-endian byte representation, leading zero bytes stripped, lowercase
/// hex. Two digits minimum; grows in whole bytes beyond 0xff (`02`, `ff`,
/// `0100`).
pub fn format_serial(value: u128) -> String {
    hex::encode(serial_bytes(value))
}

/// Big-endian bytes of a serial value, no leading zero bytes, at least one
/// byte.
pub fn serial_bytes(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

/// Canonicalize a user-supplied or DER-derived serial string: valid hex,
/// leading zeros stripped, re-padded to whole bytes. Returns `None` for
/// non-hex input, which therefore can never match an index entry.
pub fn canonical_serial(input: &str) -> Option<String> {
    let lower = input.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return None;
    }
    let value = u128::from_str_radix(&lower, 16).ok()?;
    Some(format_serial(value))
}

/// Canonical serial string for raw DER INTEGER content bytes (strips the
/// sign-padding zero byte DER adds when the high bit is set).
pub fn serial_from_der_bytes(raw: &[u8]) -> String {
    let first = raw.iter().position(|&b| b != 0);
    match first {
        Some(i) => hex::encode(&raw[i..]),
        None => "00".to_string(),
    }
}

/// Write `bytes` to `path` atomically: stage to a `.tmp` sibling, set the
/// file mode, then rename over the destination. On failure the `.tmp` file
/// is removed and the destination is untouched.
pub fn atomic_write(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let tmp = tmp_path(path);
    write_with_mode(&tmp, bytes, mode)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    debug!(path = %path.display(), "replaced atomically");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

fn write_with_mode(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let written = fs::write(path, bytes)
        .map_err(CaError::from)
        .and_then(|()| set_mode(path, mode));
    if written.is_err() {
        // The write may have landed before the failure; a stray staged file
        // must not survive a failed call.
        let _ = fs::remove_file(path);
    }
    written
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// A multi-file write transaction: every output lands in a `.tmp` sibling
/// first, then [`commit`](Stage::commit) renames them into place in staging
/// order. Dropping an uncommitted (or partially committed) stage removes
/// whatever `.tmp` files are still pending, leaving earlier state intact.
pub struct Stage {
    staged: Vec<(PathBuf, PathBuf)>,
    renamed: usize,
}

impl Stage {
    /// Stage `bytes` for `final_path`. The commit rename order is the order
    /// of these calls.
    ///
    /// A failed write removes its own `.tmp` before returning; earlier
    /// staged files are removed when the abandoned stage is dropped, so a
    /// mid-transaction failure leaves no staged file behind.
    pub fn write(&mut self, final_path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
        let tmp = tmp_path(final_path);
        write_with_mode(&tmp, bytes, mode)?;
        self.staged.push((tmp, final_path.to_path_buf()));
        Ok(())
    }

    /// Rename every staged file into place, in staging order.
    ///
    /// If a rename fails mid-way the already renamed files stay (the
    /// per-operation orders are chosen so that is benign) and the pending
    /// `.tmp` files are removed on drop.
    pub fn commit(mut self) -> Result<()> {
        while self.renamed < self.staged.len() {
            let (tmp, final_path) = &self.staged[self.renamed];
            fs::rename(tmp, final_path)?;
            debug!(path = %final_path.display(), "committed");
            self.renamed += 1;
        }
        Ok(())
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        for (tmp, _) in &self.staged[self.renamed..] {
            if tmp.exists() {
                if let Err(err) = fs::remove_file(tmp) {
                    warn!(path = %tmp.display(), %err, "failed to remove staged file");
                }
            }
        }
    }
}
