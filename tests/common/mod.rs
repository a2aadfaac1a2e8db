//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cactl::name::{SanList, SubjectName};
use cactl::x509::{self, KeyAlgorithm};
use cactl::CertificateAuthority;

/// Parse a subject string, panicking on bad test input.
pub fn subject(input: &str) -> SubjectName {
    SubjectName::parse(input).unwrap()
}

/// Initialize a fresh ECDSA CA in `dir` with a fixed test subject.
pub fn init_ca(dir: &Path) -> CertificateAuthority {
    let ca = CertificateAuthority::new(dir);
    ca.init(
        &subject("CN=Test Root CA,O=Test Org,C=US"),
        KeyAlgorithm::EcdsaP256,
        3650,
    )
    .unwrap();
    ca
}

/// Build a CSR PEM for the given common name and SAN list.
pub fn csr_pem(common_name: &str, san: &str) -> String {
    csr_pem_with(common_name, san, KeyAlgorithm::EcdsaP256)
}

/// Build a CSR PEM with an explicit key algorithm.
pub fn csr_pem_with(common_name: &str, san: &str, algorithm: KeyAlgorithm) -> String {
    let key = x509::generate_key_pair(algorithm).unwrap();
    x509::build_csr(
        &subject(&format!("CN={common_name}")),
        &SanList::parse(san).unwrap(),
        &key,
    )
    .unwrap()
}

/// Write a CSR into a scratch directory and return its path.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// Full byte snapshot of a directory tree, for byte-identical assertions.
pub fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    walk(dir, &mut files);
    files
}

fn walk(dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            walk(&path, files);
        } else {
            files.insert(path.clone(), fs::read(&path).unwrap());
        }
    }
}
