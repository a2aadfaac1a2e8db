//! End-to-end lifecycle tests over a scratch data directory
//!
//! Covers init, issuance, revocation and CRL generation, the counter
//! invariants they maintain, and the requirement that failed operations
//! leave the data directory byte-identical.

mod common;

use cactl::index::{CertStatus, RevocationReason};
use cactl::store::format_serial;
use cactl::CertificateAuthority;
use common::*;

use x509_parser::prelude::*;

#[test]
fn lifecycle_issue_revoke_crl() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());

    // Issue one certificate.
    let csr = write_file(
        scratch.path(),
        "leaf.csr",
        &csr_pem("leaf.example.com", "DNS:leaf.example.com"),
    );
    let signed = ca.sign(&csr, 365).unwrap();
    assert_eq!(signed.serial, "02");
    assert_eq!(signed.subject, "CN=leaf.example.com");
    assert!(data.path().join("certs/02.pem").exists());
    assert_eq!(
        std::fs::read_to_string(data.path().join("serial")).unwrap(),
        "03\n"
    );

    let index = ca.store().load_index().unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].status, CertStatus::Active);
    assert_eq!(index[0].revoked_at, "");
    assert_eq!(index[0].revocation_reason, "");

    // Revoke it and publish a CRL.
    let revoked = ca.revoke("02", RevocationReason::KeyCompromise).unwrap();
    assert_eq!(revoked.serial, "02");
    let crl = ca.generate_crl(24).unwrap();
    assert_eq!(crl.crl_number, "01");
    assert_eq!(crl.revoked_entries, 1);
    assert!(data.path().join("ca.crl").exists());
    assert_eq!(
        std::fs::read_to_string(data.path().join("crlnumber")).unwrap(),
        "02\n"
    );

    let index = ca.store().load_index().unwrap();
    assert_eq!(index[0].status, CertStatus::Revoked);
    assert_eq!(index[0].revocation_reason, "keyCompromise");
    assert!(!index[0].revoked_at.is_empty());
}

#[test]
fn serial_counter_tracks_issuance_count() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());

    for i in 0..3 {
        let csr = write_file(
            scratch.path(),
            &format!("leaf{i}.csr"),
            &csr_pem(&format!("leaf{i}.example.com"), ""),
        );
        ca.sign(&csr, 365).unwrap();
    }

    let entries = ca.store().load_index().unwrap();
    assert_eq!(entries.len(), 3);
    let counter = ca
        .store()
        .read_counter(&ca.store().serial_path())
        .unwrap();
    assert_eq!(counter, 2 + entries.len() as u128);

    let cert_files: Vec<_> = std::fs::read_dir(data.path().join("certs"))
        .unwrap()
        .collect();
    assert_eq!(cert_files.len(), entries.len());

    // Every entry has a certificate file, and serials are unique.
    let mut serials: Vec<_> = entries.iter().map(|e| e.serial.clone()).collect();
    for serial in &serials {
        assert!(ca.store().issued_cert_path(serial).exists());
    }
    serials.sort();
    serials.dedup();
    assert_eq!(serials.len(), entries.len());
}

#[test]
fn serial_string_grows_in_whole_bytes() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());

    let csr = write_file(scratch.path(), "leaf.csr", &csr_pem("leaf.example.com", ""));
    let mut last_serial = String::new();
    for _ in 0..255 {
        last_serial = ca.sign(&csr, 365).unwrap().serial;
    }
    assert_eq!(last_serial, "0100");
    assert!(data.path().join("certs/ff.pem").exists());
    assert!(data.path().join("certs/0100.pem").exists());
    assert_eq!(
        std::fs::read_to_string(data.path().join("serial")).unwrap(),
        "0101\n"
    );
}

#[test]
fn crl_numbers_increase_strictly() {
    let data = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());

    let mut embedded = Vec::new();
    for expected in 1u128..=3 {
        let out = ca.generate_crl(24).unwrap();
        assert_eq!(out.crl_number, format_serial(expected));

        let pem_text = std::fs::read_to_string(data.path().join("ca.crl")).unwrap();
        let block = ::pem::parse(&pem_text).unwrap();
        let (_, crl) = CertificateRevocationList::from_der(block.contents()).unwrap();
        let number = format!("{:x}", crl.crl_number().unwrap());
        embedded.push(u128::from_str_radix(&number, 16).unwrap());
    }
    assert!(embedded.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(
        ca.store()
            .read_counter(&ca.store().crl_number_path())
            .unwrap(),
        4
    );
}

#[test]
fn revocation_is_one_way() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let csr = write_file(scratch.path(), "leaf.csr", &csr_pem("leaf.example.com", ""));
    ca.sign(&csr, 365).unwrap();

    ca.revoke("02", RevocationReason::Superseded).unwrap();
    let after_first = snapshot(data.path());

    let err = ca.revoke("02", RevocationReason::KeyCompromise).unwrap_err();
    assert_eq!(
        err.to_string(),
        "certificate with serial 02 is already revoked"
    );
    assert_eq!(snapshot(data.path()), after_first);

    let entry = &ca.store().load_index().unwrap()[0];
    assert_eq!(entry.status, CertStatus::Revoked);
    assert!(!entry.revoked_at.is_empty());
    assert_eq!(entry.revocation_reason, "superseded");
}

#[test]
fn revoke_unknown_serial_preserves_state() {
    let data = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let before = snapshot(data.path());

    let err = ca.revoke("7f", RevocationReason::Unspecified).unwrap_err();
    assert_eq!(err.to_string(), "certificate with serial 7f not found");
    assert_eq!(snapshot(data.path()), before);

    // Non-hex serials cannot match anything either.
    let err = ca.revoke("zz", RevocationReason::Unspecified).unwrap_err();
    assert_eq!(err.to_string(), "certificate with serial zz not found");
    assert_eq!(snapshot(data.path()), before);
}

#[test]
fn revoke_accepts_unpadded_serials() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let csr = write_file(scratch.path(), "leaf.csr", &csr_pem("leaf.example.com", ""));
    ca.sign(&csr, 365).unwrap();

    let out = ca.revoke("2", RevocationReason::Unspecified).unwrap();
    assert_eq!(out.serial, "02");
}

#[test]
fn reinit_fails_and_preserves_state() {
    let data = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let before = snapshot(data.path());

    let err = ca
        .init(
            &subject("CN=Another Root,O=Else"),
            cactl::x509::KeyAlgorithm::EcdsaP256,
            10,
        )
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("CA already initialized at {}", data.path().display())
    );
    assert_eq!(snapshot(data.path()), before);
}

#[test]
fn init_writes_full_layout() {
    let data = tempfile::tempdir().unwrap();
    let dir = data.path().join("ca-data");
    let ca = CertificateAuthority::new(&dir);
    let out = ca
        .init(
            &subject("CN=Test Root CA,O=Test Org,C=US"),
            cactl::x509::KeyAlgorithm::EcdsaP256,
            3650,
        )
        .unwrap();

    assert_eq!(out.subject, "CN=Test Root CA,O=Test Org,C=US");
    assert_eq!(out.serial, "01");
    assert!(dir.join("ca.key").exists());
    assert!(dir.join("ca.crt").exists());
    assert!(dir.join("certs").is_dir());
    assert_eq!(std::fs::read_to_string(dir.join("serial")).unwrap(), "02\n");
    assert_eq!(
        std::fs::read_to_string(dir.join("crlnumber")).unwrap(),
        "01\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.join("index.json")).unwrap(),
        "[]\n"
    );
    assert!(!dir.join("ca.crl").exists());

    let key_pem = std::fs::read_to_string(dir.join("ca.key")).unwrap();
    assert!(key_pem.contains("BEGIN PRIVATE KEY"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(dir.join("ca.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[test]
fn operations_require_initialization() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = CertificateAuthority::new(data.path());
    let csr = write_file(scratch.path(), "leaf.csr", &csr_pem("leaf.example.com", ""));

    assert_eq!(
        ca.sign(&csr, 365).unwrap_err().to_string(),
        "CA not initialized"
    );
    assert_eq!(
        ca.revoke("02", RevocationReason::Unspecified)
            .unwrap_err()
            .to_string(),
        "CA not initialized"
    );
    assert_eq!(
        ca.generate_crl(24).unwrap_err().to_string(),
        "CA not initialized"
    );
    assert_eq!(ca.list().unwrap_err().to_string(), "CA not initialized");
}

#[test]
fn list_reports_status_in_stored_order() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    assert!(ca.list().unwrap().is_empty());

    for i in 0..2 {
        let csr = write_file(
            scratch.path(),
            &format!("leaf{i}.csr"),
            &csr_pem(&format!("leaf{i}.example.com"), ""),
        );
        ca.sign(&csr, 365).unwrap();
    }
    ca.revoke("03", RevocationReason::CessationOfOperation)
        .unwrap();

    let rows = ca.list().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].serial, "02");
    assert_eq!(rows[0].status, "active");
    assert_eq!(rows[1].serial, "03");
    assert_eq!(rows[1].status, "revoked");
    assert_eq!(rows[0].subject, "CN=leaf0.example.com");

    // Listing is read-only and stable.
    let again = ca.list().unwrap();
    assert_eq!(rows, again);
}

#[test]
fn root_certificate_stays_out_of_the_index() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let csr = write_file(scratch.path(), "leaf.csr", &csr_pem("leaf.example.com", ""));
    ca.sign(&csr, 365).unwrap();

    for entry in ca.store().load_index().unwrap() {
        assert_ne!(entry.serial, "01");
    }
}
