//! CSR acceptance tests: parse, signature and key-algorithm gating,
//! and the guarantee that rejected requests leave no trace on disk.

mod common;

use cactl::index::CertStatus;
use cactl::x509::KeyAlgorithm;
use common::*;

use x509_parser::prelude::*;

#[test]
fn rsa_2048_csr_is_accepted() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let csr = write_file(
        scratch.path(),
        "leaf.csr",
        &csr_pem_with("rsa.example.com", "", KeyAlgorithm::Rsa2048),
    );

    let signed = ca.sign(&csr, 365).unwrap();
    assert_eq!(signed.serial, "02");

    // RSA subjects additionally get keyEncipherment.
    let leaf_pem = std::fs::read_to_string(&signed.certificate_path).unwrap();
    let block = ::pem::parse(&leaf_pem).unwrap();
    let (_, leaf) = X509Certificate::from_der(block.contents()).unwrap();
    let (digital_signature, key_encipherment) = leaf
        .extensions()
        .iter()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::KeyUsage(ku) => {
                Some((ku.digital_signature(), ku.key_encipherment()))
            }
            _ => None,
        })
        .unwrap();
    assert!(digital_signature);
    assert!(key_encipherment);
}

#[test]
fn ecdsa_leaf_omits_key_encipherment() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let csr = write_file(scratch.path(), "leaf.csr", &csr_pem("ec.example.com", ""));

    let signed = ca.sign(&csr, 365).unwrap();
    let leaf_pem = std::fs::read_to_string(&signed.certificate_path).unwrap();
    let block = ::pem::parse(&leaf_pem).unwrap();
    let (_, leaf) = X509Certificate::from_der(block.contents()).unwrap();
    let (digital_signature, key_encipherment) = leaf
        .extensions()
        .iter()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::KeyUsage(ku) => {
                Some((ku.digital_signature(), ku.key_encipherment()))
            }
            _ => None,
        })
        .unwrap();
    assert!(digital_signature);
    assert!(!key_encipherment);
}

#[test]
fn foreign_algorithm_csr_is_rejected_without_state_change() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let before = snapshot(data.path());

    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).unwrap();
    let csr_pem = cactl::x509::build_csr(
        &subject("CN=leaf.example.com"),
        &cactl::name::SanList::default(),
        &key,
    )
    .unwrap();
    let csr = write_file(scratch.path(), "p384.csr", &csr_pem);

    let err = ca.sign(&csr, 365).unwrap_err();
    assert_eq!(
        err.to_string(),
        "unsupported key algorithm in CSR. Supported: ECDSA P-256, RSA 2048"
    );
    assert_eq!(snapshot(data.path()), before);
    assert_eq!(
        std::fs::read_to_string(data.path().join("serial")).unwrap(),
        "02\n"
    );
}

#[test]
fn tampered_csr_signature_is_rejected_without_state_change() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let before = snapshot(data.path());

    let good = csr_pem("leaf.example.com", "");
    let block = ::pem::parse(&good).unwrap();
    let mut der = block.contents().to_vec();
    let last = der.len() - 1;
    der[last] ^= 0x01;
    let tampered = ::pem::encode(&::pem::Pem::new("CERTIFICATE REQUEST", der));
    let csr = write_file(scratch.path(), "tampered.csr", &tampered);

    let err = ca.sign(&csr, 365).unwrap_err();
    assert_eq!(err.to_string(), "CSR signature verification failed");
    assert_eq!(snapshot(data.path()), before);
}

#[test]
fn malformed_csr_file_is_rejected_without_state_change() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let before = snapshot(data.path());

    let csr = write_file(scratch.path(), "broken.csr", "this is not a PEM file");
    let err = ca.sign(&csr, 365).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("failed to parse CSR from {}", csr.display())
    );
    assert_eq!(snapshot(data.path()), before);

    // Two concatenated blocks are not a single CSR either.
    let double = format!("{0}{0}", csr_pem("leaf.example.com", ""));
    let csr = write_file(scratch.path(), "double.csr", &double);
    let err = ca.sign(&csr, 365).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("failed to parse CSR from {}", csr.display())
    );
    assert_eq!(snapshot(data.path()), before);
}

#[test]
fn signed_certificate_subject_comes_from_the_csr() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let ca = init_ca(data.path());
    let csr = write_file(scratch.path(), "leaf.csr", &csr_pem("leaf.example.com", ""));
    let signed = ca.sign(&csr, 365).unwrap();

    let entries = ca.store().load_index().unwrap();
    assert_eq!(entries[0].serial, signed.serial);
    assert_eq!(entries[0].subject, "CN=leaf.example.com");
    assert_eq!(entries[0].status, CertStatus::Active);
    assert_eq!(entries[0].not_after, signed.not_after);

    let leaf_pem = std::fs::read_to_string(&signed.certificate_path).unwrap();
    let block = ::pem::parse(&leaf_pem).unwrap();
    let (_, leaf) = X509Certificate::from_der(block.contents()).unwrap();
    let cn = leaf
        .subject()
        .iter_common_name()
        .next()
        .unwrap()
        .as_str()
        .unwrap();
    assert_eq!(cn, "leaf.example.com");
}
