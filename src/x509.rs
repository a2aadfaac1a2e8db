//! X.509 artifact construction and CSR acceptance
//!
//! Purely constructive: key pairs, certificate and CRL templates signed
//! with the CA key, PKCS#10 requests. Templates follow the RFC 5280
//! profile for a one-level hierarchy:
//!
//! ```text
//! Root CA (self-signed, serial 01)
//!   ├─ BasicConstraints critical, cA=TRUE
//!   ├─ keyUsage critical: keyCertSign, cRLSign
//!   └─ SubjectKeyIdentifier = SHA-1(SPKI)
//!
//! End-entity certificates (CA-signed)
//!   ├─ BasicConstraints critical, cA=FALSE
//!   ├─ keyUsage critical: digitalSignature (+ keyEncipherment for RSA)
//!   ├─ SubjectKeyIdentifier = SHA-1(CSR SPKI)
//!   ├─ AuthorityKeyIdentifier = CA SubjectKeyIdentifier
//!   └─ SubjectAltName copied verbatim from the CSR
//! ```
//!
//! Signatures are SHA-256 throughout (ECDSA-with-SHA-256 or RSA
//! PKCS#1 v1.5, depending on the key).

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams,
    CertificateSigningRequestParams, DistinguishedName, DnType, IsCa, KeyIdMethod, KeyPair,
    KeyUsagePurpose, RevokedCertParams, SanType, SerialNumber, PKCS_ECDSA_P256_SHA256,
    PKCS_RSA_SHA256,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use sha1::{Digest, Sha1};
use ::time::OffsetDateTime;
use x509_parser::prelude::*;

use crate::error::{CaError, Result};
use crate::index::{IndexEntry, RevocationReason};
use crate::name::{SanList, SubjectName};
use crate::store;

const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_PRIME256V1: &str = "1.2.840.10045.3.1.7";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";

/// Supported key algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// NIST P-256 ECDSA
    EcdsaP256,
    /// 2048-bit RSA
    Rsa2048,
}

impl KeyAlgorithm {
    /// CLI flag spelling.
    pub fn flag_name(&self) -> &'static str {
        match self {
            KeyAlgorithm::EcdsaP256 => "ecdsa-p256",
            KeyAlgorithm::Rsa2048 => "rsa-2048",
        }
    }

    /// Human-readable name used in summaries.
    pub fn display_name(&self) -> &'static str {
        match self {
            KeyAlgorithm::EcdsaP256 => "ECDSA P-256",
            KeyAlgorithm::Rsa2048 => "RSA 2048",
        }
    }

    /// The SHA-256 signature algorithm for this key type.
    pub fn signature_algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            KeyAlgorithm::EcdsaP256 => &PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::Rsa2048 => &PKCS_RSA_SHA256,
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ecdsa-p256" => Ok(KeyAlgorithm::EcdsaP256),
            "rsa-2048" => Ok(KeyAlgorithm::Rsa2048),
            other => Err(format!(
                "unsupported key algorithm {other:?} (supported: ecdsa-p256, rsa-2048)"
            )),
        }
    }
}

/// Generate a fresh key pair for the given algorithm.
///
/// P-256 generation goes through rcgen's ring backend; RSA keys come from
/// the rsa crate (ring does not generate RSA) and are loaded into rcgen as
/// PKCS#8 with the PKCS#1 v1.5 SHA-256 signature algorithm.
pub fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair> {
    match algorithm {
        KeyAlgorithm::EcdsaP256 => Ok(KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?),
        KeyAlgorithm::Rsa2048 => {
            let mut rng = rand::rngs::OsRng;
            let key = RsaPrivateKey::new(&mut rng, 2048)?;
            let pem = key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| CaError::KeyGeneration(e.to_string()))?;
            Ok(KeyPair::from_pem_and_sign_algo(&pem, &PKCS_RSA_SHA256)?)
        }
    }
}

/// RFC 5280 method-1 key identifier: SHA-1 over the DER-encoded
/// SubjectPublicKeyInfo.
pub fn subject_key_identifier(spki_der: &[u8]) -> Vec<u8> {
    Sha1::digest(spki_der).to_vec()
}

/// Classify a SubjectPublicKeyInfo as one of the supported algorithms.
///
/// P-256 is matched by curve OID; RSA by exact 2048-bit modulus length.
/// Everything else (other curves, other RSA sizes, Ed25519, ...) is `None`.
pub fn classify_public_key(spki: &SubjectPublicKeyInfo<'_>) -> Option<KeyAlgorithm> {
    match spki.algorithm.algorithm.to_id_string().as_str() {
        OID_EC_PUBLIC_KEY => {
            let curve = spki.algorithm.parameters.as_ref()?.as_oid().ok()?;
            (curve.to_id_string() == OID_PRIME256V1).then_some(KeyAlgorithm::EcdsaP256)
        }
        OID_RSA_ENCRYPTION => match spki.parsed().ok()? {
            x509_parser::public_key::PublicKey::RSA(rsa_key) => {
                (rsa_modulus_bits(rsa_key.modulus) == 2048).then_some(KeyAlgorithm::Rsa2048)
            }
            _ => None,
        },
        _ => None,
    }
}

fn rsa_modulus_bits(modulus: &[u8]) -> usize {
    match modulus.iter().position(|&b| b != 0) {
        Some(i) => (modulus.len() - i - 1) * 8 + 8 - modulus[i].leading_zeros() as usize,
        None => 0,
    }
}

fn rcgen_distinguished_name(subject: &SubjectName) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    for cn in &subject.common_name {
        dn.push(DnType::CommonName, cn.as_str());
    }
    for o in &subject.organization {
        dn.push(DnType::OrganizationName, o.as_str());
    }
    for ou in &subject.organizational_unit {
        dn.push(DnType::OrganizationalUnitName, ou.as_str());
    }
    for l in &subject.locality {
        dn.push(DnType::LocalityName, l.as_str());
    }
    for st in &subject.state {
        dn.push(DnType::StateOrProvinceName, st.as_str());
    }
    for c in &subject.country {
        dn.push(DnType::CountryName, c.as_str());
    }
    dn
}

fn to_offset(instant: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(instant.timestamp())
        .map_err(|e| CaError::Storage(format!("timestamp out of range: {e}")))
}

/// Build the self-signed root certificate, serial 01.
pub fn build_root_certificate(
    subject: &SubjectName,
    key: &KeyPair,
    validity_days: u32,
    now: DateTime<Utc>,
) -> Result<Certificate> {
    let mut params = CertificateParams::new(Vec::new())?;
    params.distinguished_name = rcgen_distinguished_name(subject);
    params.serial_number = Some(SerialNumber::from(store::serial_bytes(1)));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.not_before = to_offset(now)?;
    params.not_after = to_offset(now + Duration::days(i64::from(validity_days)))?;
    params.key_identifier_method =
        KeyIdMethod::PreSpecified(subject_key_identifier(&key.public_key_der()));
    Ok(params.self_signed(key)?)
}

/// The CA certificate and key reconstructed as an rcgen signer.
///
/// rcgen signs against its own `Certificate` type, so the stored PEM pair
/// is rebuilt into one; the key identifier method is pinned to the stored
/// certificate's actual SubjectKeyIdentifier so that every artifact signed
/// here carries an AuthorityKeyIdentifier equal to it.
pub struct CaSigner {
    /// Issuer certificate (re-derived from the stored params)
    pub cert: Certificate,
    /// Issuer private key
    pub key: KeyPair,
    /// The CA's SubjectKeyIdentifier bytes
    pub ski: Vec<u8>,
}

/// Rebuild the signing identity from the stored certificate and key PEMs.
pub fn load_signer(cert_pem: &str, key_pem: &str) -> Result<CaSigner> {
    let block = ::pem::parse(cert_pem)
        .map_err(|_| CaError::Storage("stored CA certificate is not valid PEM".into()))?;
    let (_, parsed) = X509Certificate::from_der(block.contents())
        .map_err(|e| CaError::Storage(format!("stored CA certificate does not parse: {e}")))?;
    let algorithm = classify_public_key(parsed.public_key()).ok_or_else(|| {
        CaError::Storage("stored CA certificate carries an unsupported key type".into())
    })?;
    let ski = find_subject_key_identifier(&parsed).ok_or_else(|| {
        CaError::Storage("stored CA certificate lacks a SubjectKeyIdentifier".into())
    })?;

    let key = KeyPair::from_pem_and_sign_algo(key_pem, algorithm.signature_algorithm())?;
    let mut params = CertificateParams::from_ca_cert_pem(cert_pem)?;
    params.key_identifier_method = KeyIdMethod::PreSpecified(ski.clone());
    let cert = params.self_signed(&key)?;
    Ok(CaSigner { cert, key, ski })
}

fn find_subject_key_identifier(cert: &X509Certificate<'_>) -> Option<Vec<u8>> {
    cert.extensions()
        .iter()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(ki) => Some(ki.0.to_vec()),
            _ => None,
        })
}

/// A CSR that passed acceptance validation.
pub struct ValidatedCsr {
    /// rcgen template carrying the CSR subject, SANs and public key
    pub params: CertificateSigningRequestParams,
    /// Classified subject key algorithm
    pub algorithm: KeyAlgorithm,
    /// SHA-1 key identifier of the CSR public key
    pub ski: Vec<u8>,
    /// CSR subject name
    pub subject: SubjectName,
}

impl std::fmt::Debug for ValidatedCsr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedCsr")
            .field("algorithm", &self.algorithm)
            .field("ski", &self.ski)
            .field("subject", &self.subject)
            .finish()
    }
}

/// Validate a PKCS#10 request for acceptance.
///
/// In order: the input must be a single `CERTIFICATE REQUEST` PEM block;
/// the body must parse as PKCS#10; the self-signature must verify against
/// the embedded public key; the key must be P-256 ECDSA or RSA-2048.
/// `source` labels parse failures with the input path.
pub fn validate_csr(pem_text: &str, source: &str) -> Result<ValidatedCsr> {
    let parse_err = || CaError::CsrParse(source.to_string());
    let blocks = ::pem::parse_many(pem_text).map_err(|_| parse_err())?;
    let block = match blocks.as_slice() {
        [single] => single,
        _ => return Err(parse_err()),
    };
    if block.tag() != "CERTIFICATE REQUEST" {
        return Err(parse_err());
    }
    let (_, csr) = X509CertificationRequest::from_der(block.contents()).map_err(|_| parse_err())?;
    csr.verify_signature().map_err(|_| CaError::CsrSignature)?;

    let spki = &csr.certification_request_info.subject_pki;
    let algorithm = classify_public_key(spki).ok_or(CaError::UnsupportedCsrKey)?;
    let ski = subject_key_identifier(spki.raw);
    let subject = SubjectName::from_x509_name(&csr.certification_request_info.subject);

    let params = CertificateSigningRequestParams::from_pem(pem_text).map_err(|_| parse_err())?;
    Ok(ValidatedCsr {
        params,
        algorithm,
        ski,
        subject,
    })
}

/// Build an end-entity certificate from a validated CSR, signed by the CA.
pub fn build_leaf_certificate(
    csr: ValidatedCsr,
    signer: &CaSigner,
    serial: u128,
    validity_days: u32,
    now: DateTime<Utc>,
) -> Result<Certificate> {
    let ValidatedCsr {
        params: mut req,
        algorithm,
        ski,
        ..
    } = csr;
    req.params.serial_number = Some(SerialNumber::from(store::serial_bytes(serial)));
    req.params.not_before = to_offset(now)?;
    req.params.not_after = to_offset(now + Duration::days(i64::from(validity_days)))?;
    req.params.is_ca = IsCa::ExplicitNoCa;
    req.params.key_usages = match algorithm {
        KeyAlgorithm::EcdsaP256 => vec![KeyUsagePurpose::DigitalSignature],
        KeyAlgorithm::Rsa2048 => vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ],
    };
    req.params.extended_key_usages = Vec::new();
    req.params.use_authority_key_identifier_extension = true;
    req.params.key_identifier_method = KeyIdMethod::PreSpecified(ski);
    Ok(req.signed_by(&signer.cert, &signer.key)?)
}

/// Build a PKCS#10 request for the given subject and SANs, self-signed
/// with `key`, as PEM.
pub fn build_csr(subject: &SubjectName, san: &SanList, key: &KeyPair) -> Result<String> {
    let mut params = CertificateParams::new(san.dns.clone())?;
    params.distinguished_name = rcgen_distinguished_name(subject);
    for ip in &san.ips {
        params.subject_alt_names.push(SanType::IpAddress(*ip));
    }
    let csr = params.serialize_request(key)?;
    Ok(csr.pem()?)
}

/// Build a v2 CRL over the revoked index entries, signed by the CA, as PEM.
pub fn build_crl(
    signer: &CaSigner,
    crl_number: u128,
    next_update_hours: u32,
    revoked: &[IndexEntry],
    now: DateTime<Utc>,
) -> Result<String> {
    let mut revoked_certs = Vec::with_capacity(revoked.len());
    for entry in revoked {
        let serial_raw = hex::decode(&entry.serial).map_err(|_| {
            CaError::Storage(format!(
                "index entry carries invalid serial {:?}",
                entry.serial
            ))
        })?;
        let revoked_at = crate::index::parse_utc(&entry.revoked_at)?;
        let reason: RevocationReason = entry
            .revocation_reason
            .parse()
            .map_err(CaError::Storage)?;
        revoked_certs.push(RevokedCertParams {
            serial_number: SerialNumber::from(serial_raw),
            revocation_time: to_offset(revoked_at)?,
            reason_code: Some(reason.to_rcgen()),
            invalidity_date: None,
        });
    }
    let params = CertificateRevocationListParams {
        this_update: to_offset(now)?,
        next_update: to_offset(now + Duration::hours(i64::from(next_update_hours)))?,
        crl_number: SerialNumber::from(store::serial_bytes(crl_number)),
        issuing_distribution_point: None,
        revoked_certs,
        key_identifier_method: KeyIdMethod::PreSpecified(signer.ski.clone()),
    };
    Ok(params.signed_by(&signer.cert, &signer.key)?.pem()?)
}
