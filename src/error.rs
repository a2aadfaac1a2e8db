//! Error types for certificate authority operations

use thiserror::Error;

/// Result type alias for CA operations
pub type Result<T> = std::result::Result<T, CaError>;

/// Main error type for certificate authority operations
///
/// The message text of the precondition variants is part of the CLI
/// contract and is emitted verbatim on the error stream.
#[derive(Error, Debug)]
pub enum CaError {
    /// Init attempted on a data directory that already holds a CA
    #[error("CA already initialized at {0}")]
    AlreadyInitialized(String),

    /// A command other than init ran against an uninitialized directory
    #[error("CA not initialized")]
    NotInitialized,

    /// CSR input was not a single parseable PKCS#10 PEM block
    #[error("failed to parse CSR from {0}")]
    CsrParse(String),

    /// CSR self-signature did not verify against its embedded public key
    #[error("CSR signature verification failed")]
    CsrSignature,

    /// CSR public key is neither P-256 ECDSA nor RSA-2048
    #[error("unsupported key algorithm in CSR. Supported: ECDSA P-256, RSA 2048")]
    UnsupportedCsrKey,

    /// Revocation target serial is absent from the index
    #[error("certificate with serial {0} not found")]
    SerialNotFound(String),

    /// Revocation target is already revoked
    #[error("certificate with serial {0} is already revoked")]
    AlreadyRevoked(String),

    /// Verification input was not a parseable certificate PEM
    #[error("failed to parse certificate from {0}")]
    CertParse(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate generation errors
    #[error("certificate generation error: {0}")]
    CertGen(#[from] rcgen::Error),

    /// RSA errors
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// PEM parsing errors
    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// On-disk state that does not satisfy the data-directory contract
    #[error("storage error: {0}")]
    Storage(String),
}
