//! cactl CLI - single-operator certificate authority
//!
//! Thin adapter from command-line flags to the CA state engine. Exit codes:
//! 0 success (for `verify`, only a VALID result), 1 operational error or
//! INVALID verification, 2 usage error.

use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cactl::ca::VerifyReport;
use cactl::index::RevocationReason;
use cactl::name::{SanList, SubjectName};
use cactl::store::{atomic_write, MODE_PRIVATE, MODE_PUBLIC};
use cactl::x509::{self, KeyAlgorithm};
use cactl::{CaError, CertificateAuthority};

const EXIT_OK: u8 = 0;
const EXIT_OPERATIONAL: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[derive(Parser)]
#[command(name = "cactl")]
#[command(about = "Single-operator certificate authority over a local data directory", long_about = None)]
#[command(version = cactl::VERSION)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new root CA in the data directory
    Init {
        /// Subject DN, e.g. "CN=Test Root CA,O=Test Org,C=US"
        #[arg(long)]
        subject: String,

        /// Key algorithm: ecdsa-p256 or rsa-2048
        #[arg(long, default_value = "ecdsa-p256")]
        key_algorithm: String,

        /// Validity of the root certificate in days
        #[arg(long, default_value_t = 3650)]
        validity: u32,

        /// CA data directory
        #[arg(long, env = "CA_DATA_DIR", default_value = "./ca-data")]
        data_dir: PathBuf,
    },

    /// Sign a PKCS#10 certificate request
    Sign {
        /// Path to the CSR (PEM)
        csr_path: PathBuf,

        /// Validity of the issued certificate in days
        #[arg(long, default_value_t = 365)]
        validity: u32,

        /// CA data directory
        #[arg(long, env = "CA_DATA_DIR", default_value = "./ca-data")]
        data_dir: PathBuf,
    },

    /// Revoke an issued certificate by serial
    Revoke {
        /// Serial of the certificate to revoke (lowercase hex)
        serial: String,

        /// Revocation reason: unspecified, keyCompromise, affiliationChanged,
        /// superseded or cessationOfOperation
        #[arg(long, default_value = "unspecified")]
        reason: String,

        /// CA data directory
        #[arg(long, env = "CA_DATA_DIR", default_value = "./ca-data")]
        data_dir: PathBuf,
    },

    /// Generate and publish a certificate revocation list
    Crl {
        /// Hours until the published CRL's nextUpdate
        #[arg(long, default_value_t = 24)]
        next_update: u32,

        /// CA data directory
        #[arg(long, env = "CA_DATA_DIR", default_value = "./ca-data")]
        data_dir: PathBuf,
    },

    /// List issued certificates
    List {
        /// CA data directory
        #[arg(long, env = "CA_DATA_DIR", default_value = "./ca-data")]
        data_dir: PathBuf,
    },

    /// Verify a certificate against the CA and its current CRL
    Verify {
        /// Path to the certificate (PEM)
        cert_path: PathBuf,

        /// CA data directory
        #[arg(long, env = "CA_DATA_DIR", default_value = "./ca-data")]
        data_dir: PathBuf,
    },

    /// Generate a key pair and CSR (does not require an initialized CA)
    Request {
        /// Subject DN for the request
        #[arg(long)]
        subject: String,

        /// SAN list, e.g. "DNS:leaf.example.com,IP:10.0.0.5"
        #[arg(long, default_value = "")]
        san: String,

        /// Key algorithm: ecdsa-p256 or rsa-2048
        #[arg(long, default_value = "ecdsa-p256")]
        key_algorithm: String,

        /// Where to write the private key (PEM)
        #[arg(long)]
        out_key: PathBuf,

        /// Where to write the CSR (PEM)
        #[arg(long)]
        out_csr: PathBuf,
    },

    #[command(external_subcommand)]
    External(Vec<String>),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Commands::Init {
            subject,
            key_algorithm,
            validity,
            data_dir,
        } => cmd_init(&subject, &key_algorithm, validity, data_dir),
        Commands::Sign {
            csr_path,
            validity,
            data_dir,
        } => cmd_sign(&csr_path, validity, data_dir),
        Commands::Revoke {
            serial,
            reason,
            data_dir,
        } => cmd_revoke(&serial, &reason, data_dir),
        Commands::Crl {
            next_update,
            data_dir,
        } => cmd_crl(next_update, data_dir),
        Commands::List { data_dir } => cmd_list(data_dir),
        Commands::Verify {
            cert_path,
            data_dir,
        } => cmd_verify(&cert_path, data_dir),
        Commands::Request {
            subject,
            san,
            key_algorithm,
            out_key,
            out_csr,
        } => cmd_request(&subject, &san, &key_algorithm, &out_key, &out_csr),
        Commands::External(args) => {
            let name = args.first().map(String::as_str).unwrap_or("");
            usage_error(format_args!("unknown command {name:?}"))
        }
    };
    ExitCode::from(code)
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn usage_error(message: impl Display) -> u8 {
    eprintln!("{message}");
    EXIT_USAGE
}

fn operational_error(err: CaError) -> u8 {
    eprintln!("{err}");
    EXIT_OPERATIONAL
}

fn cmd_init(subject: &str, key_algorithm: &str, validity: u32, data_dir: PathBuf) -> u8 {
    let subject = match SubjectName::parse(subject) {
        Ok(subject) => subject,
        Err(err) => return usage_error(err),
    };
    let algorithm = match key_algorithm.parse::<KeyAlgorithm>() {
        Ok(algorithm) => algorithm,
        Err(err) => return usage_error(err),
    };
    if validity == 0 {
        return usage_error("validity must be a positive number of days");
    }

    let ca = CertificateAuthority::new(data_dir);
    match ca.init(&subject, algorithm, validity) {
        Ok(out) => {
            println!("Subject: {}", out.subject);
            println!("Algorithm: {}", out.algorithm.display_name());
            println!("Serial: {}", out.serial);
            println!("Not After: {}", out.not_after);
            println!("Certificate path: {}", out.certificate_path.display());
            println!("Key path: {}", out.key_path.display());
            print_key_warning();
            EXIT_OK
        }
        Err(err) => operational_error(err),
    }
}

fn cmd_sign(csr_path: &std::path::Path, validity: u32, data_dir: PathBuf) -> u8 {
    if validity == 0 {
        return usage_error("validity must be a positive number of days");
    }
    let ca = CertificateAuthority::new(data_dir);
    match ca.sign(csr_path, validity) {
        Ok(out) => {
            println!("Serial: {}", out.serial);
            println!("Subject: {}", out.subject);
            println!("Not After: {}", out.not_after);
            println!("Certificate path: {}", out.certificate_path.display());
            EXIT_OK
        }
        Err(err) => operational_error(err),
    }
}

fn cmd_revoke(serial: &str, reason: &str, data_dir: PathBuf) -> u8 {
    let reason = match reason.parse::<RevocationReason>() {
        Ok(reason) => reason,
        Err(err) => return usage_error(err),
    };
    let ca = CertificateAuthority::new(data_dir);
    match ca.revoke(serial, reason) {
        Ok(out) => {
            println!("Serial: {}", out.serial);
            println!("Subject: {}", out.subject);
            println!("Reason: {}", out.reason);
            println!("Revoked At: {}", out.revoked_at);
            EXIT_OK
        }
        Err(err) => operational_error(err),
    }
}

fn cmd_crl(next_update: u32, data_dir: PathBuf) -> u8 {
    if next_update == 0 {
        return usage_error("next-update must be a positive number of hours");
    }
    let ca = CertificateAuthority::new(data_dir);
    match ca.generate_crl(next_update) {
        Ok(out) => {
            println!("CRL path: {}", out.crl_path.display());
            println!("CRL Number: {}", out.crl_number);
            println!("Revoked entries: {}", out.revoked_entries);
            println!("Next Update: {}", out.next_update);
            EXIT_OK
        }
        Err(err) => operational_error(err),
    }
}

fn cmd_list(data_dir: PathBuf) -> u8 {
    let ca = CertificateAuthority::new(data_dir);
    let rows = match ca.list() {
        Ok(rows) => rows,
        Err(err) => return operational_error(err),
    };
    if rows.is_empty() {
        println!("No certificates issued.");
        return EXIT_OK;
    }

    let serial_width = width("SERIAL", rows.iter().map(|r| r.serial.len()));
    let status_width = width("STATUS", rows.iter().map(|r| r.status.len()));
    let after_width = width("NOT AFTER", rows.iter().map(|r| r.not_after.len()));
    println!(
        "{:<serial_width$}  {:<status_width$}  {:<after_width$}  SUBJECT",
        "SERIAL", "STATUS", "NOT AFTER"
    );
    for row in rows {
        println!(
            "{:<serial_width$}  {:<status_width$}  {:<after_width$}  {}",
            row.serial, row.status, row.not_after, row.subject
        );
    }
    EXIT_OK
}

fn width(header: &str, lens: impl Iterator<Item = usize>) -> usize {
    lens.chain(std::iter::once(header.len())).max().unwrap_or(0)
}

fn cmd_verify(cert_path: &std::path::Path, data_dir: PathBuf) -> u8 {
    let ca = CertificateAuthority::new(data_dir);
    match ca.verify(cert_path) {
        Ok(report) => {
            print_verify_report(&report);
            if report.valid {
                EXIT_OK
            } else {
                EXIT_OPERATIONAL
            }
        }
        Err(err) => operational_error(err),
    }
}

fn print_verify_report(report: &VerifyReport) {
    let verdict = if report.valid { "VALID" } else { "INVALID" };
    println!("Certificate verification: {verdict}");
    println!("Subject: {}", report.subject);
    println!("Serial: {}", report.serial);
    println!("Issuer: {}", report.issuer);
    println!("Not Before: {}", report.not_before);
    println!("Not After: {}", report.not_after);
    println!(
        "Signature: {}",
        if report.signature_ok { "OK" } else { "FAILED" }
    );
    if let Some(expiry_ok) = report.expiry_ok {
        println!("Expiry: {}", if expiry_ok { "OK" } else { "FAILED" });
    }
    if let Some(revocation) = &report.revocation {
        println!("Revocation: {revocation}");
    }
}

fn cmd_request(
    subject: &str,
    san: &str,
    key_algorithm: &str,
    out_key: &std::path::Path,
    out_csr: &std::path::Path,
) -> u8 {
    let subject = match SubjectName::parse(subject) {
        Ok(subject) => subject,
        Err(err) => return usage_error(err),
    };
    let san = match SanList::parse(san) {
        Ok(san) => san,
        Err(err) => return usage_error(err),
    };
    let algorithm = match key_algorithm.parse::<KeyAlgorithm>() {
        Ok(algorithm) => algorithm,
        Err(err) => return usage_error(err),
    };

    let result = (|| -> cactl::Result<()> {
        let key = x509::generate_key_pair(algorithm)?;
        let csr_pem = x509::build_csr(&subject, &san, &key)?;
        atomic_write(out_key, key.serialize_pem().as_bytes(), MODE_PRIVATE)?;
        atomic_write(out_csr, csr_pem.as_bytes(), MODE_PUBLIC)?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            println!("Subject: {}", subject.format());
            println!("Algorithm: {}", algorithm.display_name());
            println!("Key path: {}", out_key.display());
            println!("CSR path: {}", out_csr.display());
            print_key_warning();
            EXIT_OK
        }
        Err(err) => operational_error(err),
    }
}

fn print_key_warning() {
    println!("WARNING: the private key file is stored unencrypted; restrict access to it");
}
