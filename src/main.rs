//! Client certificate scheme administration tool.
//!
//! Manages the certificate registry and runs the scheme's checks against
//! certificate files, printing results as JSON.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use cert_scheme::cert::{parse, CertEncoding, ParsedCertificate};
use cert_scheme::chain::{verify, CaChainGraph};
use cert_scheme::registry::{MemoryUserDirectory, RedbCertificateStore};
use cert_scheme::{
    AuthScheme, CertificateScheme, RegisterCommand, SchemeCollaborators, SchemeConfigJson,
    SchemeRequest, SchemeResult,
};

const PEM_MARKER: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "cert-scheme")]
#[command(about = "Client certificate authentication scheme administration")]
struct Args {
    /// Scheme configuration (JSON). Defaults to scheme storage without a CA chain.
    #[arg(long, env = "CERT_SCHEME_CONFIG")]
    config: Option<PathBuf>,

    /// Certificate registry database
    #[arg(
        long,
        default_value = "/var/lib/cert-scheme/certificates.redb",
        env = "CERT_SCHEME_STORE"
    )]
    store: PathBuf,

    /// User directory (JSON object of username to properties)
    #[arg(long, env = "CERT_SCHEME_USERS")]
    users: Option<PathBuf>,

    /// Scheme instance name
    #[arg(long, default_value = "cert", env = "CERT_SCHEME_MOD")]
    mod_name: String,

    /// Enable verbose logging
    #[arg(short, long, env = "CERT_SCHEME_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the identifier and details of a certificate
    Fingerprint {
        file: PathBuf,
        /// The file holds DER (raw or base64) instead of PEM
        #[arg(long)]
        der: bool,
    },
    /// Check a certificate against the configured CA chain only
    Verify { file: PathBuf },
    /// Register a certificate to a user
    Register {
        #[arg(long)]
        user: String,
        file: PathBuf,
    },
    /// List the certificates of a user
    List {
        #[arg(long)]
        user: String,
    },
    /// Enable or disable a registered certificate
    Toggle {
        #[arg(long)]
        user: String,
        #[arg(long)]
        id: String,
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Remove a registered certificate
    Delete {
        #[arg(long)]
        user: String,
        #[arg(long)]
        id: String,
    },
    /// Run the full validate checks for a user
    Validate {
        #[arg(long)]
        user: String,
        file: PathBuf,
    },
    /// Resolve the user owning a certificate
    Identify { file: PathBuf },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Fingerprint { ref file, der } => {
            let encoding = if der { CertEncoding::Der } else { CertEncoding::Pem };
            let bytes = read_file(file)?;
            let certificate = parse(&bytes, encoding)?;
            print_json(&describe(&certificate))
        }
        Command::Verify { ref file } => {
            let certificate = load_certificate(file)?;
            let graph = CaChainGraph::build(config.ca_chain.as_deref().unwrap_or_default())?;
            if graph.is_empty() {
                return Err(anyhow!("no ca-chain configured"));
            }
            let decision = verify(&graph, &certificate, Utc::now())?;
            print_json(&decision)
        }
        Command::Register { ref user, ref file } => {
            let scheme = open_scheme(&args, &config)?;
            let certificate = load_certificate(file)?;
            let command = RegisterCommand::UploadCertificate {
                x509: certificate.to_pem(),
            };
            emit(scheme.register(&SchemeRequest::new(), user, command))
        }
        Command::List { ref user } => {
            let scheme = open_scheme(&args, &config)?;
            emit(scheme.register_get(user))
        }
        Command::Toggle {
            ref user,
            ref id,
            enabled,
        } => {
            let scheme = open_scheme(&args, &config)?;
            let command = RegisterCommand::ToggleCertificate {
                certificate_id: id.clone(),
                enabled,
            };
            emit(scheme.register(&SchemeRequest::new(), user, command))
        }
        Command::Delete { ref user, ref id } => {
            let scheme = open_scheme(&args, &config)?;
            let command = RegisterCommand::DeleteCertificate {
                certificate_id: id.clone(),
            };
            emit(scheme.register(&SchemeRequest::new(), user, command))
        }
        Command::Validate { ref user, ref file } => {
            let scheme = open_scheme(&args, &config)?;
            let request = presented(&scheme, &load_certificate(file)?);
            emit(scheme.validate(&request, user).map(|()| json!({ "username": user })))
        }
        Command::Identify { ref file } => {
            let scheme = open_scheme(&args, &config)?;
            let request = presented(&scheme, &load_certificate(file)?);
            emit(scheme.identify(&request).map(|username| json!({ "username": username })))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SchemeConfigJson> {
    let Some(path) = path else {
        return Ok(SchemeConfigJson {
            use_scheme_storage: Some(true),
            ..Default::default()
        });
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration: {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid configuration JSON: {:?}", path))
}

fn open_scheme(args: &Args, config: &SchemeConfigJson) -> Result<CertificateScheme> {
    let mut collaborators = SchemeCollaborators::default();

    if config.use_scheme_storage.unwrap_or(false) {
        let store = RedbCertificateStore::open(args.store.clone())?;
        info!(path = ?args.store, "Certificate store opened");
        collaborators.store = Some(Arc::new(store));
    }

    if let Some(ref path) = args.users {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read user directory: {:?}", path))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid user directory JSON: {:?}", path))?;
        collaborators.users = Some(Arc::new(MemoryUserDirectory::from_json(&value)?));
    }

    CertificateScheme::init(&args.mod_name, config, collaborators)
        .map_err(|errors| anyhow!("Invalid configuration: {}", errors.join("; ")))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read certificate: {:?}", path))
}

/// Read a PEM or DER certificate file.
fn load_certificate(path: &Path) -> Result<ParsedCertificate> {
    let bytes = read_file(path)?;
    let encoding = if bytes.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER) {
        CertEncoding::Pem
    } else {
        CertEncoding::Der
    };
    debug!(path = ?path, encoding = ?encoding, "Loading certificate");
    Ok(parse(&bytes, encoding)?)
}

/// Build a request presenting `certificate` through the configured source.
fn presented(scheme: &CertificateScheme, certificate: &ParsedCertificate) -> SchemeRequest {
    let config = scheme.config();
    let mut request = SchemeRequest::new().with_header("User-Agent", "cert-scheme-cli");
    if config.cert_source.uses_tls() {
        request = request.with_peer_certificate(certificate.der.clone());
    }
    if let Some(ref header) = config.header_name {
        request = request.with_header(header.clone(), certificate.to_pem());
    }
    request
}

fn describe(certificate: &ParsedCertificate) -> serde_json::Value {
    json!({
        "certificate_id": certificate.id,
        "subject_dn": certificate.subject_dn,
        "issuer_dn": certificate.issuer_dn,
        "serial": certificate.serial,
        "activation": certificate.activation,
        "expiration": certificate.expiration,
        "valid_now": certificate.is_valid_at(Utc::now()),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print an operation result; failures also fail the process.
fn emit<T: Serialize>(result: SchemeResult<T>) -> Result<()> {
    match result {
        Ok(value) => print_json(&json!({ "result": "ok", "value": value })),
        Err(e) => {
            print_json(&json!({ "result": e.code(), "error": e.to_string() }))?;
            Err(anyhow!("operation failed: {}", e.code()))
        }
    }
}
