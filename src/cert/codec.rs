//! Certificate parsing and identification.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::{SchemeError, SchemeResult};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Encoding of a certificate handed to [`parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertEncoding {
    /// PEM text with `BEGIN/END CERTIFICATE` markers.
    #[default]
    Pem,
    /// Raw DER, or DER wrapped in base64 text.
    Der,
}

impl std::str::FromStr for CertEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PEM" => Ok(CertEncoding::Pem),
            "DER" => Ok(CertEncoding::Der),
            other => Err(format!("unknown certificate format '{}'", other)),
        }
    }
}

/// Normalized view of an X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    /// Base64 SHA-256 fingerprint of the DER encoding.
    pub id: String,
    /// Subject Distinguished Name.
    pub subject_dn: String,
    /// Issuer Distinguished Name.
    pub issuer_dn: String,
    /// Certificate serial number (hex).
    pub serial: String,
    /// Not valid before.
    pub activation: DateTime<Utc>,
    /// Not valid after.
    pub expiration: DateTime<Utc>,
    /// DER encoding the certificate was parsed from.
    pub der: Vec<u8>,
}

impl ParsedCertificate {
    /// Whether `now` falls in `[activation, expiration)`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.activation && now < self.expiration
    }

    /// Re-encode the certificate as PEM text.
    pub fn to_pem(&self) -> String {
        let body = STANDARD.encode(&self.der);
        let mut pem = String::with_capacity(body.len() + body.len() / 64 + 64);
        pem.push_str(PEM_BEGIN);
        pem.push('\n');
        for line in body.as_bytes().chunks(64) {
            // base64 output is ASCII
            pem.push_str(std::str::from_utf8(line).unwrap_or_default());
            pem.push('\n');
        }
        pem.push_str(PEM_END);
        pem.push('\n');
        pem
    }
}

/// Parse a certificate in the given encoding.
pub fn parse(input: &[u8], encoding: CertEncoding) -> SchemeResult<ParsedCertificate> {
    let der = match encoding {
        CertEncoding::Pem => decode_pem(input)?,
        CertEncoding::Der => decode_der(input)?,
    };
    parse_der(&der)
}

/// Parse a certificate from its DER encoding (e.g. a TLS peer certificate).
pub fn parse_der(der: &[u8]) -> SchemeResult<ParsedCertificate> {
    let (remainder, cert) = X509Certificate::from_der(der).map_err(|e| {
        SchemeError::Parameter(format!("Failed to parse X.509 certificate: {:?}", e))
    })?;
    // the id hashes the whole input, so it must be exactly one certificate
    if !remainder.is_empty() {
        return Err(SchemeError::Parameter(format!(
            "Trailing {} bytes after X.509 certificate",
            remainder.len()
        )));
    }

    let subject_dn = cert.subject().to_string();
    let issuer_dn = cert.issuer().to_string();

    let serial = cert
        .serial
        .to_bytes_be()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":");

    let activation = timestamp(cert.validity().not_before.timestamp())?;
    let expiration = timestamp(cert.validity().not_after.timestamp())?;

    Ok(ParsedCertificate {
        id: compute_id(der)?,
        subject_dn,
        issuer_dn,
        serial,
        activation,
        expiration,
        der: der.to_vec(),
    })
}

/// Parse a certificate carried in an HTTP header by a TLS-terminating proxy.
///
/// Proxies frequently URL-encode the PEM; both PEM and base64 DER are accepted.
pub fn parse_header_value(value: &str) -> SchemeResult<ParsedCertificate> {
    let value = value.trim();

    let decoded = if value.contains('%') {
        urlencoding::decode(value)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    };

    if decoded.contains(PEM_BEGIN) {
        parse(decoded.as_bytes(), CertEncoding::Pem)
    } else {
        parse(decoded.as_bytes(), CertEncoding::Der)
    }
}

/// Compute the stable identifier of a certificate from its DER encoding.
pub fn compute_id(der: &[u8]) -> SchemeResult<String> {
    if der.is_empty() {
        return Err(SchemeError::Internal(
            "Empty DER export while computing certificate id".to_string(),
        ));
    }
    let digest = Sha256::digest(der);
    Ok(STANDARD.encode(digest))
}

fn decode_pem(input: &[u8]) -> SchemeResult<Vec<u8>> {
    let text = std::str::from_utf8(input)
        .map_err(|_| SchemeError::Parameter("PEM certificate is not valid UTF-8".to_string()))?;

    let start = text
        .find(PEM_BEGIN)
        .ok_or_else(|| SchemeError::Parameter("Invalid PEM: missing BEGIN marker".to_string()))?;
    let body_start = start + PEM_BEGIN.len();
    let end = text[body_start..]
        .find(PEM_END)
        .map(|offset| body_start + offset)
        .ok_or_else(|| SchemeError::Parameter("Invalid PEM: missing END marker".to_string()))?;

    let base64_content: String = text[body_start..end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    STANDARD
        .decode(base64_content.as_bytes())
        .map_err(|e| SchemeError::Parameter(format!("Failed to decode PEM base64 content: {}", e)))
}

fn decode_der(input: &[u8]) -> SchemeResult<Vec<u8>> {
    // ASN.1 SEQUENCE tag: already binary DER
    if input.first() == Some(&0x30) {
        return Ok(input.to_vec());
    }

    let compact: Vec<u8> = input
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    STANDARD
        .decode(&compact)
        .map_err(|e| SchemeError::Parameter(format!("Failed to base64 decode certificate: {}", e)))
}

fn timestamp(secs: i64) -> SchemeResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| SchemeError::Parameter(format!("Certificate time out of range: {}", secs)))
}
