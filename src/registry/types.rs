//! Registry record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cert::ParsedCertificate;

/// A certificate registered to a user in scheme storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Scheme instance name.
    pub mod_name: String,
    pub username: String,
    pub certificate_id: String,
    /// Subject DN.
    pub dn: String,
    pub issuer_dn: String,
    pub activation: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub enabled: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub last_user_agent: String,
    /// PEM encoding of the registered certificate.
    pub x509: String,
}

impl RegistryEntry {
    /// New enabled entry for `certificate`.
    pub fn new(
        mod_name: &str,
        username: &str,
        certificate: &ParsedCertificate,
        user_agent: &str,
    ) -> Self {
        Self {
            mod_name: mod_name.to_string(),
            username: username.to_string(),
            certificate_id: certificate.id.clone(),
            dn: certificate.subject_dn.clone(),
            issuer_dn: certificate.issuer_dn.clone(),
            activation: certificate.activation,
            expiration: certificate.expiration,
            enabled: true,
            last_used: None,
            last_user_agent: user_agent.to_string(),
            x509: certificate.to_pem(),
        }
    }
}

/// Certificate as shown to the user by `register_get` and `test-certificate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateView {
    pub certificate_id: String,
    pub certificate_dn: String,
    pub certificate_issuer_dn: String,
    pub activation: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_user_agent: String,
}

impl From<&RegistryEntry> for CertificateView {
    fn from(entry: &RegistryEntry) -> Self {
        Self {
            certificate_id: entry.certificate_id.clone(),
            certificate_dn: entry.dn.clone(),
            certificate_issuer_dn: entry.issuer_dn.clone(),
            activation: entry.activation,
            expiration: entry.expiration,
            enabled: entry.enabled,
            last_used: entry.last_used,
            last_user_agent: entry.last_user_agent.clone(),
        }
    }
}

impl From<&ParsedCertificate> for CertificateView {
    fn from(certificate: &ParsedCertificate) -> Self {
        Self {
            certificate_id: certificate.id.clone(),
            certificate_dn: certificate.subject_dn.clone(),
            certificate_issuer_dn: certificate.issuer_dn.clone(),
            activation: certificate.activation,
            expiration: certificate.expiration,
            enabled: true,
            last_used: None,
            last_user_agent: String::new(),
        }
    }
}

/// Result of a reverse lookup from certificate id to username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    /// Exactly one user holds the certificate enabled.
    Identified(String),
    /// Nobody holds it enabled.
    NotFound,
    /// Several users hold it enabled; never guessed.
    Ambiguous(usize),
}
