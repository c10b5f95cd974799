//! Per-request inputs handed to the scheme by the transport.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{SchemeError, SchemeResult};

/// What the transport knows about the current request.
#[derive(Debug, Clone, Default)]
pub struct SchemeRequest {
    /// DER of the TLS peer certificate, when the handshake presented one.
    pub peer_certificate: Option<Vec<u8>>,
    /// Request headers keyed by lowercased name, values in arrival order.
    headers: HashMap<String, Vec<String>>,
}

impl SchemeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer_certificate(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.peer_certificate = Some(der.into());
        self
    }

    /// Append a header value. Names differing only in case share one entry.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut name = name.into();
        name.make_ascii_lowercase();
        self.headers.entry(name).or_default().push(value.into());
        self
    }

    /// First value added for header `name`, whatever case it was added under.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn user_agent(&self) -> &str {
        self.header("User-Agent").unwrap_or_default()
    }
}

/// A registration command, tagged by the `register` field of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "register", rename_all = "kebab-case")]
pub enum RegisterCommand {
    /// Run the validate checks against the presented certificate.
    TestCertificate,
    /// Register the supplied PEM certificate.
    UploadCertificate { x509: String },
    /// Register the certificate presented by the request.
    UseCertificate,
    ToggleCertificate { certificate_id: String, enabled: bool },
    DeleteCertificate { certificate_id: String },
}

impl RegisterCommand {
    /// Parse a register payload. Unknown commands and missing fields are parameter errors.
    pub fn from_json(payload: &serde_json::Value) -> SchemeResult<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| SchemeError::Parameter(format!("invalid register payload: {}", e)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegisterCommand::TestCertificate => "test-certificate",
            RegisterCommand::UploadCertificate { .. } => "upload-certificate",
            RegisterCommand::UseCertificate => "use-certificate",
            RegisterCommand::ToggleCertificate { .. } => "toggle-certificate",
            RegisterCommand::DeleteCertificate { .. } => "delete-certificate",
        }
    }
}
