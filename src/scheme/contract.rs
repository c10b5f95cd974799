//! Operation contract between the orchestrator and an authentication scheme.

use serde::Serialize;

use super::request::{RegisterCommand, SchemeRequest};
use crate::error::SchemeResult;
use crate::registry::CertificateView;

/// Static description of a scheme, reported when the module is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemeMetadata {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

/// Whether a user can authenticate with this scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanUse {
    /// The user has a certificate (or DN) on record.
    Registered,
    /// Nothing on record yet, but the scheme has no other prerequisite.
    Available,
    /// The lookup failed.
    NotAvailable,
}

/// Result of a successful register command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum RegisterOutcome {
    /// `test-certificate` passed every validate check.
    Tested { certificate: CertificateView },
    /// A certificate was added to scheme storage.
    Registered { certificate: CertificateView },
    Toggled { certificate_id: String, enabled: bool },
    Deleted { certificate_id: String },
}

/// What `register_get` reports about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationView {
    pub certificates: Vec<CertificateView>,
    /// Whether the user may add certificates through `register`.
    pub self_registration: bool,
    /// DN held in the user's DN property.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dn: Option<String>,
}

/// The operation set every authentication scheme exposes.
pub trait AuthScheme: Sized + Send + Sync {
    /// Raw configuration handed to [`AuthScheme::init`].
    type Config;
    /// External services the scheme depends on.
    type Collaborators;

    fn metadata() -> SchemeMetadata;

    /// Create an instance; every configuration problem is reported.
    fn init(
        mod_name: &str,
        config: &Self::Config,
        collaborators: Self::Collaborators,
    ) -> Result<Self, Vec<String>>;

    /// Release the instance.
    fn close(self) {}

    fn can_use(&self, username: &str) -> CanUse;

    fn register(
        &self,
        request: &SchemeRequest,
        username: &str,
        command: RegisterCommand,
    ) -> SchemeResult<RegisterOutcome>;

    fn register_get(&self, username: &str) -> SchemeResult<RegistrationView>;

    fn deregister(&self, username: &str) -> SchemeResult<()>;

    /// Start a challenge. Schemes without one succeed immediately.
    fn trigger(&self, _request: &SchemeRequest, _username: &str) -> SchemeResult<()> {
        Ok(())
    }

    fn validate(&self, request: &SchemeRequest, username: &str) -> SchemeResult<()>;

    /// Resolve the username from the request alone.
    fn identify(&self, request: &SchemeRequest) -> SchemeResult<String>;
}
