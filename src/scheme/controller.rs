//! Client certificate authentication scheme.

use arc_swap::ArcSwap;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::{SchemeConfig, SchemeConfigJson, StorageMode};
use super::contract::{AuthScheme, CanUse, RegisterOutcome, RegistrationView, SchemeMetadata};
use super::request::{RegisterCommand, SchemeRequest};
use crate::cert::{parse, parse_der, parse_header_value, CertEncoding, ParsedCertificate};
use crate::chain::{verify, CaChainEntry, CaChainGraph, TrustDecision};
use crate::error::{SchemeError, SchemeResult};
use crate::registry::{
    CertificateRegistry, CertificateStore, CertificateView, Identification, PropertyOwnership,
    SchemeStorage, UserDirectory,
};

/// External services a [`CertificateScheme`] may need.
///
/// Scheme storage needs `store`; user-property ownership needs `users`.
#[derive(Clone, Default)]
pub struct SchemeCollaborators {
    pub store: Option<Arc<dyn CertificateStore>>,
    pub users: Option<Arc<dyn UserDirectory>>,
}

/// A configured instance of the client certificate scheme.
pub struct CertificateScheme {
    mod_name: String,
    config: SchemeConfig,
    ca_chain: ArcSwap<CaChainGraph>,
    registry: CertificateRegistry,
}

impl CertificateScheme {
    pub fn mod_name(&self) -> &str {
        &self.mod_name
    }

    pub fn config(&self) -> &SchemeConfig {
        &self.config
    }

    /// Snapshot of the current CA chain.
    pub fn ca_chain(&self) -> Arc<CaChainGraph> {
        self.ca_chain.load_full()
    }

    /// Replace the CA chain. On failure the current chain stays in place.
    pub fn reload_ca_chain(&self, entries: &[CaChainEntry]) -> SchemeResult<usize> {
        let graph = CaChainGraph::build(entries)?;
        let nodes = graph.len();
        self.ca_chain.store(Arc::new(graph));
        info!(mod_name = %self.mod_name, nodes, "CA chain reloaded");
        Ok(nodes)
    }

    /// Take the certificate from the configured source. TLS wins over the header.
    fn acquire_certificate(&self, request: &SchemeRequest) -> SchemeResult<ParsedCertificate> {
        let source = self.config.cert_source;

        let certificate = match request.peer_certificate.as_deref() {
            Some(der) if source.uses_tls() => parse_der(der)?,
            _ => {
                let header = self
                    .config
                    .header_name
                    .as_deref()
                    .filter(|_| source.uses_header())
                    .and_then(|name| request.header(name))
                    .filter(|value| !value.trim().is_empty())
                    .ok_or_else(|| SchemeError::unauthorized("no client certificate presented"))?;
                parse_header_value(header)?
            }
        };

        if self.config.log_certs {
            debug!(
                certificate_id = %certificate.id,
                subject_dn = %certificate.subject_dn,
                issuer_dn = %certificate.issuer_dn,
                serial = %certificate.serial,
                activation = %certificate.activation,
                expiration = %certificate.expiration,
                "Parsed client certificate"
            );
        }
        Ok(certificate)
    }

    /// Validity window, then the CA chain when one is configured.
    fn check_certificate(&self, certificate: &ParsedCertificate) -> SchemeResult<()> {
        let now = Utc::now();
        if !certificate.is_valid_at(now) {
            debug!(
                certificate_id = %certificate.id,
                activation = %certificate.activation,
                expiration = %certificate.expiration,
                "Certificate outside its validity window"
            );
            return Err(SchemeError::unauthorized("certificate expired or not yet valid"));
        }

        let graph = self.ca_chain.load();
        if graph.is_empty() {
            return Ok(());
        }

        match verify(&graph, certificate, now) {
            Ok(TrustDecision::Accepted { .. }) => Ok(()),
            Ok(TrustDecision::Rejected { rejection }) => {
                debug!(certificate_id = %certificate.id, reason = %rejection, "Certificate not trusted");
                Err(SchemeError::unauthorized(rejection.to_string()))
            }
            Err(e) => {
                warn!(certificate_id = %certificate.id, error = %e, "Certificate chain validation failed");
                Err(e)
            }
        }
    }

    /// Acquire and check the presented certificate.
    fn presented_certificate(&self, request: &SchemeRequest) -> SchemeResult<ParsedCertificate> {
        let certificate = self.acquire_certificate(request)?;
        self.check_certificate(&certificate)?;
        Ok(certificate)
    }

    fn require_owned(&self, username: &str, certificate: &ParsedCertificate) -> SchemeResult<()> {
        if self.registry.is_owned(username, certificate)? {
            Ok(())
        } else {
            debug!(username = %username, certificate_id = %certificate.id, "Certificate not owned by user");
            Err(SchemeError::unauthorized("certificate not registered for user"))
        }
    }

    fn scheme_storage(&self, command: &RegisterCommand) -> SchemeResult<&SchemeStorage> {
        self.registry.scheme_storage().ok_or_else(|| {
            SchemeError::Parameter(format!("{} requires use-scheme-storage", command.name()))
        })
    }

    fn test_certificate(
        &self,
        request: &SchemeRequest,
        username: &str,
    ) -> SchemeResult<RegisterOutcome> {
        let certificate = self.presented_certificate(request)?;
        self.require_owned(username, &certificate)?;

        let view = match self.registry.scheme_storage() {
            Some(storage) => CertificateView::from(&storage.get_by_id(username, &certificate.id)?),
            None => CertificateView::from(&certificate),
        };
        Ok(RegisterOutcome::Tested { certificate: view })
    }
}

impl AuthScheme for CertificateScheme {
    type Config = SchemeConfigJson;
    type Collaborators = SchemeCollaborators;

    fn metadata() -> SchemeMetadata {
        SchemeMetadata {
            name: "cert",
            display_name: "Client certificate",
            description: "Authenticate with an X.509 client certificate",
        }
    }

    fn init(
        mod_name: &str,
        config: &SchemeConfigJson,
        collaborators: SchemeCollaborators,
    ) -> Result<Self, Vec<String>> {
        let config = config.validate()?;
        let mut errors = Vec::new();

        let graph = match CaChainGraph::build(&config.ca_chain) {
            Ok(graph) => graph,
            Err(e) => {
                errors.push(e.to_string());
                CaChainGraph::default()
            }
        };

        let registry = match (&config.storage, collaborators) {
            (StorageMode::Registry, SchemeCollaborators { store: Some(store), .. }) => {
                Some(CertificateRegistry::Scheme(SchemeStorage::new(mod_name, store)))
            }
            (StorageMode::Registry, _) => {
                errors.push("use-scheme-storage requires a certificate store".to_string());
                None
            }
            (
                StorageMode::UserProperty {
                    certificate_property,
                    certificate_format,
                    dn_property,
                },
                SchemeCollaborators { users: Some(users), .. },
            ) => Some(CertificateRegistry::UserProperty(PropertyOwnership::new(
                users,
                certificate_property.clone(),
                *certificate_format,
                dn_property.clone(),
            ))),
            (StorageMode::UserProperty { .. }, _) => {
                errors.push("user property storage requires a user directory".to_string());
                None
            }
        };

        let registry = match registry {
            Some(registry) if errors.is_empty() => registry,
            _ => return Err(errors),
        };

        info!(
            mod_name = %mod_name,
            cert_source = ?config.cert_source,
            scheme_storage = config.uses_scheme_storage(),
            ca_nodes = graph.len(),
            "Certificate scheme initialized"
        );

        Ok(Self {
            mod_name: mod_name.to_string(),
            config,
            ca_chain: ArcSwap::from_pointee(graph),
            registry,
        })
    }

    fn close(self) {
        info!(mod_name = %self.mod_name, "Certificate scheme closed");
    }

    fn can_use(&self, username: &str) -> CanUse {
        match self.registry.has_any(username) {
            Ok(true) => CanUse::Registered,
            Ok(false) => CanUse::Available,
            Err(e) => {
                warn!(username = %username, error = %e, "Failed to look up certificates");
                CanUse::NotAvailable
            }
        }
    }

    fn register(
        &self,
        request: &SchemeRequest,
        username: &str,
        command: RegisterCommand,
    ) -> SchemeResult<RegisterOutcome> {
        debug!(username = %username, command = command.name(), "Register command");

        match command {
            RegisterCommand::TestCertificate => self.test_certificate(request, username),
            RegisterCommand::UploadCertificate { ref x509 } => {
                let storage = self.scheme_storage(&command)?;
                let certificate = parse(x509.as_bytes(), CertEncoding::Pem)?;
                let entry = storage.add(username, &certificate, request.user_agent())?;
                Ok(RegisterOutcome::Registered {
                    certificate: CertificateView::from(&entry),
                })
            }
            RegisterCommand::UseCertificate => {
                let storage = self.scheme_storage(&command)?;
                let certificate = self.presented_certificate(request)?;
                let entry = storage.add(username, &certificate, request.user_agent())?;
                Ok(RegisterOutcome::Registered {
                    certificate: CertificateView::from(&entry),
                })
            }
            RegisterCommand::ToggleCertificate {
                ref certificate_id,
                enabled,
            } => {
                self.scheme_storage(&command)?
                    .toggle(username, certificate_id, enabled)
                    .map_err(SchemeError::not_found_as_parameter)?;
                Ok(RegisterOutcome::Toggled {
                    certificate_id: certificate_id.clone(),
                    enabled,
                })
            }
            RegisterCommand::DeleteCertificate { ref certificate_id } => {
                self.scheme_storage(&command)?
                    .delete(username, certificate_id)
                    .map_err(SchemeError::not_found_as_parameter)?;
                Ok(RegisterOutcome::Deleted {
                    certificate_id: certificate_id.clone(),
                })
            }
        }
    }

    fn register_get(&self, username: &str) -> SchemeResult<RegistrationView> {
        match &self.registry {
            CertificateRegistry::Scheme(storage) => Ok(RegistrationView {
                certificates: storage
                    .list(username, false)?
                    .iter()
                    .map(CertificateView::from)
                    .collect(),
                self_registration: true,
                dn: None,
            }),
            CertificateRegistry::UserProperty(ownership) => {
                let view = ownership.view(username)?;
                Ok(RegistrationView {
                    certificates: view.certificates,
                    self_registration: false,
                    dn: view.dn,
                })
            }
        }
    }

    fn deregister(&self, username: &str) -> SchemeResult<()> {
        if let Some(storage) = self.registry.scheme_storage() {
            storage.delete_all(username)?;
        }
        Ok(())
    }

    fn validate(&self, request: &SchemeRequest, username: &str) -> SchemeResult<()> {
        let certificate = self.presented_certificate(request)?;
        self.require_owned(username, &certificate)?;

        if let Some(storage) = self.registry.scheme_storage() {
            storage.touch_last_used(username, &certificate.id, request.user_agent())?;
        }
        info!(username = %username, certificate_id = %certificate.id, "Client certificate validated");
        Ok(())
    }

    fn identify(&self, request: &SchemeRequest) -> SchemeResult<String> {
        let storage = self
            .registry
            .scheme_storage()
            .ok_or_else(|| SchemeError::unauthorized("identify requires use-scheme-storage"))?;
        let certificate = self.presented_certificate(request)?;

        match storage.identify(&certificate.id)? {
            Identification::Identified(username) => {
                storage.touch_last_used(&username, &certificate.id, request.user_agent())?;
                info!(username = %username, certificate_id = %certificate.id, "Client certificate identified user");
                Ok(username)
            }
            Identification::NotFound => Err(SchemeError::unauthorized(
                "certificate not registered for any user",
            )),
            Identification::Ambiguous(owners) => Err(SchemeError::unauthorized(format!(
                "certificate registered for {} users",
                owners
            ))),
        }
    }
}
