//! Certificate registry.
//!
//! Decides whether a certificate belongs to a user. Two strategies exist,
//! chosen once per scheme instance:
//! - scheme storage: a dedicated table of registered certificates
//! - user property: a DN or certificate list stored on the user record

pub mod scheme_storage;
pub mod store;
pub mod types;
pub mod user_property;

pub use scheme_storage::SchemeStorage;
pub use store::{CertificateStore, RedbCertificateStore};
pub use types::{CertificateView, Identification, RegistryEntry};
pub use user_property::{MemoryUserDirectory, PropertyOwnership, PropertyView, UserDirectory};

use crate::cert::ParsedCertificate;
use crate::error::SchemeResult;

/// The ownership strategy of a scheme instance.
pub enum CertificateRegistry {
    Scheme(SchemeStorage),
    UserProperty(PropertyOwnership),
}

impl CertificateRegistry {
    /// Whether `username` owns `certificate` (enabled rows only in scheme storage).
    pub fn is_owned(&self, username: &str, certificate: &ParsedCertificate) -> SchemeResult<bool> {
        match self {
            CertificateRegistry::Scheme(storage) => storage.is_owned(username, certificate),
            CertificateRegistry::UserProperty(ownership) => {
                ownership.is_owned(username, certificate)
            }
        }
    }

    /// Whether `username` owns any certificate (or DN). Disabled rows do not count.
    pub fn has_any(&self, username: &str) -> SchemeResult<bool> {
        match self {
            CertificateRegistry::Scheme(storage) => Ok(!storage.list(username, true)?.is_empty()),
            CertificateRegistry::UserProperty(ownership) => ownership.has_any(username),
        }
    }

    /// Users can register certificates themselves only with scheme storage.
    pub fn allows_self_registration(&self) -> bool {
        matches!(self, CertificateRegistry::Scheme(_))
    }

    pub fn scheme_storage(&self) -> Option<&SchemeStorage> {
        match self {
            CertificateRegistry::Scheme(storage) => Some(storage),
            CertificateRegistry::UserProperty(_) => None,
        }
    }
}
