//! Client certificate authentication scheme.
//!
//! Identifies X.509 client certificates by the SHA-256 of their DER
//! encoding, checks them against a configured CA chain and tracks which
//! user owns which certificate, either in a dedicated redb table or in
//! properties of the user record.

pub mod cert;
pub mod chain;
pub mod error;
pub mod registry;
pub mod scheme;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{result_code, ResultCode, SchemeError, SchemeResult};
pub use scheme::{
    AuthScheme, CanUse, CertificateScheme, RegisterCommand, RegisterOutcome, RegistrationView,
    SchemeCollaborators, SchemeConfigJson, SchemeRequest,
};
