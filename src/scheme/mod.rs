//! Scheme controller and its contract with the orchestrator.

pub mod config;
pub mod contract;
pub mod controller;
pub mod request;

pub use config::{CertSource, SchemeConfig, SchemeConfigJson, StorageMode};
pub use contract::{AuthScheme, CanUse, RegisterOutcome, RegistrationView, SchemeMetadata};
pub use controller::{CertificateScheme, SchemeCollaborators};
pub use request::{RegisterCommand, SchemeRequest};
