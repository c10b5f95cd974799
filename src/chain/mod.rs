//! CA chain trust.
//!
//! The configured CA certificates form an issuer/subject forest that is
//! built once and then only read. Verification walks that forest from a
//! client certificate's issuer up to a root and validates the resulting path
//! with the root as sole trust anchor.

pub mod graph;
pub mod verifier;

pub use graph::{CaChainEntry, CaChainGraph, CaChainNode};
pub use verifier::{verify, Rejection, TrustDecision};
