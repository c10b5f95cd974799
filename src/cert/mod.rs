//! Certificate codec.
//!
//! Turns PEM text, base64-wrapped DER or raw DER into a normalized
//! [`ParsedCertificate`] carrying the stable certificate identifier.

pub mod codec;

pub use codec::{compute_id, parse, parse_der, parse_header_value, CertEncoding, ParsedCertificate};
