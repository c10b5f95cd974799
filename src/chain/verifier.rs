//! Client certificate path validation against the CA chain graph.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use x509_parser::prelude::*;

use super::graph::CaChainGraph;
use crate::cert::ParsedCertificate;
use crate::error::{SchemeError, SchemeResult};

/// Outcome of a trust check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum TrustDecision {
    /// The leaf chains to a configured root. `path` lists subject DNs leaf first.
    Accepted { path: Vec<String> },
    /// The leaf does not chain to a configured root.
    Rejected { rejection: Rejection },
}

impl TrustDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TrustDecision::Accepted { .. })
    }
}

/// Why a certificate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// No configured CA has the leaf's issuer DN.
    NoPath { issuer_dn: String },
    /// A path exists but failed validation.
    Invalid { reasons: Vec<String> },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::NoPath { issuer_dn } => write!(f, "no CA path for issuer {}", issuer_dn),
            Rejection::Invalid { reasons } => write!(f, "{}", reasons.join("; ")),
        }
    }
}

/// Verify that `leaf` chains to a root of `graph`.
///
/// The first node without an issuer reached while walking up from the leaf's
/// issuer is the trust anchor, even if other roots exist in the graph.
pub fn verify(
    graph: &CaChainGraph,
    leaf: &ParsedCertificate,
    now: DateTime<Utc>,
) -> SchemeResult<TrustDecision> {
    let Some(start) = graph.find_by_dn(&leaf.issuer_dn) else {
        debug!(issuer_dn = %leaf.issuer_dn, "No configured CA matches certificate issuer");
        return Ok(TrustDecision::Rejected {
            rejection: Rejection::NoPath {
                issuer_dn: leaf.issuer_dn.clone(),
            },
        });
    };

    let mut path_der: Vec<&[u8]> = vec![leaf.der.as_slice()];
    let mut path_dn = vec![leaf.subject_dn.clone()];
    for index in graph.walk_to_root(start) {
        let node = graph.node(index).ok_or_else(|| {
            SchemeError::Internal(format!("CA chain index {} out of range", index))
        })?;
        path_der.push(node.certificate.der.as_slice());
        path_dn.push(node.dn.clone());
    }

    let reasons = validate_path(&path_der, &path_dn, now.timestamp())?;
    if reasons.is_empty() {
        debug!(path = ?path_dn, "Certificate chain accepted");
        Ok(TrustDecision::Accepted { path: path_dn })
    } else {
        debug!(path = ?path_dn, reasons = ?reasons, "Certificate chain rejected");
        Ok(TrustDecision::Rejected {
            rejection: Rejection::Invalid { reasons },
        })
    }
}

/// Validate `[leaf, .., anchor]` and return every failure found.
///
/// An `Err` means validation could not run at all; an empty `Ok` vector
/// means the path is valid.
fn validate_path(path: &[&[u8]], subjects: &[String], now_ts: i64) -> SchemeResult<Vec<String>> {
    let parsed = path
        .iter()
        .enumerate()
        .map(|(depth, der)| {
            X509Certificate::from_der(der).map(|(_, cert)| cert).map_err(|e| {
                SchemeError::Internal(format!(
                    "failed to re-parse certificate at depth {}: {:?}",
                    depth, e
                ))
            })
        })
        .collect::<SchemeResult<Vec<_>>>()?;

    let mut errors = Vec::new();
    check_time_validity(&parsed, subjects, now_ts, &mut errors);
    check_issuers_are_cas(&parsed, subjects, &mut errors);
    check_signatures(&parsed, subjects, &mut errors);
    Ok(errors)
}

fn check_time_validity(
    parsed: &[X509Certificate<'_>],
    subjects: &[String],
    now_ts: i64,
    errors: &mut Vec<String>,
) {
    for (depth, (cert, subject)) in parsed.iter().zip(subjects).enumerate() {
        if now_ts < cert.validity().not_before.timestamp() {
            errors.push(format!(
                "certificate at depth {} ({}) is not yet valid",
                depth, subject
            ));
        }
        if now_ts >= cert.validity().not_after.timestamp() {
            errors.push(format!("certificate at depth {} ({}) has expired", depth, subject));
        }
    }
}

fn check_issuers_are_cas(
    parsed: &[X509Certificate<'_>],
    subjects: &[String],
    errors: &mut Vec<String>,
) {
    for (depth, (cert, subject)) in parsed.iter().zip(subjects).enumerate().skip(1) {
        match cert.basic_constraints() {
            Ok(Some(bc)) if !bc.value.ca => errors.push(format!(
                "certificate at depth {} ({}) is not a CA but is used as issuer",
                depth, subject
            )),
            Ok(Some(_)) => {}
            // v1 certificates predate extensions and are accepted as issuers
            Ok(None) if cert.version().0 >= 2 => errors.push(format!(
                "certificate at depth {} ({}) lacks basic constraints but is used as issuer",
                depth, subject
            )),
            Ok(None) => {}
            Err(e) => errors.push(format!(
                "certificate at depth {} ({}) has invalid basic constraints: {}",
                depth, subject, e
            )),
        }

        if let Ok(Some(ku)) = cert.key_usage() {
            if !ku.value.key_cert_sign() {
                errors.push(format!(
                    "certificate at depth {} ({}) is a CA but key usage lacks keyCertSign",
                    depth, subject
                ));
            }
        }
    }
}

fn check_signatures(parsed: &[X509Certificate<'_>], subjects: &[String], errors: &mut Vec<String>) {
    for (depth, (child, parent)) in parsed.iter().zip(parsed.iter().skip(1)).enumerate() {
        if let Err(e) = child.verify_signature(Some(parent.public_key())) {
            errors.push(format!(
                "signature verification failed ({} -> {}): {}",
                subjects[depth],
                subjects[depth + 1],
                e
            ));
        }
    }
}
