//! Issuer/subject graph of the configured CA certificates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::cert::{parse, CertEncoding, ParsedCertificate};
use crate::error::{SchemeError, SchemeResult};

/// One configured CA certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CaChainEntry {
    /// Label used in logs and errors (the configured file name).
    pub file_name: String,
    /// PEM text of the certificate.
    pub cert_file: String,
}

/// A CA certificate placed in the graph.
#[derive(Debug, Clone)]
pub struct CaChainNode {
    pub label: String,
    pub certificate: ParsedCertificate,
    pub dn: String,
    pub issuer_dn: String,
    /// Index of the node that issued this one. `None` marks a candidate root.
    pub issuer_ref: Option<usize>,
}

impl CaChainNode {
    /// Whether this node is a candidate trust root.
    pub fn is_root(&self) -> bool {
        self.issuer_ref.is_none()
    }
}

/// Arena of CA nodes with a DN lookup table.
#[derive(Debug, Clone, Default)]
pub struct CaChainGraph {
    nodes: Vec<CaChainNode>,
    by_dn: HashMap<String, usize>,
}

impl CaChainGraph {
    /// Build the graph. Any unparseable entry fails the whole build.
    pub fn build(entries: &[CaChainEntry]) -> SchemeResult<Self> {
        let mut nodes = Vec::with_capacity(entries.len());
        let mut by_dn = HashMap::with_capacity(entries.len());

        for entry in entries {
            let certificate = parse(entry.cert_file.as_bytes(), CertEncoding::Pem).map_err(|e| {
                SchemeError::Parameter(format!("ca-chain entry '{}': {}", entry.file_name, e))
            })?;

            let index = nodes.len();
            // first configured node wins a DN collision
            by_dn.entry(certificate.subject_dn.clone()).or_insert(index);

            nodes.push(CaChainNode {
                label: entry.file_name.clone(),
                dn: certificate.subject_dn.clone(),
                issuer_dn: certificate.issuer_dn.clone(),
                certificate,
                issuer_ref: None,
            });
        }

        for node in nodes.iter_mut() {
            if node.issuer_dn.is_empty() || node.issuer_dn == node.dn {
                continue;
            }
            node.issuer_ref = by_dn.get(&node.issuer_dn).copied();
        }

        let graph = Self { nodes, by_dn };
        graph.check_acyclic()?;

        debug!(
            nodes = graph.nodes.len(),
            roots = graph.nodes.iter().filter(|n| n.is_root()).count(),
            "Built CA chain graph"
        );

        Ok(graph)
    }

    /// Number of configured CA certificates.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[CaChainNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&CaChainNode> {
        self.nodes.get(index)
    }

    /// Index of the node whose subject DN is `dn`.
    pub fn find_by_dn(&self, dn: &str) -> Option<usize> {
        self.by_dn.get(dn).copied()
    }

    /// Indexes from `start` up to the first node without an issuer, inclusive.
    pub fn walk_to_root(&self, start: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = Some(start);
        while let Some(index) = current {
            // bounded by the acyclic check done in build()
            if path.len() > self.nodes.len() {
                break;
            }
            path.push(index);
            current = self.nodes.get(index).and_then(|n| n.issuer_ref);
        }
        path
    }

    fn check_acyclic(&self) -> SchemeResult<()> {
        for (start, node) in self.nodes.iter().enumerate() {
            let mut steps = 0;
            let mut current = node.issuer_ref;
            while let Some(index) = current {
                steps += 1;
                if index == start || steps > self.nodes.len() {
                    return Err(SchemeError::Parameter(format!(
                        "ca-chain entry '{}' is part of an issuer cycle",
                        node.label
                    )));
                }
                current = self.nodes[index].issuer_ref;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResultCode;
    use crate::testutil::{ca_cert, TestPki};

    fn entry(name: &str, pem: &str) -> CaChainEntry {
        CaChainEntry {
            file_name: name.to_string(),
            cert_file: pem.to_string(),
        }
    }

    #[test]
    fn test_empty_graph() {
        let graph = CaChainGraph::build(&[]).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.find_by_dn("CN=anything"), None);
    }

    #[test]
    fn test_links_intermediate_to_root() {
        let pki = TestPki::new();
        // intermediate listed first: resolution happens after all nodes exist
        let graph = CaChainGraph::build(&[
            entry("intermediate.pem", &pki.intermediate.pem),
            entry("root.pem", &pki.root.pem),
        ])
        .unwrap();

        assert_eq!(graph.len(), 2);
        let intermediate = graph.find_by_dn("CN=Test Intermediate CA").unwrap();
        let root = graph.find_by_dn("CN=Test Root CA").unwrap();

        assert_eq!(graph.node(intermediate).unwrap().issuer_ref, Some(root));
        assert!(graph.node(root).unwrap().is_root());
        assert_eq!(graph.walk_to_root(intermediate), vec![intermediate, root]);
    }

    #[test]
    fn test_self_signed_root_has_no_issuer_ref() {
        let pki = TestPki::new();
        let graph = CaChainGraph::build(&[entry("root.pem", &pki.root.pem)]).unwrap();
        let root = graph.node(0).unwrap();
        assert_eq!(root.dn, root.issuer_dn);
        assert!(root.is_root());
        assert_eq!(graph.walk_to_root(0), vec![0]);
    }

    #[test]
    fn test_issuer_cycle_is_rejected() {
        let first = ca_cert("Cycle A", Some("Cycle B"));
        let second = ca_cert("Cycle B", Some("Cycle A"));

        let err = CaChainGraph::build(&[entry("a.pem", &first.pem), entry("b.pem", &second.pem)])
            .unwrap_err();
        assert_eq!(err.code(), ResultCode::Parameter);
        assert!(err.to_string().contains("cycle"));

        // either half alone is a plain candidate root
        let graph = CaChainGraph::build(&[entry("a.pem", &first.pem)]).unwrap();
        assert!(graph.node(0).unwrap().is_root());
    }

    #[test]
    fn test_first_configured_node_wins_duplicate_dn() {
        let pki = TestPki::new();
        let rogue = ca_cert("Test Intermediate CA", None);

        let graph = CaChainGraph::build(&[
            entry("intermediate.pem", &pki.intermediate.pem),
            entry("rogue.pem", &rogue.pem),
        ])
        .unwrap();
        assert_eq!(graph.len(), 2);
        let index = graph.find_by_dn("CN=Test Intermediate CA").unwrap();
        assert_eq!(graph.node(index).unwrap().label, "intermediate.pem");

        let graph = CaChainGraph::build(&[
            entry("rogue.pem", &rogue.pem),
            entry("intermediate.pem", &pki.intermediate.pem),
        ])
        .unwrap();
        let index = graph.find_by_dn("CN=Test Intermediate CA").unwrap();
        assert_eq!(graph.node(index).unwrap().label, "rogue.pem");
    }

    #[test]
    fn test_intermediate_without_root_is_candidate_root() {
        let pki = TestPki::new();
        let graph =
            CaChainGraph::build(&[entry("intermediate.pem", &pki.intermediate.pem)]).unwrap();
        assert!(graph.node(0).unwrap().is_root());
    }

    #[test]
    fn test_parse_failure_aborts_build() {
        let pki = TestPki::new();
        let err = CaChainGraph::build(&[
            entry("root.pem", &pki.root.pem),
            entry("broken.pem", "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----"),
        ])
        .unwrap_err();
        assert_eq!(err.code(), ResultCode::Parameter);
        assert!(err.to_string().contains("broken.pem"));
    }
}
