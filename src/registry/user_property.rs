//! Ownership checked against properties of the external user record.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::types::CertificateView;
use crate::cert::{parse, CertEncoding, ParsedCertificate};
use crate::error::{SchemeError, SchemeResult};

/// Read access to user records owned by the identity backend.
pub trait UserDirectory: Send + Sync {
    /// Value of property `name` on user `username`.
    ///
    /// `Ok(None)` covers both an unknown user and an unset property.
    fn property(&self, username: &str, name: &str) -> Result<Option<Value>>;
}

/// In-memory [`UserDirectory`].
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object `{ "username": { "property": value } }`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let users = value
            .as_object()
            .ok_or_else(|| anyhow!("user directory must be a JSON object"))?;

        let directory = Self::new();
        for (username, properties) in users {
            let properties = properties
                .as_object()
                .ok_or_else(|| anyhow!("properties of user '{}' must be a JSON object", username))?;
            for (name, value) in properties {
                directory.set_property(username, name, value.clone())?;
            }
        }
        Ok(directory)
    }

    pub fn set_property(&self, username: &str, name: &str, value: Value) -> Result<()> {
        let mut users = self
            .users
            .write()
            .map_err(|_| anyhow!("User directory lock poisoned"))?;
        users
            .entry(username.to_string())
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn property(&self, username: &str, name: &str) -> Result<Option<Value>> {
        let users = self
            .users
            .read()
            .map_err(|_| anyhow!("User directory lock poisoned"))?;
        Ok(users.get(username).and_then(|props| props.get(name)).cloned())
    }
}

/// UserProperty-mode ownership strategy.
pub struct PropertyOwnership {
    users: Arc<dyn UserDirectory>,
    certificate_property: Option<String>,
    certificate_format: CertEncoding,
    dn_property: Option<String>,
}

/// What the user record says about its certificates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyView {
    /// DN stored in the DN property, if set and non-empty.
    pub dn: Option<String>,
    /// Certificates stored in the certificate property that parse.
    pub certificates: Vec<CertificateView>,
}

impl PropertyOwnership {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        certificate_property: Option<String>,
        certificate_format: CertEncoding,
        dn_property: Option<String>,
    ) -> Self {
        Self {
            users,
            certificate_property,
            certificate_format,
            dn_property,
        }
    }

    /// Whether the user record claims `certificate`.
    ///
    /// A non-empty DN property takes precedence over the certificate property.
    pub fn is_owned(&self, username: &str, certificate: &ParsedCertificate) -> SchemeResult<bool> {
        if let Some(stored_dn) = self.stored_dn(username)? {
            let owned = dn_matches(&stored_dn, &certificate.subject_dn);
            debug!(username = %username, owned, "Checked certificate DN against user property");
            return Ok(owned);
        }

        if self.certificate_property.is_some() {
            let owned = self
                .stored_certificates(username)?
                .iter()
                .any(|stored| stored.id == certificate.id);
            debug!(username = %username, owned, "Checked certificate against user property");
            return Ok(owned);
        }

        Ok(false)
    }

    /// Whether the user record carries any certificate or DN.
    pub fn has_any(&self, username: &str) -> SchemeResult<bool> {
        if self.stored_dn(username)?.is_some() {
            return Ok(true);
        }
        Ok(!self.stored_certificates(username)?.is_empty())
    }

    /// Resolved view of the user's properties.
    pub fn view(&self, username: &str) -> SchemeResult<PropertyView> {
        Ok(PropertyView {
            dn: self.stored_dn(username)?,
            certificates: self
                .stored_certificates(username)?
                .iter()
                .map(CertificateView::from)
                .collect(),
        })
    }

    fn stored_dn(&self, username: &str) -> SchemeResult<Option<String>> {
        let Some(ref name) = self.dn_property else {
            return Ok(None);
        };
        let value = self
            .users
            .property(username, name)
            .map_err(SchemeError::Storage)?;
        Ok(match value {
            Some(Value::String(dn)) if !dn.is_empty() => Some(dn),
            Some(Value::Array(values)) => values
                .into_iter()
                .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(String::from)),
            _ => None,
        })
    }

    fn stored_certificates(&self, username: &str) -> SchemeResult<Vec<ParsedCertificate>> {
        let Some(ref name) = self.certificate_property else {
            return Ok(Vec::new());
        };
        let value = self
            .users
            .property(username, name)
            .map_err(SchemeError::Storage)?;

        let encoded: Vec<String> = match value {
            Some(Value::String(s)) => vec![s],
            Some(Value::Array(values)) => values
                .into_iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        };

        let mut certificates = Vec::with_capacity(encoded.len());
        for raw in encoded.iter().filter(|s| !s.trim().is_empty()) {
            match parse(raw.as_bytes(), self.certificate_format) {
                Ok(certificate) => certificates.push(certificate),
                Err(e) => {
                    warn!(username = %username, property = %name, error = %e, "Skipping unparseable certificate in user property");
                }
            }
        }
        Ok(certificates)
    }
}

/// Case-insensitive comparison of the full DN strings.
fn dn_matches(stored: &str, subject: &str) -> bool {
    stored.len() == subject.len() && stored.eq_ignore_ascii_case(subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::parse_der;
    use crate::testutil::TestPki;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::json;

    fn ownership(
        users: Arc<MemoryUserDirectory>,
        certificate_property: Option<&str>,
        format: CertEncoding,
        dn_property: Option<&str>,
    ) -> PropertyOwnership {
        PropertyOwnership::new(
            users,
            certificate_property.map(String::from),
            format,
            dn_property.map(String::from),
        )
    }

    #[test]
    fn test_dn_match_is_case_insensitive() {
        let pki = TestPki::new();
        let leaf = parse_der(&pki.leaf.der).unwrap();
        let users = Arc::new(MemoryUserDirectory::new());
        users.set_property("alice", "dn", json!("cn=ALICE")).unwrap();

        let check = ownership(users, None, CertEncoding::Pem, Some("dn"));
        assert!(check.is_owned("alice", &leaf).unwrap());
    }

    #[test]
    fn test_dn_substring_does_not_match() {
        let pki = TestPki::new();
        let leaf = parse_der(&pki.leaf.der).unwrap();
        let users = Arc::new(MemoryUserDirectory::new());
        // strict substring of "CN=alice"
        users.set_property("alice", "dn", json!("CN=alic")).unwrap();
        users.set_property("mallory", "dn", json!("CN=alice,O=extra")).unwrap();

        let check = ownership(users, None, CertEncoding::Pem, Some("dn"));
        assert!(!check.is_owned("alice", &leaf).unwrap());
        assert!(!check.is_owned("mallory", &leaf).unwrap());
        assert!(!check.is_owned("nobody", &leaf).unwrap());
    }

    #[test]
    fn test_certificate_property_pem_array() {
        let pki = TestPki::new();
        let leaf = parse_der(&pki.leaf.der).unwrap();
        let users = Arc::new(MemoryUserDirectory::new());
        users
            .set_property(
                "alice",
                "certs",
                json!(["garbage", pki.other_leaf.pem, pki.leaf.pem]),
            )
            .unwrap();

        let check = ownership(users, Some("certs"), CertEncoding::Pem, None);
        assert!(check.is_owned("alice", &leaf).unwrap());
        assert!(check.has_any("alice").unwrap());
        // the unparseable entry is skipped
        assert_eq!(check.view("alice").unwrap().certificates.len(), 2);

        let other = parse_der(&pki.stranger.der).unwrap();
        assert!(!check.is_owned("alice", &other).unwrap());
    }

    #[test]
    fn test_certificate_property_der() {
        let pki = TestPki::new();
        let leaf = parse_der(&pki.leaf.der).unwrap();
        let users = Arc::new(MemoryUserDirectory::new());
        users
            .set_property("alice", "certs", json!(STANDARD.encode(&pki.leaf.der)))
            .unwrap();

        let check = ownership(users, Some("certs"), CertEncoding::Der, None);
        assert!(check.is_owned("alice", &leaf).unwrap());
    }

    #[test]
    fn test_dn_property_takes_precedence() {
        let pki = TestPki::new();
        let leaf = parse_der(&pki.leaf.der).unwrap();
        let users = Arc::new(MemoryUserDirectory::new());
        users.set_property("alice", "dn", json!("CN=bob")).unwrap();
        users.set_property("alice", "certs", json!(pki.leaf.pem)).unwrap();

        let check = ownership(users.clone(), Some("certs"), CertEncoding::Pem, Some("dn"));
        assert!(!check.is_owned("alice", &leaf).unwrap());

        // empty DN falls through to the certificate property
        users.set_property("alice", "dn", json!("")).unwrap();
        assert!(check.is_owned("alice", &leaf).unwrap());
    }

    #[test]
    fn test_view_and_has_any() {
        let users = Arc::new(MemoryUserDirectory::new());
        users.set_property("alice", "dn", json!("CN=alice")).unwrap();
        let check = ownership(users, Some("certs"), CertEncoding::Pem, Some("dn"));

        let view = check.view("alice").unwrap();
        assert_eq!(view.dn.as_deref(), Some("CN=alice"));
        assert!(view.certificates.is_empty());
        assert!(check.has_any("alice").unwrap());
        assert!(!check.has_any("bob").unwrap());
    }

    #[test]
    fn test_directory_from_json() {
        let directory = MemoryUserDirectory::from_json(&json!({
            "alice": { "dn": "CN=alice" }
        }))
        .unwrap();
        assert_eq!(directory.property("alice", "dn").unwrap(), Some(json!("CN=alice")));
        assert_eq!(directory.property("alice", "missing").unwrap(), None);

        assert!(MemoryUserDirectory::from_json(&json!(["alice"])).is_err());
        assert!(MemoryUserDirectory::from_json(&json!({ "alice": "CN=alice" })).is_err());
    }
}
