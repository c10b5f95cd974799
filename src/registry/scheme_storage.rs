//! Registry-mode operations over a [`CertificateStore`].

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::store::CertificateStore;
use super::types::{Identification, RegistryEntry};
use crate::cert::ParsedCertificate;
use crate::error::{SchemeError, SchemeResult};

/// Certificates registered in the scheme's own table.
pub struct SchemeStorage {
    mod_name: String,
    store: Arc<dyn CertificateStore>,
}

impl SchemeStorage {
    pub fn new(mod_name: impl Into<String>, store: Arc<dyn CertificateStore>) -> Self {
        Self {
            mod_name: mod_name.into(),
            store,
        }
    }

    pub fn mod_name(&self) -> &str {
        &self.mod_name
    }

    /// Whether `username` holds `certificate` enabled.
    pub fn is_owned(&self, username: &str, certificate: &ParsedCertificate) -> SchemeResult<bool> {
        Ok(self
            .get(username, &certificate.id)?
            .map(|entry| entry.enabled)
            .unwrap_or(false))
    }

    /// Register `certificate` to `username`. Duplicates are a client error.
    pub fn add(
        &self,
        username: &str,
        certificate: &ParsedCertificate,
        user_agent: &str,
    ) -> SchemeResult<RegistryEntry> {
        let entry = RegistryEntry::new(&self.mod_name, username, certificate, user_agent);
        let inserted = self.store.insert(&entry).map_err(storage_error)?;
        if !inserted {
            return Err(SchemeError::Parameter(format!(
                "Certificate {} is already registered for this user",
                certificate.id
            )));
        }
        info!(
            username = %username,
            certificate_id = %certificate.id,
            subject_dn = %certificate.subject_dn,
            "Certificate registered"
        );
        Ok(entry)
    }

    pub fn toggle(&self, username: &str, certificate_id: &str, enabled: bool) -> SchemeResult<()> {
        let updated = self
            .store
            .set_enabled(&self.mod_name, username, certificate_id, enabled)
            .map_err(storage_error)?;
        if !updated {
            return Err(not_found(certificate_id));
        }
        info!(username = %username, certificate_id = %certificate_id, enabled, "Certificate toggled");
        Ok(())
    }

    pub fn delete(&self, username: &str, certificate_id: &str) -> SchemeResult<()> {
        let removed = self
            .store
            .remove(&self.mod_name, username, certificate_id)
            .map_err(storage_error)?;
        if !removed {
            return Err(not_found(certificate_id));
        }
        info!(username = %username, certificate_id = %certificate_id, "Certificate deleted");
        Ok(())
    }

    /// Remove every certificate of `username`.
    pub fn delete_all(&self, username: &str) -> SchemeResult<usize> {
        let removed = self
            .store
            .remove_all(&self.mod_name, username)
            .map_err(storage_error)?;
        info!(username = %username, removed, "Certificates deregistered");
        Ok(removed)
    }

    pub fn touch_last_used(
        &self,
        username: &str,
        certificate_id: &str,
        user_agent: &str,
    ) -> SchemeResult<()> {
        let updated = self
            .store
            .touch(&self.mod_name, username, certificate_id, Utc::now(), user_agent)
            .map_err(storage_error)?;
        if !updated {
            return Err(not_found(certificate_id));
        }
        Ok(())
    }

    pub fn list(&self, username: &str, enabled_only: bool) -> SchemeResult<Vec<RegistryEntry>> {
        let mut entries = self
            .store
            .list(&self.mod_name, username)
            .map_err(storage_error)?;
        if enabled_only {
            entries.retain(|entry| entry.enabled);
        }
        Ok(entries)
    }

    pub fn get_by_id(&self, username: &str, certificate_id: &str) -> SchemeResult<RegistryEntry> {
        self.get(username, certificate_id)?
            .ok_or_else(|| not_found(certificate_id))
    }

    /// Resolve the single user holding `certificate_id` enabled.
    pub fn identify(&self, certificate_id: &str) -> SchemeResult<Identification> {
        let mut owners: Vec<String> = self
            .store
            .find_by_certificate(&self.mod_name, certificate_id)
            .map_err(storage_error)?
            .into_iter()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.username)
            .collect();

        Ok(match owners.len() {
            0 => Identification::NotFound,
            1 => Identification::Identified(owners.remove(0)),
            n => {
                warn!(certificate_id = %certificate_id, owners = n, "Certificate is enabled for several users");
                Identification::Ambiguous(n)
            }
        })
    }

    fn get(&self, username: &str, certificate_id: &str) -> SchemeResult<Option<RegistryEntry>> {
        self.store
            .get(&self.mod_name, username, certificate_id)
            .map_err(storage_error)
    }
}

fn storage_error(e: anyhow::Error) -> SchemeError {
    warn!(error = %e, "Certificate store failure");
    SchemeError::Storage(e)
}

fn not_found(certificate_id: &str) -> SchemeError {
    SchemeError::NotFound(format!("Certificate {} not registered for this user", certificate_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::parse_der;
    use crate::error::ResultCode;
    use crate::registry::RedbCertificateStore;
    use crate::testutil::TestPki;
    use tempfile::tempdir;

    fn storage() -> (SchemeStorage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = RedbCertificateStore::open(dir.path().join("certs.redb")).unwrap();
        (SchemeStorage::new("cert", Arc::new(store)), dir)
    }

    #[test]
    fn test_add_duplicate_is_parameter() {
        let (storage, _dir) = storage();
        let pki = TestPki::new();
        let cert = parse_der(&pki.leaf.der).unwrap();

        storage.add("alice", &cert, "ua").unwrap();
        let err = storage.add("alice", &cert, "ua").unwrap_err();
        assert_eq!(err.code(), ResultCode::Parameter);

        // another user can hold the same certificate
        storage.add("bob", &cert, "ua").unwrap();
    }

    #[test]
    fn test_toggle_controls_ownership() {
        let (storage, _dir) = storage();
        let pki = TestPki::new();
        let cert = parse_der(&pki.leaf.der).unwrap();
        storage.add("alice", &cert, "ua").unwrap();
        assert!(storage.is_owned("alice", &cert).unwrap());

        storage.toggle("alice", &cert.id, false).unwrap();
        assert!(!storage.is_owned("alice", &cert).unwrap());
        assert!(storage.list("alice", true).unwrap().is_empty());
        assert_eq!(storage.list("alice", false).unwrap().len(), 1);

        storage.toggle("alice", &cert.id, true).unwrap();
        assert!(storage.is_owned("alice", &cert).unwrap());
    }

    #[test]
    fn test_missing_rows_are_not_found() {
        let (storage, _dir) = storage();
        assert_eq!(storage.toggle("alice", "nope", true).unwrap_err().code(), ResultCode::NotFound);
        assert_eq!(storage.delete("alice", "nope").unwrap_err().code(), ResultCode::NotFound);
        assert_eq!(storage.get_by_id("alice", "nope").unwrap_err().code(), ResultCode::NotFound);
        assert_eq!(
            storage.touch_last_used("alice", "nope", "ua").unwrap_err().code(),
            ResultCode::NotFound
        );
    }

    #[test]
    fn test_touch_updates_last_used() {
        let (storage, _dir) = storage();
        let pki = TestPki::new();
        let cert = parse_der(&pki.leaf.der).unwrap();
        storage.add("alice", &cert, "registrar").unwrap();

        storage.touch_last_used("alice", &cert.id, "browser/1.0").unwrap();
        let entry = storage.get_by_id("alice", &cert.id).unwrap();
        assert!(entry.last_used.is_some());
        assert_eq!(entry.last_user_agent, "browser/1.0");
    }

    #[test]
    fn test_identify() {
        let (storage, _dir) = storage();
        let pki = TestPki::new();
        let cert = parse_der(&pki.leaf.der).unwrap();

        assert_eq!(storage.identify(&cert.id).unwrap(), Identification::NotFound);

        storage.add("alice", &cert, "ua").unwrap();
        assert_eq!(
            storage.identify(&cert.id).unwrap(),
            Identification::Identified("alice".to_string())
        );

        storage.add("bob", &cert, "ua").unwrap();
        assert_eq!(storage.identify(&cert.id).unwrap(), Identification::Ambiguous(2));

        // a disabled row does not count
        storage.toggle("bob", &cert.id, false).unwrap();
        assert_eq!(
            storage.identify(&cert.id).unwrap(),
            Identification::Identified("alice".to_string())
        );
    }

    #[test]
    fn test_commands_cannot_reach_rows_of_similar_usernames() {
        let (storage, _dir) = storage();
        let pki = TestPki::new();
        let cert = parse_der(&pki.leaf.der).unwrap();
        storage.add("alice\u{1f}x", &cert, "ua").unwrap();

        assert!(storage.list("alice", false).unwrap().is_empty());
        let crafted = format!("x\u{1f}{}", cert.id);
        assert_eq!(
            storage.toggle("alice", &crafted, false).unwrap_err().code(),
            ResultCode::NotFound
        );
        assert_eq!(storage.delete_all("alice").unwrap(), 0);

        assert!(storage.is_owned("alice\u{1f}x", &cert).unwrap());
        assert_eq!(storage.list("alice\u{1f}x", false).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_all_is_scoped_to_instance() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn CertificateStore> =
            Arc::new(RedbCertificateStore::open(dir.path().join("certs.redb")).unwrap());
        let first = SchemeStorage::new("cert", store.clone());
        let second = SchemeStorage::new("cert-admin", store);
        let pki = TestPki::new();
        let cert = parse_der(&pki.leaf.der).unwrap();

        first.add("alice", &cert, "ua").unwrap();
        second.add("alice", &cert, "ua").unwrap();

        assert_eq!(first.delete_all("alice").unwrap(), 1);
        assert!(first.list("alice", false).unwrap().is_empty());
        assert_eq!(second.list("alice", false).unwrap().len(), 1);
    }
}
