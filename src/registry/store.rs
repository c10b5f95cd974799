//! Certificate registry storage backed by redb embedded database.
//!
//! Two tables are kept in step inside every write transaction:
//! - `certificates`: `(mod_name, username, certificate_id)` -> MessagePack<RegistryEntry>
//! - `certificate_owners`: `(mod_name, certificate_id, username)` -> empty, for identification
//!
//! Keys are redb tuples, so no key component can spill into its neighbour
//! whatever characters a username or certificate id holds.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::types::RegistryEntry;

/// `(mod_name, first, second)` composite key.
type Key<'a> = (&'a str, &'a str, &'a str);

/// Primary table: `(mod_name, username, certificate_id)` -> MessagePack<RegistryEntry>.
const CERTIFICATES_TABLE: TableDefinition<Key<'static>, &[u8]> =
    TableDefinition::new("certificates");
/// Secondary index: `(mod_name, certificate_id, username)` -> empty.
const OWNERS_INDEX: TableDefinition<Key<'static>, &[u8]> =
    TableDefinition::new("certificate_owners");

/// Persistence for registry entries, scoped per scheme instance by `mod_name`.
///
/// Implementations provide per-call atomicity: each mutating call either
/// fully applies or leaves the stored state untouched.
pub trait CertificateStore: Send + Sync {
    /// Insert `entry`. Returns `false` without writing if the key already exists.
    fn insert(&self, entry: &RegistryEntry) -> Result<bool>;

    fn get(&self, mod_name: &str, username: &str, certificate_id: &str)
        -> Result<Option<RegistryEntry>>;

    /// All entries of a user, ordered by certificate id.
    fn list(&self, mod_name: &str, username: &str) -> Result<Vec<RegistryEntry>>;

    /// Returns `false` if no such entry exists.
    fn set_enabled(
        &self,
        mod_name: &str,
        username: &str,
        certificate_id: &str,
        enabled: bool,
    ) -> Result<bool>;

    /// Record a successful use. Returns `false` if no such entry exists.
    fn touch(
        &self,
        mod_name: &str,
        username: &str,
        certificate_id: &str,
        at: DateTime<Utc>,
        user_agent: &str,
    ) -> Result<bool>;

    /// Returns `false` if no such entry exists.
    fn remove(&self, mod_name: &str, username: &str, certificate_id: &str) -> Result<bool>;

    /// Remove every entry of a user, returning how many were removed.
    fn remove_all(&self, mod_name: &str, username: &str) -> Result<usize>;

    /// Entries of all users holding `certificate_id`.
    fn find_by_certificate(&self, mod_name: &str, certificate_id: &str)
        -> Result<Vec<RegistryEntry>>;
}

/// [`CertificateStore`] persisted in a redb file.
pub struct RedbCertificateStore {
    db: Database,
}

impl RedbCertificateStore {
    /// Open or create a certificate store at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open certificate database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CERTIFICATES_TABLE)?;
            let _ = write_txn.open_table(OWNERS_INDEX)?;
        }
        write_txn.commit()?;

        let store = Self { db };
        debug!(path = ?path, entries = store.count()?, "Opened certificate store");
        Ok(store)
    }

    /// Total number of entries across all instances and users.
    pub fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CERTIFICATES_TABLE)?;
        Ok(table.len()? as usize)
    }

    /// Read-modify-write one entry in a single transaction.
    fn update<F>(&self, key: Key<'_>, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut RegistryEntry),
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(CERTIFICATES_TABLE)?;
            let current = match table.get(key)? {
                Some(value) => Some(
                    rmp_serde::from_slice::<RegistryEntry>(value.value())
                        .context("Failed to deserialize registry entry")?,
                ),
                None => None,
            };
            match current {
                Some(mut entry) => {
                    apply(&mut entry);
                    let data = rmp_serde::to_vec_named(&entry)
                        .context("Failed to serialize registry entry")?;
                    table.insert(key, data.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }
}

impl CertificateStore for RedbCertificateStore {
    fn insert(&self, entry: &RegistryEntry) -> Result<bool> {
        let key = (
            entry.mod_name.as_str(),
            entry.username.as_str(),
            entry.certificate_id.as_str(),
        );
        let index_key = (
            entry.mod_name.as_str(),
            entry.certificate_id.as_str(),
            entry.username.as_str(),
        );
        let data = rmp_serde::to_vec_named(entry).context("Failed to serialize registry entry")?;

        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(CERTIFICATES_TABLE)?;
            let mut owners = write_txn.open_table(OWNERS_INDEX)?;
            let exists = table.get(key)?.is_some();
            if exists {
                false
            } else {
                table.insert(key, data.as_slice())?;
                owners.insert(index_key, b"".as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    fn get(
        &self,
        mod_name: &str,
        username: &str,
        certificate_id: &str,
    ) -> Result<Option<RegistryEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CERTIFICATES_TABLE)?;
        match table.get((mod_name, username, certificate_id))? {
            Some(value) => Ok(Some(
                rmp_serde::from_slice(value.value())
                    .context("Failed to deserialize registry entry")?,
            )),
            None => Ok(None),
        }
    }

    fn list(&self, mod_name: &str, username: &str) -> Result<Vec<RegistryEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CERTIFICATES_TABLE)?;

        let mut entries = Vec::new();
        for item in table.range((mod_name, username, "")..)? {
            let (key, value) = item?;
            let (key_mod, key_user, certificate_id) = key.value();
            if key_mod != mod_name || key_user != username {
                break;
            }
            match rmp_serde::from_slice::<RegistryEntry>(value.value()) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(error = %e, certificate_id = %certificate_id, "Failed to deserialize registry entry, skipping");
                }
            }
        }
        Ok(entries)
    }

    fn set_enabled(
        &self,
        mod_name: &str,
        username: &str,
        certificate_id: &str,
        enabled: bool,
    ) -> Result<bool> {
        self.update((mod_name, username, certificate_id), |entry| {
            entry.enabled = enabled
        })
    }

    fn touch(
        &self,
        mod_name: &str,
        username: &str,
        certificate_id: &str,
        at: DateTime<Utc>,
        user_agent: &str,
    ) -> Result<bool> {
        self.update((mod_name, username, certificate_id), |entry| {
            entry.last_used = Some(at);
            entry.last_user_agent = user_agent.to_string();
        })
    }

    fn remove(&self, mod_name: &str, username: &str, certificate_id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CERTIFICATES_TABLE)?;
            let mut owners = write_txn.open_table(OWNERS_INDEX)?;
            let removed = table.remove((mod_name, username, certificate_id))?.is_some();
            owners.remove((mod_name, certificate_id, username))?;
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn remove_all(&self, mod_name: &str, username: &str) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CERTIFICATES_TABLE)?;
            let mut owners = write_txn.open_table(OWNERS_INDEX)?;

            let mut certificate_ids = Vec::new();
            for item in table.range((mod_name, username, "")..)? {
                let (key, _) = item?;
                let (key_mod, key_user, certificate_id) = key.value();
                if key_mod != mod_name || key_user != username {
                    break;
                }
                certificate_ids.push(certificate_id.to_string());
            }

            for certificate_id in &certificate_ids {
                table.remove((mod_name, username, certificate_id.as_str()))?;
                owners.remove((mod_name, certificate_id.as_str(), username))?;
            }
            certificate_ids.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn find_by_certificate(
        &self,
        mod_name: &str,
        certificate_id: &str,
    ) -> Result<Vec<RegistryEntry>> {
        let read_txn = self.db.begin_read()?;
        let owners = read_txn.open_table(OWNERS_INDEX)?;
        let table = read_txn.open_table(CERTIFICATES_TABLE)?;

        let mut entries = Vec::new();
        for item in owners.range((mod_name, certificate_id, "")..)? {
            let (key, _) = item?;
            let (key_mod, key_certificate, username) = key.value();
            if key_mod != mod_name || key_certificate != certificate_id {
                break;
            }
            match table.get((mod_name, username, certificate_id))? {
                Some(value) => entries.push(
                    rmp_serde::from_slice::<RegistryEntry>(value.value())
                        .context("Failed to deserialize registry entry")?,
                ),
                None => {
                    warn!(username = %username, certificate_id = %certificate_id, "Dangling certificate owner index entry");
                }
            }
        }
        Ok(entries)
    }
}
