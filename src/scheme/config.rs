//! Scheme instance configuration.

use serde::{Deserialize, Serialize};

use crate::cert::CertEncoding;
use crate::chain::CaChainEntry;

/// Where the presented certificate is taken from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertSource {
    /// Peer certificate of the TLS handshake.
    #[default]
    Tls,
    /// Header set by a TLS-terminating proxy.
    Header,
    /// TLS first, header as fallback.
    Both,
}

impl CertSource {
    pub fn uses_tls(&self) -> bool {
        matches!(self, CertSource::Tls | CertSource::Both)
    }

    pub fn uses_header(&self) -> bool {
        matches!(self, CertSource::Header | CertSource::Both)
    }
}

impl std::str::FromStr for CertSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tls" => Ok(CertSource::Tls),
            "header" => Ok(CertSource::Header),
            "both" => Ok(CertSource::Both),
            other => Err(format!(
                "cert-source must be one of TLS, header or both, got '{}'",
                other
            )),
        }
    }
}

/// How certificate ownership is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// Dedicated certificate table.
    Registry,
    /// Properties of the user record.
    UserProperty {
        certificate_property: Option<String>,
        certificate_format: CertEncoding,
        dn_property: Option<String>,
    },
}

/// Validated configuration of a scheme instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeConfig {
    pub cert_source: CertSource,
    /// Set whenever `cert_source` uses the header.
    pub header_name: Option<String>,
    pub storage: StorageMode,
    pub ca_chain: Vec<CaChainEntry>,
    /// Log parsed certificate details at debug level.
    pub log_certs: bool,
}

impl SchemeConfig {
    pub fn uses_scheme_storage(&self) -> bool {
        self.storage == StorageMode::Registry
    }
}

/// Raw JSON configuration as supplied by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchemeConfigJson {
    pub cert_source: Option<String>,
    pub header_name: Option<String>,
    pub use_scheme_storage: Option<bool>,
    pub user_certificate_property: Option<String>,
    pub user_certificate_format: Option<String>,
    pub user_dn_property: Option<String>,
    pub ca_chain: Option<Vec<CaChainEntry>>,
    pub log_certs: Option<bool>,
}

impl SchemeConfigJson {
    /// Validate into a [`SchemeConfig`], collecting every problem found.
    pub fn validate(&self) -> Result<SchemeConfig, Vec<String>> {
        let mut errors = Vec::new();

        let cert_source = match self.cert_source.as_deref() {
            None => CertSource::default(),
            Some(value) => value.parse().unwrap_or_else(|e| {
                errors.push(e);
                CertSource::default()
            }),
        };

        let header_name = non_empty(&self.header_name);
        if cert_source.uses_header() && header_name.is_none() {
            errors.push("header-name is required when cert-source uses the header".to_string());
        }

        let storage = if self.use_scheme_storage.unwrap_or(false) {
            StorageMode::Registry
        } else {
            let certificate_property = non_empty(&self.user_certificate_property);
            let dn_property = non_empty(&self.user_dn_property);
            if certificate_property.is_none() && dn_property.is_none() {
                errors.push(
                    "user-certificate-property or user-dn-property is required without use-scheme-storage"
                        .to_string(),
                );
            }
            let certificate_format = match self.user_certificate_format.as_deref() {
                None => CertEncoding::default(),
                Some(value) => value.parse().unwrap_or_else(|e| {
                    errors.push(e);
                    CertEncoding::default()
                }),
            };
            StorageMode::UserProperty {
                certificate_property,
                certificate_format,
                dn_property,
            }
        };

        let ca_chain = self.ca_chain.clone().unwrap_or_default();
        for (index, entry) in ca_chain.iter().enumerate() {
            if entry.file_name.trim().is_empty() {
                errors.push(format!("ca-chain[{}]: file-name must not be empty", index));
            }
            if entry.cert_file.trim().is_empty() {
                errors.push(format!("ca-chain[{}]: cert-file must not be empty", index));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(SchemeConfig {
            cert_source,
            header_name,
            storage,
            ca_chain,
            log_certs: self.log_certs.unwrap_or(false),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> SchemeConfigJson {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_with_scheme_storage() {
        let cfg = config(json!({ "use-scheme-storage": true })).validate().unwrap();
        assert_eq!(cfg.cert_source, CertSource::Tls);
        assert_eq!(cfg.header_name, None);
        assert_eq!(cfg.storage, StorageMode::Registry);
        assert!(cfg.ca_chain.is_empty());
        assert!(!cfg.log_certs);
    }

    #[test]
    fn test_cert_source_is_case_insensitive() {
        let cfg = config(json!({
            "cert-source": "BOTH",
            "header-name": "X-Client-Cert",
            "use-scheme-storage": true
        }))
        .validate()
        .unwrap();
        assert_eq!(cfg.cert_source, CertSource::Both);
        assert!(cfg.cert_source.uses_tls());
        assert!(cfg.cert_source.uses_header());
        assert_eq!(cfg.header_name.as_deref(), Some("X-Client-Cert"));
    }

    #[test]
    fn test_header_source_requires_header_name() {
        let errors = config(json!({ "cert-source": "header", "use-scheme-storage": true }))
            .validate()
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("header-name"));
    }

    #[test]
    fn test_user_property_mode() {
        let cfg = config(json!({
            "user-certificate-property": "userCertificate",
            "user-certificate-format": "der"
        }))
        .validate()
        .unwrap();
        assert_eq!(
            cfg.storage,
            StorageMode::UserProperty {
                certificate_property: Some("userCertificate".to_string()),
                certificate_format: CertEncoding::Der,
                dn_property: None,
            }
        );
        assert!(!cfg.uses_scheme_storage());
    }

    #[test]
    fn test_collects_every_error() {
        let errors = config(json!({
            "cert-source": "carrier-pigeon",
            "user-certificate-format": "BER",
            "ca-chain": [{ "file-name": "", "cert-file": "" }]
        }))
        .validate()
        .unwrap_err();
        // source, property names, format, two ca-chain fields
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_ca_chain_entries() {
        let cfg = config(json!({
            "use-scheme-storage": true,
            "log-certs": true,
            "ca-chain": [{ "file-name": "root.pem", "cert-file": "-----BEGIN CERTIFICATE-----" }]
        }))
        .validate()
        .unwrap();
        assert_eq!(cfg.ca_chain.len(), 1);
        assert_eq!(cfg.ca_chain[0].file_name, "root.pem");
        assert!(cfg.log_certs);
    }
}
