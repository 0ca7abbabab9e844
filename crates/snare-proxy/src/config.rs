use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snare_tls::{AuthorityConfig, CaSubject};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    /// Directory for the root CA, DH parameters, and minted leaves.
    pub cert_dir: PathBuf,
    pub ca_subject: CaSubject,
    pub dh_bits: u32,
    pub rsa_bits: u32,
    pub client_idle_seconds: u64,
    pub server_idle_seconds: u64,
    pub max_header_bytes: usize,
    pub upstream_tls_insecure_skip_verify: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 7077,
            cert_dir: PathBuf::from("certs"),
            ca_subject: CaSubject::default(),
            dh_bits: 2048,
            rsa_bits: 2048,
            client_idle_seconds: 60,
            server_idle_seconds: 15,
            max_header_bytes: 64 * 1024,
            upstream_tls_insecure_skip_verify: false,
        }
    }
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::EmptyListenAddr);
        }
        if self.cert_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyCertDir);
        }
        if self.client_idle_seconds == 0 {
            return Err(ConfigError::ZeroValue("client_idle_seconds"));
        }
        if self.server_idle_seconds == 0 {
            return Err(ConfigError::ZeroValue("server_idle_seconds"));
        }
        if self.max_header_bytes == 0 {
            return Err(ConfigError::ZeroValue("max_header_bytes"));
        }
        Ok(())
    }

    pub fn authority_config(&self) -> AuthorityConfig {
        AuthorityConfig {
            cert_dir: self.cert_dir.clone(),
            subject: self.ca_subject.clone(),
            dh_bits: self.dh_bits,
            rsa_bits: self.rsa_bits,
        }
    }

    pub fn client_idle(&self) -> Duration {
        Duration::from_secs(self.client_idle_seconds)
    }

    pub fn server_idle(&self) -> Duration {
        Duration::from_secs(self.server_idle_seconds)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("listen_addr must not be empty")]
    EmptyListenAddr,
    #[error("cert_dir must not be empty")]
    EmptyCertDir,
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ProxyConfig};

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen_port, 7077);
        assert_eq!(config.client_idle_seconds, 60);
        assert_eq!(config.server_idle_seconds, 15);
        assert_eq!(config.rsa_bits, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_overlays_the_defaults() {
        let config: ProxyConfig =
            serde_json::from_str(r#"{"listen_port": 8081, "server_idle_seconds": 5}"#)
                .expect("parse");
        assert_eq!(config.listen_port, 8081);
        assert_eq!(config.server_idle_seconds, 5);
        assert_eq!(config.client_idle_seconds, 60);
    }

    #[test]
    fn zero_idle_seconds_fail_validation() {
        let config = ProxyConfig {
            client_idle_seconds: 0,
            ..ProxyConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroValue("client_idle_seconds"))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<ProxyConfig, _> = serde_json::from_str(r#"{"listen_prot": 1}"#);
        assert!(parsed.is_err());
    }
}
