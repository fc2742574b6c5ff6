//! Server configuration.
//!
//! A single JSON file holds everything the relay needs: the account
//! credentials clients must present, the shared secret echoed in the
//! handshake challenge, and the filesystem locations of the archive and
//! the relay's own ledger. The path comes from `COURIER_CONFIG` or
//! defaults to `courier.json` in the working directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use courier_shared::constants::DEFAULT_RELAY_PORT;

use crate::error::{Result, ServerError};

pub const CONFIG_ENV: &str = "COURIER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "courier.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address the relay listens on.
    pub listen_addr: String,
    /// Account email clients must authenticate with.
    pub account_email: String,
    /// Account password clients must authenticate with.
    pub account_password: String,
    /// Shared secret sent (encrypted) in the handshake challenge.
    pub secret: String,
    /// Protocol build version clients must match exactly.
    pub build_version: i32,
    /// Path to the desktop message archive (read-only).
    pub archive_path: PathBuf,
    /// Path to the relay's own ledger database.
    pub ledger_path: PathBuf,
    /// Directory where decrypted incoming attachments are staged.
    pub temp_dir: PathBuf,
    /// Directory holding the per-action automation scripts.
    pub script_dir: PathBuf,
    /// Archive poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{DEFAULT_RELAY_PORT}"),
            account_email: String::new(),
            account_password: String::new(),
            secret: String::new(),
            build_version: 1,
            archive_path: PathBuf::from("archive.db"),
            ledger_path: PathBuf::from("courier-ledger.db"),
            temp_dir: std::env::temp_dir().join("courier"),
            script_dir: PathBuf::from("scripts"),
            poll_interval_ms: 1_000,
        }
    }
}

impl ServerConfig {
    /// Load the config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| ServerError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path from the environment.
    pub fn path_from_env() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    fn validate(&self) -> Result<()> {
        if self.account_email.is_empty() {
            return Err(ServerError::Config("accountEmail is required".into()));
        }
        if self.account_password.is_empty() {
            return Err(ServerError::Config("accountPassword is required".into()));
        }
        if self.secret.is_empty() {
            return Err(ServerError::Config("secret is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");

        let mut config = ServerConfig::default();
        config.account_email = "me@example.com".to_string();
        config.account_password = "hunter2".to_string();
        config.secret = "shared-secret".to_string();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ServerConfig::load(&path).unwrap();
        assert_eq!(loaded.account_email, "me@example.com");
        assert_eq!(loaded.listen_addr, config.listen_addr);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");
        std::fs::write(&path, "{}").unwrap();

        assert!(matches!(
            ServerConfig::load(&path),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");
        std::fs::write(
            &path,
            r#"{"accountEmail":"me@example.com","accountPassword":"pw","secret":"s"}"#,
        )
        .unwrap();

        let loaded = ServerConfig::load(&path).unwrap();
        assert_eq!(loaded.poll_interval_ms, 1_000);
        assert_eq!(loaded.build_version, 1);
    }
}
