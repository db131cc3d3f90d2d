use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Unix socket of the scanning multiplexor
    pub scanner_socket: PathBuf,
    /// Root under which per-message `mdefang-<id>` directories are created
    pub spool_dir: PathBuf,
    /// Keep spool directories after the transaction (debugging)
    pub keep_spool: bool,
    /// Ask the scanner about HELO/EHLO identities
    pub helo_check: bool,
    /// Append an X-Scanned-By header to every scanned message
    pub x_scanned_by: bool,
    pub scanner_name: String,
    /// No timeout when unset; a hung scanner then stalls the phase
    pub scanner_timeout_seconds: Option<u64>,
    /// Upper bound on a single scanner response
    pub max_response_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scanner_socket: PathBuf::from("/var/spool/MIMEDefang/mimedefang-multiplexor.sock"),
            spool_dir: PathBuf::from("/var/spool/MIMEDefang"),
            keep_spool: false,
            helo_check: false,
            x_scanned_by: false,
            scanner_name: "MIMEDefang".to_string(),
            scanner_timeout_seconds: None,
            max_response_bytes: 65536,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scanner_socket.as_os_str().is_empty() {
            anyhow::bail!("scanner_socket must not be empty");
        }
        if self.spool_dir.as_os_str().is_empty() {
            anyhow::bail!("spool_dir must not be empty");
        }
        if self.max_response_bytes == 0 {
            anyhow::bail!("max_response_bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn scanner_timeout(&self) -> Option<Duration> {
        self.scanner_timeout_seconds.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("helo_check: true\nspool_dir: /tmp/md\n").unwrap();
        assert!(config.helo_check);
        assert_eq!(config.spool_dir, PathBuf::from("/tmp/md"));
        assert_eq!(config.scanner_name, "MIMEDefang");
        assert!(!config.keep_spool);
        assert_eq!(config.scanner_timeout(), None);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<Config, _> = serde_yaml::from_str("no_such_option: 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.yaml");
        let path = path.to_str().unwrap();

        let config = Config {
            x_scanned_by: true,
            scanner_timeout_seconds: Some(30),
            ..Default::default()
        };
        config.to_file(path).unwrap();

        let loaded = Config::from_file(path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.scanner_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_validate_rejects_zero_bound() {
        let config = Config {
            max_response_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
