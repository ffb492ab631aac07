//! A TOML config holding connection defaults, so passwords can stay off the
//! command line. Command-line flags win over the file.
//!
//! Format of config file:
//! ```rust
//! let cfg = "
//! [connection]
//! host = \"db01.example.com\"
//! user = \"nagios\"
//! password = \"hunter2\"
//! port = 1433
//! timeout = \"20s\"
//! trust_cert = true
//!
//! [state]
//! dir = \"/var/lib/check-mssql\"
//! ";
//! let cfg = check_mssql::parse_config_str(cfg).unwrap();
//! assert_eq!(cfg.connection.port, Some(1433));
//! ```

use std::path::{Path, PathBuf};

use chrono::Duration;
use color_eyre::{
    eyre::{eyre, Context},
    Report,
};
use serde::Deserialize;

pub fn parse_config(config_file: impl AsRef<Path>) -> Result<Config, Report> {
    let path = config_file.as_ref();
    let cfg = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config file {}", path.display()))?;
    parse_config_str(&cfg)
}

pub fn parse_config_str(cfg: &str) -> Result<Config, Report> {
    toml::from_str::<Config>(cfg)
        .wrap_err("TOML file did not match deserialization struct, or was malformed")
}

// rust toml uses serde, so we define structs to deserialize into.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: Connection,
    pub state: State,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub instance: Option<String>,
    pub port: Option<u16>,
    pub trust_cert: Option<bool>,
    #[serde(deserialize_with = "duration_str::deserialize_option_duration_chrono")]
    pub timeout: Option<Duration>,
}

impl Connection {
    pub fn timeout(&self) -> Result<Option<std::time::Duration>, Report> {
        self.timeout
            .map(|t| {
                t.to_std()
                    .map_err(|_| eyre!("connection timeout must not be negative"))
            })
            .transpose()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct State {
    /// Where rate metrics keep their previous samples.
    pub dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_all_defaults() {
        let cfg = parse_config_str("").unwrap();
        assert!(cfg.connection.host.is_none());
        assert!(cfg.connection.timeout().unwrap().is_none());
        assert!(cfg.state.dir.is_none());
    }

    #[test]
    fn full_config() {
        let cfg = parse_config_str(
            r#"
[connection]
host = "db01"
user = "nagios"
password = "secret"
instance = "SQLEXPRESS"
timeout = "1m"

[state]
dir = "/tmp/check-mssql"
"#,
        )
        .unwrap();
        assert_eq!(cfg.connection.host.as_deref(), Some("db01"));
        assert_eq!(cfg.connection.instance.as_deref(), Some("SQLEXPRESS"));
        assert_eq!(
            cfg.connection.timeout().unwrap(),
            Some(std::time::Duration::from_secs(60))
        );
        assert_eq!(cfg.state.dir, Some(PathBuf::from("/tmp/check-mssql")));
    }

    #[test]
    fn malformed_config_is_rejected() {
        assert!(parse_config_str("[connection]\nport = \"not a port\"").is_err());
        assert!(parse_config_str("[connection]\ntimeout = \"soon\"").is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_config(dir.path().join("absent.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }
}
