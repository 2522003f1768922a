use activation::config::{Config as ActivationConfig, ConfigError as ActivationConfigError, Listener};
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    #[serde(flatten)]
    pub common: CommonConfig,
    pub activation: ActivationConfig,
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 3001,
    }
}

impl Config {
    /// Loads and validates the config at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.listener == self.admin_listener {
            return Err(ConfigError::ListenerConflict);
        }
        if let Some(metrics) = &self.common.metrics
            && metrics.statsd_port == 0
        {
            return Err(ActivationConfigError::InvalidPort.into());
        }
        self.activation.validate()?;

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ActivationConfigError),
    #[error("listener and admin_listener cannot share an address")]
    ListenerConflict,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    const MINIMAL: &str = r#"
activation:
    credentials:
        api_key: blt123
        management_token: cs-mgmt
        access_token: cs-access
        org_uid: org1
        project_uid: proj1
    challenge:
        content_type_uid: challenge
        entry_uid: blt_entry
        environment: development
        team_attribute_uid: team_name
"#;

    #[test]
    fn example_config() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.yaml");
        let config = Config::from_file(&path).expect("load example config");

        assert_eq!(config.listener.port, 3000);
        assert_eq!(config.admin_listener.port, 3001);
        assert_eq!(
            config.common.metrics,
            Some(MetricsConfig {
                statsd_host: "127.0.0.1".into(),
                statsd_port: 8125
            })
        );
        assert_eq!(config.common.logging, None);
        assert!(config.activation.credentials.oauth().is_some());
        assert_eq!(config.activation.challenge.environment, "development");
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let tmp = write_tmp_file(MINIMAL);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.listener, Listener::default());
        assert_eq!(config.admin_listener, default_admin_listener());
        assert_eq!(config.common.metrics, None);
        assert_eq!(config.activation.alias_ttl_secs, 300);
    }

    #[test]
    fn missing_credential_is_reported() {
        let tmp = write_tmp_file(&MINIMAL.replace("management_token: cs-mgmt", ""));
        let err = Config::from_file(tmp.path()).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid(ActivationConfigError::MissingCredential("management_token"))
        ));
        assert_eq!(
            err.to_string(),
            "invalid config: missing required credential: management_token"
        );
    }

    #[test]
    fn listener_validation() {
        let conflict = format!(
            "listener: {{host: 127.0.0.1, port: 3001}}\n{MINIMAL}"
        );
        let tmp = write_tmp_file(&conflict);
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ListenerConflict)
        ));

        let zero = format!("admin_listener: {{host: 127.0.0.1, port: 0}}\n{MINIMAL}");
        let tmp = write_tmp_file(&zero);
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Invalid(ActivationConfigError::InvalidPort))
        ));
    }

    #[test]
    fn load_errors() {
        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/dashboard.yaml")),
            Err(ConfigError::LoadError(_))
        ));

        let tmp = write_tmp_file("listener: [not, a, map]");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
