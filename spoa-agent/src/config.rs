use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("`bind` must not be empty")]
    EmptyBind,
    #[error("unsupported bind scheme {0:?}, expected `tcp://` or `unix://`")]
    UnsupportedBindScheme(String),
    #[error("invalid bind address {addr:?}: {source}")]
    InvalidBindAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("duplicate application name {0:?}")]
    DuplicateAppName(String),
}

/// A parsed `bind` value, matching `NetworkAddressFromBind`'s two schemes:
/// `tcp://` binds a [`tokio::net::TcpListener`], `unix://` a
/// [`tokio::net::UnixListener`], both through `spoa::Agent`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Bind {
    Tcp(SocketAddr),
    Unix(String),
}

impl fmt::Display for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bind::Tcp(addr) => write!(f, "tcp://{addr}"),
            Bind::Unix(path) => write!(f, "unix://{path}"),
        }
    }
}

fn parse_bind(raw: &str) -> Result<Bind, ConfigError> {
    if let Some(rest) = raw.strip_prefix("tcp://") {
        let addr = rest
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddress {
                addr: rest.to_string(),
                source,
            })?;
        Ok(Bind::Tcp(addr))
    } else if let Some(rest) = raw.strip_prefix("unix://") {
        Ok(Bind::Unix(rest.to_string()))
    } else {
        Err(ConfigError::UnsupportedBindScheme(raw.to_string()))
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// One `[[app]]` table: the WAF rule set (`directives`) bound to a name
/// HAProxy selects via the `app` KV field, plus the per-application runtime
/// settings `application.go`'s `NewApplication` takes as constructor
/// arguments.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default)]
    pub directives: String,
    #[serde(default)]
    pub is_response_check: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub transaction_ttl: Duration,
    #[serde(default)]
    pub log_collection: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct RawConfig {
    bind: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(rename = "app", default)]
    apps: Vec<AppConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The `spoa-agent` process configuration, loaded once at startup and
/// re-read whole on SIGHUP. Grounded in `pkg/model/config.go`'s
/// `Config`/`AppConfig` shape, flattened since the out-of-scope REST/MongoDB
/// config service this agent replaces is now a single TOML file.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind: Bind,
    pub log_level: String,
    pub apps: Vec<AppConfig>,
}

/// What changed (or didn't) between the previous and a freshly-reloaded
/// [`Config`], mirroring `cmd/main.go`'s SIGHUP branch: a bind-address
/// change is rejected outright rather than silently ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    BindChangedRejected,
    Replaced,
}

impl Config {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        if raw.bind.trim().is_empty() {
            return Err(ConfigError::EmptyBind);
        }
        let bind = parse_bind(raw.bind.trim())?;

        let mut seen = HashSet::with_capacity(raw.apps.len());
        for app in &raw.apps {
            if !seen.insert(app.name.clone()) {
                return Err(ConfigError::DuplicateAppName(app.name.clone()));
            }
        }

        Ok(Config {
            bind,
            log_level: raw.log_level,
            apps: raw.apps,
        })
    }

    /// Decides what a SIGHUP reload means relative to `self`: a bind change
    /// is rejected (the caller keeps serving on the old `Config`), anything
    /// else is a full `ApplicationTable` replacement.
    pub fn reload_outcome(&self, new: &Config) -> ReloadOutcome {
        if self.bind != new.bind {
            ReloadOutcome::BindChangedRejected
        } else {
            ReloadOutcome::Replaced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"
            bind = "tcp://0.0.0.0:9000"
            log_level = "debug"

            [[app]]
            name = "site-a"
            directives = "SecRuleEngine On"
            transaction_ttl = "30s"
            is_response_check = true
            log_collection = "firewall_logs_site_a"

            [[app]]
            name = "site-b"
            transaction_ttl = "1m"
        "#
    }

    #[test]
    fn parses_a_well_formed_document() {
        let cfg = Config::parse(sample(), Path::new("test.toml")).unwrap();

        assert_eq!(cfg.bind, Bind::Tcp("0.0.0.0:9000".parse().unwrap()));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.apps.len(), 2);
        assert_eq!(cfg.apps[0].name, "site-a");
        assert_eq!(cfg.apps[0].transaction_ttl, Duration::from_secs(30));
        assert!(cfg.apps[0].is_response_check);
        assert_eq!(cfg.apps[1].transaction_ttl, Duration::from_secs(60));
        assert!(!cfg.apps[1].is_response_check);
        assert_eq!(cfg.apps[1].log_collection, None);
    }

    #[test]
    fn rejects_empty_bind() {
        let text = r#"bind = """#;
        let err = Config::parse(text, Path::new("test.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyBind));
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let text = r#"bind = "http://0.0.0.0:9000""#;
        let err = Config::parse(text, Path::new("test.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedBindScheme(_)));
    }

    #[test]
    fn rejects_duplicate_app_names() {
        let text = r#"
            bind = "tcp://0.0.0.0:9000"

            [[app]]
            name = "site-a"
            transaction_ttl = "30s"

            [[app]]
            name = "site-a"
            transaction_ttl = "30s"
        "#;
        let err = Config::parse(text, Path::new("test.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateAppName(name) if name == "site-a"));
    }

    #[test]
    fn reload_outcome_rejects_bind_changes() {
        let a = Config::parse(sample(), Path::new("test.toml")).unwrap();
        let mut b = a.clone();
        b.bind = Bind::Tcp("0.0.0.0:9001".parse().unwrap());

        assert_eq!(a.reload_outcome(&b), ReloadOutcome::BindChangedRejected);
        assert_eq!(a.reload_outcome(&a.clone()), ReloadOutcome::Replaced);
    }
}
