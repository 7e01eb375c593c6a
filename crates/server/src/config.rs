use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;

#[derive(Debug)]
pub enum ConfigError {
    Io,
    Parse,
    Missing,
    Invalid,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io => write!(f, "configuration io failure"),
            Self::Parse => write!(f, "configuration parse failure"),
            Self::Missing => write!(f, "configuration key missing"),
            Self::Invalid => write!(f, "configuration value invalid"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Clone)]
pub struct ServerConfig {
    pub postgres_dsn: String,
    pub sweep_interval_secs: u64,
}

/// Loads server configuration from the filesystem with environment
/// overrides (`CAMARADE_PG_DSN`, `CAMARADE_SWEEP_INTERVAL_SECS`).
pub fn load_configuration(path: &Path) -> Result<ServerConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|_| ConfigError::Io)?;
    parse_configuration(&contents)
}

fn parse_configuration(contents: &str) -> Result<ServerConfig, ConfigError> {
    let mut section = String::new();
    let mut map = HashMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            section = trimmed
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            continue;
        }
        let parts: Vec<&str> = trimmed.splitn(2, '=').collect();
        if parts.len() != 2 {
            return Err(ConfigError::Parse);
        }
        let key = if section.is_empty() {
            parts[0].trim().to_string()
        } else {
            format!("{}.{}", section, parts[0].trim())
        };
        let mut value = parts[1].trim().to_string();
        if let Some(idx) = value.find('#') {
            value.truncate(idx);
            value = value.trim().to_string();
        }
        let value = value.trim_matches('"').to_string();
        map.insert(key, value);
    }
    let postgres_dsn = env::var("CAMARADE_PG_DSN")
        .ok()
        .or_else(|| map.get("storage.postgres_dsn").cloned())
        .ok_or(ConfigError::Missing)?;
    if postgres_dsn.is_empty() {
        return Err(ConfigError::Invalid);
    }
    let sweep_interval_secs = match env::var("CAMARADE_SWEEP_INTERVAL_SECS")
        .ok()
        .or_else(|| map.get("views.sweep_interval_secs").cloned())
    {
        Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::Invalid)?,
        None => DEFAULT_SWEEP_INTERVAL_SECS,
    };
    if sweep_interval_secs == 0 {
        return Err(ConfigError::Invalid);
    }
    Ok(ServerConfig {
        postgres_dsn,
        sweep_interval_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_defaults() {
        let config = parse_configuration(
            "# lobby service\n[storage]\npostgres_dsn = \"postgres://localhost/camarade\"\n",
        )
        .expect("valid configuration");
        assert_eq!(config.postgres_dsn, "postgres://localhost/camarade");
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
    }

    #[test]
    fn parses_sweep_interval_with_inline_comment() {
        let config = parse_configuration(
            "[storage]\npostgres_dsn = postgres://localhost/camarade\n[views]\nsweep_interval_secs = 5 # ticks\n",
        )
        .expect("valid configuration");
        assert_eq!(config.sweep_interval_secs, 5);
    }

    #[test]
    fn rejects_missing_dsn_and_zero_interval() {
        assert!(matches!(
            parse_configuration(""),
            Err(ConfigError::Missing)
        ));
        assert!(matches!(
            parse_configuration(
                "[storage]\npostgres_dsn = x\n[views]\nsweep_interval_secs = 0\n"
            ),
            Err(ConfigError::Invalid)
        ));
    }
}
