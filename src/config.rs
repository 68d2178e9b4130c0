#![forbid(unsafe_code)]

//! Startup configuration for the vidrelay server. Values are resolved once,
//! from CLI overrides, the process environment, and an optional `.env` file,
//! in that order of precedence; handlers never consult the environment
//! themselves.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

/// Everything the server binary needs at runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Single origin allowed to call the API cross-origin. CORS headers are
    /// not emitted when unset.
    pub allowed_origin: Option<String>,
    /// Preferred directory for in-flight download files.
    pub scratch_dir: Option<PathBuf>,
    /// Path or name of the yt-dlp executable.
    pub ytdlp_bin: PathBuf,
}

/// Values supplied on the command line; they win over both the environment
/// and the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub scratch_dir: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn load_config() -> Result<ServerConfig> {
    resolve_config(ConfigOverrides::default())
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<ServerConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_config(&file_vars, env_var, overrides))
}

fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> ServerConfig {
    let host = overrides
        .host
        .filter(|value| !value.trim().is_empty())
        .or_else(|| lookup("VIDRELAY_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup("VIDRELAY_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let allowed_origin =
        lookup("ALLOWED_ORIGIN", file_vars, &env_lookup).filter(|value| !value.trim().is_empty());
    let scratch_dir = overrides
        .scratch_dir
        .or_else(|| lookup("SCRATCH_DIR", file_vars, &env_lookup).map(PathBuf::from));
    let ytdlp_bin = lookup("YTDLP_BIN", file_vars, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));

    ServerConfig {
        host,
        port,
        allowed_origin,
        scratch_dir,
        ytdlp_bin,
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses `KEY=value` lines. `export` prefixes, blank lines, and `#` comments
/// are tolerated; single or double quotes around a value are stripped.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(content.lines().filter_map(parse_env_line).collect())
}

fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let value = strip_quotes(value, '"')
        .or_else(|| strip_quotes(value, '\''))
        .unwrap_or(value);
    Some((key.to_string(), value.to_string()))
}

fn strip_quotes(value: &str, quote: char) -> Option<&str> {
    value.strip_prefix(quote)?.strip_suffix(quote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_env(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    fn config_from(contents: &str) -> ServerConfig {
        let env = make_env(contents);
        let vars = read_env_file(env.path()).unwrap();
        build_config(&vars, |_| None, ConfigOverrides::default())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from("");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.allowed_origin.is_none());
        assert!(config.scratch_dir.is_none());
        assert_eq!(config.ytdlp_bin, PathBuf::from(DEFAULT_YTDLP_BIN));
    }

    #[test]
    fn env_file_values_are_read() {
        let config = config_from(
            "VIDRELAY_HOST=\"127.0.0.1\"\nVIDRELAY_PORT=\"9090\"\nALLOWED_ORIGIN=\"https://app.example\"\nSCRATCH_DIR=\"/var/scratch\"\nYTDLP_BIN=\"/opt/yt-dlp\"\n",
        );
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.allowed_origin.as_deref(), Some("https://app.example"));
        assert_eq!(config.scratch_dir, Some(PathBuf::from("/var/scratch")));
        assert_eq!(config.ytdlp_bin, PathBuf::from("/opt/yt-dlp"));
    }

    #[test]
    fn process_env_beats_the_file() {
        let env = make_env("VIDRELAY_PORT=\"7000\"\n");
        let vars = read_env_file(env.path()).unwrap();
        let config = build_config(
            &vars,
            |key| {
                if key == "VIDRELAY_PORT" {
                    Some("8001".to_string())
                } else {
                    None
                }
            },
            ConfigOverrides::default(),
        );
        assert_eq!(config.port, 8001);
    }

    #[test]
    fn overrides_beat_everything() {
        let env = make_env("VIDRELAY_HOST=\"file-host\"\nSCRATCH_DIR=\"/file\"\n");
        let vars = read_env_file(env.path()).unwrap();
        let config = build_config(
            &vars,
            |key| {
                if key == "VIDRELAY_HOST" {
                    Some("env-host".to_string())
                } else {
                    None
                }
            },
            ConfigOverrides {
                host: Some("cli-host".to_string()),
                port: Some(4242),
                scratch_dir: Some(PathBuf::from("/cli")),
                env_path: None,
            },
        );
        assert_eq!(config.host, "cli-host");
        assert_eq!(config.port, 4242);
        assert_eq!(config.scratch_dir, Some(PathBuf::from("/cli")));
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let config = config_from("VIDRELAY_PORT=\"nope\"\n");
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn blank_origin_counts_as_unset() {
        let config = config_from("ALLOWED_ORIGIN=\"\"\n");
        assert!(config.allowed_origin.is_none());
    }

    #[test]
    fn env_file_handles_export_quotes_and_comments() {
        let env = make_env(
            r#"
            export VIDRELAY_HOST="0.0.0.0"
            SCRATCH_DIR='/tmp/stage'
            VIDRELAY_PORT = 9090
            # a comment
            NOT_AN_ASSIGNMENT
            "#,
        );
        let vars = read_env_file(env.path()).unwrap();
        assert_eq!(vars.get("VIDRELAY_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("SCRATCH_DIR").unwrap(), "/tmp/stage");
        assert_eq!(vars.get("VIDRELAY_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("NOT_AN_ASSIGNMENT"));
    }

    #[test]
    fn missing_env_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("absent.env")).unwrap();
        assert!(vars.is_empty());
    }
}
