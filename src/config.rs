// src/config.rs

use std::{env, path::Path, time::Duration};
use tracing::debug;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_NCUA_BASE_URL: &str = "https://www.ncua.gov/files/publications/analysis";
pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1_000);

/// Load variables from `env_file` (which must exist), else `.env.local`, else `.env`.
/// Variables already present in the process environment win.
pub fn load_env_file(env_file: Option<&Path>) -> Result<(), ConfigError> {
    match env_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::EnvFileMissing(path.to_path_buf()));
            }
            dotenvy::from_path(path).map_err(|e| env_file_error(path, e))?;
            debug!(path = %path.display(), "loaded env file");
        }
        None => {
            let local = Path::new(".env.local");
            if local.exists() {
                dotenvy::from_path(local).map_err(|e| env_file_error(local, e))?;
                debug!("loaded .env.local");
            } else {
                match dotenvy::dotenv() {
                    Ok(path) => debug!(path = %path.display(), "loaded env file"),
                    Err(e) if e.not_found() => {}
                    Err(e) => return Err(env_file_error(Path::new(".env"), e)),
                }
            }
        }
    }
    Ok(())
}

fn env_file_error(path: &Path, e: dotenvy::Error) -> ConfigError {
    ConfigError::EnvFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Import tunables. None of these affect correctness.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ncua_base_url: String,
    pub batch_size: usize,
    /// Wait after a schema cache reload before the first dependent write.
    pub settle: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ncua_base_url: DEFAULT_NCUA_BASE_URL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            settle: DEFAULT_SETTLE,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|k| env::var(k).ok())
    }

    pub fn from_vars<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Self::default();

        if let Some(base) = get("NCUA_BASE_URL").map(|v| clean_value(&v)) {
            if !base.is_empty() {
                s.ncua_base_url = base;
            }
        }
        if let Some(raw) = get("BRONZE_BATCH_SIZE") {
            s.batch_size = match clean_value(&raw).parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidVar {
                        name: "BRONZE_BATCH_SIZE",
                        value: raw,
                    })
                }
            };
        }
        if let Some(raw) = get("BRONZE_SETTLE_MS") {
            let ms = clean_value(&raw)
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidVar {
                    name: "BRONZE_SETTLE_MS",
                    value: raw.clone(),
                })?;
            s.settle = Duration::from_millis(ms);
        }
        Ok(s)
    }
}

/// Where bronze rows are written. Only constructed once the target passes the allow-list.
#[derive(Clone)]
pub struct Destination {
    pub url: String,
    pub service_key: String,
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("url", &self.url)
            .field("service_key", &"<redacted>")
            .finish()
    }
}

impl Destination {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|k| env::var(k).ok())
    }

    pub fn from_vars<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = get("VITE_SUPABASE_URL")
            .map(|v| clean_value(&v))
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVar("VITE_SUPABASE_URL"))?;
        let service_key = get("SUPABASE_SERVICE_ROLE_KEY")
            .map(|v| clean_value(&v))
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVar("SUPABASE_SERVICE_ROLE_KEY"))?;

        let allowed: Vec<String> = get("BRONZE_ALLOWED_PROJECTS")
            .map(|v| {
                clean_value(&v)
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        check_target(&url, &allowed)?;
        Ok(Self { url, service_key })
    }
}

/// Fails closed: an empty allow-list refuses every target.
///
/// An entry matches the whole host or its first label, so `abcdef` admits
/// `https://abcdef.supabase.co` but not `https://abcdefg.supabase.co` or a
/// URL that only mentions `abcdef` in its path.
pub fn check_target(url: &str, allowed: &[String]) -> Result<(), ConfigError> {
    let blocked = || ConfigError::TargetNotAllowed(url.to_string());
    let parsed = Url::parse(url).map_err(|_| blocked())?;
    let host = parsed.host_str().ok_or_else(blocked)?.to_ascii_lowercase();
    let project = host.split('.').next().unwrap_or_default();

    let admitted = allowed.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        entry == host || entry == project
    });
    if admitted {
        Ok(())
    } else {
        Err(blocked())
    }
}

/// Trim whitespace, then one layer of surrounding quotes.
fn clean_value(raw: &str) -> String {
    raw.trim().trim_matches(|c| c == '\'' || c == '"').to_string()
}
