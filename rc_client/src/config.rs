// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::path::PathBuf;

use grpc_util::observability::LoggingConfig;
use rc_errors::RcError;
use serde::Deserialize;

const DEFAULT_SERVER_URL: &str = "https://api.rc.example.com";
const DEFAULT_ENVIRONMENT: &str = "main";

/// One named profile in the config file, e.g. `[profile.prod]`.
#[derive(Clone, Debug, Default, Deserialize)]
struct Profile {
    token_id: Option<String>,
    token_secret: Option<String>,
    environment: Option<String>,
    server_url: Option<String>,
    log_level: Option<String>,
}

/// The on-disk profile file shape: a `default` profile name plus a table of
/// named profiles, matching the teacher's `InstanceConfig`/`BackendConfig`
/// style of a single `#[derive(Deserialize)]` struct per file.
#[derive(Clone, Debug, Default, Deserialize)]
struct ProfileFile {
    default: Option<String>,
    #[serde(rename = "profile", default)]
    profiles: HashMap<String, Profile>,
}

/// Fully resolved client configuration, after applying every override layer in
/// order: compiled-in defaults, the profile file, environment variables, then
/// whatever the caller passed explicitly to [`crate::Client::new`].
#[derive(Clone, Debug)]
pub struct Config {
    pub token_id: String,
    pub token_secret: String,
    pub environment: String,
    pub server_url: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            token_id: String::new(),
            token_secret: String::new(),
            environment: DEFAULT_ENVIRONMENT.to_owned(),
            server_url: DEFAULT_SERVER_URL.to_owned(),
            log_level: "warn".to_owned(),
        }
    }
}

/// Explicit overrides a caller passes to [`crate::Client::new`]; any `None`
/// field falls through to the environment/profile/default layers below it.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
    pub environment: Option<String>,
    pub server_url: Option<String>,
    pub log_level: Option<String>,
}

fn profile_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("RC_CONFIG_PATH") {
        return Some(PathBuf::from(path));
    }
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".rc").join("config.toml"))
}

fn load_profile() -> Result<Option<Profile>, RcError> {
    let Some(path) = profile_path() else {
        return Ok(None);
    };
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(RcError::Config(format!(
                "failed to read config file {}: {err}",
                path.display()
            )))
        }
    };

    let file: ProfileFile = toml::from_str(&contents)
        .map_err(|err| RcError::Config(format!("failed to parse config file {}: {err}", path.display())))?;

    let Some(active) = file.default else {
        return Ok(None);
    };
    match file.profiles.get(&active) {
        Some(profile) => Ok(Some(profile.clone())),
        None => Err(RcError::Config(format!(
            "config file names default profile `{active}` but no such [profile.{active}] table exists"
        ))),
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Applies every override layer in order and returns the fully resolved
/// configuration. Fails only if the profile file exists but can't be parsed;
/// missing token credentials are left empty for the caller to reject with a
/// more specific error (a bare `Config` load shouldn't require credentials to
/// already be known, e.g. for `--help` style tooling).
pub fn load(overrides: ConfigOverrides) -> Result<Config, RcError> {
    let mut config = Config::default();

    if let Some(profile) = load_profile()? {
        if let Some(v) = profile.token_id {
            config.token_id = v;
        }
        if let Some(v) = profile.token_secret {
            config.token_secret = v;
        }
        if let Some(v) = profile.environment {
            config.environment = v;
        }
        if let Some(v) = profile.server_url {
            config.server_url = v;
        }
        if let Some(v) = profile.log_level {
            config.log_level = v;
        }
    }

    if let Some(v) = env_var("RC_TOKEN_ID") {
        config.token_id = v;
    }
    if let Some(v) = env_var("RC_TOKEN_SECRET") {
        config.token_secret = v;
    }
    if let Some(v) = env_var("RC_ENVIRONMENT") {
        config.environment = v;
    }
    if let Some(v) = env_var("RC_SERVER_URL") {
        config.server_url = v;
    }
    if let Some(v) = env_var("RC_LOG_LEVEL") {
        config.log_level = v;
    }

    if let Some(v) = overrides.token_id {
        config.token_id = v;
    }
    if let Some(v) = overrides.token_secret {
        config.token_secret = v;
    }
    if let Some(v) = overrides.environment {
        config.environment = v;
    }
    if let Some(v) = overrides.server_url {
        config.server_url = v;
    }
    if let Some(v) = overrides.log_level {
        config.log_level = v;
    }

    Ok(config)
}

impl Config {
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            log_level: self.log_level.clone(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_overrides_them() {
        // SAFETY: tests in this module run single-threaded via `--test-threads=1`
        // would be ideal, but since none of them touch real env vars besides
        // `RC_CONFIG_PATH`/`RC_TOKEN_ID` etc., we scope each test to a unique
        // unset env to avoid cross-test interference.
        std::env::remove_var("RC_CONFIG_PATH");
        std::env::remove_var("RC_TOKEN_ID");
        let config = load(ConfigOverrides::default()).expect("load");
        assert_eq!(config.environment, DEFAULT_ENVIRONMENT);
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn explicit_overrides_win_over_everything() {
        std::env::set_var("RC_ENVIRONMENT", "from-env");
        let config = load(ConfigOverrides {
            environment: Some("from-override".to_owned()),
            ..Default::default()
        })
        .expect("load");
        assert_eq!(config.environment, "from-override");
        std::env::remove_var("RC_ENVIRONMENT");
    }

    #[test]
    fn env_vars_win_over_defaults() {
        std::env::set_var("RC_SERVER_URL", "https://from-env.example.com");
        let config = load(ConfigOverrides::default()).expect("load");
        assert_eq!(config.server_url, "https://from-env.example.com");
        std::env::remove_var("RC_SERVER_URL");
    }
}
