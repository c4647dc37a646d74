// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Logging configuration accepted by [`init_tracing`], loaded the way the rest of the
/// core's configuration is (spec §2.3): defaults, overridable by a profile file or
/// `RC_LOG_LEVEL`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit newline-delimited JSON instead of the human-readable format. Useful when
    /// the core is embedded in a service that already ships structured logs.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_owned()
}

/// Install a process-global `tracing` subscriber. This is the client library's only
/// ambient side effect; callers embedding the core in their own service are free to
/// skip this and install their own subscriber instead, since every span and event
/// here goes through `tracing` rather than the `log` facade.
///
/// Unlike the server-side setup this core's teacher carries (OpenTelemetry export,
/// `console-subscriber`, Sentry breadcrumbs, a Prometheus scrape endpoint) a client
/// library has no admin port to serve metrics from and no fleet to trace across, so
/// this only wires up formatted output gated by an `EnvFilter`.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), String> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|err| format!("invalid log_level `{}`: {err}", config.log_level))?;

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    // `try_init` fails if a subscriber is already installed; callers that embed this
    // core alongside their own subscriber are expected to hit this and ignore it.
    result.map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_warn_level() {
        let config = LoggingConfig::default();
        assert_eq!(config.log_level, "warn");
        assert!(!config.json);
    }

    #[test]
    fn rejects_invalid_level() {
        let config = LoggingConfig {
            log_level: "not_a_level???".to_owned(),
            json: false,
        };
        assert!(init_tracing(&config).is_err());
    }
}
