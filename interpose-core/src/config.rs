//! Runtime limits for the core.
//!
//! The core itself performs no process setup; the host binary builds a
//! [`CoreConfig`] (usually via [`CoreConfig::from_env`]) and hands the relevant
//! parts to the components that need them.

use tracing::warn;

/// Runtime configuration for body buffering and decoding.
///
/// All parameters can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Maximum encoded request body size read from the transport, in bytes.
    pub req_body_max: usize,

    /// Maximum encoded response body size read from the transport, in bytes.
    pub resp_body_max: usize,

    /// Maximum size of a body after decompression, in bytes.
    /// Guards against decompression bombs; exceeding it is a decode error.
    pub decoded_body_max: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            req_body_max: 10 * 1024 * 1024,     // 10 MB
            resp_body_max: 32 * 1024 * 1024,    // 32 MB
            decoded_body_max: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `INTERPOSE_REQ_BODY_MAX` (default: 10485760 = 10MB)
    /// - `INTERPOSE_RESP_BODY_MAX` (default: 33554432 = 32MB)
    /// - `INTERPOSE_DECODED_BODY_MAX` (default: 67108864 = 64MB)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            req_body_max: parse_env_warn("INTERPOSE_REQ_BODY_MAX", default.req_body_max),
            resp_body_max: parse_env_warn("INTERPOSE_RESP_BODY_MAX", default.resp_body_max),
            decoded_body_max: parse_env_warn(
                "INTERPOSE_DECODED_BODY_MAX",
                default.decoded_body_max,
            ),
        }
    }
}

/// Parse an environment variable with a warning on invalid values.
///
/// If the env var is set but cannot be parsed, logs a warning and returns the default.
/// If the env var is not set, returns the default silently.
fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}
