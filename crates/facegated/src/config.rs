use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use axum::http::HeaderValue;
use facegate_core::DecodeLimits;
use thiserror::Error;

const DEFAULT_BIND: &str = "0.0.0.0:7860";
const DEFAULT_ALLOWED_ORIGIN: &str = "https://eraiyamuthan-p.github.io";
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_IMAGE_DIM: u32 = 4096;
const DEFAULT_ENGINE_QUEUE: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("FACEGATE_BIND is not a socket address: {0}")]
    InvalidBind(String),
    #[error("FACEGATE_ALLOWED_ORIGIN is not a valid header value: {0}")]
    InvalidOrigin(String),
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:7860).
    pub bind: SocketAddr,
    /// The single origin allowed to call the API cross-origin.
    pub allowed_origin: HeaderValue,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
    /// Largest accepted image width or height, in pixels.
    pub max_image_dim: u32,
    /// Capacity of the request queue in front of the inference thread.
    pub engine_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7860)),
            allowed_origin: HeaderValue::from_static(DEFAULT_ALLOWED_ORIGIN),
            model_dir: facegate_core::default_model_dir(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_image_dim: DEFAULT_MAX_IMAGE_DIM,
            engine_queue: DEFAULT_ENGINE_QUEUE,
        }
    }
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_raw = lookup("FACEGATE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_raw.clone()))?;

        let allowed_origin = match lookup("FACEGATE_ALLOWED_ORIGIN") {
            Some(origin) => HeaderValue::from_str(origin.trim_end_matches('/'))
                .map_err(|_| ConfigError::InvalidOrigin(origin.clone()))?,
            None => defaults.allowed_origin,
        };

        let model_dir = lookup("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_dir);

        Ok(Self {
            bind,
            allowed_origin,
            model_dir,
            max_body_bytes: parse_or(&lookup, "FACEGATE_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            max_image_dim: parse_or(&lookup, "FACEGATE_MAX_IMAGE_DIM", DEFAULT_MAX_IMAGE_DIM),
            engine_queue: parse_or(&lookup, "FACEGATE_ENGINE_QUEUE", DEFAULT_ENGINE_QUEUE).max(1),
        })
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_dim: self.max_image_dim,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparsable value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.allowed_origin, DEFAULT_ALLOWED_ORIGIN);
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.max_image_dim, DEFAULT_MAX_IMAGE_DIM);
        assert_eq!(config.engine_queue, DEFAULT_ENGINE_QUEUE);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("FACEGATE_BIND", "127.0.0.1:9000"),
            ("FACEGATE_ALLOWED_ORIGIN", "http://localhost:3000/"),
            ("FACEGATE_MODEL_DIR", "/opt/models"),
            ("FACEGATE_MAX_BODY_BYTES", "1024"),
            ("FACEGATE_MAX_IMAGE_DIM", "800"),
            ("FACEGATE_ENGINE_QUEUE", "0"),
        ]))
        .unwrap();

        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.allowed_origin, "http://localhost:3000");
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.decode_limits().max_dim, 800);
        assert_eq!(config.engine_queue, 1, "queue capacity is at least 1");
    }

    #[test]
    fn test_unparsable_number_falls_back() {
        let config = Config::from_lookup(lookup(&[("FACEGATE_MAX_BODY_BYTES", "lots")])).unwrap();
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn test_invalid_bind() {
        let err = Config::from_lookup(lookup(&[("FACEGATE_BIND", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBind(_)));
    }

    #[test]
    fn test_invalid_origin() {
        let err = Config::from_lookup(lookup(&[("FACEGATE_ALLOWED_ORIGIN", "bad\norigin")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOrigin(_)));
    }
}
