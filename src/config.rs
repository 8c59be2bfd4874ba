//! Process configuration loaded from the environment.
//!
//! Mirrors the env-var-with-defaults style used throughout this crate's
//! ambient plumbing rather than a config file — this process has no
//! persistent state of its own to load.

use anyhow::{Context, Result};

/// Default bind port when `PORT` is unset.
const DEFAULT_PORT: u16 = 8080;
/// Default Redis endpoint for the notification sink.
const DEFAULT_REDIS_HOST: &str = "127.0.0.1:6379";
const DEFAULT_AWS_REGION: &str = "us-east-1";
const DEFAULT_S3_BUCKET: &str = "streamsignal-media";

/// Runtime configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// TCP port the endpoint dispatcher binds.
    pub port: u16,
    /// Redis address for the optional notification sink.
    pub redis_host: String,
    /// Kept for parity with the media-forwarding collaborator's config
    /// surface; unused by the signaling plane beyond being logged.
    pub aws_region: String,
    pub s3_bucket: String,
}

impl Config {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is set but is not a valid `u16`.
    pub fn load() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {raw}"))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            port,
            redis_host: std::env::var("REDIS_HOST").unwrap_or_else(|_| DEFAULT_REDIS_HOST.into()),
            aws_region: std::env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_AWS_REGION.into()),
            s3_bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| DEFAULT_S3_BUCKET.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_rejects_malformed_port() {
        std::env::set_var("PORT", "not-a-number");
        let result = Config::load();
        std::env::remove_var("PORT");
        assert!(result.is_err());
    }
}
