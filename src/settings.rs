use std::path::PathBuf;
use std::time::Duration;

use url::Url;

pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000";
pub const DEFAULT_RECONNECT_MS: u64 = 3000;

/// Values picked up from `CHAT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvDefaults {
    pub origin: Option<String>,
    pub identity: Option<String>,
    pub reconnect_ms: Option<u64>,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        Self {
            origin: std::env::var("CHAT_ORIGIN").ok(),
            identity: std::env::var("CHAT_IDENTITY").ok(),
            reconnect_ms: std::env::var("CHAT_RECONNECT_MS").ok().and_then(|v| v.parse().ok()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    pub origin: Option<String>,
    pub identity: Option<String>,
    pub reconnect_ms: Option<u64>,
    pub transcript: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub origin: Url,
    pub identity: Option<String>,
    pub reconnect_delay: Duration,
    pub transcript: Option<PathBuf>,
}

pub fn resolve_effective_settings(
    env: &EnvDefaults,
    cli: &CliOverrides,
) -> anyhow::Result<EffectiveSettings> {
    let origin = cli
        .origin
        .clone()
        .or_else(|| env.origin.clone())
        .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
    let origin = Url::parse(&origin)
        .map_err(|e| anyhow::anyhow!("invalid origin {origin:?}: {e}"))?;
    if origin.host_str().is_none() {
        anyhow::bail!("origin {origin} has no host");
    }

    let identity = cli
        .identity
        .clone()
        .or_else(|| env.identity.clone())
        .filter(|s| !s.trim().is_empty());

    let reconnect_ms = cli
        .reconnect_ms
        .or(env.reconnect_ms)
        .unwrap_or(DEFAULT_RECONNECT_MS);

    Ok(EffectiveSettings {
        origin,
        identity,
        reconnect_delay: Duration::from_millis(reconnect_ms),
        transcript: cli.transcript.clone(),
    })
}
