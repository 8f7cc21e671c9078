//! Configuration loading from `.env` files.

use std::{env, time::Duration};

use anyhow::{Context, Result};

use crate::fetch::FetchOpts;
use crate::relay::NetOpts;
use crate::rewrite::LinkStyle;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Signing key, `nsec1...` or 64 hex characters. Optional so read-only
    /// commands work without one; signing commands check for it themselves.
    pub secret_key: Option<String>,
    /// Relays events are published to.
    pub relays: Vec<String>,
    /// Relays used for profile and relay-list lookups. Defaults to `relays`.
    pub discovery_relays: Vec<String>,
    /// Media host uploads go to, e.g. `https://blossom.example`.
    pub media_host: Option<String>,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    /// WebSocket connect timeout.
    pub connect_timeout: Duration,
    /// How long to wait for a relay's publish acknowledgment.
    pub ack_timeout: Duration,
    /// How long a fetch keeps waiting once all relays have gone quiet.
    pub fetch_soft_timeout: Duration,
    /// Upper bound on a whole fetch operation.
    pub fetch_hard_timeout: Duration,
    /// How rewritten media references are rendered.
    pub link_style: LinkStyle,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let secret_key = env::var("SECRET_KEY").ok().filter(|s| !s.is_empty());
        let relays = csv_strings(env::var("RELAYS").unwrap_or_default());
        let discovery = csv_strings(env::var("DISCOVERY_RELAYS").unwrap_or_default());
        let discovery_relays = if discovery.is_empty() {
            relays.clone()
        } else {
            discovery
        };
        let media_host = env::var("MEDIA_HOST").ok().filter(|s| !s.is_empty());
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        let connect_timeout = millis_var("CONNECT_TIMEOUT_MS", 5_000);
        let ack_timeout = millis_var("ACK_TIMEOUT_MS", 10_000);
        let fetch_soft_timeout = millis_var("FETCH_SOFT_TIMEOUT_MS", 4_000);
        let fetch_hard_timeout = millis_var("FETCH_HARD_TIMEOUT_MS", 15_000);
        let link_style = match env::var("LINK_STYLE").as_deref() {
            Ok("plain") => LinkStyle::PlainUrl,
            _ => LinkStyle::MarkdownImage,
        };
        Ok(Self {
            secret_key,
            relays,
            discovery_relays,
            media_host,
            tor_socks,
            connect_timeout,
            ack_timeout,
            fetch_soft_timeout,
            fetch_hard_timeout,
            link_style,
        })
    }

    pub fn net_opts(&self) -> NetOpts {
        NetOpts {
            connect_timeout: self.connect_timeout,
            ack_timeout: self.ack_timeout,
            tor_socks: self.tor_socks.clone(),
        }
    }

    pub fn fetch_opts(&self) -> FetchOpts {
        FetchOpts {
            net: self.net_opts(),
            soft_timeout: self.fetch_soft_timeout,
            hard_timeout: self.fetch_hard_timeout,
        }
    }
}

/// Read a millisecond duration variable, falling back to `default_ms` when
/// the variable is absent or not a number.
fn millis_var(name: &str, default_ms: u64) -> Duration {
    let ms = env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs, sync::Mutex};
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 10] = [
        "SECRET_KEY",
        "RELAYS",
        "DISCOVERY_RELAYS",
        "MEDIA_HOST",
        "TOR_SOCKS",
        "CONNECT_TIMEOUT_MS",
        "ACK_TIMEOUT_MS",
        "FETCH_SOFT_TIMEOUT_MS",
        "FETCH_HARD_TIMEOUT_MS",
        "LINK_STYLE",
    ];

    fn clear_vars() {
        for v in VARS.iter() {
            env::remove_var(v);
        }
    }

    #[test]
    fn loads_env() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            concat!(
                "SECRET_KEY=abcd\n",
                "RELAYS=ws://r1,ws://r2\n",
                "DISCOVERY_RELAYS=ws://d1\n",
                "MEDIA_HOST=https://media.example\n",
                "TOR_SOCKS=127.0.0.1:9050\n",
                "CONNECT_TIMEOUT_MS=1500\n",
                "ACK_TIMEOUT_MS=2500\n",
                "FETCH_SOFT_TIMEOUT_MS=3500\n",
                "FETCH_HARD_TIMEOUT_MS=9000\n",
                "LINK_STYLE=plain\n",
            ),
        )
        .unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.secret_key.as_deref(), Some("abcd"));
        assert_eq!(cfg.relays, vec!["ws://r1", "ws://r2"]);
        assert_eq!(cfg.discovery_relays, vec!["ws://d1"]);
        assert_eq!(cfg.media_host.as_deref(), Some("https://media.example"));
        assert_eq!(cfg.tor_socks.as_deref(), Some("127.0.0.1:9050"));
        assert_eq!(cfg.connect_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.ack_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.fetch_soft_timeout, Duration::from_millis(3500));
        assert_eq!(cfg.fetch_hard_timeout, Duration::from_millis(9000));
        assert_eq!(cfg.link_style, LinkStyle::PlainUrl);
    }

    #[test]
    fn defaults_when_optional_absent() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "RELAYS=ws://only\n").unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert!(cfg.secret_key.is_none());
        assert!(cfg.media_host.is_none());
        assert!(cfg.tor_socks.is_none());
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
        assert_eq!(cfg.ack_timeout, Duration::from_secs(10));
        assert_eq!(cfg.fetch_soft_timeout, Duration::from_secs(4));
        assert_eq!(cfg.fetch_hard_timeout, Duration::from_secs(15));
        assert_eq!(cfg.link_style, LinkStyle::MarkdownImage);
    }

    #[test]
    fn discovery_relays_default_to_publish_relays() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "RELAYS=ws://r1,ws://r2\nDISCOVERY_RELAYS=\n").unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.discovery_relays, cfg.relays);
    }

    #[test]
    fn invalid_timeout_falls_back_to_default() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "CONNECT_TIMEOUT_MS=soon\n").unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn csv_helpers() {
        assert_eq!(csv_strings("a, b , ,c"), vec!["a", "b", "c"]);
        assert!(csv_strings("").is_empty());
    }

    #[test]
    fn opts_mirror_settings() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            "TOR_SOCKS=127.0.0.1:9050\nACK_TIMEOUT_MS=1234\nFETCH_HARD_TIMEOUT_MS=8000\n",
        )
        .unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        let net = cfg.net_opts();
        assert_eq!(net.ack_timeout, Duration::from_millis(1234));
        assert_eq!(net.tor_socks.as_deref(), Some("127.0.0.1:9050"));
        let fetch = cfg.fetch_opts();
        assert_eq!(fetch.hard_timeout, Duration::from_millis(8000));
        assert_eq!(fetch.net.ack_timeout, net.ack_timeout);
    }
}
