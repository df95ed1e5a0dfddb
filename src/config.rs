//! Channel configuration and SSH algorithm tiers.
//!
//! `ChannelConfig` describes one device channel: where to connect, how long
//! to wait, how to back off after failed connects and how the read caches
//! are sized. The algorithm tiers select what russh negotiates for each
//! `SecurityLevel`.

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use async_ssh2_tokio::ServerCheckMethod;
use russh::Preferred;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::timekeeper::Backoff;

/// Security level used for SSH algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum SecurityLevel {
    /// Strict modern algorithms (default).
    #[default]
    Secure,
    /// Good security with broader compatibility.
    Balanced,
    /// Maximum compatibility with legacy devices.
    LegacyCompatible,
}

impl SecurityLevel {
    /// Algorithm preference handed to russh.
    pub fn preferred(self) -> Preferred {
        match self {
            SecurityLevel::Secure => Preferred {
                kex: Cow::Borrowed(SECURE_KEX_ORDER),
                key: Cow::Borrowed(SECURE_KEY_TYPES),
                cipher: Cow::Borrowed(SECURE_CIPHERS),
                mac: Cow::Borrowed(SECURE_MAC_ALGORITHMS),
                compression: Cow::Borrowed(DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::Balanced => Preferred {
                kex: Cow::Borrowed(BALANCED_KEX_ORDER),
                key: Cow::Borrowed(BALANCED_KEY_TYPES),
                cipher: Cow::Borrowed(BALANCED_CIPHERS),
                mac: Cow::Borrowed(BALANCED_MAC_ALGORITHMS),
                compression: Cow::Borrowed(DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::LegacyCompatible => Preferred {
                kex: Cow::Borrowed(LEGACY_KEX_ORDER),
                key: Cow::Borrowed(LEGACY_KEY_TYPES),
                cipher: Cow::Borrowed(LEGACY_CIPHERS),
                mac: Cow::Borrowed(LEGACY_MAC_ALGORITHMS),
                compression: Cow::Borrowed(LEGACY_COMPRESSION_ALGORITHMS),
            },
        }
    }
}

/// Read cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReadCacheConfig {
    pub enabled: bool,
    /// Maximum number of cached command outputs.
    pub max_entries: u64,
    /// Seconds an entry stays valid after insertion.
    pub ttl_secs: u64,
}

impl Default for ReadCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 256,
            ttl_secs: 60,
        }
    }
}

/// Running-config tree cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TreeCacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    pub ttl_secs: u64,
    /// Reads starting with this prefix are answered from the tree.
    pub read_prefix: String,
    /// Section keywords whose blocks end with an `exit` line instead of
    /// indentation.
    pub exit_block_keywords: Vec<String>,
}

impl Default for TreeCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
            ttl_secs: 300,
            read_prefix: "show running-config".to_string(),
            exit_block_keywords: vec![
                "interface".to_string(),
                "vlan".to_string(),
                "line".to_string(),
                "router".to_string(),
            ],
        }
    }
}

/// Everything needed to open and drive one device channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ChannelConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub security_level: SecurityLevel,
    /// Custom known_hosts file. `None` uses the user's default file, or no
    /// check at all for `LegacyCompatible`.
    pub known_hosts_path: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Number of double-enter rounds before prompt resolution gives up.
    pub prompt_attempts: usize,
    /// Quiet period that ends one read during prompt resolution.
    pub prompt_idle_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub read_cache: ReadCacheConfig,
    pub tree_cache: TreeCacheConfig,
    /// Number of recent device errors kept for inspection.
    pub error_queue_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: String::new(),
            security_level: SecurityLevel::default(),
            known_hosts_path: None,
            connect_timeout_secs: 30,
            command_timeout_secs: 60,
            prompt_attempts: 3,
            prompt_idle_ms: 500,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            read_cache: ReadCacheConfig::default(),
            tree_cache: TreeCacheConfig::default(),
            error_queue_capacity: 10,
        }
    }
}

impl ChannelConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// `user@host:port`, used as the channel id in logs.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn prompt_idle(&self) -> Duration {
        Duration::from_millis(self.prompt_idle_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    /// Host key verification matching the security level.
    pub fn server_check(&self) -> ServerCheckMethod {
        match (&self.known_hosts_path, self.security_level) {
            (Some(path), _) => ServerCheckMethod::KnownHostsFile(path.display().to_string()),
            (None, SecurityLevel::LegacyCompatible) => ServerCheckMethod::NoCheck,
            (None, _) => ServerCheckMethod::DefaultKnownHostsFile,
        }
    }
}

pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA256,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA1,
];

/// Includes SHA-1 Diffie-Hellman groups still found on older switches.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA1,
    kex::DH_GEX_SHA256,
    kex::DH_G1_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G15_SHA512,
    kex::DH_G16_SHA512,
    kex::DH_G17_SHA512,
    kex::DH_G18_SHA512,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::NONE,
];

pub static SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

pub static BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

pub static LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
    cipher::CHACHA20_POLY1305,
    cipher::CLEAR,
    cipher::NONE,
];

pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA1,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::NONE,
];

pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[compression::NONE];

pub const LEGACY_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

/// Keeps DSA and SHA-1 RSA for devices that offer nothing else.
pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Dsa,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Ed25519,
    Algorithm::Rsa { hash: None },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::SkEcdsaSha2NistP256,
    Algorithm::SkEd25519,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ChannelConfig::from_json(
            r#"{"host":"10.0.0.1","username":"ubnt","password":"ubnt","read_cache":{"ttl_secs":5}}"#,
        )
        .expect("parse config");

        assert_eq!(config.port, 22);
        assert_eq!(config.security_level, SecurityLevel::Secure);
        assert_eq!(config.read_cache.ttl_secs, 5);
        assert_eq!(config.read_cache.max_entries, 256);
        assert_eq!(config.tree_cache.read_prefix, "show running-config");
        assert_eq!(config.target(), "ubnt@10.0.0.1:22");
    }

    #[test]
    fn legacy_profile_uses_no_host_check() {
        let mut config = ChannelConfig::new("10.0.0.1", "admin", "admin");
        config.security_level = SecurityLevel::LegacyCompatible;
        assert!(matches!(config.server_check(), ServerCheckMethod::NoCheck));

        config.known_hosts_path = Some(PathBuf::from("/tmp/known_hosts"));
        assert!(matches!(
            config.server_check(),
            ServerCheckMethod::KnownHostsFile(ref p) if p == "/tmp/known_hosts"
        ));
    }

    #[test]
    fn secure_profile_excludes_weak_algorithms() {
        let preferred = SecurityLevel::Secure.preferred();

        assert!(preferred.kex.iter().all(|alg| *alg != kex::NONE));
        assert!(preferred.cipher.iter().all(|alg| *alg != cipher::NONE));
        assert!(preferred.cipher.iter().all(|alg| *alg != cipher::CLEAR));
        assert!(preferred.mac.iter().all(|alg| *alg != mac::NONE));
    }

    #[test]
    fn legacy_profile_keeps_broad_compatibility_algorithms() {
        let preferred = SecurityLevel::LegacyCompatible.preferred();

        assert!(preferred.kex.contains(&kex::DH_G1_SHA1));
        assert!(preferred.cipher.contains(&cipher::AES_128_CBC));
        assert!(preferred.key.contains(&Algorithm::Dsa));
    }
}
