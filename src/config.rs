//! Environment configuration.
//!
//! Every key is optional except `JWT_SECRET`; defaults are noted per field.
//! A value ending in `.enc` names a file holding base64 ciphertext that is
//! RSA-decrypted with `private.pem` from the working directory. Decryption
//! happens exactly once, here, at startup; the resulting [`Config`] is the
//! read-mostly source of truth shared with every thread.

use base64::Engine;
use rsa::{pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey, Pkcs1v15Encrypt, RsaPrivateKey};
use std::{collections::HashMap, env, fs, time::Duration};

const PRIVATE_KEY_PATH: &str = "private.pem";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`{key}` is not valid: {reason}")]
    Invalid { key: String, reason: String },

    #[error("JWT_SECRET must be configured and non-empty")]
    MissingJwtSecret,

    #[error("failed to read `{path}`: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decrypt `{path}`: {reason}")]
    Decrypt { path: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP listen port (`PORT`, default 8080). Port 0 binds an ephemeral
    /// port; the façade resolves it after the first listener binds.
    pub port: u16,

    /// Number of I/O workers (`IO_THREADS`, default: hardware concurrency).
    pub io_threads: usize,

    /// Total worker threads, split across I/O workers with a floor of one
    /// per worker (`POOL_SIZE`, default 16).
    pub pool_size: usize,

    /// Task-queue bound per worker pool (`QUEUE_CAPACITY`, default 1000).
    /// The response queue is sized at twice this.
    pub queue_capacity: usize,

    /// Parser buffer cap in bytes (`MAX_REQUEST_SIZE`, default 5 MiB).
    pub max_request_size: usize,

    /// Comma-separated origin allowlist (`CORS_ORIGINS`, default empty).
    pub cors_origins: String,

    /// HS256 key (`JWT_SECRET`). Required; an empty value rejects the
    /// configuration.
    pub jwt_secret: String,

    /// Token lifetime in seconds (`JWT_TIMEOUT_SECONDS`, default 3600).
    pub jwt_timeout_seconds: u64,

    /// Bearer key protecting `/metrics`, `/metricsp` and `/version`
    /// (`API_KEY`, default unset: the endpoints are open).
    pub api_key: Option<String>,

    /// Idle connection reaper threshold (default 30 s).
    pub read_timeout: Duration,

    /// Reported by `/version` (`POD_NAME`, default "unknown").
    pub pod_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            io_threads: num_cpus::get(),
            pool_size: 16,
            queue_capacity: 1000,
            max_request_size: 5 * 1024 * 1024,
            cors_origins: String::new(),
            jwt_secret: String::new(),
            jwt_timeout_seconds: 3600,
            api_key: None,
            read_timeout: Duration::from_secs(30),
            pod_name: "unknown".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut cfg = Config {
            jwt_secret: resolve(vars, "JWT_SECRET")?.unwrap_or_default(),
            ..Config::default()
        };
        if cfg.jwt_secret.is_empty() {
            return Err(ConfigError::MissingJwtSecret);
        }

        if let Some(v) = resolve(vars, "PORT")? {
            cfg.port = parse(&v, "PORT")?;
        }
        if let Some(v) = resolve(vars, "IO_THREADS")? {
            cfg.io_threads = parse_nonzero(&v, "IO_THREADS")?;
        }
        if let Some(v) = resolve(vars, "POOL_SIZE")? {
            cfg.pool_size = parse_nonzero(&v, "POOL_SIZE")?;
        }
        if let Some(v) = resolve(vars, "QUEUE_CAPACITY")? {
            cfg.queue_capacity = parse_nonzero(&v, "QUEUE_CAPACITY")?;
        }
        if let Some(v) = resolve(vars, "MAX_REQUEST_SIZE")? {
            cfg.max_request_size = parse_nonzero(&v, "MAX_REQUEST_SIZE")?;
        }
        if let Some(v) = resolve(vars, "JWT_TIMEOUT_SECONDS")? {
            cfg.jwt_timeout_seconds = parse(&v, "JWT_TIMEOUT_SECONDS")?;
        }
        if let Some(v) = resolve(vars, "CORS_ORIGINS")? {
            cfg.cors_origins = v;
        }
        if let Some(v) = resolve(vars, "API_KEY")? {
            cfg.api_key = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = resolve(vars, "POD_NAME")? {
            cfg.pod_name = v;
        }

        Ok(cfg)
    }
}

/// Returns the configured value, transparently decrypting `.enc` references.
fn resolve(vars: &HashMap<String, String>, key: &str) -> Result<Option<String>, ConfigError> {
    match vars.get(key) {
        None => Ok(None),
        Some(value) if value.ends_with(".enc") => decrypt_file(value).map(Some),
        Some(value) => Ok(Some(value.clone())),
    }
}

fn decrypt_file(path: &str) -> Result<String, ConfigError> {
    decrypt_with_key(path, PRIVATE_KEY_PATH)
}

fn decrypt_with_key(path: &str, key_path: &str) -> Result<String, ConfigError> {
    let unreadable = |p: &str| {
        let p = p.to_string();
        move |source| ConfigError::Unreadable { path: p, source }
    };
    let garbled = |reason: String| ConfigError::Decrypt {
        path: path.to_string(),
        reason,
    };

    let ciphertext = fs::read_to_string(path).map_err(unreadable(path))?;
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(ciphertext.trim())
        .map_err(|e| garbled(e.to_string()))?;

    let pem = fs::read_to_string(key_path).map_err(unreadable(key_path))?;
    let key = RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| garbled(e.to_string()))?;

    let plain = key
        .decrypt(Pkcs1v15Encrypt, &ciphertext)
        .map_err(|e| garbled(e.to_string()))?;

    String::from_utf8(plain).map_err(|e| garbled(e.to_string()))
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("`{value}` does not parse"),
    })
}

fn parse_nonzero(value: &str, key: &str) -> Result<usize, ConfigError> {
    match parse::<usize>(value, key)? {
        0 => Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let cfg = Config::from_vars(&vars(&[("JWT_SECRET", "s3cret")])).unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.pool_size, 16);
        assert_eq!(cfg.queue_capacity, 1000);
        assert_eq!(cfg.max_request_size, 5_242_880);
        assert_eq!(cfg.jwt_timeout_seconds, 3600);
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.read_timeout, Duration::from_secs(30));
        assert!(cfg.io_threads >= 1);
    }

    #[test]
    fn overrides() {
        let cfg = Config::from_vars(&vars(&[
            ("JWT_SECRET", "s3cret"),
            ("PORT", "9000"),
            ("POOL_SIZE", "4"),
            ("QUEUE_CAPACITY", "50"),
            ("CORS_ORIGINS", "https://a.example,null"),
            ("API_KEY", "k-123"),
        ]))
        .unwrap();

        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.queue_capacity, 50);
        assert_eq!(cfg.cors_origins, "https://a.example,null");
        assert_eq!(cfg.api_key.as_deref(), Some("k-123"));
    }

    #[test]
    fn missing_secret_rejected() {
        assert!(matches!(
            Config::from_vars(&vars(&[])),
            Err(ConfigError::MissingJwtSecret)
        ));
        assert!(matches!(
            Config::from_vars(&vars(&[("JWT_SECRET", "")])),
            Err(ConfigError::MissingJwtSecret)
        ));
    }

    #[test]
    fn invalid_numbers_rejected() {
        #[rustfmt::skip]
        let cases = [
            ("PORT", "eighty"),
            ("PORT", "70000"),
            ("POOL_SIZE", "0"),
            ("QUEUE_CAPACITY", "-1"),
        ];

        for (key, value) in cases {
            let result = Config::from_vars(&vars(&[("JWT_SECRET", "x"), (key, value)]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { .. })),
                "{key}={value} was accepted"
            );
        }
    }

    #[test]
    fn empty_api_key_means_unset() {
        let cfg = Config::from_vars(&vars(&[("JWT_SECRET", "x"), ("API_KEY", "")])).unwrap();
        assert_eq!(cfg.api_key, None);
    }

    #[test]
    fn enc_reference_requires_the_file() {
        let result = Config::from_vars(&vars(&[("JWT_SECRET", "/nonexistent/secret.enc")]));
        assert!(matches!(result, Err(ConfigError::Unreadable { .. })));
    }

    // Full round trip over the decrypt path: encrypt with the public half,
    // decrypt from disk through both accepted key encodings.
    #[test]
    fn enc_value_round_trips_through_rsa() {
        use rsa::{
            pkcs1::EncodeRsaPrivateKey,
            pkcs8::{EncodePrivateKey, LineEnding},
            RsaPublicKey,
        };

        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 512).unwrap();
        let public = RsaPublicKey::from(&key);

        let plaintext = "decrypted-jwt-secret";
        let ciphertext = public
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext.as_bytes())
            .unwrap();

        let dir = env::temp_dir();
        let enc_path = dir.join(format!("anvil-cfg-{}.enc", std::process::id()));
        let key_path = dir.join(format!("anvil-cfg-{}.pem", std::process::id()));
        let enc_path = enc_path.to_str().unwrap();
        let key_path = key_path.to_str().unwrap();

        fs::write(
            enc_path,
            base64::engine::general_purpose::STANDARD.encode(&ciphertext),
        )
        .unwrap();

        // PKCS#8 PEM, the first branch
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        fs::write(key_path, pem.as_bytes()).unwrap();
        assert_eq!(decrypt_with_key(enc_path, key_path).unwrap(), plaintext);

        // PKCS#1 PEM, the fallback branch
        let pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
        fs::write(key_path, pem.as_bytes()).unwrap();
        assert_eq!(decrypt_with_key(enc_path, key_path).unwrap(), plaintext);

        // wrong key fails the decrypt, not the parse
        let other = RsaPrivateKey::new(&mut rng, 512).unwrap();
        let pem = other.to_pkcs8_pem(LineEnding::LF).unwrap();
        fs::write(key_path, pem.as_bytes()).unwrap();
        assert!(matches!(
            decrypt_with_key(enc_path, key_path),
            Err(ConfigError::Decrypt { .. })
        ));

        let _ = fs::remove_file(enc_path);
        let _ = fs::remove_file(key_path);
    }
}
