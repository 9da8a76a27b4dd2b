use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

/// Server settings, read from `RENTALD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// (cert, key) PEM paths.
    pub tls: Option<(PathBuf, PathBuf)>,
    pub seed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "rentald".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls: None,
            seed: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let tls = match (lookup("RENTALD_TLS_CERT"), lookup("RENTALD_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            _ => return Err(ConfigError::TlsPair),
        };

        Ok(Self {
            port: parse_or(&lookup, "RENTALD_PORT", defaults.port)?,
            bind: lookup("RENTALD_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("RENTALD_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("RENTALD_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(&lookup, "RENTALD_MAX_CONNECTIONS", defaults.max_connections)?,
            compact_threshold: parse_or(&lookup, "RENTALD_COMPACT_THRESHOLD", defaults.compact_threshold)?,
            metrics_port: lookup("RENTALD_METRICS_PORT")
                .map(|raw| parse_value("RENTALD_METRICS_PORT", &raw))
                .transpose()?,
            tls,
            seed: parse_or(&lookup, "RENTALD_SEED", defaults.seed)?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("rentald.wal")
    }

    /// Build the TLS acceptor when a cert/key pair is configured.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let Some((cert_path, key_path)) = &self.tls else {
            return Ok(None);
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
    TlsPair,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::TlsPair => {
                write!(f, "both RENTALD_TLS_CERT and RENTALD_TLS_KEY must be set, or neither")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
