use crate::services::{
    blob_repository::{DEFAULT_SIZE_LIMIT, UnreadablePolicy},
    object_store::MAX_PAGE_SIZE,
    token_service::{SecretError, ServerSecret},
};
use clap::{Parser, ValueEnum};
use std::{env, time::Duration};
use thiserror::Error;

/// Which object namespace uploads are written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Local disk payloads with SQLite metadata.
    Local,
    /// Amazon S3 bucket, credentials from `AWS_*`.
    S3,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid value `{value}` for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("server secret: {0}")]
    Secret(#[from] SecretError),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; validated once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub bucket: String,
    pub secret: ServerSecret,
    pub storage_dir: String,
    pub database_url: String,
    pub public_dir: String,
    pub max_upload_bytes: usize,
    pub request_timeout: Duration,
    pub list_page_size: usize,
    pub on_unreadable: UnreadablePolicy,
}

/// Command-line configuration. The secret is only read from the environment.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Keyword-protected file drop")]
pub struct Args {
    /// Host to bind to (overrides KEYDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides KEYDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides KEYDROP_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Bucket name (overrides KEYDROP_BUCKET / AWS_BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Directory where object payloads are stored (overrides KEYDROP_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides KEYDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory of static assets (overrides KEYDROP_PUBLIC_DIR)
    #[arg(long)]
    pub public_dir: Option<String>,

    /// Largest accepted upload in bytes (overrides KEYDROP_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Per-request deadline in seconds (overrides KEYDROP_REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Keys fetched per listing page during lookup (overrides KEYDROP_LIST_PAGE_SIZE)
    #[arg(long)]
    pub list_page_size: Option<usize>,

    /// What a lookup does with objects whose metadata cannot be read (overrides KEYDROP_ON_UNREADABLE)
    #[arg(long, value_enum)]
    pub on_unreadable: Option<UnreadablePolicy>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool), ConfigError> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up with `var`.
    pub fn from_sources(
        args: Args,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |names: &[&str]| {
            names
                .iter()
                .find_map(|&name| var(name).filter(|v| !v.trim().is_empty()))
        };

        let bucket = args
            .bucket
            .or_else(|| lookup(&["KEYDROP_BUCKET", "AWS_BUCKET_NAME"]))
            .ok_or(ConfigError::Missing("KEYDROP_BUCKET"))?;
        // Taken verbatim; `ServerSecret::new` rejects empty and blank values.
        let secret = ["KEYDROP_SECRET", "SECRET_WORD"]
            .iter()
            .find_map(|&name| var(name))
            .ok_or(ConfigError::Missing("KEYDROP_SECRET"))?;

        let backend = match args.backend {
            Some(backend) => backend,
            None => parse_enum("KEYDROP_BACKEND", lookup(&["KEYDROP_BACKEND"]))?
                .unwrap_or(Backend::Local),
        };
        let on_unreadable = match args.on_unreadable {
            Some(policy) => policy,
            None => parse_enum("KEYDROP_ON_UNREADABLE", lookup(&["KEYDROP_ON_UNREADABLE"]))?
                .unwrap_or_default(),
        };

        let port = match args.port {
            Some(port) => port,
            None => parse_num("KEYDROP_PORT", lookup(&["KEYDROP_PORT"]))?.unwrap_or(8080),
        };
        let max_upload_bytes = match args.max_upload_bytes {
            Some(n) => n,
            None => parse_num("KEYDROP_MAX_UPLOAD_BYTES", lookup(&["KEYDROP_MAX_UPLOAD_BYTES"]))?
                .unwrap_or(DEFAULT_SIZE_LIMIT),
        };
        let timeout_secs = match args.request_timeout {
            Some(n) => n,
            None => parse_num(
                "KEYDROP_REQUEST_TIMEOUT_SECS",
                lookup(&["KEYDROP_REQUEST_TIMEOUT_SECS"]),
            )?
            .unwrap_or(30),
        };
        let list_page_size = match args.list_page_size {
            Some(n) => n,
            None => parse_num("KEYDROP_LIST_PAGE_SIZE", lookup(&["KEYDROP_LIST_PAGE_SIZE"]))?
                .unwrap_or(MAX_PAGE_SIZE),
        };

        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "request timeout",
                value: timeout_secs.to_string(),
                reason: "must be at least one second".into(),
            });
        }

        Ok(Self {
            host: args
                .host
                .or_else(|| lookup(&["KEYDROP_HOST"]))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            backend,
            bucket,
            secret: ServerSecret::new(secret)?,
            storage_dir: args
                .storage_dir
                .or_else(|| lookup(&["KEYDROP_STORAGE_DIR"]))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| lookup(&["KEYDROP_DATABASE_URL"]))
                .unwrap_or_else(|| "sqlite://./data/meta/keydrop.db".into()),
            public_dir: args
                .public_dir
                .or_else(|| lookup(&["KEYDROP_PUBLIC_DIR"]))
                .unwrap_or_else(|| "public".into()),
            max_upload_bytes,
            request_timeout: Duration::from_secs(timeout_secs),
            list_page_size: list_page_size.clamp(1, MAX_PAGE_SIZE),
            on_unreadable,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_num<T>(name: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
            value,
        })
    })
    .transpose()
}

fn parse_enum<T: ValueEnum>(
    name: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        T::from_str(value.trim(), true).map_err(|reason| ConfigError::Invalid {
            name,
            value,
            reason,
        })
    })
    .transpose()
}
