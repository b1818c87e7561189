use crate::{
    driver::{DEFAULT_CHUNK_SIZE, DriverOptions, MIN_CHUNK_SIZE},
    store::swift::SwiftConfig,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};
use thiserror::Error;

const ENV_PREFIX: &str = "SEGMENT_FS_";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Object store the driver runs on.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// OpenStack Swift over HTTP.
    Swift,
    /// SQLite metadata with payloads on local disk.
    Local,
    /// In-process, lost on exit.
    Memory,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),
    #[error("chunk size {chunk_size} is below the minimum of {min} bytes")]
    ChunkTooSmall { chunk_size: u64, min: u64 },
}

/// Settings handed to the storage driver and the Swift client.
#[derive(Clone, PartialEq, Eq)]
pub struct DriverParameters {
    pub username: String,
    pub password: String,
    pub auth_url: String,
    pub tenant: String,
    pub tenant_id: String,
    pub domain: String,
    pub domain_id: String,
    pub region: String,
    pub container: String,
    pub prefix: String,
    pub insecure_skip_verify: bool,
    pub chunk_size: u64,
}

impl fmt::Debug for DriverParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverParameters")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("auth_url", &self.auth_url)
            .field("tenant", &self.tenant)
            .field("tenant_id", &self.tenant_id)
            .field("domain", &self.domain)
            .field("domain_id", &self.domain_id)
            .field("region", &self.region)
            .field("container", &self.container)
            .field("prefix", &self.prefix)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl DriverParameters {
    /// Check required fields for `backend` and the chunk size floor.
    pub fn validate(&self, backend: Backend) -> Result<(), ConfigError> {
        if self.container.is_empty() {
            return Err(ConfigError::MissingParameter("container"));
        }
        if backend == Backend::Swift {
            for (name, value) in [
                ("username", &self.username),
                ("password", &self.password),
                ("auth_url", &self.auth_url),
            ] {
                if value.is_empty() {
                    return Err(ConfigError::MissingParameter(name));
                }
            }
        }
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(ConfigError::ChunkTooSmall {
                chunk_size: self.chunk_size,
                min: MIN_CHUNK_SIZE,
            });
        }
        Ok(())
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions::new(&self.container)
            .with_prefix(&self.prefix)
            .with_chunk_size(self.chunk_size)
    }

    pub fn swift_config(&self) -> SwiftConfig {
        SwiftConfig {
            username: self.username.clone(),
            password: self.password.clone(),
            auth_url: self.auth_url.clone(),
            tenant: self.tenant.clone(),
            tenant_id: self.tenant_id.clone(),
            domain: self.domain.clone(),
            domain_id: self.domain_id.clone(),
            region: self.region.clone(),
            insecure_skip_verify: self.insecure_skip_verify,
            connect_timeout: CONNECT_TIMEOUT,
            timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    pub driver: DriverParameters,
}

/// Command-line + environment configuration.
///
/// Every option falls back to `SEGMENT_FS_<NAME>` when not given.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Segmented file storage over OpenStack Swift")]
pub struct Args {
    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(long)]
    pub port: Option<u16>,

    /// Object store backend
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Payload directory of the local backend
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database of the local backend
    #[arg(long)]
    pub database_url: Option<String>,

    /// Swift user name
    #[arg(long)]
    pub username: Option<String>,

    /// Swift password or API key
    #[arg(long)]
    pub password: Option<String>,

    /// Swift authentication URL; its version component selects the auth protocol
    #[arg(long)]
    pub auth_url: Option<String>,

    #[arg(long)]
    pub tenant: Option<String>,

    #[arg(long)]
    pub tenant_id: Option<String>,

    /// Keystone v3 user domain name
    #[arg(long)]
    pub domain: Option<String>,

    #[arg(long)]
    pub domain_id: Option<String>,

    /// Region used to pick the object-store endpoint from the catalog
    #[arg(long)]
    pub region: Option<String>,

    /// Container holding logical objects; segments go to `<container>_segments`
    #[arg(long)]
    pub container: Option<String>,

    /// Path prefix applied to every object name
    #[arg(long)]
    pub prefix: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure_skip_verify: bool,

    /// Segment size in bytes
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Run migrations of the local backend and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_sources(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge `args` over values looked up with `env` (keyed by full
    /// variable name), then validate the driver parameters.
    pub fn from_sources<F>(args: Args, env: F) -> Result<(Self, bool)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(&format!("{ENV_PREFIX}{name}"));
        let text = |arg: Option<String>, name: &str| arg.or_else(|| var(name)).unwrap_or_default();

        let backend = match args.backend {
            Some(backend) => backend,
            None => match var("BACKEND") {
                Some(value) => <Backend as ValueEnum>::from_str(&value, true)
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("parsing {ENV_PREFIX}BACKEND value `{value}`"))?,
                None => Backend::Swift,
            },
        };
        let port = match args.port {
            Some(port) => port,
            None => parsed(&var, "PORT")?.unwrap_or(3000),
        };
        let chunk_size = match args.chunk_size {
            Some(size) => size,
            None => parsed(&var, "CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE),
        };
        let insecure_skip_verify =
            args.insecure_skip_verify || parsed(&var, "INSECURE_SKIP_VERIFY")?.unwrap_or(false);

        let driver = DriverParameters {
            username: text(args.username, "USERNAME"),
            password: text(args.password, "PASSWORD"),
            auth_url: text(args.auth_url, "AUTH_URL"),
            tenant: text(args.tenant, "TENANT"),
            tenant_id: text(args.tenant_id, "TENANT_ID"),
            domain: text(args.domain, "DOMAIN"),
            domain_id: text(args.domain_id, "DOMAIN_ID"),
            region: text(args.region, "REGION"),
            container: text(args.container, "CONTAINER"),
            prefix: text(args.prefix, "PREFIX"),
            insecure_skip_verify,
            chunk_size,
        };
        driver.validate(backend).context("invalid driver parameters")?;

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            backend,
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/segment_fs.db".into()),
            driver,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{value}`"))
        })
        .transpose()
}
