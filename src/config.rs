use crate::models::permissions::{AUTHENTICATED, EVERYONE};
use anyhow::{Context, Result};
use clap::Parser;
use std::{collections::HashMap, env, str::FromStr};

const DEFAULT_DOCS: &str = "https://github.com/object-api/object-api";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub settings: ApiSettings,
}

/// Settings the request pipeline reads at runtime.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub project_name: String,
    pub project_version: String,
    pub project_docs: String,
    pub batch_max_requests: usize,
    /// Upper bound (and default) for `_limit`.
    pub max_limit: usize,
    pub bucket_create_principals: Vec<String>,
    pub account_create_principals: Vec<String>,
    pub cors_max_age: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            project_name: env!("CARGO_PKG_NAME").into(),
            project_version: env!("CARGO_PKG_VERSION").into(),
            project_docs: DEFAULT_DOCS.into(),
            batch_max_requests: 25,
            max_limit: 10_000,
            bucket_create_principals: vec![AUTHENTICATED.into()],
            account_create_principals: vec![EVERYONE.into()],
            cors_max_age: 3600,
        }
    }
}

impl ApiSettings {
    /// Root-level creation grants keyed by permission kind.
    pub fn static_grants(&self) -> HashMap<String, Vec<String>> {
        HashMap::from([
            ("bucket:create".into(), self.bucket_create_principals.clone()),
            ("account:create".into(), self.account_create_principals.clone()),
        ])
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-tenant JSON object storage API")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_API_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_API_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage URL, `memory:` or `sqlite://...` (overrides OBJECT_API_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Name reported by the hello endpoint (overrides OBJECT_API_PROJECT_NAME)
    #[arg(long)]
    pub project_name: Option<String>,

    /// Sub-requests allowed per batch (overrides OBJECT_API_BATCH_MAX_REQUESTS)
    #[arg(long)]
    pub batch_max_requests: Option<usize>,

    /// Largest page size (overrides OBJECT_API_PAGINATION_MAX_LIMIT)
    #[arg(long)]
    pub max_limit: Option<usize>,

    /// Apply the SQLite schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let defaults = ApiSettings::default();

        // --- Environment fallback ---
        let env_host = env::var("OBJECT_API_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("OBJECT_API_PORT", 8888)?;
        let env_db = env::var("OBJECT_API_DATABASE_URL").unwrap_or_else(|_| "memory:".into());
        let env_name =
            env::var("OBJECT_API_PROJECT_NAME").unwrap_or_else(|_| defaults.project_name.clone());
        let env_batch = env_parse("OBJECT_API_BATCH_MAX_REQUESTS", defaults.batch_max_requests)?;
        let env_limit = env_parse("OBJECT_API_PAGINATION_MAX_LIMIT", defaults.max_limit)?;

        let settings = ApiSettings {
            project_name: args.project_name.unwrap_or(env_name),
            project_docs: env::var("OBJECT_API_PROJECT_DOCS")
                .unwrap_or_else(|_| defaults.project_docs.clone()),
            batch_max_requests: args.batch_max_requests.unwrap_or(env_batch),
            max_limit: args.max_limit.unwrap_or(env_limit).max(1),
            bucket_create_principals: env_list(
                "OBJECT_API_BUCKET_CREATE_PRINCIPALS",
                &defaults.bucket_create_principals,
            ),
            account_create_principals: env_list(
                "OBJECT_API_ACCOUNT_CREATE_PRINCIPALS",
                &defaults.account_create_principals,
            ),
            cors_max_age: env_parse("OBJECT_API_CORS_MAX_AGE", defaults.cors_max_age)?,
            ..defaults
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            settings,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {name} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}

/// Comma or whitespace separated principal list.
fn env_list(name: &str, default: &[String]) -> Vec<String> {
    match env::var(name) {
        Ok(value) => value
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => default.to_vec(),
    }
}
