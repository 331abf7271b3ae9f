use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::initializer::DEFAULT_PREVIEW_SUFFIX;
use crate::payload::{
    ConfigPayload, ENV_API_KEY, ENV_APP_ID, ENV_AUTH_DOMAIN, ENV_MEASUREMENT_ID,
    ENV_MESSAGING_SENDER_ID, ENV_PROJECT_ID, ENV_STORAGE_BUCKET,
};

const DEFAULT_CONFIG_URL: &str = "http://localhost:8080/api/config";
const DEFAULT_USER_AGENT: &str = "sitegate";

#[derive(Debug, Parser)]
#[command(
    name = "sitegate",
    version,
    about = "Serve, fetch and embed runtime configuration for a static site."
)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Configuration endpoint to initialize from.
    #[arg(long, env = "SITEGATE_CONFIG_URL", default_value = DEFAULT_CONFIG_URL)]
    pub config_url: String,

    /// Hostname the client is running under. Defaults to the endpoint host.
    #[arg(long, env = "SITEGATE_HOSTNAME")]
    pub hostname: Option<String>,

    /// Hostname suffix treated as a development preview (repeatable).
    #[arg(long = "preview-suffix", env = "SITEGATE_PREVIEW_SUFFIXES", value_delimiter = ',', default_value = DEFAULT_PREVIEW_SUFFIX)]
    pub preview_suffixes: Vec<String>,

    /// Directory holding the local service databases.
    #[arg(long, env = "SITEGATE_DATA_DIR", default_value = "sitegate-data")]
    pub data_dir: PathBuf,

    /// HTTP request timeout in seconds.
    #[arg(long, env = "SITEGATE_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Seconds guarded operations wait for initialization.
    #[arg(long, env = "SITEGATE_READY_TIMEOUT_SECS", default_value_t = 10)]
    pub ready_timeout_secs: u64,

    /// Custom user-agent header value.
    #[arg(long, env = "SITEGATE_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Log filter directive, e.g. `debug` or `sitegate=trace`. Overrides RUST_LOG.
    #[arg(long)]
    pub log: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the configuration endpoint at /api/config.
    Serve(ServeArgs),
    /// Render the site template into an output directory.
    Build(BuildArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "SITEGATE_BIND", default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Port to bind the HTTP server to.
    #[arg(long, env = "SITEGATE_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = ENV_API_KEY, hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = ENV_AUTH_DOMAIN)]
    pub auth_domain: Option<String>,

    #[arg(long, env = ENV_PROJECT_ID)]
    pub project_id: Option<String>,

    #[arg(long, env = ENV_STORAGE_BUCKET)]
    pub storage_bucket: Option<String>,

    #[arg(long, env = ENV_MESSAGING_SENDER_ID)]
    pub messaging_sender_id: Option<String>,

    #[arg(long, env = ENV_APP_ID)]
    pub app_id: Option<String>,

    #[arg(long, env = ENV_MEASUREMENT_ID)]
    pub measurement_id: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct BuildArgs {
    /// HTML template containing the {{STYLESHEET}} and {{CONFIG_LOADER}} placeholders.
    #[arg(long, default_value = "index.html")]
    pub template: PathBuf,

    /// Stylesheet copied next to the rendered page.
    #[arg(long, default_value = "styles.css")]
    pub styles: PathBuf,

    /// Output directory.
    #[arg(long, default_value = "dist")]
    pub out_dir: PathBuf,

    /// Path the rendered page fetches its configuration from.
    #[arg(long, default_value = "/api/config")]
    pub endpoint_path: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub config_url: Url,
    pub hostname: String,
    pub preview_suffixes: Vec<String>,
    pub data_dir: PathBuf,
    pub timeout_secs: u64,
    pub ready_timeout_secs: u64,
    pub user_agent: String,
    pub log_filter: Option<String>,
    pub mode: Mode,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Init,
    Serve(ServeOptions),
    Build(BuildOptions),
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub bind: IpAddr,
    pub port: u16,
    pub payload: ConfigPayload,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub template: PathBuf,
    pub styles: PathBuf,
    pub out_dir: PathBuf,
    pub endpoint_path: String,
    pub fallback: ConfigPayload,
}

impl Config {
    pub fn from_cli() -> Result<Self> {
        let cli = Cli::parse();
        Config::from_parts(cli.common, cli.command)
    }

    fn from_parts(common: CommonArgs, command: Option<Command>) -> Result<Self> {
        if common.timeout_secs == 0 {
            return Err(anyhow!("timeout must be greater than zero"));
        }

        if common.ready_timeout_secs == 0 {
            return Err(anyhow!("ready timeout must be greater than zero"));
        }

        let config_url = Url::parse(&common.config_url)
            .with_context(|| format!("invalid config url: {}", common.config_url))?;

        let hostname = match common.hostname {
            Some(host) if !host.trim().is_empty() => host.trim().to_string(),
            _ => config_url
                .host_str()
                .map(ToOwned::to_owned)
                .ok_or_else(|| anyhow!("config url has no host; pass --hostname"))?,
        };

        let mode = match command {
            Some(Command::Serve(args)) => Mode::Serve(ServeOptions {
                bind: args.bind,
                port: args.port,
                payload: payload_from_serve_args(&args),
            }),
            Some(Command::Build(args)) => Mode::Build(BuildOptions {
                template: args.template,
                styles: args.styles,
                out_dir: args.out_dir,
                endpoint_path: validate_endpoint_path(args.endpoint_path)?,
                fallback: ConfigPayload::development_fallback(|key| std::env::var(key).ok()),
            }),
            None => Mode::Init,
        };

        Ok(Self {
            config_url,
            hostname,
            preview_suffixes: common.preview_suffixes,
            data_dir: common.data_dir,
            timeout_secs: common.timeout_secs,
            ready_timeout_secs: common.ready_timeout_secs,
            user_agent: common.user_agent,
            log_filter: common.log,
            mode,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

fn payload_from_serve_args(args: &ServeArgs) -> ConfigPayload {
    ConfigPayload::from_lookup(|key| match key {
        ENV_API_KEY => args.api_key.clone(),
        ENV_AUTH_DOMAIN => args.auth_domain.clone(),
        ENV_PROJECT_ID => args.project_id.clone(),
        ENV_STORAGE_BUCKET => args.storage_bucket.clone(),
        ENV_MESSAGING_SENDER_ID => args.messaging_sender_id.clone(),
        ENV_APP_ID => args.app_id.clone(),
        ENV_MEASUREMENT_ID => args.measurement_id.clone(),
        _ => None,
    })
}

fn validate_endpoint_path(path: String) -> Result<String> {
    if path.starts_with('/') {
        Ok(path)
    } else {
        Err(anyhow!("endpoint path must start with '/': {path}"))
    }
}
