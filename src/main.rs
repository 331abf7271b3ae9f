use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use sitegate::client::ConfigClient;
use sitegate::config::Mode;
use sitegate::initializer::{DevHosts, Initializer};
use sitegate::services::SqliteServiceFactory;
use sitegate::{AppContext, Config, server, site};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let config = Config::from_cli()?;
    init_logging(config.log_filter.as_deref());

    match &config.mode {
        Mode::Init => run_init(&config).await,
        Mode::Serve(_) => server::run_server(config).await.map(|_| ExitCode::SUCCESS),
        Mode::Build(opts) => {
            let report =
                site::build_site(opts, &config.preview_suffixes, config.ready_timeout()).await?;
            println!("{}", report.index_path.display());
            Ok(if report.missing_outputs.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_init(config: &Config) -> Result<ExitCode> {
    let ctx = Arc::new(AppContext::new());
    let client = ConfigClient::new(
        config.config_url.clone(),
        &config.user_agent,
        config.request_timeout(),
    )?;
    let initializer = Initializer::new(
        client,
        SqliteServiceFactory::new(&config.data_dir),
        &config.hostname,
    )
    .with_dev_hosts(DevHosts::new(&config.preview_suffixes));

    // The outcome is recorded on the gate and the notice board.
    let _ = initializer.run(&ctx).await;

    let ready = ctx.gate().await_ready(config.ready_timeout()).await;
    for notice in ctx.notices().active() {
        eprintln!("{:?}: {}", notice.level, notice.message);
    }
    match (ready, ctx.gate().handles()) {
        (true, Some(handles)) => {
            println!(
                "ready: project={} auth_domain={}",
                handles.project_id,
                handles.auth.auth_domain()
            );
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            println!("not ready: {:?}", ctx.gate().state());
            Ok(ExitCode::FAILURE)
        }
    }
}
