use thiserror::Error;

use crate::client::{ConfigClient, FetchError};
use crate::context::{AppContext, NoticeLevel};
use crate::payload::{ConfigPayload, ValidationError};
use crate::readiness::DEFAULT_READY_TIMEOUT;
use crate::services::{ServiceError, ServiceFactory, ServiceHandles};

pub const DEFAULT_PREVIEW_SUFFIX: &str = ".netlify.app";

const CONNECTION_NOTICE: &str =
    "Unable to connect to the database. Please try refreshing the page.";

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to construct service handles: {0}")]
    Services(#[from] ServiceError),
    #[error("initialization already settled in this context: {0}")]
    AlreadySettled(String),
}

/// Hostnames that may fall back to a local configuration when the endpoint
/// cannot be reached.
#[derive(Debug, Clone)]
pub struct DevHosts {
    suffixes: Vec<String>,
}

impl Default for DevHosts {
    fn default() -> Self {
        Self::new([DEFAULT_PREVIEW_SUFFIX])
    }
}

impl DevHosts {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let suffixes = suffixes
            .into_iter()
            .map(|s| {
                let s: String = s.into();
                s.trim().trim_start_matches('.').to_ascii_lowercase()
            })
            .filter(|s| !s.is_empty())
            .collect();
        Self { suffixes }
    }

    pub fn matches(&self, hostname: &str) -> bool {
        let host = hostname.trim().to_ascii_lowercase();
        if host == "localhost" || host == "127.0.0.1" {
            return true;
        }
        self.suffixes.iter().any(|suffix| {
            host == *suffix
                || host
                    .strip_suffix(suffix.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}

pub struct Initializer<F> {
    client: ConfigClient,
    factory: F,
    hostname: String,
    dev_hosts: DevHosts,
    fallback: ConfigPayload,
}

impl<F: ServiceFactory> Initializer<F> {
    pub fn new(client: ConfigClient, factory: F, hostname: impl Into<String>) -> Self {
        Self {
            client,
            factory,
            hostname: hostname.into(),
            dev_hosts: DevHosts::default(),
            fallback: ConfigPayload::development_fallback(|key| std::env::var(key).ok()),
        }
    }

    pub fn with_dev_hosts(mut self, dev_hosts: DevHosts) -> Self {
        self.dev_hosts = dev_hosts;
        self
    }

    pub fn with_fallback(mut self, fallback: ConfigPayload) -> Self {
        self.fallback = fallback;
        self
    }

    /// Make the single initialization attempt for `ctx` and settle its
    /// readiness gate. Failures are logged, posted as a notice and returned;
    /// they never panic.
    ///
    /// Later calls make no request. They report the outcome the gate
    /// settled on: `Ok(())` once ready, [`InitError::AlreadySettled`] with
    /// the recorded reason once failed.
    pub async fn run(&self, ctx: &AppContext) -> Result<(), InitError> {
        if !ctx.claim_initialization() {
            tracing::debug!(state = ?ctx.gate().state(), "initialization already attempted");
            return settled_outcome(ctx).await;
        }

        match self.attempt().await {
            Ok(handles) => {
                let project = handles.project_id.clone();
                ctx.gate().signal_ready(handles);
                tracing::info!(%project, "initialized successfully");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "initialization failed");
                ctx.gate().signal_failed(err.to_string());
                ctx.notices()
                    .post(NoticeLevel::Error, format!("{CONNECTION_NOTICE} Error: {err}"));
                Err(err)
            }
        }
    }

    async fn attempt(&self) -> Result<ServiceHandles, InitError> {
        let payload = match self.client.fetch().await {
            Ok(payload) => payload,
            Err(err) if self.dev_hosts.matches(&self.hostname) => {
                tracing::warn!(
                    error = %err,
                    hostname = %self.hostname,
                    "configuration endpoint unavailable, using development fallback"
                );
                self.fallback.clone()
            }
            Err(err) => return Err(err.into()),
        };

        let config = payload.validate()?;
        let handles = self.factory.connect(&config).await?;
        Ok(handles)
    }
}

async fn settled_outcome(ctx: &AppContext) -> Result<(), InitError> {
    // An attempt still in flight settles the gate for us.
    if ctx.gate().await_ready(DEFAULT_READY_TIMEOUT).await {
        return Ok(());
    }
    let reason = ctx
        .gate()
        .failure()
        .unwrap_or_else(|| "initialization still pending".to_string());
    Err(InitError::AlreadySettled(reason))
}
