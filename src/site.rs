use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use html_escape::encode_script;

use crate::config::BuildOptions;
use crate::payload::ConfigPayload;

static CONFIG_LOADER: &str = include_str!(concat!(env!("OUT_DIR"), "/config_loader.js"));
static FALLBACK_STYLES: &str = include_str!(concat!(env!("OUT_DIR"), "/fallback.css"));

const STYLESHEET_PLACEHOLDER: &str = "{{STYLESHEET}}";
const LOADER_PLACEHOLDER: &str = "{{CONFIG_LOADER}}";
const REQUIRED_OUTPUTS: [&str; 2] = ["index.html", "styles.css"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub index_path: PathBuf,
    pub styles_copied: bool,
    pub missing_outputs: Vec<&'static str>,
}

/// Settings baked into the inline loader script.
#[derive(Debug, Clone)]
pub struct LoaderSettings<'a> {
    pub endpoint_path: &'a str,
    pub fallback: &'a ConfigPayload,
    pub preview_suffixes: &'a [String],
    pub ready_timeout: Duration,
}

pub fn render_loader(settings: &LoaderSettings<'_>) -> Result<String> {
    let endpoint = serde_json::to_string(settings.endpoint_path)?;
    let fallback = serde_json::to_string(settings.fallback)?;
    let suffixes = settings
        .preview_suffixes
        .iter()
        .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    let suffixes = serde_json::to_string(&suffixes)?;
    let script = CONFIG_LOADER
        .replace("{{ENDPOINT}}", &endpoint)
        .replace("{{FALLBACK_CONFIG}}", &fallback)
        .replace("{{PREVIEW_SUFFIXES}}", &suffixes)
        .replace(
            "{{READY_TIMEOUT_MS}}",
            &settings.ready_timeout.as_millis().to_string(),
        );
    Ok(encode_script(&script).into_owned())
}

pub fn render_page(template: &str, loader: &str) -> Result<String> {
    if !template.contains(LOADER_PLACEHOLDER) {
        return Err(anyhow!("template has no {LOADER_PLACEHOLDER} placeholder"));
    }
    Ok(template
        .replace(
            STYLESHEET_PLACEHOLDER,
            r#"<link rel="stylesheet" href="styles.css">"#,
        )
        .replace(LOADER_PLACEHOLDER, &format!("<script>\n{loader}\n</script>")))
}

pub async fn build_site(
    options: &BuildOptions,
    preview_suffixes: &[String],
    ready_timeout: Duration,
) -> Result<BuildReport> {
    tokio::fs::create_dir_all(&options.out_dir)
        .await
        .with_context(|| format!("failed to create {}", options.out_dir.display()))?;

    let styles_copied = copy_styles(&options.styles, &options.out_dir).await?;

    let template = tokio::fs::read_to_string(&options.template)
        .await
        .with_context(|| format!("failed to read template {}", options.template.display()))?;
    let loader = render_loader(&LoaderSettings {
        endpoint_path: &options.endpoint_path,
        fallback: &options.fallback,
        preview_suffixes,
        ready_timeout,
    })?;
    let page = render_page(&template, &loader)?;
    let index_path = options.out_dir.join("index.html");
    tokio::fs::write(&index_path, page)
        .await
        .with_context(|| format!("failed to write {}", index_path.display()))?;
    tracing::info!(path = %index_path.display(), "page rendered");

    let missing_outputs = missing_outputs(&options.out_dir).await;
    if !missing_outputs.is_empty() {
        tracing::warn!(missing = ?missing_outputs, "build output is incomplete");
    }

    Ok(BuildReport {
        index_path,
        styles_copied,
        missing_outputs,
    })
}

async fn copy_styles(source: &Path, out_dir: &Path) -> Result<bool> {
    let target = out_dir.join("styles.css");
    match tokio::fs::read_to_string(source).await {
        Ok(css) => {
            tokio::fs::write(&target, css)
                .await
                .with_context(|| format!("failed to write {}", target.display()))?;
            tracing::info!(source = %source.display(), "stylesheet copied");
            Ok(true)
        }
        Err(err) => {
            tracing::warn!(
                source = %source.display(),
                error = %err,
                "stylesheet unavailable, writing fallback"
            );
            tokio::fs::write(&target, FALLBACK_STYLES)
                .await
                .with_context(|| format!("failed to write {}", target.display()))?;
            Ok(false)
        }
    }
}

async fn missing_outputs(out_dir: &Path) -> Vec<&'static str> {
    let mut missing = Vec::new();
    for name in REQUIRED_OUTPUTS {
        if !tokio::fs::try_exists(out_dir.join(name)).await.unwrap_or(false) {
            missing.push(name);
        }
    }
    missing
}
