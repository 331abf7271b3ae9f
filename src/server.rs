use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tokio::net::TcpListener;
use warp::http::{HeaderValue, Method, StatusCode, header};
use warp::reply::Response as WarpResponse;
use warp::{Filter, Reply};

use crate::Config;
use crate::config::Mode;
use crate::payload::ConfigPayload;

const CACHE_CONTROL_CONFIG: &str = "public, max-age=300";

#[derive(Debug, Clone)]
pub struct AppState {
    payload: Arc<ConfigPayload>,
}

impl AppState {
    pub fn new(payload: ConfigPayload) -> Self {
        Self {
            payload: Arc::new(payload),
        }
    }

    pub fn payload(&self) -> &ConfigPayload {
        self.payload.as_ref()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: &'static str,
}

pub async fn run_server(config: Config) -> Result<()> {
    let serve_options = match &config.mode {
        Mode::Serve(opts) => opts.clone(),
        _ => return Err(anyhow!("server mode requires the serve subcommand")),
    };

    let missing = serve_options.payload.missing_required();
    if !missing.is_empty() {
        tracing::warn!(
            ?missing,
            "required configuration fields are unset; /api/config will answer 500"
        );
    }

    let state = Arc::new(AppState::new(serve_options.payload));

    let routes = routes(state);
    let listener = TcpListener::bind((serve_options.bind, serve_options.port)).await?;
    let listening_addr = listener.local_addr()?;
    let server_future = warp::serve(routes)
        .incoming(listener)
        .graceful(shutdown_future())
        .run();

    tracing::info!(
        "Serving configuration at http://{}:{}/api/config",
        listening_addr.ip(),
        listening_addr.port()
    );

    server_future.await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_future() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
    }
    tracing::info!("shutdown requested");
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let config_route = warp::path("api")
        .and(warp::path("config"))
        .and(warp::path::end())
        .and(warp::method())
        .and(with_state(state))
        .and_then(config_handler);

    let health_route = warp::path("healthz")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| "ok");

    config_route.or(health_route)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn config_handler(method: Method, state: Arc<AppState>) -> Result<WarpResponse, Infallible> {
    if method != Method::GET {
        let mut response = WarpResponse::new("Method Not Allowed".to_string().into());
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET"));
        insert_cors_headers(&mut response);
        return Ok(response);
    }

    let missing = state.payload().missing_required();
    if !missing.is_empty() {
        tracing::error!(?missing, "Missing required configuration fields");
        let body = ErrorBody {
            error: "Server configuration error",
            message: "Missing required configuration fields",
        };
        let mut response = warp::reply::json(&body).into_response();
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        insert_cors_headers(&mut response);
        return Ok(response);
    }

    let mut response = warp::reply::json(state.payload()).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL_CONFIG),
    );
    insert_cors_headers(&mut response);
    tracing::info!("configuration served");
    Ok(response)
}

fn insert_cors_headers(response: &mut WarpResponse) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn complete_payload() -> ConfigPayload {
        ConfigPayload {
            api_key: Some("key".into()),
            auth_domain: Some("clinic.firebaseapp.com".into()),
            project_id: Some("clinic".into()),
            app_id: Some("1:2:web:3".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_returns_payload_with_cache_and_cors_headers() {
        let routes = routes(Arc::new(AppState::new(complete_payload())));
        let resp = warp::test::request()
            .method("GET")
            .path("/api/config")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=300"
        );
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["apiKey"], "key");
        assert_eq!(body["appId"], "1:2:web:3");
        assert!(body.get("measurementId").is_none());
    }

    #[tokio::test]
    async fn non_get_methods_are_rejected() {
        let routes = routes(Arc::new(AppState::new(complete_payload())));
        for method in ["POST", "PUT", "DELETE", "PATCH"] {
            let resp = warp::test::request()
                .method(method)
                .path("/api/config")
                .reply(&routes)
                .await;
            assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
            assert_eq!(resp.body().as_ref(), b"Method Not Allowed");
        }
    }

    #[tokio::test]
    async fn missing_required_fields_yield_500_without_leaking_names() {
        let payload = ConfigPayload {
            api_key: None,
            ..complete_payload()
        };
        let routes = routes(Arc::new(AppState::new(payload)));
        let resp = warp::test::request().path("/api/config").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.headers().get(header::CACHE_CONTROL).is_none());
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["error"], "Server configuration error");
        assert_eq!(body["message"], "Missing required configuration fields");
        assert!(!String::from_utf8_lossy(resp.body()).contains("apiKey"));
    }

    #[tokio::test]
    async fn health_probe_answers_ok() {
        let routes = routes(Arc::new(AppState::new(ConfigPayload::default())));
        let resp = warp::test::request().path("/healthz").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_ref(), b"ok");
    }
}
