use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use tokio::net::TcpListener;
use url::Url;

use sitegate::AppContext;
use sitegate::client::ConfigClient;
use sitegate::guard::{GuardError, GuardedStore};
use sitegate::initializer::{InitError, Initializer};
use sitegate::payload::ConfigPayload;
use sitegate::readiness::ReadinessState;
use sitegate::server::{self, AppState};
use sitegate::services::SqliteServiceFactory;

async fn spawn_config_server(payload: ConfigPayload) -> Url {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = server::routes(Arc::new(AppState::new(payload)));
    tokio::spawn(warp::serve(routes).incoming(listener).run());
    Url::parse(&format!("http://{addr}/api/config")).unwrap()
}

fn client(url: Url) -> ConfigClient {
    ConfigClient::new(url, "sitegate-integration", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn initializes_from_served_configuration_and_runs_guarded_crud() {
    let url = spawn_config_server(ConfigPayload {
        api_key: Some("clinic-key".into()),
        auth_domain: Some("clinic.firebaseapp.com".into()),
        project_id: Some("clinic".into()),
        storage_bucket: Some("clinic.appspot.com".into()),
        ..Default::default()
    })
    .await;
    let data_dir = tempfile::tempdir().unwrap();
    let ctx = Arc::new(AppContext::new());
    let store = GuardedStore::new(Arc::clone(&ctx));

    let init = Initializer::new(
        client(url),
        SqliteServiceFactory::new(data_dir.path()),
        "clinic.example.com",
    );
    let pending_create = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .create("appointments", json!({"patient": "John", "status": "scheduled"}))
                .await
        })
    };

    init.run(&ctx).await.unwrap();
    let id = pending_create.await.unwrap().unwrap();
    assert!(ctx.is_ready());
    assert!(data_dir.path().join("clinic.db").exists());

    store
        .update("appointments", &id, json!({"status": "done"}))
        .await
        .unwrap();
    let listed = store.list("appointments").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].fields["status"], "done");
    assert_eq!(listed[0].fields["patient"], "John");

    store.delete("appointments", &id).await.unwrap();
    assert!(ctx.notices().active().is_empty());
    let missing = store.get("appointments", &id).await;
    assert!(matches!(missing, Err(GuardError::Store(_))));
    let notices = ctx.notices().active();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "The requested record no longer exists.");
    assert_eq!(ctx.gate().state(), ReadinessState::Ready);
}

#[tokio::test]
async fn misconfigured_server_fails_initialization_in_production() {
    let url = spawn_config_server(ConfigPayload {
        auth_domain: Some("clinic.firebaseapp.com".into()),
        project_id: Some("clinic".into()),
        ..Default::default()
    })
    .await;
    let data_dir = tempfile::tempdir().unwrap();
    let ctx = Arc::new(AppContext::new());

    let err = Initializer::new(
        client(url),
        SqliteServiceFactory::new(data_dir.path()),
        "example-prod.com",
    )
    .run(&ctx)
    .await
    .unwrap_err();
    assert!(matches!(err, InitError::Fetch(_)));
    assert_eq!(ctx.gate().state(), ReadinessState::Failed);

    let store = GuardedStore::with_timeout(Arc::clone(&ctx), Duration::from_secs(10));
    let result = store.list("appointments").await;
    assert!(matches!(result, Err(GuardError::Unavailable)));
    // One notice from initialization, one from the rejected operation.
    assert_eq!(ctx.notices().active().len(), 2);
}

#[tokio::test]
async fn unreachable_endpoint_on_preview_host_falls_back() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/config");
            then.status(502);
        })
        .await;
    let data_dir = tempfile::tempdir().unwrap();
    let ctx = Arc::new(AppContext::new());

    Initializer::new(
        client(Url::parse(&server.url("/api/config")).unwrap()),
        SqliteServiceFactory::new(data_dir.path()),
        "deploy-preview-4--clinic.netlify.app",
    )
    .with_fallback(ConfigPayload::development_fallback(|_| None))
    .run(&ctx)
    .await
    .unwrap();

    let store = GuardedStore::new(Arc::clone(&ctx));
    store
        .create_account("cybrisjc@example.com", "password123", "admin")
        .await
        .unwrap();
    let session = store
        .sign_in("cybrisjc@example.com", "password123")
        .await
        .unwrap();
    assert_eq!(session.auth_domain, "demo-project.firebaseapp.com");
}
