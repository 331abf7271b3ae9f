//! Readiness-guarded access to the service handles.
//!
//! Every operation that touches [`ServiceHandles`] goes through [`guarded`]:
//! it waits on the context's readiness gate first and fails with
//! [`GuardError::Unavailable`] without doing any work when the gate does not
//! become ready in time. Any failure is also posted to the context's notice
//! board.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::context::{AppContext, NoticeLevel};
use crate::readiness::DEFAULT_READY_TIMEOUT;
use crate::sanitize::sanitize_value;
use crate::services::{AuthError, Document, ServiceHandles, Session, StoreError};

pub const SERVICE_UNAVAILABLE: &str = "dependent service not available";

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("dependent service not available")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl GuardError {
    /// Message suitable for showing to the person using the app.
    pub fn user_message(&self) -> String {
        match self {
            GuardError::Unavailable => {
                "The database is not available right now. Please try refreshing the page."
                    .to_string()
            }
            GuardError::Auth(AuthError::InvalidCredentials) => {
                "Invalid email or password.".to_string()
            }
            GuardError::Auth(AuthError::AccountExists(email)) => {
                format!("An account already exists for {email}.")
            }
            GuardError::Store(StoreError::NotFound { .. }) => {
                "The requested record no longer exists.".to_string()
            }
            other => format!("Something went wrong: {other}"),
        }
    }
}

/// Run `op` once the context is ready, or fail fast with
/// [`GuardError::Unavailable`]. A failure of either kind is posted as a
/// dismissible notice before it is returned.
pub async fn guarded<T, E, Op, Fut>(
    ctx: &AppContext,
    timeout: Duration,
    op: Op,
) -> Result<T, GuardError>
where
    Op: FnOnce(Arc<ServiceHandles>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<GuardError>,
{
    let result = match ctx.gate().await_handles(timeout).await {
        Some(handles) => op(handles).await.map_err(Into::into),
        None => {
            tracing::warn!(state = ?ctx.gate().state(), "{SERVICE_UNAVAILABLE}");
            Err(GuardError::Unavailable)
        }
    };
    with_notice(ctx, result)
}

fn with_notice<T>(ctx: &AppContext, result: Result<T, GuardError>) -> Result<T, GuardError> {
    if let Err(err) = &result {
        let level = match err {
            GuardError::Auth(AuthError::InvalidCredentials) => NoticeLevel::Warning,
            _ => NoticeLevel::Error,
        };
        ctx.notices().post(level, err.user_message());
    }
    result
}

/// Document and account operations, each gated on readiness.
#[derive(Debug, Clone)]
pub struct GuardedStore {
    ctx: Arc<AppContext>,
    timeout: Duration,
}

impl GuardedStore {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self::with_timeout(ctx, DEFAULT_READY_TIMEOUT)
    }

    pub fn with_timeout(ctx: Arc<AppContext>, timeout: Duration) -> Self {
        Self { ctx, timeout }
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Document, GuardError> {
        guarded(&self.ctx, self.timeout, |handles| async move {
            handles.data.get(collection, id).await
        })
        .await
    }

    pub async fn list(&self, collection: &str) -> Result<Vec<Document>, GuardError> {
        guarded(&self.ctx, self.timeout, |handles| async move {
            handles.data.list(collection).await
        })
        .await
    }

    pub async fn create(&self, collection: &str, fields: Value) -> Result<String, GuardError> {
        guarded(&self.ctx, self.timeout, |handles| async move {
            handles.data.create(collection, sanitize_value(fields)).await
        })
        .await
    }

    pub async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), GuardError> {
        guarded(&self.ctx, self.timeout, |handles| async move {
            handles.data.update(collection, id, sanitize_value(fields)).await
        })
        .await
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<(), GuardError> {
        guarded(&self.ctx, self.timeout, |handles| async move {
            handles.data.delete(collection, id).await
        })
        .await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GuardError> {
        guarded(&self.ctx, self.timeout, |handles| async move {
            handles.auth.sign_in(email, password).await
        })
        .await
    }

    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        role: &str,
    ) -> Result<(), GuardError> {
        guarded(&self.ctx, self.timeout, |handles| async move {
            handles.auth.create_account(email, password, role).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ConfigPayload;
    use crate::readiness::ReadinessState;
    use crate::services::{ServiceFactory, SqliteServiceFactory};
    use serde_json::json;
    use tempfile::TempDir;

    async fn handles(dir: &TempDir) -> ServiceHandles {
        let config = ConfigPayload::development_fallback(|_| None)
            .validate()
            .unwrap();
        SqliteServiceFactory::new(dir.path())
            .connect(&config)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn failed_context_rejects_every_operation() {
        let ctx = Arc::new(AppContext::new());
        ctx.gate().signal_failed("endpoint unreachable");
        let store = GuardedStore::new(Arc::clone(&ctx));

        assert!(matches!(store.get("c", "1").await, Err(GuardError::Unavailable)));
        assert!(matches!(store.list("c").await, Err(GuardError::Unavailable)));
        assert!(matches!(
            store.create("c", json!({})).await,
            Err(GuardError::Unavailable)
        ));
        assert!(matches!(
            store.update("c", "1", json!({})).await,
            Err(GuardError::Unavailable)
        ));
        assert!(matches!(store.delete("c", "1").await, Err(GuardError::Unavailable)));
        assert!(matches!(
            store.sign_in("a@b.c", "pw").await,
            Err(GuardError::Unavailable)
        ));
        assert!(matches!(
            store.create_account("a@b.c", "pw", "patient").await,
            Err(GuardError::Unavailable)
        ));
        assert_eq!(GuardError::Unavailable.to_string(), SERVICE_UNAVAILABLE);

        let notices = ctx.notices().active();
        assert_eq!(notices.len(), 7);
        assert!(notices.iter().all(|n| n.level == NoticeLevel::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_op_does_no_work_on_timeout() {
        let ctx = AppContext::new();
        let mut ran = false;
        let result = guarded(&ctx, Duration::from_secs(10), |_| {
            ran = true;
            async { Ok::<_, StoreError>(()) }
        })
        .await;
        assert!(matches!(result, Err(GuardError::Unavailable)));
        assert!(!ran);
        assert_eq!(ctx.gate().state(), ReadinessState::Pending);
        assert_eq!(ctx.notices().active().len(), 1);
    }

    #[tokio::test]
    async fn operation_waits_for_late_ready_signal() {
        let dir = TempDir::new().unwrap();
        let ready = handles(&dir).await;
        let ctx = Arc::new(AppContext::new());
        let store = GuardedStore::with_timeout(Arc::clone(&ctx), Duration::from_secs(10));

        let signaller = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                ctx.gate().signal_ready(ready);
            })
        };

        let id = store
            .create("patients", json!({"name": "<i>Ann</i>"}))
            .await
            .unwrap();
        signaller.await.unwrap();

        let doc = store.get("patients", &id).await.unwrap();
        assert_eq!(doc.fields["name"], "iAnn/i");
    }

    #[tokio::test]
    async fn failures_become_dismissible_notices() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(AppContext::new());
        ctx.gate().signal_ready(handles(&dir).await);
        let store = GuardedStore::new(Arc::clone(&ctx));

        store
            .create_account("drjones@example.com", "password123", "physician")
            .await
            .unwrap();
        let result = store.sign_in("drjones@example.com", "nope").await;
        assert!(matches!(
            result,
            Err(GuardError::Auth(AuthError::InvalidCredentials))
        ));
        assert_eq!(ctx.gate().state(), ReadinessState::Ready);

        let notices = ctx.notices().active();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert_eq!(notices[0].message, "Invalid email or password.");
        assert!(ctx.notices().dismiss(notices[0].id));

        let session = store
            .sign_in("drjones@example.com", "password123")
            .await
            .unwrap();
        assert_eq!(session.role, "physician");
        assert!(ctx.notices().active().is_empty());
    }
}
