//! # Service Wiring
//!
//! Builds the object graph from an [`AppConfig`]: one SQLite pool shared by
//! the audit store, the session store, the webhook outbox and the queue;
//! the audit chain (verified once at startup); the engine, restored from
//! the session store; the optional webhook dispatcher; and the reconciler
//! with an in-process or HTTP submitter.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use attest_audit::{AuditChain, AuditError, SqliteAuditStore};
use attest_core::{Clock, IdGenerator};
use attest_geo::GeoError;
use attest_queue::{OperationQueue, QueueError};
use attest_state::{SessionEngine, SessionError, SessionStore};
use attest_sync::{
    EngineSubmitter, HttpSubmitter, HttpSubmitterConfig, OperationSubmitter, SubmitError,
    SyncReconciler, WebhookDispatcher, WebhookError, WebhookOutbox,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Geo(#[from] GeoError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Submitter(#[from] SubmitError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

/// Everything the binary runs.
pub struct Services {
    pub state: AppState,
    pub pool: SqlitePool,
    /// Present when a webhook is configured.
    pub webhooks: Option<Arc<WebhookDispatcher>>,
}

/// Open the pool. In-memory databases get a single connection that is never
/// recycled, since each connection would otherwise see its own database.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    if database_url.contains(":memory:") {
        return SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await;
    }
    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options.journal_mode(SqliteJournalMode::Wal))
        .await
}

pub async fn build(
    config: &AppConfig,
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
) -> Result<Services, BootstrapError> {
    let store = SqliteAuditStore::new(pool.clone()).await?;
    let audit = Arc::new(AuditChain::new(Arc::new(store), clock.clone()));

    let verification = audit.verify_all().await?;
    if verification.valid {
        tracing::info!(entries = verification.checked, "audit chain verified");
    } else {
        tracing::error!(
            broken_at = ?verification.broken_at,
            kind = ?verification.kind,
            "audit chain failed verification at startup; transitions halted"
        );
    }

    let sessions = SessionStore::new(pool.clone()).await?;
    let engine = Arc::new(
        SessionEngine::restore(config.engine.clone(), audit, clock.clone(), ids, sessions).await?,
    );

    let webhooks = match &config.webhook {
        Some(webhook) => {
            let outbox = WebhookOutbox::new(pool.clone(), clock.clone(), webhook.outbox()).await?;
            engine.add_journal(Arc::new(outbox.clone()))?;
            let stats = outbox.stats().await?;
            tracing::info!(
                url = %webhook.url,
                pending = stats.pending + stats.processing,
                "webhook delivery enabled"
            );
            Some(Arc::new(WebhookDispatcher::new(webhook.clone(), outbox)?))
        }
        None => None,
    };

    let queue = OperationQueue::new(pool.clone(), clock.clone(), config.queue).await?;
    let submitter: Arc<dyn OperationSubmitter> = match &config.sync_remote_url {
        Some(url) => {
            let http = HttpSubmitter::new(HttpSubmitterConfig::new(url.clone()))?;
            tracing::info!(endpoint = %http.endpoint(), "queue drains to remote server");
            Arc::new(http)
        }
        None => Arc::new(EngineSubmitter::new(engine.clone())),
    };
    let reconciler = Arc::new(SyncReconciler::new(
        queue,
        submitter,
        config.sync_batch_size,
    ));

    Ok(Services {
        state: AppState::new(engine, reconciler, clock),
        pool,
        webhooks,
    })
}
