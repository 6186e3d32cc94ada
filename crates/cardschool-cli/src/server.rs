//! Webhook server: health check, webhook intake and static card images

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cardschool_channels::webex::models::{NewWebhook, Person};
use cardschool_channels::{
    ChannelError, RateLimiter, WebexClient, WebhookEnvelope, classify, resolve,
};
use cardschool_core::config::StoreKind;
use cardschool_core::store::{MemoryBackend, SqliteBackend, StoreBackend};
use cardschool_core::{
    Bot, BotEvent, CachedStore, Config, GatePolicy, GateRegistry, LessonCatalog, LessonNavigator,
    Participant,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Name of the firehose webhook this bot owns
pub const WEBHOOK_NAME: &str = "cardschool firehose";

const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<Bot>,
    pub client: Arc<WebexClient>,
    /// The bot's own account, for recognizing its own activity
    pub me: Arc<Person>,
    pub limiter: RateLimiter,
}

/// Error returned from a handler
pub struct AppError(StatusCode, anyhow::Error);

impl From<ChannelError> for AppError {
    fn from(e: ChannelError) -> Self {
        let status = match e {
            ChannelError::Payload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        AppError(status, e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        warn!("Webhook rejected ({}): {:#}", self.0, self.1);
        (self.0, format!("{:#}", self.1)).into_response()
    }
}

/// Build the router. Card images are served from `static_dir` under /static.
pub fn router(state: AppState, static_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/", get(handle_health))
        .route("/webhook", post(handle_webhook))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health(State(state): State<AppState>) -> String {
    format!(
        "I'm alive. To use this app add {} to a Webex Teams space.",
        state.me.primary_email()
    )
}

/// Acknowledge right away and process the notification in the background;
/// the platform retries notifications that are slow to be acknowledged.
async fn handle_webhook(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> Result<StatusCode, AppError> {
    let notification = classify(&envelope, &state.me.id)?;
    if let Some(sender) = notification.sender() {
        if !state.limiter.allow(sender) {
            return Ok(StatusCode::OK);
        }
    }

    tokio::spawn(async move {
        match resolve(notification, &state.client, &state.me).await {
            Ok(Some(event)) => state.bot.handle(event).await,
            Ok(None) => {}
            Err(e) => warn!(
                "Failed to resolve {} {} webhook: {:#}",
                envelope.resource, envelope.event, e
            ),
        }
    });
    Ok(StatusCode::OK)
}

/// Open the configured state backend
pub fn open_backend(config: &Config) -> Result<Arc<dyn StoreBackend>> {
    match config.store.backend {
        StoreKind::Sqlite => {
            let path = config.store.sqlite_path();
            let backend = SqliteBackend::open(&path)
                .with_context(|| format!("Failed to open state database {:?}", path))?;
            Ok(Arc::new(backend))
        }
        StoreKind::Memory => {
            warn!("Using the in-memory store. Space state will be lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

/// Wire the bot together from its parts
pub fn build_bot(
    config: &Config,
    catalog: LessonCatalog,
    backend: Arc<dyn StoreBackend>,
    client: Arc<WebexClient>,
    me: &Person,
) -> Bot {
    let store = Arc::new(CachedStore::new(backend));
    let gates = GateRegistry::new(
        GatePolicy::from_config(&config.gate),
        store.clone(),
        client.clone(),
        client.clone(),
    );
    let navigator = LessonNavigator::new(
        Arc::new(catalog),
        store.clone(),
        config.bot.image_hosting_url.clone(),
    );
    Bot::new(
        Participant::from(me),
        gates,
        store,
        navigator,
        client.clone(),
        client,
        config.admin.clone(),
    )
}

/// Replace any webhook of ours with one pointing at `target_url`
pub async fn register_webhook(client: &WebexClient, target_url: &str) -> Result<()> {
    for hook in client.list_webhooks().await? {
        if hook.name == WEBHOOK_NAME {
            debug!("Deleting old webhook {} -> {}", hook.id, hook.target_url);
            client.delete_webhook(&hook.id).await?;
        }
    }
    let hook = client
        .create_webhook(&NewWebhook {
            name: WEBHOOK_NAME.to_string(),
            target_url: target_url.to_string(),
            resource: "all".to_string(),
            event: "all".to_string(),
        })
        .await?;
    info!("Registered webhook {} -> {}", hook.id, hook.target_url);
    Ok(())
}

/// Spawn every room the bot is already a member of, without greetings
async fn rediscover(bot: Arc<Bot>, client: Arc<WebexClient>) {
    let rooms = match client.list_rooms().await {
        Ok(rooms) => rooms,
        Err(e) => {
            error!("Failed to list rooms at startup: {:#}", e);
            return;
        }
    };
    info!("Rediscovering {} spaces", rooms.len());
    for room in &rooms {
        bot.handle(BotEvent::Spawned {
            conversation: room.into(),
            added_by: None,
        })
        .await;
    }
    info!(
        "Rediscovery finished, {} spaces registered",
        bot.gates().len()
    );
}

/// Run the bot until `cancel` fires
pub async fn run(config: Config, cancel: CancellationToken) -> Result<()> {
    config.validate()?;

    let catalog = LessonCatalog::load(&config.lessons.dir)
        .with_context(|| format!("Failed to load lessons from {:?}", config.lessons.dir))?;
    info!("Loaded {} lessons", catalog.len());

    let backend = open_backend(&config)?;
    let client = Arc::new(WebexClient::new(
        &config.bot.api_base_url,
        &config.bot.token,
        Duration::from_secs(config.bot.request_timeout_secs),
    )?);
    let me = client
        .me()
        .await
        .context("Failed to look up the bot's own account. Is the token valid?")?;
    info!("Running as {} <{}>", me.display_name, me.primary_email());

    let bot = Arc::new(build_bot(&config, catalog, backend, client.clone(), &me));
    tokio::spawn(rediscover(bot.clone(), client.clone()));

    match &config.server.webhook_url {
        Some(url) => register_webhook(&client, url)
            .await
            .context("Failed to register webhook")?,
        None => info!("No webhook_url configured, assuming the webhook is registered elsewhere"),
    }

    let limiter = RateLimiter::new(config.server.rate_limit_per_minute, Duration::from_secs(60));
    let pruner = limiter.clone();
    let prune_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            tokio::select! {
                _ = prune_cancel.cancelled() => break,
                _ = interval.tick() => pruner.prune(),
            }
        }
    });

    let state = AppState {
        bot,
        client,
        me: Arc::new(me),
        limiter,
    };
    let app = router(state, &config.server.static_dir);
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {} (Ctrl+C to stop)", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardschool_core::lessons::{Lesson, LessonInfo};
    use serde_json::json;

    fn catalog() -> LessonCatalog {
        LessonCatalog::from_lessons(vec![Lesson {
            index: 0,
            info: LessonInfo {
                title: "Welcome".into(),
                index: None,
                content_file: None,
                custom_handler_file: None,
            },
            card: json!({"type": "AdaptiveCard", "body": []}),
        }])
        .unwrap()
    }

    async fn serve(limit: usize) -> (String, tempfile::TempDir) {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("logo.txt"), "cards").unwrap();

        // Nothing listens here; background lookups fail and are logged
        let client = Arc::new(
            WebexClient::new("http://127.0.0.1:9", "token", Duration::from_secs(1)).unwrap(),
        );
        let me = Person {
            id: "bot-id".into(),
            emails: vec!["cards@webex.bot".into()],
            display_name: "Card School".into(),
            avatar: None,
        };
        let config = Config::default();
        let backend = Arc::new(MemoryBackend::new());
        let bot = build_bot(&config, catalog(), backend, client.clone(), &me);
        let state = AppState {
            bot: Arc::new(bot),
            client,
            me: Arc::new(me),
            limiter: RateLimiter::new(limit, Duration::from_secs(60)),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state, static_dir.path());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), static_dir)
    }

    #[tokio::test]
    async fn test_health_names_the_bot() {
        let (base, _dir) = serve(5).await;
        let body = reqwest::get(format!("{}/", base)).await.unwrap().text().await.unwrap();
        assert_eq!(
            body,
            "I'm alive. To use this app add cards@webex.bot to a Webex Teams space."
        );
    }

    #[tokio::test]
    async fn test_serves_static_files() {
        let (base, _dir) = serve(5).await;
        let resp = reqwest::get(format!("{}/static/logo.txt", base)).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "cards");
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_and_rejects_malformed() {
        let (base, _dir) = serve(5).await;
        let http = reqwest::Client::new();

        let ok = http
            .post(format!("{}/webhook", base))
            .json(&json!({
                "resource": "messages",
                "event": "created",
                "data": {"id": "m1", "roomId": "r1", "personId": "p1"}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);

        let bad = http
            .post(format!("{}/webhook", base))
            .json(&json!({
                "resource": "messages",
                "event": "created",
                "data": {"id": "m1"}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), 400);
    }

    #[tokio::test]
    async fn test_webhook_rate_limited_still_acknowledged() {
        let (base, _dir) = serve(1).await;
        let http = reqwest::Client::new();
        for _ in 0..3 {
            let resp = http
                .post(format!("{}/webhook", base))
                .json(&json!({
                    "resource": "attachmentActions",
                    "event": "created",
                    "data": {"id": "a1", "roomId": "r1", "personId": "p1"}
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
        }
    }
}
