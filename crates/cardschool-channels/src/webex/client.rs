//! Thin Webex REST client

use super::models::*;
use crate::error::ChannelError;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Retries after a 429 before giving up
const MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
const PAGE_SIZE: &str = "100";

/// Webex REST client authenticated as the bot
#[derive(Clone)]
pub struct WebexClient {
    http: Client,
    base_url: String,
    token: String,
    me: Arc<OnceCell<Person>>,
}

impl WebexClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|source| ChannelError::BaseUrl {
            url: base_url.to_string(),
            source,
        })?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            token: token.to_string(),
            me: Arc::new(OnceCell::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Send a request, sleeping through 429s, and turn error statuses into
    /// [`ChannelError::Api`]. `build` may be called once per attempt.
    async fn execute<F>(&self, method: Method, path: &str, build: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder>,
    {
        let url = self.url(path);
        let mut retries = 0;
        loop {
            let tracking_id = format!("cardschool_{}", Uuid::new_v4());
            let req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .header("TrackingID", &tracking_id);
            let resp = build(req)?
                .send()
                .await
                .with_context(|| format!("Failed to reach Webex API at {}", url))?;

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if retries >= MAX_RETRIES {
                    return Err(ChannelError::RateLimited {
                        path: path.to_string(),
                        retries,
                    }
                    .into());
                }
                let wait = retry_after(resp.headers());
                warn!("Webex rate limit hit on {}, retrying in {:?}", path, wait);
                tokio::time::sleep(wait).await;
                retries += 1;
                continue;
            }
            if !status.is_success() {
                let body: ApiErrorBody = resp.json().await.unwrap_or_default();
                return Err(ChannelError::Api {
                    method: method.to_string(),
                    path: path.to_string(),
                    status: status.as_u16(),
                    message: body.message,
                    tracking_id: body.tracking_id.or(Some(tracking_id)),
                }
                .into());
            }
            return Ok(resp);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.execute(Method::GET, path, Ok).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse Webex response from {}", path))
    }

    /// Fetch every page of a list endpoint, following `Link: rel="next"`
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let resp = match &next {
                None => {
                    self.execute(Method::GET, path, |req| Ok(req.query(query)))
                        .await?
                }
                Some(url) => self.execute(Method::GET, url, Ok).await?,
            };
            let link = next_link(resp.headers());
            let page: ListResponse<T> = resp
                .json()
                .await
                .with_context(|| format!("Failed to parse Webex list from {}", path))?;
            items.extend(page.items);
            match link {
                Some(url) => next = Some(url),
                None => return Ok(items),
            }
        }
    }

    /// The bot's own account, fetched once
    pub async fn me(&self) -> Result<Person> {
        let me = self
            .me
            .get_or_try_init(|| async { self.get_json::<Person>("people/me").await })
            .await?;
        Ok(me.clone())
    }

    pub async fn get_person(&self, person_id: &str) -> Result<Person> {
        self.get_json(&format!("people/{}", person_id)).await
    }

    pub async fn get_room(&self, room_id: &str) -> Result<Room> {
        self.get_json(&format!("rooms/{}", room_id)).await
    }

    /// Every room the bot is a member of
    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.list_all("rooms", &[("max", PAGE_SIZE)]).await
    }

    pub async fn list_memberships(&self, room_id: &str) -> Result<Vec<Membership>> {
        self.list_all("memberships", &[("roomId", room_id), ("max", PAGE_SIZE)])
            .await
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Message> {
        self.get_json(&format!("messages/{}", message_id)).await
    }

    pub async fn get_attachment_action(&self, action_id: &str) -> Result<AttachmentAction> {
        self.get_json(&format!("attachment/actions/{}", action_id))
            .await
    }

    pub async fn post_message(&self, message: &NewMessage) -> Result<Message> {
        let resp = self
            .execute(Method::POST, "messages", |req| Ok(req.json(message)))
            .await?;
        let posted: Message = resp.json().await.context("Failed to parse posted message")?;
        debug!("Posted message {}", posted.id);
        Ok(posted)
    }

    /// Post a local file to a room
    pub async fn upload(&self, room_id: &str, path: &Path) -> Result<Message> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let resp = self
            .execute(Method::POST, "messages", |req| {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime.as_ref())?;
                let form = Form::new()
                    .text("roomId", room_id.to_string())
                    .part("files", part);
                Ok(req.multipart(form))
            })
            .await?;
        resp.json().await.context("Failed to parse uploaded message")
    }

    /// Remove the bot from a room by deleting its own membership
    pub async fn leave_room(&self, room_id: &str) -> Result<()> {
        let me = self.me().await?;
        let memberships: Vec<Membership> = self
            .list_all("memberships", &[("roomId", room_id), ("personId", me.id.as_str())])
            .await?;
        let Some(own) = memberships.first() else {
            warn!("Bot has no membership in room {}; nothing to leave", room_id);
            return Ok(());
        };
        self.execute(Method::DELETE, &format!("memberships/{}", own.id), Ok)
            .await?;
        info!("Left room {}", room_id);
        Ok(())
    }

    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        self.list_all("webhooks", &[("max", PAGE_SIZE)]).await
    }

    pub async fn create_webhook(&self, webhook: &NewWebhook) -> Result<Webhook> {
        let resp = self
            .execute(Method::POST, "webhooks", |req| Ok(req.json(webhook)))
            .await?;
        resp.json().await.context("Failed to parse created webhook")
    }

    pub async fn delete_webhook(&self, webhook_id: &str) -> Result<()> {
        self.execute(Method::DELETE, &format!("webhooks/{}", webhook_id), Ok)
            .await?;
        Ok(())
    }
}

fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
        .min(MAX_RETRY_AFTER)
}

/// URL of the `rel="next"` entry of a Link header
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == "rel=\"next\"") {
            return None;
        }
        let target = target.trim();
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}
