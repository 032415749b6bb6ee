//! Cursor-based incremental mail sync.
//!
//! A pass walks the resource's delta feed: `@odata.nextLink` pages are
//! followed within the same call and never stored, the final
//! `@odata.deltaLink` becomes the resource's cursor. A stored cursor that the
//! server refuses is dropped and the pass restarts once from scratch.
//!
//! ```text
//! CursorStore.get ─▶ GET cursor (or initial delta URL)
//!                      │ nextLink ─▶ GET ... ─▶ GET ...
//!                      ▼ deltaLink
//!                  CursorStore.set ─▶ SyncPass { changes, cursor }
//! ```

use crate::auth::AccessTokenSource;
use crate::config::Config;
use crate::storage::StorageError;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod cursor;


pub use cursor::CursorStore;

/// Page size requested from the server
const PAGE_SIZE: usize = 50;

/// Longest raw error body kept in [`SyncError::Api`]
const MAX_ERROR_BODY: usize = 512;

/// One entry of a delta feed, in server order.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeRecord {
    /// Created or modified; carries the full item payload
    Upserted { id: String, item: Value },
    /// Tombstone; only the identifier survives
    Removed { id: String, reason: Option<String> },
}

impl ChangeRecord {
    pub fn id(&self) -> &str {
        match self {
            ChangeRecord::Upserted { id, .. } | ChangeRecord::Removed { id, .. } => id,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, ChangeRecord::Removed { .. })
    }

    fn from_item(item: Value) -> Result<Self, SyncError> {
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Decode("change item has no id".to_string()))?
            .to_string();

        if let Some(marker) = item.get("@removed") {
            let reason = marker
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(ChangeRecord::Removed { id, reason });
        }

        Ok(ChangeRecord::Upserted { id, item })
    }
}

/// Result of one successful pass.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncPass {
    pub changes: Vec<ChangeRecord>,
    /// The new resumption cursor, already persisted
    pub cursor: String,
}

/// Options for a stateless listing.
#[derive(Clone, Debug)]
pub struct MessageFilter {
    /// Only messages received at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
    pub unread_only: bool,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self {
            since: None,
            limit: PAGE_SIZE,
            unread_only: false,
        }
    }
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink", default)]
    delta_link: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Fetches mail resources, either by delta cursor or by filter query.
pub struct SyncGateway {
    config: Arc<Config>,
    tokens: Arc<dyn AccessTokenSource>,
    cursors: CursorStore,
    http_client: Client,
}

impl SyncGateway {
    pub fn new(config: Arc<Config>, tokens: Arc<dyn AccessTokenSource>, cursors: CursorStore) -> Self {
        let http_client = Client::builder()
            .user_agent(concat!("mailsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            config,
            tokens,
            cursors,
            http_client,
        }
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// Collection URL for a resource key. `draft` is accepted for `drafts`;
    /// any other key is used as a folder name or id.
    pub fn messages_url(&self, resource: &str) -> String {
        let folder = match resource {
            "draft" => "drafts",
            other => other,
        };
        format!(
            "{}/me/mailFolders/{}/messages",
            self.config.api_url(),
            urlencoding::encode(folder)
        )
    }

    /// Cursorless delta URL, the start of a full resync.
    pub fn delta_url(&self, resource: &str) -> String {
        format!("{}/delta", self.messages_url(resource))
    }

    /// Runs one sync pass for `resource` and persists the new cursor.
    pub async fn sync_resource(&self, resource: &str) -> Result<SyncPass, SyncError> {
        let token = self
            .tokens
            .access_token()
            .await
            .ok_or(SyncError::NotAuthenticated)?;

        let cursor = match self.cursors.get(resource) {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(resource = %resource, error = %e, "Cursor unreadable, running full sync");
                None
            }
        };

        let pass = match cursor {
            Some(cursor) => {
                debug!(resource = %resource, "Resuming from stored cursor");
                match self.walk(&token, &cursor).await {
                    Err(SyncError::Api { status, code, .. }) => {
                        warn!(
                            resource = %resource,
                            status,
                            code = ?code,
                            "Cursor rejected, resetting and running full sync"
                        );
                        // Retry starts from a clean slate either way
                        if let Err(e) = self.cursors.reset(Some(resource)) {
                            warn!(
                                resource = %resource,
                                error = %e,
                                "Cursor reset failed, retrying anyway"
                            );
                        }
                        self.walk(&token, &self.delta_url(resource)).await?
                    }
                    other => other?,
                }
            }
            None => {
                debug!(resource = %resource, "No cursor, running full sync");
                self.walk(&token, &self.delta_url(resource)).await?
            }
        };

        // The old cursor still replays these changes if this write is lost
        if let Err(e) = self.cursors.set(resource, &pass.cursor) {
            warn!(resource = %resource, error = %e, "Failed to persist cursor");
        }

        let removed = pass.changes.iter().filter(|c| c.is_removed()).count();
        info!(
            resource = %resource,
            changes = pass.changes.len(),
            removed,
            "Sync pass complete"
        );
        Ok(pass)
    }

    /// Drops the cursor of one resource, or all cursors.
    pub fn reset_cursor(&self, resource: Option<&str>) -> Result<(), StorageError> {
        self.cursors.reset(resource)
    }

    /// Stateless filtered listing, newest first (by send time for
    /// `sentItems`). Follows continuation pages
    /// until `filter.limit` items are collected.
    pub async fn list_messages(
        &self,
        resource: &str,
        filter: &MessageFilter,
    ) -> Result<Vec<Value>, SyncError> {
        let token = self
            .tokens
            .access_token()
            .await
            .ok_or(SyncError::NotAuthenticated)?;

        let mut clauses = Vec::new();
        if let Some(since) = filter.since {
            clauses.push(format!(
                "receivedDateTime ge {}",
                since.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
        if filter.unread_only {
            clauses.push("isRead eq false".to_string());
        }

        let order_by = match resource {
            "sentItems" => "sentDateTime desc",
            _ => "receivedDateTime desc",
        };
        let top = filter.limit.clamp(1, PAGE_SIZE).to_string();
        let mut params = vec![
            ("$orderby", order_by.to_string()),
            ("$top", top),
        ];
        if !clauses.is_empty() {
            params.push(("$filter", clauses.join(" and ")));
        }

        let mut url = Url::parse_with_params(&self.messages_url(resource), &params)
            .map_err(|e| SyncError::Decode(format!("invalid request URL: {}", e)))?
            .to_string();

        let mut items = Vec::new();
        loop {
            let page: Page = self.get_json(&token, &url).await?;
            items.extend(page.value);
            match page.next_link {
                Some(next) if items.len() < filter.limit => url = next,
                _ => break,
            }
        }
        items.truncate(filter.limit);

        debug!(resource = %resource, count = items.len(), "Listed messages");
        Ok(items)
    }

    /// Follows a delta feed from `start` to its final cursor.
    async fn walk(&self, token: &str, start: &str) -> Result<SyncPass, SyncError> {
        let mut url = start.to_string();
        let mut changes = Vec::new();
        let mut pages = 0usize;

        loop {
            let page: Page = self.get_json(token, &url).await?;
            pages += 1;
            for item in page.value {
                changes.push(ChangeRecord::from_item(item)?);
            }

            if let Some(next) = page.next_link {
                url = next;
                continue;
            }

            let cursor = page.delta_link.ok_or(SyncError::MissingCursor)?;
            debug!(pages, changes = changes.len(), "Delta feed caught up");
            return Ok(SyncPass { changes, cursor });
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, token: &str, url: &str) -> Result<T, SyncError> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .header("Prefer", format!("odata.maxpagesize={}", PAGE_SIZE))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))
    }
}

fn api_error(status: u16, body: &str) -> SyncError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => SyncError::Api {
            status,
            code: parsed.error.code,
            message: parsed.error.message.unwrap_or_default(),
        },
        Err(_) => {
            let mut message = body.trim().to_string();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
                message.push_str("...");
            }
            SyncError::Api {
                status,
                code: None,
                message,
            }
        }
    }
}

/// Synchronization failures
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Non-success status from the mail API
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    Transport(String),
    Decode(String),
    /// No access token is available
    NotAuthenticated,
    /// The feed ended without a resumption cursor
    MissingCursor,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Api {
                status,
                code: Some(code),
                message,
            } => write!(f, "Mail API error {} ({}): {}", status, code, message),
            SyncError::Api {
                status,
                code: None,
                message,
            } => write!(f, "Mail API error {}: {}", status, message),
            SyncError::Transport(msg) => write!(f, "Request to mail API failed: {}", msg),
            SyncError::Decode(msg) => write!(f, "Unexpected mail API response: {}", msg),
            SyncError::NotAuthenticated => write!(f, "Not authenticated; sign in first"),
            SyncError::MissingCursor => {
                write!(f, "Delta response ended without a resumption cursor")
            }
        }
    }
}

impl std::error::Error for SyncError {}
