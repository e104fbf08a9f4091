use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub const NS_MAIN_LABEL: &str = "Main";

/// Failure kinds the pipeline branches on. Everything else in the crate
/// reports through `anyhow`; the client boundary is typed because callers
/// must distinguish fatal response-shape problems from per-page conditions.
#[derive(Debug, Error)]
pub enum WikiError {
    #[error("malformed MediaWiki API response: {0}")]
    MalformedResponse(String),
    #[error("page not found: {0}")]
    PageNotFound(String),
    #[error("move destination already exists: {0}")]
    DestinationExists(String),
    #[error("no revisions available for {0}")]
    NoRevisions(String),
    #[error("edit not confirmed for {title}: {result}")]
    EditFailed { title: String, result: String },
    #[error("MediaWiki login failed: {0}")]
    LoginFailed(String),
    #[error("MediaWiki API error [{code}]: {info}")]
    Api { code: String, info: String },
    #[error("MediaWiki API request failed with HTTP {0}")]
    HttpStatus(StatusCode),
    #[error("MediaWiki API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid API URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("MediaWiki API request exhausted retry budget")]
    RetryExhausted,
}

pub type WikiResult<T> = Result<T, WikiError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub title: String,
    pub namespace: String,
}

impl PageRef {
    pub fn from_title(namespace_id: Option<i32>, title: String) -> Self {
        let namespace = namespace_label(namespace_id, &title);
        Self { title, namespace }
    }

    /// Title without its namespace prefix.
    pub fn base_title(&self) -> &str {
        if self.namespace == NS_MAIN_LABEL {
            return &self.title;
        }
        match self.title.split_once(':') {
            Some((_, rest)) => rest,
            None => &self.title,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryPage {
    pub members: Vec<PageRef>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub user: String,
    pub timestamp: String,
}

pub trait WikiApi {
    fn fetch_category_members(
        &mut self,
        category: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> WikiResult<CategoryPage>;
    fn fetch_page_text(&mut self, title: &str) -> WikiResult<String>;
    fn save_page_text(&mut self, title: &str, text: &str, summary: &str) -> WikiResult<()>;
    fn move_page(&mut self, title: &str, new_title: &str, reason: &str) -> WikiResult<()>;
    fn fetch_latest_revision(&mut self, title: &str) -> WikiResult<RevisionInfo>;
    fn login(&mut self, username: &str, password: &str) -> WikiResult<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &crate::config::BotConfig) -> Self {
        let api_default = config.wiki.api_url.as_deref().unwrap_or("");
        Self::from_env_with_defaults(api_default, &config.user_agent())
    }

    fn from_env_with_defaults(api_url_default: &str, user_agent_default: &str) -> Self {
        Self {
            api_url: env_value("WIKI_API_URL", api_url_default),
            user_agent: env_value("WIKI_USER_AGENT", user_agent_default),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            // Writes are not retried: a timed-out edit may have landed, and a
            // second attempt could mutate the page twice.
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 0),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> WikiResult<Value> {
        let base_url = Url::parse(&self.config.api_url).map_err(|error| WikiError::InvalidUrl {
            url: self.config.api_url.clone(),
            reason: error.to_string(),
        })?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            warn!(
                                "retrying MediaWiki read after HTTP {status} (attempt {}/{})",
                                attempt + 1,
                                self.config.max_retries
                            );
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        return Err(WikiError::HttpStatus(status));
                    }
                    return extract_payload(response);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        warn!(
                            "retrying MediaWiki read after transport error (attempt {}/{}): {error}",
                            attempt + 1,
                            self.config.max_retries
                        );
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(WikiError::Http(error));
                }
            }
        }

        Err(WikiError::RetryExhausted)
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> WikiResult<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let response = self
                .client
                .post(&self.config.api_url)
                .header("User-Agent", self.config.user_agent.clone())
                .form(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            warn!(
                                "retrying MediaWiki request after HTTP {status} (attempt {}/{})",
                                attempt + 1,
                                max_retries
                            );
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        return Err(WikiError::HttpStatus(status));
                    }
                    return extract_payload(response);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(WikiError::Http(error));
                }
            }
        }

        Err(WikiError::RetryExhausted)
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn ensure_csrf_token(&mut self) -> WikiResult<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse = decode_response(response, "csrf token response")?;
        let token = parsed
            .query
            .tokens
            .as_ref()
            .and_then(|tokens| tokens.csrftoken.as_ref())
            .cloned()
            .ok_or_else(|| {
                WikiError::MalformedResponse("token response carries no csrf token".to_string())
            })?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiApi for MediaWikiClient {
    fn fetch_category_members(
        &mut self,
        category: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> WikiResult<CategoryPage> {
        let category_title = if category.starts_with("Category:") {
            category.to_string()
        } else {
            format!("Category:{category}")
        };

        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "categorymembers".to_string()),
            ("cmtitle", category_title),
            ("cmlimit", limit.to_string()),
        ];
        if let Some(token) = cursor {
            params.push(("cmcontinue", token.to_string()));
        }

        let response = self.request_json_get(&params)?;
        category_page_from_response(response)
    }

    fn fetch_page_text(&mut self, title: &str) -> WikiResult<String> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        page_text_from_response(response, title)
    }

    fn save_page_text(&mut self, title: &str, text: &str, summary: &str) -> WikiResult<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(
            &[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", text.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ],
            true,
        )?;
        let parsed: EditResponse = decode_response(response, "edit response")?;
        let edit = parsed.edit.ok_or_else(|| {
            WikiError::MalformedResponse("edit response carries no edit payload".to_string())
        })?;
        if edit.result.as_deref() != Some("Success") {
            return Err(WikiError::EditFailed {
                title: title.to_string(),
                result: edit.result.unwrap_or_else(|| "unknown".to_string()),
            });
        }
        Ok(())
    }

    fn move_page(&mut self, title: &str, new_title: &str, reason: &str) -> WikiResult<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(
            &[
                ("action", "move".to_string()),
                ("from", title.to_string()),
                ("to", new_title.to_string()),
                ("reason", reason.to_string()),
                ("movetalk", "1".to_string()),
                ("token", token),
            ],
            true,
        );

        match response {
            Ok(payload) => {
                let parsed: MoveResponse = decode_response(payload, "move response")?;
                let moved = parsed.moved.ok_or_else(|| {
                    WikiError::MalformedResponse(
                        "move response carries no move payload".to_string(),
                    )
                })?;
                debug!(
                    "moved {} to {}",
                    moved.from.as_deref().unwrap_or(title),
                    moved.to.as_deref().unwrap_or(new_title)
                );
                Ok(())
            }
            Err(WikiError::Api { code, .. }) if code == "articleexists" => {
                Err(WikiError::DestinationExists(new_title.to_string()))
            }
            Err(error) => Err(error),
        }
    }

    fn fetch_latest_revision(&mut self, title: &str) -> WikiResult<RevisionInfo> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "timestamp|user".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        latest_revision_from_response(response, title)
    }

    fn login(&mut self, username: &str, password: &str) -> WikiResult<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse =
            decode_response(token_response, "login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .as_ref()
            .and_then(|tokens| tokens.logintoken.as_ref())
            .cloned()
            .ok_or_else(|| {
                WikiError::MalformedResponse("token response carries no login token".to_string())
            })?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse = decode_response(login_response, "login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => Err(WikiError::LoginFailed(
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn extract_payload(response: reqwest::blocking::Response) -> WikiResult<Value> {
    let payload: Value = response
        .json()
        .map_err(|error| WikiError::MalformedResponse(format!("response is not JSON: {error}")))?;
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        return Err(WikiError::Api {
            code: code.to_string(),
            info: info.to_string(),
        });
    }
    Ok(payload)
}

fn decode_response<T: DeserializeOwned>(payload: Value, context: &str) -> WikiResult<T> {
    serde_json::from_value(payload)
        .map_err(|error| WikiError::MalformedResponse(format!("{context}: {error}")))
}

fn category_page_from_response(payload: Value) -> WikiResult<CategoryPage> {
    let parsed: CategoryQueryResponse = decode_response(payload, "categorymembers response")?;
    let query = parsed.query.ok_or_else(|| {
        WikiError::MalformedResponse("categorymembers response carries no query field".to_string())
    })?;
    let items = query.categorymembers.ok_or_else(|| {
        WikiError::MalformedResponse(
            "categorymembers response carries no member list".to_string(),
        )
    })?;

    let mut members = Vec::with_capacity(items.len());
    for item in items {
        let title = item.title.ok_or_else(|| {
            WikiError::MalformedResponse("category member carries no title".to_string())
        })?;
        members.push(PageRef::from_title(item.ns, title));
    }

    Ok(CategoryPage {
        members,
        next_cursor: parsed
            .continuation
            .and_then(|continuation| continuation.cmcontinue),
    })
}

fn page_text_from_response(payload: Value, title: &str) -> WikiResult<String> {
    let page = single_page_from_response(payload)?;
    if page.missing.unwrap_or(false) {
        return Err(WikiError::PageNotFound(title.to_string()));
    }
    page.revisions
        .and_then(|revisions| revisions.into_iter().next())
        .and_then(|revision| revision.slots)
        .and_then(|slots| slots.main)
        .and_then(|slot| slot.content)
        .ok_or_else(|| {
            WikiError::MalformedResponse(format!("revision content missing for {title}"))
        })
}

fn latest_revision_from_response(payload: Value, title: &str) -> WikiResult<RevisionInfo> {
    let page = single_page_from_response(payload)?;
    if page.missing.unwrap_or(false) {
        return Err(WikiError::NoRevisions(title.to_string()));
    }
    let revision = page
        .revisions
        .and_then(|revisions| revisions.into_iter().next())
        .ok_or_else(|| WikiError::NoRevisions(title.to_string()))?;
    let user = revision.user.ok_or_else(|| {
        WikiError::MalformedResponse(format!("revision user missing for {title}"))
    })?;
    let timestamp = revision.timestamp.ok_or_else(|| {
        WikiError::MalformedResponse(format!("revision timestamp missing for {title}"))
    })?;
    Ok(RevisionInfo { user, timestamp })
}

fn single_page_from_response(payload: Value) -> WikiResult<RevisionPageItem> {
    let parsed: RevisionQueryResponse = decode_response(payload, "revisions response")?;
    let query = parsed.query.ok_or_else(|| {
        WikiError::MalformedResponse("revisions response carries no query field".to_string())
    })?;
    query
        .pages
        .and_then(|pages| pages.into_iter().next())
        .ok_or_else(|| {
            WikiError::MalformedResponse("revisions response carries no pages".to_string())
        })
}

fn namespace_label(namespace_id: Option<i32>, title: &str) -> String {
    if namespace_id == Some(0) {
        return NS_MAIN_LABEL.to_string();
    }
    match title.split_once(':') {
        Some((prefix, _)) if !prefix.is_empty() => prefix.to_string(),
        _ => NS_MAIN_LABEL.to_string(),
    }
}

fn env_value(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize)]
struct CategoryQueryResponse {
    query: Option<CategoryQueryPayload>,
    #[serde(rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize)]
struct CategoryQueryPayload {
    categorymembers: Option<Vec<CategoryMemberItem>>,
}

#[derive(Debug, Deserialize)]
struct ContinuationPayload {
    cmcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryMemberItem {
    ns: Option<i32>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryResponse {
    query: Option<RevisionQueryPayload>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryPayload {
    pages: Option<Vec<RevisionPageItem>>,
}

#[derive(Debug, Deserialize)]
struct RevisionPageItem {
    missing: Option<bool>,
    revisions: Option<Vec<RevisionItem>>,
}

#[derive(Debug, Deserialize)]
struct RevisionItem {
    user: Option<String>,
    timestamp: Option<String>,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MoveResponse {
    #[serde(rename = "move")]
    moved: Option<MovePayload>,
}

#[derive(Debug, Deserialize, Default)]
struct MovePayload {
    from: Option<String>,
    to: Option<String>,
}
