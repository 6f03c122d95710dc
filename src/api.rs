use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::blocking::{multipart, Client as HttpClient, RequestBuilder, Response};
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api: client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base).with_context(|| format!("api: parse base url {base}"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
                .build()
                .context("api: build http client")?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn latest_articles(&self, page: u32, size: u32) -> Result<PageEnvelope<ArticleWithAuthor>> {
        let params = [
            ("page", page.to_string()),
            ("size", size.to_string()),
        ];
        let resp = self.get("/api/articles/get-new", &params)?;
        resp.json().context("api: decode article page")
    }

    pub fn articles_by_user(&self, user_id: i64) -> Result<Vec<Article>> {
        let params = [("userId", user_id.to_string())];
        let resp = self.post("/api/articles/find-by-user-id", &params)?;
        resp.json().context("api: decode author articles")
    }

    pub fn article_detail(&self, article_id: i64) -> Result<ArticleWithAuthor> {
        let resp = self.get(&format!("/api/articles/{article_id}"), &[])?;
        resp.json().context("api: decode article detail")
    }

    pub fn create_article(&self, draft: &NewArticle) -> Result<i64> {
        let form = multipart::Form::new()
            .text("userId", draft.user_id.to_string())
            .text("title", draft.title.clone())
            .text("text", draft.body.clone())
            .text("select", draft.category_id.to_string());
        let resp = self.post_multipart("/api/articles/new-post", form)?;
        let body = resp.text().context("api: read create-article body")?;
        decode_created_id(&body)
    }

    pub fn like(&self, user_id: i64, article_id: i64) -> Result<()> {
        let resp = self.post("/api/article-likes/like", &like_params(user_id, article_id))?;
        let body = resp.text().context("api: read like body")?;
        decode_ack(&body)
    }

    pub fn unlike(&self, user_id: i64, article_id: i64) -> Result<()> {
        let resp = self.post("/api/article-likes/unlike", &like_params(user_id, article_id))?;
        let body = resp.text().context("api: read unlike body")?;
        decode_ack(&body)
    }

    // The backend reports the toggle outcome as a string body; `decode_toggle`
    // is the only place that string is ever inspected.
    pub fn toggle_like(&self, user_id: i64, article_id: i64) -> Result<bool> {
        let resp = self.post("/api/article-likes/toggle", &like_params(user_id, article_id))?;
        let body = resp.text().context("api: read toggle body")?;
        decode_toggle(&body)
    }

    pub fn like_status(&self, user_id: i64, article_id: i64) -> Result<bool> {
        let resp = self.get("/api/article-likes/status", &like_params(user_id, article_id))?;
        let body = resp.text().context("api: read status body")?;
        decode_flag(&body)
    }

    pub fn like_count(&self, article_id: i64) -> Result<i64> {
        let params = [("articleId", article_id.to_string())];
        let resp = self.get("/api/article-likes/count", &params)?;
        let body = resp.text().context("api: read count body")?;
        decode_count(&body)
    }

    pub fn create_comment(&self, comment: &NewComment) -> Result<Comment> {
        let resp = self.post_json("/api/comments", comment)?;
        resp.json().context("api: decode created comment")
    }

    pub fn comments_for_article(&self, article_id: i64) -> Result<Vec<Comment>> {
        let resp = self.get(&format!("/api/comments/article/{article_id}"), &[])?;
        resp.json().context("api: decode comment list")
    }

    pub fn register(&self, registration: &Registration) -> Result<i64> {
        let form = multipart::Form::new()
            .text("userName", registration.name.clone())
            .text("userPassword", registration.password.clone())
            .text("userShow", registration.bio.clone())
            .text("userEmail", registration.email.clone());
        let resp = self.post_multipart("/api/user/register", form)?;
        let body = resp.text().context("api: read register body")?;
        decode_created_id(&body)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Author> {
        let form = multipart::Form::new()
            .text("email", email.to_string())
            .text("password", password.to_string());
        let resp = self.post_multipart("/api/user/login", form)?;
        resp.json().context("api: decode login profile")
    }

    pub fn user(&self, user_id: i64) -> Result<Author> {
        let resp = self.get(&format!("/api/user/{user_id}"), &[])?;
        resp.json().context("api: decode user profile")
    }

    fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Response> {
        let url = self.url_for(path, params)?;
        self.dispatch(self.http.get(url))
    }

    fn post(&self, path: &str, params: &[(&str, String)]) -> Result<Response> {
        let url = self.url_for(path, params)?;
        self.dispatch(self.http.post(url))
    }

    fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let url = self.url_for(path, &[])?;
        self.dispatch(self.http.post(url).json(body))
    }

    fn post_multipart(&self, path: &str, form: multipart::Form) -> Result<Response> {
        let url = self.url_for(path, &[])?;
        self.dispatch(self.http.post(url).multipart(form))
    }

    fn url_for(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("api: join url {path}"))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn dispatch(&self, req: RequestBuilder) -> Result<Response> {
        let resp = req
            .header(USER_AGENT, self.user_agent.clone())
            .send()
            .context("api: send request")?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        match status.as_u16() {
            401 => Err(anyhow!("api: unauthorized")),
            403 => Err(anyhow!("api: forbidden")),
            404 => Err(anyhow!("api: not found")),
            _ => Err(anyhow!("api: error {}: {}", status, body)),
        }
    }
}

fn like_params(user_id: i64, article_id: i64) -> [(&'static str, String); 2] {
    [
        ("userId", user_id.to_string()),
        ("articleId", article_id.to_string()),
    ]
}

// Bodies arrive either as bare text or as a JSON scalar; strip the quoting
// before interpreting them.
fn scrub(body: &str) -> &str {
    body.trim().trim_matches('"').trim()
}

pub(crate) fn decode_ack(body: &str) -> Result<()> {
    let text = scrub(body);
    match text.parse::<i64>() {
        Ok(200) => Ok(()),
        Ok(code) => Err(anyhow!("api: like endpoint answered {code}")),
        Err(_) => Err(anyhow!("api: like endpoint answered {text:?}")),
    }
}

// The server encodes the toggle outcome in the body string: any body
// containing "200" is success and a "liked"/"unliked" prefix carries the
// authoritative state. Kept compatible with the deployed server even though
// it conflates payload content with status.
pub(crate) fn decode_toggle(body: &str) -> Result<bool> {
    let text = scrub(body);
    if !text.contains("200") {
        bail!("api: toggle rejected: {text:?}");
    }
    Ok(text.starts_with("liked"))
}

pub(crate) fn decode_flag(body: &str) -> Result<bool> {
    match scrub(body) {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(anyhow!("api: status body not boolean: {other:?}")),
    }
}

pub(crate) fn decode_count(body: &str) -> Result<i64> {
    let text = scrub(body);
    if text.is_empty() || text == "null" {
        return Ok(0);
    }
    text.parse::<i64>()
        .map_err(|_| anyhow!("api: count body not numeric: {text:?}"))
}

pub(crate) fn decode_created_id(body: &str) -> Result<i64> {
    let text = scrub(body);
    if let Ok(id) = text.parse::<i64>() {
        return Ok(id);
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        for key in ["artId", "userId", "id"] {
            if let Some(id) = value.get(key).and_then(Value::as_i64) {
                return Ok(id);
            }
        }
    }
    Err(anyhow!("api: no id in creation response: {text:?}"))
}

pub fn parse_backend_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    #[serde(rename = "artId")]
    pub id: i64,
    #[serde(rename = "artUserId", default)]
    pub author_id: i64,
    #[serde(rename = "artTitle", default)]
    pub title: String,
    #[serde(rename = "artTypeId", default)]
    pub category_id: i64,
    #[serde(rename = "artContent", default)]
    pub body: String,
    #[serde(rename = "artCreTime", default)]
    pub created_at: String,
    #[serde(rename = "artLikeNum", default)]
    pub like_count: Option<i64>,
}

impl Article {
    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        parse_backend_time(&self.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    #[serde(rename = "userId")]
    pub id: i64,
    #[serde(rename = "userName", default)]
    pub name: String,
    #[serde(rename = "userEmail", default)]
    pub email: String,
    #[serde(rename = "userTime", default)]
    pub joined_at: String,
    #[serde(rename = "userShow", default)]
    pub bio: String,
    #[serde(rename = "userImg", default)]
    pub avatar: String,
    #[serde(rename = "userConcern", default)]
    pub following: i64,
    #[serde(rename = "userFans", default)]
    pub followers: i64,
}

impl Author {
    pub fn joined_time(&self) -> Option<DateTime<Utc>> {
        parse_backend_time(&self.joined_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleWithAuthor {
    pub article: Article,
    #[serde(rename = "user")]
    pub author: Author,
}

// Spring-style page envelope; only the fields the client consumes are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(rename = "totalPages", default)]
    pub total_pages: u32,
    #[serde(default)]
    pub last: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "commentId")]
    pub id: i64,
    #[serde(rename = "articleId", default)]
    pub article_id: i64,
    #[serde(rename = "articleTitle", default)]
    pub article_title: String,
    #[serde(rename = "userId", default)]
    pub author_id: i64,
    #[serde(rename = "userName", default)]
    pub author_name: String,
    #[serde(rename = "commentContent", default)]
    pub content: String,
    #[serde(rename = "commentTime", default)]
    pub created_at: String,
    #[serde(rename = "parentCommentId", default)]
    pub parent_id: Option<i64>,
    #[serde(rename = "parentCommentContent", default)]
    pub parent_excerpt: Option<String>,
    #[serde(rename = "parentCommentUserName", default)]
    pub parent_author: Option<String>,
}

impl Comment {
    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        parse_backend_time(&self.created_at)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    #[serde(rename = "articleId")]
    pub article_id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub user_id: i64,
    pub title: String,
    pub body: String,
    pub category_id: i64,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub password: String,
    pub bio: String,
    pub email: String,
}
