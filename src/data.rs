use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;

use crate::api;
use crate::feed::{Article, ArticleWithAuthor, Page};
use crate::session::Identity;

pub trait FeedService: Send + Sync {
    fn latest(&self, page: u32, size: u32) -> Result<Page<ArticleWithAuthor>>;
    fn by_author(&self, user_id: i64) -> Result<Vec<Article>>;
    fn detail(&self, article_id: i64) -> Result<ArticleWithAuthor>;
    fn publish(&self, draft: &api::NewArticle) -> Result<i64>;
}

pub trait CommentService: Send + Sync {
    fn list(&self, article_id: i64) -> Result<Vec<api::Comment>>;
    fn create(&self, comment: &api::NewComment) -> Result<api::Comment>;
}

pub trait EngagementService: Send + Sync {
    fn like(&self, user_id: i64, article_id: i64) -> Result<()>;
    fn unlike(&self, user_id: i64, article_id: i64) -> Result<()>;
    fn toggle(&self, user_id: i64, article_id: i64) -> Result<bool>;
    fn status(&self, user_id: i64, article_id: i64) -> Result<bool>;
    fn count(&self, article_id: i64) -> Result<i64>;
}

pub trait ProfileService: Send + Sync {
    fn register(&self, registration: &api::Registration) -> Result<i64>;
    fn login(&self, email: &str, password: &str) -> Result<Identity>;
    fn fetch(&self, user_id: i64) -> Result<Identity>;
}

pub struct HttpFeedService {
    client: Arc<api::Client>,
}

impl HttpFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for HttpFeedService {
    fn latest(&self, page: u32, size: u32) -> Result<Page<ArticleWithAuthor>> {
        let envelope = self
            .client
            .latest_articles(page, size)
            .context("fetch article feed")?;
        Ok(Page::from_envelope(envelope))
    }

    fn by_author(&self, user_id: i64) -> Result<Vec<Article>> {
        let articles = self
            .client
            .articles_by_user(user_id)
            .context("fetch author articles")?;
        Ok(articles.into_iter().map(Article::from).collect())
    }

    fn detail(&self, article_id: i64) -> Result<ArticleWithAuthor> {
        let detail = self
            .client
            .article_detail(article_id)
            .context("fetch article detail")?;
        Ok(ArticleWithAuthor::from(detail))
    }

    fn publish(&self, draft: &api::NewArticle) -> Result<i64> {
        self.client.create_article(draft).context("publish article")
    }
}

pub struct HttpCommentService {
    client: Arc<api::Client>,
}

impl HttpCommentService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for HttpCommentService {
    fn list(&self, article_id: i64) -> Result<Vec<api::Comment>> {
        self.client
            .comments_for_article(article_id)
            .context("fetch comments")
    }

    fn create(&self, comment: &api::NewComment) -> Result<api::Comment> {
        self.client.create_comment(comment).context("create comment")
    }
}

pub struct HttpEngagementService {
    client: Arc<api::Client>,
}

impl HttpEngagementService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl EngagementService for HttpEngagementService {
    fn like(&self, user_id: i64, article_id: i64) -> Result<()> {
        self.client.like(user_id, article_id).context("send like")
    }

    fn unlike(&self, user_id: i64, article_id: i64) -> Result<()> {
        self.client.unlike(user_id, article_id).context("send unlike")
    }

    fn toggle(&self, user_id: i64, article_id: i64) -> Result<bool> {
        self.client
            .toggle_like(user_id, article_id)
            .context("send like toggle")
    }

    fn status(&self, user_id: i64, article_id: i64) -> Result<bool> {
        self.client
            .like_status(user_id, article_id)
            .context("fetch like status")
    }

    fn count(&self, article_id: i64) -> Result<i64> {
        self.client.like_count(article_id).context("fetch like count")
    }
}

pub struct HttpProfileService {
    client: Arc<api::Client>,
}

impl HttpProfileService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ProfileService for HttpProfileService {
    fn register(&self, registration: &api::Registration) -> Result<i64> {
        self.client.register(registration).context("register user")
    }

    fn login(&self, email: &str, password: &str) -> Result<Identity> {
        let profile = self.client.login(email, password).context("log in")?;
        Ok(Identity::from(profile))
    }

    fn fetch(&self, user_id: i64) -> Result<Identity> {
        let profile = self.client.user(user_id).context("fetch profile")?;
        Ok(Identity::from(profile))
    }
}

// In-memory stand-ins with enough behavior to exercise the client without a
// backend; the engagement mock keeps real per-user like state.
#[derive(Default)]
pub struct MockFeedService {
    articles: Mutex<Vec<ArticleWithAuthor>>,
}

impl MockFeedService {
    pub fn with_articles(articles: Vec<ArticleWithAuthor>) -> Self {
        Self {
            articles: Mutex::new(articles),
        }
    }
}

impl FeedService for MockFeedService {
    fn latest(&self, page: u32, size: u32) -> Result<Page<ArticleWithAuthor>> {
        let articles = self.articles.lock();
        let size = size.max(1);
        let total = articles.len() as u32;
        let total_pages = total.div_ceil(size);
        let start = page as usize * size as usize;
        let items: Vec<ArticleWithAuthor> = articles
            .iter()
            .skip(start)
            .take(size as usize)
            .cloned()
            .collect();
        Ok(Page {
            items,
            number: page,
            size,
            total_pages,
            is_last: page + 1 >= total_pages,
        })
    }

    fn by_author(&self, user_id: i64) -> Result<Vec<Article>> {
        Ok(self
            .articles
            .lock()
            .iter()
            .filter(|entry| entry.article.author_id == user_id)
            .map(|entry| entry.article.clone())
            .collect())
    }

    fn detail(&self, article_id: i64) -> Result<ArticleWithAuthor> {
        self.articles
            .lock()
            .iter()
            .find(|entry| entry.article.id == article_id)
            .cloned()
            .ok_or_else(|| anyhow!("no article {article_id}"))
    }

    fn publish(&self, draft: &api::NewArticle) -> Result<i64> {
        let mut articles = self.articles.lock();
        let id = articles
            .iter()
            .map(|entry| entry.article.id)
            .max()
            .unwrap_or(0)
            + 1;
        articles.push(ArticleWithAuthor {
            article: Article {
                id,
                author_id: draft.user_id,
                title: draft.title.clone(),
                body: draft.body.clone(),
                category_id: draft.category_id,
                created_at: Some(Utc::now()),
                like_count: Some(0),
            },
            author: sample_identity(draft.user_id),
        });
        Ok(id)
    }
}

#[derive(Default)]
pub struct MockCommentService {
    comments: Mutex<Vec<api::Comment>>,
}

impl MockCommentService {
    pub fn with_comments(comments: Vec<api::Comment>) -> Self {
        Self {
            comments: Mutex::new(comments),
        }
    }
}

impl CommentService for MockCommentService {
    fn list(&self, article_id: i64) -> Result<Vec<api::Comment>> {
        Ok(self
            .comments
            .lock()
            .iter()
            .filter(|comment| comment.article_id == article_id)
            .cloned()
            .collect())
    }

    fn create(&self, comment: &api::NewComment) -> Result<api::Comment> {
        let mut comments = self.comments.lock();
        let id = comments.iter().map(|entry| entry.id).max().unwrap_or(0) + 1;
        let created = api::Comment {
            id,
            article_id: comment.article_id,
            article_title: String::new(),
            author_id: comment.user_id,
            author_name: format!("user-{}", comment.user_id),
            content: comment.content.clone(),
            created_at: Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            parent_id: None,
            parent_excerpt: None,
            parent_author: None,
        };
        comments.push(created.clone());
        Ok(created)
    }
}

#[derive(Default)]
pub struct MockEngagementService {
    likes: Mutex<HashSet<(i64, i64)>>,
    counts: Mutex<HashMap<i64, i64>>,
}

impl MockEngagementService {
    pub fn seed(&self, user_id: i64, article_id: i64, liked: bool, count: i64) {
        if liked {
            self.likes.lock().insert((user_id, article_id));
        } else {
            self.likes.lock().remove(&(user_id, article_id));
        }
        self.counts.lock().insert(article_id, count);
    }
}

impl EngagementService for MockEngagementService {
    fn like(&self, user_id: i64, article_id: i64) -> Result<()> {
        if self.likes.lock().insert((user_id, article_id)) {
            *self.counts.lock().entry(article_id).or_insert(0) += 1;
        }
        Ok(())
    }

    fn unlike(&self, user_id: i64, article_id: i64) -> Result<()> {
        if self.likes.lock().remove(&(user_id, article_id)) {
            let mut counts = self.counts.lock();
            let count = counts.entry(article_id).or_insert(0);
            *count = (*count - 1).max(0);
        }
        Ok(())
    }

    fn toggle(&self, user_id: i64, article_id: i64) -> Result<bool> {
        let liked = self.likes.lock().contains(&(user_id, article_id));
        if liked {
            self.unlike(user_id, article_id)?;
        } else {
            self.like(user_id, article_id)?;
        }
        Ok(!liked)
    }

    fn status(&self, user_id: i64, article_id: i64) -> Result<bool> {
        Ok(self.likes.lock().contains(&(user_id, article_id)))
    }

    fn count(&self, article_id: i64) -> Result<i64> {
        Ok(*self.counts.lock().get(&article_id).unwrap_or(&0))
    }
}

#[derive(Default)]
pub struct MockProfileService;

impl ProfileService for MockProfileService {
    fn register(&self, _registration: &api::Registration) -> Result<i64> {
        Ok(1)
    }

    fn login(&self, email: &str, _password: &str) -> Result<Identity> {
        let mut identity = sample_identity(1);
        identity.email = email.to_string();
        Ok(identity)
    }

    fn fetch(&self, user_id: i64) -> Result<Identity> {
        Ok(sample_identity(user_id))
    }
}

fn sample_identity(user_id: i64) -> Identity {
    Identity {
        id: user_id,
        name: format!("user-{user_id}"),
        email: format!("user-{user_id}@example.com"),
        joined_at: None,
        bio: String::new(),
        avatar: String::new(),
        followers: 0,
        following: 0,
    }
}
