use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::api;
use crate::data::FeedService;
use crate::engagement::Coordinator;
use crate::session::Identity;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub body: String,
    pub category_id: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub like_count: Option<i64>,
}

impl From<api::Article> for Article {
    fn from(article: api::Article) -> Self {
        let created_at = article.created_time();
        Article {
            id: article.id,
            author_id: article.author_id,
            title: article.title,
            body: article.body,
            category_id: article.category_id,
            created_at,
            like_count: article.like_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArticleWithAuthor {
    pub article: Article,
    pub author: Identity,
}

impl From<api::ArticleWithAuthor> for ArticleWithAuthor {
    fn from(entry: api::ArticleWithAuthor) -> Self {
        ArticleWithAuthor {
            article: Article::from(entry.article),
            author: Identity::from(entry.author),
        }
    }
}

/// One slice of the feed, zero-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u32,
    pub size: u32,
    pub total_pages: u32,
    pub is_last: bool,
}

impl Page<ArticleWithAuthor> {
    pub(crate) fn from_envelope(envelope: api::PageEnvelope<api::ArticleWithAuthor>) -> Self {
        Page {
            items: envelope
                .content
                .into_iter()
                .map(ArticleWithAuthor::from)
                .collect(),
            number: envelope.number,
            size: envelope.size,
            total_pages: envelope.total_pages,
            is_last: envelope.last,
        }
    }
}

/// Walks the article feed page by page and seeds the engagement cache with
/// the like counts that ride along on each row.
pub struct Paginator {
    feed: Arc<dyn FeedService>,
    coordinator: Arc<Coordinator>,
    page_size: u32,
}

impl Paginator {
    pub fn new(feed: Arc<dyn FeedService>, coordinator: Arc<Coordinator>) -> Self {
        Self::with_page_size(feed, coordinator, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(
        feed: Arc<dyn FeedService>,
        coordinator: Arc<Coordinator>,
        page_size: u32,
    ) -> Self {
        Self {
            feed,
            coordinator,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn first_page(&self) -> Result<Page<ArticleWithAuthor>> {
        self.fetch_page(0)
    }

    /// Requesting a page at or past the end yields an empty page flagged as
    /// last instead of an error, so callers can walk forward blindly.
    pub fn fetch_page(&self, number: u32) -> Result<Page<ArticleWithAuthor>> {
        let fetched = self.feed.latest(number, self.page_size)?;
        let page = normalize(fetched, number, self.page_size);
        for entry in &page.items {
            if let Some(count) = entry.article.like_count {
                self.coordinator.hydrate_count(entry.article.id, count);
            }
        }
        Ok(page)
    }

    pub fn detail(&self, article_id: i64) -> Result<ArticleWithAuthor> {
        let entry = self.feed.detail(article_id)?;
        if let Some(count) = entry.article.like_count {
            self.coordinator.hydrate_count(entry.article.id, count);
        }
        Ok(entry)
    }

    pub fn by_author(&self, user_id: i64) -> Result<Vec<Article>> {
        let articles = self.feed.by_author(user_id)?;
        for article in &articles {
            if let Some(count) = article.like_count {
                self.coordinator.hydrate_count(article.id, count);
            }
        }
        Ok(articles)
    }

    pub fn publish(&self, draft: &api::NewArticle) -> Result<i64> {
        self.feed.publish(draft)
    }
}

fn normalize(
    mut page: Page<ArticleWithAuthor>,
    requested: u32,
    size: u32,
) -> Page<ArticleWithAuthor> {
    if page.total_pages == 0 || requested >= page.total_pages {
        return Page {
            items: Vec::new(),
            number: requested,
            size,
            total_pages: page.total_pages,
            is_last: true,
        };
    }
    page.number = requested;
    page.is_last = page.number + 1 >= page.total_pages;
    page
}
