use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use rand::RngCore;

use crate::data::EngagementService;
use crate::session::SessionStore;

#[derive(Debug, thiserror::Error)]
pub enum EngagementError {
    #[error("not signed in")]
    Unauthorized,
    #[error("a like request for article {0} is already in flight")]
    AlreadyInFlight(i64),
    #[error("like request for article {0} failed")]
    ToggleFailed(i64, #[source] anyhow::Error),
}

/// What a view needs to render one article's like state. `liked` is `None`
/// until a per-user signal has been seen for the article; the feed only
/// carries counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Engagement {
    pub liked: Option<bool>,
    pub like_count: i64,
    pub in_flight: bool,
}

impl Engagement {
    pub const fn unknown() -> Self {
        Self {
            liked: None,
            like_count: 0,
            in_flight: false,
        }
    }

    /// Unknown renders as not-liked.
    pub fn is_liked(&self) -> bool {
        self.liked.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
struct Entry {
    liked: Option<bool>,
    like_count: i64,
    pending: Option<Pending>,
}

#[derive(Debug, Clone)]
struct Pending {
    token: String,
    baseline_liked: Option<bool>,
    baseline_count: i64,
}

impl Entry {
    fn snapshot(&self) -> Engagement {
        Engagement {
            liked: self.liked,
            like_count: self.like_count,
            in_flight: self.pending.is_some(),
        }
    }
}

enum Begin {
    Started(String),
    Settled(Engagement),
}

/// Per-article engagement entries shared by every view. All mutation goes
/// through the [`Coordinator`]; the cache itself only hands out snapshots.
#[derive(Default)]
pub struct Cache {
    entries: Mutex<HashMap<i64, Entry>>,
}

impl Cache {
    pub fn get(&self, article_id: i64) -> Option<Engagement> {
        self.entries.lock().get(&article_id).map(Entry::snapshot)
    }

    /// Applies the optimistic flip and marks the entry pending. `desired`
    /// is `None` for a toggle; for an explicit like/unlike a request that
    /// matches the cached state settles immediately without touching the
    /// network.
    fn begin(&self, article_id: i64, desired: Option<bool>) -> Result<Begin, EngagementError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(article_id).or_default();
        if entry.pending.is_some() {
            return Err(EngagementError::AlreadyInFlight(article_id));
        }
        if let Some(desired) = desired {
            if entry.liked == Some(desired) {
                return Ok(Begin::Settled(entry.snapshot()));
            }
        }
        let target = desired.unwrap_or(!entry.liked.unwrap_or(false));
        let pending = Pending {
            token: request_token(),
            baseline_liked: entry.liked,
            baseline_count: entry.like_count,
        };
        let token = pending.token.clone();
        entry.liked = Some(target);
        entry.like_count = if target {
            entry.like_count + 1
        } else {
            (entry.like_count - 1).max(0)
        };
        entry.pending = Some(pending);
        Ok(Begin::Started(token))
    }

    /// Replaces the optimistic guess with the backend's answer, recomputing
    /// the count from the pre-flight baseline so a hydration that landed
    /// mid-flight is not double-counted. A token mismatch means the entry
    /// was reset while the request was out; the settle is dropped.
    fn settle_success(&self, article_id: i64, token: &str, authoritative: bool) -> Option<Engagement> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&article_id)?;
        let matched = entry
            .pending
            .as_ref()
            .is_some_and(|pending| pending.token == token);
        if !matched {
            return None;
        }
        let pending = entry.pending.take()?;
        let assumed = i64::from(pending.baseline_liked.unwrap_or(false));
        entry.liked = Some(authoritative);
        entry.like_count =
            (pending.baseline_count + i64::from(authoritative) - assumed).max(0);
        Some(entry.snapshot())
    }

    /// Restores the exact pre-flight state, including a `liked` that was
    /// still unknown when the request went out.
    fn settle_failure(&self, article_id: i64, token: &str) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&article_id) else {
            return false;
        };
        let matched = entry
            .pending
            .as_ref()
            .is_some_and(|pending| pending.token == token);
        if !matched {
            return false;
        }
        if let Some(pending) = entry.pending.take() {
            entry.liked = pending.baseline_liked;
            entry.like_count = pending.baseline_count;
        }
        true
    }

    fn hydrate(&self, article_id: i64, liked: bool, like_count: i64) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(article_id).or_default();
        match entry.pending.as_mut() {
            // An optimistic flip is on screen; fold the fresh count into the
            // baseline and let the settle recompute from it.
            Some(pending) => pending.baseline_count = like_count.max(0),
            None => {
                entry.liked = Some(liked);
                entry.like_count = like_count.max(0);
            }
        }
    }

    /// Feed rows carry a count but no per-user flag, so this never touches
    /// `liked`.
    fn hydrate_count(&self, article_id: i64, like_count: i64) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(article_id).or_default();
        match entry.pending.as_mut() {
            Some(pending) => pending.baseline_count = like_count.max(0),
            None => entry.like_count = like_count.max(0),
        }
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Sole writer of the engagement cache. Each mutation follows the same
/// shape: flip the cache optimistically, send the request, then settle the
/// entry with the backend's answer or roll it back.
pub struct Coordinator {
    cache: Arc<Cache>,
    service: Arc<dyn EngagementService>,
    session: Arc<SessionStore>,
}

impl Coordinator {
    pub fn new(service: Arc<dyn EngagementService>, session: Arc<SessionStore>) -> Self {
        Self {
            cache: Arc::new(Cache::default()),
            service,
            session,
        }
    }

    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }

    pub fn engagement(&self, article_id: i64) -> Engagement {
        self.cache.get(article_id).unwrap_or_else(Engagement::unknown)
    }

    pub fn hydrate(&self, article_id: i64, liked: bool, like_count: i64) {
        self.cache.hydrate(article_id, liked, like_count);
    }

    pub fn hydrate_count(&self, article_id: i64, like_count: i64) {
        self.cache.hydrate_count(article_id, like_count);
    }

    /// Flips the article's like state. The cache updates before the request
    /// is sent; at most one request per article may be outstanding, and a
    /// second caller gets [`EngagementError::AlreadyInFlight`] instead of a
    /// queue slot.
    pub fn toggle(&self, article_id: i64) -> Result<Engagement, EngagementError> {
        let user_id = self.require_user()?;
        let token = match self.cache.begin(article_id, None)? {
            Begin::Started(token) => token,
            Begin::Settled(snapshot) => return Ok(snapshot),
        };
        match self.service.toggle(user_id, article_id) {
            Ok(now_liked) => Ok(self.adopt(article_id, &token, now_liked)),
            Err(err) => Err(self.abandon(article_id, &token, err)),
        }
    }

    /// Idempotent: liking an article the cache already shows as liked is a
    /// local no-op.
    pub fn like(&self, article_id: i64) -> Result<Engagement, EngagementError> {
        self.set_liked(article_id, true)
    }

    pub fn unlike(&self, article_id: i64) -> Result<Engagement, EngagementError> {
        self.set_liked(article_id, false)
    }

    fn set_liked(&self, article_id: i64, desired: bool) -> Result<Engagement, EngagementError> {
        let user_id = self.require_user()?;
        let token = match self.cache.begin(article_id, Some(desired))? {
            Begin::Started(token) => token,
            Begin::Settled(snapshot) => return Ok(snapshot),
        };
        let sent = if desired {
            self.service.like(user_id, article_id)
        } else {
            self.service.unlike(user_id, article_id)
        };
        match sent {
            Ok(()) => Ok(self.adopt(article_id, &token, desired)),
            Err(err) => Err(self.abandon(article_id, &token, err)),
        }
    }

    /// Fetches the authoritative flag and count and hydrates the cache.
    pub fn refresh(&self, article_id: i64) -> anyhow::Result<Engagement> {
        let user_id = self.require_user()?;
        let liked = self.service.status(user_id, article_id)?;
        let like_count = self.service.count(article_id)?;
        self.cache.hydrate(article_id, liked, like_count);
        Ok(self.engagement(article_id))
    }

    /// Drops every entry. Responses still in flight find no matching token
    /// afterwards and are discarded, so a logout cannot resurrect stale
    /// state.
    pub fn reset(&self) {
        self.cache.clear();
        debug!("engagement: cache cleared");
    }

    fn require_user(&self) -> Result<i64, EngagementError> {
        self.session.user_id().ok_or(EngagementError::Unauthorized)
    }

    fn adopt(&self, article_id: i64, token: &str, authoritative: bool) -> Engagement {
        match self.cache.settle_success(article_id, token, authoritative) {
            Some(snapshot) => snapshot,
            None => {
                debug!("engagement: dropped stale settle for article {article_id}");
                self.engagement(article_id)
            }
        }
    }

    fn abandon(&self, article_id: i64, token: &str, err: anyhow::Error) -> EngagementError {
        if self.cache.settle_failure(article_id, token) {
            warn!("engagement: rolled back article {article_id}: {err:#}");
        }
        EngagementError::ToggleFailed(article_id, err)
    }
}

fn request_token() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
