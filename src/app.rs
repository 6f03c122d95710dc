use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::api;
use crate::comments;
use crate::config;
use crate::data::{self, CommentService, EngagementService, FeedService, ProfileService};
use crate::engagement;
use crate::feed;
use crate::session::{self, SessionError};
use crate::storage;

/// The four backend seams the app runs on. Production wiring comes from
/// [`Services::http`]; tests hand in mocks.
pub struct Services {
    pub feed: Arc<dyn FeedService>,
    pub comments: Arc<dyn CommentService>,
    pub engagement: Arc<dyn EngagementService>,
    pub profile: Arc<dyn ProfileService>,
}

impl Services {
    pub fn http(client: Arc<api::Client>) -> Self {
        Self {
            feed: Arc::new(data::HttpFeedService::new(Arc::clone(&client))),
            comments: Arc::new(data::HttpCommentService::new(Arc::clone(&client))),
            engagement: Arc::new(data::HttpEngagementService::new(Arc::clone(&client))),
            profile: Arc::new(data::HttpProfileService::new(client)),
        }
    }
}

/// One running client: storage, the rehydrated session, the engagement
/// coordinator, and the feed paginator, built once at startup and torn down
/// with [`App::close`]. Commands go through this instead of any ambient
/// state, so tests can stand up as many isolated instances as they like.
pub struct App {
    store: Arc<storage::Store>,
    session: Arc<session::SessionStore>,
    coordinator: Arc<engagement::Coordinator>,
    paginator: feed::Paginator,
    comments: Arc<dyn CommentService>,
    profile: Arc<dyn ProfileService>,
}

impl App {
    /// Opens storage at the configured path and wires HTTP services against
    /// the configured server.
    pub fn open(cfg: config::Config) -> Result<Self> {
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: cfg.storage.path.clone(),
            })
            .context("open storage")?,
        );

        let user_agent = if cfg.server.user_agent.trim().is_empty() {
            format!("quill/{}", crate::VERSION)
        } else {
            cfg.server.user_agent.clone()
        };
        let client = Arc::new(
            api::Client::new(api::ClientConfig {
                base_url: Some(cfg.server.base_url.clone()),
                user_agent,
                timeout: Some(cfg.server.timeout),
                http_client: None,
            })
            .context("build api client")?,
        );

        Self::with_services(&cfg, store, Services::http(client))
    }

    pub fn with_services(
        cfg: &config::Config,
        store: Arc<storage::Store>,
        services: Services,
    ) -> Result<Self> {
        let session =
            Arc::new(session::SessionStore::open(Arc::clone(&store)).context("open session")?);
        let coordinator = Arc::new(engagement::Coordinator::new(
            services.engagement,
            Arc::clone(&session),
        ));
        let paginator = feed::Paginator::with_page_size(
            services.feed,
            Arc::clone(&coordinator),
            cfg.feed.page_size,
        );

        Ok(Self {
            store,
            session,
            coordinator,
            paginator,
            comments: services.comments,
            profile: services.profile,
        })
    }

    pub fn session(&self) -> &session::SessionStore {
        &self.session
    }

    pub fn coordinator(&self) -> &engagement::Coordinator {
        &self.coordinator
    }

    pub fn paginator(&self) -> &feed::Paginator {
        &self.paginator
    }

    pub fn register(&self, registration: &api::Registration) -> Result<i64> {
        self.profile.register(registration)
    }

    /// Authenticates against the backend and persists the returned identity.
    /// Signing in over a different account drops that account's like state,
    /// since engagement entries are scoped to one user.
    pub fn login(&self, email: &str, password: &str) -> Result<session::Identity> {
        let identity = self.profile.login(email, password)?;
        if self.session.user_id().is_some_and(|id| id != identity.id) {
            self.coordinator.reset();
        }
        self.session.login(identity.clone())?;
        Ok(identity)
    }

    /// Signs out and clears the engagement cache. Safe to call when already
    /// signed out.
    pub fn logout(&self) -> Result<()> {
        self.session.logout()?;
        self.coordinator.reset();
        Ok(())
    }

    /// Re-reads the signed-in profile from the backend and merges it into
    /// the session, picking up server-side changes such as follower counts.
    pub fn refresh_profile(&self) -> Result<session::Identity> {
        let user_id = self.require_signed_in()?;
        let fetched = self.profile.fetch(user_id).context("fetch profile")?;
        self.session.update(session::IdentityPatch {
            name: Some(fetched.name.clone()),
            email: Some(fetched.email.clone()),
            bio: Some(fetched.bio.clone()),
            avatar: Some(fetched.avatar.clone()),
            followers: Some(fetched.followers),
            following: Some(fetched.following),
        })?;
        Ok(fetched)
    }

    /// The article's comments in display order with parent context attached.
    pub fn comment_thread(&self, article_id: i64) -> Result<Vec<comments::Comment>> {
        let flat = self.comments.list(article_id)?;
        Ok(comments::resolve(flat))
    }

    /// Creates a comment and returns it as the backend recorded it. A caller
    /// holding a resolved thread splices it in with
    /// [`comments::append_created`] instead of refetching the list.
    pub fn post_comment(&self, article_id: i64, content: &str) -> Result<comments::Comment> {
        let user_id = self.require_signed_in()?;
        self.comments.create(&api::NewComment {
            article_id,
            user_id,
            content: content.to_string(),
        })
    }

    /// Publishes an article under the signed-in user and returns its id.
    pub fn publish(&self, title: &str, body: &str, category_id: i64) -> Result<i64> {
        let user_id = self.require_signed_in()?;
        self.paginator.publish(&api::NewArticle {
            user_id,
            title: title.to_string(),
            body: body.to_string(),
            category_id,
        })
    }

    fn require_signed_in(&self) -> Result<i64> {
        self.session
            .user_id()
            .ok_or_else(|| anyhow!(SessionError::NotSignedIn))
    }

    /// Releases the storage handle. Fails if a clone of the app's resources
    /// is still alive somewhere.
    pub fn close(self) -> Result<()> {
        let App {
            store,
            session,
            coordinator,
            paginator,
            comments,
            profile,
        } = self;
        drop(paginator);
        drop(coordinator);
        drop(comments);
        drop(profile);
        drop(session);
        let store =
            Arc::try_unwrap(store).map_err(|_| anyhow!("storage: connection still in use"))?;
        store.close()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::data::{MockCommentService, MockEngagementService, MockFeedService};
    use crate::session::Identity;

    fn scripted_identity(id: i64, email: &str) -> Identity {
        Identity {
            id,
            name: format!("user-{id}"),
            email: email.to_string(),
            joined_at: None,
            bio: String::new(),
            avatar: String::new(),
            followers: 0,
            following: 0,
        }
    }

    // Login maps each email to its own account, so tests can switch users.
    struct ProfileByEmail;

    impl ProfileService for ProfileByEmail {
        fn register(&self, _registration: &api::Registration) -> Result<i64> {
            Ok(31)
        }

        fn login(&self, email: &str, _password: &str) -> Result<Identity> {
            let id = if email.starts_with("ada") { 1 } else { 2 };
            Ok(scripted_identity(id, email))
        }

        fn fetch(&self, user_id: i64) -> Result<Identity> {
            let mut identity = scripted_identity(user_id, "ada@example.com");
            identity.bio = "remote bio".to_string();
            identity.followers = 12;
            Ok(identity)
        }
    }

    fn mock_app(dir: &TempDir) -> App {
        mock_app_with(dir, Arc::new(MockCommentService::default()))
    }

    fn mock_app_with(dir: &TempDir, comments: Arc<dyn CommentService>) -> App {
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        App::with_services(
            &config::Config::default(),
            store,
            Services {
                feed: Arc::new(MockFeedService::default()),
                comments,
                engagement: Arc::new(MockEngagementService::default()),
                profile: Arc::new(ProfileByEmail),
            },
        )
        .unwrap()
    }

    #[test]
    fn login_then_logout_round_trip() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);

        let identity = app.login("ada@example.com", "pw").unwrap();
        assert_eq!(identity.id, 1);
        assert!(app.session().is_authenticated());

        app.logout().unwrap();
        assert!(!app.session().is_authenticated());
    }

    #[test]
    fn logout_clears_engagement_cache() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);
        app.login("ada@example.com", "pw").unwrap();
        app.coordinator().toggle(5).unwrap();
        assert!(app.coordinator().engagement(5).liked.is_some());

        app.logout().unwrap();
        assert!(app.coordinator().cache().get(5).is_none());
    }

    #[test]
    fn switching_accounts_drops_like_state() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);
        app.login("ada@example.com", "pw").unwrap();
        app.coordinator().toggle(5).unwrap();

        app.login("lin@example.com", "pw").unwrap();
        assert_eq!(app.session().user_id(), Some(2));
        assert!(app.coordinator().cache().get(5).is_none());
    }

    #[test]
    fn relogin_as_same_account_keeps_like_state() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);
        app.login("ada@example.com", "pw").unwrap();
        app.coordinator().toggle(5).unwrap();

        app.login("ada@elsewhere.example", "pw").unwrap();
        assert!(app.coordinator().cache().get(5).is_some());
    }

    #[test]
    fn refresh_profile_merges_remote_fields() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);
        app.login("ada@example.com", "pw").unwrap();

        let fetched = app.refresh_profile().unwrap();
        assert_eq!(fetched.followers, 12);
        assert_eq!(app.session().bio(), "remote bio");
        assert_eq!(app.session().followers(), 12);
    }

    #[test]
    fn posting_requires_sign_in() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);

        let err = app.post_comment(1, "hello").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::NotSignedIn)
        ));
        let err = app.publish("title", "body", 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::NotSignedIn)
        ));
    }

    #[test]
    fn register_returns_backend_id() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);

        let id = app
            .register(&api::Registration {
                name: "ada".to_string(),
                password: "pw".to_string(),
                bio: String::new(),
                email: "ada@example.com".to_string(),
            })
            .unwrap();
        assert_eq!(id, 31);
        assert!(!app.session().is_authenticated());
    }

    #[test]
    fn publish_assigns_ids_and_joins_feed() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);
        app.login("ada@example.com", "pw").unwrap();

        let id = app.publish("title", "body", 2).unwrap();
        assert_eq!(id, 1);
        let entry = app.paginator().detail(id).unwrap();
        assert_eq!(entry.article.author_id, 1);
        assert_eq!(entry.article.category_id, 2);
    }

    #[test]
    fn posted_comment_joins_the_resolved_thread() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);
        app.login("ada@example.com", "pw").unwrap();

        let mut thread = app.comment_thread(9).unwrap();
        assert!(thread.is_empty());

        let created = app.post_comment(9, "first!").unwrap();
        comments::append_created(&mut thread, created);
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].content, "first!");
        assert_eq!(thread[0].author_id, 1);
    }

    #[test]
    fn close_releases_storage() {
        let dir = tempdir().unwrap();
        let app = mock_app(&dir);
        app.close().unwrap();
    }
}
