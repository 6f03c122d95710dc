use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;

use crate::api;
use crate::storage;

pub const DEFAULT_AVATAR: &str = "default.jpg";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotSignedIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub joined_at: Option<DateTime<Utc>>,
    pub bio: String,
    pub avatar: String,
    pub followers: i64,
    pub following: i64,
}

impl From<api::Author> for Identity {
    fn from(author: api::Author) -> Self {
        let joined_at = author.joined_time();
        Identity {
            id: author.id,
            name: author.name,
            email: author.email,
            joined_at,
            bio: author.bio,
            avatar: author.avatar,
            followers: author.followers,
            following: author.following,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub followers: Option<i64>,
    pub following: Option<i64>,
}

impl IdentityPatch {
    fn apply(self, identity: &mut Identity) {
        if let Some(name) = self.name {
            identity.name = name;
        }
        if let Some(email) = self.email {
            identity.email = email;
        }
        if let Some(bio) = self.bio {
            identity.bio = bio;
        }
        if let Some(avatar) = self.avatar {
            identity.avatar = avatar;
        }
        if let Some(followers) = self.followers {
            identity.followers = followers;
        }
        if let Some(following) = self.following {
            identity.following = following;
        }
    }
}

// One authenticated identity per running client, rehydrated from storage on
// open and written back on every mutation.
pub struct SessionStore {
    store: Arc<storage::Store>,
    identity: RwLock<Option<Identity>>,
}

impl SessionStore {
    pub fn open(store: Arc<storage::Store>) -> Result<Self> {
        let persisted = store.load_session().context("session: rehydrate")?;
        if let Some(identity) = persisted.as_ref() {
            debug!("session: resumed identity {} ({})", identity.id, identity.name);
        }
        Ok(Self {
            store,
            identity: RwLock::new(persisted),
        })
    }

    pub fn login(&self, identity: Identity) -> Result<()> {
        self.store
            .save_session(&identity)
            .context("session: persist login")?;
        info!("session: signed in as {} (id {})", identity.name, identity.id);
        *self.identity.write() = Some(identity);
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        if self.identity.read().is_none() {
            return Ok(());
        }
        self.store
            .clear_session()
            .context("session: persist logout")?;
        *self.identity.write() = None;
        info!("session: signed out");
        Ok(())
    }

    // A logged-out update is silently dropped: there is no identity to merge
    // into and callers are not expected to guard for it.
    pub fn update(&self, patch: IdentityPatch) -> Result<()> {
        let mut guard = self.identity.write();
        let identity = match guard.as_mut() {
            Some(identity) => identity,
            None => {
                debug!("session: dropped profile update while signed out");
                return Ok(());
            }
        };
        patch.apply(identity);
        self.store
            .save_session(identity)
            .context("session: persist profile update")?;
        Ok(())
    }

    pub fn current(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.read().is_some()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.identity.read().as_ref().map(|identity| identity.id)
    }

    pub fn name(&self) -> String {
        self.read(|identity| identity.name.clone(), String::new)
    }

    pub fn email(&self) -> String {
        self.read(|identity| identity.email.clone(), String::new)
    }

    pub fn bio(&self) -> String {
        self.read(|identity| identity.bio.clone(), String::new)
    }

    pub fn avatar(&self) -> String {
        let avatar = self.read(|identity| identity.avatar.clone(), String::new);
        if avatar.is_empty() {
            DEFAULT_AVATAR.to_string()
        } else {
            avatar
        }
    }

    pub fn followers(&self) -> i64 {
        self.read(|identity| identity.followers, || 0)
    }

    pub fn following(&self) -> i64 {
        self.read(|identity| identity.following, || 0)
    }

    pub fn joined_at(&self) -> Option<DateTime<Utc>> {
        self.identity.read().as_ref().and_then(|identity| identity.joined_at)
    }

    fn read<T>(&self, pick: impl Fn(&Identity) -> T, fallback: impl Fn() -> T) -> T {
        self.identity
            .read()
            .as_ref()
            .map(pick)
            .unwrap_or_else(fallback)
    }
}
