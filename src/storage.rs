use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::session::Identity;

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    // The client carries at most one signed-in identity, so the session
    // table is a single fixed slot.
    pub fn save_session(&self, identity: &Identity) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO session (slot, user_id, name, email, joined_at, bio, avatar, followers, following, saved_at)
VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(slot) DO UPDATE SET
  user_id = excluded.user_id,
  name = excluded.name,
  email = excluded.email,
  joined_at = excluded.joined_at,
  bio = excluded.bio,
  avatar = excluded.avatar,
  followers = excluded.followers,
  following = excluded.following,
  saved_at = excluded.saved_at
"#,
            params![
                identity.id,
                identity.name,
                identity.email,
                identity.joined_at.map(|at| at.timestamp()),
                identity.bio,
                identity.avatar,
                identity.followers,
                identity.following,
                Utc::now().timestamp(),
            ],
        )
        .context("storage: save session")?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Identity>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT user_id, name, email, joined_at, bio, avatar, followers, following
FROM session
WHERE slot = 0
"#,
            [],
            identity_from_row,
        )
        .optional()
        .context("storage: load session")
    }

    pub fn clear_session(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM session WHERE slot = 0", [])
            .context("storage: clear session")?;
        Ok(())
    }
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    let joined: Option<i64> = row.get(3)?;
    Ok(Identity {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        joined_at: joined.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        bio: row.get(4)?,
        avatar: row.get(5)?,
        followers: row.get(6)?,
        following: row.get(7)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().timestamp()],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS session (
  slot INTEGER PRIMARY KEY CHECK (slot = 0),
  user_id INTEGER NOT NULL,
  name TEXT NOT NULL,
  email TEXT NOT NULL,
  joined_at INTEGER,
  bio TEXT NOT NULL DEFAULT '',
  avatar TEXT NOT NULL DEFAULT '',
  followers INTEGER NOT NULL DEFAULT 0,
  following INTEGER NOT NULL DEFAULT 0,
  saved_at INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("quill").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn identity() -> Identity {
        Identity {
            id: 7,
            name: "ada".into(),
            email: "ada@example.com".into(),
            joined_at: Utc.timestamp_opt(1_700_000_000, 0).single(),
            bio: "writes".into(),
            avatar: "ada.png".into(),
            followers: 3,
            following: 5,
        }
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn session_round_trip() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();

        assert!(store.load_session().unwrap().is_none());
        store.save_session(&identity()).unwrap();
        let loaded = store.load_session().unwrap().unwrap();
        assert_eq!(loaded.id, 7);
        assert_eq!(loaded.email, "ada@example.com");
        assert_eq!(loaded.joined_at, identity().joined_at);

        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn save_overwrites_previous_identity() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();

        store.save_session(&identity()).unwrap();
        let mut replacement = identity();
        replacement.id = 8;
        replacement.name = "lin".into();
        store.save_session(&replacement).unwrap();

        let loaded = store.load_session().unwrap().unwrap();
        assert_eq!(loaded.id, 8);
        assert_eq!(loaded.name, "lin");
    }
}
