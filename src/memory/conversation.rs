//! Short-term conversation history with time-based expiry

use serde::Serialize;
use uuid::Uuid;

use super::{now_ms, DbPool};
use crate::{Error, Result};

/// Speaker role within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn from_name(name: &str) -> Self {
        if name == "assistant" {
            Self::Assistant
        } else {
            Self::User
        }
    }
}

/// A single stored conversation turn
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub id: String,
    pub user_id: String,
    pub role: TurnRole,
    pub content: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Conversation ring repository
#[derive(Debug, Clone)]
pub struct ConversationRepo {
    pool: DbPool,
}

impl ConversationRepo {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a turn that expires after `ttl_ms`
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add(
        &self,
        user_id: &str,
        role: TurnRole,
        content: &str,
        ttl_ms: i64,
    ) -> Result<ConversationTurn> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;
        let now = now_ms();
        let turn = ConversationTurn {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
            expires_at: now + ttl_ms,
        };

        conn.execute(
            r"INSERT INTO turns (id, user_id, role, content, created_at, expires_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                turn.id,
                turn.user_id,
                turn.role.as_str(),
                turn.content,
                turn.created_at,
                turn.expires_at
            ],
        )?;

        Ok(turn)
    }

    /// The last `limit` non-expired turns, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;

        let mut stmt = conn.prepare(
            r"SELECT id, user_id, role, content, created_at, expires_at
              FROM turns
              WHERE user_id = ?1 AND expires_at > ?2
              ORDER BY created_at DESC
              LIMIT ?3",
        )?;

        #[allow(clippy::cast_possible_wrap)]
        let mut turns: Vec<ConversationTurn> = stmt
            .query_map(
                rusqlite::params![user_id, now_ms(), limit as i64],
                |row| {
                    Ok(ConversationTurn {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        role: TurnRole::from_name(&row.get::<_, String>(2)?),
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                        expires_at: row.get(5)?,
                    })
                },
            )?
            .flatten()
            .collect();

        turns.reverse();
        Ok(turns)
    }

    /// Count of turns recorded after `since_ms`
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count_since(&self, user_id: &str, since_ms: i64) -> Result<i64> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM turns WHERE user_id = ?1 AND created_at > ?2",
            rusqlite::params![user_id, since_ms],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete every expired turn across all users; the cleanup sweep
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn cleanup_expired(&self) -> Result<usize> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;
        let deleted = conn.execute("DELETE FROM turns WHERE expires_at < ?1", [now_ms()])?;
        if deleted > 0 {
            tracing::info!(count = deleted, "purged expired conversation turns");
        }
        Ok(deleted)
    }

    /// Clear all history for a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear(&self, user_id: &str) -> Result<usize> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;
        Ok(conn.execute("DELETE FROM turns WHERE user_id = ?1", [user_id])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;

    const HOUR_MS: i64 = 3_600_000;

    fn repo() -> ConversationRepo {
        ConversationRepo::new(memory::init_memory().unwrap())
    }

    #[test]
    fn recent_returns_chronological_order() {
        let repo = repo();
        repo.add("alice", TurnRole::User, "first", HOUR_MS).unwrap();
        repo.add("alice", TurnRole::Assistant, "second", HOUR_MS).unwrap();

        let turns = repo.recent("alice", 10).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "first");
        assert_eq!(turns[1].content, "second");
    }

    #[test]
    fn expired_turns_are_invisible_and_swept() {
        let repo = repo();
        repo.add("alice", TurnRole::User, "old", -1).unwrap();
        repo.add("alice", TurnRole::User, "fresh", HOUR_MS).unwrap();

        let turns = repo.recent("alice", 10).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "fresh");

        let swept = repo.cleanup_expired().unwrap();
        assert_eq!(swept, 1);
    }

    #[test]
    fn recent_respects_limit() {
        let repo = repo();
        for i in 0..5 {
            repo.add("alice", TurnRole::User, &format!("turn {i}"), HOUR_MS).unwrap();
        }
        let turns = repo.recent("alice", 2).unwrap();
        assert_eq!(turns.len(), 2);
        // The most recent two, still oldest-first
        assert_eq!(turns[0].content, "turn 3");
        assert_eq!(turns[1].content, "turn 4");
    }

    #[test]
    fn clear_removes_only_that_user() {
        let repo = repo();
        repo.add("alice", TurnRole::User, "hers", HOUR_MS).unwrap();
        repo.add("bob", TurnRole::User, "his", HOUR_MS).unwrap();

        repo.clear("alice").unwrap();
        assert!(repo.recent("alice", 10).unwrap().is_empty());
        assert_eq!(repo.recent("bob", 10).unwrap().len(), 1);
    }
}
