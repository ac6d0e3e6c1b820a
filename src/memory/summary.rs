//! Cached prose summaries with staleness tracking
//!
//! A summary is stale once enough graph mutations or conversation turns have
//! accumulated after `generated_at`, or as soon as any user-edited mutation
//! lands after it. User edits override the thresholds because they are the
//! one signal that the cached prose actively misrepresents the user.

use serde::Serialize;

use super::conversation::ConversationRepo;
use super::graph::GraphRepo;
use super::{now_ms, DbPool};
use crate::{Error, Result};

/// Graph mutations after `generated_at` that mark a summary stale
pub const STALE_MUTATION_THRESHOLD: i64 = 5;

/// Conversation turns after `generated_at` that mark a summary stale
pub const STALE_TURN_THRESHOLD: i64 = 10;

/// A cached prose summary
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub user_id: String,
    pub summary: String,
    pub generated_at: i64,
    pub entity_count: i64,
    pub observation_count: i64,
    pub generation_version: i64,
}

/// Summary repository
#[derive(Debug, Clone)]
pub struct SummaryRepo {
    pool: DbPool,
}

impl SummaryRepo {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Fetch the cached summary, if any
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, user_id: &str) -> Result<Option<Summary>> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;

        let row = conn.query_row(
            r"SELECT summary, generated_at, entity_count, observation_count, generation_version
              FROM summaries WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok(Summary {
                    user_id: user_id.to_string(),
                    summary: row.get(0)?,
                    generated_at: row.get(1)?,
                    entity_count: row.get(2)?,
                    observation_count: row.get(3)?,
                    generation_version: row.get(4)?,
                })
            },
        );

        match row {
            Ok(summary) => Ok(Some(summary)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert the summary, snapshotting current graph counts and bumping the
    /// generation version
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn save(&self, user_id: &str, text: &str, graph: &GraphRepo) -> Result<Summary> {
        let (entity_count, observation_count) = graph.counts(user_id)?;
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;
        let now = now_ms();

        conn.execute(
            r"INSERT INTO summaries (user_id, summary, generated_at, entity_count, observation_count, generation_version)
              VALUES (?1, ?2, ?3, ?4, ?5, 1)
              ON CONFLICT(user_id) DO UPDATE SET
                summary = excluded.summary,
                generated_at = excluded.generated_at,
                entity_count = excluded.entity_count,
                observation_count = excluded.observation_count,
                generation_version = generation_version + 1",
            rusqlite::params![user_id, text, now, entity_count, observation_count],
        )?;
        drop(conn);

        self.get(user_id)?
            .ok_or_else(|| Error::Memory("summary vanished after save".to_string()))
    }

    /// Whether the given summary is stale relative to the live graph and
    /// conversation ring
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn is_stale(
        &self,
        summary: &Summary,
        graph: &GraphRepo,
        conversation: &ConversationRepo,
    ) -> Result<bool> {
        if graph.user_edit_since(&summary.user_id, summary.generated_at)? {
            return Ok(true);
        }

        let mutations = graph.mutations_since(&summary.user_id, summary.generated_at)?;
        if mutations >= STALE_MUTATION_THRESHOLD {
            return Ok(true);
        }

        let turns = conversation.count_since(&summary.user_id, summary.generated_at)?;
        Ok(turns >= STALE_TURN_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::graph::EntityType;
    use crate::memory::{self, conversation::TurnRole};

    struct Fixture {
        graph: GraphRepo,
        conversation: ConversationRepo,
        summaries: SummaryRepo,
    }

    fn fixture() -> Fixture {
        let pool = memory::init_memory().unwrap();
        Fixture {
            graph: GraphRepo::new(pool.clone()),
            conversation: ConversationRepo::new(pool.clone()),
            summaries: SummaryRepo::new(pool),
        }
    }

    #[test]
    fn fresh_summary_is_not_stale() {
        let f = fixture();
        let summary = f.summaries.save("alice", "Alice runs a four-ship fleet.", &f.graph).unwrap();
        assert!(!f.summaries.is_stale(&summary, &f.graph, &f.conversation).unwrap());
    }

    #[test]
    fn user_edit_makes_summary_stale_immediately() {
        let f = fixture();
        f.graph
            .upsert_entity("alice", "Armada", EntityType::Fleet, &[], false)
            .unwrap();
        let summary = f.summaries.save("alice", "Alice runs a fleet.", &f.graph).unwrap();

        f.graph
            .add_observations("alice", "Armada", &["renamed by the user".into()], true)
            .unwrap();

        assert!(f.summaries.is_stale(&summary, &f.graph, &f.conversation).unwrap());
    }

    #[test]
    fn mutation_threshold_trips_staleness() {
        let f = fixture();
        let summary = f.summaries.save("alice", "Quiet so far.", &f.graph).unwrap();

        for i in 0..STALE_MUTATION_THRESHOLD {
            f.graph
                .upsert_entity("alice", &format!("Ship {i}"), EntityType::Ship, &[], false)
                .unwrap();
        }

        assert!(f.summaries.is_stale(&summary, &f.graph, &f.conversation).unwrap());
    }

    #[test]
    fn turn_threshold_trips_staleness() {
        let f = fixture();
        let summary = f.summaries.save("alice", "Quiet so far.", &f.graph).unwrap();

        for i in 0..STALE_TURN_THRESHOLD {
            f.conversation
                .add("alice", TurnRole::User, &format!("turn {i}"), 3_600_000)
                .unwrap();
        }

        assert!(f.summaries.is_stale(&summary, &f.graph, &f.conversation).unwrap());
    }

    #[test]
    fn save_bumps_generation_version() {
        let f = fixture();
        let first = f.summaries.save("alice", "v1", &f.graph).unwrap();
        let second = f.summaries.save("alice", "v2", &f.graph).unwrap();
        assert_eq!(first.generation_version, 1);
        assert_eq!(second.generation_version, 2);
        assert_eq!(second.summary, "v2");
    }
}
