//! Knowledge graph repository: entities, observations, relations

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{now_ms, DbPool};
use crate::{Error, Result};

/// Entity classification within the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Fleet,
    Ship,
    Location,
    Concept,
    Event,
    Preference,
}

impl EntityType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Fleet => "fleet",
            Self::Ship => "ship",
            Self::Location => "location",
            Self::Concept => "concept",
            Self::Event => "event",
            Self::Preference => "preference",
        }
    }

    /// Parse a type name; unknown names fall back to `Concept`
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "person" => Self::Person,
            "organization" => Self::Organization,
            "fleet" => Self::Fleet,
            "ship" => Self::Ship,
            "location" => Self::Location,
            "event" => Self::Event,
            "preference" => Self::Preference,
            _ => Self::Concept,
        }
    }
}

/// A named concept in the knowledge graph with its observations
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub observations: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub user_edited: bool,
}

/// A directed edge between two entities, phrased in active voice
#[derive(Debug, Clone, Serialize)]
pub struct Relation {
    pub from_entity: String,
    pub to_entity: String,
    pub relation_type: String,
    pub created_at: i64,
}

/// Result of an entity upsert
#[derive(Debug)]
pub struct UpsertOutcome {
    pub entity: Entity,
    /// Whether the entity row was newly created (vs. updated)
    pub created: bool,
    /// How many observations were actually added after dedup
    pub observations_added: usize,
}

/// Knowledge graph repository
#[derive(Debug, Clone)]
pub struct GraphRepo {
    pool: DbPool,
}

impl GraphRepo {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create or update an entity, appending deduplicated observations.
    ///
    /// Names are unique per user (case-sensitive); a second upsert with the
    /// same name updates the existing entity.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert_entity(
        &self,
        user_id: &str,
        name: &str,
        entity_type: EntityType,
        observations: &[String],
        is_user_edit: bool,
    ) -> Result<UpsertOutcome> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;
        let now = now_ms();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM entities WHERE user_id = ?1 AND name = ?2",
                rusqlite::params![user_id, name],
                |row| row.get(0),
            )
            .ok();

        let (entity_id, created) = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE entities SET updated_at = ?1, user_edited = user_edited | ?2 WHERE id = ?3",
                    rusqlite::params![now, i32::from(is_user_edit), id],
                )?;
                (id, false)
            }
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    r"INSERT INTO entities (id, user_id, name, entity_type, user_edited, created_at, updated_at)
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    rusqlite::params![id, user_id, name, entity_type.as_str(), i32::from(is_user_edit), now],
                )?;
                (id, true)
            }
        };

        let mut added = 0;
        for obs in observations {
            let inserted = conn.execute(
                r"INSERT OR IGNORE INTO observations (id, entity_id, content, is_user_edit, created_at)
                  VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    entity_id,
                    obs,
                    i32::from(is_user_edit),
                    now
                ],
            )?;
            added += inserted;
        }

        let entity = self
            .load_entity(&conn, &entity_id)?
            .ok_or_else(|| Error::Memory("entity vanished during upsert".to_string()))?;

        Ok(UpsertOutcome { entity, created, observations_added: added })
    }

    /// Append facts to an existing entity, deduplicating on exact match.
    ///
    /// Returns `None` if the entity does not exist (the caller decides
    /// whether that is an error; the tool surface fails silently).
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add_observations(
        &self,
        user_id: &str,
        entity_name: &str,
        facts: &[String],
        is_user_edit: bool,
    ) -> Result<Option<usize>> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;
        let now = now_ms();

        let entity_id: Option<String> = conn
            .query_row(
                "SELECT id FROM entities WHERE user_id = ?1 AND name = ?2",
                rusqlite::params![user_id, entity_name],
                |row| row.get(0),
            )
            .ok();

        let Some(entity_id) = entity_id else {
            return Ok(None);
        };

        let mut added = 0;
        for fact in facts {
            let inserted = conn.execute(
                r"INSERT OR IGNORE INTO observations (id, entity_id, content, is_user_edit, created_at)
                  VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    entity_id,
                    fact,
                    i32::from(is_user_edit),
                    now
                ],
            )?;
            added += inserted;
        }

        conn.execute(
            "UPDATE entities SET updated_at = ?1, user_edited = user_edited | ?2 WHERE id = ?3",
            rusqlite::params![now, i32::from(is_user_edit), entity_id],
        )?;

        Ok(Some(added))
    }

    /// Create a relation. No-op (returns false) when either endpoint is
    /// missing or the triple already exists.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create_relation(
        &self,
        user_id: &str,
        from: &str,
        to: &str,
        relation_type: &str,
    ) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;

        let endpoints: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE user_id = ?1 AND name IN (?2, ?3)",
            rusqlite::params![user_id, from, to],
            |row| row.get(0),
        )?;
        if endpoints < 2 {
            return Ok(false);
        }

        let inserted = conn.execute(
            r"INSERT OR IGNORE INTO relations (id, user_id, from_entity, to_entity, relation_type, created_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                user_id,
                from,
                to,
                relation_type,
                now_ms()
            ],
        )?;

        Ok(inserted > 0)
    }

    /// Search entities whose name or observations contain the query
    /// (case-insensitive). Results are relevance-scored: whole-query name
    /// hits rank above observation hits, which rank above per-word hits.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn search(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<Entity>> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;
        let query_lower = query.to_lowercase();
        let words: Vec<&str> = query_lower.split_whitespace().collect();

        let mut scored: Vec<(i32, Entity)> = Vec::new();
        for entity in self.all_entities(&conn, user_id)? {
            let name_lower = entity.name.to_lowercase();
            let type_lower = entity.entity_type.as_str();
            let obs_lower = entity.observations.join(" ").to_lowercase();

            let mut score = 0;
            if name_lower.contains(&query_lower) {
                score += 10;
            }
            if type_lower.contains(&query_lower) {
                score += 5;
            }
            if obs_lower.contains(&query_lower) {
                score += 8;
            }
            for word in &words {
                if name_lower.contains(word) {
                    score += 3;
                }
                if obs_lower.contains(word) {
                    score += 2;
                }
            }

            if score > 0 {
                scored.push((score, entity));
            }
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    /// Fetch specific entities by name plus every relation touching them
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn open_nodes(
        &self,
        user_id: &str,
        names: &[String],
    ) -> Result<(Vec<Entity>, Vec<Relation>)> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;

        let mut entities = Vec::new();
        for name in names {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM entities WHERE user_id = ?1 AND name = ?2",
                    rusqlite::params![user_id, name],
                    |row| row.get(0),
                )
                .ok();
            if let Some(id) = id {
                if let Some(entity) = self.load_entity(&conn, &id)? {
                    entities.push(entity);
                }
            }
        }

        let mut stmt = conn.prepare(
            "SELECT from_entity, to_entity, relation_type, created_at FROM relations WHERE user_id = ?1",
        )?;
        let relations: Vec<Relation> = stmt
            .query_map([user_id], |row| {
                Ok(Relation {
                    from_entity: row.get(0)?,
                    to_entity: row.get(1)?,
                    relation_type: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .flatten()
            .filter(|r| {
                names.iter().any(|n| *n == r.from_entity) || names.iter().any(|n| *n == r.to_entity)
            })
            .collect();

        Ok((entities, relations))
    }

    /// Delete an entity by name, cascading to its observations and any
    /// relations that touch it. Returns whether an entity was removed.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete_entity(&self, user_id: &str, name: &str) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;

        conn.execute(
            "DELETE FROM relations WHERE user_id = ?1 AND (from_entity = ?2 OR to_entity = ?2)",
            rusqlite::params![user_id, name],
        )?;

        let deleted = conn.execute(
            "DELETE FROM entities WHERE user_id = ?1 AND name = ?2",
            rusqlite::params![user_id, name],
        )?;

        Ok(deleted > 0)
    }

    /// The most recently updated entities for a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Entity>> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id FROM entities WHERE user_id = ?1 ORDER BY updated_at DESC LIMIT ?2",
        )?;
        #[allow(clippy::cast_possible_wrap)]
        let ids: Vec<String> = stmt
            .query_map(rusqlite::params![user_id, limit as i64], |row| row.get(0))?
            .flatten()
            .collect();

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.load_entity(&conn, &id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Count of graph mutations (entity creations/updates plus new
    /// observations) recorded after `since_ms`
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn mutations_since(&self, user_id: &str, since_ms: i64) -> Result<i64> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;

        let entity_touches: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE user_id = ?1 AND updated_at > ?2",
            rusqlite::params![user_id, since_ms],
            |row| row.get(0),
        )?;

        let new_observations: i64 = conn.query_row(
            r"SELECT COUNT(*) FROM observations o
              JOIN entities e ON o.entity_id = e.id
              WHERE e.user_id = ?1 AND o.created_at > ?2",
            rusqlite::params![user_id, since_ms],
            |row| row.get(0),
        )?;

        Ok(entity_touches + new_observations)
    }

    /// Whether any user-edited mutation was recorded after `since_ms`
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn user_edit_since(&self, user_id: &str, since_ms: i64) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;

        let count: i64 = conn.query_row(
            r"SELECT COUNT(*) FROM observations o
              JOIN entities e ON o.entity_id = e.id
              WHERE e.user_id = ?1 AND o.is_user_edit = 1 AND o.created_at > ?2",
            rusqlite::params![user_id, since_ms],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    /// Total entity and observation counts for a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn counts(&self, user_id: &str) -> Result<(i64, i64)> {
        let conn = self.pool.get().map_err(|e| Error::Memory(e.to_string()))?;

        let entities: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        let observations: i64 = conn.query_row(
            r"SELECT COUNT(*) FROM observations o
              JOIN entities e ON o.entity_id = e.id
              WHERE e.user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;

        Ok((entities, observations))
    }

    fn all_entities(&self, conn: &rusqlite::Connection, user_id: &str) -> Result<Vec<Entity>> {
        let mut stmt = conn.prepare("SELECT id FROM entities WHERE user_id = ?1")?;
        let ids: Vec<String> = stmt
            .query_map([user_id], |row| row.get(0))?
            .flatten()
            .collect();

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.load_entity(conn, &id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    fn load_entity(&self, conn: &rusqlite::Connection, id: &str) -> Result<Option<Entity>> {
        let row = conn.query_row(
            "SELECT id, name, entity_type, user_edited, created_at, updated_at FROM entities WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        );

        let (id, name, entity_type, user_edited, created_at, updated_at) = match row {
            Ok(r) => r,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut stmt = conn.prepare(
            "SELECT content FROM observations WHERE entity_id = ?1 ORDER BY created_at, id",
        )?;
        let observations: Vec<String> = stmt
            .query_map([&id], |row| row.get(0))?
            .flatten()
            .collect();

        Ok(Some(Entity {
            id,
            name,
            entity_type: EntityType::from_name(&entity_type),
            observations,
            created_at,
            updated_at,
            user_edited: user_edited != 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;

    fn repo() -> GraphRepo {
        GraphRepo::new(memory::init_memory().unwrap())
    }

    #[test]
    fn upsert_creates_then_updates() {
        let repo = repo();

        let first = repo
            .upsert_entity("alice", "The Armada", EntityType::Fleet, &["has 4 ships".into()], false)
            .unwrap();
        assert!(first.created);
        assert_eq!(first.observations_added, 1);

        let second = repo
            .upsert_entity("alice", "The Armada", EntityType::Fleet, &["has 4 ships".into()], false)
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.observations_added, 0, "duplicate observation must not re-insert");
        assert_eq!(second.entity.observations, vec!["has 4 ships"]);
    }

    #[test]
    fn entity_names_are_case_sensitive() {
        let repo = repo();
        repo.upsert_entity("alice", "Armada", EntityType::Fleet, &[], false).unwrap();
        let out = repo.upsert_entity("alice", "armada", EntityType::Fleet, &[], false).unwrap();
        assert!(out.created, "lowercase name is a distinct entity");
    }

    #[test]
    fn entity_scope_is_per_user() {
        let repo = repo();
        repo.upsert_entity("alice", "Armada", EntityType::Fleet, &[], false).unwrap();
        let out = repo.upsert_entity("bob", "Armada", EntityType::Fleet, &[], false).unwrap();
        assert!(out.created);
    }

    #[test]
    fn add_observations_dedupes_and_reports_count() {
        let repo = repo();
        repo.upsert_entity("alice", "Vega", EntityType::Ship, &["cargo hauler".into()], false)
            .unwrap();

        let added = repo
            .add_observations(
                "alice",
                "Vega",
                &["cargo hauler".into(), "needs repairs".into()],
                false,
            )
            .unwrap();
        assert_eq!(added, Some(1));
    }

    #[test]
    fn add_observations_missing_entity_is_none() {
        let repo = repo();
        let added = repo
            .add_observations("alice", "Ghost Ship", &["spooky".into()], false)
            .unwrap();
        assert_eq!(added, None);
    }

    #[test]
    fn relations_require_endpoints_and_dedupe() {
        let repo = repo();
        repo.upsert_entity("alice", "Armada", EntityType::Fleet, &[], false).unwrap();

        // Missing endpoint: no-op
        assert!(!repo.create_relation("alice", "Armada", "Vega", "contains").unwrap());

        repo.upsert_entity("alice", "Vega", EntityType::Ship, &[], false).unwrap();
        assert!(repo.create_relation("alice", "Armada", "Vega", "contains").unwrap());
        // Duplicate triple: no-op
        assert!(!repo.create_relation("alice", "Armada", "Vega", "contains").unwrap());
    }

    #[test]
    fn search_matches_name_and_observations() {
        let repo = repo();
        repo.upsert_entity("alice", "The Armada", EntityType::Fleet, &["has 4 ships".into()], false)
            .unwrap();
        repo.upsert_entity("alice", "Trade Hub", EntityType::Location, &["sells fuel".into()], false)
            .unwrap();

        let by_name = repo.search("alice", "armada", 10).unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "The Armada");

        let by_obs = repo.search("alice", "fuel", 10).unwrap();
        assert_eq!(by_obs.len(), 1);
        assert_eq!(by_obs[0].name, "Trade Hub");
    }

    #[test]
    fn search_ranks_name_hits_first() {
        let repo = repo();
        repo.upsert_entity("alice", "Fuel Depot", EntityType::Location, &[], false).unwrap();
        repo.upsert_entity("alice", "Vega", EntityType::Ship, &["low on fuel".into()], false)
            .unwrap();

        let results = repo.search("alice", "fuel", 10).unwrap();
        assert_eq!(results[0].name, "Fuel Depot");
    }

    #[test]
    fn delete_entity_cascades() {
        let repo = repo();
        repo.upsert_entity("alice", "Armada", EntityType::Fleet, &["x".into()], false).unwrap();
        repo.upsert_entity("alice", "Vega", EntityType::Ship, &[], false).unwrap();
        repo.create_relation("alice", "Armada", "Vega", "contains").unwrap();

        assert!(repo.delete_entity("alice", "Armada").unwrap());
        assert!(repo.search("alice", "armada", 10).unwrap().is_empty());
        let (_, relations) = repo.open_nodes("alice", &["Vega".into()]).unwrap();
        assert!(relations.is_empty());
    }

    #[test]
    fn open_nodes_returns_touching_relations() {
        let repo = repo();
        repo.upsert_entity("alice", "Armada", EntityType::Fleet, &[], false).unwrap();
        repo.upsert_entity("alice", "Vega", EntityType::Ship, &[], false).unwrap();
        repo.create_relation("alice", "Armada", "Vega", "contains").unwrap();

        let (entities, relations) = repo.open_nodes("alice", &["Armada".into()]).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_type, "contains");
    }
}
