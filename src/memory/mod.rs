//! Conversation memory engine
//!
//! An embedded knowledge graph (entities, observations, relations) plus a
//! TTL'd conversation ring and a staleness-tracked prose summary, all in one
//! `SQLite` store. The engine is shared across sessions of the same user;
//! writes serialize through a per-user exclusive lock and reads take the
//! shared side.

pub mod conversation;
pub mod graph;
mod schema;
pub mod summary;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tokio::sync::RwLock;

use crate::{Error, Result};

pub use conversation::{ConversationRepo, ConversationTurn, TurnRole};
pub use graph::{Entity, EntityType, GraphRepo, Relation, UpsertOutcome};
pub use schema::SCHEMA_VERSION;
pub use summary::{Summary, SummaryRepo, STALE_MUTATION_THRESHOLD, STALE_TURN_THRESHOLD};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

static LAST_MS: std::sync::atomic::AtomicI64 = std::sync::atomic::AtomicI64::new(0);

/// Current wall-clock time in milliseconds.
///
/// Successive calls are strictly increasing, so ordering comparisons against
/// `generated_at` stay stable even when operations land within the same
/// millisecond.
pub(crate) fn now_ms() -> i64 {
    use std::sync::atomic::Ordering;

    let real = chrono::Utc::now().timestamp_millis();
    let mut prev = LAST_MS.load(Ordering::SeqCst);
    loop {
        let next = real.max(prev + 1);
        match LAST_MS.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

/// Initialize the on-disk memory store
///
/// # Errors
///
/// Returns error if the database cannot be opened or migrated
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "foreign_keys", "on")?;
        Ok(())
    });
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Memory(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Memory(e.to_string()))?;
    schema::init(&conn)?;

    tracing::info!(version = SCHEMA_VERSION, "memory store initialized");
    Ok(pool)
}

/// Initialize an in-memory store (for testing)
///
/// # Errors
///
/// Returns error if the database cannot be initialized
pub fn init_memory() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.pragma_update(None, "foreign_keys", "on"));
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Memory(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Memory(e.to_string()))?;
    schema::init(&conn)?;

    Ok(pool)
}

/// Shared handle to the memory engine.
///
/// Cloneable and passed explicitly into every tool call; there is no ambient
/// per-user singleton. Locks are taken inside each operation and released
/// before it returns, never held across awaits that leave the handle.
#[derive(Clone)]
pub struct MemoryHandle {
    graph: GraphRepo,
    conversation: ConversationRepo,
    summaries: SummaryRepo,
    locks: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
    ttl_ms: i64,
}

impl MemoryHandle {
    /// Wrap a pool with per-user locking and the configured turn TTL
    #[must_use]
    pub fn new(pool: DbPool, conversation_ttl_hours: u64) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        let ttl_ms = (conversation_ttl_hours as i64) * 3_600_000;
        Self {
            graph: GraphRepo::new(pool.clone()),
            conversation: ConversationRepo::new(pool.clone()),
            summaries: SummaryRepo::new(pool),
            locks: Arc::new(Mutex::new(HashMap::new())),
            ttl_ms,
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }

    /// Create or update an entity (exclusive lock)
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn upsert_entity(
        &self,
        user_id: &str,
        name: &str,
        entity_type: EntityType,
        observations: &[String],
        is_user_edit: bool,
    ) -> Result<UpsertOutcome> {
        let lock = self.user_lock(user_id);
        let _guard = lock.write().await;
        self.graph
            .upsert_entity(user_id, name, entity_type, observations, is_user_edit)
    }

    /// Append facts to an entity (exclusive lock). `None` when the entity
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn add_observations(
        &self,
        user_id: &str,
        entity_name: &str,
        facts: &[String],
        is_user_edit: bool,
    ) -> Result<Option<usize>> {
        let lock = self.user_lock(user_id);
        let _guard = lock.write().await;
        self.graph
            .add_observations(user_id, entity_name, facts, is_user_edit)
    }

    /// Create a relation (exclusive lock); no-op on missing endpoints or
    /// duplicate triples
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn create_relation(
        &self,
        user_id: &str,
        from: &str,
        to: &str,
        relation_type: &str,
    ) -> Result<bool> {
        let lock = self.user_lock(user_id);
        let _guard = lock.write().await;
        self.graph.create_relation(user_id, from, to, relation_type)
    }

    /// Delete an entity and everything attached to it (exclusive lock)
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn delete_entity(&self, user_id: &str, name: &str) -> Result<bool> {
        let lock = self.user_lock(user_id);
        let _guard = lock.write().await;
        self.graph.delete_entity(user_id, name)
    }

    /// Search entities by name or observation content (shared lock)
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn search_entities(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let lock = self.user_lock(user_id);
        let _guard = lock.read().await;
        self.graph.search(user_id, query, limit)
    }

    /// Fetch named entities plus the relations touching them (shared lock)
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn open_nodes(
        &self,
        user_id: &str,
        names: &[String],
    ) -> Result<(Vec<Entity>, Vec<Relation>)> {
        let lock = self.user_lock(user_id);
        let _guard = lock.read().await;
        self.graph.open_nodes(user_id, names)
    }

    /// Most recently updated entities (shared lock)
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn recent_entities(&self, user_id: &str, limit: usize) -> Result<Vec<Entity>> {
        let lock = self.user_lock(user_id);
        let _guard = lock.read().await;
        self.graph.recent(user_id, limit)
    }

    /// The cached summary if it is still fresh, else `None`
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn fresh_summary(&self, user_id: &str) -> Result<Option<Summary>> {
        let lock = self.user_lock(user_id);
        let _guard = lock.read().await;
        match self.summaries.get(user_id)? {
            Some(summary)
                if !self
                    .summaries
                    .is_stale(&summary, &self.graph, &self.conversation)? =>
            {
                Ok(Some(summary))
            }
            _ => Ok(None),
        }
    }

    /// Return the summary text, regenerating first when the cached one is
    /// stale or missing. Regeneration renders a listing of the most recently
    /// updated entities and stores it as the new summary (exclusive lock).
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn summary_or_regenerate(&self, user_id: &str, top_n: usize) -> Result<String> {
        let lock = self.user_lock(user_id);
        let _guard = lock.write().await;

        if let Some(summary) = self.summaries.get(user_id)? {
            if !self
                .summaries
                .is_stale(&summary, &self.graph, &self.conversation)?
            {
                return Ok(summary.summary);
            }
        }

        let entities = self.graph.recent(user_id, top_n)?;
        let text = render_entity_listing(&entities);
        let saved = self.summaries.save(user_id, &text, &self.graph)?;
        Ok(saved.summary)
    }

    /// Append a conversation turn with the configured TTL (exclusive lock)
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn append_turn(
        &self,
        user_id: &str,
        role: TurnRole,
        content: &str,
    ) -> Result<ConversationTurn> {
        let lock = self.user_lock(user_id);
        let _guard = lock.write().await;
        self.conversation.add(user_id, role, content, self.ttl_ms)
    }

    /// The last `limit` turns, oldest first (shared lock)
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn recent_turns(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let lock = self.user_lock(user_id);
        let _guard = lock.read().await;
        self.conversation.recent(user_id, limit)
    }

    /// Erase all conversation history for a user (exclusive lock)
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn clear_conversation(&self, user_id: &str) -> Result<usize> {
        let lock = self.user_lock(user_id);
        let _guard = lock.write().await;
        self.conversation.clear(user_id)
    }

    /// Purge expired turns across all users (no per-user lock: the sweep
    /// only touches rows no reader will return)
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub fn cleanup_expired(&self) -> Result<usize> {
        self.conversation.cleanup_expired()
    }
}

/// Render a compact prose listing of entities, used both as the stale-path
/// summary payload and as the regenerated summary text
#[must_use]
pub fn render_entity_listing(entities: &[Entity]) -> String {
    if entities.is_empty() {
        return "Nothing is known about this user yet.".to_string();
    }

    use std::fmt::Write;
    let mut out = String::from("What I know so far:\n");
    for entity in entities {
        let _ = write!(out, "- {} ({})", entity.name, entity.entity_type.as_str());
        if !entity.observations.is_empty() {
            let _ = write!(out, ": {}", entity.observations.join("; "));
        }
        out.push('\n');
    }
    out
}
