//! Memory store schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the memory store schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Knowledge graph entities. Names are unique per user, case-sensitive.
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            entity_type TEXT NOT NULL DEFAULT 'concept',
            user_edited INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(user_id, name)
        );

        CREATE INDEX IF NOT EXISTS idx_entities_user ON entities(user_id);
        CREATE INDEX IF NOT EXISTS idx_entities_updated ON entities(user_id, updated_at);

        -- Facts attached to entities, deduplicated on exact content
        CREATE TABLE IF NOT EXISTS observations (
            id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            is_user_edit INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            UNIQUE(entity_id, content)
        );

        CREATE INDEX IF NOT EXISTS idx_observations_entity ON observations(entity_id);

        -- Directed edges between entities; the triple is unique
        CREATE TABLE IF NOT EXISTS relations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            from_entity TEXT NOT NULL,
            to_entity TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(user_id, from_entity, to_entity, relation_type)
        );

        CREATE INDEX IF NOT EXISTS idx_relations_user ON relations(user_id);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("memory store migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Short-term conversation ring with time-based expiry
        CREATE TABLE IF NOT EXISTS turns (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_turns_user ON turns(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_turns_expires ON turns(expires_at);

        -- Cached prose summaries with the counts they were generated against
        CREATE TABLE IF NOT EXISTS summaries (
            user_id TEXT PRIMARY KEY,
            summary TEXT NOT NULL,
            generated_at INTEGER NOT NULL,
            entity_count INTEGER NOT NULL DEFAULT 0,
            observation_count INTEGER NOT NULL DEFAULT 0,
            generation_version INTEGER NOT NULL DEFAULT 1
        );

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("memory store migrated to schema v2");
    Ok(())
}
