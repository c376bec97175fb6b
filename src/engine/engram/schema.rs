// ── Engram: Database Schema ─────────────────────────────────────────────────
//
// One schema shared by both durable tier databases (short_term.db and
// long_term.db). Each tier only ever writes rows for its own tier plus
// `archived` rows it demoted itself.
//
// Tables:
//   - memory_items: content, 7 context axes, compressed embedding columns
//   - memory_items_fts: FTS5 over content + context labels (kept in sync by triggers)
//   - synchronicity_links: one row per unordered item pair
//   - retired_ids: ids that may never be reused
//   - memory_audit_log: append-only audit trail
//
// All statements are idempotent (CREATE IF NOT EXISTS / ADD COLUMN with silent error).

use crate::atoms::error::EngineResult;
use log::info;
use rusqlite::Connection;

/// Run migrations on a freshly opened tier database.
pub fn run_engram_migrations(conn: &Connection) -> EngineResult<()> {
    info!("[engram] Running schema migrations");

    conn.execute_batch(ENGRAM_SCHEMA)?;

    // Columns added after the first release. Swallow "duplicate column".
    let _ = conn.execute("ALTER TABLE memory_items ADD COLUMN stale INTEGER NOT NULL DEFAULT 0", []);
    let _ = conn.execute("ALTER TABLE memory_items ADD COLUMN access_log TEXT NOT NULL DEFAULT '[]'", []);

    Ok(())
}

const ENGRAM_SCHEMA: &str = "
    -- ═══════════════════════════════════════════════════════════════
    -- Memory items
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS memory_items (
        id TEXT PRIMARY KEY,
        tier TEXT NOT NULL,
        content TEXT NOT NULL,

        -- Context descriptor (7 independent axes)
        ctx_domain TEXT,
        ctx_temporal_scope TEXT,
        ctx_actor TEXT,
        ctx_certainty TEXT,
        ctx_modality TEXT,
        ctx_locality TEXT,
        ctx_valence TEXT,

        -- Compressed embedding (little-endian u32 indices / f32 values)
        emb_indices BLOB,
        emb_values BLOB,
        emb_dim INTEGER,

        -- Temporal
        created_at TEXT NOT NULL,
        last_accessed_at TEXT NOT NULL,
        access_count INTEGER NOT NULL DEFAULT 0,
        access_log TEXT NOT NULL DEFAULT '[]',

        pinned INTEGER NOT NULL DEFAULT 0,
        source_agent TEXT NOT NULL DEFAULT '',
        degraded INTEGER NOT NULL DEFAULT 0,
        stale INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_items_tier ON memory_items(tier);
    CREATE INDEX IF NOT EXISTS idx_items_accessed ON memory_items(last_accessed_at);
    CREATE INDEX IF NOT EXISTS idx_items_domain ON memory_items(ctx_domain COLLATE NOCASE);
    CREATE INDEX IF NOT EXISTS idx_items_degraded ON memory_items(degraded);

    -- FTS5 index for keyword search over content and context labels
    CREATE VIRTUAL TABLE IF NOT EXISTS memory_items_fts USING fts5(
        id UNINDEXED,
        content,
        ctx_domain,
        ctx_temporal_scope,
        ctx_actor,
        ctx_certainty,
        ctx_modality,
        ctx_locality,
        ctx_valence,
        content=memory_items,
        content_rowid=rowid,
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS memory_items_fts_insert AFTER INSERT ON memory_items
    BEGIN
        INSERT INTO memory_items_fts(
            rowid, id, content, ctx_domain, ctx_temporal_scope, ctx_actor,
            ctx_certainty, ctx_modality, ctx_locality, ctx_valence
        ) VALUES (
            NEW.rowid, NEW.id, NEW.content, NEW.ctx_domain, NEW.ctx_temporal_scope, NEW.ctx_actor,
            NEW.ctx_certainty, NEW.ctx_modality, NEW.ctx_locality, NEW.ctx_valence
        );
    END;

    CREATE TRIGGER IF NOT EXISTS memory_items_fts_delete AFTER DELETE ON memory_items
    BEGIN
        INSERT INTO memory_items_fts(
            memory_items_fts, rowid, id, content, ctx_domain, ctx_temporal_scope, ctx_actor,
            ctx_certainty, ctx_modality, ctx_locality, ctx_valence
        ) VALUES (
            'delete', OLD.rowid, OLD.id, OLD.content, OLD.ctx_domain, OLD.ctx_temporal_scope, OLD.ctx_actor,
            OLD.ctx_certainty, OLD.ctx_modality, OLD.ctx_locality, OLD.ctx_valence
        );
    END;

    CREATE TRIGGER IF NOT EXISTS memory_items_fts_update AFTER UPDATE ON memory_items
    BEGIN
        INSERT INTO memory_items_fts(
            memory_items_fts, rowid, id, content, ctx_domain, ctx_temporal_scope, ctx_actor,
            ctx_certainty, ctx_modality, ctx_locality, ctx_valence
        ) VALUES (
            'delete', OLD.rowid, OLD.id, OLD.content, OLD.ctx_domain, OLD.ctx_temporal_scope, OLD.ctx_actor,
            OLD.ctx_certainty, OLD.ctx_modality, OLD.ctx_locality, OLD.ctx_valence
        );
        INSERT INTO memory_items_fts(
            rowid, id, content, ctx_domain, ctx_temporal_scope, ctx_actor,
            ctx_certainty, ctx_modality, ctx_locality, ctx_valence
        ) VALUES (
            NEW.rowid, NEW.id, NEW.content, NEW.ctx_domain, NEW.ctx_temporal_scope, NEW.ctx_actor,
            NEW.ctx_certainty, NEW.ctx_modality, NEW.ctx_locality, NEW.ctx_valence
        );
    END;

    -- ═══════════════════════════════════════════════════════════════
    -- Synchronicity links (source_id < target_id)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS synchronicity_links (
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        strength REAL NOT NULL,
        discovered_at TEXT NOT NULL,
        rationale TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (source_id, target_id),
        CHECK (source_id <> target_id)
    );

    CREATE INDEX IF NOT EXISTS idx_links_target ON synchronicity_links(target_id);

    -- ═══════════════════════════════════════════════════════════════
    -- Retired ids (archived or deleted, never reusable)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS retired_ids (
        id TEXT PRIMARY KEY,
        retired_at TEXT NOT NULL,
        reason TEXT NOT NULL DEFAULT ''
    );

    -- ═══════════════════════════════════════════════════════════════
    -- Audit log (append-only)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS memory_audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation TEXT NOT NULL,
        memory_id TEXT NOT NULL,
        detail TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_memory ON memory_audit_log(memory_id);
";
