// ── Engram: Memory Item DB Layer ─────────────────────────────────────────────
//
// CRUD and sweep queries for `memory_items`. Writes lock the writer, reads
// take a pooled reader; either is held for one statement group only.
//
// Schema lives in engine/engram/schema.rs. Column names here MUST match that schema.

use super::embedding::{decode_compressed, f32_vec_to_bytes, u32_vec_to_bytes};
use super::{fmt_ts, parse_ts, EngramStore};
use crate::atoms::constants::DEFAULT_SPARSITY_RATIO;
use crate::atoms::engram_types::{
    normalize_label, CompressedEmbedding, ContextAxis, ContextDescriptor, EmbeddingState,
    MemoryItem, MemoryTier, TierQuery,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::engram::{codec, tokens};
use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};

const ITEM_COLUMNS: &str = "m.id, m.tier, m.content,
    m.ctx_domain, m.ctx_temporal_scope, m.ctx_actor, m.ctx_certainty,
    m.ctx_modality, m.ctx_locality, m.ctx_valence,
    m.emb_indices, m.emb_values, m.emb_dim,
    m.created_at, m.last_accessed_at, m.access_count, m.access_log,
    m.pinned, m.source_agent, m.degraded, m.stale";

/// A row plus the reason its embedding was rejected, if it was.
struct LoadedItem {
    item: MemoryItem,
    corrupt: Option<String>,
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(EngineError::Other(msg)))
}

/// Persisted columns for an embedding state. Dense vectors are compressed
/// with the default ratio; the bridge normally compresses before this point.
fn embedding_columns(state: &EmbeddingState) -> (Option<Vec<u8>>, Option<Vec<u8>>, Option<i64>) {
    match state {
        EmbeddingState::Compressed(c) => (
            Some(u32_vec_to_bytes(&c.indices)),
            Some(f32_vec_to_bytes(&c.values)),
            Some(c.original_dim as i64),
        ),
        EmbeddingState::Dense(v) => {
            let c = codec::compress(v, DEFAULT_SPARSITY_RATIO);
            (Some(u32_vec_to_bytes(&c.indices)), Some(f32_vec_to_bytes(&c.values)), Some(c.original_dim as i64))
        }
        EmbeddingState::Absent => (None, None, None),
    }
}

impl EngramStore {
    fn item_from_row(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<LoadedItem> {
        let tier_str: String = row.get(1)?;
        let tier = MemoryTier::parse(&tier_str)
            .ok_or_else(|| conversion_error(1, format!("unknown tier '{}'", tier_str)))?;

        let mut context = ContextDescriptor::default();
        for (offset, axis) in ContextAxis::ALL.iter().enumerate() {
            context.set(*axis, row.get::<_, Option<String>>(3 + offset)?);
        }

        let indices: Option<Vec<u8>> = row.get(10)?;
        let values: Option<Vec<u8>> = row.get(11)?;
        let dim: Option<i64> = row.get(12)?;
        let mut degraded: bool = row.get::<_, i32>(19)? != 0;
        let mut corrupt = None;
        let embedding = match (indices, values, dim) {
            (Some(i), Some(v), Some(d)) => {
                match decode_compressed(&i, &v, d).and_then(|c| codec::validate(&c, self.sparsity_ceiling).map(|_| c)) {
                    Ok(c) => EmbeddingState::Compressed(c),
                    Err(e) => {
                        corrupt = Some(e.to_string());
                        degraded = true;
                        EmbeddingState::Absent
                    }
                }
            }
            (None, None, None) => EmbeddingState::Absent,
            _ => {
                corrupt = Some("partial embedding columns".to_string());
                degraded = true;
                EmbeddingState::Absent
            }
        };

        let created: String = row.get(13)?;
        let accessed: String = row.get(14)?;
        let created_at = parse_ts(&created).ok_or_else(|| conversion_error(13, format!("bad timestamp '{}'", created)))?;
        let last_accessed_at =
            parse_ts(&accessed).ok_or_else(|| conversion_error(14, format!("bad timestamp '{}'", accessed)))?;
        let access_log_json: String = row.get(16)?;
        let access_log: Vec<DateTime<Utc>> = serde_json::from_str(&access_log_json).unwrap_or_default();

        let mut item = MemoryItem::new(
            row.get(0)?,
            row.get(2)?,
            tier,
            context,
            row.get(18)?,
            created_at,
        );
        item.embedding = embedding;
        item.last_accessed_at = last_accessed_at;
        item.access_count = row.get::<_, i64>(15)?.max(0) as u32;
        item.access_log = access_log;
        item.pinned = row.get::<_, i32>(17)? != 0;
        item.degraded = degraded;
        item.stale = row.get::<_, i32>(20)? != 0;
        Ok(LoadedItem { item, corrupt })
    }

    /// Run an item query on a reader and persist the degraded flag (through
    /// the writer) for any row whose embedding failed validation, so the
    /// re-embedding pass finds it.
    fn query_items(&self, conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> EngineResult<Vec<MemoryItem>> {
        let mut stmt = conn.prepare(sql)?;
        let loaded: Vec<LoadedItem> = stmt
            .query_map(params, |row| self.item_from_row(row))?
            .filter_map(|r| match r {
                Ok(l) => Some(l),
                Err(e) => {
                    warn!("[engram] Skipping unreadable {} row: {}", self.label(), e);
                    None
                }
            })
            .collect();

        let mut items = Vec::with_capacity(loaded.len());
        for l in loaded {
            if let Some(reason) = &l.corrupt {
                warn!("[engram] Corrupt embedding for {} in {}: {} (scheduled for re-embedding)", l.item.id, self.label(), reason);
                self.mark_degraded(&l.item.id)?;
            }
            items.push(l.item);
        }
        Ok(items)
    }

    fn mark_degraded_locked(conn: &Connection, id: &str) -> EngineResult<()> {
        conn.execute(
            "UPDATE memory_items SET emb_indices = NULL, emb_values = NULL, emb_dim = NULL, degraded = 1
             WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    // ── Writes ────────────────────────────────────────────────────────

    /// Insert or replace an item row.
    pub fn upsert_item(&self, item: &MemoryItem) -> EngineResult<()> {
        let conn = self.conn.lock();
        let (emb_indices, emb_values, emb_dim) = embedding_columns(&item.embedding);
        let access_log = serde_json::to_string(&item.access_log)?;
        let ctx = &item.context;

        conn.execute(
            "INSERT INTO memory_items (
                id, tier, content,
                ctx_domain, ctx_temporal_scope, ctx_actor, ctx_certainty,
                ctx_modality, ctx_locality, ctx_valence,
                emb_indices, emb_values, emb_dim,
                created_at, last_accessed_at, access_count, access_log,
                pinned, source_agent, degraded, stale
            ) VALUES (
                ?1, ?2, ?3,
                ?4, ?5, ?6, ?7,
                ?8, ?9, ?10,
                ?11, ?12, ?13,
                ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21
            )
            ON CONFLICT(id) DO UPDATE SET
                tier = excluded.tier,
                content = excluded.content,
                ctx_domain = excluded.ctx_domain,
                ctx_temporal_scope = excluded.ctx_temporal_scope,
                ctx_actor = excluded.ctx_actor,
                ctx_certainty = excluded.ctx_certainty,
                ctx_modality = excluded.ctx_modality,
                ctx_locality = excluded.ctx_locality,
                ctx_valence = excluded.ctx_valence,
                emb_indices = excluded.emb_indices,
                emb_values = excluded.emb_values,
                emb_dim = excluded.emb_dim,
                last_accessed_at = excluded.last_accessed_at,
                access_count = excluded.access_count,
                access_log = excluded.access_log,
                pinned = excluded.pinned,
                source_agent = excluded.source_agent,
                degraded = excluded.degraded,
                stale = excluded.stale",
            params![
                item.id,
                item.tier().as_str(),
                item.content,
                ctx.domain,
                ctx.temporal_scope,
                ctx.actor,
                ctx.certainty,
                ctx.modality,
                ctx.locality,
                ctx.valence,
                emb_indices,
                emb_values,
                emb_dim,
                fmt_ts(&item.created_at),
                fmt_ts(&item.last_accessed_at),
                item.access_count as i64,
                access_log,
                item.pinned as i32,
                item.source_agent,
                item.degraded as i32,
                item.stale as i32,
            ],
        )?;
        Ok(())
    }

    pub fn delete_item(&self, id: &str) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM memory_items WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Persist access bookkeeping after `MemoryItem::record_access`.
    pub fn update_access(&self, item: &MemoryItem) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE memory_items SET last_accessed_at = ?2, access_count = ?3, access_log = ?4, stale = 0
             WHERE id = ?1",
            params![
                item.id,
                fmt_ts(&item.last_accessed_at),
                item.access_count as i64,
                serde_json::to_string(&item.access_log)?,
            ],
        )?;
        Ok(())
    }

    pub fn set_pinned(&self, id: &str, pinned: bool) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("UPDATE memory_items SET pinned = ?2 WHERE id = ?1", params![id, pinned as i32])?;
        Ok(n > 0)
    }

    /// Demote an unpinned item to `archived`. Returns false when the row is
    /// missing, pinned, or already archived.
    pub fn archive_item(&self, id: &str) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE memory_items SET tier = 'archived'
             WHERE id = ?1 AND pinned = 0 AND tier <> 'archived'",
            params![id],
        )?;
        Ok(n > 0)
    }

    pub fn set_stale(&self, id: &str) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("UPDATE memory_items SET stale = 1 WHERE id = ?1 AND stale = 0", params![id])?;
        Ok(n > 0)
    }

    pub fn update_embedding(&self, id: &str, embedding: &CompressedEmbedding) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE memory_items SET emb_indices = ?2, emb_values = ?3, emb_dim = ?4, degraded = 0
             WHERE id = ?1",
            params![
                id,
                u32_vec_to_bytes(&embedding.indices),
                f32_vec_to_bytes(&embedding.values),
                embedding.original_dim as i64,
            ],
        )?;
        Ok(n > 0)
    }

    pub fn mark_degraded(&self, id: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        Self::mark_degraded_locked(&conn, id)
    }

    /// Drop archived rows last touched before `before`. Ids stay retired.
    pub fn purge_archived(&self, before: &DateTime<Utc>) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM memory_items WHERE tier = 'archived' AND last_accessed_at < ?1",
            params![fmt_ts(before)],
        )?;
        Ok(n)
    }

    // ── Retired ids ───────────────────────────────────────────────────

    pub fn retire_id(&self, id: &str, reason: &str, now: &DateTime<Utc>) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO retired_ids (id, retired_at, reason) VALUES (?1, ?2, ?3)",
            params![id, fmt_ts(now), reason],
        )?;
        Ok(())
    }

    pub fn is_retired(&self, id: &str) -> EngineResult<bool> {
        let conn = self.reader();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM retired_ids WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Any row with this id, archived included.
    pub fn get_item(&self, id: &str) -> EngineResult<Option<MemoryItem>> {
        let conn = self.reader();
        let sql = format!("SELECT {} FROM memory_items m WHERE m.id = ?1", ITEM_COLUMNS);
        Ok(self.query_items(&conn, &sql, &[&id])?.into_iter().next())
    }

    /// Active (non-archived) rows in a given tier.
    pub fn list_tier(&self, tier: MemoryTier) -> EngineResult<Vec<MemoryItem>> {
        let conn = self.reader();
        let sql = format!("SELECT {} FROM memory_items m WHERE m.tier = ?1 ORDER BY m.id", ITEM_COLUMNS);
        self.query_items(&conn, &sql, &[&tier.as_str()])
    }

    /// Unpinned rows of `tier` not accessed since `cutoff`.
    pub fn list_idle(&self, tier: MemoryTier, cutoff: &DateTime<Utc>, exclude_stale: bool) -> EngineResult<Vec<String>> {
        let conn = self.reader();
        let sql = if exclude_stale {
            "SELECT id FROM memory_items
             WHERE tier = ?1 AND pinned = 0 AND stale = 0 AND last_accessed_at < ?2 ORDER BY id"
        } else {
            "SELECT id FROM memory_items
             WHERE tier = ?1 AND pinned = 0 AND last_accessed_at < ?2 ORDER BY id"
        };
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map(params![tier.as_str(), fmt_ts(cutoff)], |r| r.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Active degraded rows, oldest first.
    pub fn list_degraded(&self, limit: usize) -> EngineResult<Vec<MemoryItem>> {
        let conn = self.reader();
        let sql = format!(
            "SELECT {} FROM memory_items m
             WHERE m.degraded = 1 AND m.tier <> 'archived'
             ORDER BY m.created_at LIMIT ?1",
            ITEM_COLUMNS
        );
        self.query_items(&conn, &sql, &[&(limit as i64)])
    }

    /// Active rows carrying a valid compressed embedding.
    pub fn list_embedded(&self) -> EngineResult<Vec<MemoryItem>> {
        let conn = self.reader();
        let sql = format!(
            "SELECT {} FROM memory_items m
             WHERE m.emb_indices IS NOT NULL AND m.tier <> 'archived' ORDER BY m.id",
            ITEM_COLUMNS
        );
        let items = self.query_items(&conn, &sql, &[])?;
        Ok(items.into_iter().filter(|i| i.embedding.compressed().is_some()).collect())
    }

    /// Load active rows by id, skipping unknown ids.
    pub fn load_items(&self, ids: &[String]) -> EngineResult<Vec<MemoryItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.reader();
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT {} FROM memory_items m WHERE m.tier <> 'archived' AND m.id IN ({})",
            ITEM_COLUMNS,
            placeholders.join(", ")
        );
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        self.query_items(&conn, &sql, &params)
    }

    /// Keyword (FTS5 over content + labels) and context-axis candidates.
    pub fn keyword_candidates(&self, query: &TierQuery, limit: usize) -> EngineResult<Vec<MemoryItem>> {
        let conn = self.reader();
        let mut out: Vec<MemoryItem> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(expr) = tokens::fts_match_expression(&query.text) {
            let sql = format!(
                "SELECT {} FROM memory_items m
                 JOIN memory_items_fts ON memory_items_fts.rowid = m.rowid
                 WHERE memory_items_fts MATCH ?1 AND m.tier <> 'archived'
                 ORDER BY rank LIMIT ?2",
                ITEM_COLUMNS
            );
            match self.query_items(&conn, &sql, &[&expr, &(limit as i64)]) {
                Ok(items) => {
                    for item in items {
                        if seen.insert(item.id.clone()) {
                            out.push(item);
                        }
                    }
                }
                Err(e) => warn!("[engram] FTS query failed on {}: {}", self.label(), e),
            }
        }

        for axis in query.context.present_axes() {
            let Some(value) = query.context.normalized(axis) else { continue };
            let sql = format!(
                "SELECT {} FROM memory_items m
                 WHERE lower(trim(m.{})) = ?1 AND m.tier <> 'archived'
                 ORDER BY m.last_accessed_at DESC LIMIT ?2",
                ITEM_COLUMNS,
                axis.column()
            );
            for item in self.query_items(&conn, &sql, &[&value, &(limit as i64)])? {
                if seen.insert(item.id.clone()) {
                    out.push(item);
                }
            }
        }
        Ok(out)
    }

    /// Known labels per axis with their active row counts.
    pub fn vocabulary(&self) -> EngineResult<Vec<(ContextAxis, String, usize)>> {
        let conn = self.reader();
        let mut out = Vec::new();
        for axis in ContextAxis::ALL {
            let sql = format!(
                "SELECT MIN({col}), COUNT(*) FROM memory_items
                 WHERE {col} IS NOT NULL AND tier <> 'archived'
                 GROUP BY lower(trim({col}))",
                col = axis.column()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
                .filter_map(|r| r.ok());
            for (label, count) in rows {
                if !normalize_label(&label).is_empty() {
                    out.push((axis, label, count.max(0) as usize));
                }
            }
        }
        Ok(out)
    }

    pub fn count_by_tier(&self) -> EngineResult<HashMap<MemoryTier, usize>> {
        let conn = self.reader();
        let mut stmt = conn.prepare("SELECT tier, COUNT(*) FROM memory_items GROUP BY tier")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok());
        let mut counts = HashMap::new();
        for (tier, n) in rows {
            if let Some(t) = MemoryTier::parse(&tier) {
                counts.insert(t, n.max(0) as usize);
            }
        }
        Ok(counts)
    }

    pub fn count_degraded(&self) -> EngineResult<usize> {
        let conn = self.reader();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_items WHERE degraded = 1 AND tier <> 'archived'",
            [],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as usize)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
