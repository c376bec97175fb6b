// ── Engram: Synchronicity Link DB Layer ─────────────────────────────────────

use super::{fmt_ts, parse_ts, EngramStore};
use crate::atoms::engram_types::SynchronicityLink;
use crate::atoms::error::EngineResult;
use chrono::Utc;
use rusqlite::params;
use std::collections::HashSet;

impl EngramStore {
    /// Insert a link, or refresh strength/rationale if the pair already exists.
    pub fn upsert_link(&self, link: &SynchronicityLink) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO synchronicity_links (source_id, target_id, strength, discovered_at, rationale)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source_id, target_id) DO UPDATE SET
                strength = excluded.strength,
                rationale = excluded.rationale",
            params![
                link.source_id,
                link.target_id,
                link.strength as f64,
                fmt_ts(&link.discovered_at),
                link.rationale,
            ],
        )?;
        Ok(())
    }

    /// Links touching `id`, strongest first.
    pub fn links_for(&self, id: &str) -> EngineResult<Vec<SynchronicityLink>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, strength, discovered_at, rationale
             FROM synchronicity_links
             WHERE source_id = ?1 OR target_id = ?1
             ORDER BY strength DESC, source_id, target_id",
        )?;
        let links = stmt
            .query_map(params![id], |r| {
                let ts: String = r.get(3)?;
                Ok(SynchronicityLink {
                    source_id: r.get(0)?,
                    target_id: r.get(1)?,
                    strength: r.get::<_, f64>(2)? as f32,
                    discovered_at: parse_ts(&ts).unwrap_or_else(Utc::now),
                    rationale: r.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(links)
    }

    /// Every stored (source, target) pair.
    pub fn link_pairs(&self) -> EngineResult<HashSet<(String, String)>> {
        let conn = self.reader();
        let mut stmt = conn.prepare("SELECT source_id, target_id FROM synchronicity_links")?;
        let pairs = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(pairs)
    }

    pub fn delete_links_for(&self, id: &str) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM synchronicity_links WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )?;
        Ok(n)
    }

    pub fn count_links(&self) -> EngineResult<usize> {
        let conn = self.reader();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM synchronicity_links", [], |r| r.get(0))?;
        Ok(n.max(0) as usize)
    }
}
