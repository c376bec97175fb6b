// ── Engram: Audit Trail ─────────────────────────────────────────────────────
// Append-only record of tier transitions, pins, deletions and link discovery.
// Compaction trims entries past the archive retention window.

use super::{fmt_ts, parse_ts, EngramStore};
use crate::atoms::error::EngineResult;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub operation: String,
    pub memory_id: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl EngramStore {
    pub fn append_audit(&self, operation: &str, memory_id: &str, detail: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO memory_audit_log (operation, memory_id, detail, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![operation, memory_id, detail, fmt_ts(&Utc::now())],
        )?;
        Ok(())
    }

    /// Drop entries written before `before`.
    pub fn purge_audit(&self, before: &DateTime<Utc>) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM memory_audit_log WHERE created_at < ?1", params![fmt_ts(before)])?;
        Ok(n)
    }

    /// Entries for one item, oldest first.
    pub fn audit_entries(&self, memory_id: &str) -> EngineResult<Vec<AuditEntry>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT operation, memory_id, detail, created_at FROM memory_audit_log
             WHERE memory_id = ?1 ORDER BY id",
        )?;
        let entries = stmt
            .query_map(params![memory_id], |r| {
                let ts: String = r.get(3)?;
                Ok(AuditEntry {
                    operation: r.get(0)?,
                    memory_id: r.get(1)?,
                    detail: r.get(2)?,
                    created_at: parse_ts(&ts).unwrap_or_else(Utc::now),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }
}
