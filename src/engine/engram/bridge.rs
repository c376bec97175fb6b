// ── Engram: Memory Bridge ────────────────────────────────────────────────────
//
// The only component that moves items between tiers.
//
//   store ──► Working ──(evict/flush)──► Short-Term ──(N accesses in W / pin)──► Long-Term
//                                            │                                      │
//                                            └──(idle past decay window)──► Archived└──(idle) stale flag
//
// Every read-then-write on one item holds that item's stripe lock for the
// duration of the transition only. Stripe locks are never held across an
// await, and never while taking a second item's lock.
//
// Promotion commit order: write Long-Term, confirm by read-back, then delete
// the Short-Term copy. A leftover Short-Term copy (delete failed) is cleaned
// up by the next sweep; reads already prefer the Long-Term copy.

use crate::atoms::engram_types::{
    normalize_label, CompactionReport, CompressedEmbedding, ContextAxis, ContextDescriptor,
    EmbeddingState, EngramStats, MemoryItem, MemoryTier, SweepReport, SynchronicityConfig,
    SynchronicityLink, TierConfig,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{EmbeddingProvider, TierStore};
use crate::engine::engram::cancel::CancelToken;
use crate::engine::engram::codec::Codec;
use crate::engine::engram::locks::ItemLocks;
use crate::engine::engram::long_term::LongTermStore;
use crate::engine::engram::short_term::ShortTermStore;
use crate::engine::engram::synchronicity;
use crate::engine::engram::working_memory::WorkingMemory;
use crate::engine::store::{AuditEntry, EngramStore};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Attempts at drawing a fresh uuid before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

pub struct MemoryBridge {
    working: WorkingMemory,
    short_term: ShortTermStore,
    long_term: LongTermStore,
    locks: ItemLocks,
    codec: Codec,
    tiers: TierConfig,
    synchronicity: SynchronicityConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    /// One sweep at a time, whether forced or scheduled.
    sweep_lock: tokio::sync::Mutex<()>,
}

fn check_id(id: &str) -> EngineResult<&str> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidId("blank id".into()));
    }
    Ok(trimmed)
}

impl MemoryBridge {
    pub fn new(
        working: WorkingMemory,
        short_term: ShortTermStore,
        long_term: LongTermStore,
        codec: Codec,
        tiers: TierConfig,
        synchronicity: SynchronicityConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            working,
            short_term,
            long_term,
            locks: ItemLocks::new(),
            codec,
            tiers,
            synchronicity,
            embedder,
            sweep_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn short_term(&self) -> &ShortTermStore {
        &self.short_term
    }

    pub fn long_term(&self) -> &LongTermStore {
        &self.long_term
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// The three tiers in dispatch order.
    pub fn tier_stores(&self) -> [&dyn TierStore; 3] {
        [&self.working, &self.short_term, &self.long_term]
    }

    fn db_for(&self, tier: MemoryTier) -> Option<&EngramStore> {
        match tier {
            MemoryTier::ShortTerm => Some(self.short_term.db()),
            MemoryTier::LongTerm => Some(self.long_term.db()),
            MemoryTier::Working | MemoryTier::Archived => None,
        }
    }

    fn audit(&self, db: &EngramStore, operation: &str, id: &str, detail: &str) {
        if let Err(e) = db.append_audit(operation, id, detail) {
            warn!("[engram:bridge] Audit write failed for {} {}: {}", operation, id, e);
        }
    }

    /// Embed `text` through the (retrying) provider and compress the result.
    pub async fn embed_compressed(&self, text: &str) -> EngineResult<CompressedEmbedding> {
        let dense = self.embedder.embed(text).await?;
        Ok(self.codec.compress(&dense))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════════════════

    /// Authoritative copy of an item: Long-Term over Short-Term over Working.
    /// Archived rows are returned so callers can tell "archived" from "unknown".
    fn locate(&self, id: &str) -> EngineResult<Option<MemoryItem>> {
        let mut best = self.working.peek(id).filter(|i| i.tier() == MemoryTier::Working);
        for found in [self.long_term.get(id)?, self.short_term.get(id)?].into_iter().flatten() {
            let better = best.as_ref().map_or(true, |b| found.tier().dedup_rank() > b.tier().dedup_rank());
            if better {
                best = Some(found);
            }
        }
        Ok(best)
    }

    fn locate_active(&self, id: &str) -> EngineResult<MemoryItem> {
        self.locate(id)?
            .filter(|i| i.tier() != MemoryTier::Archived)
            .ok_or_else(|| EngineError::InvalidId(id.to_string()))
    }

    fn is_known(&self, id: &str) -> EngineResult<bool> {
        Ok(self.short_term.db().is_retired(id)?
            || self.long_term.db().is_retired(id)?
            || self.locate(id)?.is_some())
    }

    fn fresh_id(&self) -> EngineResult<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = uuid::Uuid::new_v4().to_string();
            if !self.is_known(&id)? {
                return Ok(id);
            }
        }
        Err(EngineError::Other("could not allocate an unused memory id".into()))
    }

    /// Active items by id, one copy each (highest-ranked tier wins).
    pub fn load_active(&self, ids: &[String]) -> EngineResult<HashMap<String, MemoryItem>> {
        let mut out: HashMap<String, MemoryItem> = HashMap::new();
        let working = ids.iter().filter_map(|id| self.working.peek(id)).filter(|i| i.tier() == MemoryTier::Working);
        let durable = self.short_term.db().load_items(ids)?.into_iter().chain(self.long_term.db().load_items(ids)?);
        for item in working.collect::<Vec<_>>().into_iter().chain(durable) {
            let keep_existing =
                out.get(&item.id).is_some_and(|e| e.tier().dedup_rank() >= item.tier().dedup_rank());
            if !keep_existing {
                out.insert(item.id.clone(), item);
            }
        }
        Ok(out)
    }

    /// Known context labels across both durable tiers, with active counts.
    pub fn vocabulary(&self) -> EngineResult<Vec<(ContextAxis, String, usize)>> {
        let mut merged: HashMap<(ContextAxis, String), (String, usize)> = HashMap::new();
        for (axis, label, count) in
            self.short_term.db().vocabulary()?.into_iter().chain(self.long_term.db().vocabulary()?)
        {
            let entry = merged.entry((axis, normalize_label(&label))).or_insert((label, 0));
            entry.1 += count;
        }
        let mut out: Vec<(ContextAxis, String, usize)> =
            merged.into_iter().map(|((axis, _), (label, count))| (axis, label, count)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.2.cmp(&a.2)).then_with(|| a.1.cmp(&b.1)));
        Ok(out)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Caller operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Place new content. Default tier is Short-Term; only Working and
    /// Short-Term are accepted as hints.
    pub async fn store(
        &self,
        content: &str,
        context: ContextDescriptor,
        tier_hint: Option<MemoryTier>,
        source_agent: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<String> {
        if content.trim().is_empty() {
            return Err(EngineError::InvalidInput("content is blank".into()));
        }
        context.validate()?;
        let tier = match tier_hint {
            None => MemoryTier::ShortTerm,
            Some(t) if t.is_entry_tier() => t,
            Some(t) => {
                return Err(EngineError::InvalidInput(format!("cannot store directly into {}", t)));
            }
        };

        let embedding = match self.embed_compressed(content).await {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("[engram:bridge] {}; storing without embedding", e);
                None
            }
        };

        let id = self.fresh_id()?;
        let mut item = MemoryItem::new(id.clone(), content.to_string(), tier, context, source_agent.to_string(), now);
        match embedding {
            Some(c) => item.embedding = EmbeddingState::Compressed(c),
            None => item.degraded = true,
        }

        {
            let _guard = self.locks.lock(&id);
            match tier {
                MemoryTier::Working => self.working.put(&item)?,
                _ => {
                    self.short_term.put(&item)?;
                    self.audit(self.short_term.db(), "store", &id, tier.as_str());
                }
            }
        }
        if tier == MemoryTier::Working {
            self.spill()?;
        }

        info!(
            "[engram:bridge] Stored {} in {}{}",
            id,
            tier,
            if item.degraded { " (degraded, no embedding)" } else { "" }
        );
        Ok(id)
    }

    /// Record one access and return the item. Durable items are cached in
    /// Working Memory on the way out.
    pub fn touch(&self, id: &str, now: DateTime<Utc>) -> EngineResult<Option<MemoryItem>> {
        let item = {
            let _guard = self.locks.lock(id);
            let Some(mut item) = self.locate(id)?.filter(|i| i.tier() != MemoryTier::Archived) else {
                return Ok(None);
            };
            item.record_access(now);
            if let Some(db) = self.db_for(item.tier()) {
                db.update_access(&item)?;
            }
            self.working.put(&item)?;
            item
        };
        self.spill()?;
        Ok(Some(item))
    }

    pub fn get(&self, id: &str, now: DateTime<Utc>) -> EngineResult<MemoryItem> {
        let id = check_id(id)?;
        self.touch(id, now)?.ok_or_else(|| EngineError::InvalidId(id.to_string()))
    }

    /// Pin an item and promote it to Long-Term. Idempotent. When the promotion
    /// cannot commit the pin is still recorded and the sweep retries it.
    pub fn pin(&self, id: &str) -> EngineResult<MemoryTier> {
        let id = check_id(id)?;
        let tier = {
            let _guard = self.locks.lock(id);
            let mut item = self.locate_active(id)?;
            if item.pinned && item.tier() == MemoryTier::LongTerm {
                return Ok(MemoryTier::LongTerm);
            }
            item.pinned = true;
            match item.tier() {
                MemoryTier::LongTerm => {
                    self.long_term.db().set_pinned(id, true)?;
                    self.working.refresh(&item);
                    MemoryTier::LongTerm
                }
                from => {
                    if from == MemoryTier::ShortTerm {
                        self.short_term.db().set_pinned(id, true)?;
                    }
                    match self.promote_locked(&item, from) {
                        Ok(_) => MemoryTier::LongTerm,
                        Err(e) => {
                            warn!("[engram:bridge] {} (pin kept, promotion retried next sweep)", e);
                            if from == MemoryTier::Working {
                                item.set_tier(MemoryTier::ShortTerm);
                                self.short_term.put(&item)?;
                            }
                            self.working.refresh(&item);
                            MemoryTier::ShortTerm
                        }
                    }
                }
            }
        };
        self.audit(self.long_term.db(), "pin", id, tier.as_str());
        Ok(tier)
    }

    /// Clear the pin flag. The item stays in its current tier.
    pub fn unpin(&self, id: &str) -> EngineResult<()> {
        let id = check_id(id)?;
        {
            let _guard = self.locks.lock(id);
            let mut item = self.locate_active(id)?;
            if !item.pinned {
                return Ok(());
            }
            item.pinned = false;
            if let Some(db) = self.db_for(item.tier()) {
                db.set_pinned(id, false)?;
            }
            self.working.refresh(&item);
        }
        self.audit(self.long_term.db(), "unpin", id, "");
        Ok(())
    }

    /// Remove an item from every tier and retire its id.
    pub fn delete(&self, id: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let id = check_id(id)?;
        let _guard = self.locks.lock(id);
        let in_working = self.working.remove(id).is_some();
        let in_short = self.short_term.delete(id)?;
        let in_long = self.long_term.delete(id)?;
        if !(in_working || in_short || in_long) {
            return Err(EngineError::InvalidId(id.to_string()));
        }
        self.long_term.db().retire_id(id, "deleted", &now)?;
        let links = self.long_term.db().delete_links_for(id)?;
        self.audit(self.long_term.db(), "delete", id, &format!("{} links removed", links));
        info!("[engram:bridge] Deleted {}", id);
        Ok(())
    }

    pub fn links_for(&self, id: &str) -> EngineResult<Vec<SynchronicityLink>> {
        let id = check_id(id)?;
        if self.locate(id)?.is_none() {
            return Err(EngineError::InvalidId(id.to_string()));
        }
        self.long_term.db().links_for(id)
    }

    /// Audit entries for one item across both durable tiers, oldest first.
    pub fn audit_trail(&self, id: &str) -> EngineResult<Vec<AuditEntry>> {
        let mut entries = self.short_term.db().audit_entries(id)?;
        entries.extend(self.long_term.db().audit_entries(id)?);
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transitions
    // ═══════════════════════════════════════════════════════════════════════

    /// Move a Short-Term or Working item into Long-Term. Caller holds the item lock.
    fn promote_locked(&self, item: &MemoryItem, from: MemoryTier) -> EngineResult<MemoryItem> {
        let mut promoted = item.clone();
        promoted.set_tier(MemoryTier::LongTerm);
        promoted.stale = false;
        if let EmbeddingState::Dense(d) = &promoted.embedding {
            promoted.embedding = EmbeddingState::Compressed(self.codec.compress(d));
        }

        self.long_term
            .put(&promoted)
            .map_err(|e| EngineError::promotion(&item.id, format!("long-term write: {}", e)))?;
        let confirmed = self
            .long_term
            .get(&item.id)
            .map_err(|e| EngineError::promotion(&item.id, format!("read-back: {}", e)))?
            .is_some_and(|c| c.tier() == MemoryTier::LongTerm && c.content == promoted.content);
        if !confirmed {
            if let Err(e) = self.long_term.delete(&item.id) {
                warn!("[engram:bridge] Rollback of unconfirmed promotion {} failed: {}", item.id, e);
            }
            return Err(EngineError::promotion(&item.id, "read-back did not confirm the long-term row"));
        }

        if from == MemoryTier::ShortTerm {
            if let Err(e) = self.short_term.delete(&item.id) {
                warn!("[engram:bridge] Promoted {} but the short-term copy remains: {}", item.id, e);
            }
        }
        self.working.refresh(&promoted);
        self.audit(self.long_term.db(), "promote", &item.id, &format!("{} -> long_term", from));
        info!("[engram:bridge] Promoted {} from {} to long-term", item.id, from);
        Ok(promoted)
    }

    /// Persist Working items evicted since the last call into Short-Term.
    pub fn spill(&self) -> EngineResult<usize> {
        let pending = self.working.take_spilled();
        if pending.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        let mut failed = Vec::new();
        let mut last_error = None;
        for mut item in pending {
            let _guard = self.locks.lock(&item.id);
            item.set_tier(MemoryTier::ShortTerm);
            match self.short_term.put(&item) {
                Ok(()) => {
                    self.audit(self.short_term.db(), "spill", &item.id, "working -> short_term");
                    written += 1;
                }
                Err(e) => {
                    item.set_tier(MemoryTier::Working);
                    last_error = Some(e);
                    failed.push(item);
                }
            }
        }
        debug!("[engram:bridge] Spilled {} evicted working items to short-term", written);
        if let Some(e) = last_error {
            warn!("[engram:bridge] {} evicted items could not be spilled: {}", failed.len(), e);
            self.working.requeue_spilled(failed);
            return Err(e);
        }
        Ok(written)
    }

    /// Flush-on-shutdown: every Working item goes to Short-Term.
    pub fn flush_working(&self) -> EngineResult<usize> {
        let drained = self.working.drain();
        let mut flushed = 0;
        for mut item in drained {
            let _guard = self.locks.lock(&item.id);
            item.set_tier(MemoryTier::ShortTerm);
            self.short_term.put(&item)?;
            self.audit(self.short_term.db(), "flush", &item.id, "working -> short_term");
            flushed += 1;
        }
        if flushed > 0 {
            info!("[engram:bridge] Flushed {} working items to short-term", flushed);
        }
        Ok(flushed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sweep
    // ═══════════════════════════════════════════════════════════════════════

    /// One maintenance pass at `now`: promotion, decay, stale flags,
    /// re-embedding, synchronicity discovery. Individual failures are logged
    /// and counted; the sweep itself only fails on a cancelled start.
    ///
    /// The SQLite passes and the synchronicity scan run on the blocking pool;
    /// only re-embedding awaits on the calling task.
    pub async fn run_sweep_at(self: &Arc<Self>, now: DateTime<Utc>, cancel: &CancelToken) -> EngineResult<SweepReport> {
        let _sweep = self.sweep_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled("sweep".into()));
        }

        let (bridge, token) = (Arc::clone(self), cancel.clone());
        let mut report = tokio::task::spawn_blocking(move || bridge.tier_passes(now, &token))
            .await
            .map_err(|e| EngineError::Other(format!("sweep task failed: {}", e)))?;

        match self.reembed_degraded(cancel).await {
            Ok(n) => report.re_embedded = n,
            Err(e) => warn!("[engram:sweep] Re-embedding pass failed: {}", e),
        }
        if self.synchronicity.enabled && !cancel.is_cancelled() {
            let (bridge, token) = (Arc::clone(self), cancel.clone());
            match tokio::task::spawn_blocking(move || bridge.discover_synchronicities(now, &token)).await {
                Ok(Ok(links)) => report.links_discovered = links.len(),
                Ok(Err(e)) => warn!("[engram:sync] Discovery failed: {}", e),
                Err(e) => warn!("[engram:sync] Discovery task failed: {}", e),
            }
        }

        info!(
            "[engram:sweep] promoted={} failures={} archived={} stale={} re_embedded={} links={}",
            report.promoted,
            report.promotion_failures,
            report.archived,
            report.flagged_stale,
            report.re_embedded,
            report.links_discovered
        );
        Ok(report)
    }

    /// Spill, promotion, decay and stale flags. Blocking.
    fn tier_passes(&self, now: DateTime<Utc>, cancel: &CancelToken) -> SweepReport {
        let mut report = SweepReport::default();
        if let Err(e) = self.spill() {
            warn!("[engram:sweep] Spill failed: {}", e);
        }
        match self.promote_due(now, cancel) {
            Ok((promoted, failures)) => {
                report.promoted = promoted;
                report.promotion_failures = failures;
            }
            Err(e) => warn!("[engram:sweep] Promotion pass failed: {}", e),
        }
        match self.archive_idle(now) {
            Ok(n) => report.archived = n,
            Err(e) => warn!("[engram:sweep] Decay pass failed: {}", e),
        }
        match self.flag_stale(now) {
            Ok(n) => report.flagged_stale = n,
            Err(e) => warn!("[engram:sweep] Stale pass failed: {}", e),
        }
        report
    }

    fn promote_due(&self, now: DateTime<Utc>, cancel: &CancelToken) -> EngineResult<(usize, usize)> {
        let window = Duration::days(self.tiers.promotion_window_days);
        let min_accesses = self.tiers.promotion_min_accesses as usize;
        let (mut promoted, mut failures) = (0, 0);

        for candidate in self.short_term.db().list_tier(MemoryTier::ShortTerm)? {
            if cancel.is_cancelled() {
                break;
            }
            let _guard = self.locks.lock(&candidate.id);
            let Some(item) = self.short_term.get(&candidate.id)?.filter(|i| i.tier() == MemoryTier::ShortTerm) else {
                continue;
            };
            if self.long_term.get(&item.id)?.is_some_and(|lt| lt.tier() == MemoryTier::LongTerm) {
                // Leftover from a promotion whose delete step failed.
                match self.short_term.delete(&item.id) {
                    Ok(_) => debug!("[engram:sweep] Removed leftover short-term copy of {}", item.id),
                    Err(e) => warn!("[engram:sweep] Leftover short-term copy of {} remains: {}", item.id, e),
                }
                continue;
            }
            if !(item.pinned || item.accesses_within(now, window) >= min_accesses) {
                continue;
            }
            match self.promote_locked(&item, MemoryTier::ShortTerm) {
                Ok(_) => promoted += 1,
                Err(e) => {
                    warn!("[engram:sweep] {}", e);
                    failures += 1;
                }
            }
        }
        Ok((promoted, failures))
    }

    fn archive_idle(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let cutoff = now - Duration::days(self.tiers.decay_window_days);
        let mut archived = 0;
        for id in self.short_term.db().list_idle(MemoryTier::ShortTerm, &cutoff, false)? {
            let _guard = self.locks.lock(&id);
            if self.short_term.db().archive_item(&id)? {
                self.short_term.db().retire_id(&id, "archived", &now)?;
                self.working.remove(&id);
                self.audit(self.short_term.db(), "archive", &id, "short_term -> archived");
                archived += 1;
            }
        }
        Ok(archived)
    }

    fn flag_stale(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let cutoff = now - Duration::days(self.tiers.stale_window_days);
        let mut flagged = 0;
        for id in self.long_term.db().list_idle(MemoryTier::LongTerm, &cutoff, true)? {
            let _guard = self.locks.lock(&id);
            if self.long_term.db().set_stale(&id)? {
                self.working.remove(&id);
                self.audit(self.long_term.db(), "stale", &id, "");
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn reembed_degraded(&self, cancel: &CancelToken) -> EngineResult<usize> {
        let batch = self.tiers.reembed_batch;
        if batch == 0 {
            return Ok(0);
        }
        let mut pending = self.long_term.db().list_degraded(batch)?;
        pending.extend(self.short_term.db().list_degraded(batch)?);
        pending.truncate(batch);

        let mut done = 0;
        for item in pending {
            if cancel.is_cancelled() {
                break;
            }
            let embedding = match self.embed_compressed(&item.content).await {
                Ok(c) => c,
                Err(e) => {
                    debug!("[engram:sweep] Re-embedding {} failed: {}", item.id, e);
                    continue;
                }
            };
            let updated = {
                let _guard = self.locks.lock(&item.id);
                match item.tier() {
                    MemoryTier::LongTerm => self.long_term.update_embedding(&item.id, &embedding)?,
                    MemoryTier::ShortTerm => self.short_term.db().update_embedding(&item.id, &embedding)?,
                    _ => false,
                }
            };
            if updated {
                self.working.remove(&item.id);
                done += 1;
            }
        }
        Ok(done)
    }

    /// Scan active durable items for new synchronicity links and persist them.
    pub fn discover_synchronicities(
        &self,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<SynchronicityLink>> {
        let mut by_id: HashMap<String, MemoryItem> = HashMap::new();
        for item in self.short_term.db().list_embedded()?.into_iter().chain(self.long_term.db().list_embedded()?) {
            let keep_existing =
                by_id.get(&item.id).is_some_and(|e| e.tier().dedup_rank() >= item.tier().dedup_rank());
            if !keep_existing {
                by_id.insert(item.id.clone(), item);
            }
        }
        let mut items: Vec<MemoryItem> = by_id.into_values().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));

        let existing = self.long_term.db().link_pairs()?;
        let pass = synchronicity::discover(&items, &existing, &self.codec, &self.synchronicity, cancel, now);

        let mut stored = Vec::with_capacity(pass.links.len());
        for link in pass.links {
            match self.long_term.db().upsert_link(&link) {
                Ok(()) => {
                    self.audit(self.long_term.db(), "link", &link.source_id, &link.target_id);
                    stored.push(link);
                }
                Err(e) => warn!("[engram:sync] Could not store link {} <-> {}: {}", link.source_id, link.target_id, e),
            }
        }
        if !stored.is_empty() {
            info!("[engram:sync] Recorded {} synchronicity links", stored.len());
        }
        Ok(stored)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Maintenance
    // ═══════════════════════════════════════════════════════════════════════

    /// Compact the Long-Term index, then purge archived rows and audit
    /// entries past retention.
    pub fn compact(&self, now: DateTime<Utc>) -> EngineResult<CompactionReport> {
        let before = now - Duration::days(self.tiers.archive_retention_days);
        let index_entries_dropped = self.long_term.compact();
        let archived_rows_purged =
            self.short_term.db().purge_archived(&before)? + self.long_term.db().purge_archived(&before)?;
        let audit_rows_purged =
            self.short_term.db().purge_audit(&before)? + self.long_term.db().purge_audit(&before)?;
        info!(
            "[engram] Compaction dropped {} index entries, purged {} archived rows and {} audit entries",
            index_entries_dropped, archived_rows_purged, audit_rows_purged
        );
        Ok(CompactionReport { index_entries_dropped, archived_rows_purged, audit_rows_purged })
    }

    pub fn stats(&self) -> EngineResult<EngramStats> {
        let st = self.short_term.db().count_by_tier()?;
        let lt = self.long_term.db().count_by_tier()?;
        let count = |m: &HashMap<MemoryTier, usize>, t: MemoryTier| m.get(&t).copied().unwrap_or(0);
        let (index_live, index_tombstones) = self.long_term.index_stats();
        Ok(EngramStats {
            working: self.working.working_count(),
            short_term: count(&st, MemoryTier::ShortTerm),
            long_term: count(&lt, MemoryTier::LongTerm),
            archived: count(&st, MemoryTier::Archived) + count(&lt, MemoryTier::Archived),
            degraded: self.short_term.db().count_degraded()? + self.long_term.db().count_degraded()?,
            links: self.long_term.db().count_links()?,
            index_live,
            index_tombstones,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Background sweep task
// ═══════════════════════════════════════════════════════════════════════════

/// Owned handle to the periodic sweep. Dropping it leaves the task running;
/// call `stop()` for a deterministic shutdown.
pub struct SweepHandle {
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("[engram:sweep] Sweep task ended abnormally: {}", e);
        }
    }
}

/// Run `run_sweep_at(Utc::now())` every `every`, starting one interval from now.
pub fn spawn_sweep(bridge: Arc<MemoryBridge>, every: std::time::Duration) -> SweepHandle {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        info!("[engram:sweep] Background sweep every {:?}", every);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = bridge.run_sweep_at(Utc::now(), &token).await {
                        debug!("[engram:sweep] Sweep skipped: {}", e);
                    }
                }
            }
        }
        info!("[engram:sweep] Background sweep stopped");
    });
    SweepHandle { cancel, task }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::engram_types::{SearchFilter, TierQuery};
    use crate::engine::memory::HashEmbedder;

    fn bridge(capacity: usize) -> Arc<MemoryBridge> {
        let codec = Codec::default();
        Arc::new(MemoryBridge::new(
            WorkingMemory::new(capacity, codec.clone()),
            ShortTermStore::new(EngramStore::open_in_memory("short_term").unwrap(), codec.clone()),
            LongTermStore::open(EngramStore::open_in_memory("long_term").unwrap(), codec.clone()).unwrap(),
            codec,
            TierConfig::default(),
            SynchronicityConfig::default(),
            Arc::new(HashEmbedder::default()),
        ))
    }

    #[tokio::test]
    async fn store_validates_input() {
        let b = bridge(4);
        let now = Utc::now();
        let err = b.store("   ", ContextDescriptor::default(), None, "a", now).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        let err = b
            .store("x", ContextDescriptor::default(), Some(MemoryTier::LongTerm), "a", now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        let err = b.store("x", ContextDescriptor::with_domain(" "), None, "a", now).await.unwrap_err();
        assert!(matches!(err, EngineError::MalformedContext(_)));
    }

    #[tokio::test]
    async fn working_items_spill_on_eviction() {
        let b = bridge(1);
        let now = Utc::now();
        let first = b.store("first note", ContextDescriptor::default(), Some(MemoryTier::Working), "a", now).await.unwrap();
        let _second = b.store("second note", ContextDescriptor::default(), Some(MemoryTier::Working), "a", now).await.unwrap();
        let spilled = b.short_term.get(&first).unwrap().unwrap();
        assert_eq!(spilled.tier(), MemoryTier::ShortTerm);
        assert_eq!(b.stats().unwrap().working, 1);
    }

    #[tokio::test]
    async fn promotion_after_repeated_access() {
        let b = bridge(8);
        let now = Utc::now();
        let id = b.store("deploy runbook", ContextDescriptor::default(), None, "a", now).await.unwrap();
        for _ in 0..3 {
            b.get(&id, now).unwrap();
        }
        let report = b.run_sweep_at(now, &CancelToken::new()).await.unwrap();
        assert_eq!(report.promoted, 1);
        assert!(b.short_term.get(&id).unwrap().is_none());
        let lt = b.long_term.get(&id).unwrap().unwrap();
        assert_eq!(lt.tier(), MemoryTier::LongTerm);
        assert!(b.long_term.is_indexed(&id));
        let ops: Vec<String> = b.audit_trail(&id).unwrap().into_iter().map(|e| e.operation).collect();
        assert!(ops.contains(&"promote".to_string()));
    }

    #[tokio::test]
    async fn leftover_short_term_copy_is_cleaned() {
        let b = bridge(8);
        let now = Utc::now();
        let id = b.store("dup", ContextDescriptor::default(), None, "a", now).await.unwrap();
        let mut item = b.short_term.get(&id).unwrap().unwrap();
        item.set_tier(MemoryTier::LongTerm);
        b.long_term.put(&item).unwrap();
        // reads prefer the long-term copy
        assert_eq!(b.get(&id, now).unwrap().tier(), MemoryTier::LongTerm);
        b.run_sweep_at(now, &CancelToken::new()).await.unwrap();
        assert!(b.short_term.get(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn decay_archives_and_retires() {
        let b = bridge(8);
        let then = Utc::now() - Duration::days(60);
        let id = b.store("old idea", ContextDescriptor::default(), None, "a", then).await.unwrap();
        let report = b.run_sweep_at(Utc::now(), &CancelToken::new()).await.unwrap();
        assert_eq!(report.archived, 1);
        assert!(matches!(b.get(&id, Utc::now()).unwrap_err(), EngineError::InvalidId(_)));
        assert!(b.short_term.db().is_retired(&id).unwrap());
        assert_eq!(b.stats().unwrap().archived, 1);
    }

    #[tokio::test]
    async fn delete_retires_id_everywhere() {
        let b = bridge(8);
        let now = Utc::now();
        let id = b.store("to remove", ContextDescriptor::default(), None, "a", now).await.unwrap();
        b.get(&id, now).unwrap();
        b.delete(&id, now).unwrap();
        assert!(b.working.peek(&id).is_none());
        assert!(matches!(b.delete(&id, now).unwrap_err(), EngineError::InvalidId(_)));
        assert!(b.long_term.db().is_retired(&id).unwrap());
    }

    #[tokio::test]
    async fn flush_moves_working_items() {
        let b = bridge(8);
        let now = Utc::now();
        let id = b.store("scratch", ContextDescriptor::default(), Some(MemoryTier::Working), "a", now).await.unwrap();
        assert_eq!(b.flush_working().unwrap(), 1);
        assert_eq!(b.short_term.get(&id).unwrap().unwrap().tier(), MemoryTier::ShortTerm);
    }

    #[tokio::test]
    async fn compaction_purges_old_archives() {
        let b = bridge(8);
        let long_ago = Utc::now() - Duration::days(400);
        let id = b.store("ancient", ContextDescriptor::default(), None, "a", long_ago).await.unwrap();
        b.run_sweep_at(Utc::now(), &CancelToken::new()).await.unwrap();
        let report = b.compact(Utc::now()).unwrap();
        assert_eq!(report.archived_rows_purged, 1);
        assert!(b.short_term.get(&id).unwrap().is_none());
        // id stays retired after the row is gone
        assert!(b.short_term.db().is_retired(&id).unwrap());
    }

    #[tokio::test]
    async fn compaction_trims_old_audit_entries() {
        let b = bridge(8);
        let id = b.store("kept fact", ContextDescriptor::default(), None, "a", Utc::now()).await.unwrap();
        b.pin(&id).unwrap();
        assert_eq!(b.compact(Utc::now()).unwrap().audit_rows_purged, 0);
        assert!(!b.audit_trail(&id).unwrap().is_empty());

        let later = Utc::now() + Duration::days(b.tiers.archive_retention_days + 1);
        let report = b.compact(later).unwrap();
        assert!(report.audit_rows_purged >= 2);
        assert!(b.audit_trail(&id).unwrap().is_empty());
        // the item itself is untouched
        assert_eq!(b.get(&id, Utc::now()).unwrap().tier(), MemoryTier::LongTerm);
    }

    #[tokio::test]
    async fn searches_proceed_while_a_sweep_is_blocked() {
        let b = bridge(8);
        let now = Utc::now();
        let id = b.store("deploy runbook", ContextDescriptor::default(), None, "a", now).await.unwrap();

        // The promotion pass stops at this item's stripe until it is released.
        let stripe = b.locks.lock(&id);
        let sweeping = tokio::spawn({
            let b = b.clone();
            async move { b.run_sweep_at(now, &CancelToken::new()).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let query = TierQuery { text: "deploy runbook".into(), ..Default::default() };
        let hits = b.short_term.search(&query, &SearchFilter::default(), 5).unwrap();
        assert_eq!(hits[0].id, id);
        assert_eq!(b.stats().unwrap().short_term, 1);
        assert!(!sweeping.is_finished());

        drop(stripe);
        let report = tokio::time::timeout(std::time::Duration::from_secs(2), sweeping).await.unwrap().unwrap().unwrap();
        assert_eq!(report.promoted, 0);
    }

    #[tokio::test]
    async fn sweep_task_stops_cleanly() {
        let b = bridge(4);
        let handle = spawn_sweep(b, std::time::Duration::from_millis(5));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tokio::time::timeout(std::time::Duration::from_secs(2), handle.stop()).await.unwrap();
    }
}
