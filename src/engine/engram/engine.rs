// ── Engram: Engine Handle ───────────────────────────────────────────────────
//
// The caller-facing API. One explicit handle owns both tier databases, the
// Working Memory cache, the retriever and the background sweep task.
//
//   let engine = EngramEngine::open(config, provider)?;
//   engine.start();                       // periodic sweep
//   let id = engine.store("...", ctx, None, "agent").await?;
//   let hits = engine.query("What is it?", &evidence, 5).await?;
//   engine.shutdown().await?;             // stop sweep, flush Working Memory

use crate::atoms::constants::{LONG_TERM_DB_FILE, SHORT_TERM_DB_FILE};
use crate::atoms::engram_types::{
    CompactionReport, ContextDescriptor, ContextEvidence, EngramConfig, EngramStats, MemoryItem,
    MemoryTier, QueryResponse, SweepReport, SynchronicityLink,
};
use crate::atoms::error::EngineResult;
use crate::atoms::traits::EmbeddingProvider;
use crate::engine::engram::bridge::{spawn_sweep, MemoryBridge, SweepHandle};
use crate::engine::engram::cancel::CancelToken;
use crate::engine::engram::codec::Codec;
use crate::engine::engram::lateral::LateralExpander;
use crate::engine::engram::long_term::LongTermStore;
use crate::engine::engram::quantum::QuantumRetriever;
use crate::engine::engram::reasoner::SequentialReasoner;
use crate::engine::engram::short_term::ShortTermStore;
use crate::engine::engram::working_memory::WorkingMemory;
use crate::engine::memory::RetryingEmbedder;
use crate::engine::store::{AuditEntry, EngramStore};
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub struct EngramEngine {
    config: EngramConfig,
    bridge: Arc<MemoryBridge>,
    retriever: QuantumRetriever,
    /// Cancelled on shutdown; reasoning chains and forced sweeps observe it.
    cancel: CancelToken,
    sweep: Mutex<Option<SweepHandle>>,
}

impl EngramEngine {
    /// Open (or create) the tier databases and wire the components together.
    /// With `data_dir = None` both durable tiers live in memory.
    pub fn open(config: EngramConfig, provider: Arc<dyn EmbeddingProvider>) -> EngineResult<Self> {
        config.validate()?;
        let ceiling = config.codec.sparsity_ceiling;
        let (st_db, lt_db) = match &config.data_dir {
            Some(dir) => (
                EngramStore::open(&dir.join(SHORT_TERM_DB_FILE), "short_term")?,
                EngramStore::open(&dir.join(LONG_TERM_DB_FILE), "long_term")?,
            ),
            None => (EngramStore::open_in_memory("short_term")?, EngramStore::open_in_memory("long_term")?),
        };

        let codec = Codec::new(config.codec.clone());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(RetryingEmbedder::new(provider, config.retry.clone()));
        let bridge = Arc::new(MemoryBridge::new(
            WorkingMemory::new(config.tiers.working_capacity, codec.clone()),
            ShortTermStore::new(st_db.with_sparsity_ceiling(ceiling), codec.clone()),
            LongTermStore::open(lt_db.with_sparsity_ceiling(ceiling), codec.clone())?,
            codec,
            config.tiers.clone(),
            config.synchronicity.clone(),
            embedder,
        ));
        let retriever = QuantumRetriever::new(
            bridge.clone(),
            LateralExpander::new(config.lateral.clone()),
            SequentialReasoner::new(config.reasoner.clone()),
            config.retrieval.clone(),
        );
        info!(
            "[engram] Engine ready ({})",
            config.data_dir.as_ref().map_or("in-memory".to_string(), |d| d.display().to_string())
        );
        Ok(Self { config, bridge, retriever, cancel: CancelToken::new(), sweep: Mutex::new(None) })
    }

    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<MemoryBridge> {
        &self.bridge
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Spawn the periodic sweep. A second call is a no-op.
    pub fn start(&self) {
        let mut slot = self.sweep.lock();
        if slot.is_some() {
            return;
        }
        let every = Duration::from_secs(self.config.tiers.sweep_interval_secs);
        *slot = Some(spawn_sweep(self.bridge.clone(), every));
    }

    /// Stop the sweep, cancel in-flight reasoning, flush Working Memory.
    /// Returns the number of items flushed.
    pub async fn shutdown(&self) -> EngineResult<usize> {
        let handle = self.sweep.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        self.cancel.cancel();
        let flushed = self.bridge.flush_working()?;
        info!("[engram] Engine shut down, {} working items flushed", flushed);
        Ok(flushed)
    }

    // ── Items ──────────────────────────────────────────────────────────────

    pub async fn store(
        &self,
        content: &str,
        context: ContextDescriptor,
        tier_hint: Option<MemoryTier>,
        source_agent: &str,
    ) -> EngineResult<String> {
        self.bridge.store(content, context, tier_hint, source_agent, Utc::now()).await
    }

    /// Fetch an item by id. Counts as an access.
    pub fn get(&self, id: &str) -> EngineResult<MemoryItem> {
        self.bridge.get(id, Utc::now())
    }

    pub fn delete(&self, id: &str) -> EngineResult<()> {
        self.bridge.delete(id, Utc::now())
    }

    /// Pin and promote to Long-Term. Returns the tier the item now sits in.
    pub fn pin(&self, id: &str) -> EngineResult<MemoryTier> {
        self.bridge.pin(id)
    }

    pub fn unpin(&self, id: &str) -> EngineResult<()> {
        self.bridge.unpin(id)
    }

    pub fn audit_trail(&self, id: &str) -> EngineResult<Vec<AuditEntry>> {
        self.bridge.audit_trail(id)
    }

    // ── Retrieval ──────────────────────────────────────────────────────────

    pub async fn query(&self, text: &str, evidence: &ContextEvidence, limit: usize) -> EngineResult<QueryResponse> {
        self.retriever.query(text, evidence, limit, &self.cancel).await
    }

    pub fn get_synchronicity_links(&self, id: &str) -> EngineResult<Vec<SynchronicityLink>> {
        self.bridge.links_for(id)
    }

    /// Run a discovery pass now instead of waiting for the sweep.
    pub fn discover_synchronicities(&self) -> EngineResult<Vec<SynchronicityLink>> {
        self.bridge.discover_synchronicities(Utc::now(), &self.cancel)
    }

    // ── Maintenance ────────────────────────────────────────────────────────

    pub async fn force_decay_sweep(&self) -> EngineResult<SweepReport> {
        self.force_decay_sweep_at(Utc::now()).await
    }

    /// Sweep as if the clock read `now`.
    pub async fn force_decay_sweep_at(&self, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        self.bridge.run_sweep_at(now, &self.cancel).await
    }

    pub fn compact(&self) -> EngineResult<CompactionReport> {
        self.bridge.compact(Utc::now())
    }

    pub fn stats(&self) -> EngineResult<EngramStats> {
        self.bridge.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::HashEmbedder;

    #[tokio::test]
    async fn start_is_idempotent_and_shutdown_flushes() {
        let engine = EngramEngine::open(EngramConfig::default(), Arc::new(HashEmbedder::default())).unwrap();
        engine.start();
        engine.start();
        engine.store("scratch note about lifetimes", ContextDescriptor::default(), Some(MemoryTier::Working), "t")
            .await
            .unwrap();
        assert_eq!(engine.stats().unwrap().working, 1);
        assert_eq!(engine.shutdown().await.unwrap(), 1);
        let stats = engine.stats().unwrap();
        assert_eq!(stats.working, 0);
        assert_eq!(stats.short_term, 1);
    }

    #[test]
    fn on_disk_engine_reopens_with_items() {
        let dir = std::env::temp_dir().join(format!("engram-test-{}", uuid::Uuid::new_v4()));
        let config = EngramConfig { data_dir: Some(dir.clone()), ..Default::default() };
        let rt = tokio::runtime::Runtime::new().unwrap();
        let id = rt.block_on(async {
            let engine = EngramEngine::open(config.clone(), Arc::new(HashEmbedder::default())).unwrap();
            let id = engine.store("persisted fact", ContextDescriptor::default(), None, "t").await.unwrap();
            engine.pin(&id).unwrap();
            id
        });
        let engine = EngramEngine::open(config, Arc::new(HashEmbedder::default())).unwrap();
        let item = engine.get(&id).unwrap();
        assert_eq!(item.content, "persisted fact");
        assert_eq!(item.tier(), MemoryTier::LongTerm);
        assert_eq!(engine.stats().unwrap().index_live, 1);
        drop(engine);
        let _ = std::fs::remove_dir_all(dir);
    }
}
