//! Reinforcement and decay
//!
//! Cross-cutting strength scoring over the durable store. Strength is
//! an eviction signal distinct from confidence and importance: access
//! strengthens (rate-limited by a per-record cooldown), time decays,
//! and weak unimportant records are probabilistically removed.

use engram_core::{meta, MemoryRecord, RecordId, Result, Timestamp};
use engram_store::{Filter, RecordStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Configuration for the reinforcement engine
#[derive(Debug, Clone)]
pub struct ReinforcementConfig {
    /// Records below this importance are not strengthened unless forced
    pub importance_threshold: f64,

    /// Minimum interval between strengthenings of one record
    pub cooldown: Duration,

    /// Strength added per strengthening
    pub strengthen_factor: f64,

    /// Strength removed per decay
    pub decay_factor: f64,

    /// Upper strength bound
    pub max_strength: f64,

    /// Below this strength a record becomes a removal candidate
    pub min_strength: f64,

    /// Records untouched for this long are decayed by the batch pass
    pub decay_interval: Duration,

    /// Remove weak records probabilistically after decay
    pub auto_remove: bool,

    /// Batch decay skips records at or below this negligible strength
    pub strength_floor: f64,

    /// Cooldown table capacity
    pub cooldown_capacity: usize,
}

impl Default for ReinforcementConfig {
    fn default() -> Self {
        Self {
            importance_threshold: 0.5,
            cooldown: Duration::from_secs(60),
            strengthen_factor: 0.1,
            decay_factor: 0.05,
            max_strength: 1.0,
            min_strength: 0.2,
            decay_interval: Duration::from_secs(24 * 60 * 60),
            auto_remove: true,
            strength_floor: 0.01,
            cooldown_capacity: 1000,
        }
    }
}

/// Importance at or above which auto-removal never fires
const REMOVAL_IMMUNITY: f64 = 0.7;

/// In-process cooldown bookkeeping, independent of the record store
struct CooldownTable {
    entries: HashMap<String, Timestamp>,
    capacity: usize,
}

impl CooldownTable {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    fn last(&self, id: &str) -> Option<Timestamp> {
        self.entries.get(id).copied()
    }

    /// Record a strengthening, evicting the oldest timestamp at capacity
    fn stamp(&mut self, id: &str, when: Timestamp) {
        self.entries.insert(id.to_string(), when);
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, ts)| **ts)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.entries.remove(&id);
                }
                None => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Outcome of a decay step
#[derive(Debug, Clone)]
pub struct DecayOutcome {
    /// The record after decay (its pre-removal state if removed)
    pub record: MemoryRecord,

    /// Whether the record was auto-removed
    pub removed: bool,
}

/// Report from one batch decay pass
#[derive(Debug, Clone, Default)]
pub struct DecayReport {
    pub decayed: usize,
    pub removed: usize,
    pub failed: usize,
}

struct DecayTask {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// The reinforcement engine
pub struct ReinforcementEngine {
    store: Arc<dyn RecordStore>,
    config: ReinforcementConfig,
    cooldowns: Mutex<CooldownTable>,
    task: Mutex<Option<DecayTask>>,
}

impl ReinforcementEngine {
    /// Create an engine over a record store
    pub fn new(store: Arc<dyn RecordStore>, config: ReinforcementConfig) -> Self {
        let capacity = config.cooldown_capacity;
        Self {
            store,
            config,
            cooldowns: Mutex::new(CooldownTable::new(capacity)),
            task: Mutex::new(None),
        }
    }

    /// Strengthen a record
    ///
    /// No-op when the record's importance is below the threshold
    /// (unless `forced`) or when the record was strengthened within
    /// the cooldown window. Returns the record as stored afterwards,
    /// None if the id is unknown.
    pub async fn strengthen(&self, id: &RecordId, forced: bool) -> Result<Option<MemoryRecord>> {
        let Some(mut record) = self.store.get(id).await? else {
            return Ok(None);
        };

        if !forced && record.importance() < self.config.importance_threshold {
            debug!("Skipping strengthen of {}: importance below threshold", id);
            return Ok(Some(record));
        }

        let now = Timestamp::now();
        {
            let mut cooldowns = self.cooldowns.lock().await;
            if let Some(last) = cooldowns.last(id.as_str()) {
                if now < last.plus(self.config.cooldown) {
                    debug!("Skipping strengthen of {}: within cooldown", id);
                    return Ok(Some(record));
                }
            }
            cooldowns.stamp(id.as_str(), now);
        }

        let strength =
            (record.strength() + self.config.strengthen_factor).min(self.config.max_strength);
        record.set_strength(strength);
        record.metadata.set(meta::LAST_STRENGTHENED, now.as_millis());
        let count = record.metadata.get_i64(meta::STRENGTH_COUNT).unwrap_or(0);
        record.metadata.set(meta::STRENGTH_COUNT, count + 1);
        record.touch();

        self.store.put(&record).await?;
        debug!("Strengthened {} to {:.2}", id, strength);
        Ok(Some(record))
    }

    /// Decay a record, possibly auto-removing it
    ///
    /// Strength never falls below zero, so decay at the floor is
    /// idempotent. A record whose strength drops below `min_strength`
    /// is removed with probability 1 − importance; records at
    /// importance ≥ 0.7 are never removed.
    pub async fn decay(&self, id: &RecordId) -> Result<Option<DecayOutcome>> {
        let Some(mut record) = self.store.get(id).await? else {
            return Ok(None);
        };

        let strength = (record.strength() - self.config.decay_factor).max(0.0);
        record.set_strength(strength);
        record
            .metadata
            .set(meta::LAST_DECAYED, Timestamp::now().as_millis());
        let count = record.metadata.get_i64(meta::DECAY_COUNT).unwrap_or(0);
        record.metadata.set(meta::DECAY_COUNT, count + 1);
        record.touch();

        let importance = record.importance();
        let remove = self.config.auto_remove
            && strength < self.config.min_strength
            && importance < REMOVAL_IMMUNITY
            && rand::random::<f64>() < (1.0 - importance);

        if remove {
            self.store.delete(id).await?;
            debug!("Auto-removed {} (strength {:.2})", id, strength);
            return Ok(Some(DecayOutcome {
                record,
                removed: true,
            }));
        }

        self.store.put(&record).await?;
        Ok(Some(DecayOutcome {
            record,
            removed: false,
        }))
    }

    /// The current strength of a record, None if unknown
    pub async fn get_strength(&self, id: &RecordId) -> Result<Option<f64>> {
        Ok(self.store.get(id).await?.map(|r| r.strength()))
    }

    /// Batch-decay every stale record, isolating per-record failures
    pub async fn decay_all(&self) -> Result<DecayReport> {
        let cutoff = Timestamp::now().minus(self.config.decay_interval);
        let stale = self
            .store
            .query(&Filter::new().updated_before(cutoff))
            .await?;

        let mut report = DecayReport::default();
        for record in stale {
            if record.strength() <= self.config.strength_floor {
                continue;
            }
            match self.decay(&record.id).await {
                Ok(Some(outcome)) if outcome.removed => {
                    report.decayed += 1;
                    report.removed += 1;
                }
                Ok(Some(_)) => report.decayed += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!("Decay of {} failed: {}", record.id, e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "Decay pass: {} decayed, {} removed, {} failed",
            report.decayed, report.removed, report.failed
        );
        Ok(report)
    }

    /// Start the background decay loop; a no-op if already running
    pub async fn start_background_decay(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().await;
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() {
                debug!("Background decay already running");
                return false;
            }
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let period = self.config.decay_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The immediate first tick would decay right at startup
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine.decay_all().await {
                            warn!("Background decay pass failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        *task = Some(DecayTask {
            shutdown: shutdown_tx,
            handle,
        });
        info!("Background decay started (every {:?})", period);
        true
    }

    /// Stop the background decay loop cleanly; a no-op if not running
    pub async fn stop_background_decay(&self) -> bool {
        let Some(task) = self.task.lock().await.take() else {
            return false;
        };
        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            warn!("Background decay task ended abnormally: {}", e);
        }
        info!("Background decay stopped");
        true
    }

    /// Number of records currently tracked in the cooldown table
    pub async fn cooldown_entries(&self) -> usize {
        self.cooldowns.lock().await.len()
    }
}
