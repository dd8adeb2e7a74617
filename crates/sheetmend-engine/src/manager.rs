//! Process-wide, injectable cache of engine instances keyed by workbook id.

use crate::clock::{SystemTimeSource, TimeSource};
use crate::config::EngineConfig;
use crate::engine::{EngineFactory, FormualizerFactory};
use crate::instance::EngineInstance;
use parking_lot::{Condvar, Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use sheetmend_common::Sheet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

struct EngineSlot {
    instance: Mutex<EngineInstance>,
    last_access_ms: AtomicU64,
    /// Set once the slot leaves the cache.
    retired: AtomicBool,
}

impl EngineSlot {
    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    fn touch(&self, now_ms: u64) {
        self.last_access_ms.store(now_ms, Ordering::Release);
    }

    fn idle_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_access_ms.load(Ordering::Acquire))
    }
}

/// Shared handle to one workbook's instance. Locking touches the access time.
#[derive(Clone)]
pub struct EngineHandle {
    slot: Arc<EngineSlot>,
    clock: Arc<dyn TimeSource>,
}

impl EngineHandle {
    pub fn lock(&self) -> MutexGuard<'_, EngineInstance> {
        self.slot.touch(self.clock.now_ms());
        self.slot.instance.lock()
    }

    /// Like `lock`, but `None` when the instance was destroyed or evicted
    /// before the lock was obtained.
    pub fn lock_live(&self) -> Option<MutexGuard<'_, EngineInstance>> {
        let guard = self.lock();
        (!self.is_retired()).then_some(guard)
    }

    pub fn is_retired(&self) -> bool {
        self.slot.retired.load(Ordering::Acquire)
    }
}

pub struct EngineManager {
    config: EngineConfig,
    factory: Box<dyn EngineFactory>,
    clock: Arc<dyn TimeSource>,
    slots: Mutex<FxHashMap<String, Arc<EngineSlot>>>,
}

impl Default for EngineManager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl EngineManager {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parts(
            config,
            Box::new(FormualizerFactory),
            Arc::new(SystemTimeSource::new()),
        )
    }

    pub fn with_parts(
        config: EngineConfig,
        factory: Box<dyn EngineFactory>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            config,
            factory,
            clock,
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Existing instance, or one built from `sheets`. Construction happens
    /// under the cache lock so a workbook never gets two instances.
    pub fn get_or_create(&self, workbook_id: &str, sheets: &[Sheet]) -> EngineHandle {
        let now = self.clock.now_ms();
        let mut slots = self.slots.lock();
        let slot = match slots.get(workbook_id) {
            Some(slot) => Arc::clone(slot),
            None => {
                let instance = EngineInstance::from_sheets(self.factory.create(), sheets);
                info!(workbook = workbook_id, sheets = sheets.len(), "formula engine instance created");
                let slot = Arc::new(EngineSlot {
                    instance: Mutex::new(instance),
                    last_access_ms: AtomicU64::new(now),
                    retired: AtomicBool::new(false),
                });
                slots.insert(workbook_id.to_string(), Arc::clone(&slot));
                slot
            }
        };
        slot.touch(now);
        EngineHandle {
            slot,
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn get(&self, workbook_id: &str) -> Option<EngineHandle> {
        let slot = self.slots.lock().get(workbook_id).cloned()?;
        slot.touch(self.clock.now_ms());
        Some(EngineHandle {
            slot,
            clock: Arc::clone(&self.clock),
        })
    }

    pub fn contains(&self, workbook_id: &str) -> bool {
        self.slots.lock().contains_key(workbook_id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the instance immediately. Outstanding handles keep the old
    /// instance alive, but the next `get_or_create` builds a fresh one.
    pub fn destroy(&self, workbook_id: &str) -> bool {
        let removed = self.slots.lock().remove(workbook_id);
        if let Some(slot) = &removed {
            slot.retire();
            info!(workbook = workbook_id, "formula engine instance destroyed");
        }
        removed.is_some()
    }

    /// Destroy every instance idle for at least the TTL. Instances locked by
    /// an in-flight batch are skipped. Returns the evicted workbook ids.
    pub fn sweep_idle(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let ttl = self.config.idle_ttl_ms;
        let mut evicted = Vec::new();
        self.slots.lock().retain(|workbook_id, slot| {
            if slot.idle_for(now) < ttl || slot.instance.is_locked() {
                return true;
            }
            slot.retire();
            evicted.push(workbook_id.clone());
            false
        });
        for workbook_id in &evicted {
            info!(workbook = %workbook_id, "evicted idle formula engine instance");
        }
        evicted
    }

    /// Run `sweep_idle` every `sweep_interval` on a background thread until
    /// the handle is stopped or dropped, or the manager itself is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let signal = Arc::new(StopSignal::default());
        let interval = self.config.sweep_interval();
        let manager: Weak<Self> = Arc::downgrade(self);
        let thread_signal = Arc::clone(&signal);
        let spawned = std::thread::Builder::new()
            .name("sheetmend-engine-sweeper".into())
            .spawn(move || {
                loop {
                    if thread_signal.wait(Instant::now() + interval) {
                        break;
                    }
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    let evicted = manager.sweep_idle();
                    debug!(evicted = evicted.len(), "engine sweep finished");
                }
            });
        let thread = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "failed to start engine sweeper thread");
                None
            }
        };
        SweeperHandle { signal, thread }
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    /// Block until stopped or `deadline`; true when stopped.
    fn wait(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cv.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cv.notify_all();
    }
}

pub struct SweeperHandle {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.signal.stop();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("engine sweeper thread panicked");
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
