//! # Entity Registry
//!
//! ## Responsibility
//! Owns every source currently under audio monitoring, keyed by source id,
//! and routes pushed meter readings into the matching [`TrackedEntity`].
//!
//! ## Guarantees
//! - Lookups hold the registry read lock only long enough to clone an `Arc`
//! - Sample appends take the entity's own mutex, never the registry lock
//! - A tracked entity's meter handle is detached exactly once, either by
//!   [`EntityRegistry::remove`] or, failing that, when the entity is dropped
//! - Ingest never creates an entity
//!
//! ## NOT Responsible For
//! - Deciding which entities should exist (that is the reconciler in
//!   [`crate::bridge`], the only caller of the mutating methods)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::engine::MeterHandle;
use crate::sampler::{ChannelLevels, MeasurementKind, SampleWindow};

// ---------------------------------------------------------------------------
// TrackedEntity
// ---------------------------------------------------------------------------

/// A source under audio monitoring.
pub struct TrackedEntity {
    id: String,
    name: String,
    generation: u64,
    window: Mutex<SampleWindow>,
    handle: Mutex<Option<Box<dyn MeterHandle>>>,
}

impl TrackedEntity {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        generation: u64,
        window: SampleWindow,
        handle: Box<dyn MeterHandle>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            generation,
            window: Mutex::new(window),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscription generation this entity was created under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn channels(&self) -> usize {
        self.window.lock().channels()
    }

    /// Reduce every (channel, kind) ring under a single hold of the entity lock.
    pub fn summaries(&self) -> Vec<[f64; 3]> {
        let window = self.window.lock();
        (0..window.channels())
            .map(|ch| {
                MeasurementKind::ALL.map(|kind| window.reduce(ch, kind).unwrap_or(f64::NEG_INFINITY))
            })
            .collect()
    }

    /// Detach the meter subscription. Returns `false` if it was already detached.
    pub fn release(&self) -> bool {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => {
                handle.detach();
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.lock().is_none()
    }

    fn record(&self, levels: &[ChannelLevels]) -> IngestOutcome {
        let result = self.window.lock().record(levels);
        match result {
            Ok(()) => IngestOutcome::Recorded,
            Err(e) => {
                warn!(source_id = %self.id, error = %e, "dropping malformed meter push");
                IngestOutcome::Malformed
            }
        }
    }
}

impl Drop for TrackedEntity {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            debug!(source_id = %self.id, "releasing meter subscription on drop");
            handle.detach();
        }
    }
}

impl std::fmt::Debug for TrackedEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedEntity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("released", &self.is_released())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Ingest outcome
// ---------------------------------------------------------------------------

/// What happened to one pushed meter reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Recorded,
    /// No tracked entity with that id.
    UnknownEntity,
    /// The push came through a sink of an entity that has since been replaced.
    StaleSubscription,
    /// Too few channel readings.
    Malformed,
    /// The registry itself is gone (bridge dropped).
    Closed,
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<String, Arc<TrackedEntity>>>,
    next_generation: AtomicU64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a generation number for a new subscription.
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, id: &str) -> Option<Arc<TrackedEntity>> {
        self.entities.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Identifiers currently tracked, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.entities.read().keys().cloned().collect()
    }

    /// Track `entity`. An entity already registered under the same id is
    /// released and replaced.
    pub fn insert(&self, entity: TrackedEntity) {
        let id = entity.id.clone();
        let previous = self.entities.write().insert(id, Arc::new(entity));
        if let Some(previous) = previous {
            previous.release();
        }
    }

    /// Stop tracking `id` and detach its meter. Returns `false` if `id` was
    /// not tracked.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.entities.write().remove(id);
        match removed {
            Some(entity) => {
                entity.release();
                true
            }
            None => false,
        }
    }

    /// Remove and release every entity. Returns how many were removed.
    pub fn drain(&self) -> usize {
        let drained: Vec<_> = self.entities.write().drain().map(|(_, e)| e).collect();
        for entity in &drained {
            entity.release();
        }
        drained.len()
    }

    /// Append one meter reading to the entity tracked under `id`.
    ///
    /// With `generation` set, the push is only accepted by the entity created
    /// under that subscription.
    pub fn ingest(&self, id: &str, generation: Option<u64>, levels: &[ChannelLevels]) -> IngestOutcome {
        let Some(entity) = self.get(id) else {
            debug!(source_id = %id, "meter push for untracked source dropped");
            return IngestOutcome::UnknownEntity;
        };
        if generation.is_some_and(|g| g != entity.generation) {
            debug!(source_id = %id, "meter push from stale subscription dropped");
            return IngestOutcome::StaleSubscription;
        }
        entity.record(levels)
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("tracked", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MeterSink
// ---------------------------------------------------------------------------

/// Subscription token handed to the engine when a source is attached.
///
/// Holds only a weak reference to the registry, so an engine that outlives
/// the bridge keeps no bridge state alive.
#[derive(Clone)]
pub struct MeterSink {
    source_id: Arc<str>,
    generation: u64,
    registry: Weak<EntityRegistry>,
}

impl MeterSink {
    pub fn new(source_id: &str, generation: u64, registry: Weak<EntityRegistry>) -> Self {
        Self {
            source_id: Arc::from(source_id),
            generation,
            registry,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver one meter callback. Safe to call from any thread at any rate.
    pub fn push(&self, levels: &[ChannelLevels]) -> IngestOutcome {
        match self.registry.upgrade() {
            Some(registry) => registry.ingest(&self.source_id, Some(self.generation), levels),
            None => IngestOutcome::Closed,
        }
    }
}

impl std::fmt::Debug for MeterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterSink")
            .field("source_id", &self.source_id)
            .field("generation", &self.generation)
            .finish()
    }
}
