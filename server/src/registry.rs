//! Per-(server, map) handle registry.
//!
//! Every entity visible on a map gets a short-lived 16-bit handle from the
//! numeric range of its kind. Consumers tell entity kinds apart only by which
//! range a handle falls in, so the ranges must never overlap.
//!
//! Lock discipline: an outer `RwLock` guards the partition map and is only
//! write-locked to create or drop a whole partition; each partition has its
//! own `RwLock`, write-locked by allocate/release and read-locked by lookups.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, RwLock};

use log::{debug, info};

use crate::error::{Result, SimError};
use crate::task::{read, write};

/// Player handles live below every simulated range and are owned by the
/// session layer.
pub const PLAYER_HANDLES: Range<u16> = 1..10_000;
pub const MONSTER_HANDLES: Range<u16> = 10_000..20_000;
pub const COMPANION_HANDLES: Range<u16> = 50_000..60_000;

/// Kind of entity a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Monster,
    Companion,
}

impl EntityKind {
    pub fn handles(&self) -> Range<u16> {
        match self {
            Self::Monster => MONSTER_HANDLES,
            Self::Companion => COMPANION_HANDLES,
        }
    }

    /// Kind owning a handle, if it lies in a simulated range
    pub fn of_handle(handle: u16) -> Option<Self> {
        if MONSTER_HANDLES.contains(&handle) {
            Some(Self::Monster)
        } else if COMPANION_HANDLES.contains(&handle) {
            Some(Self::Companion)
        } else {
            None
        }
    }
}

/// Anything that can be bound to a registry slot
pub trait Registrable: Clone + Send + Sync {
    fn kind(&self) -> EntityKind;
}

#[derive(Debug)]
struct Partition<T> {
    slots: HashMap<u16, T>,
    /// Next handle to try per kind, so freed handles are reused last
    cursors: HashMap<EntityKind, u16>,
    counts: HashMap<EntityKind, usize>,
}

impl<T> Partition<T> {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            cursors: HashMap::new(),
            counts: HashMap::new(),
        }
    }

    fn free_handle(&self, kind: EntityKind) -> Option<u16> {
        let range = kind.handles();
        let width = range.len();
        if self.counts.get(&kind).copied().unwrap_or(0) >= width {
            return None;
        }
        let start = self.cursors.get(&kind).copied().unwrap_or(range.start);
        let offset = start.saturating_sub(range.start) as usize;
        (0..width)
            .map(|i| range.start + ((offset + i) % width) as u16)
            .find(|handle| !self.slots.contains_key(handle))
    }
}

/// Handle table for all partitions of one world
pub struct EntityRegistry<T> {
    partitions: RwLock<HashMap<(u16, u32), Arc<RwLock<Partition<T>>>>>,
}

impl<T: Registrable> EntityRegistry<T> {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
        }
    }

    fn partition(&self, server: u16, map: u32) -> Option<Arc<RwLock<Partition<T>>>> {
        read(&self.partitions).get(&(server, map)).cloned()
    }

    fn partition_or_create(&self, server: u16, map: u32) -> Arc<RwLock<Partition<T>>> {
        if let Some(partition) = self.partition(server, map) {
            return partition;
        }
        write(&self.partitions)
            .entry((server, map))
            .or_insert_with(|| Arc::new(RwLock::new(Partition::new())))
            .clone()
    }

    /// Bind an entity to a free handle of its kind's range.
    ///
    /// Fails with `HandlesExhausted` when every handle of the range is bound;
    /// it never wraps onto a live binding.
    pub fn allocate(&self, server: u16, map: u32, entity: T) -> Result<u16> {
        let kind = entity.kind();
        let partition = self.partition_or_create(server, map);
        let mut partition = write(&partition);

        let handle = partition
            .free_handle(kind)
            .ok_or(SimError::HandlesExhausted { kind, server, map })?;

        partition.slots.insert(handle, entity);
        *partition.counts.entry(kind).or_insert(0) += 1;
        let next = if handle + 1 >= kind.handles().end { kind.handles().start } else { handle + 1 };
        partition.cursors.insert(kind, next);
        Ok(handle)
    }

    /// Point lookup. `None` is a normal outcome (entity already gone).
    pub fn lookup(&self, server: u16, map: u32, handle: u16) -> Option<T> {
        let partition = self.partition(server, map)?;
        let partition = read(&partition);
        partition.slots.get(&handle).cloned()
    }

    /// Unbind a handle. Releasing a free handle is a no-op.
    pub fn release(&self, server: u16, map: u32, handle: u16) -> Option<T> {
        let partition = self.partition(server, map)?;
        let mut partition = write(&partition);
        let entity = partition.slots.remove(&handle)?;
        if let Some(count) = partition.counts.get_mut(&entity.kind()) {
            *count = count.saturating_sub(1);
        }
        debug!("Released handle {} on server {} map {}", handle, server, map);
        Some(entity)
    }

    /// Snapshot of every binding in a partition
    pub fn entities(&self, server: u16, map: u32) -> Vec<(u16, T)> {
        let Some(partition) = self.partition(server, map) else {
            return Vec::new();
        };
        let partition = read(&partition);
        partition
            .slots
            .iter()
            .map(|(handle, entity)| (*handle, entity.clone()))
            .collect()
    }

    /// Drop a whole partition (dungeon instance cleanup)
    pub fn release_partition(&self, server: u16, map: u32) -> Vec<(u16, T)> {
        let Some(partition) = write(&self.partitions).remove(&(server, map)) else {
            return Vec::new();
        };
        let mut partition = write(&partition);
        let released: Vec<(u16, T)> = partition.slots.drain().collect();
        partition.counts.clear();
        info!("Released {} handles of server {} map {}", released.len(), server, map);
        released
    }

    /// Number of live bindings in a partition
    pub fn len(&self, server: u16, map: u32) -> usize {
        let Some(partition) = self.partition(server, map) else {
            return 0;
        };
        let len = read(&partition).slots.len();
        len
    }

    pub fn is_empty(&self, server: u16, map: u32) -> bool {
        self.len(server, map) == 0
    }
}

impl<T: Registrable> Default for EntityRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq)]
    struct Dummy(EntityKind, u32);

    impl Registrable for Dummy {
        fn kind(&self) -> EntityKind {
            self.0
        }
    }

    fn monster(n: u32) -> Dummy {
        Dummy(EntityKind::Monster, n)
    }

    #[test]
    fn test_ranges_do_not_overlap() {
        assert!(PLAYER_HANDLES.end <= MONSTER_HANDLES.start);
        assert!(MONSTER_HANDLES.end <= COMPANION_HANDLES.start);
        assert_eq!(EntityKind::of_handle(10_000), Some(EntityKind::Monster));
        assert_eq!(EntityKind::of_handle(55_555), Some(EntityKind::Companion));
        assert_eq!(EntityKind::of_handle(42), None);
    }

    #[test]
    fn test_allocate_lookup_release() {
        let registry = EntityRegistry::new();
        let handle = registry.allocate(1, 7, monster(1)).unwrap();
        assert!(MONSTER_HANDLES.contains(&handle));
        assert_eq!(registry.lookup(1, 7, handle), Some(monster(1)));
        // other partitions don't see it
        assert_eq!(registry.lookup(2, 7, handle), None);
        assert_eq!(registry.lookup(1, 8, handle), None);

        assert_eq!(registry.release(1, 7, handle), Some(monster(1)));
        assert_eq!(registry.lookup(1, 7, handle), None);
    }

    #[test]
    fn test_companions_use_their_own_range() {
        let registry = EntityRegistry::new();
        let pet = registry.allocate(1, 1, Dummy(EntityKind::Companion, 9)).unwrap();
        let mob = registry.allocate(1, 1, monster(9)).unwrap();
        assert!(COMPANION_HANDLES.contains(&pet));
        assert!(MONSTER_HANDLES.contains(&mob));
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = EntityRegistry::new();
        let a = registry.allocate(1, 1, monster(1)).unwrap();
        let b = registry.allocate(1, 1, monster(2)).unwrap();

        assert!(registry.release(1, 1, a).is_some());
        assert!(registry.release(1, 1, a).is_none());
        assert!(registry.release(1, 1, 12_345).is_none());
        assert!(registry.release(9, 9, a).is_none());

        assert_eq!(registry.lookup(1, 1, b), Some(monster(2)));
        assert_eq!(registry.len(1, 1), 1);
    }

    #[test]
    fn test_handles_unique_under_churn() {
        let registry = EntityRegistry::new();
        let mut live: Vec<u16> = Vec::new();
        for n in 0..3_000u32 {
            let handle = registry.allocate(1, 1, monster(n)).unwrap();
            live.push(handle);
            if n % 3 == 0 {
                let victim = live.remove((n as usize * 7) % live.len());
                registry.release(1, 1, victim);
            }
            let unique: HashSet<u16> = live.iter().copied().collect();
            assert_eq!(unique.len(), live.len());
        }
        for handle in &live {
            assert!(registry.lookup(1, 1, *handle).is_some());
        }
    }

    #[test]
    fn test_exhaustion_fails_cleanly() {
        let registry = EntityRegistry::new();
        let width = MONSTER_HANDLES.len() as u32;
        for n in 0..width {
            registry.allocate(3, 4, monster(n)).unwrap();
        }
        let err = registry.allocate(3, 4, monster(width)).unwrap_err();
        assert!(matches!(err, SimError::HandlesExhausted { kind: EntityKind::Monster, server: 3, map: 4 }));

        // nothing was overwritten
        let bound: HashSet<u32> = registry.entities(3, 4).into_iter().map(|(_, d)| d.1).collect();
        assert_eq!(bound.len(), width as usize);
        assert!(!bound.contains(&width));

        // a release makes exactly one slot available again
        registry.release(3, 4, MONSTER_HANDLES.start + 17);
        assert_eq!(registry.allocate(3, 4, monster(width)).unwrap(), MONSTER_HANDLES.start + 17);
        assert!(registry.allocate(3, 4, monster(width + 1)).is_err());
    }

    #[test]
    fn test_release_partition() {
        let registry = EntityRegistry::new();
        for n in 0..5 {
            registry.allocate(1, 300, monster(n)).unwrap();
        }
        let keep = registry.allocate(1, 1, monster(99)).unwrap();
        assert_eq!(registry.release_partition(1, 300).len(), 5);
        assert!(registry.is_empty(1, 300));
        assert!(registry.release_partition(1, 300).is_empty());
        assert!(registry.lookup(1, 1, keep).is_some());
    }

    #[test]
    fn test_concurrent_allocations_are_unique() {
        let registry = Arc::new(EntityRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..500)
                        .map(|n| registry.allocate(1, 1, monster(t * 1000 + n)).unwrap())
                        .collect::<Vec<u16>>()
                })
            })
            .collect();
        let mut all = HashSet::new();
        for thread in threads {
            for handle in thread.join().unwrap() {
                assert!(all.insert(handle), "handle {} handed out twice", handle);
            }
        }
        assert_eq!(registry.len(1, 1), 4000);
    }
}
