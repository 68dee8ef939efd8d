use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Opaque socket identifier: slot index in the low half, generation tag in
/// the high half. Generations start at 1, so no live handle is ever zero,
/// and a handle that survived its socket can never resolve to the slot's
/// next occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    pub(crate) fn index(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }

    pub(crate) fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct TableEntry<T> {
    generation: u32,
    record: Option<Arc<T>>,
}

/// Fixed-capacity map from handles to shared records.
///
/// Lookup clones the `Arc`, so the strong count doubles as the record
/// refcount: `remove` retires the handle and drops the table's reference,
/// and whoever holds the last clone runs teardown.
pub(crate) struct HandleTable<T> {
    inner: Mutex<TableInner<T>>,
}

struct TableInner<T> {
    entries: Vec<TableEntry<T>>,
    free: Vec<u32>,
}

impl<T> HandleTable<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let entries =
            (0..capacity).map(|_| TableEntry { generation: 1, record: None }).collect();
        let free = (0..capacity as u32).rev().collect();
        Self { inner: Mutex::new(TableInner { entries, free }) }
    }

    /// Reserve a slot and store the record `make` builds for its handle.
    /// `None` when the table is at capacity.
    pub(crate) fn insert(
        &self,
        make: impl FnOnce(Handle) -> Arc<T>,
    ) -> Option<(Handle, Arc<T>)> {
        let mut inner = self.lock();
        let index = inner.free.pop()?;
        let handle = Handle::new(index, inner.entries[index as usize].generation);
        let record = make(handle);
        inner.entries[index as usize].record = Some(Arc::clone(&record));
        Some((handle, record))
    }

    pub(crate) fn lookup(&self, handle: Handle) -> Option<Arc<T>> {
        let inner = self.lock();
        let entry = inner.entries.get(handle.index())?;
        if entry.generation != handle.generation() {
            return None;
        }
        entry.record.clone()
    }

    /// Retire the handle and drop the table's reference. The second call
    /// for the same handle is a no-op.
    pub(crate) fn remove(&self, handle: Handle) -> Option<Arc<T>> {
        let mut inner = self.lock();
        let index = handle.index();
        let entry = inner.entries.get_mut(index)?;
        if entry.generation != handle.generation() {
            return None;
        }
        let record = entry.record.take()?;
        entry.generation = entry.generation.wrapping_add(1).max(1);
        inner.free.push(index as u32);
        Some(record)
    }

    fn lock(&self) -> MutexGuard<'_, TableInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(capacity: usize) -> HandleTable<u32> {
        HandleTable::new(capacity)
    }

    #[test]
    fn lookup_after_remove_misses() {
        let t = table(4);
        let (handle, _) = t.insert(|_| Arc::new(7)).unwrap();
        assert_eq!(t.lookup(handle).as_deref(), Some(&7));
        assert!(t.remove(handle).is_some());
        assert!(t.lookup(handle).is_none());
        assert!(t.remove(handle).is_none());
    }

    #[test]
    fn reused_slot_gets_fresh_generation() {
        let t = table(1);
        let (old, _) = t.insert(|_| Arc::new(1)).unwrap();
        t.remove(old);
        let (new, _) = t.insert(|_| Arc::new(2)).unwrap();
        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert!(t.lookup(old).is_none());
        assert_eq!(t.lookup(new).as_deref(), Some(&2));
    }

    #[test]
    fn capacity_is_hard() {
        let t = table(2);
        let (a, _) = t.insert(|_| Arc::new(0)).unwrap();
        let _b = t.insert(|_| Arc::new(0)).unwrap();
        assert!(t.insert(|_| Arc::new(0)).is_none());
        t.remove(a);
        assert!(t.insert(|_| Arc::new(0)).is_some());
    }

    #[test]
    fn record_outlives_removal_through_clones() {
        let t = table(1);
        let (handle, held) = t.insert(|_| Arc::new(9)).unwrap();
        t.remove(handle);
        assert_eq!(*held, 9);
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn no_valid_handle_is_zero() {
        let t = table(8);
        let (handle, _) = t.insert(|_| Arc::new(0)).unwrap();
        assert_ne!(handle.raw(), 0);
    }
}
