//! The resident-region cache, sole owner of region records.

use std::sync::{Arc, Mutex};

use glam::IVec2;
use indexmap::IndexMap;

use crate::region::RegionRecord;


/// Maps region positions to resident records, creates placeholders and is the handle
/// through which the scheduler and the generator fetch neighboring regions.
///
/// Insertion order is kept so periodic flushes walk regions deterministically.
pub struct RegionDirectory {
    /// Resident records, keyed by region position.
    records: Mutex<IndexMap<(i32, i32), Arc<RegionRecord>>>,
}

impl RegionDirectory {

    pub fn new() -> Self {
        Self { records: Mutex::new(IndexMap::new()) }
    }

    /// Get the resident record for the given region position, if any.
    pub fn get(&self, pos: IVec2) -> Option<Arc<RegionRecord>> {
        let records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        records.get(&(pos.x, pos.y)).cloned()
    }

    /// Get the resident record for the given region position, creating an unloaded
    /// placeholder if the region is not resident. The placeholder is not loaded, it
    /// only exists so deferred structures and actions can be queued on it.
    pub fn get_or_create(&self, pos: IVec2) -> Arc<RegionRecord> {
        let mut records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        Arc::clone(records.entry((pos.x, pos.y)).or_insert_with(|| RegionRecord::new(pos)))
    }

    /// Remove the record for the given region position from the cache, returning it
    /// if it was resident. Deciding when to evict is a cache-policy decision of the
    /// caller, the directory only forgets the record.
    pub fn evict(&self, pos: IVec2) -> Option<Arc<RegionRecord>> {
        let mut records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        records.shift_remove(&(pos.x, pos.y))
    }

    /// Number of resident records.
    pub fn len(&self) -> usize {
        let records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every resident record, in insertion order. Used by the simulation
    /// loop to flush pending saves once per tick.
    pub fn records(&self) -> Vec<Arc<RegionRecord>> {
        let records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        records.values().cloned().collect()
    }

}

impl Default for RegionDirectory {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn placeholder_identity() {

        let directory = RegionDirectory::new();
        assert!(directory.get(IVec2::new(0, 0)).is_none());

        let first = directory.get_or_create(IVec2::new(0, 0));
        let second = directory.get_or_create(IVec2::new(0, 0));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.loaded());

        assert_eq!(directory.len(), 1);

    }

    #[test]
    fn evict_forgets() {

        let directory = RegionDirectory::new();
        directory.get_or_create(IVec2::new(3, -1));

        assert!(directory.evict(IVec2::new(3, -1)).is_some());
        assert!(directory.get(IVec2::new(3, -1)).is_none());
        assert!(directory.evict(IVec2::new(3, -1)).is_none());
        assert!(directory.is_empty());

    }

    #[test]
    fn records_in_insertion_order() {

        let directory = RegionDirectory::new();
        directory.get_or_create(IVec2::new(1, 0));
        directory.get_or_create(IVec2::new(0, 0));
        directory.get_or_create(IVec2::new(-1, 5));

        let order: Vec<_> = directory.records().iter().map(|r| r.pos()).collect();
        assert_eq!(order, [IVec2::new(1, 0), IVec2::new(0, 0), IVec2::new(-1, 5)]);

    }

}
