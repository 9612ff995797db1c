//! In-memory region record with lifecycle flags, dirty tracking and the deferred
//! cross-region queues.
//!
//! Lifecycle flags are claimed through an unsynchronized fast-path read followed by a
//! compare-and-swap, which gives the single-flight guarantee with an explicit memory
//! ordering contract. Slice content and the deferred queues live behind the record's
//! own mutex, regions never contend on a process-wide lock.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use glam::IVec2;

use crate::slice::{calc_slice_pos, Slice, REGION_AREA, REGION_SIZE, REGION_TILES};
use crate::serde::tag::TagCompound;


/// The in-memory representation of one region of the world.
///
/// A record is reachable only through the region directory, which is its sole owner;
/// codecs and generators receive only borrowed access.
pub struct RegionRecord {
    /// Region position, immutable for the record's lifetime.
    pos: IVec2,
    /// True while a load task is in flight for this region.
    loading: AtomicBool,
    /// True while a save task is in flight for this region.
    saving: AtomicBool,
    /// True while a save task is queued but has not started writing yet, repeated
    /// save requests collapse into one write while this is set.
    pending_save: AtomicBool,
    /// True once a load task has completed, gates simulation access to the content.
    loaded: AtomicBool,
    /// True once terrain synthesis has completed, false means slices are absent.
    generated: AtomicBool,
    /// Internal claim making terrain synthesis run at most once.
    generating: AtomicBool,
    /// Dirty tracking against the world's logical age counter.
    unsaved_changes: AtomicBool,
    /// Age at which the last save was requested.
    last_saved_at_age: AtomicI64,
    /// Slice content and deferred queues, guarded by this record's own mutex.
    content: Mutex<RegionContent>,
    /// Notified when a load task completes, paired with the content mutex.
    load_cond: Condvar,
}

impl RegionRecord {

    /// Create a new unloaded placeholder record for the given region position.
    pub fn new(pos: IVec2) -> Arc<Self> {
        Arc::new(Self {
            pos,
            loading: AtomicBool::new(false),
            saving: AtomicBool::new(false),
            pending_save: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            generated: AtomicBool::new(false),
            generating: AtomicBool::new(false),
            unsaved_changes: AtomicBool::new(false),
            last_saved_at_age: AtomicI64::new(0),
            content: Mutex::new(RegionContent::new()),
            load_cond: Condvar::new(),
        })
    }

    /// Region position of this record.
    #[inline]
    pub fn pos(&self) -> IVec2 {
        self.pos
    }

    /// Return true once a load task has completed for this region. Simulation code
    /// must not touch the content before this is observed true.
    #[inline]
    pub fn loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Return true once terrain synthesis has completed for this region. Slices must
    /// not be assumed populated before this is observed true.
    #[inline]
    pub fn generated(&self) -> bool {
        self.generated.load(Ordering::Acquire)
    }

    /// Access the slice content and deferred queues of this region.
    pub fn content(&self) -> MutexGuard<'_, RegionContent> {
        self.content.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Block the calling thread until a load task completes for this region. Must not
    /// be called from the thread currently executing that load task.
    pub fn wait_loaded(&self) {
        let mut guard = self.content.lock().unwrap_or_else(|err| err.into_inner());
        while !self.loaded() {
            guard = self.load_cond.wait(guard).unwrap_or_else(|err| err.into_inner());
        }
    }

    /// Single-flight claim: unsynchronized fast-path read, then compare-and-swap.
    #[inline]
    fn try_claim(flag: &AtomicBool) -> bool {
        if flag.load(Ordering::Relaxed) {
            return false;
        }
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Claim the load permit, returning false if a load is already in flight.
    pub(crate) fn try_claim_loading(&self) -> bool {
        Self::try_claim(&self.loading)
    }

    /// Return true while a load task is in flight for this region.
    pub(crate) fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    /// Complete a load: publish the loaded flag, wake waiters, release the permit.
    pub(crate) fn finish_loading(&self) {
        let _guard = self.content.lock().unwrap_or_else(|err| err.into_inner());
        self.loaded.store(true, Ordering::Release);
        self.load_cond.notify_all();
        self.loading.store(false, Ordering::Release);
    }

    /// Abort a load, leaving the record unloaded so an explicit request can retry.
    pub(crate) fn abort_loading(&self) {
        self.loading.store(false, Ordering::Release);
    }

    /// Claim the save permit, returning false if a save is already in flight.
    pub(crate) fn try_claim_saving(&self) -> bool {
        Self::try_claim(&self.saving)
    }

    pub(crate) fn clear_saving(&self) {
        self.saving.store(false, Ordering::Release);
    }

    /// Claim the pending-save marker, returning false if a save task is already
    /// queued and has not started writing yet.
    pub(crate) fn try_claim_pending_save(&self) -> bool {
        Self::try_claim(&self.pending_save)
    }

    pub(crate) fn clear_pending_save(&self) {
        self.pending_save.store(false, Ordering::Release);
    }

    /// Claim the generation permit, making terrain synthesis run at most once.
    pub(crate) fn try_claim_generating(&self) -> bool {
        Self::try_claim(&self.generating)
    }

    pub(crate) fn clear_generating(&self) {
        self.generating.store(false, Ordering::Release);
    }

    /// Publish the generated flag. All slices must be populated beforehand.
    pub(crate) fn mark_generated(&self) {

        #[cfg(debug_assertions)] {
            let content = self.content();
            debug_assert!(content.slices.iter().all(Option::is_some),
                "all slices should be populated before marking the region generated");
        }

        self.generated.store(true, Ordering::Release);

    }

    /// Mark this region as carrying in-memory changes not yet requested for save.
    pub fn mark_unsaved(&self) {
        self.unsaved_changes.store(true, Ordering::Release);
    }

    /// Return true if this region carries changes not yet requested for save.
    pub fn unsaved_changes(&self) -> bool {
        self.unsaved_changes.load(Ordering::Acquire)
    }

    /// Age at which the last save was requested for this region.
    pub fn last_saved_at_age(&self) -> i64 {
        self.last_saved_at_age.load(Ordering::Acquire)
    }

    /// Establish the freshness baseline for a save. This happens when the save is
    /// requested, not when it completes, so the read side observes the same timing
    /// as before even if the write is still in flight.
    pub(crate) fn stamp_saved(&self, age: i64) {
        self.unsaved_changes.store(false, Ordering::Release);
        self.last_saved_at_age.store(age, Ordering::Release);
    }

    /// Re-raise the dirty flag after a failed save so a later save is retried.
    pub(crate) fn raise_unsaved(&self) {
        self.unsaved_changes.store(true, Ordering::Release);
    }

    /// Append a deferred structure to this region, to be replayed once the region is
    /// generated. Works whether or not the region has been loaded yet, the list lives
    /// on the in-memory placeholder and is merged with any on-disk entries when the
    /// region is actually loaded.
    pub fn enqueue_structure(&self, queued: QueuedStructure) {
        self.content().queued_structures.push(queued);
    }

    /// Append a deferred action to this region, same contract as structures.
    pub fn enqueue_action(&self, queued: QueuedAction) {
        self.content().queued_actions.push(queued);
    }

}


/// Slice content and deferred queues of a region, guarded by the record's mutex.
pub struct RegionContent {
    /// The slices grid, row-major. A slot is none until the region is generated or
    /// loaded from generated backing storage.
    slices: [Option<Box<Slice>>; REGION_AREA],
    /// Structures whose placement overflowed into this region from a neighbor.
    queued_structures: Vec<QueuedStructure>,
    /// Deferred world-mutation descriptors recorded for replay.
    queued_actions: Vec<QueuedAction>,
}

impl RegionContent {

    fn new() -> Self {
        Self {
            slices: [const { None }; REGION_AREA],
            queued_structures: Vec::new(),
            queued_actions: Vec::new(),
        }
    }

    #[inline]
    fn slice_index(slice_pos: IVec2) -> usize {
        debug_assert!(slice_pos.x >= 0 && (slice_pos.x as usize) < REGION_SIZE);
        debug_assert!(slice_pos.y >= 0 && (slice_pos.y as usize) < REGION_SIZE);
        slice_pos.y as usize * REGION_SIZE + slice_pos.x as usize
    }

    /// Get the slice at the given region-local slice position, none if absent.
    pub fn slice(&self, slice_pos: IVec2) -> Option<&Slice> {
        self.slices[Self::slice_index(slice_pos)].as_deref()
    }

    /// Get the slice at the given region-local slice position, creating an empty one
    /// if absent.
    pub fn ensure_slice(&mut self, slice_pos: IVec2) -> &mut Slice {
        self.slices[Self::slice_index(slice_pos)].get_or_insert_with(Slice::new)
    }

    /// Get the tile id at the given region-local tile position, zero if the owning
    /// slice is absent.
    pub fn tile(&self, pos: IVec2) -> u16 {
        debug_assert!(pos.x >= 0 && (pos.x as usize) < REGION_TILES);
        debug_assert!(pos.y >= 0 && (pos.y as usize) < REGION_TILES);
        match self.slice(calc_slice_pos(pos)) {
            Some(slice) => slice.tile(pos),
            None => 0,
        }
    }

    /// Set the tile id at the given region-local tile position, creating the owning
    /// slice if absent.
    pub fn set_tile(&mut self, pos: IVec2, tile: u16) {
        debug_assert!(pos.x >= 0 && (pos.x as usize) < REGION_TILES);
        debug_assert!(pos.y >= 0 && (pos.y as usize) < REGION_TILES);
        self.ensure_slice(calc_slice_pos(pos)).set_tile(pos, tile);
    }

    /// Structures queued on this region, still waiting for generation to replay them.
    pub fn queued_structures(&self) -> &[QueuedStructure] {
        &self.queued_structures
    }

    /// Actions queued on this region, still waiting for generation to replay them.
    pub fn queued_actions(&self) -> &[QueuedAction] {
        &self.queued_actions
    }

    pub(crate) fn push_structure(&mut self, queued: QueuedStructure) {
        self.queued_structures.push(queued);
    }

    pub(crate) fn push_action(&mut self, queued: QueuedAction) {
        self.queued_actions.push(queued);
    }

    /// Take both deferred queues out of this region, leaving them empty. Called
    /// exactly once, immediately after generation completes.
    pub(crate) fn take_queues(&mut self) -> (Vec<QueuedStructure>, Vec<QueuedAction>) {
        (
            std::mem::take(&mut self.queued_structures),
            std::mem::take(&mut self.queued_actions),
        )
    }

}


/// A structure whose placement overflowed into a region from a neighbor before that
/// region existed. Carries the random seed of the parent placement so the structure
/// renders deterministically when retroactively applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedStructure {
    /// Identifier of the structure type, resolved through the structure table.
    pub kind: String,
    /// Anchor slice position, local to the target region.
    pub anchor_slice: IVec2,
    /// Anchor tile position, local to the anchor slice.
    pub anchor_tile: IVec2,
    /// Placement offset relative to the anchor, in tiles.
    pub offset: IVec2,
    /// Seed of the parent placement.
    pub seed: i64,
}

/// An opaque, serializable world-mutation descriptor recorded against a region that
/// cannot yet apply it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAction {
    /// Identifier of the action, resolved through the action table.
    pub kind: String,
    /// Opaque payload, enough context to re-execute the action.
    pub data: TagCompound,
}
