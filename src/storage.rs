//! A thread-based persistence scheduler for region loading, generation and saving.
//!
//! The scheduler enforces single-flight semantics per region and per operation kind:
//! at most one load and at most one save task are in flight for a region at any
//! instant (a load and a save may overlap each other, but never themselves). Work
//! runs on a bounded pool of storage workers, the simulation thread never blocks on
//! I/O unless it explicitly chooses a synchronous variant. Generation runs inline on
//! whichever thread performed the load.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use glam::IVec2;
use tracing::{debug, error, warn};

use crate::config;
use crate::directory::RegionDirectory;
use crate::r#gen::{ActionTable, GeneratorHost, RegionGenerator, StructureTable};
use crate::region::{QueuedStructure, RegionRecord};
use crate::serde::section::{self, SectionCodec, SectionError};
use crate::serde::store::{RegionStore, StoreError};
use crate::serde::tag::TagCompound;


/// This structure is a handle around the region persistence workers.
pub struct PersistenceScheduler {
    /// State shared with the workers.
    inner: Arc<SchedulerInner>,
    /// Task sender to the workers.
    task_sender: Sender<Task>,
    /// Handles of the worker threads, joined on shutdown.
    workers: Vec<JoinHandle<()>>,
}

/// State shared between the scheduler handle and its workers.
struct SchedulerInner {
    /// The on-disk region store.
    store: RegionStore,
    /// Section codecs, invoked in registration order for both read and write.
    codecs: Vec<Box<dyn SectionCodec>>,
    /// The resident-region cache, sole owner of the records.
    directory: Arc<RegionDirectory>,
    /// The shared generator.
    generator: Arc<dyn RegionGenerator>,
    /// Structure replay handlers.
    structures: Arc<StructureTable>,
    /// Action replay handlers.
    actions: Arc<ActionTable>,
    /// The world's logical age counter, ticked by the simulation.
    age: Arc<AtomicI64>,
    /// Cooperative shutdown flag, checked at load task start. Queued loads become
    /// no-ops, queued and in-flight saves are allowed to complete.
    cancelled: AtomicBool,
}

/// A task submitted to the storage workers.
enum Task {
    Load { pos: IVec2, generate: bool },
    Save { pos: IVec2 },
}

impl PersistenceScheduler {

    /// Create a new scheduler with the canonical codec composition, backed by the
    /// worker count of [`config::worker_count`].
    pub fn new(
        region_dir: impl Into<PathBuf>,
        directory: Arc<RegionDirectory>,
        generator: Arc<dyn RegionGenerator>,
        structures: Arc<StructureTable>,
        actions: Arc<ActionTable>,
        age: Arc<AtomicI64>,
    ) -> Self {
        Self::with_codecs(region_dir, section::default_codecs(),
            directory, generator, structures, actions, age)
    }

    /// Create a new scheduler with an explicit codec composition.
    pub fn with_codecs(
        region_dir: impl Into<PathBuf>,
        codecs: Vec<Box<dyn SectionCodec>>,
        directory: Arc<RegionDirectory>,
        generator: Arc<dyn RegionGenerator>,
        structures: Arc<StructureTable>,
        actions: Arc<ActionTable>,
        age: Arc<AtomicI64>,
    ) -> Self {

        let (task_sender, task_receiver) = bounded(1024);

        let inner = Arc::new(SchedulerInner {
            store: RegionStore::new(region_dir),
            codecs,
            directory,
            generator,
            structures,
            actions,
            age,
            cancelled: AtomicBool::new(false),
        });

        let workers = (0..config::worker_count())
            .map(|i| {
                let worker_inner = Arc::clone(&inner);
                let task_receiver: Receiver<Task> = task_receiver.clone();
                thread::Builder::new()
                    .name(format!("Region Storage Worker #{i}"))
                    .spawn(move || {
                        while let Ok(task) = task_receiver.recv() {
                            worker_inner.run_task(task);
                        }
                    })
                    .unwrap()
            })
            .collect();

        Self {
            inner,
            task_sender,
            workers,
        }

    }

    /// The resident-region cache this scheduler works against.
    pub fn directory(&self) -> &Arc<RegionDirectory> {
        &self.inner.directory
    }

    /// Request loading of a region, fire-and-forget. No-op if the region is already
    /// loaded or a load is already in flight.
    pub fn request_load(&self, pos: IVec2) {
        if self.inner.claim_load(pos).is_some() {
            self.send(Task::Load { pos, generate: false });
        }
    }

    /// Load a region on the calling thread. Same claim logic as [`Self::request_load`]
    /// but without waiting on pool scheduling, used by callers that need the region
    /// immediately, like a generator fetching a neighbor.
    pub fn load_sync(&self, pos: IVec2) {
        if self.inner.claim_load(pos).is_some() {
            self.inner.run_load(pos, false);
        }
    }

    /// Request loading of a region followed by its terrain synthesis. If the region
    /// is already loaded, generation is invoked directly on the calling thread, still
    /// running at most once per region.
    pub fn request_load_and_generate(&self, pos: IVec2) {
        let record = self.inner.directory.get_or_create(pos);
        if record.loaded() {
            self.inner.run_generate(&record);
        } else if record.try_claim_loading() {
            self.send(Task::Load { pos, generate: true });
        }
    }

    /// Load and generate a region on the calling thread, same contract as
    /// [`Self::request_load_and_generate`] invoked off the async path.
    pub fn load_and_generate_sync(&self, pos: IVec2) {
        let record = self.inner.directory.get_or_create(pos);
        if record.loaded() {
            self.inner.run_generate(&record);
        } else if record.try_claim_loading() {
            self.inner.run_load(pos, true);
        }
    }

    /// Request saving of a region, fire-and-forget. No-op if the region is not
    /// loaded. Repeated requests before the save task starts writing collapse into
    /// one write reflecting the latest in-memory state.
    ///
    /// The freshness baseline (dirty flag cleared, age stamped) is established at
    /// request time, not at completion time, matching the read-side expectations of
    /// the simulation.
    pub fn request_save(&self, pos: IVec2) {
        if self.inner.claim_save(pos).is_some() {
            self.send(Task::Save { pos });
        }
    }

    /// Save a region on the calling thread, same claim logic as
    /// [`Self::request_save`].
    pub fn save_sync(&self, pos: IVec2) {
        if self.inner.claim_save(pos).is_some() {
            self.inner.run_save(pos);
        }
    }

    /// Shut the scheduler down: already-queued load tasks become no-ops when they
    /// run, queued and in-flight save tasks are allowed to complete, then worker
    /// threads are joined. Durability is favored over responsiveness here.
    pub fn shutdown(self) {
        let Self { inner, task_sender, workers } = self;
        inner.cancelled.store(true, Ordering::SeqCst);
        // Closing the channel stops the workers once the queue is drained.
        drop(task_sender);
        for worker in workers {
            let _ = worker.join();
        }
    }

    fn send(&self, task: Task) {
        self.task_sender.send(task)
            .expect("worker should not disconnect while this handle exists");
    }

}

impl SchedulerInner {

    fn run_task(&self, task: Task) {
        match task {
            Task::Load { pos, generate } => self.run_load(pos, generate),
            Task::Save { pos } => self.run_save(pos),
        }
    }

    /// Claim the load permit for the given region, creating a placeholder record if
    /// needed. Returns none if the region is already loaded or loading.
    fn claim_load(&self, pos: IVec2) -> Option<Arc<RegionRecord>> {
        let record = self.directory.get_or_create(pos);
        if record.loaded() {
            return None;
        }
        record.try_claim_loading().then_some(record)
    }

    /// Claim a save request for the given region. Returns none if the region is not
    /// resident, not loaded, or a save task is already pending. On success the
    /// freshness baseline is stamped immediately.
    fn claim_save(&self, pos: IVec2) -> Option<Arc<RegionRecord>> {
        let record = self.directory.get(pos)?;
        if !record.loaded() {
            return None;
        }
        if !record.try_claim_pending_save() {
            return None;
        }
        record.stamp_saved(self.age.load(Ordering::Relaxed));
        Some(record)
    }

    /// Execute a load task. The load permit must be held by the caller.
    fn run_load(&self, pos: IVec2, generate: bool) {

        let record = self.directory.get_or_create(pos);

        if self.cancelled.load(Ordering::Relaxed) {
            // The region is left unloaded, an explicit request may retry later.
            debug!("cancelled load of region {}/{}", pos.x, pos.y);
            record.abort_loading();
            return;
        }

        match self.store.read(pos) {
            Ok(Some(root)) => {

                let generated = section::read_generated(&root);
                for codec in &self.codecs {
                    if let Err(err) = codec.read_section(&record, &root, generated) {
                        error!("failed to read section '{}' of region {}/{}: {err}",
                            codec.name(), pos.x, pos.y);
                        record.abort_loading();
                        return;
                    }
                }

                debug!("loaded region {}/{} from storage", pos.x, pos.y);

            }
            Ok(None) => {
                // No backing storage, the region starts fresh.
            }
            Err(err) => {
                error!("failed to read region {}/{}: {err}", pos.x, pos.y);
                record.abort_loading();
                return;
            }
        }

        if generate {
            self.run_generate(&record);
        }

        record.finish_loading();

    }

    /// Run terrain synthesis for the given region if it has not been generated yet,
    /// then drain its deferred queues. The generation permit makes this run at most
    /// once per region even under concurrent requests.
    fn run_generate(&self, record: &Arc<RegionRecord>) {

        debug_assert!(record.loaded() || record.is_loading(),
            "generation requested on a record that was never loaded");

        if record.generated() {
            return;
        }
        if !record.try_claim_generating() {
            return;
        }
        if record.generated() {
            // Lost the race against another generation between check and claim.
            record.clear_generating();
            return;
        }

        let pos = record.pos();
        debug!("generating region {}/{}", pos.x, pos.y);

        self.generator.generate(record, &SchedulerHost { inner: self });
        record.mark_generated();
        self.drain_queues(record);

        // Freshly synthesized content is not on disk yet.
        record.mark_unsaved();
        record.clear_generating();

    }

    /// Drain the deferred queues of a freshly generated region, applying each entry
    /// and clearing the lists. Called exactly once per region, immediately after its
    /// generation completes.
    fn drain_queues(&self, record: &Arc<RegionRecord>) {

        let (structures, actions) = record.content().take_queues();
        if structures.is_empty() && actions.is_empty() {
            return;
        }

        let pos = record.pos();
        debug!("draining {} queued structures and {} queued actions in region {}/{}",
            structures.len(), actions.len(), pos.x, pos.y);

        for queued in &structures {
            self.apply_structure(record, queued);
        }

        for queued in &actions {
            match self.actions.get(&queued.kind) {
                Some(func) => {
                    if let Err(err) = func(record, &queued.data) {
                        warn!("skipping queued action '{}' in region {}/{}: {err}",
                            queued.kind, pos.x, pos.y);
                    }
                }
                None => {
                    warn!("skipping queued action '{}' in region {}/{}: no handler",
                        queued.kind, pos.x, pos.y);
                }
            }
        }

    }

    /// Apply a single structure part to a region through the structure table. A
    /// failing or unknown entry is skipped with a warning, never aborting the rest
    /// of the region's generation.
    fn apply_structure(&self, record: &RegionRecord, queued: &QueuedStructure) {
        let pos = record.pos();
        match self.structures.get(&queued.kind) {
            Some(func) => {
                if let Err(err) = func(record, queued) {
                    warn!("skipping queued structure '{}' in region {}/{}: {err}",
                        queued.kind, pos.x, pos.y);
                }
            }
            None => {
                warn!("skipping queued structure '{}' in region {}/{}: no handler",
                    queued.kind, pos.x, pos.y);
            }
        }
    }

    /// Execute a save task. The write happens outside the record's mutex except for
    /// the brief copies made by each codec, so the generator or another load does
    /// not block on unrelated region state.
    fn run_save(&self, pos: IVec2) {

        let Some(record) = self.directory.get(pos) else {
            // Evicted between the request and the task run, nothing to write from.
            return;
        };

        // From this point on a new save request may queue a fresh task.
        record.clear_pending_save();

        if !record.try_claim_saving() {
            // Another save task is currently writing this region.
            return;
        }

        let generated = record.generated();
        let mut root = TagCompound::new();

        let mut result: Result<(), StorageError> = Ok(());
        for codec in &self.codecs {
            if let Err(err) = codec.write_section(&record, &mut root, generated) {
                result = Err(StorageError::Section(err));
                break;
            }
        }

        let result = result.and_then(|()| {
            self.store.write(pos, &root).map_err(StorageError::Store)
        });

        match result {
            Ok(()) => debug!("saved region {}/{}", pos.x, pos.y),
            Err(err) => {
                error!("failed to save region {}/{}: {err}", pos.x, pos.y);
                // A failed save must not be mistaken for a successful one, re-raise
                // the dirty flag so a later save is retried.
                record.raise_unsaved();
            }
        }

        record.clear_saving();

    }

}


/// Narrow view of the scheduler given to a running generator.
struct SchedulerHost<'a> {
    inner: &'a SchedulerInner,
}

impl GeneratorHost for SchedulerHost<'_> {

    fn directory(&self) -> &RegionDirectory {
        &self.inner.directory
    }

    fn load_region(&self, pos: IVec2) {
        if self.inner.claim_load(pos).is_some() {
            self.inner.run_load(pos, false);
        }
    }

    fn apply_or_queue_structure(&self, pos: IVec2, queued: QueuedStructure) {

        let record = self.inner.directory.get_or_create(pos);

        {
            // Checking the generated flag under the content mutex closes the race
            // against a concurrent drain: the drain acquires the same mutex after
            // the flag is published, so an entry pushed here is always seen by it.
            let mut content = record.content();
            if !record.generated() {
                content.push_structure(queued);
                return;
            }
        }

        // The target region is already generated, its drain has or will run without
        // this entry, apply the part directly.
        self.inner.apply_structure(&record, &queued);

    }

}


/// Error type for a failed load or save task, handled locally by the scheduler.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("section: {0}")]
    Section(#[from] SectionError),
}


#[cfg(test)]
mod tests {

    use std::sync::atomic::AtomicUsize;

    use crate::r#gen::ApplyError;
    use crate::slice::{REGION_SIZE, REGION_TILES, SLICE_SIZE};
    use crate::serde::tag::Tag;

    use super::*;

    const HOME: IVec2 = IVec2::new(0, 0);
    const EAST: IVec2 = IVec2::new(1, 0);

    /// Tile written by the obelisk structure for a given placement seed.
    fn obelisk_tile(seed: i64) -> u16 {
        (seed as u16) | 0x8000
    }

    fn place_obelisk(record: &RegionRecord, queued: &QueuedStructure) -> Result<(), ApplyError> {

        let pos = queued.anchor_slice * SLICE_SIZE as i32 + queued.anchor_tile + queued.offset;
        if pos.x < 0 || pos.y < 0 || pos.x >= REGION_TILES as i32 || pos.y >= REGION_TILES as i32 {
            return Err(ApplyError::OutOfBounds);
        }

        record.content().set_tile(pos, obelisk_tile(queued.seed));
        Ok(())

    }

    fn apply_set_tile(record: &RegionRecord, data: &TagCompound) -> Result<(), ApplyError> {
        let x = data.get_int("x").ok_or(ApplyError::Key("x"))?;
        let y = data.get_int("y").ok_or(ApplyError::Key("y"))?;
        let tile = data.get_int("tile").ok_or(ApplyError::Key("tile"))? as u16;
        record.content().set_tile(IVec2::new(x, y), tile);
        Ok(())
    }

    /// Test generator: fills every slice with a marker tile, and for the home region
    /// places an obelisk whose footprint overflows into the east neighbor.
    struct FlatGenerator {
        calls: AtomicUsize,
        overflow: bool,
    }

    impl FlatGenerator {
        fn new(overflow: bool) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), overflow })
        }
    }

    impl RegionGenerator for FlatGenerator {

        fn generate(&self, region: &Arc<RegionRecord>, host: &dyn GeneratorHost) {

            self.calls.fetch_add(1, Ordering::SeqCst);

            {
                let mut content = region.content();
                for sy in 0..REGION_SIZE as i32 {
                    for sx in 0..REGION_SIZE as i32 {
                        let slice = content.ensure_slice(IVec2::new(sx, sy));
                        slice.set_tile(IVec2::new(0, 0), 1);
                    }
                }
            }

            if self.overflow && region.pos() == HOME {

                // Home part of the obelisk, at the east edge of the region.
                let home_part = QueuedStructure {
                    kind: "obelisk".to_string(),
                    anchor_slice: IVec2::new(7, 3),
                    anchor_tile: IVec2::new(31, 4),
                    offset: IVec2::ZERO,
                    seed: 7,
                };
                place_obelisk(region, &home_part).unwrap();

                // Overflowing part, one tile further east, in the neighbor.
                let east_part = QueuedStructure {
                    kind: "obelisk".to_string(),
                    anchor_slice: IVec2::new(0, 3),
                    anchor_tile: IVec2::new(0, 4),
                    offset: IVec2::ZERO,
                    seed: 7,
                };
                host.apply_or_queue_structure(EAST, east_part);

            }

        }

    }

    fn scheduler(
        dir: impl Into<PathBuf>,
        generator: Arc<FlatGenerator>,
    ) -> PersistenceScheduler {
        PersistenceScheduler::new(
            dir,
            Arc::new(RegionDirectory::new()),
            generator,
            Arc::new(StructureTable::new().with("obelisk", place_obelisk)),
            Arc::new(ActionTable::new().with("set_tile", apply_set_tile)),
            Arc::new(AtomicI64::new(0)),
        )
    }

    #[test]
    fn fresh_region_generates_once() {

        let dir = tempfile::tempdir().unwrap();
        let generator = FlatGenerator::new(false);
        let sched = scheduler(dir.path(), Arc::clone(&generator));

        sched.request_load_and_generate(HOME);
        let record = sched.directory().get(HOME).unwrap();
        record.wait_loaded();

        assert!(record.loaded());
        assert!(record.generated());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        {
            let content = record.content();
            for sy in 0..REGION_SIZE as i32 {
                for sx in 0..REGION_SIZE as i32 {
                    assert!(content.slice(IVec2::new(sx, sy)).is_some());
                }
            }
            assert!(content.queued_structures().is_empty());
            assert!(content.queued_actions().is_empty());
        }

        // Generation leaves the region dirty, nothing was written to disk yet.
        assert!(record.unsaved_changes());

        // Repeated requests never generate twice.
        sched.request_load_and_generate(HOME);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        sched.shutdown();

    }

    #[test]
    fn concurrent_generate_requests_collapse() {

        let dir = tempfile::tempdir().unwrap();
        let generator = FlatGenerator::new(false);
        let sched = scheduler(dir.path(), Arc::clone(&generator));

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| sched.request_load_and_generate(HOME));
            }
        });

        let record = sched.directory().get(HOME).unwrap();
        record.wait_loaded();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        sched.shutdown();

    }

    #[test]
    fn overflow_structure_drains_once() {

        let dir = tempfile::tempdir().unwrap();
        let generator = FlatGenerator::new(true);
        let sched = scheduler(dir.path(), Arc::clone(&generator));

        sched.load_and_generate_sync(HOME);

        let home = sched.directory().get(HOME).unwrap();
        assert_eq!(home.content().tile(IVec2::new(255, 100)), obelisk_tile(7));

        // The east neighbor exists as an unloaded placeholder carrying the overflow.
        let east = sched.directory().get(EAST).unwrap();
        assert!(!east.loaded());
        assert_eq!(east.content().queued_structures().len(), 1);

        // Generating the neighbor drains the queue and applies the missing part.
        sched.load_and_generate_sync(EAST);
        assert_eq!(east.content().tile(IVec2::new(0, 100)), obelisk_tile(7));
        assert!(east.content().queued_structures().is_empty());

        // A second drain finds nothing to re-apply.
        let (structures, actions) = east.content().take_queues();
        assert!(structures.is_empty() && actions.is_empty());

        sched.shutdown();

    }

    #[test]
    fn overflow_into_already_generated_neighbor() {

        // Same structure, but the neighbor is generated before the home region, the
        // overflowing part must be applied directly instead of queued.
        let dir = tempfile::tempdir().unwrap();
        let generator = FlatGenerator::new(true);
        let sched = scheduler(dir.path(), Arc::clone(&generator));

        sched.load_and_generate_sync(EAST);
        sched.load_and_generate_sync(HOME);

        let east = sched.directory().get(EAST).unwrap();
        assert_eq!(east.content().tile(IVec2::new(0, 100)), obelisk_tile(7));
        assert!(east.content().queued_structures().is_empty());

        sched.shutdown();

    }

    #[test]
    fn queued_structure_survives_save_and_reload() {

        let dir = tempfile::tempdir().unwrap();

        {
            let generator = FlatGenerator::new(true);
            let sched = scheduler(dir.path(), Arc::clone(&generator));

            sched.load_and_generate_sync(HOME);
            sched.save_sync(HOME);

            // The neighbor placeholder is ungenerated, saving it persists the
            // not-yet-applied tail of its structure queue.
            sched.load_sync(EAST);
            sched.save_sync(EAST);

            sched.shutdown();
        }

        // Fresh scheduler and directory over the same storage.
        let generator = FlatGenerator::new(true);
        let sched = scheduler(dir.path(), Arc::clone(&generator));

        sched.load_sync(HOME);
        let home = sched.directory().get(HOME).unwrap();
        assert!(home.generated());
        assert_eq!(home.content().tile(IVec2::new(255, 100)), obelisk_tile(7));
        // Loaded from storage, not re-generated.
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

        sched.load_and_generate_sync(EAST);
        let east = sched.directory().get(EAST).unwrap();
        assert_eq!(east.content().tile(IVec2::new(0, 100)), obelisk_tile(7));
        assert!(east.content().queued_structures().is_empty());

        sched.shutdown();

    }

    #[test]
    fn queued_action_applied_after_generation() {

        let dir = tempfile::tempdir().unwrap();
        let generator = FlatGenerator::new(false);
        let sched = scheduler(dir.path(), Arc::clone(&generator));

        let record = sched.directory().get_or_create(HOME);
        let mut data = TagCompound::new();
        data.insert("x", Tag::Int(10));
        data.insert("y", Tag::Int(20));
        data.insert("tile", Tag::Int(77));
        record.enqueue_action(crate::region::QueuedAction {
            kind: "set_tile".to_string(),
            data,
        });

        sched.load_and_generate_sync(HOME);

        assert_eq!(record.content().tile(IVec2::new(10, 20)), 77);
        assert!(record.content().queued_actions().is_empty());

        sched.shutdown();

    }

    #[test]
    fn save_stamps_at_request_time() {

        // The original design clears the dirty flag and stamps the age when the save
        // is *requested*, not when it completes. Whether that is intentional is an
        // open question, this test pins the externally observable timing.
        let dir = tempfile::tempdir().unwrap();
        let generator = FlatGenerator::new(false);

        let directory = Arc::new(RegionDirectory::new());
        let age = Arc::new(AtomicI64::new(42));
        let sched = PersistenceScheduler::new(
            dir.path(),
            Arc::clone(&directory),
            generator,
            Arc::new(StructureTable::new()),
            Arc::new(ActionTable::new()),
            Arc::clone(&age),
        );

        sched.load_and_generate_sync(HOME);
        let record = directory.get(HOME).unwrap();
        assert!(record.unsaved_changes());

        sched.request_save(HOME);
        assert!(!record.unsaved_changes());
        assert_eq!(record.last_saved_at_age(), 42);

        // A save for an unloaded region is a no-op.
        sched.request_save(IVec2::new(9, 9));
        assert!(directory.get(IVec2::new(9, 9)).is_none());

        sched.shutdown();
        assert!(sched_file_exists(dir.path(), HOME));

    }

    fn sched_file_exists(dir: &std::path::Path, pos: IVec2) -> bool {
        RegionStore::new(dir).exists(pos)
    }

    #[test]
    fn repeated_save_requests_collapse() {

        let dir = tempfile::tempdir().unwrap();
        let generator = FlatGenerator::new(false);
        let sched = scheduler(dir.path(), Arc::clone(&generator));

        sched.load_and_generate_sync(HOME);
        let record = sched.directory().get(HOME).unwrap();

        // Claim the pending-save marker the way the first request does, a second
        // request must then collapse into a no-op.
        assert!(sched.inner.claim_save(HOME).is_some());
        assert!(sched.inner.claim_save(HOME).is_none());

        // Once the save task has started writing, a fresh request claims again.
        sched.inner.run_save(HOME);
        assert!(sched.inner.claim_save(HOME).is_some());
        sched.inner.run_save(HOME);

        assert!(sched_file_exists(dir.path(), HOME));
        assert!(!record.unsaved_changes());

        sched.shutdown();

    }

    #[test]
    fn shutdown_cancels_queued_loads_but_finishes_saves() {

        let dir = tempfile::tempdir().unwrap();
        let generator = FlatGenerator::new(false);
        let sched = scheduler(dir.path(), Arc::clone(&generator));

        // A region loaded and generated before shutdown begins.
        sched.load_and_generate_sync(IVec2::new(3, 0));

        sched.inner.cancelled.store(true, Ordering::SeqCst);

        // A load task that was queued but had not started becomes a no-op.
        let record = sched.directory().get_or_create(IVec2::new(2, 0));
        assert!(record.try_claim_loading());
        sched.inner.run_load(IVec2::new(2, 0), false);
        assert!(!record.loaded());

        // A save task already queued still completes and persists.
        assert!(sched.inner.claim_save(IVec2::new(3, 0)).is_some());
        sched.inner.run_save(IVec2::new(3, 0));
        assert!(sched_file_exists(dir.path(), IVec2::new(3, 0)));

        sched.shutdown();

    }

    #[test]
    fn failed_save_raises_dirty_flag() {

        let dir = tempfile::tempdir().unwrap();
        let region_dir = dir.path().join("region");

        let generator = FlatGenerator::new(false);
        let sched = scheduler(&region_dir, Arc::clone(&generator));

        sched.load_and_generate_sync(HOME);
        let record = sched.directory().get(HOME).unwrap();

        // Plant a regular file at the store's directory path, the write must fail.
        std::fs::write(&region_dir, b"").unwrap();
        sched.save_sync(HOME);

        // The stamp was optimistic, the failure re-raises the dirty flag so the
        // save is retried later.
        assert!(record.unsaved_changes());

        sched.shutdown();

    }

    #[test]
    fn concurrent_load_storm_single_flight() {

        let dir = tempfile::tempdir().unwrap();
        let generator = FlatGenerator::new(false);
        let sched = scheduler(dir.path(), Arc::clone(&generator));

        for i in 0..4 {
            let pos = IVec2::new(i, i);
            thread::scope(|scope| {
                for _ in 0..8 {
                    scope.spawn(|| sched.request_load_and_generate(pos));
                }
            });
        }

        for i in 0..4 {
            let record = sched.directory().get(IVec2::new(i, i)).unwrap();
            record.wait_loaded();
            assert!(record.generated());
        }

        // One generation per region, no matter how many requests raced.
        assert_eq!(generator.calls.load(Ordering::SeqCst), 4);

        sched.shutdown();

    }

}
