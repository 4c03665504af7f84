//! Viewport-driven thumbnail loading.
//!
//! The loader owns a flat list of viewport items and a set of currently shown
//! indexes. Visibility changes coalesce through a debouncer into load passes.
//! Each pass works a window of shown indexes plus a margin on both sides:
//! evict outside the window, satisfy the window from cache first (fast,
//! sequential), then generate the misses concurrently. Every pass snapshots an
//! epoch counter up front and re-checks it before any visible mutation, so a
//! newer visibility change preempts stale work instead of racing it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::{ThumbnailGetOptions, ThumbnailSource, ThumbnailStatus};
use crate::debounce::Debouncer;
use crate::fs::VirtualFile;

/// Extra indexes loaded on each side of the shown range.
pub const DEFAULT_MARGIN: usize = 10;

/// One grid cell: a file plus its currently held frames and rotation cursor.
pub struct ViewportItem {
    index: usize,
    file: Arc<dyn VirtualFile>,
    slot: Mutex<ThumbSlot>,
}

#[derive(Default)]
struct ThumbSlot {
    frames: Vec<Vec<u8>>,
    rotation: usize,
}

impl ViewportItem {
    pub fn new(index: usize, file: Arc<dyn VirtualFile>) -> Arc<Self> {
        Arc::new(Self {
            index,
            file,
            slot: Mutex::new(ThumbSlot::default()),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn file(&self) -> &Arc<dyn VirtualFile> {
        &self.file
    }

    fn slot(&self) -> MutexGuard<'_, ThumbSlot> {
        match self.slot.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    pub fn has_thumbnail(&self) -> bool {
        !self.slot().frames.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.slot().frames.len()
    }

    /// The frame the rotation cursor currently points at.
    pub fn current_image(&self) -> Option<Vec<u8>> {
        let slot = self.slot();
        slot.frames.get(slot.rotation).cloned()
    }

    pub fn set_frames(&self, frames: Vec<Vec<u8>>) {
        let mut slot = self.slot();
        slot.frames = frames;
        slot.rotation = 0;
    }

    pub fn clear(&self) {
        let mut slot = self.slot();
        slot.frames.clear();
        slot.rotation = 0;
    }

    /// Moves the rotation cursor to the next frame, wrapping. Returns false
    /// for empty or single-frame slots.
    pub fn advance_rotation(&self) -> bool {
        let mut slot = self.slot();
        if slot.frames.len() < 2 {
            return false;
        }
        slot.rotation = (slot.rotation + 1) % slot.frames.len();
        true
    }
}

/// UI boundary: the loader reports item changes here and nothing else.
pub trait ItemUpdateSink: Send + Sync {
    fn item_updated(&self, index: usize);
}

/// Sink for headless use.
pub struct NullSink;

impl ItemUpdateSink for NullSink {
    fn item_updated(&self, _index: usize) {}
}

#[derive(Clone)]
pub struct LoaderSettings {
    pub margin: usize,
    pub concurrency: usize,
    pub rotation_interval: Duration,
    pub options: ThumbnailGetOptions,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            margin: DEFAULT_MARGIN,
            concurrency: crate::config::DEFAULT_CONCURRENCY,
            rotation_interval: Duration::from_secs(1),
            options: ThumbnailGetOptions::default(),
        }
    }
}

struct LoaderShared {
    items: RwLock<Vec<Arc<ViewportItem>>>,
    shown: Mutex<HashSet<usize>>,
    /// Effective request options: the settings template with the dimensions
    /// passed to the latest `start` call.
    options: Mutex<ThumbnailGetOptions>,
    epoch: AtomicU64,
    stopped: AtomicBool,
}

impl LoaderShared {
    fn shown_snapshot(&self) -> HashSet<usize> {
        match self.shown.lock() {
            Ok(g) => g.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    fn items_snapshot(&self) -> Vec<Arc<ViewportItem>> {
        match self.items.read() {
            Ok(g) => g.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    fn options_snapshot(&self) -> ThumbnailGetOptions {
        match self.options.lock() {
            Ok(g) => g.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }
}

struct RunHandles {
    debouncer: Debouncer<()>,
    rotation: JoinHandle<()>,
}

pub struct ThumbnailLoader {
    source: Arc<dyn ThumbnailSource>,
    sink: Arc<dyn ItemUpdateSink>,
    settings: LoaderSettings,
    shared: Arc<LoaderShared>,
    run: Mutex<Option<RunHandles>>,
}

impl ThumbnailLoader {
    pub fn new(
        source: Arc<dyn ThumbnailSource>,
        sink: Arc<dyn ItemUpdateSink>,
        settings: LoaderSettings,
    ) -> Self {
        let shared = Arc::new(LoaderShared {
            items: RwLock::new(Vec::new()),
            shown: Mutex::new(HashSet::new()),
            options: Mutex::new(settings.options.clone()),
            epoch: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        });
        Self {
            source,
            sink,
            settings,
            shared,
            run: Mutex::new(None),
        }
    }

    /// Installs the item list and target dimensions, then starts the load and
    /// rotation loops. Starting again replaces items and dimensions but keeps
    /// the running loops.
    pub fn start(&self, width: u32, height: u32, items: Vec<Arc<ViewportItem>>) {
        {
            let mut options = match self.shared.options.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            *options = self.settings.options.clone();
            options.width = width;
            options.height = height;
        }
        {
            let mut guard = match self.shared.items.write() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            *guard = items;
        }
        {
            let mut shown = match self.shared.shown.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            shown.clear();
        }
        self.shared.stopped.store(false, Ordering::Release);
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);

        let mut run = match self.run.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        if run.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let source = Arc::clone(&self.source);
        let sink = Arc::clone(&self.sink);
        let settings = self.settings.clone();
        let debouncer = Debouncer::new(move |_: ()| {
            let shared = Arc::clone(&shared);
            let source = Arc::clone(&source);
            let sink = Arc::clone(&sink);
            let settings = settings.clone();
            async move {
                run_pass(shared, source, sink, settings).await;
            }
        });

        let rotation = tokio::spawn(rotation_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.sink),
            self.settings.rotation_interval,
        ));

        *run = Some(RunHandles { debouncer, rotation });
    }

    pub fn notify_item_shown(&self, item: &ViewportItem) {
        self.set_shown(item.index, true);
    }

    pub fn notify_item_hidden(&self, item: &ViewportItem) {
        self.set_shown(item.index, false);
    }

    fn set_shown(&self, index: usize, shown: bool) {
        {
            let mut set = match self.shared.shown.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            let changed = if shown {
                set.insert(index)
            } else {
                set.remove(&index)
            };
            if !changed {
                return;
            }
        }
        // Any in-flight pass becomes stale the moment the shown set changes.
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        let run = match self.run.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        if let Some(run) = run.as_ref() {
            run.debouncer.signal(());
        }
    }

    /// Stops both loops. In-flight generation finishes in the background but
    /// can no longer mutate items.
    pub async fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        let handles = {
            let mut run = match self.run.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            run.take()
        };
        if let Some(handles) = handles {
            handles.debouncer.shutdown().await;
            handles.rotation.abort();
            let _ = handles.rotation.await;
        }
    }
}

/// Contiguous index window covering all shown indexes plus the margin,
/// clipped to the item list. None when nothing is shown.
fn compute_window(
    shown: &HashSet<usize>,
    margin: usize,
    item_count: usize,
) -> Option<(usize, usize)> {
    if item_count == 0 {
        return None;
    }
    let lo = *shown.iter().min()?;
    let hi = *shown.iter().max()?;
    let start = lo.saturating_sub(margin);
    let end = hi.saturating_add(margin).min(item_count - 1);
    Some((start.min(item_count - 1), end))
}

async fn run_pass(
    shared: Arc<LoaderShared>,
    source: Arc<dyn ThumbnailSource>,
    sink: Arc<dyn ItemUpdateSink>,
    settings: LoaderSettings,
) {
    let epoch = shared.epoch.load(Ordering::Acquire);
    if shared.stopped.load(Ordering::Acquire) {
        return;
    }
    let items = shared.items_snapshot();
    let shown = shared.shown_snapshot();
    let options = shared.options_snapshot();
    let Some((start, end)) = compute_window(&shown, settings.margin, items.len()) else {
        return;
    };

    // Evict everything that fell out of the window.
    for item in &items {
        if (start..=end).contains(&item.index) || !item.has_thumbnail() {
            continue;
        }
        if shared.epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        item.clear();
        sink.item_updated(item.index);
    }

    // Cache pass: cheap, so it runs sequentially and fills the window with
    // whatever is already on disk before any generation starts.
    let mut misses = Vec::new();
    for item in items.iter().filter(|i| (start..=end).contains(&i.index)) {
        if item.has_thumbnail() {
            continue;
        }
        if shared.epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        let result = source
            .get_thumbnail(Arc::clone(item.file()), &options, true)
            .await;
        if shared.epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        if result.status == ThumbnailStatus::Succeeded {
            item.set_frames(result.frames);
            sink.item_updated(item.index);
        } else {
            misses.push(Arc::clone(item));
        }
    }

    // Generation pass for the misses, bounded by the configured concurrency.
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut tasks = Vec::with_capacity(misses.len());
    for item in misses {
        let shared = Arc::clone(&shared);
        let source = Arc::clone(&source);
        let sink = Arc::clone(&sink);
        let semaphore = Arc::clone(&semaphore);
        let options = options.clone();
        tasks.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            if shared.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            let result = source
                .get_thumbnail(Arc::clone(item.file()), &options, false)
                .await;
            // The viewport may have moved while generating; a stale result
            // is dropped rather than flashed into a recycled cell.
            if shared.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            if result.status == ThumbnailStatus::Succeeded {
                item.set_frames(result.frames);
                sink.item_updated(item.index);
            }
        }));
    }
    for task in tasks {
        let _ = task.await;
    }
}

/// Cycles multi-frame thumbnails of shown items at a fixed cadence.
async fn rotation_loop(
    shared: Arc<LoaderShared>,
    sink: Arc<dyn ItemUpdateSink>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if shared.stopped.load(Ordering::Acquire) {
            return;
        }
        let shown = shared.shown_snapshot();
        if shown.is_empty() {
            continue;
        }
        let items = shared.items_snapshot();
        for item in items.iter().filter(|i| shown.contains(&i.index)) {
            if item.advance_rotation() {
                sink.item_updated(item.index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::SystemTime;

    use async_trait::async_trait;

    use crate::error::Result;
    use crate::fs::{NodeAttributes, VirtualDirectory, VirtualNode};
    use crate::nested_path::NestedPath;
    use crate::thumbnail::ThumbnailResult;

    struct StubFile {
        logical: NestedPath,
    }

    impl StubFile {
        fn new(index: usize) -> Arc<dyn VirtualFile> {
            Arc::new(Self {
                logical: NestedPath::from_segments(vec![format!("/stub/item-{:04}.png", index)])
                    .unwrap(),
            })
        }
    }

    impl VirtualNode for StubFile {
        fn name(&self) -> String {
            self.logical.name().to_string()
        }
        fn logical_path(&self) -> &NestedPath {
            &self.logical
        }
        fn attributes(&self) -> NodeAttributes {
            NodeAttributes::Normal
        }
        fn exists(&self) -> bool {
            true
        }
        fn length(&self) -> Option<u64> {
            Some(1)
        }
        fn last_write_time(&self) -> Option<SystemTime> {
            Some(SystemTime::UNIX_EPOCH)
        }
    }

    impl VirtualFile for StubFile {
        fn open_read(&self) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(std::io::Cursor::new(vec![0u8])))
        }
        fn get_physical_path(&self) -> Result<PathBuf> {
            Ok(PathBuf::from("/dev/null"))
        }
        fn try_convert_to_directory(
            self: Arc<Self>,
        ) -> Result<Option<Arc<dyn VirtualDirectory>>> {
            Ok(None)
        }
    }

    /// Cache is always cold; generation succeeds after an optional gate.
    struct StubSource {
        gate: Option<Arc<Semaphore>>,
        frames_per_item: usize,
        generated: AtomicUsize,
    }

    impl StubSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: None,
                frames_per_item: 1,
                generated: AtomicUsize::new(0),
            })
        }

        fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
            Arc::new(Self {
                gate: Some(gate),
                frames_per_item: 1,
                generated: AtomicUsize::new(0),
            })
        }

        fn multi_frame(frames: usize) -> Arc<Self> {
            Arc::new(Self {
                gate: None,
                frames_per_item: frames,
                generated: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ThumbnailSource for StubSource {
        async fn get_thumbnail(
            &self,
            _file: Arc<dyn VirtualFile>,
            _options: &ThumbnailGetOptions,
            cache_only: bool,
        ) -> ThumbnailResult {
            if cache_only {
                return ThumbnailResult::failed();
            }
            if let Some(gate) = &self.gate {
                let permit = gate.acquire().await;
                drop(permit);
            }
            self.generated.fetch_add(1, Ordering::SeqCst);
            ThumbnailResult::succeeded(
                (0..self.frames_per_item).map(|i| vec![i as u8]).collect(),
            )
        }
    }

    struct RecordingSink {
        updates: Mutex<Vec<usize>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                updates: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    impl ItemUpdateSink for RecordingSink {
        fn item_updated(&self, index: usize) {
            self.updates.lock().unwrap().push(index);
        }
    }

    fn make_items(count: usize) -> Vec<Arc<ViewportItem>> {
        (0..count).map(|i| ViewportItem::new(i, StubFile::new(i))).collect()
    }

    fn loaded_indexes(items: &[Arc<ViewportItem>]) -> Vec<usize> {
        items
            .iter()
            .filter(|i| i.has_thumbnail())
            .map(|i| i.index())
            .collect()
    }

    async fn settle<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..300 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn window_covers_shown_range_plus_margin() {
        let shown: HashSet<usize> = (40..=45).collect();
        assert_eq!(compute_window(&shown, 10, 100), Some((30, 55)));

        // Clipped at both ends.
        let low: HashSet<usize> = [2].into_iter().collect();
        assert_eq!(compute_window(&low, 10, 100), Some((0, 12)));
        let high: HashSet<usize> = [97].into_iter().collect();
        assert_eq!(compute_window(&high, 10, 100), Some((87, 99)));

        assert_eq!(compute_window(&HashSet::new(), 10, 100), None);
        assert_eq!(compute_window(&shown, 10, 0), None);
    }

    #[test]
    fn rotation_cursor_wraps_and_ignores_single_frame() {
        let item = ViewportItem::new(0, StubFile::new(0));
        assert!(!item.advance_rotation());

        item.set_frames(vec![vec![0], vec![1], vec![2]]);
        assert_eq!(item.current_image(), Some(vec![0]));
        assert!(item.advance_rotation());
        assert_eq!(item.current_image(), Some(vec![1]));
        assert!(item.advance_rotation());
        assert!(item.advance_rotation());
        assert_eq!(item.current_image(), Some(vec![0]));

        item.set_frames(vec![vec![9]]);
        assert!(!item.advance_rotation());
        assert_eq!(item.current_image(), Some(vec![9]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loads_exactly_the_window_around_shown_items() {
        let items = make_items(100);
        let sink = RecordingSink::new();
        let loader = ThumbnailLoader::new(
            StubSource::new(),
            Arc::clone(&sink) as Arc<dyn ItemUpdateSink>,
            LoaderSettings::default(),
        );
        loader.start(64, 64, items.clone());
        for item in &items[40..=45] {
            loader.notify_item_shown(item);
        }

        assert!(
            settle(|| loaded_indexes(&items) == (30..=55).collect::<Vec<_>>()).await,
            "window 30..=55 never settled, loaded: {:?}",
            loaded_indexes(&items)
        );
        assert!(sink.count() >= 26);
        loader.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scrolling_away_evicts_and_newer_pass_preempts_older() {
        let items = make_items(100);
        let gate = Arc::new(Semaphore::new(0));
        let loader = ThumbnailLoader::new(
            StubSource::gated(Arc::clone(&gate)),
            Arc::new(NullSink),
            LoaderSettings::default(),
        );
        loader.start(64, 64, items.clone());
        loader.notify_item_shown(&items[42]);

        // The first pass is now parked on the gate. Jump the viewport.
        tokio::time::sleep(Duration::from_millis(50)).await;
        loader.notify_item_hidden(&items[42]);
        loader.notify_item_shown(&items[3]);
        gate.add_permits(10_000);

        // Stale results around 42 must not land; the new window 0..=13 must.
        assert!(
            settle(|| loaded_indexes(&items) == (0..=13).collect::<Vec<_>>()).await,
            "loaded: {:?}",
            loaded_indexes(&items)
        );
        loader.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_loop_cycles_shown_multi_frame_items() {
        let items = make_items(3);
        let sink = RecordingSink::new();
        let loader = ThumbnailLoader::new(
            StubSource::multi_frame(3),
            Arc::clone(&sink) as Arc<dyn ItemUpdateSink>,
            LoaderSettings::default(),
        );
        loader.start(64, 64, items.clone());
        loader.notify_item_shown(&items[1]);

        assert!(settle(|| items[1].has_thumbnail()).await);
        let baseline = items[1].current_image();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_ne!(items[1].current_image(), baseline);

        // Two more periods bring the three-frame cycle back to the start.
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(items[1].current_image(), baseline);
        loader.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_prevents_further_mutation() {
        let items = make_items(20);
        let gate = Arc::new(Semaphore::new(0));
        let loader = ThumbnailLoader::new(
            StubSource::gated(Arc::clone(&gate)),
            Arc::new(NullSink),
            LoaderSettings::default(),
        );
        loader.start(64, 64, items.clone());
        loader.notify_item_shown(&items[5]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // stop() waits for the parked pass, so the gate opens alongside it;
        // the released results arrive after the stop epoch and are dropped.
        tokio::join!(loader.stop(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.add_permits(10_000);
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(loaded_indexes(&items).is_empty());
    }
}
