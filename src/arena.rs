//! Fixed-size arena of lazily-created windows.
//!
//! The arena is the one structure touched by more than one thread: workers
//! processing boundary-spanning reads must ensure the tail windows exist
//! before keying partial results to them. Creation goes through a single
//! lock; every other access is a lock-free read of the per-slot created flag.
//! Window contents are only ever mutated by the control thread, after all
//! workers that could touch them have been harvested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::genome::ReferenceBases;
use crate::regions::RegionMask;
use crate::window::{Window, WindowRegion};

struct Slot {
    created: AtomicBool,
    window: Mutex<Option<Window>>,
}

/// Shared registry of the partition's windows, indexed by window index.
pub struct WindowArena {
    slots: Vec<Slot>,
    create_lock: Mutex<()>,
    window_size: u64,
    reference_size: u64,
    detailed: bool,
    region: Option<(Arc<RegionMask>, bool)>,
    reference: Option<Arc<dyn ReferenceBases>>,
}

impl WindowArena {
    /// Build an arena partitioning `[1, reference_size]` into fixed windows.
    ///
    /// `region` carries the shared mask plus the outside flag for mirrored
    /// arenas; `reference` enables reference letter counts on new windows.
    #[must_use]
    pub fn new(
        reference_size: u64,
        window_size: u64,
        detailed: bool,
        region: Option<(Arc<RegionMask>, bool)>,
        reference: Option<Arc<dyn ReferenceBases>>,
    ) -> Self {
        assert!(window_size > 0, "window size must be positive");
        let num_windows = (reference_size as usize).div_ceil(window_size as usize);
        let slots = (0..num_windows)
            .map(|_| Slot { created: AtomicBool::new(false), window: Mutex::new(None) })
            .collect();
        Self {
            slots,
            create_lock: Mutex::new(()),
            window_size,
            reference_size,
            detailed,
            region,
            reference,
        }
    }

    /// Number of windows in the partition.
    #[must_use]
    pub fn num_windows(&self) -> usize {
        self.slots.len()
    }

    /// Absolute `[start, end]` bounds of a window. The last window is
    /// truncated to the reference size.
    #[must_use]
    pub fn window_bounds(&self, index: usize) -> (u64, u64) {
        debug_assert!(index < self.slots.len());
        let start = index as u64 * self.window_size + 1;
        let end = (start + self.window_size - 1).min(self.reference_size);
        (start, end)
    }

    /// Index of the window owning an absolute position.
    #[inline]
    #[must_use]
    pub fn window_index_of(&self, absolute: u64) -> usize {
        debug_assert!(absolute >= 1 && absolute <= self.reference_size);
        ((absolute - 1) / self.window_size) as usize
    }

    /// Lock-free check of the created flag.
    #[must_use]
    pub fn is_created(&self, index: usize) -> bool {
        self.slots[index].created.load(Ordering::Acquire)
    }

    /// Make sure the window exists, creating it lazily under the single
    /// create lock. Safe to call concurrently from worker threads.
    pub fn ensure_created(&self, index: usize) {
        let slot = &self.slots[index];
        if slot.created.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.create_lock.lock();
        if slot.created.load(Ordering::Acquire) {
            return;
        }
        let window = self.build_window(index);
        *slot.window.lock() = Some(window);
        slot.created.store(true, Ordering::Release);
    }

    /// Run `f` against the window, creating it first if needed.
    ///
    /// Control-thread only (merging partial results); the slot lock is
    /// uncontended by then.
    pub fn with_window<R>(&self, index: usize, f: impl FnOnce(&mut Window) -> R) -> R {
        self.ensure_created(index);
        let mut guard = self.slots[index].window.lock();
        let window = guard.as_mut().expect("created flag set without a window");
        f(window)
    }

    /// Remove the window from its slot for finalization, creating an empty
    /// one first if no read ever touched it.
    #[must_use]
    pub fn take(&self, index: usize) -> Window {
        self.ensure_created(index);
        let mut guard = self.slots[index].window.lock();
        guard.take().expect("window already taken")
    }

    fn build_window(&self, index: usize) -> Window {
        let (start, end) = self.window_bounds(index);
        let region = self
            .region
            .as_ref()
            .map(|(mask, outside)| WindowRegion { mask: Arc::clone(mask), outside: *outside });
        Window::new(index, start, end, self.detailed, region, self.reference.as_deref())
    }
}
