//! The windowed streaming driver.
//!
//! One control thread advances a cursor over the coordinate-sorted read
//! stream, groups reads into bunches, and dispatches each bunch to a bounded
//! worker pool. Workers turn reads into thread-confined
//! [`PartialReadResult`]s — touching shared state only to lazily create tail
//! windows for boundary-spanning reads — and the control thread harvests
//! results strictly in submission order before merging them into the window
//! accumulators. Window finalization and aggregator ingestion run
//! synchronously on the control thread in index order, so the per-window
//! summary lists stay index-aligned no matter how workers are scheduled.
//!
//! ```text
//! reads ──> control thread ──bunches──> worker pool ──partials──┐
//!             │   ▲                                             │
//!             │   └──────────── FIFO harvest ───────────────────┘
//!             └──> finalize window ──> GlobalAggregator (in order)
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ahash::AHashMap;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;

use crate::aggregate::{GlobalAggregator, LaneReport};
use crate::arena::WindowArena;
use crate::config::EngineConfig;
use crate::errors::{FgqcError, Result};
use crate::genome::{GenomeLocator, ReferenceBases};
use crate::partial::PartialReadResult;
use crate::progress::ProgressTracker;
use crate::read::AlignedRead;
use crate::regions::RegionMask;
use crate::reorder::ReorderBuffer;

/// Read-level counters accumulated over a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadCounters {
    /// Reads seen on the input stream.
    pub total: u64,
    /// Reads dispatched into accumulation.
    pub dispatched: u64,
    /// Reads skipped because they were unmapped.
    pub unmapped: u64,
    /// Reads skipped because they were secondary/supplementary.
    pub secondary: u64,
    /// Reads flagged as duplicates (skipped only when configured).
    pub duplicates: u64,
    /// Reads skipped because their contig is not in the locator.
    pub unknown_contig: u64,
    /// Dispatched reads dropped by workers for malformed alignments.
    pub malformed: u64,
    /// Aligned cells (reference-consuming positions) across all reads.
    pub aligned_bases: u64,
}

/// The complete result of a run: either this, or a fatal error — never a
/// partially-finalized report.
#[derive(Debug)]
pub struct QcReport {
    /// The primary pipeline (whole genome, or inside-of-regions).
    pub stats: LaneReport,
    /// The mirrored outside-of-regions pipeline, when requested.
    pub outside_stats: Option<LaneReport>,
    /// Read-level counters.
    pub reads: ReadCounters,
}

/// A read whose contig has been resolved to absolute coordinates.
struct PreparedRead {
    abs_start: u64,
    read: AlignedRead,
}

/// One unit of work for the pool.
struct Task {
    seq: u64,
    reads: Vec<PreparedRead>,
}

/// What a worker hands back for one bunch.
struct BunchOutcome {
    inside: Vec<PartialReadResult>,
    outside: Vec<PartialReadResult>,
    malformed: u64,
    aligned_bases: u64,
}

/// Immutable context shared by all workers.
struct WorkerContext {
    inside_arena: Arc<WindowArena>,
    outside_arena: Option<Arc<WindowArena>>,
    mask: Option<Arc<RegionMask>>,
    collect_outside: bool,
    reference_size: u64,
}

/// One accumulation pipeline: its window arena plus its aggregator.
struct Lane {
    arena: Arc<WindowArena>,
    aggregator: GlobalAggregator,
}

impl Lane {
    fn merge(&mut self, partials: &[PartialReadResult]) {
        for partial in partials {
            let index = self.arena.window_index_of(partial.window_start);
            self.arena.with_window(index, |window| window.apply_partial(partial));
        }
    }

    fn finalize_window(&mut self, index: usize) -> Result<()> {
        let mut window = self.arena.take(index);
        let summary = window.finalize()?;
        debug!(
            "finalized window {} [{}, {}]: {} mapped bases",
            index,
            summary.start,
            summary.end,
            summary.mapped_bases
        );
        self.aggregator.ingest(&window)
        // window dropped here; it is never mutated again
    }
}

/// The streaming orchestrator.
///
/// # Example
/// ```
/// use fgqc::config::EngineConfig;
/// use fgqc::driver::WindowedDriver;
/// use fgqc::genome::GenomeLocator;
///
/// let mut locator = GenomeLocator::new();
/// locator.add_contig("chr1", 1000).unwrap();
///
/// let config = EngineConfig::with_window_size(100);
/// let driver = WindowedDriver::new(config, locator).unwrap();
/// let report = driver.run(std::iter::empty()).unwrap();
/// assert_eq!(report.stats.windows.len(), 10);
/// ```
pub struct WindowedDriver {
    config: EngineConfig,
    locator: GenomeLocator,
    mask: Option<Arc<RegionMask>>,
    reference: Option<Arc<dyn ReferenceBases>>,
}

impl WindowedDriver {
    /// Create a driver over a fully-built locator.
    ///
    /// # Errors
    /// Returns [`FgqcError::InvalidParameter`] for an invalid configuration.
    pub fn new(config: EngineConfig, locator: GenomeLocator) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, locator, mask: None, reference: None })
    }

    /// Restrict statistics to a region set (and enable the outside pipeline
    /// when the configuration asks for it).
    #[must_use]
    pub fn with_regions(mut self, mask: RegionMask) -> Self {
        self.mask = Some(Arc::new(mask));
        self
    }

    /// Supply a reference base source for reference-derived content fields.
    #[must_use]
    pub fn with_reference(mut self, reference: Arc<dyn ReferenceBases>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Consume the sorted read stream and produce the complete report.
    ///
    /// # Errors
    /// Fatal conditions — an out-of-order read, a dead worker, a finalize
    /// protocol violation — abort the run; recoverable ones (malformed
    /// reads, unknown contigs) are counted, logged, and skipped.
    pub fn run<I>(self, reads: I) -> Result<QcReport>
    where
        I: IntoIterator<Item = AlignedRead>,
    {
        if self.config.collect_outside && self.mask.is_none() {
            return Err(FgqcError::InvalidParameter {
                parameter: "collect_outside".to_string(),
                reason: "requires a region mask".to_string(),
            });
        }

        let reference_size = self.locator.size();
        let detailed = self.config.per_position_detail;
        let inside_arena = Arc::new(WindowArena::new(
            reference_size,
            self.config.window_size,
            detailed,
            self.mask.as_ref().map(|mask| (Arc::clone(mask), false)),
            self.reference.clone(),
        ));
        let outside_arena = (self.config.collect_outside).then(|| {
            Arc::new(WindowArena::new(
                reference_size,
                self.config.window_size,
                detailed,
                self.mask.as_ref().map(|mask| (Arc::clone(mask), true)),
                self.reference.clone(),
            ))
        });
        let num_windows = inside_arena.num_windows();

        let inside_size = self.mask.as_ref().map_or(reference_size, |mask| mask.inside_size());
        let mut inside = Lane {
            arena: Arc::clone(&inside_arena),
            aggregator: GlobalAggregator::new(
                inside_size,
                num_windows,
                self.config.histogram_cache_size,
                self.config.max_quota,
            ),
        };
        let mut outside = outside_arena.as_ref().map(|arena| Lane {
            arena: Arc::clone(arena),
            aggregator: GlobalAggregator::new(
                self.mask.as_ref().map_or(0, |mask| mask.outside_size()),
                num_windows,
                self.config.histogram_cache_size,
                self.config.max_quota,
            ),
        });

        info!(
            "Starting windowed analysis: {} positions, {} windows of {}, {} workers",
            reference_size, num_windows, self.config.window_size, self.config.worker_threads
        );

        let context = Arc::new(WorkerContext {
            inside_arena,
            outside_arena,
            mask: self.mask.clone(),
            collect_outside: self.config.collect_outside,
            reference_size,
        });
        let (task_tx, task_rx) = bounded::<Task>(self.config.worker_threads * 2);
        let (result_tx, result_rx) = unbounded::<(u64, Result<BunchOutcome>)>();
        let workers = spawn_workers(self.config.worker_threads, &context, &task_rx, &result_tx);
        // The driver's clone must go away so a fully-dead pool is observable
        // as a disconnect on the result channel.
        drop(result_tx);
        drop(task_rx);

        let outcome = stream_loop(
            &self.config,
            &self.locator,
            reads,
            &task_tx,
            &result_rx,
            &mut inside,
            &mut outside,
        );
        drop(task_tx);
        join_workers(workers);
        let counters = outcome?;

        info!(
            "Processed {} reads: {} dispatched, {} unmapped, {} secondary, {} duplicates, \
             {} unknown contig, {} malformed",
            counters.total,
            counters.dispatched,
            counters.unmapped,
            counters.secondary,
            counters.duplicates,
            counters.unknown_contig,
            counters.malformed
        );

        Ok(QcReport {
            stats: inside.aggregator.finish(),
            outside_stats: outside.map(|lane| lane.aggregator.finish()),
            reads: counters,
        })
    }
}

/// The control loop proper: cursor advance, bunching, FIFO harvest,
/// synchronous finalization.
#[allow(clippy::too_many_lines, clippy::too_many_arguments)]
fn stream_loop<I>(
    config: &EngineConfig,
    locator: &GenomeLocator,
    reads: I,
    task_tx: &Sender<Task>,
    result_rx: &Receiver<(u64, Result<BunchOutcome>)>,
    inside: &mut Lane,
    outside: &mut Option<Lane>,
) -> Result<ReadCounters>
where
    I: IntoIterator<Item = AlignedRead>,
{
    let num_windows = inside.arena.num_windows();
    let progress = ProgressTracker::new("Processed reads").with_interval(config.progress_interval);
    let mut counters = ReadCounters::default();
    let mut bunch: Vec<PreparedRead> = Vec::with_capacity(config.bunch_size);
    let mut next_seq = 0u64;
    let mut harvested = 0u64;
    let mut reorder = ReorderBuffer::new();
    let mut current_window = 0usize;

    for read in reads {
        counters.total += 1;
        progress.add(1);

        if read.flags.unmapped {
            counters.unmapped += 1;
            continue;
        }
        if read.flags.secondary {
            counters.secondary += 1;
            continue;
        }
        let Some(abs_start) = locator.to_absolute(&read.contig, read.start) else {
            counters.unknown_contig += 1;
            warn!("read '{}' references unknown contig '{}', skipping", read.name, read.contig);
            continue;
        };
        if abs_start > locator.size() {
            counters.malformed += 1;
            warn!(
                "read '{}' starts at {}:{} beyond the reference, skipping",
                read.name, read.contig, read.start
            );
            continue;
        }
        if read.flags.duplicate {
            counters.duplicates += 1;
            if config.skip_duplicates {
                continue;
            }
        }

        let (window_start, window_end) = inside.arena.window_bounds(current_window);
        if abs_start < window_start {
            return Err(FgqcError::OutOfOrderRead {
                read: read.name,
                read_start: abs_start,
                window: current_window,
                window_start,
            });
        }
        if abs_start > window_end {
            // The cursor leaves the current window: everything submitted so
            // far is the complete input for the windows being passed.
            flush_bunch(&mut bunch, &mut next_seq, task_tx)?;
            harvest(
                result_rx,
                &mut reorder,
                &mut harvested,
                next_seq,
                &mut counters,
                inside,
                outside,
            )?;
            while current_window < num_windows
                && inside.arena.window_bounds(current_window).1 < abs_start
            {
                inside.finalize_window(current_window)?;
                if let Some(lane) = outside.as_mut() {
                    lane.finalize_window(current_window)?;
                }
                current_window += 1;
            }
        }

        counters.dispatched += 1;
        bunch.push(PreparedRead { abs_start, read });
        if bunch.len() >= config.bunch_size {
            flush_bunch(&mut bunch, &mut next_seq, task_tx)?;
        }
    }

    // Stream exhausted: drain the pool, then close out the partition.
    flush_bunch(&mut bunch, &mut next_seq, task_tx)?;
    harvest(result_rx, &mut reorder, &mut harvested, next_seq, &mut counters, inside, outside)?;
    while current_window < num_windows {
        inside.finalize_window(current_window)?;
        if let Some(lane) = outside.as_mut() {
            lane.finalize_window(current_window)?;
        }
        current_window += 1;
    }

    progress.log_final();
    Ok(counters)
}

/// Submit the pending bunch, if any. Blocks only on pool backpressure.
fn flush_bunch(
    bunch: &mut Vec<PreparedRead>,
    next_seq: &mut u64,
    task_tx: &Sender<Task>,
) -> Result<()> {
    if bunch.is_empty() {
        return Ok(());
    }
    let task = Task { seq: *next_seq, reads: std::mem::take(bunch) };
    let seq = task.seq;
    task_tx.send(task).map_err(|_| FgqcError::WorkerFailed {
        bunch: seq,
        reason: "worker pool shut down unexpectedly".to_string(),
    })?;
    *next_seq += 1;
    Ok(())
}

/// Block until every submitted bunch below `up_to` has been merged, in
/// strict submission order regardless of completion order.
#[allow(clippy::too_many_arguments)]
fn harvest(
    result_rx: &Receiver<(u64, Result<BunchOutcome>)>,
    reorder: &mut ReorderBuffer<BunchOutcome>,
    harvested: &mut u64,
    up_to: u64,
    counters: &mut ReadCounters,
    inside: &mut Lane,
    outside: &mut Option<Lane>,
) -> Result<()> {
    while *harvested < up_to {
        if let Some(outcome) = reorder.try_pop_next() {
            counters.malformed += outcome.malformed;
            counters.aligned_bases += outcome.aligned_bases;
            inside.merge(&outcome.inside);
            if let Some(lane) = outside.as_mut() {
                lane.merge(&outcome.outside);
            }
            *harvested += 1;
            continue;
        }
        let (seq, result) = result_rx.recv().map_err(|_| FgqcError::WorkerFailed {
            bunch: *harvested,
            reason: "worker pool died before delivering results".to_string(),
        })?;
        let outcome = result.map_err(|e| FgqcError::WorkerFailed {
            bunch: seq,
            reason: e.to_string(),
        })?;
        reorder.insert(seq, outcome);
    }
    Ok(())
}

fn spawn_workers(
    count: usize,
    context: &Arc<WorkerContext>,
    task_rx: &Receiver<Task>,
    result_tx: &Sender<(u64, Result<BunchOutcome>)>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            let context = Arc::clone(context);
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            thread::Builder::new()
                .name(format!("fgqc-worker-{worker_id}"))
                .spawn(move || {
                    while let Ok(task) = task_rx.recv() {
                        let seq = task.seq;
                        let outcome = process_bunch(&context, task);
                        if result_tx.send((seq, outcome)).is_err() {
                            // Driver is gone; nothing left to do.
                            break;
                        }
                    }
                })
                .expect("failed to spawn worker thread")
        })
        .collect()
}

fn join_workers(workers: Vec<JoinHandle<()>>) {
    for handle in workers {
        if handle.join().is_err() {
            // The failure already surfaced through the result channel.
            warn!("a worker thread panicked during shutdown");
        }
    }
}

/// Turn one bunch of reads into per-window partial results.
///
/// Thread-confined except for `ensure_created`, the arena's guarded
/// lazy-create path for windows a read's tail spills into.
fn process_bunch(context: &WorkerContext, task: Task) -> Result<BunchOutcome> {
    let mut inside: AHashMap<u64, PartialReadResult> = AHashMap::new();
    let mut outside: AHashMap<u64, PartialReadResult> = AHashMap::new();
    let mut malformed = 0u64;
    let mut aligned_bases = 0u64;

    for prepared in task.reads {
        let read = &prepared.read;
        let aligned = match read.aligned_sequence() {
            Ok(aligned) => aligned,
            Err(e) => {
                warn!("{e}, skipping");
                malformed += 1;
                continue;
            }
        };
        aligned_bases += aligned.len() as u64;
        let valid_insert =
            (read.flags.paired && read.has_valid_insert()).then(|| read.insert_size.unsigned_abs());

        for (offset, &base) in aligned.iter().enumerate() {
            let absolute = prepared.abs_start + offset as u64;
            if absolute > context.reference_size {
                // Tail hangs off the end of the reference; drop it.
                break;
            }

            let (target, arena) = match &context.mask {
                Some(mask) if !mask.contains(absolute) => {
                    if !context.collect_outside {
                        continue;
                    }
                    let arena = context.outside_arena.as_ref().expect("outside lane configured");
                    (&mut outside, arena)
                }
                _ => (&mut inside, &context.inside_arena),
            };

            let index = arena.window_index_of(absolute);
            arena.ensure_created(index);
            let (window_start, _) = arena.window_bounds(index);
            let partial =
                target.entry(window_start).or_insert_with(|| PartialReadResult::new(window_start));
            partial.push_cell((absolute - window_start) as u32, base, read.mapq, valid_insert);
        }
    }

    Ok(BunchOutcome {
        inside: inside.into_values().sorted_by_key(|p| p.window_start).collect(),
        outside: outside.into_values().sorted_by_key(|p| p.window_start).collect(),
        malformed,
        aligned_bases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::{parse_cigar, ReadFlags};

    fn locator(len: u64) -> GenomeLocator {
        let mut locator = GenomeLocator::new();
        locator.add_contig("chr1", len).unwrap();
        locator
    }

    fn match_read(name: &str, start: u64, len: usize) -> AlignedRead {
        AlignedRead {
            name: name.to_string(),
            contig: "chr1".to_string(),
            start,
            end: start + len as u64 - 1,
            mapq: 30,
            insert_size: 0,
            flags: ReadFlags::default(),
            cigar: parse_cigar(name, &format!("{len}M")).unwrap(),
            bases: vec![b'A'; len],
        }
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            window_size: 100,
            bunch_size: 3,
            worker_threads: 2,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_empty_stream_yields_full_partition() {
        let driver = WindowedDriver::new(small_config(), locator(1000)).unwrap();
        let report = driver.run(std::iter::empty()).unwrap();
        assert_eq!(report.stats.windows.len(), 10);
        assert_eq!(report.stats.genome.total_mapped_bases, 0);
        assert_eq!(report.stats.coverage_histogram.frequency_of(0), 1000);
    }

    /// A read on [95, 110] over 100-wide windows puts 6 positions in
    /// window 0 and 10 in window 1.
    #[test]
    fn test_boundary_spanning_read() {
        let driver = WindowedDriver::new(small_config(), locator(1000)).unwrap();
        let report = driver.run(vec![match_read("r1", 95, 16)]).unwrap();
        let windows = &report.stats.windows;
        assert_eq!(windows[0].mapped_bases, 6);
        assert_eq!(windows[1].mapped_bases, 10);
        assert!(windows[2..].iter().all(|w| w.mapped_bases == 0));
        assert_eq!(report.reads.aligned_bases, 16);
    }

    #[test]
    fn test_out_of_order_read_is_fatal() {
        let driver = WindowedDriver::new(small_config(), locator(1000)).unwrap();
        let reads = vec![match_read("r1", 500, 10), match_read("r2", 10, 10)];
        let result = driver.run(reads);
        assert!(matches!(result, Err(FgqcError::OutOfOrderRead { .. })));
    }

    #[test]
    fn test_recoverable_skips_are_counted() {
        let mut bad_cigar = match_read("r_bad", 50, 10);
        bad_cigar.cigar.clear();
        let mut unmapped = match_read("r_unmapped", 60, 10);
        unmapped.flags.unmapped = true;
        let mut unknown = match_read("r_unknown", 70, 10);
        unknown.contig = "chrM".to_string();

        let driver = WindowedDriver::new(small_config(), locator(1000)).unwrap();
        let report =
            driver.run(vec![match_read("r1", 10, 10), bad_cigar, unmapped, unknown]).unwrap();
        assert_eq!(report.reads.total, 4);
        assert_eq!(report.reads.malformed, 1);
        assert_eq!(report.reads.unmapped, 1);
        assert_eq!(report.reads.unknown_contig, 1);
        assert_eq!(report.stats.genome.total_mapped_bases, 10);
    }

    #[test]
    fn test_duplicates_skipped_when_configured() {
        let mut duplicate = match_read("r_dup", 10, 10);
        duplicate.flags.duplicate = true;

        let mut config = small_config();
        config.skip_duplicates = true;
        let driver = WindowedDriver::new(config, locator(1000)).unwrap();
        let report = driver.run(vec![match_read("r1", 10, 10), duplicate.clone()]).unwrap();
        assert_eq!(report.reads.duplicates, 1);
        assert_eq!(report.stats.genome.total_mapped_bases, 10);

        let driver = WindowedDriver::new(small_config(), locator(1000)).unwrap();
        let report = driver.run(vec![match_read("r1", 10, 10), duplicate]).unwrap();
        assert_eq!(report.reads.duplicates, 1);
        assert_eq!(report.stats.genome.total_mapped_bases, 20);
    }

    #[test]
    fn test_collect_outside_requires_mask() {
        let mut config = small_config();
        config.collect_outside = true;
        let driver = WindowedDriver::new(config, locator(1000)).unwrap();
        let result = driver.run(std::iter::empty());
        assert!(matches!(result, Err(FgqcError::InvalidParameter { .. })));
    }
}
