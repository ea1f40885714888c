#![deny(unsafe_code)]
// Clippy lint configuration for CI
// These lints are allowed because:
// - cast_*: coordinate and counter arithmetic intentionally casts between numeric types
// - missing_*_doc: documentation improvements tracked separately
// - unnecessary_wraps: some Result returns are for API consistency
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_wraps,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

//! # fgqc - windowed alignment QC engine
//!
//! This library turns a coordinate-sorted stream of aligned sequencing reads
//! into per-window and genome-wide quality metrics: depth of coverage, base
//! composition, mapping quality and insert size, plus derived histograms and
//! the coverage quota curve.
//!
//! ## Overview
//!
//! The engine partitions a multi-contig reference into fixed-size windows
//! over a single absolute coordinate space, streams reads through a bounded
//! worker pool, and merges thread-confined partial results into per-window
//! accumulators with a deterministic ordering guarantee. Statistics that
//! would need per-position storage genome-wide (variance of coverage) are
//! computed online from running sums instead.
//!
//! ### Core modules
//!
//! - **[`driver`]** - the streaming orchestrator and its worker pool
//! - **[`window`]** - per-window accumulators and descriptor computation
//! - **[`aggregate`]** - genome-wide totals, summaries and histograms
//! - **[`histogram`]** - the dense-cache/overflow histogram engine
//!
//! ### Supporting modules
//!
//! - **[`genome`]** - contigs and absolute coordinates
//! - **[`read`]** - the aligned-read abstraction and CIGAR expansion
//! - **[`regions`]** - region inclusion masks
//! - **[`partial`]** - thread-confined per-window contributions
//! - **[`arena`]** - the shared lazily-created window registry
//! - **[`reorder`]** - FIFO release of out-of-order worker results
//! - **[`config`]** - engine configuration
//! - **[`errors`]** - typed errors
//! - **[`progress`]** - interval progress logging
//! - **[`metrics`]** - serializable metric rows and TSV writers
//!
//! ## Quick start
//!
//! ```
//! use fgqc::config::EngineConfig;
//! use fgqc::driver::WindowedDriver;
//! use fgqc::genome::GenomeLocator;
//! use fgqc::read::{parse_cigar, AlignedRead, ReadFlags};
//!
//! # fn main() -> fgqc::errors::Result<()> {
//! let mut locator = GenomeLocator::new();
//! locator.add_contig("chr1", 1000)?;
//!
//! let read = AlignedRead {
//!     name: "r1".to_string(),
//!     contig: "chr1".to_string(),
//!     start: 95,
//!     end: 110,
//!     mapq: 60,
//!     insert_size: 310,
//!     flags: ReadFlags { paired: true, ..ReadFlags::default() },
//!     cigar: parse_cigar("r1", "16M")?,
//!     bases: b"ACGTACGTACGTACGT".to_vec(),
//! };
//!
//! let driver = WindowedDriver::new(EngineConfig::with_window_size(100), locator)?;
//! let report = driver.run(vec![read])?;
//! assert_eq!(report.stats.windows[0].mapped_bases, 6);
//! assert_eq!(report.stats.windows[1].mapped_bases, 10);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod arena;
pub mod config;
pub mod driver;
pub mod errors;
pub mod genome;
pub mod histogram;
pub mod metrics;
pub mod partial;
pub mod progress;
pub mod read;
pub mod regions;
pub mod reorder;
pub mod window;

// Re-export the types most callers touch
pub use aggregate::{GenomeStats, LaneReport};
pub use config::EngineConfig;
pub use driver::{QcReport, ReadCounters, WindowedDriver};
pub use errors::{FgqcError, Result};
pub use genome::{Contig, GenomeLocator, ReferenceBases};
pub use read::{AlignedRead, CigarOp, CigarOpKind, ReadFlags};
pub use regions::RegionMask;
pub use window::{Window, WindowSummary};
