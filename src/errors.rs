//! Custom error types for fgqc operations.

use thiserror::Error;

/// Result type alias for fgqc operations
pub type Result<T> = std::result::Result<T, FgqcError>;

/// Error type for fgqc operations
#[derive(Error, Debug)]
pub enum FgqcError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A contig was registered twice with the same name
    #[error("Contig '{name}' is already registered")]
    DuplicateContig {
        /// The contig name
        name: String,
    },

    /// The sorted-input invariant was broken
    #[error(
        "Read '{read}' at absolute position {read_start} arrived behind the \
         current window (window {window} starts at {window_start}); input must \
         be coordinate-sorted"
    )]
    OutOfOrderRead {
        /// Name of the offending read
        read: String,
        /// Absolute start of the offending read
        read_start: u64,
        /// Index of the window the cursor is on
        window: usize,
        /// Absolute start of that window
        window_start: u64,
    },

    /// A read's alignment could not be reconstructed from its CIGAR
    #[error("Read '{read}' has a malformed alignment: {reason}")]
    MalformedRead {
        /// Name of the offending read
        read: String,
        /// Explanation of the problem
        reason: String,
    },

    /// A window's descriptors were requested a second time
    #[error("Window {index} has already been finalized")]
    WindowAlreadyFinalized {
        /// Index of the window
        index: usize,
    },

    /// A window reached the aggregator without being finalized first
    #[error("Window {index} was ingested before being finalized")]
    WindowNotFinalized {
        /// Index of the window
        index: usize,
    },

    /// A worker task failed or died; the run cannot continue
    #[error("Worker failed while processing bunch {bunch}: {reason}")]
    WorkerFailed {
        /// Sequence number of the bunch being processed
        bunch: u64,
        /// Explanation of the failure
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_read_message() {
        let error = FgqcError::OutOfOrderRead {
            read: "r001".to_string(),
            read_start: 150,
            window: 3,
            window_start: 301,
        };
        let msg = format!("{error}");
        assert!(msg.contains("r001"));
        assert!(msg.contains("150"));
        assert!(msg.contains("coordinate-sorted"));
    }

    #[test]
    fn test_duplicate_contig_message() {
        let error = FgqcError::DuplicateContig { name: "chr1".to_string() };
        assert!(format!("{error}").contains("chr1"));
    }

    #[test]
    fn test_finalize_twice_message() {
        let error = FgqcError::WindowAlreadyFinalized { index: 7 };
        assert!(format!("{error}").contains("7"));
    }
}
