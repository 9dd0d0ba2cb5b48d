//! Error kinds surfaced at the four call-site boundaries of the engine:
//! construction, coefficient loading, graph assembly and the host contract.
//!
//! Inside a running period the engine does no allocation, I/O or branching
//! on data, so there is nothing left to report there — every error kind
//! here is detected before or between periods.

use thiserror::Error;

/// Errors the crossover engine can report. Every variant is fatal to the
/// session: none of these are meant to be retried by the caller without
/// fixing the underlying configuration.
#[derive(Debug, Error)]
pub enum CrossoverError {
    /// A construction-time argument was out of range: zero block size, a
    /// bus index outside `[0, bus_count)`, an empty filter list, or zero
    /// worker threads.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// The coefficient text format contained no filters, or a non-numeric
    /// token on a non-comment line. Coefficient-file loading itself is a
    /// host-side concern this crate does not implement (see crate-level
    /// docs), so this variant currently has no constructor in this crate;
    /// it is part of the error contract a host-side loader reports
    /// through, and is kept here so `CrossoverError` is the single error
    /// type spanning both.
    #[error("coefficient file invalid: {0}")]
    FileFormatInvalid(String),

    /// `TaskRunner::run` was handed a graph with zero or more than one
    /// sink task, or with no task having zero predecessors.
    #[error("task graph has invalid shape: {0}")]
    GraphShapeInvalid(String),

    /// The host violated the single-threaded, fill-then-update contract:
    /// `update_inputs` called concurrently, or before the input buffers
    /// were written for this period.
    #[error("host contract violated: {0}")]
    HostContractViolation(String),
}

/// Convenience alias used throughout the crate's public boundary.
pub type Result<T> = std::result::Result<T, CrossoverError>;
