use thiserror::Error;

/// Top-level error for the publish/subscribe source subsystem.
///
/// Follows the error-handling policy of spec §7: transient I/O is retried
/// below this layer and never surfaces here; everything that does surface
/// carries a machine-readable variant plus a human-readable wrapped chain.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A standard I/O error, typically from a packager's filesystem write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A second publisher attempted to publish to a stream that already has
    /// one. Fatal to the publish attempt only; the existing publisher and
    /// all consumers are unaffected.
    #[error("stream already published: {0}")]
    AlreadyPublished(String),

    /// A packet was pushed to a stream with no active publisher.
    #[error("stream not published: {0}")]
    NotPublished(String),

    /// A protocol/invariant violation that is fatal to the stream but not
    /// to the process (e.g. data before a sequence header).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The PS/TS ingress reassembler exceeded its bounded recovery budget.
    #[error("PS recovery budget exhausted after {0} consecutive recoveries")]
    RecoveryExhausted(usize),

    /// A segment/fragment/recording write failed partway through; the
    /// packager abandons the temp file and continues with the next one.
    #[error("segment write failed: {0}")]
    SegmentWrite(String),

    /// Playlist/manifest serialization failed.
    #[error("playlist error: {0}")]
    Playlist(String),

    /// MP4/TS/FLV box or tag muxing failed.
    #[error("mux error: {0}")]
    Mux(String),

    /// Configuration could not be parsed or a required key was missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// The consumer's queue or sender coroutine was interrupted.
    #[error("cancelled")]
    Cancelled,

    /// The `fetch_or_create` post-creation initialization step failed; the
    /// caller is responsible for removing the registry entry it created.
    #[error("source initialization failed: {0}")]
    InitFailed(String),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, CoreError>;
