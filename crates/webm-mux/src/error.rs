use thiserror::Error;

/// Errors raised by the muxer and the structural inspector.
///
/// Muxer errors are invariant violations on the caller's side (chunks out
/// of order, finalize called twice); none of them are recoverable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MuxError {
    /// `add_chunk` or `finalize` after the muxer was finalized.
    #[error("muxer already finalized")]
    AlreadyFinalized,

    /// The first chunk of a stream has to be independently decodable.
    #[error("first chunk must be a keyframe")]
    FirstChunkMustBeKeyframe,

    /// A chunk was submitted with a timestamp earlier than its predecessor.
    #[error("chunk timestamp {current_us}us is earlier than previous {previous_us}us")]
    NonMonotonicTimestamp { previous_us: u64, current_us: u64 },

    /// All blocks share one cluster; offsets beyond this cannot be represented.
    #[error("chunk at {relative_ms}ms exceeds the single-cluster limit of {limit_ms}ms")]
    ClusterSpanExceeded { relative_ms: u64, limit_ms: u64 },

    /// Value does not fit in an 8-byte variable-length integer.
    #[error("value {value} does not fit in an 8-byte vint")]
    VintOverflow { value: u64 },

    /// The inspector ran out of input inside an element.
    #[error("truncated input at offset {offset}: {context}")]
    Truncated { offset: usize, context: &'static str },

    /// The inspector found bytes that are not a valid WebM document.
    #[error("malformed container at offset {offset}: {message}")]
    Malformed { offset: usize, message: String },
}

pub type MuxResult<T> = Result<T, MuxError>;
