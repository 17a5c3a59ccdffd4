// In: src/error.rs

//! This module defines the single, unified error type for the entire rhseg core.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.

use thiserror::Error;

/// Identifies one of the five parallel arrays of a `MessageBuffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Byte,
    Short,
    Int,
    Float,
    Double,
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BufferKind::Byte => "byte",
            BufferKind::Short => "short",
            BufferKind::Int => "int",
            BufferKind::Float => "float",
            BufferKind::Double => "double",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RhsegError {
    // =========================================================================
    // === High-Level, Semantic Errors (Specific to the segmentation core)
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A writer or reader ran past the end of one of the buffer arrays. The
    /// buffer was sized with a different formula than the one used to fill it.
    #[error("Buffer overrun on {kind} array: cursor {cursor} + {requested} exceeds length {len}")]
    BufferOverrun {
        kind: BufferKind,
        cursor: usize,
        requested: usize,
        len: usize,
    },

    /// A buffer was not fully consumed (or filled) by the record sequence.
    #[error("{remaining} trailing element(s) left in {kind} array")]
    TrailingElements { kind: BufferKind, remaining: usize },

    #[error("Record layout mismatch: sender fingerprint {sent:#010x}, receiver fingerprint {expected:#010x}")]
    LayoutMismatch { sent: u32, expected: u32 },

    #[error("Message frame serialization/deserialization failed: {0}")]
    FrameFormat(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Region bookkeeping error: {0}")]
    Region(String),

    #[error("Internal logic error (this is a bug): {0}")]
    Internal(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the underlying I/O subsystem (e.g. results file not found).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically while loading a configuration.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error from a safe byte-casting operation failing.
    #[error("Byte slice casting error: {0}")]
    PodCast(String), // Manual `From` impl is needed as bytemuck::PodCastError doesn't impl Error
}

// =============================================================================
// === Manual `From` Implementations ===
// =============================================================================

impl From<bytemuck::PodCastError> for RhsegError {
    fn from(err: bytemuck::PodCastError) -> Self {
        RhsegError::PodCast(err.to_string())
    }
}
