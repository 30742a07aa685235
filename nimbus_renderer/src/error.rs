//! Error types for the Nimbus renderer core
//!
//! Every allocator, heap and fence operation reports failure through this
//! single error type. Variants are split between fatal conditions (resource
//! exhaustion, device loss, native creation failures) and misuse conditions
//! (bad handles, bad addresses, out-of-order frame calls).

use std::fmt;

/// Result type for Nimbus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Nimbus renderer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Backend-specific error (Vulkan, headless, etc.)
    BackendError(String),

    /// A CPU-side allocator ran out of backing memory (message names the allocator)
    OutOfMemory(String),

    /// A descriptor heap has no free slot left (message names the heap)
    DescriptorHeapExhausted(String),

    /// Descriptor handle used with the wrong heap, stale, or freed twice
    InvalidHandle(String),

    /// Allocator address that is not the start of a live chunk
    InvalidAddress(String),

    /// Argument outside of the accepted domain (zero size, bad alignment, ...)
    InvalidArgument(String),

    /// Operation called in the wrong frame phase
    InvalidState(String),

    /// The GPU was removed or reset; nothing can be recovered
    DeviceLost(String),

    /// Initialization failed (allocator, heap, queue, device)
    InitializationFailed(String),
}

impl Error {
    /// Whether this error belongs to the unrecoverable class.
    ///
    /// Fatal errors are never retried: the outermost frame loop is expected
    /// to log them and terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::OutOfMemory(_)
                | Error::DescriptorHeapExhausted(_)
                | Error::DeviceLost(_)
                | Error::InitializationFailed(_)
                | Error::BackendError(_)
        )
    }

    /// Whether this error signals caller misuse rather than exhaustion
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::InvalidHandle(_)
                | Error::InvalidAddress(_)
                | Error::InvalidArgument(_)
                | Error::InvalidState(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory(msg) => write!(f, "Out of memory: {}", msg),
            Error::DescriptorHeapExhausted(msg) => write!(f, "Descriptor heap exhausted: {}", msg),
            Error::InvalidHandle(msg) => write!(f, "Invalid descriptor handle: {}", msg),
            Error::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ===== ERROR MACROS =====

/// Log an ERROR entry (with file:line) and build an [`Error`]
///
/// Without a variant the error is an `Error::BackendError`.
///
/// # Example
///
/// ```no_run
/// use nimbus_renderer::engine_err;
///
/// let err = engine_err!("nimbus::vulkan", "vkQueueSubmit failed: {}", -4);
/// let err = engine_err!("nimbus::DescriptorHeap", InvalidHandle, "slot {} is free", 3);
/// ```
#[macro_export]
macro_rules! engine_err {
    ($source:expr, $variant:ident, $fmt:literal $($arg:tt)*) => {{
        let message = format!($fmt $($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::nimbus::Error::$variant(message)
    }};
    ($source:expr, $fmt:literal $($arg:tt)*) => {{
        let message = format!($fmt $($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::nimbus::Error::BackendError(message)
    }};
}

/// Log an ERROR entry and return early with the matching [`Error`]
///
/// Accepts the same forms as [`engine_err!`].
#[macro_export]
macro_rules! engine_bail {
    ($($arg:tt)*) => {
        return Err($crate::engine_err!($($arg)*))
    };
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
