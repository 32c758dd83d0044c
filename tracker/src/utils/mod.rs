//! Shared utilities.
//!
//! - [`debounce`]: coalesces bursts of file changes into one refresh

pub mod debounce;

pub use debounce::{DebouncerError, RefreshDebouncer};
