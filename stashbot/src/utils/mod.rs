//! Shared formatting and filesystem helpers.

pub mod bytesize;
pub mod fs;
