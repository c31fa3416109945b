//! Core definitions relied upon by all hdx-* crates: the error type and the
//! `Result` alias used by every memory and transfer operation.

pub mod error;
pub mod macros;
pub mod result;

pub use result::Result;
