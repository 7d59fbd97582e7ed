//! Value ABI and error primitives shared between the JIT engine and
//! whatever embeds it.
//!
//! This crate is deliberately small: it is the part of the contract an
//! embedder links against without pulling in the compiler itself — the
//! memory layout emitted code hard-codes, the helper names it may call by,
//! and the error shapes that cross the FFI boundary.

pub mod error;
pub mod helpers;
pub mod value;

pub use error::{AbiError, AbiResult};
pub use helpers::REQUIRED_HELPERS;
pub use value::{Value, ValueTag};
