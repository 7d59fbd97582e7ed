//! Error kinds for the compilation pipeline, one enum per §7's taxonomy.

use thiserror::Error;

pub type JitResult<T> = Result<T, JitError>;

#[derive(Debug, Error)]
pub enum JitError {
    /// A bytecode function contains an opcode outside the supported set,
    /// or a variadic/closure/exception shape. Cached by the driver so a
    /// function is only ever analyzed once.
    #[error("function is not compilable: {0}")]
    Unsupported(String),

    /// The instruction stream itself is malformed: a truncated operand or
    /// an opcode byte with no known decoding. Distinct from `Unsupported`,
    /// which is a *known* opcode lowering declines to compile.
    #[error("decode error at offset {offset}: {reason}")]
    Decode { offset: usize, reason: String },

    /// Executable-page allocation failed, or an arena needed to grow and
    /// could not.
    #[error("os/resource error: {0}")]
    OsResource(String),

    /// An unresolved label or PLT slot remained at the end of emission.
    /// Treated as a compiler bug.
    #[error("relocation error: {0}")]
    Relocation(String),

    /// Emission referenced a helper name with no registered address. This
    /// is recorded, not fatal: emission continues with a trap sequence in
    /// place of the call so tests can catch the gap.
    #[error("helper '{0}' has no registered address")]
    HelperMissing(String),

    /// The call bridge cannot service an arity, or the target architecture
    /// is unsupported.
    #[error("call bridge cannot service arity {0} (max 4)")]
    BridgeArityExceeded(usize),

    /// A shared lock was poisoned by a panicking holder.
    #[error("internal lock poisoned: {0}")]
    Poisoned(String),
}

impl JitError {
    /// Whether this error should be cached as a permanent `Failed` marker
    /// on the function (as opposed to a transient condition worth retrying).
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            JitError::Unsupported(_) | JitError::Decode { .. } | JitError::Relocation(_)
        )
    }
}
