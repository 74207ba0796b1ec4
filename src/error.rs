//! Runtime trap and policy-parse error types.

/// Terminal failure kinds returned by [`crate::interpreter::Interpreter::step`].
///
/// A trap is not a recoverable exception: once `step` returns one, the VM
/// is in `Trapped` state and further `step` calls are a programming error
/// on the caller's part (the interpreter returns the same trap again
/// rather than panicking).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Trap {
    /// Load/Store outside any allocated segment, or Code read as data.
    #[error("invalid memory access")]
    InvalidMemory,
    /// Tag mismatch, out-of-range handle, bad opcode, non-LIFO free, or
    /// unwrap of the wrong variant.
    #[error("illegal instruction")]
    IllegalInstruction,
    /// Integer or fraction division, or float division by 0.0.
    #[error("division by zero")]
    DivideByZero,
    /// Allocation exceeds a segment, pop of an empty frame stack, or a
    /// free beyond the allocated region.
    #[error("bounds fault")]
    BoundsFault,
    /// The Axion engine returned a Deny verdict.
    #[error("security fault")]
    SecurityFault,
    /// The explicit `Trap` opcode was executed.
    #[error("trap instruction")]
    TrapInstruction,
}

impl Trap {
    /// The process exit code a CLI frontend should report for this trap.
    pub const fn exit_code(self) -> i32 {
        match self {
            Trap::DivideByZero => 10,
            Trap::InvalidMemory => 11,
            Trap::BoundsFault => 12,
            Trap::SecurityFault => 13,
            Trap::IllegalInstruction => 14,
            Trap::TrapInstruction => 15,
        }
    }
}

/// Exit code reported for a clean `Halt`.
pub const EXIT_HALTED: i32 = 0;

/// A policy parse failure, reported as a single-line message.
///
/// Policy-parse errors are reported at load time as a string; callers may
/// elect to continue with an empty policy (the `no-policy` engine, which
/// always Allows). This is distinct from a runtime [`Trap`]: a malformed
/// policy never prevents a program from loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PolicyParseError(pub String);

impl PolicyParseError {
    pub(crate) fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
