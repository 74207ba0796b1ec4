//! Policy verdicts and the evaluation context they're computed from.

use crate::program::Opcode;

/// The three possible outcomes of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerdictKind {
    /// The instruction may proceed.
    Allow,
    /// The instruction must not proceed; the interpreter traps
    /// `SecurityFault`.
    Deny,
    /// Distinct from `Allow` only for `AxVerify`, which reports this
    /// outcome to its destination register as `1` instead of committing
    /// the gated operation.
    Defer,
}

/// The result of one `Engine::evaluate` call: a verdict plus the
/// human-readable reason recorded into the axion log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// The decision.
    pub kind: VerdictKind,
    /// A single-line, structured explanation, following the grammar in
    /// [`crate::trace`].
    pub reason: String,
}

impl Verdict {
    /// Shorthand for an `Allow` verdict with the given reason.
    pub fn allow(reason: impl Into<String>) -> Self {
        Self { kind: VerdictKind::Allow, reason: reason.into() }
    }

    /// Shorthand for a `Deny` verdict with the given reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self { kind: VerdictKind::Deny, reason: reason.into() }
    }

    /// Shorthand for a `Defer` verdict with the given reason.
    pub fn defer(reason: impl Into<String>) -> Self {
        Self { kind: VerdictKind::Defer, reason: reason.into() }
    }
}

/// Everything a policy evaluation needs to know about the instruction
/// about to execute.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    /// The opcode about to execute.
    pub next_opcode: Opcode,
    /// The program counter of the instruction about to execute.
    pub pc: usize,
    /// Caller identity, opaque to the engine; carried through for
    /// logging parity with the reference evaluator.
    pub caller: &'a str,
    /// Every reason string recorded so far, oldest first.
    pub trace_reasons: &'a [String],
}
