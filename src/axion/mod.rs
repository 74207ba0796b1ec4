//! The Axion policy model (C3): parse tree, substring-matching evaluator,
//! and the verdict types they communicate through.

pub mod engine;
pub mod policy;
pub mod verdict;

pub use engine::{AxionEngine, InstructionCountEngine, NoPolicyEngine, PolicyEngine};
pub use policy::{
    parse_policy, AxionEventReq, LoopBound, LoopHint, MatchGuard, MatchResult, Policy,
    SegmentEventReq,
};
pub use verdict::{Context, Verdict, VerdictKind};
