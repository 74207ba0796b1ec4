//! Policy evaluation engines.

use super::policy::{MatchResult, Policy};
use super::verdict::{Context, Verdict, VerdictKind};
use crate::program::Opcode;
use std::sync::atomic::{AtomicU64, Ordering};

/// A policy-evaluation engine: the single seam the interpreter calls
/// before committing any instruction.
pub trait AxionEngine {
    /// Evaluates the upcoming instruction, returning a verdict.
    fn evaluate(&self, ctx: &Context<'_>) -> Verdict;
}

/// Always allows. Used when a program carries no policy text.
#[derive(Debug, Default)]
pub struct NoPolicyEngine;

impl AxionEngine for NoPolicyEngine {
    fn evaluate(&self, _ctx: &Context<'_>) -> Verdict {
        Verdict::allow("Axion policy engine (no policy)")
    }
}

/// Allows up to `max_instructions` steps, then Denies every step after.
///
/// Deliberately ignores the context's opcode and PC — this mirrors the
/// reference engine's counting behavior, which is purely step-based.
#[derive(Debug)]
pub struct InstructionCountEngine {
    max_instructions: u64,
    count: AtomicU64,
}

impl InstructionCountEngine {
    /// Builds a counter that allows `max_instructions` steps before
    /// denying every subsequent one.
    pub fn new(max_instructions: u64) -> Self {
        Self { max_instructions, count: AtomicU64::new(0) }
    }
}

impl AxionEngine for InstructionCountEngine {
    fn evaluate(&self, _ctx: &Context<'_>) -> Verdict {
        let seen = self.count.fetch_add(1, Ordering::SeqCst);
        if seen < self.max_instructions {
            Verdict::allow("Axion policy engine (instruction budget available)")
        } else {
            Verdict::deny("Axion policy engine (instruction budget exhausted)")
        }
    }
}

/// Evaluates a parsed [`Policy`] against the running trace by substring
/// matching, as described in the policy grammar documentation.
#[derive(Debug)]
pub struct PolicyEngine {
    policy: Option<Policy>,
}

impl PolicyEngine {
    /// Builds an engine from an optional parsed policy; `None` behaves
    /// exactly like [`NoPolicyEngine`].
    pub fn new(policy: Option<Policy>) -> Self {
        Self { policy }
    }

    fn loop_hint_satisfied(&self, ctx: &Context<'_>, hint: &super::policy::LoopHint) -> bool {
        let expected = hint.expected_reason();
        ctx.trace_reasons.iter().any(|r| r.contains(&expected))
    }

    fn match_guard_satisfied(&self, ctx: &Context<'_>, req: &super::policy::MatchGuard) -> bool {
        let enum_token = format!("enum={}", req.enum_name);
        let variant_token = format!("variant={}", req.variant_name);
        let match_token = match req.result {
            MatchResult::Pass => "match=pass".to_string(),
            MatchResult::Fail => "match=fail".to_string(),
        };
        ctx.trace_reasons.iter().any(|r| {
            r.contains("enum guard")
                && (req.enum_name.is_empty() || r.contains(&enum_token))
                && (req.variant_name.is_empty() || r.contains(&variant_token))
                && req.payload.as_ref().map(|p| r.contains(&format!("payload={p}"))).unwrap_or(true)
                && r.contains(&match_token)
        })
    }

    fn segment_event_satisfied(&self, ctx: &Context<'_>, req: &super::policy::SegmentEventReq) -> bool {
        let segment_eq = format!("segment={}", req.segment);
        let segment_spaced = format!(" {} ", req.segment);
        let addr_token = req.addr.map(|a| format!("addr={a}"));
        ctx.trace_reasons.iter().any(|r| {
            r.contains(&req.action)
                && (req.segment.is_empty() || r.contains(&segment_eq) || r.contains(&segment_spaced))
                && addr_token.as_ref().map(|t| r.contains(t)).unwrap_or(true)
        })
    }

    fn axion_event_satisfied(&self, ctx: &Context<'_>, req: &super::policy::AxionEventReq) -> bool {
        ctx.trace_reasons.iter().any(|r| r.contains(&req.reason))
    }
}

impl AxionEngine for PolicyEngine {
    fn evaluate(&self, ctx: &Context<'_>) -> Verdict {
        let Some(policy) = &self.policy else {
            return Verdict::allow("Axion policy engine (no policy)");
        };

        for hint in &policy.loops {
            if !self.loop_hint_satisfied(ctx, hint) {
                return Verdict::deny(format!(
                    "Missing loop hint trace: {}",
                    hint.expected_reason()
                ));
            }
        }

        if ctx.next_opcode == Opcode::Halt {
            for req in &policy.match_guards {
                if !self.match_guard_satisfied(ctx, req) {
                    let mut reason = format!(
                        "Missing match guard event: enum={} variant={}",
                        req.enum_name, req.variant_name
                    );
                    if let Some(payload) = &req.payload {
                        reason.push_str(&format!(" payload={payload}"));
                    }
                    let result = match req.result {
                        MatchResult::Pass => "pass",
                        MatchResult::Fail => "fail",
                    };
                    reason.push_str(&format!(" result={result}"));
                    return Verdict::deny(reason);
                }
            }
            for req in &policy.segment_requirements {
                if !self.segment_event_satisfied(ctx, req) {
                    let mut reason =
                        format!("Missing segment event: action=\"{}\" segment={}", req.action, req.segment);
                    if let Some(addr) = req.addr {
                        reason.push_str(&format!(" addr={addr}"));
                    }
                    return Verdict::deny(reason);
                }
            }
            for req in &policy.axion_event_requirements {
                if !self.axion_event_satisfied(ctx, req) {
                    return Verdict::deny(format!(
                        "Missing Axion event reason containing \"{}\"",
                        req.reason
                    ));
                }
            }
        }

        Verdict::allow("Axion policy engine (loop hints satisfied)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axion::policy::parse_policy;

    fn ctx<'a>(opcode: Opcode, reasons: &'a [String]) -> Context<'a> {
        Context { next_opcode: opcode, pc: 0, caller: "test", trace_reasons: reasons }
    }

    #[test]
    fn no_policy_always_allows() {
        let engine = NoPolicyEngine;
        let verdict = engine.evaluate(&ctx(Opcode::Add, &[]));
        assert_eq!(verdict.kind, VerdictKind::Allow);
    }

    #[test]
    fn instruction_count_engine_denies_after_budget() {
        let engine = InstructionCountEngine::new(2);
        assert_eq!(engine.evaluate(&ctx(Opcode::Add, &[])).kind, VerdictKind::Allow);
        assert_eq!(engine.evaluate(&ctx(Opcode::Add, &[])).kind, VerdictKind::Allow);
        assert_eq!(engine.evaluate(&ctx(Opcode::Add, &[])).kind, VerdictKind::Deny);
    }

    #[test]
    fn missing_loop_hint_denies() {
        let text = "(policy (tier 1) (loop (id 1) (file a.t81) (line 1) (column 1) \
                     (annotated true) (depth 0) (bound infinite)))";
        let policy = parse_policy(text).unwrap();
        let engine = PolicyEngine::new(Some(policy));
        let verdict = engine.evaluate(&ctx(Opcode::Add, &[]));
        assert_eq!(verdict.kind, VerdictKind::Deny);
    }

    #[test]
    fn satisfied_loop_hint_allows() {
        let text = "(policy (tier 1) (loop (id 1) (file a.t81) (line 1) (column 1) \
                     (annotated true) (depth 0) (bound infinite)))";
        let policy = parse_policy(text).unwrap();
        let engine = PolicyEngine::new(Some(policy));
        let reasons = vec!["loop hint file=a.t81 line=1 column=1 bound=infinite".to_string()];
        let verdict = engine.evaluate(&ctx(Opcode::Add, &reasons));
        assert_eq!(verdict.kind, VerdictKind::Allow);
    }

    #[test]
    fn match_guard_only_enforced_on_halt() {
        let text = r#"(policy (tier 1) (require-match-guard (enum Shape) (variant Circle) (result pass)))"#;
        let policy = parse_policy(text).unwrap();
        let engine = PolicyEngine::new(Some(policy));
        assert_eq!(engine.evaluate(&ctx(Opcode::Add, &[])).kind, VerdictKind::Allow);
        assert_eq!(engine.evaluate(&ctx(Opcode::Halt, &[])).kind, VerdictKind::Deny);
    }
}
