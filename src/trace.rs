//! Trace and GC emitter (C6): the only path into the axion log.
//!
//! Every public function here ends by calling [`record_axion_event`],
//! which always consumes one meta slot before appending the caller's own
//! event — this ordering is observable, and policies counting meta
//! events rely on it.

use crate::axion::{Verdict, VerdictKind};
use crate::consts::GC_INTERVAL;
use crate::program::Opcode;
use crate::state::{AxionEvent, MemorySegmentKind, State};

/// Consumes one meta slot (if the meta segment isn't already full) and
/// appends a `meta slot <label> segment=meta addr=<N>` reason directly,
/// bypassing [`record_axion_event`] to avoid infinite recursion.
fn log_meta_slot(state: &mut State, label: &str) {
    if !state.layout.meta.contains(state.meta_ptr) {
        return;
    }
    let reason = format!("meta slot {label} segment=meta addr={}", state.meta_ptr);
    state.reasons.push(reason.clone());
    state.axion_log.push(AxionEvent {
        opcode: Opcode::Nop,
        tag: MemorySegmentKind::Meta as i32,
        value: state.meta_ptr as i64,
        verdict: Verdict { kind: VerdictKind::Allow, reason },
    });
    state.meta_ptr += 1;
}

/// Records one axion log entry: first a meta slot, then the caller's own
/// event.
pub fn record_axion_event(state: &mut State, opcode: Opcode, tag: i32, value: i64, verdict: Verdict) {
    log_meta_slot(state, "axion event");
    state.push_event(opcode, tag, value, verdict);
}

/// Logs a successful memory access: `<action> <segment> addr=<A> size=<S>`.
pub fn log_memory_segment_access(
    state: &mut State,
    opcode: Opcode,
    segment: MemorySegmentKind,
    addr: usize,
    size: usize,
    action: &str,
) {
    let reason = format!("{action} {} addr={addr} size={size}", segment.as_str());
    record_axion_event(state, opcode, segment as i32, addr as i64, Verdict::allow(reason));
}

/// Logs a bounds violation: `bounds fault segment=<S> addr=<A> action=<text>`.
pub fn log_bounds_fault(
    state: &mut State,
    opcode: Opcode,
    segment: MemorySegmentKind,
    addr: i64,
    action: &str,
) {
    let reason = format!("bounds fault segment={} addr={addr} action={action}", segment.as_str());
    record_axion_event(state, opcode, segment as i32, addr, Verdict::allow(reason));
}

/// Ticks the GC-interval counter; every [`GC_INTERVAL`] instructions,
/// emits the periodic summary reason and resets the counter. No heap is
/// actually reclaimed — this is a policy hook point.
pub fn tick_gc_interval(state: &mut State, instructions_since_gc: &mut u64) {
    *instructions_since_gc += 1;
    if *instructions_since_gc < GC_INTERVAL {
        return;
    }
    *instructions_since_gc = 0;
    state.gc_counter += 1;
    let reason = format!(
        "interval stack_frames={} heap_frames={} heap_ptr={} tensor_slots={} meta_space={}",
        state.stack_frames.len(),
        state.heap_frames.len(),
        state.heap_ptr,
        state.tensors.len().saturating_sub(1),
        state.layout.meta.size(),
    );
    record_axion_event(state, Opcode::Trap, state.gc_counter as i32, state.gc_counter as i64, Verdict::allow(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SegmentSizes;

    #[test]
    fn record_axion_event_always_logs_a_meta_slot_first() {
        let mut state = State::new(0, SegmentSizes { stack: 1, heap: 1, tensor: 1, meta: 4 });
        record_axion_event(&mut state, Opcode::Nop, 0, 0, Verdict::allow("test event"));
        assert_eq!(state.axion_log.len(), 2);
        assert!(state.reasons[0].starts_with("meta slot axion event"));
        assert_eq!(state.reasons[1], "test event");
    }

    #[test]
    fn meta_slot_is_skipped_once_the_meta_segment_is_full() {
        let mut state = State::new(0, SegmentSizes { stack: 1, heap: 1, tensor: 1, meta: 1 });
        record_axion_event(&mut state, Opcode::Nop, 0, 0, Verdict::allow("first"));
        record_axion_event(&mut state, Opcode::Nop, 0, 0, Verdict::allow("second"));
        // First call consumes the only meta slot; the second call's meta
        // slot is skipped since the segment is now full.
        assert_eq!(state.axion_log.len(), 3);
        assert_eq!(state.reasons[2], "second");
    }

    #[test]
    fn gc_interval_fires_after_the_configured_instruction_count() {
        let mut state = State::new(0, SegmentSizes::default());
        let mut counter = 0u64;
        for _ in 0..GC_INTERVAL - 1 {
            tick_gc_interval(&mut state, &mut counter);
        }
        assert!(state.axion_log.is_empty());
        tick_gc_interval(&mut state, &mut counter);
        assert!(state.reasons.iter().any(|r| r.starts_with("interval stack_frames=")));
        assert_eq!(counter, 0);
    }
}
