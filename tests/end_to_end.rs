//! Black-box integration tests driving `tisc-vm` only through its public
//! `Interpreter`/`Program`/`State` API.

use tisc_vm::axion::{LoopBound, LoopHint};
use tisc_vm::error::Trap;
use tisc_vm::interpreter::{Interpreter, Status};
use tisc_vm::program::{pack_enum_variant_operand, EnumMeta, EnumVariantMeta, Insn, LiteralKind, Opcode, Program, ProgramMeta};
use tisc_vm::state::{SegmentSizes, ValueTag};

fn insn(opcode: Opcode, a: i32, b: i32, c: i32) -> Insn {
    Insn { opcode: opcode as u8, a, b, c, literal_kind: 0 }
}

fn load_imm(dst: i32, value: i32) -> Insn {
    Insn { opcode: Opcode::LoadImm as u8, a: dst, b: value, c: 0, literal_kind: LiteralKind::Int as u8 }
}

fn program_with(instructions: Vec<Insn>) -> Program {
    Program { instructions, ..Program::default() }
}

#[test]
fn simple_arithmetic_computes_and_halts_cleanly() {
    let program = program_with(vec![
        load_imm(1, 10),
        load_imm(2, 3),
        insn(Opcode::Div, 0, 1, 2),
        insn(Opcode::Halt, 0, 0, 0),
    ]);

    let mut vm = Interpreter::with_no_policy();
    vm.load(program, SegmentSizes::default()).unwrap();
    let status = vm.run_to_halt(100);

    assert_eq!(status, Status::Halted);
    assert_eq!(vm.state().registers[0], 3);
    assert!(vm.state().flags.positive);
    // One meta slot per instruction; instruction count is well under the
    // GC interval so no summary event is emitted.
    assert!(vm.state().reasons.iter().all(|r| !r.starts_with("interval stack_frames=")));
    assert!(vm.state().reasons.iter().filter(|r| r.starts_with("meta slot")).count() >= 4);
}

#[test]
fn divide_by_zero_traps_after_logging_the_two_loads() {
    let program = program_with(vec![
        load_imm(1, 10),
        load_imm(2, 0),
        insn(Opcode::Div, 0, 1, 2),
        insn(Opcode::Halt, 0, 0, 0),
    ]);

    let mut vm = Interpreter::with_no_policy();
    vm.load(program, SegmentSizes::default()).unwrap();
    let status = vm.run_to_halt(100);

    assert_eq!(status, Status::Trapped(Trap::DivideByZero));
    let meta_slots = vm.state().reasons.iter().filter(|r| r.starts_with("meta slot")).count();
    assert_eq!(meta_slots, 3);
}

#[test]
fn stack_alloc_past_the_segment_bound_reports_the_stack_start_address() {
    let sizes = SegmentSizes::default();
    let program = program_with(vec![
        insn(Opcode::StackAlloc, 0, sizes.stack as i32 + 1, 0),
        insn(Opcode::Halt, 0, 0, 0),
    ]);

    let mut vm = Interpreter::with_no_policy();
    vm.load(program, sizes).unwrap();
    let stack_start = vm.state().layout.stack.start;
    let status = vm.run_to_halt(100);

    assert_eq!(status, Status::Trapped(Trap::BoundsFault));
    let expected = format!("bounds fault segment=stack addr={stack_start} action=stack frame allocate");
    assert!(vm.state().reasons.iter().any(|r| r == &expected), "reasons: {:?}", vm.state().reasons);
}

#[test]
fn enum_guard_with_payload_round_trips_the_constructed_value() {
    let enum_id = 0;
    let blue_local = 1; // Color::{Red=0, Blue(i32)=1}
    let meta = EnumMeta {
        enum_id: enum_id as u32,
        name: "Color".to_string(),
        variants: vec![
            EnumVariantMeta { name: "Red".to_string(), payload_type: None },
            EnumVariantMeta { name: "Blue".to_string(), payload_type: Some("i32".to_string()) },
        ],
    };
    let guard = pack_enum_variant_operand(enum_id, blue_local);

    let program = Program {
        instructions: vec![
            load_imm(1, 9),                                  // r1 = 9 (payload)
            insn(Opcode::MakeEnumVariantPayload, 0, 1, guard), // r0 = Blue(9)
            insn(Opcode::EnumIsVariant, 2, 0, guard),          // r2 = matches?
            insn(Opcode::EnumUnwrapPayload, 3, 0, 0),          // r3 = 9
            insn(Opcode::Halt, 0, 0, 0),
        ],
        meta: ProgramMeta { enums: vec![meta], ..ProgramMeta::default() },
        ..Program::default()
    };

    let mut vm = Interpreter::with_no_policy();
    vm.load(program, SegmentSizes::default()).unwrap();
    let status = vm.run_to_halt(100);

    assert_eq!(status, Status::Halted);
    assert_eq!(vm.state().registers[2], 1);
    assert_eq!(vm.state().registers[3], 9);
    assert_eq!(vm.state().register_tags[3], ValueTag::Int);
    assert!(vm
        .state()
        .reasons
        .iter()
        .any(|r| r == "enum guard enum=Color variant=Blue payload=i32 match=pass"));
    assert!(vm.state().reasons.iter().any(|r| r == "enum payload enum=Color variant=Blue payload=i32"));
}

#[test]
fn policy_requiring_the_emitted_segment_event_allows_halt() {
    let program = program_with(vec![
        insn(Opcode::StackAlloc, 0, 16, 0),
        insn(Opcode::Halt, 0, 0, 0),
    ]);
    let mut meta = ProgramMeta::default();
    meta.policy_text =
        "(policy (tier 1) (require-segment-event (segment stack) (action \"stack frame allocated\")))".to_string();
    let program = Program { meta, ..program };

    let mut vm = Interpreter::with_no_policy();
    vm.load(program, SegmentSizes::default()).unwrap();
    let status = vm.run_to_halt(100);

    assert_eq!(status, Status::Halted);
}

#[test]
fn policy_requiring_a_segment_event_at_the_wrong_address_denies_on_halt() {
    let program = program_with(vec![
        insn(Opcode::StackAlloc, 0, 16, 0),
        insn(Opcode::Halt, 0, 0, 0),
    ]);
    let mut meta = ProgramMeta::default();
    meta.policy_text = "(policy (tier 1) (require-segment-event (segment stack) \
                         (action \"stack frame allocated\") (addr 9999)))"
        .to_string();
    let program = Program { meta, ..program };

    let mut vm = Interpreter::with_no_policy();
    vm.load(program, SegmentSizes::default()).unwrap();
    let status = vm.run_to_halt(100);

    assert_eq!(status, Status::Trapped(Trap::SecurityFault));
}

fn source_loop_hint() -> LoopHint {
    LoopHint {
        id: 1,
        file: "main.t81".to_string(),
        line: 4,
        column: 2,
        annotated: true,
        depth: 0,
        bound: LoopBound::Infinite,
    }
}

#[test]
fn loop_hint_policy_matching_the_source_allows_halt() {
    let program = program_with(vec![insn(Opcode::Halt, 0, 0, 0)]);
    let mut meta = ProgramMeta::default();
    meta.loop_hints = vec![source_loop_hint()];
    meta.policy_text = "(policy (tier 1) (loop (id 1) (file main.t81) (line 4) (column 2) \
                         (annotated true) (depth 0) (bound infinite)))"
        .to_string();
    let program = Program { meta, ..program };

    let mut vm = Interpreter::with_no_policy();
    vm.load(program, SegmentSizes::default()).unwrap();
    let status = vm.run_to_halt(100);

    assert_eq!(status, Status::Halted);
}

#[test]
fn loop_hint_policy_naming_a_second_hint_absent_from_the_source_denies_the_first_instruction() {
    let program = program_with(vec![insn(Opcode::Halt, 0, 0, 0)]);
    let mut meta = ProgramMeta::default();
    meta.loop_hints = vec![source_loop_hint()];
    meta.policy_text = "(policy (tier 1) \
                         (loop (id 1) (file main.t81) (line 4) (column 2) \
                         (annotated true) (depth 0) (bound infinite)) \
                         (loop (id 2) (file main.t81) (line 9) (column 1) \
                         (annotated true) (depth 1) (bound unknown)))"
        .to_string();
    let program = Program { meta, ..program };

    let mut vm = Interpreter::with_no_policy();
    vm.load(program, SegmentSizes::default()).unwrap();
    let status = vm.step();

    assert_eq!(status, Status::Trapped(Trap::SecurityFault));
}

#[test]
fn two_runs_of_the_same_program_produce_identical_logs_and_final_state() {
    let build = || {
        program_with(vec![
            load_imm(1, 10),
            load_imm(2, 3),
            insn(Opcode::Mul, 3, 1, 2),
            insn(Opcode::StackAlloc, 4, 8, 0),
            insn(Opcode::StackFree, 4, 8, 0),
            insn(Opcode::Halt, 0, 0, 0),
        ])
    };

    let mut first = Interpreter::with_no_policy();
    first.load(build(), SegmentSizes::default()).unwrap();
    first.run_to_halt(1000);

    let mut second = Interpreter::with_no_policy();
    second.load(build(), SegmentSizes::default()).unwrap();
    second.run_to_halt(1000);

    assert_eq!(first.state().reasons, second.state().reasons);
    assert_eq!(first.state().registers, second.state().registers);
    assert_eq!(first.state().sp, second.state().sp);
}

#[test]
fn balanced_stack_and_heap_frames_return_pointers_to_their_initial_values() {
    let program = program_with(vec![
        insn(Opcode::StackAlloc, 0, 8, 0),
        insn(Opcode::StackFree, 0, 8, 0),
        insn(Opcode::HeapAlloc, 1, 16, 0),
        insn(Opcode::HeapFree, 1, 16, 0),
        insn(Opcode::Halt, 0, 0, 0),
    ]);

    let sizes = SegmentSizes::default();
    let mut vm = Interpreter::with_no_policy();
    vm.load(program, sizes).unwrap();
    let initial_sp = vm.state().sp;
    let initial_heap_ptr = vm.state().heap_ptr;
    let status = vm.run_to_halt(100);

    assert_eq!(status, Status::Halted);
    assert!(vm.state().stack_frames.is_empty());
    assert!(vm.state().heap_frames.is_empty());
    assert_eq!(vm.state().sp, initial_sp);
    assert_eq!(vm.state().heap_ptr, initial_heap_ptr);
}
