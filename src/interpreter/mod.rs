//! The interpreter (C5): owns a loaded [`Program`] and its [`State`], and
//! drives execution one instruction at a time through [`Interpreter::step`]
//! or to completion through [`Interpreter::run_to_halt`].

use std::cmp::Ordering;

use crate::axion::{self, AxionEngine, Context, NoPolicyEngine, PolicyEngine, Verdict, VerdictKind};
use crate::consts::VM_REGISTER_COUNT;
use crate::error::{PolicyParseError, Trap};
use crate::program::{Insn, LiteralKind, Opcode, Program, Tensor};
use crate::state::{EnumValue, Flags, MemorySegmentKind, OptionValue, ResultValue, SegmentSizes, State, ValueTag};
use crate::trace;

/// Outcome of one [`Interpreter::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The instruction committed; the VM is ready for the next step.
    Ready,
    /// A `Halt` committed (or the program counter ran off the end of the
    /// instruction stream and the Axion engine allowed the implicit halt).
    Halted,
    /// Execution stopped on a trap; further `step` calls return the same
    /// trap again without mutating state.
    Trapped(Trap),
}

/// A loaded program plus its runtime state, stepped one instruction at a
/// time under the gate of an [`AxionEngine`].
pub struct Interpreter {
    program: Program,
    state: State,
    engine: Box<dyn AxionEngine>,
    instructions_since_gc: u64,
    trap: Option<Trap>,
}

impl Interpreter {
    /// Builds an interpreter with an empty program and the given default
    /// engine. [`Interpreter::load`] replaces the engine with a
    /// [`PolicyEngine`] if the loaded program carries policy text that
    /// parses successfully.
    pub fn new(engine: Box<dyn AxionEngine>) -> Self {
        Self {
            program: Program::default(),
            state: State::new(0, SegmentSizes::default()),
            engine,
            instructions_since_gc: 0,
            trap: None,
        }
    }

    /// Builds an interpreter that always allows, until a loaded program's
    /// policy text says otherwise.
    pub fn with_no_policy() -> Self {
        Self::new(Box::new(NoPolicyEngine))
    }

    /// Read-only access to the current state, e.g. for inspecting the
    /// axion log or final register contents after a run.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Read-only access to the loaded program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Loads a program: lays out a fresh [`State`], seeds its runtime
    /// float/fraction/tensor pools, and parses the program's policy text
    /// (if any). A policy parse failure is reported to the caller but
    /// does not prevent the program from loading — the program commits
    /// with an empty policy (`NoPolicyEngine`), and the caller decides
    /// whether to treat the returned error as fatal.
    pub fn load(&mut self, program: Program, sizes: SegmentSizes) -> Result<(), PolicyParseError> {
        let mut state = State::new(program.instructions.len(), sizes);
        state.seed_pools(&program);

        for hint in &program.meta.loop_hints {
            let reason = hint.expected_reason();
            state.push_event(Opcode::Nop, hint.id as i32, hint.depth, Verdict::allow(reason));
        }

        let mut engine: Box<dyn AxionEngine> = Box::new(NoPolicyEngine);
        let mut parse_result = Ok(());
        if !program.meta.policy_text.is_empty() {
            match axion::parse_policy(&program.meta.policy_text) {
                Ok(policy) => {
                    tracing::debug!(tier = policy.tier, "loaded axion policy, swapping in PolicyEngine");
                    engine = Box::new(PolicyEngine::new(Some(policy)));
                }
                Err(err) => {
                    tracing::warn!(%err, "policy text failed to parse; program loads with an empty policy");
                    parse_result = Err(err);
                }
            }
        }

        if !program.meta.match_metadata_text.is_empty() {
            let reason = format!("match metadata: {}", program.meta.match_metadata_text);
            state.push_event(Opcode::Nop, 0, 0, Verdict::allow(reason));
        }

        self.program = program;
        self.state = state;
        self.engine = engine;
        self.instructions_since_gc = 0;
        self.trap = None;
        parse_result
    }

    fn eval_axion(&self, pc: usize, opcode: Opcode) -> Verdict {
        let ctx = Context { next_opcode: opcode, pc, caller: "tisc-vm", trace_reasons: &self.state.reasons };
        self.engine.evaluate(&ctx)
    }

    /// Executes exactly one instruction, or the implicit halt once the
    /// program counter runs past the end of the instruction stream.
    ///
    /// Once a trap has been returned, further calls return the same trap
    /// without touching state again.
    pub fn step(&mut self) -> Status {
        if let Some(trap) = self.trap {
            return Status::Trapped(trap);
        }
        if self.state.halted {
            return Status::Halted;
        }
        if self.state.pc >= self.program.instructions.len() {
            let pc = self.state.pc;
            let verdict = self.eval_axion(pc, Opcode::Halt);
            let deny = verdict.kind == VerdictKind::Deny;
            trace::record_axion_event(&mut self.state, Opcode::Halt, 0, pc as i64, verdict);
            if deny {
                self.trap = Some(Trap::SecurityFault);
                return Status::Trapped(Trap::SecurityFault);
            }
            self.state.halted = true;
            return Status::Halted;
        }

        let pc = self.state.pc;
        self.state.pc += 1;
        let insn = self.program.instructions[pc];

        let opcode = match insn.decode_opcode() {
            Ok(op) => op,
            Err(trap) => {
                self.trap = Some(trap);
                return Status::Trapped(trap);
            }
        };

        tracing::trace!(pc, ?opcode, "stepping");

        let verdict = self.eval_axion(pc, opcode);
        let deny = verdict.kind == VerdictKind::Deny;
        trace::record_axion_event(&mut self.state, opcode, 0, pc as i64, verdict);
        if deny {
            self.trap = Some(Trap::SecurityFault);
            return Status::Trapped(Trap::SecurityFault);
        }

        let trap = self.execute(insn, opcode);

        trace::tick_gc_interval(&mut self.state, &mut self.instructions_since_gc);

        match trap {
            Some(t) => {
                self.trap = Some(t);
                Status::Trapped(t)
            }
            None => Status::Ready,
        }
    }

    /// Steps until halted, trapped, or `max_steps` instructions have run
    /// (whichever comes first). Returns the final status; `max_steps`
    /// exhausting without a halt or trap leaves the VM `Ready` for a
    /// further call.
    pub fn run_to_halt(&mut self, max_steps: u64) -> Status {
        let mut last = Status::Ready;
        for _ in 0..max_steps {
            last = self.step();
            if !matches!(last, Status::Ready) {
                return last;
            }
        }
        last
    }

    // -- register / memory helpers -----------------------------------

    fn reg_ok(r: i32) -> bool {
        r >= 0 && (r as usize) < VM_REGISTER_COUNT
    }

    fn mem_ok(&self, addr: i32) -> bool {
        if addr < 0 {
            return false;
        }
        let a = addr as usize;
        let layout = &self.state.layout;
        layout.stack.contains(a) || layout.heap.contains(a) || layout.tensor.contains(a) || layout.meta.contains(a)
    }

    fn set_reg(&mut self, r: i32, value: i64, tag: ValueTag) {
        self.state.registers[r as usize] = value;
        self.state.register_tags[r as usize] = tag;
    }

    fn copy_reg(&mut self, dst: i32, src: i32) {
        self.state.registers[dst as usize] = self.state.registers[src as usize];
        self.state.register_tags[dst as usize] = self.state.register_tags[src as usize];
    }

    fn update_flags(&mut self, value: i64) {
        self.state.flags = Flags::from_result(value);
    }

    fn push_stack(&mut self, value: i64, tag: ValueTag) -> Option<usize> {
        let stack = self.state.layout.stack;
        if self.state.sp <= stack.start {
            return None;
        }
        let new_sp = self.state.sp - 1;
        if !stack.contains(new_sp) {
            return None;
        }
        self.state.sp = new_sp;
        self.state.memory[new_sp] = value;
        self.state.memory_tags[new_sp] = tag;
        Some(new_sp)
    }

    fn pop_stack(&mut self) -> Option<(i64, ValueTag, usize)> {
        let stack = self.state.layout.stack;
        if self.state.sp >= stack.limit {
            return None;
        }
        let addr = self.state.sp;
        let value = self.state.memory[addr];
        let tag = self.state.memory_tags[addr];
        self.state.sp += 1;
        Some((value, tag, addr))
    }

    fn segment_for_address(&self, addr: i64) -> MemorySegmentKind {
        if addr < 0 {
            return MemorySegmentKind::Unknown;
        }
        self.state.layout.segment_of(addr as usize).unwrap_or(MemorySegmentKind::Unknown)
    }

    fn log_access(&mut self, opcode: Opcode, segment: MemorySegmentKind, addr: usize, size: usize, action: &str) {
        trace::log_memory_segment_access(&mut self.state, opcode, segment, addr, size, action);
    }

    fn log_fault(&mut self, opcode: Opcode, addr: i64, action: &str) {
        let segment = self.segment_for_address(addr);
        trace::log_bounds_fault(&mut self.state, opcode, segment, addr, action);
    }

    fn clamp_trit(value: i64) -> i64 {
        value.signum()
    }

    /// Compares two tagged values by the same rules the `Cmp`/`Less`/...
    /// family uses; `None` means the values can't be meaningfully ordered
    /// (dangling handle, or an enum comparison, which is never ordered).
    fn compare_value(&self, tag: ValueTag, lhs: i64, rhs: i64) -> Option<Ordering> {
        match tag {
            ValueTag::Int => Some(lhs.cmp(&rhs)),
            ValueTag::FloatHandle => {
                let l = self.state.float(lhs)?;
                let r = self.state.float(rhs)?;
                Some(if l == r {
                    Ordering::Equal
                } else if l < r {
                    Ordering::Less
                } else {
                    Ordering::Greater
                })
            }
            ValueTag::FractionHandle => {
                let l = self.state.fraction(lhs)?;
                let r = self.state.fraction(rhs)?;
                Some(crate::numeric::Fraction::cmp(&l, &r))
            }
            ValueTag::SymbolHandle => {
                let l = self.program.symbol(lhs as i32).ok()?;
                let r = self.program.symbol(rhs as i32).ok()?;
                Some(l.cmp(r))
            }
            ValueTag::TensorHandle | ValueTag::ShapeHandle | ValueTag::WeightsTensorHandle => {
                Some(lhs.cmp(&rhs))
            }
            ValueTag::OptionHandle => {
                let l = *self.state.options.get(lhs as usize)?;
                let r = *self.state.options.get(rhs as usize)?;
                if l.has_value != r.has_value {
                    return Some(if l.has_value { Ordering::Greater } else { Ordering::Less });
                }
                if !l.has_value {
                    return Some(Ordering::Equal);
                }
                if l.payload_tag != r.payload_tag {
                    return None;
                }
                self.compare_value(l.payload_tag, l.payload, r.payload)
            }
            ValueTag::ResultHandle => {
                let l = *self.state.results.get(lhs as usize)?;
                let r = *self.state.results.get(rhs as usize)?;
                if l.is_ok != r.is_ok {
                    return Some(if l.is_ok { Ordering::Greater } else { Ordering::Less });
                }
                if l.payload_tag != r.payload_tag {
                    return None;
                }
                self.compare_value(l.payload_tag, l.payload, r.payload)
            }
            ValueTag::EnumHandle => None,
        }
    }

    fn enum_variant_name(&self, enum_id: i32, local_index: i32) -> (Option<&str>, Option<&str>) {
        let meta = self.program.meta.enums.iter().find(|e| e.enum_id as i32 == enum_id);
        let variant = meta.and_then(|m| m.variants.get(local_index as usize));
        (meta.map(|m| m.name.as_str()), variant.map(|v| v.name.as_str()))
    }

    fn enum_payload_type(&self, enum_id: i32, local_index: i32) -> Option<&str> {
        let meta = self.program.meta.enums.iter().find(|e| e.enum_id as i32 == enum_id)?;
        meta.variants.get(local_index as usize)?.payload_type.as_deref()
    }

    /// Executes one already-fetched, already-Axion-cleared instruction.
    fn execute(&mut self, insn: Insn, opcode: Opcode) -> Option<Trap> {
        use Opcode::*;

        match opcode {
            Nop => {
                if insn.literal_kind == LiteralKind::SymbolHandle as u8 && insn.b > 0 {
                    if let Ok(name) = self.program.symbol(insn.b) {
                        let reason = name.to_string();
                        self.state.push_event(opcode, insn.b, 0, Verdict::allow(reason));
                    }
                }
                None
            }
            Halt => {
                self.state.halted = true;
                None
            }
            Trap => Some(crate::error::Trap::TrapInstruction),

            LoadImm => self.op_load_imm(insn),
            Mov => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                self.copy_reg(insn.a, insn.b);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            Inc | Dec => {
                if !Self::reg_ok(insn.a) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let delta = if opcode == Inc { 1 } else { -1 };
                self.state.registers[insn.a as usize] += delta;
                self.state.register_tags[insn.a as usize] = ValueTag::Int;
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            Neg => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let v = -self.state.registers[insn.b as usize];
                self.set_reg(insn.a, v, ValueTag::Int);
                self.update_flags(v);
                None
            }
            Add | Sub | Mul => self.op_int_binop(insn, opcode),
            Div | Mod => self.op_div_mod(insn, opcode),

            Load => self.op_load(insn),
            Store => self.op_store(insn),
            WeightsLoad => self.op_weights_load(insn),

            Jump => self.op_jump_abs(insn.a),
            JumpIfZero | JumpIfNotZero => self.op_jump_cond(insn, opcode),
            JumpIfNegative => {
                if self.state.flags.negative {
                    self.op_jump_abs(insn.a)
                } else {
                    None
                }
            }
            JumpIfPositive => {
                if self.state.flags.positive {
                    self.op_jump_abs(insn.a)
                } else {
                    None
                }
            }

            Less | LessEqual | Greater | GreaterEqual | Equal | NotEqual => self.op_relational(insn, opcode),
            Cmp => self.op_cmp(insn),
            SetF => {
                if !Self::reg_ok(insn.a) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let value = if self.state.flags.negative {
                    -1
                } else if !self.state.flags.zero {
                    1
                } else {
                    0
                };
                self.set_reg(insn.a, value, ValueTag::Int);
                self.update_flags(value);
                None
            }

            Push => self.op_push(insn),
            Pop => self.op_pop(insn),
            StackAlloc => self.op_stack_alloc(insn),
            StackFree => self.op_stack_free(insn),
            HeapAlloc => self.op_heap_alloc(insn),
            HeapFree => self.op_heap_free(insn),

            Call => self.op_call(insn),
            Ret => self.op_ret(),

            I2F => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let value = self.state.registers[insn.b as usize] as f64;
                let handle = self.state.alloc_float(value);
                self.set_reg(insn.a, handle, ValueTag::FloatHandle);
                None
            }
            F2I => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let value = self.state.float(self.state.registers[insn.b as usize])?;
                let v = value as i64;
                self.set_reg(insn.a, v, ValueTag::Int);
                self.update_flags(v);
                None
            }
            I2Frac => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let frac = crate::numeric::Fraction::from_int(self.state.registers[insn.b as usize]);
                let handle = self.state.alloc_fraction(frac);
                self.set_reg(insn.a, handle, ValueTag::FractionHandle);
                None
            }
            Frac2I => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let frac = self.state.fraction(self.state.registers[insn.b as usize])?;
                if frac.denominator() != 1 {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let v = frac.numerator();
                self.set_reg(insn.a, v, ValueTag::Int);
                self.update_flags(v);
                None
            }

            FAdd | FSub | FMul | FDiv => self.op_float_binop(insn, opcode),
            FracAdd | FracSub | FracMul | FracDiv => self.op_fraction_binop(insn, opcode),

            ChkShape => self.op_chk_shape(insn),

            MakeOptionSome => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let value = OptionValue {
                    has_value: true,
                    payload_tag: self.state.register_tags[insn.b as usize],
                    payload: self.state.registers[insn.b as usize],
                };
                let handle = self.state.intern_option(value);
                self.set_reg(insn.a, handle as i64, ValueTag::OptionHandle);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            MakeOptionNone => {
                if !Self::reg_ok(insn.a) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let handle = self.state.intern_option(OptionValue { has_value: false, payload_tag: ValueTag::Int, payload: 0 });
                self.set_reg(insn.a, handle as i64, ValueTag::OptionHandle);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            MakeResultOk | MakeResultErr => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let value = ResultValue {
                    is_ok: opcode == MakeResultOk,
                    payload_tag: self.state.register_tags[insn.b as usize],
                    payload: self.state.registers[insn.b as usize],
                };
                let handle = self.state.intern_result(value);
                self.set_reg(insn.a, handle as i64, ValueTag::ResultHandle);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            MakeEnumVariant => {
                if !Self::reg_ok(insn.a) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let (enum_id, local) = crate::program::unpack_enum_variant_operand(insn.b);
                let value = EnumValue {
                    variant_id: EnumValue::encode_variant_id(enum_id, local),
                    has_payload: false,
                    payload_tag: ValueTag::Int,
                    payload: 0,
                    enum_id,
                };
                let handle = self.state.intern_enum(value);
                self.set_reg(insn.a, handle as i64, ValueTag::EnumHandle);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            MakeEnumVariantPayload => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let (enum_id, local) = crate::program::unpack_enum_variant_operand(insn.c);
                let value = EnumValue {
                    variant_id: EnumValue::encode_variant_id(enum_id, local),
                    has_payload: true,
                    payload_tag: self.state.register_tags[insn.b as usize],
                    payload: self.state.registers[insn.b as usize],
                    enum_id,
                };
                let handle = self.state.intern_enum(value);
                self.set_reg(insn.a, handle as i64, ValueTag::EnumHandle);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            OptionIsSome => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                if self.state.register_tags[insn.b as usize] != ValueTag::OptionHandle {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let opt = *self.state.options.get(self.state.registers[insn.b as usize] as usize)?;
                self.set_reg(insn.a, opt.has_value as i64, ValueTag::Int);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            OptionUnwrap => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                if self.state.register_tags[insn.b as usize] != ValueTag::OptionHandle {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let opt = *self.state.options.get(self.state.registers[insn.b as usize] as usize)?;
                if !opt.has_value {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                self.set_reg(insn.a, opt.payload, opt.payload_tag);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            ResultIsOk => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                if self.state.register_tags[insn.b as usize] != ValueTag::ResultHandle {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let res = *self.state.results.get(self.state.registers[insn.b as usize] as usize)?;
                self.set_reg(insn.a, res.is_ok as i64, ValueTag::Int);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            ResultUnwrapOk | ResultUnwrapErr => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                if self.state.register_tags[insn.b as usize] != ValueTag::ResultHandle {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let res = *self.state.results.get(self.state.registers[insn.b as usize] as usize)?;
                let want_ok = opcode == ResultUnwrapOk;
                if res.is_ok != want_ok {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                self.set_reg(insn.a, res.payload, res.payload_tag);
                self.update_flags(self.state.registers[insn.a as usize]);
                None
            }
            EnumIsVariant => self.op_enum_is_variant(insn),
            EnumUnwrapPayload => self.op_enum_unwrap_payload(insn),

            TNot => {
                if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
                    return Some(crate::error::Trap::IllegalInstruction);
                }
                let t = Self::clamp_trit(self.state.registers[insn.b as usize]);
                self.set_reg(insn.a, -t, ValueTag::Int);
                self.update_flags(-t);
                None
            }
            TAnd | TOr | TXor => self.op_trit_binop(insn, opcode),

            AxRead => self.op_ax_read(insn),
            AxSet => self.op_ax_set(insn),
            AxVerify => self.op_ax_verify(insn),

            TVecAdd => self.op_tvec_add(insn),
            TMatMul => self.op_tmat_mul(insn),
            TTenDot => self.op_tten_dot(insn),
        }
    }

    fn op_load_imm(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let kind = match insn.decode_literal_kind() {
            Ok(k) => k,
            Err(trap) => return Some(trap),
        };
        let tag = match kind {
            LiteralKind::FloatHandle => ValueTag::FloatHandle,
            LiteralKind::FractionHandle => ValueTag::FractionHandle,
            LiteralKind::SymbolHandle => ValueTag::SymbolHandle,
            LiteralKind::WeightsTensorHandle => ValueTag::WeightsTensorHandle,
            LiteralKind::TensorHandle => ValueTag::TensorHandle,
            LiteralKind::ShapeHandle => ValueTag::ShapeHandle,
            LiteralKind::Int => ValueTag::Int,
        };
        if self.program.validate_literal(kind, insn.b).is_err() {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        self.set_reg(insn.a, insn.b as i64, tag);
        self.update_flags(self.state.registers[insn.a as usize]);
        None
    }

    fn op_int_binop(&mut self, insn: Insn, opcode: Opcode) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) || !Self::reg_ok(insn.c) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let lhs = self.state.registers[insn.b as usize];
        let rhs = self.state.registers[insn.c as usize];
        let value = match opcode {
            Opcode::Add => lhs.wrapping_add(rhs),
            Opcode::Sub => lhs.wrapping_sub(rhs),
            Opcode::Mul => lhs.wrapping_mul(rhs),
            _ => unreachable!(),
        };
        self.set_reg(insn.a, value, ValueTag::Int);
        self.update_flags(value);
        None
    }

    fn op_div_mod(&mut self, insn: Insn, opcode: Opcode) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) || !Self::reg_ok(insn.c) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let divisor = self.state.registers[insn.c as usize];
        if divisor == 0 {
            return Some(crate::error::Trap::DivideByZero);
        }
        let lhs = self.state.registers[insn.b as usize];
        let value = if opcode == Opcode::Div { lhs / divisor } else { lhs % divisor };
        self.set_reg(insn.a, value, ValueTag::Int);
        self.update_flags(value);
        None
    }

    fn op_load(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) {
            return Some(crate::error::Trap::InvalidMemory);
        }
        if !self.mem_ok(insn.b) {
            self.log_fault(Opcode::Load, insn.b as i64, "memory load");
            return Some(crate::error::Trap::InvalidMemory);
        }
        let addr = insn.b as usize;
        self.state.registers[insn.a as usize] = self.state.memory[addr];
        self.state.register_tags[insn.a as usize] = self.state.memory_tags[addr];
        let segment = self.segment_for_address(addr as i64);
        self.log_access(Opcode::Load, segment, addr, 1, "memory load");
        self.update_flags(self.state.registers[insn.a as usize]);
        None
    }

    fn op_store(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.b) {
            return Some(crate::error::Trap::InvalidMemory);
        }
        if !self.mem_ok(insn.a) {
            self.log_fault(Opcode::Store, insn.a as i64, "memory store");
            return Some(crate::error::Trap::InvalidMemory);
        }
        let addr = insn.a as usize;
        self.state.memory[addr] = self.state.registers[insn.b as usize];
        self.state.memory_tags[addr] = self.state.register_tags[insn.b as usize];
        let segment = self.segment_for_address(addr as i64);
        self.log_access(Opcode::Store, segment, addr, 1, "memory store");
        None
    }

    fn op_weights_load(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let name = match self.program.symbol(insn.b) {
            Ok(s) => s.to_string(),
            Err(_) => return Some(crate::error::Trap::IllegalInstruction),
        };
        let handle = self.program.meta.weights.get(&name).copied().unwrap_or(0);
        self.set_reg(insn.a, handle as i64, ValueTag::WeightsTensorHandle);
        None
    }

    fn op_jump_abs(&mut self, target: i32) -> Option<Trap> {
        if target < 0 || (target as usize) >= self.program.instructions.len() {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        self.state.pc = target as usize;
        None
    }

    fn op_jump_cond(&mut self, insn: Insn, opcode: Opcode) -> Option<Trap> {
        if !Self::reg_ok(insn.b) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let value = self.state.registers[insn.b as usize];
        let take = if opcode == Opcode::JumpIfZero { value == 0 } else { value != 0 };
        if take {
            return self.op_jump_abs(insn.a);
        }
        None
    }

    fn op_relational(&mut self, insn: Insn, opcode: Opcode) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) || !Self::reg_ok(insn.c) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let tag_b = self.state.register_tags[insn.b as usize];
        let tag_c = self.state.register_tags[insn.c as usize];
        if tag_b != tag_c {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let relation = self.compare_value(tag_b, self.state.registers[insn.b as usize], self.state.registers[insn.c as usize])?;
        let result = match opcode {
            Opcode::Less => relation == Ordering::Less,
            Opcode::LessEqual => relation != Ordering::Greater,
            Opcode::Greater => relation == Ordering::Greater,
            Opcode::GreaterEqual => relation != Ordering::Less,
            Opcode::Equal => relation == Ordering::Equal,
            Opcode::NotEqual => relation != Ordering::Equal,
            _ => unreachable!(),
        };
        self.set_reg(insn.a, result as i64, ValueTag::Int);
        self.update_flags(self.state.registers[insn.a as usize]);
        None
    }

    fn op_cmp(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let tag_a = self.state.register_tags[insn.a as usize];
        let tag_b = self.state.register_tags[insn.b as usize];
        if tag_a != tag_b {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let relation = self.compare_value(tag_a, self.state.registers[insn.a as usize], self.state.registers[insn.b as usize])?;
        self.state.flags = Flags {
            zero: relation == Ordering::Equal,
            negative: relation == Ordering::Less,
            positive: relation == Ordering::Greater,
        };
        None
    }

    fn op_push(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let value = self.state.registers[insn.a as usize];
        let tag = self.state.register_tags[insn.a as usize];
        let addr = self.push_stack(value, tag)?;
        self.log_access(Opcode::Push, MemorySegmentKind::Stack, addr, 1, "stack push");
        None
    }

    fn op_pop(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let (value, tag, addr) = self.pop_stack()?;
        self.state.registers[insn.a as usize] = value;
        self.state.register_tags[insn.a as usize] = tag;
        self.update_flags(value);
        self.log_access(Opcode::Pop, MemorySegmentKind::Stack, addr, 1, "stack pop");
        None
    }

    fn op_stack_alloc(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || insn.b < 0 {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let stack = self.state.layout.stack;
        let size = insn.b as usize;
        let available = self.state.sp - stack.start;
        if size > available {
            self.log_fault(Opcode::StackAlloc, stack.start as i64, "stack frame allocate");
            return Some(crate::error::Trap::BoundsFault);
        }
        let new_sp = self.state.sp - size;
        self.state.stack_frames.push((new_sp as i64, size as i64));
        self.state.sp = new_sp;
        self.set_reg(insn.a, new_sp as i64, ValueTag::Int);
        self.update_flags(new_sp as i64);
        self.log_access(Opcode::StackAlloc, MemorySegmentKind::Stack, new_sp, size, "stack frame allocated");
        None
    }

    fn op_stack_free(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || insn.b < 0 {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let stack = self.state.layout.stack;
        let size = insn.b as i64;
        let ptr = self.state.registers[insn.a as usize];
        if self.state.stack_frames.is_empty() {
            self.log_fault(Opcode::StackFree, self.state.sp as i64, "stack frame free");
            return Some(crate::error::Trap::BoundsFault);
        }
        if ptr < 0 || !stack.contains(ptr as usize) {
            self.log_fault(Opcode::StackFree, ptr, "stack frame free");
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let &(expected_addr, expected_size) = self.state.stack_frames.last().unwrap();
        if expected_addr != ptr || expected_size != size {
            self.log_fault(Opcode::StackFree, ptr, "stack frame free");
            return Some(crate::error::Trap::IllegalInstruction);
        }
        self.state.stack_frames.pop();
        self.state.sp = (ptr + size) as usize;
        self.log_access(Opcode::StackFree, MemorySegmentKind::Stack, ptr as usize, size as usize, "stack frame freed");
        None
    }

    fn op_heap_alloc(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || insn.b < 0 {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let heap = self.state.layout.heap;
        let size = insn.b as usize;
        if size > heap.size() {
            self.log_fault(Opcode::HeapAlloc, heap.limit as i64, "heap block allocate");
            return Some(crate::error::Trap::BoundsFault);
        }
        let addr = self.state.heap_ptr;
        if addr < heap.start || addr + size > heap.limit {
            self.log_fault(Opcode::HeapAlloc, addr as i64, "heap block allocate");
            return Some(crate::error::Trap::BoundsFault);
        }
        self.state.heap_frames.push((addr as i64, size as i64));
        self.state.heap_ptr = addr + size;
        self.set_reg(insn.a, addr as i64, ValueTag::Int);
        self.update_flags(addr as i64);
        self.log_access(Opcode::HeapAlloc, MemorySegmentKind::Heap, addr, size, "heap block allocated");
        None
    }

    fn op_heap_free(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || insn.b < 0 {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let heap = self.state.layout.heap;
        let size = insn.b as i64;
        let ptr = self.state.registers[insn.a as usize];
        if self.state.heap_frames.is_empty() {
            self.log_fault(Opcode::HeapFree, self.state.heap_ptr as i64, "heap block free");
            return Some(crate::error::Trap::BoundsFault);
        }
        if ptr < 0 || !heap.contains(ptr as usize) {
            self.log_fault(Opcode::HeapFree, ptr, "heap block free");
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let &(expected_addr, expected_size) = self.state.heap_frames.last().unwrap();
        if expected_addr != ptr || expected_size != size {
            self.log_fault(Opcode::HeapFree, ptr, "heap block free");
            return Some(crate::error::Trap::IllegalInstruction);
        }
        self.state.heap_frames.pop();
        self.state.heap_ptr = ptr as usize;
        self.log_access(Opcode::HeapFree, MemorySegmentKind::Heap, ptr as usize, size as usize, "heap block freed");
        None
    }

    fn op_call(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.b) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let target = self.state.registers[insn.b as usize];
        if target < 0 || (target as usize) >= self.program.instructions.len() {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let return_pc = self.state.pc as i64;
        self.push_stack(return_pc, ValueTag::Int)?;
        self.state.pc = target as usize;
        None
    }

    fn op_ret(&mut self) -> Option<Trap> {
        let (addr, tag, _) = self.pop_stack()?;
        if tag != ValueTag::Int {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        if addr < 0 || (addr as usize) >= self.program.instructions.len() {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        self.state.pc = addr as usize;
        None
    }

    fn op_float_binop(&mut self, insn: Insn, opcode: Opcode) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) || !Self::reg_ok(insn.c) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let lhs = self.state.float(self.state.registers[insn.b as usize])?;
        let rhs = self.state.float(self.state.registers[insn.c as usize])?;
        let result = match opcode {
            Opcode::FAdd => lhs + rhs,
            Opcode::FSub => lhs - rhs,
            Opcode::FMul => lhs * rhs,
            Opcode::FDiv => {
                if rhs == 0.0 {
                    return Some(crate::error::Trap::DivideByZero);
                }
                lhs / rhs
            }
            _ => unreachable!(),
        };
        let handle = self.state.alloc_float(result);
        self.set_reg(insn.a, handle, ValueTag::FloatHandle);
        self.update_flags(handle);
        None
    }

    fn op_fraction_binop(&mut self, insn: Insn, opcode: Opcode) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) || !Self::reg_ok(insn.c) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let lhs = self.state.fraction(self.state.registers[insn.b as usize])?;
        let rhs = self.state.fraction(self.state.registers[insn.c as usize])?;
        let result = match opcode {
            Opcode::FracAdd => crate::numeric::Fraction::add(lhs, rhs),
            Opcode::FracSub => crate::numeric::Fraction::sub(lhs, rhs),
            Opcode::FracMul => crate::numeric::Fraction::mul(lhs, rhs),
            Opcode::FracDiv => {
                if rhs.is_zero() {
                    return Some(crate::error::Trap::DivideByZero);
                }
                crate::numeric::Fraction::div(lhs, rhs)
            }
            _ => unreachable!(),
        };
        let handle = self.state.alloc_fraction(result);
        self.set_reg(insn.a, handle, ValueTag::FractionHandle);
        self.update_flags(handle);
        None
    }

    fn op_chk_shape(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) || !Self::reg_ok(insn.c) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        if self.state.register_tags[insn.b as usize] != ValueTag::TensorHandle
            || self.state.register_tags[insn.c as usize] != ValueTag::ShapeHandle
        {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let tensor_handle = self.state.registers[insn.b as usize];
        let tensor = match self.state.tensor(tensor_handle) {
            Some(t) => t.shape.clone(),
            None => {
                self.log_fault(Opcode::ChkShape, tensor_handle, "tensor handle access");
                return Some(crate::error::Trap::IllegalInstruction);
            }
        };
        let expected = match self.program.shape(self.state.registers[insn.c as usize] as i32) {
            Ok(s) => s.to_vec(),
            Err(_) => return Some(crate::error::Trap::IllegalInstruction),
        };
        let matches = tensor == expected;
        self.set_reg(insn.a, matches as i64, ValueTag::Int);
        self.update_flags(self.state.registers[insn.a as usize]);
        None
    }

    fn op_enum_is_variant(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        if self.state.register_tags[insn.b as usize] != ValueTag::EnumHandle {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let val = *self.state.enums.get(self.state.registers[insn.b as usize] as usize)?;
        let (guard_enum_id, guard_local) = crate::program::unpack_enum_variant_operand(insn.c);
        let matches = val.variant_id == EnumValue::encode_variant_id(guard_enum_id, guard_local);
        self.set_reg(insn.a, matches as i64, ValueTag::Int);
        self.update_flags(self.state.registers[insn.a as usize]);

        let (enum_name, variant_name) = self.enum_variant_name(guard_enum_id, guard_local);
        let payload = self.enum_payload_type(guard_enum_id, guard_local);
        let mut reason = String::from("enum guard");
        if let Some(name) = enum_name {
            reason.push_str(&format!(" enum={name}"));
        }
        if let Some(name) = variant_name {
            reason.push_str(&format!(" variant={name}"));
            if let Some(p) = payload {
                reason.push_str(&format!(" payload={p}"));
            }
        }
        reason.push_str(if matches { " match=pass" } else { " match=fail" });
        let verdict = Verdict::allow(reason);
        trace::record_axion_event(&mut self.state, Opcode::EnumIsVariant, insn.c, matches as i64, verdict);
        None
    }

    fn op_enum_unwrap_payload(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        if self.state.register_tags[insn.b as usize] != ValueTag::EnumHandle {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let val = *self.state.enums.get(self.state.registers[insn.b as usize] as usize)?;
        if !val.has_payload {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        self.set_reg(insn.a, val.payload, val.payload_tag);
        self.update_flags(self.state.registers[insn.a as usize]);

        let (enum_id, local) = EnumValue::decode_variant_id(val.variant_id);
        let (enum_name, variant_name) = self.enum_variant_name(enum_id, local);
        let payload_type = self.enum_payload_type(enum_id, local);
        let mut reason = String::from("enum payload");
        if let Some(name) = enum_name {
            reason.push_str(&format!(" enum={name}"));
        }
        if let Some(name) = variant_name {
            reason.push_str(&format!(" variant={name}"));
            if let Some(p) = payload_type {
                reason.push_str(&format!(" payload={p}"));
            }
        }
        let verdict = Verdict::allow(reason);
        trace::record_axion_event(&mut self.state, Opcode::EnumUnwrapPayload, val.variant_id as i32, val.payload, verdict);
        None
    }

    fn op_trit_binop(&mut self, insn: Insn, opcode: Opcode) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) || !Self::reg_ok(insn.c) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let lhs = Self::clamp_trit(self.state.registers[insn.b as usize]);
        let rhs = Self::clamp_trit(self.state.registers[insn.c as usize]);
        let result = match opcode {
            Opcode::TAnd => lhs.min(rhs),
            Opcode::TOr => lhs.max(rhs),
            Opcode::TXor => (lhs - rhs).clamp(-1, 1),
            _ => unreachable!(),
        };
        self.set_reg(insn.a, result, ValueTag::Int);
        self.update_flags(result);
        None
    }

    fn op_ax_read(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let mut verdict = self.eval_axion(self.state.pc, Opcode::AxRead);
        let guard_addr = insn.b as i64;
        let guard_kind = self.segment_for_address(guard_addr);
        apply_segment_reason(&mut verdict, "AxRead guard", guard_kind, guard_addr);
        if verdict.kind == VerdictKind::Deny {
            trace::record_axion_event(&mut self.state, Opcode::AxRead, insn.b, 0, verdict);
            return Some(crate::error::Trap::SecurityFault);
        }
        self.set_reg(insn.a, insn.b as i64, ValueTag::Int);
        self.update_flags(self.state.registers[insn.a as usize]);
        let value = self.state.registers[insn.a as usize];
        trace::record_axion_event(&mut self.state, Opcode::AxRead, insn.b, value, verdict);
        None
    }

    fn op_ax_set(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let value = self.state.registers[insn.b as usize];
        let mut verdict = self.eval_axion(self.state.pc, Opcode::AxSet);
        let guard_value = self.state.registers[insn.a as usize];
        let guard_kind = if guard_value >= 0 { self.segment_for_address(guard_value) } else { MemorySegmentKind::Unknown };
        let guard_addr = if guard_value >= 0 { guard_value } else { 0 };
        apply_segment_reason(&mut verdict, "AxSet guard", guard_kind, guard_addr);
        let deny = verdict.kind == VerdictKind::Deny;
        trace::record_axion_event(&mut self.state, Opcode::AxSet, insn.a, value, verdict);
        if deny {
            return Some(crate::error::Trap::SecurityFault);
        }
        None
    }

    fn op_ax_verify(&mut self, insn: Insn) -> Option<Trap> {
        if !Self::reg_ok(insn.a) {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let verdict = self.eval_axion(self.state.pc, Opcode::AxVerify);
        if verdict.kind == VerdictKind::Deny {
            trace::record_axion_event(&mut self.state, Opcode::AxVerify, insn.b, 0, verdict);
            return Some(crate::error::Trap::SecurityFault);
        }
        let value = if verdict.kind == VerdictKind::Defer { 1 } else { 0 };
        self.set_reg(insn.a, value, ValueTag::Int);
        self.update_flags(value);
        trace::record_axion_event(&mut self.state, Opcode::AxVerify, insn.b, value, verdict);
        None
    }

    fn op_tvec_add(&mut self, insn: Insn) -> Option<Trap> {
        let (ta, tb) = self.tensor_operands(insn)?;
        if ta.shape.len() != 1 || tb.shape.len() != 1 || ta.shape[0] != tb.shape[0] {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let data: Vec<f32> = ta.data.iter().zip(tb.data.iter()).map(|(a, b)| a + b).collect();
        let result = Tensor { shape: vec![ta.shape[0]], data };
        let handle = self.state.alloc_tensor(result);
        self.log_access(Opcode::Nop, MemorySegmentKind::Tensor, handle as usize, 1, "tensor slot allocated");
        self.set_reg(insn.a, handle as i64, ValueTag::TensorHandle);
        None
    }

    fn op_tmat_mul(&mut self, insn: Insn) -> Option<Trap> {
        let (ta, tb) = self.tensor_operands(insn)?;
        if ta.shape.len() != 2 || tb.shape.len() != 2 {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let (m, k) = (ta.shape[0], ta.shape[1]);
        if tb.shape[0] != k {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let n = tb.shape[1];
        let (m_u, k_u, n_u) = (m as usize, k as usize, n as usize);
        let mut data = vec![0.0f32; m_u * n_u];
        for i in 0..m_u {
            for j in 0..n_u {
                let mut sum = 0.0f32;
                for z in 0..k_u {
                    sum += ta.data[i * k_u + z] * tb.data[z * n_u + j];
                }
                data[i * n_u + j] = sum;
            }
        }
        let result = Tensor { shape: vec![m, n], data };
        let handle = self.state.alloc_tensor(result);
        self.log_access(Opcode::Nop, MemorySegmentKind::Tensor, handle as usize, 1, "tensor slot allocated");
        self.set_reg(insn.a, handle as i64, ValueTag::TensorHandle);
        None
    }

    fn op_tten_dot(&mut self, insn: Insn) -> Option<Trap> {
        let (ta, tb) = self.tensor_operands(insn)?;
        if ta.data.len() != tb.data.len() {
            return Some(crate::error::Trap::IllegalInstruction);
        }
        let sum: f32 = ta.data.iter().zip(tb.data.iter()).map(|(a, b)| a * b).sum();
        let result = Tensor { shape: Vec::new(), data: vec![sum] };
        let handle = self.state.alloc_tensor(result);
        self.log_access(Opcode::Nop, MemorySegmentKind::Tensor, handle as usize, 1, "tensor slot allocated");
        self.set_reg(insn.a, handle as i64, ValueTag::TensorHandle);
        None
    }

    fn tensor_operands(&mut self, insn: Insn) -> Option<(Tensor, Tensor)> {
        if !Self::reg_ok(insn.a) || !Self::reg_ok(insn.b) || !Self::reg_ok(insn.c) {
            return None;
        }
        let handle_b = self.state.registers[insn.b as usize];
        let ta = match self.state.tensor(handle_b) {
            Some(t) => t.clone(),
            None => {
                self.log_fault(Opcode::TVecAdd, handle_b, "tensor handle access");
                return None;
            }
        };
        let handle_c = self.state.registers[insn.c as usize];
        let tb = match self.state.tensor(handle_c) {
            Some(t) => t.clone(),
            None => {
                self.log_fault(Opcode::TVecAdd, handle_c, "tensor handle access");
                return None;
            }
        };
        Some((ta, tb))
    }
}

fn apply_segment_reason(verdict: &mut Verdict, action: &str, kind: MemorySegmentKind, addr: i64) {
    let mut reason = format!("{action} segment={} addr={addr}", kind.as_str());
    if !verdict.reason.is_empty() {
        reason.push(' ');
        reason.push_str(&verdict.reason);
    }
    verdict.reason = reason;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Insn, Program};

    fn insn(opcode: Opcode, a: i32, b: i32, c: i32) -> Insn {
        Insn { opcode: opcode as u8, a, b, c, literal_kind: 0 }
    }

    fn program_with(instructions: Vec<Insn>) -> Program {
        Program { instructions, ..Program::default() }
    }

    #[test]
    fn loadimm_add_halt_computes_and_halts() {
        let program = program_with(vec![
            Insn { opcode: Opcode::LoadImm as u8, a: 0, b: 2, c: 0, literal_kind: LiteralKind::Int as u8 },
            Insn { opcode: Opcode::LoadImm as u8, a: 1, b: 3, c: 0, literal_kind: LiteralKind::Int as u8 },
            insn(Opcode::Add, 2, 0, 1),
            insn(Opcode::Halt, 0, 0, 0),
        ]);
        let mut vm = Interpreter::with_no_policy();
        vm.load(program, SegmentSizes::default()).unwrap();
        let status = vm.run_to_halt(100);
        assert_eq!(status, Status::Halted);
        assert_eq!(vm.state().registers[2], 5);
    }

    #[test]
    fn division_by_zero_traps() {
        let program = program_with(vec![
            Insn { opcode: Opcode::LoadImm as u8, a: 0, b: 4, c: 0, literal_kind: LiteralKind::Int as u8 },
            Insn { opcode: Opcode::LoadImm as u8, a: 1, b: 0, c: 0, literal_kind: LiteralKind::Int as u8 },
            insn(Opcode::Div, 2, 0, 1),
        ]);
        let mut vm = Interpreter::with_no_policy();
        vm.load(program, SegmentSizes::default()).unwrap();
        let status = vm.run_to_halt(100);
        assert_eq!(status, Status::Trapped(crate::error::Trap::DivideByZero));
    }

    #[test]
    fn push_pop_round_trips_through_the_stack() {
        let program = program_with(vec![
            Insn { opcode: Opcode::LoadImm as u8, a: 0, b: 7, c: 0, literal_kind: LiteralKind::Int as u8 },
            insn(Opcode::Push, 0, 0, 0),
            insn(Opcode::Pop, 1, 0, 0),
            insn(Opcode::Halt, 0, 0, 0),
        ]);
        let mut vm = Interpreter::with_no_policy();
        vm.load(program, SegmentSizes::default()).unwrap();
        vm.run_to_halt(100);
        assert_eq!(vm.state().registers[1], 7);
    }

    #[test]
    fn stack_free_out_of_lifo_order_traps_illegal_instruction() {
        let program = program_with(vec![
            Insn { opcode: Opcode::StackAlloc as u8, a: 0, b: 4, c: 0, literal_kind: 0 },
            Insn { opcode: Opcode::StackAlloc as u8, a: 1, b: 4, c: 0, literal_kind: 0 },
            Insn { opcode: Opcode::StackFree as u8, a: 0, b: 4, c: 0, literal_kind: 0 },
        ]);
        let mut vm = Interpreter::with_no_policy();
        vm.load(program, SegmentSizes::default()).unwrap();
        let status = vm.run_to_halt(100);
        assert_eq!(status, Status::Trapped(crate::error::Trap::IllegalInstruction));
    }

    #[test]
    fn trap_opcode_halts_with_trap_instruction() {
        let program = program_with(vec![insn(Opcode::Trap, 0, 0, 0)]);
        let mut vm = Interpreter::with_no_policy();
        vm.load(program, SegmentSizes::default()).unwrap();
        let status = vm.run_to_halt(1);
        assert_eq!(status, Status::Trapped(crate::error::Trap::TrapInstruction));
    }

    #[test]
    fn instruction_count_engine_denies_once_budget_is_spent() {
        let program = program_with(vec![insn(Opcode::Nop, 0, 0, 0), insn(Opcode::Nop, 0, 0, 0)]);
        let mut vm = Interpreter::new(Box::new(crate::axion::InstructionCountEngine::new(1)));
        vm.load(program, SegmentSizes::default()).unwrap();
        let status = vm.run_to_halt(100);
        assert_eq!(status, Status::Trapped(crate::error::Trap::SecurityFault));
    }

    #[test]
    fn gc_interval_emits_a_trap_tagged_summary_event() {
        let mut instructions = vec![];
        for _ in 0..crate::consts::GC_INTERVAL {
            instructions.push(insn(Opcode::Nop, 0, 0, 0));
        }
        let program = program_with(instructions);
        let mut vm = Interpreter::with_no_policy();
        vm.load(program, SegmentSizes::default()).unwrap();
        vm.run_to_halt(crate::consts::GC_INTERVAL);
        assert!(vm.state().reasons.iter().any(|r| r.starts_with("interval stack_frames=")));
    }
}
