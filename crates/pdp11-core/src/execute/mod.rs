//! Instruction execution.
//!
//! [`Cpu::step`] is the whole engine: it services the event queue, takes the
//! highest pending trap or interrupt, and otherwise executes one
//! instruction. An instruction aborts by returning `Err(TrapKind)`; the
//! condition codes are restored, the trap is posted, and the register
//! auto-modifications already made stay visible through MMR1.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::similar_names,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    unknown_lints,
    missing_docs
)]

mod eis;
mod flags;
mod helpers;

use tracing::{event, Level};

use crate::api::{EventQueue, StepOutcome};
use crate::cpu::Cpu;
use crate::decoder::{
    BranchCondition, Decoder, DoubleOp, EisOp, Instruction, Operand, SingleOp,
};
use crate::disasm::disassemble_one;
use crate::memory::Width;
use crate::mmu::{Access, Space};
use crate::state::{GeneralRegister, HaltReason, Mode, ProcessorStatus, RunState};
use crate::TrapKind;

use self::flags::Flags;
use self::helpers::Location;

impl Cpu {
    /// Runs one engine iteration.
    ///
    /// Due work is processed first, then the highest pending trap or
    /// interrupt is vectored; only when nothing is pending does an
    /// instruction execute. A waiting processor advances the queue until
    /// something is posted, and halts when nothing is scheduled at all.
    pub fn step(&mut self, queue: &mut dyn EventQueue) -> StepOutcome {
        if matches!(self.run_state, RunState::Halted(_)) {
            return StepOutcome::from_run_state(&self.run_state);
        }
        if queue.is_work_due() {
            if let Err(error) = queue.process_due_work(&mut self.interrupts) {
                event!(Level::ERROR, "event queue failed: {error}");
                self.halt(HaltReason::Host(error));
                return StepOutcome::from_run_state(&self.run_state);
            }
        }
        if let Some(pending) = self.pending_event() {
            self.take_event(pending);
            return StepOutcome::from_run_state(&self.run_state);
        }
        if matches!(self.run_state, RunState::Waiting) {
            if queue.has_scheduled_work() {
                queue.advance();
            } else {
                self.halt(HaltReason::WaitWithNoEvents);
            }
            return StepOutcome::from_run_state(&self.run_state);
        }
        self.execute_next();
        queue.advance();
        StepOutcome::from_run_state(&self.run_state)
    }

    /// Steps until the engine halts or `max_steps` iterations have run.
    pub fn run(&mut self, queue: &mut dyn EventQueue, max_steps: u64) -> StepOutcome {
        let mut outcome = StepOutcome::from_run_state(&self.run_state);
        for _ in 0..max_steps {
            outcome = self.step(queue);
            if matches!(outcome, StepOutcome::Halted(_)) {
                break;
            }
        }
        outcome
    }

    fn execute_next(&mut self) {
        let pc = self.registers.pc();
        let saved = self.psw.condition_codes();
        if self.psw.trace {
            self.traps.set(TrapKind::Trace);
        }
        self.mmu.begin_instruction(pc);
        self.instructions += 1;
        match self.fetch_and_execute() {
            Ok(()) => self.mmu.complete_instruction(),
            Err(kind) => {
                self.psw.set_condition_codes(saved);
                if kind == TrapKind::MemoryManagement {
                    // Restartable: the frame points back at the aborted instruction.
                    self.registers.set_pc(pc);
                }
                self.traps.set(kind);
                event!(Level::DEBUG, "instruction at {pc:o} trapped: {kind}");
            }
        }
    }

    fn fetch_and_execute(&mut self) -> Result<(), TrapKind> {
        let pc = self.registers.pc();
        let word = self.fetch_word()?;
        if tracing::enabled!(Level::TRACE) {
            self.trace_instruction(pc, word);
        }
        let instruction = Decoder::decode(word)?;
        self.execute(instruction)
    }

    /// Logs the instruction about to execute. Extension words are peeked
    /// without side effects.
    fn trace_instruction(&self, pc: u16, word: u16) {
        let mut words = vec![word];
        for index in 1..3_u16 {
            let va = pc.wrapping_add(index * 2);
            let peeked = self
                .mmu
                .translate_console(va, Space::Instruction, self.psw.current_mode, Access::Read)
                .ok()
                .and_then(|pa| self.memory.read_word(pa).ok());
            match peeked {
                Some(value) => words.push(value),
                None => break,
            }
        }
        let row = disassemble_one(pc, &words);
        event!(
            Level::TRACE,
            "{pc:06o}  {row}  psw {:06o}",
            self.psw.to_word()
        );
    }

    fn execute(&mut self, instruction: Instruction) -> Result<(), TrapKind> {
        match instruction {
            Instruction::Halt => self.execute_halt(),
            Instruction::Wait => {
                if self.is_kernel() {
                    self.run_state = RunState::Waiting;
                }
                Ok(())
            }
            Instruction::Reset => {
                if self.is_kernel() {
                    self.bus_reset();
                }
                Ok(())
            }
            Instruction::Spl { level } => {
                if self.is_kernel() {
                    self.psw.ipl = level;
                }
                Ok(())
            }
            Instruction::Rti => self.execute_return(true),
            Instruction::Rtt => self.execute_return(false),
            Instruction::Bpt => Err(TrapKind::Breakpoint),
            Instruction::Iot => Err(TrapKind::Iot),
            Instruction::Emt { .. } => Err(TrapKind::Emt),
            Instruction::Trap { .. } => Err(TrapKind::Trap),
            Instruction::Jmp { dst } => {
                let Location::Memory { va, .. } = self.resolve(dst, Width::Word)? else {
                    return Err(TrapKind::IllegalInstruction);
                };
                self.registers.set_pc(va);
                Ok(())
            }
            Instruction::Jsr { reg, dst } => self.execute_jsr(reg, dst),
            Instruction::Rts { reg } => self.execute_rts(reg),
            Instruction::Mark { count } => self.execute_mark(count),
            Instruction::ConditionCodes { set, mask } => {
                let cc = self.psw.condition_codes();
                let cc = if set { cc | mask } else { cc & !mask };
                self.psw.set_condition_codes(cc);
                Ok(())
            }
            Instruction::Branch { condition, offset } => {
                self.execute_branch(condition, offset);
                Ok(())
            }
            Instruction::Sob { reg, offset } => {
                let value = self.reg(reg).wrapping_sub(1);
                self.set_reg(reg, value);
                if value != 0 {
                    let pc = self.registers.pc().wrapping_sub(u16::from(offset) * 2);
                    self.registers.set_pc(pc);
                }
                Ok(())
            }
            Instruction::Swab { dst } => {
                let location = self.resolve(dst, Width::Word)?;
                let (target, value) = self.open_update(location, Width::Word)?;
                let (result, flags) = flags::swab(value);
                self.commit_update(target, Width::Word, result)?;
                flags.apply(&mut self.psw);
                Ok(())
            }
            Instruction::Single { op, width, dst } => self.execute_single(op, width, dst),
            Instruction::Double {
                op,
                width,
                src,
                dst,
            } => self.execute_double(op, width, src, dst),
            Instruction::Eis { op, reg, src } => self.execute_eis(op, reg, src),
            Instruction::Xor { reg, dst } => {
                let value = self.reg(reg);
                let location = self.resolve(dst, Width::Word)?;
                let (target, old) = self.open_update(location, Width::Word)?;
                let result = value ^ old;
                self.commit_update(target, Width::Word, result)?;
                flags::logical(Width::Word, result, self.psw.c).apply(&mut self.psw);
                Ok(())
            }
            Instruction::Sxt { dst } => {
                let location = self.resolve(dst, Width::Word)?;
                let value = if self.psw.n { 0o177_777 } else { 0 };
                self.write_location(location, Width::Word, value)?;
                self.psw.z = !self.psw.n;
                self.psw.v = false;
                Ok(())
            }
            Instruction::MoveFromPrevious { space, src } => self.execute_mfp(space, src),
            Instruction::MoveToPrevious { space, dst } => self.execute_mtp(space, dst),
        }
    }

    const fn is_kernel(&self) -> bool {
        matches!(self.psw.current_mode, Mode::Kernel)
    }

    fn execute_halt(&mut self) -> Result<(), TrapKind> {
        if self.is_kernel() {
            self.halt(HaltReason::Halt);
            Ok(())
        } else {
            self.control.cpu_error.illegal_halt = true;
            Err(TrapKind::Privilege)
        }
    }

    fn execute_branch(&mut self, condition: BranchCondition, offset: i8) {
        let psw = self.psw;
        if condition.holds(psw.n, psw.z, psw.v, psw.c) {
            let delta = (i16::from(offset) * 2) as u16;
            let pc = self.registers.pc().wrapping_add(delta);
            self.registers.set_pc(pc);
        }
    }

    fn execute_jsr(&mut self, reg: GeneralRegister, dst: Operand) -> Result<(), TrapKind> {
        let Location::Memory { va, .. } = self.resolve(dst, Width::Word)? else {
            return Err(TrapKind::IllegalInstruction);
        };
        let linkage = self.reg(reg);
        self.push(linkage)?;
        let pc = self.registers.pc();
        self.set_reg(reg, pc);
        self.registers.set_pc(va);
        Ok(())
    }

    fn execute_rts(&mut self, reg: GeneralRegister) -> Result<(), TrapKind> {
        let popped = self.peek_stack(0)?;
        let linkage = self.reg(reg);
        self.registers.set_pc(linkage);
        self.set_reg(reg, popped);
        if reg != GeneralRegister::SP {
            self.drop_stack(2);
        }
        Ok(())
    }

    fn execute_mark(&mut self, count: u8) -> Result<(), TrapKind> {
        let sp = self
            .registers
            .pc()
            .wrapping_add(u16::from(count) * 2);
        let space = self.data_space();
        let saved_r5 = self.read_virtual(sp, space, self.psw.current_mode, Width::Word)?;
        let r5 = self.reg(GeneralRegister::R5);
        self.registers.set_pc(r5);
        self.set_reg(GeneralRegister::R5, saved_r5);
        self.set_reg(GeneralRegister::SP, sp.wrapping_add(2));
        Ok(())
    }

    /// `RTI` and `RTT`. Outside kernel mode the popped PSW cannot raise
    /// privilege or change the priority.
    fn execute_return(&mut self, is_rti: bool) -> Result<(), TrapKind> {
        let pc = self.peek_stack(0)?;
        let psw = self.peek_stack(2)?;
        self.drop_stack(4);
        if self.is_kernel() {
            self.psw = ProcessorStatus::from_word(psw);
        } else {
            self.psw.restore_protected(psw);
        }
        self.registers.set_pc(pc);
        if is_rti && self.psw.trace {
            self.traps.set(TrapKind::Trace);
        }
        Ok(())
    }

    fn execute_single(&mut self, op: SingleOp, width: Width, dst: Operand) -> Result<(), TrapKind> {
        let location = self.resolve(dst, width)?;
        if op.is_read_only() {
            let value = self.read_location(location, width)?;
            flags::tst(width, value).apply(&mut self.psw);
            return Ok(());
        }
        if op.is_write_only() {
            self.write_location(location, width, 0)?;
            flags::clr().apply(&mut self.psw);
            return Ok(());
        }
        let (target, value) = self.open_update(location, width)?;
        let c = self.psw.c;
        let (result, flags) = match op {
            SingleOp::Com => flags::com(width, value),
            SingleOp::Inc => flags::inc(width, value, c),
            SingleOp::Dec => flags::dec(width, value, c),
            SingleOp::Neg => flags::neg(width, value),
            SingleOp::Adc => flags::adc(width, value, c),
            SingleOp::Sbc => flags::sbc(width, value, c),
            SingleOp::Ror => flags::ror(width, value, c),
            SingleOp::Rol => flags::rol(width, value, c),
            SingleOp::Asr => flags::asr(width, value),
            SingleOp::Asl => flags::asl(width, value),
            SingleOp::Clr | SingleOp::Tst => (value, Flags::default()),
        };
        self.commit_update(target, width, result)?;
        flags.apply(&mut self.psw);
        Ok(())
    }

    fn execute_double(
        &mut self,
        op: DoubleOp,
        width: Width,
        src: Operand,
        dst: Operand,
    ) -> Result<(), TrapKind> {
        let source = self.read_operand(src, width)?;
        let location = self.resolve(dst, width)?;
        let c = self.psw.c;
        match op {
            DoubleOp::Mov => {
                match (location, width) {
                    (Location::Register(reg), Width::Byte) => {
                        self.set_reg(reg, source as u8 as i8 as i16 as u16);
                    }
                    _ => self.write_location(location, width, source)?,
                }
                flags::mov(width, source, c).apply(&mut self.psw);
            }
            DoubleOp::Cmp => {
                let value = self.read_location(location, width)?;
                flags::cmp(width, source, value).apply(&mut self.psw);
            }
            DoubleOp::Bit => {
                let value = self.read_location(location, width)?;
                flags::logical(width, source & value, c).apply(&mut self.psw);
            }
            DoubleOp::Bic | DoubleOp::Bis | DoubleOp::Add | DoubleOp::Sub => {
                let (target, value) = self.open_update(location, width)?;
                let (result, flags) = match op {
                    DoubleOp::Bic => {
                        let result = value & !source;
                        (result, flags::logical(width, result, c))
                    }
                    DoubleOp::Bis => {
                        let result = value | source;
                        (result, flags::logical(width, result, c))
                    }
                    DoubleOp::Add => flags::add(width, source, value),
                    _ => flags::sub(width, source, value),
                };
                self.commit_update(target, width, result)?;
                flags.apply(&mut self.psw);
            }
        }
        Ok(())
    }

    fn execute_eis(&mut self, op: EisOp, reg: GeneralRegister, src: Operand) -> Result<(), TrapKind> {
        let source = self.read_operand(src, Width::Word)?;
        let even = reg.index() & 1 == 0;
        let partner = GeneralRegister::from_u3(reg.index() as u8 | 1);
        let result = match op {
            EisOp::Mul => eis::mul(self.reg(reg), source, even),
            EisOp::Div => eis::div(self.reg(reg), self.reg(partner), source),
            EisOp::Ash => eis::ash(self.reg(reg), source),
            EisOp::Ashc => eis::ashc(self.reg(reg), self.reg(partner), source),
        };
        if let Some(high) = result.high {
            self.set_reg(reg, high);
        }
        if let Some(low) = result.low {
            self.set_reg(partner, low);
        }
        result.flags.apply(&mut self.psw);
        Ok(())
    }

    /// Space of a previous-mode reference. `MFPI`/`MTPI` go to instruction
    /// space except when both modes are user.
    const fn previous_space(&self, space: Space) -> Space {
        let previous = self.psw.previous_mode;
        match space {
            Space::Data => self.mmu.data_space(previous),
            Space::Instruction
                if matches!(self.psw.current_mode, Mode::User)
                    && matches!(previous, Mode::User) =>
            {
                self.mmu.data_space(previous)
            }
            Space::Instruction => Space::Instruction,
        }
    }

    fn execute_mfp(&mut self, space: Space, src: Operand) -> Result<(), TrapKind> {
        let previous = self.psw.previous_mode;
        let value = match self.resolve(src, Width::Word)? {
            Location::Register(GeneralRegister::R6) if self.psw.current_mode != previous => {
                self.registers.stack_pointer(previous)
            }
            Location::Register(reg) => self.reg(reg),
            Location::Memory { va, .. } => {
                let space = self.previous_space(space);
                self.read_virtual(va, space, previous, Width::Word)?
            }
        };
        self.psw.set_nz_word(value);
        self.push_after_limit_check(value)
    }

    fn execute_mtp(&mut self, space: Space, dst: Operand) -> Result<(), TrapKind> {
        let previous = self.psw.previous_mode;
        let value = self.pop()?;
        self.psw.set_nz_word(value);
        match self.resolve(dst, Width::Word)? {
            Location::Register(GeneralRegister::R6) if self.psw.current_mode != previous => {
                self.registers.set_stack_pointer(previous, value);
            }
            Location::Register(reg) => self.set_reg(reg, value),
            Location::Memory { va, .. } => {
                let space = self.previous_space(space);
                self.write_virtual(va, space, previous, Width::Word, value)?;
            }
        }
        Ok(())
    }
}
