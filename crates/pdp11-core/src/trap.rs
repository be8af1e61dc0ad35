//! Trap and interrupt arbitration plus the vectoring sequence.

use tracing::{event, Level};

use crate::cpu::Cpu;
use crate::interrupt::{InterruptRequests, IrqLine};
use crate::memory::Width;
use crate::state::{
    ControlRegisters, HaltReason, Mode, ProcessorStatus, RunState, StackZone, EMERGENCY_STACK,
    PIRQ_VECTOR,
};
use crate::{TrapKind, TrapSet};

/// Something the CPU must vector to before the next instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// A pending synchronous trap.
    Trap(TrapKind),
    /// A device interrupt request above the current priority.
    Interrupt {
        /// Requesting line.
        line: IrqLine,
        /// Vector registered for the line; the owning device may override
        /// it when acknowledging.
        vector: u16,
    },
    /// A programmed interrupt request from the PIRQ register.
    ProgramInterrupt {
        /// Requested priority level, `1..=7`.
        level: u8,
    },
}

/// Chooses the event to take before the next instruction, if any.
///
/// Traps outrank every interrupt. Device requests and programmed requests
/// are eligible only above `ipl`; a programmed request loses to a device
/// request at the same level.
#[must_use]
pub fn next_event(
    ipl: u8,
    traps: TrapSet,
    interrupts: &InterruptRequests,
    pirq: u16,
) -> Option<Event> {
    if let Some(kind) = traps.highest() {
        return Some(Event::Trap(kind));
    }
    let device = interrupts.highest_above(ipl);
    let level = ControlRegisters::pirq_level(pirq);
    let program = (level > ipl).then_some(level);
    let interrupt = |line: IrqLine| Event::Interrupt {
        line,
        vector: interrupts.binding(line).map_or(0, |binding| binding.vector),
    };
    match (device, program) {
        (Some(line), Some(level)) if level > line.level() => {
            Some(Event::ProgramInterrupt { level })
        }
        (Some(line), _) => Some(interrupt(line)),
        (None, Some(level)) => Some(Event::ProgramInterrupt { level }),
        (None, None) => None,
    }
}

impl Cpu {
    /// The event the resolver would take now.
    #[must_use]
    pub fn pending_event(&self) -> Option<Event> {
        next_event(self.psw.ipl, self.traps, &self.interrupts, self.control.pirq)
    }

    /// Vectors to `event`: the old PSW and PC are pushed on the stack of the
    /// mode selected by the new PSW, which is loaded from the vector.
    pub(crate) fn take_event(&mut self, event: Event) {
        let (vector, trap) = match event {
            Event::Trap(kind) => {
                self.traps.take(kind);
                (kind.vector(), Some(kind))
            }
            Event::Interrupt { line, vector } => {
                let owner = self.interrupts.acknowledge(line).and_then(|binding| binding.owner);
                let vector = owner
                    .and_then(|id| self.io.acknowledge(id, line))
                    .unwrap_or(vector);
                (vector, None)
            }
            Event::ProgramInterrupt { .. } => (PIRQ_VECTOR, None),
        };
        if vector == 0 {
            event!(Level::DEBUG, ?event, "passive release");
            return;
        }
        if matches!(self.run_state, RunState::Waiting) {
            self.run_state = RunState::Running;
        }
        self.mmu.begin_vector(vector);

        let old_psw = self.psw;
        let old_pc = self.registers.pc();
        let kernel_data = self.mmu.data_space(Mode::Kernel);
        let loaded = self
            .read_virtual(vector, kernel_data, Mode::Kernel, Width::Word)
            .and_then(|pc| {
                self.read_virtual(vector.wrapping_add(2), kernel_data, Mode::Kernel, Width::Word)
                    .map(|psw| (pc, psw))
            });
        let (new_pc, new_psw) = match loaded {
            Ok(words) => words,
            Err(kind) => {
                self.vector_abort(vector, kind);
                return;
            }
        };

        let mut psw = ProcessorStatus::from_word(new_psw);
        let mode = psw.current_mode;
        let sp = self.registers.stack_pointer(mode);
        let space = self.mmu.data_space(mode);
        let pushed = self
            .write_virtual(sp.wrapping_sub(2), space, mode, Width::Word, old_psw.to_word())
            .and_then(|()| {
                self.write_virtual(sp.wrapping_sub(4), space, mode, Width::Word, old_pc)
            });
        if let Err(kind) = pushed {
            self.stack_abort(mode, trap, kind);
            return;
        }

        psw.previous_mode = old_psw.current_mode;
        self.psw = psw;
        let sp = sp.wrapping_sub(4);
        self.registers.set_stack_pointer(mode, sp);
        self.registers.set_pc(new_pc);
        self.vector_fault = false;
        event!(
            Level::DEBUG,
            ?event,
            "vectored through {vector:o} to {new_pc:o}, psw {new_psw:o}"
        );

        if matches!(mode, Mode::Kernel) && !trap.is_some_and(TrapKind::is_stack_trap) {
            self.deferred_stack_check(sp);
        }
        self.mmu.complete_instruction();

        if let Some(kind) = trap {
            if self.config.stop_traps.contains(kind) {
                self.halt(HaltReason::TrapStop(kind));
            }
        }
    }

    /// A vector read aborted. The abort is taken as a trap of its own; a
    /// second abort before any vector succeeds halts.
    fn vector_abort(&mut self, vector: u16, kind: TrapKind) {
        event!(Level::WARN, "reading vector {vector:o} aborted: {kind}");
        if self.vector_fault || self.config.stop_on_vector_abort {
            self.halt(HaltReason::VectorAbort);
            return;
        }
        self.vector_fault = true;
        self.traps.set(kind);
    }

    /// Pushing the trap frame aborted.
    fn stack_abort(&mut self, mode: Mode, trap: Option<TrapKind>, kind: TrapKind) {
        event!(Level::WARN, ?mode, "trap frame push aborted: {kind}");
        if matches!(mode, Mode::Kernel) {
            if trap == Some(TrapKind::RedStack) {
                self.halt(HaltReason::RedZone);
                return;
            }
            self.control.cpu_error.red_zone = true;
            self.registers
                .set_stack_pointer(Mode::Kernel, EMERGENCY_STACK);
            self.traps.set(TrapKind::RedStack);
        } else {
            self.traps.set(kind);
        }
        if self.config.stop_on_stack_abort {
            self.halt(HaltReason::StackAbort);
        }
    }

    /// Stack check after a kernel vector: both zones post a trap to be taken
    /// before the next instruction rather than aborting.
    fn deferred_stack_check(&mut self, sp: u16) {
        match self.control.stack_zone(sp) {
            StackZone::Clear => {}
            StackZone::Yellow => {
                self.control.cpu_error.yellow_zone = true;
                self.traps.set(TrapKind::YellowStack);
            }
            StackZone::Red => {
                self.control.cpu_error.red_zone = true;
                self.registers
                    .set_stack_pointer(Mode::Kernel, EMERGENCY_STACK);
                self.traps.set(TrapKind::RedStack);
            }
        }
    }

    pub(crate) fn halt(&mut self, reason: HaltReason) {
        event!(
            Level::INFO,
            ?reason,
            "halted at {:o}",
            self.registers.pc()
        );
        self.run_state = RunState::Halted(reason);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::{next_event, Event};
    use crate::interrupt::{InterruptRequests, IrqLine};
    use crate::{TrapKind, TrapSet};

    fn line(level: u8, bit: u8) -> IrqLine {
        IrqLine::new(level, bit).expect("valid line")
    }

    #[test]
    fn traps_outrank_interrupts() {
        let mut irq = InterruptRequests::new();
        irq.raise(line(7, 0));
        let traps = TrapSet::EMPTY.with(TrapKind::Trace);
        assert_eq!(
            next_event(0, traps, &irq, 0),
            Some(Event::Trap(TrapKind::Trace))
        );
    }

    #[test]
    fn interrupts_are_masked_by_ipl() {
        let mut irq = InterruptRequests::new();
        irq.connect(line(5, 0), 0o70, None).expect("connect");
        irq.raise(line(5, 0));
        assert_eq!(next_event(5, TrapSet::EMPTY, &irq, 0), None);
        assert_eq!(
            next_event(4, TrapSet::EMPTY, &irq, 0),
            Some(Event::Interrupt {
                line: line(5, 0),
                vector: 0o70
            })
        );
    }

    #[test]
    fn program_interrupts_lose_ties_to_devices() {
        let mut irq = InterruptRequests::new();
        irq.raise(line(5, 3));
        let pirq_level_5 = 1 << 13;
        assert_eq!(
            next_event(0, TrapSet::EMPTY, &irq, pirq_level_5),
            Some(Event::Interrupt {
                line: line(5, 3),
                vector: 0
            })
        );
        let pirq_level_6 = 1 << 14;
        assert_eq!(
            next_event(0, TrapSet::EMPTY, &irq, pirq_level_6),
            Some(Event::ProgramInterrupt { level: 6 })
        );
        assert_eq!(next_event(6, TrapSet::EMPTY, &irq, pirq_level_6), None);
        assert_eq!(
            next_event(0, TrapSet::EMPTY, &InterruptRequests::new(), 1 << 9),
            Some(Event::ProgramInterrupt { level: 1 })
        );
    }

    /// Walks the levels from 7 down: within a level the lowest device bit
    /// wins, then the programmed request.
    fn expected_event(
        ipl: u8,
        traps: TrapSet,
        requests: &BTreeSet<(u8, u8)>,
        pirq_levels: u8,
    ) -> Option<Event> {
        if let Some(kind) = TrapKind::ALL.iter().copied().find(|kind| traps.contains(*kind)) {
            return Some(Event::Trap(kind));
        }
        for level in (ipl + 1..=7).rev() {
            if let Some(&(_, bit)) = requests.iter().find(|(l, _)| *l == level) {
                return Some(Event::Interrupt {
                    line: line(level, bit),
                    vector: vector_of(level, bit),
                });
            }
            if pirq_levels & (1 << level) != 0 {
                return Some(Event::ProgramInterrupt { level });
            }
        }
        None
    }

    fn vector_of(level: u8, bit: u8) -> u16 {
        u16::from(level) * 0o100 + u16::from(bit) * 4
    }

    proptest! {
        #[test]
        fn arbitration_matches_a_level_by_level_walk(
            bits in prop_oneof![Just(0_u16), any::<u16>()],
            requests in prop::collection::btree_set((4_u8..8, 0_u8..32), 0..8),
            pirq_levels in any::<u8>(),
            ipl in 0_u8..8,
        ) {
            let traps = TrapSet::from_bits(bits);
            let pirq_levels = pirq_levels & 0o376;
            let mut irq = InterruptRequests::new();
            for &(level, bit) in &requests {
                irq.connect(line(level, bit), vector_of(level, bit), None)
                    .expect("distinct lines");
                irq.raise(line(level, bit));
            }
            let pirq = u16::from(pirq_levels) << 8;
            prop_assert_eq!(
                next_event(ipl, traps, &irq, pirq),
                expected_event(ipl, traps, &requests, pirq_levels)
            );
        }

        #[test]
        fn the_highest_pending_trap_always_wins(bits in 1_u16..0o100_000) {
            let traps = TrapSet::from_bits(bits);
            let expected = TrapKind::ALL
                .iter()
                .copied()
                .find(|kind| traps.contains(*kind));
            prop_assert_eq!(
                next_event(7, traps, &InterruptRequests::new(), 0),
                expected.map(Event::Trap)
            );
        }

        #[test]
        fn resolver_is_a_pure_function(bits in any::<u16>(), ipl in 0_u8..8, pirq in any::<u16>()) {
            let traps = TrapSet::from_bits(bits);
            let mut irq = InterruptRequests::new();
            irq.raise(line(6, 1));
            let first = next_event(ipl, traps, &irq, pirq);
            prop_assert_eq!(first, next_event(ipl, traps, &irq, pirq));
            if first.is_none() {
                prop_assert!(traps.is_empty());
                prop_assert!(ipl >= 6);
            }
        }
    }
}
