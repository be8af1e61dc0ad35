//! MACRO-11 style disassembly.
//!
//! Used by trace logging and available to hosts for memory dumps. Numbers
//! are printed in octal; PC-relative operands are resolved to absolute
//! addresses the way the assembler listing shows them.

use std::fmt;

use crate::decoder::{
    AddressingMode, BranchCondition, Decoder, DoubleOp, EisOp, Instruction, Operand, SingleOp,
};
use crate::memory::Width;
use crate::mmu::Space;
use crate::state::psw::{PSW_C, PSW_N, PSW_V, PSW_Z};
use crate::state::GeneralRegister;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One disassembled instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DisassemblyRow {
    /// Address of the instruction word.
    pub addr: u16,
    /// Instruction word followed by its extension words.
    pub words: Vec<u16>,
    /// Mnemonic, e.g. `MOVB`.
    pub mnemonic: String,
    /// Operand field, e.g. `#12,R0`; empty when there is none.
    pub operands: String,
    /// `true` when the word does not decode.
    pub is_illegal: bool,
}

impl DisassemblyRow {
    /// Bytes occupied by the instruction.
    #[must_use]
    pub fn len_bytes(&self) -> u16 {
        u16::try_from(self.words.len() * 2).unwrap_or(u16::MAX)
    }
}

impl fmt::Display for DisassemblyRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            f.write_str(&self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, self.operands)
        }
    }
}

/// Disassembles the instruction at `addr`.
///
/// `words[0]` is the instruction word and the following elements are the
/// words after it; missing extension words are shown as zero.
#[must_use]
pub fn disassemble_one(addr: u16, words: &[u16]) -> DisassemblyRow {
    let word = words.first().copied().unwrap_or(0);
    let mut stream = Stream {
        addr,
        words,
        used: 1,
    };
    let Ok(instruction) = Decoder::decode(word) else {
        return DisassemblyRow {
            addr,
            words: vec![word],
            mnemonic: ".WORD".to_owned(),
            operands: format!("{word:o}"),
            is_illegal: true,
        };
    };
    let (mnemonic, operands) = render(instruction, &mut stream);
    DisassemblyRow {
        addr,
        words: (0..stream.used)
            .map(|index| words.get(index).copied().unwrap_or(0))
            .collect(),
        mnemonic,
        operands,
        is_illegal: false,
    }
}

/// Disassembles `count` consecutive instructions from a word image that
/// starts at address `base`.
#[must_use]
pub fn disassemble_range(base: u16, image: &[u16], start: u16, count: usize) -> Vec<DisassemblyRow> {
    let mut rows = Vec::with_capacity(count);
    let mut addr = start;
    for _ in 0..count {
        let index = usize::from(addr.wrapping_sub(base) / 2);
        let Some(window) = image.get(index..) else {
            break;
        };
        if window.is_empty() {
            break;
        }
        let row = disassemble_one(addr, window);
        addr = addr.wrapping_add(row.len_bytes());
        rows.push(row);
    }
    rows
}

struct Stream<'a> {
    addr: u16,
    words: &'a [u16],
    used: usize,
}

impl Stream<'_> {
    /// Consumes the next extension word; returns it and the PC after it.
    fn extension(&mut self) -> (u16, u16) {
        let value = self.words.get(self.used).copied().unwrap_or(0);
        self.used += 1;
        #[allow(clippy::cast_possible_truncation)]
        let pc = self.addr.wrapping_add((self.used * 2) as u16);
        (value, pc)
    }

    fn next_pc(&self) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        let pc = self.addr.wrapping_add((self.used * 2) as u16);
        pc
    }
}

fn register_name(reg: GeneralRegister) -> &'static str {
    match reg {
        GeneralRegister::R0 => "R0",
        GeneralRegister::R1 => "R1",
        GeneralRegister::R2 => "R2",
        GeneralRegister::R3 => "R3",
        GeneralRegister::R4 => "R4",
        GeneralRegister::R5 => "R5",
        GeneralRegister::R6 => "SP",
        GeneralRegister::R7 => "PC",
    }
}

fn operand(op: Operand, stream: &mut Stream<'_>) -> String {
    let name = register_name(op.reg);
    let pc = op.reg == GeneralRegister::PC;
    match op.mode {
        AddressingMode::Register => name.to_owned(),
        AddressingMode::RegisterDeferred => format!("({name})"),
        AddressingMode::Autoincrement if pc => format!("#{:o}", stream.extension().0),
        AddressingMode::Autoincrement => format!("({name})+"),
        AddressingMode::AutoincrementDeferred if pc => format!("@#{:o}", stream.extension().0),
        AddressingMode::AutoincrementDeferred => format!("@({name})+"),
        AddressingMode::Autodecrement => format!("-({name})"),
        AddressingMode::AutodecrementDeferred => format!("@-({name})"),
        AddressingMode::Index | AddressingMode::IndexDeferred => {
            let deferred = if op.mode.is_deferred() { "@" } else { "" };
            let (offset, next) = stream.extension();
            if pc {
                format!("{deferred}{:o}", next.wrapping_add(offset))
            } else {
                format!("{deferred}{offset:o}({name})")
            }
        }
    }
}

const fn suffix(width: Width) -> &'static str {
    match width {
        Width::Word => "",
        Width::Byte => "B",
    }
}

const fn single_name(op: SingleOp) -> &'static str {
    match op {
        SingleOp::Clr => "CLR",
        SingleOp::Com => "COM",
        SingleOp::Inc => "INC",
        SingleOp::Dec => "DEC",
        SingleOp::Neg => "NEG",
        SingleOp::Adc => "ADC",
        SingleOp::Sbc => "SBC",
        SingleOp::Tst => "TST",
        SingleOp::Ror => "ROR",
        SingleOp::Rol => "ROL",
        SingleOp::Asr => "ASR",
        SingleOp::Asl => "ASL",
    }
}

const fn double_name(op: DoubleOp) -> &'static str {
    match op {
        DoubleOp::Mov => "MOV",
        DoubleOp::Cmp => "CMP",
        DoubleOp::Bit => "BIT",
        DoubleOp::Bic => "BIC",
        DoubleOp::Bis => "BIS",
        DoubleOp::Add => "ADD",
        DoubleOp::Sub => "SUB",
    }
}

const fn branch_name(condition: BranchCondition) -> &'static str {
    match condition {
        BranchCondition::Always => "BR",
        BranchCondition::Ne => "BNE",
        BranchCondition::Eq => "BEQ",
        BranchCondition::Ge => "BGE",
        BranchCondition::Lt => "BLT",
        BranchCondition::Gt => "BGT",
        BranchCondition::Le => "BLE",
        BranchCondition::Pl => "BPL",
        BranchCondition::Mi => "BMI",
        BranchCondition::Hi => "BHI",
        BranchCondition::Los => "BLOS",
        BranchCondition::Vc => "BVC",
        BranchCondition::Vs => "BVS",
        BranchCondition::Cc => "BCC",
        BranchCondition::Cs => "BCS",
    }
}

fn condition_code_name(set: bool, mask: u16) -> String {
    match (set, mask) {
        (_, 0) => "NOP".to_owned(),
        (true, 0o17) => "SCC".to_owned(),
        (false, 0o17) => "CCC".to_owned(),
        _ => {
            let prefix = if set { "SE" } else { "CL" };
            [(PSW_C, 'C'), (PSW_V, 'V'), (PSW_Z, 'Z'), (PSW_N, 'N')]
                .iter()
                .filter(|(bit, _)| mask & bit != 0)
                .map(|(_, flag)| format!("{prefix}{flag}"))
                .collect::<Vec<_>>()
                .join("!")
        }
    }
}

fn render(instruction: Instruction, stream: &mut Stream<'_>) -> (String, String) {
    let plain = |name: &str| (name.to_owned(), String::new());
    match instruction {
        Instruction::Halt => plain("HALT"),
        Instruction::Wait => plain("WAIT"),
        Instruction::Rti => plain("RTI"),
        Instruction::Bpt => plain("BPT"),
        Instruction::Iot => plain("IOT"),
        Instruction::Reset => plain("RESET"),
        Instruction::Rtt => plain("RTT"),
        Instruction::Jmp { dst } => ("JMP".to_owned(), operand(dst, stream)),
        Instruction::Rts { reg } => ("RTS".to_owned(), register_name(reg).to_owned()),
        Instruction::Spl { level } => ("SPL".to_owned(), format!("{level}")),
        Instruction::ConditionCodes { set, mask } => (condition_code_name(set, mask), String::new()),
        Instruction::Swab { dst } => ("SWAB".to_owned(), operand(dst, stream)),
        Instruction::Branch { condition, offset } => {
            #[allow(clippy::cast_sign_loss)]
            let delta = (i16::from(offset) * 2) as u16;
            let target = stream.next_pc().wrapping_add(delta);
            (branch_name(condition).to_owned(), format!("{target:o}"))
        }
        Instruction::Jsr { reg, dst } => (
            "JSR".to_owned(),
            format!("{},{}", register_name(reg), operand(dst, stream)),
        ),
        Instruction::Single { op, width, dst } => (
            format!("{}{}", single_name(op), suffix(width)),
            operand(dst, stream),
        ),
        Instruction::Mark { count } => ("MARK".to_owned(), format!("{count:o}")),
        Instruction::MoveFromPrevious { space, src } => {
            let name = match space {
                Space::Instruction => "MFPI",
                Space::Data => "MFPD",
            };
            (name.to_owned(), operand(src, stream))
        }
        Instruction::MoveToPrevious { space, dst } => {
            let name = match space {
                Space::Instruction => "MTPI",
                Space::Data => "MTPD",
            };
            (name.to_owned(), operand(dst, stream))
        }
        Instruction::Sxt { dst } => ("SXT".to_owned(), operand(dst, stream)),
        Instruction::Double {
            op,
            width,
            src,
            dst,
        } => {
            let src = operand(src, stream);
            let dst = operand(dst, stream);
            (
                format!("{}{}", double_name(op), suffix(width)),
                format!("{src},{dst}"),
            )
        }
        Instruction::Eis { op, reg, src } => {
            let name = match op {
                EisOp::Mul => "MUL",
                EisOp::Div => "DIV",
                EisOp::Ash => "ASH",
                EisOp::Ashc => "ASHC",
            };
            (
                name.to_owned(),
                format!("{},{}", operand(src, stream), register_name(reg)),
            )
        }
        Instruction::Xor { reg, dst } => (
            "XOR".to_owned(),
            format!("{},{}", register_name(reg), operand(dst, stream)),
        ),
        Instruction::Sob { reg, offset } => {
            let target = stream
                .next_pc()
                .wrapping_sub(u16::from(offset) * 2);
            ("SOB".to_owned(), format!("{},{target:o}", register_name(reg)))
        }
        Instruction::Emt { code } => ("EMT".to_owned(), format!("{code:o}")),
        Instruction::Trap { code } => ("TRAP".to_owned(), format!("{code:o}")),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{disassemble_one, disassemble_range};

    #[rstest]
    #[case(&[0o012_700, 0o1234], "MOV #1234,R0")]
    #[case(&[0o004_737, 0o2000], "JSR PC,@#2000")]
    #[case(&[0o004_715], "JSR PC,(R5)")]
    #[case(&[0o105_062, 0o4], "CLRB 4(R2)")]
    #[case(&[0o000_777], "BR 1000")]
    #[case(&[0o077_102], "SOB R1,776")]
    #[case(&[0o016_767, 0o10, 0o20], "MOV 1014,1026")]
    #[case(&[0o070_022], "MUL (R2)+,R0")]
    #[case(&[0o000_257], "CCC")]
    #[case(&[0o000_261], "SEC")]
    #[case(&[0o000_263], "SEC!SEV")]
    #[case(&[0o006_546], "MFPI -(SP)")]
    #[case(&[0o104_401], "TRAP 1")]
    #[case(&[0o000_000], "HALT")]
    fn renders_macro11_syntax(#[case] words: &[u16], #[case] text: &str) {
        assert_eq!(disassemble_one(0o1000, words).to_string(), text);
    }

    #[test]
    fn illegal_words_render_as_data() {
        let row = disassemble_one(0o1000, &[0o170_000]);
        assert!(row.is_illegal);
        assert_eq!(row.to_string(), ".WORD 170000");
        assert_eq!(row.len_bytes(), 2);
    }

    #[test]
    fn range_walks_instruction_lengths() {
        let image = [0o012_700, 0o5, 0o005_300, 0o001_376, 0o000_000];
        let rows = disassemble_range(0o1000, &image, 0o1000, 10);
        let text: Vec<String> = rows.iter().map(ToString::to_string).collect();
        assert_eq!(text, ["MOV #5,R0", "DEC R0", "BNE 1004", "HALT"]);
        assert_eq!(rows[1].addr, 0o1004);
    }
}
