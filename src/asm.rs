//! Assembly text generation, Intel syntax for the GNU assembler.
//!
//! Instruction-level emitters append to IR block buffers; the
//! [`AsmCtx`] collects the final file (directives, labels, block text,
//! static data) with indentation tracking.

use crate::operand::{Cond, Operand};
use crate::reg::{RegFile, RegIndex};

/// The binary opcodes the emitter selects among.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bop {
  Add,
  Sub,
  Mul,
  BitAnd,
  BitOr,
  BitXor,
  Shl,
  Shr,
}

impl Bop {
  fn mnemonic(self) -> &'static str {
    match self {
      Bop::Add => "add",
      Bop::Sub => "sub",
      Bop::Mul => "imul",
      Bop::BitAnd => "and",
      Bop::BitOr => "or",
      Bop::BitXor => "xor",
      Bop::Shl => "sal",
      Bop::Shr => "sar",
    }
  }
}

/// The unary opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Uop {
  Inc,
  Dec,
  Neg,
  BitwiseNot,
}

impl Uop {
  fn mnemonic(self) -> &'static str {
    match self {
      Uop::Inc => "add",
      Uop::Dec => "sub",
      Uop::Neg => "neg",
      Uop::BitwiseNot => "not",
    }
  }
}

use crate::ir::Block;

/*==== Instruction emission into blocks ====*/

/// Establish the stack frame on function entry.
pub fn fn_prologue(block: &mut Block, localsize: i32) {
  block.out("push rbp");
  block.out("mov rbp, rsp");
  if localsize != 0 {
    block.out(&format!("sub rsp, {localsize}"));
  }
}

/// Tear the stack frame down; the `ret` comes from the terminator.
pub fn fn_epilogue(block: &mut Block) {
  block.out("mov rsp, rbp");
  block.out("pop rbp");
}

/// Pushes are always a full word wide.
pub fn push(block: &mut Block, regs: &RegFile, l: &Operand) {
  match l {
    Operand::Reg(r) => block.out(&format!("push {}", regs.name(*r, 8))),
    _ => block.out(&format!("push {}", l.to_str(regs))),
  }
}

pub fn pop(block: &mut Block, regs: &RegFile, l: &Operand) {
  match l {
    Operand::Reg(r) => block.out(&format!("pop {}", regs.name(*r, 8))),
    _ => block.out(&format!("pop {}", l.to_str(regs))),
  }
}

/// Discard `n` words from the stack.
pub fn pop_n(block: &mut Block, wordsize: i32, n: i32) {
  if n != 0 {
    block.out(&format!("add rsp, {}", n * wordsize));
  }
}

/// Spill a register to the stack, and recover it.
pub fn save_reg(block: &mut Block, regs: &RegFile, r: RegIndex) {
  block.out(&format!("push {}", regs.name(r, 8)));
}

pub fn restore_reg(block: &mut Block, regs: &RegFile, r: RegIndex) {
  block.out(&format!("pop {}", regs.name(r, 8)));
}

/// `mov dest, src`, widening with `movzx` when a wider register takes a
/// narrower memory value.
pub fn mov(block: &mut Block, regs: &RegFile, dest: &Operand, src: &Operand) {
  let dest_size = match dest {
    Operand::Reg(r) => regs.allocated_as(*r),
    _ => 0,
  };
  let src_size = match src {
    Operand::Mem(mem) | Operand::MemRef(mem) => mem.size,
    Operand::LabelMem { size, .. } => *size,
    _ => 0,
  };
  // Register-to-register moves of differing widths use the source width;
  // the value fits either way
  if let (Operand::Reg(d), Operand::Reg(s)) = (dest, src) {
    let src_width = regs.allocated_as(*s);
    if src_width != 0 && regs.allocated_as(*d) != src_width {
      block.out(&format!("mov {}, {}", regs.name(*d, src_width), regs.name(*s, src_width)));
      return;
    }
  }

  let widen = dest_size != 0 && src_size != 0 && dest_size > src_size;

  if widen && src_size == 4 {
    // No movzx from dword; a 32-bit move zero-extends implicitly
    if let Operand::Reg(r) = dest {
      block.out(&format!("mov {}, {}", regs.name(*r, 4), src.to_str(regs)));
      return;
    }
  }

  let op = if widen { "movzx" } else { "mov" };
  block.out(&format!("{op} {}, {}", dest.to_str(regs), src.to_str(regs)));
}

/// Sign-extending move for explicit widening casts. Extension from a
/// dword source spells `movsxd`.
pub fn movsx(block: &mut Block, regs: &RegFile, dest: &Operand, src: &Operand) {
  let src_size = match src {
    Operand::Reg(r) => regs.allocated_as(*r),
    Operand::Mem(mem) | Operand::MemRef(mem) => mem.size,
    Operand::LabelMem { size, .. } => *size,
    _ => 0,
  };
  let op = if src_size == 4 { "movsxd" } else { "movsx" };
  block.out(&format!("{op} {}, {}", dest.to_str(regs), src.to_str(regs)));
}

/// `lea dest, mem`: materialize an address.
pub fn lea(block: &mut Block, regs: &RegFile, dest: &Operand, src: &Operand) {
  match src {
    Operand::Mem(_) | Operand::MemRef(_) => {
      // The address computation ignores the operand-size prefix; print a
      // bare bracket expression
      let text = src.to_str(regs);
      let bare = text.split_once("ptr ").map_or(text.as_str(), |(_, rest)| rest);
      block.out(&format!("lea {}, {bare}", dest.to_str(regs)));
    }
    Operand::LabelOffset(_) | Operand::Label(_) =>
      mov(block, regs, dest, src),
    _ => log::error!("internal error(lea): address of non-memory operand"),
  }
}

pub fn compare(block: &mut Block, regs: &RegFile, l: &Operand, r: &Operand) {
  block.out(&format!("cmp {}, {}", l.to_str(regs), r.to_str(regs)));
}

pub fn bop(block: &mut Block, regs: &RegFile, op: Bop, l: &Operand, r: &Operand) {
  block.out(&format!("{} {}, {}", op.mnemonic(), l.to_str(regs), r.to_str(regs)));
}

/// Shift `l` by CL or by an immediate.
pub fn shift(block: &mut Block, regs: &RegFile, op: Bop, l: &Operand, r: &Operand) {
  match r {
    Operand::Literal(n) => block.out(&format!("{} {}, {n}", op.mnemonic(), l.to_str(regs))),
    _ => block.out(&format!("{} {}, cl", op.mnemonic(), l.to_str(regs))),
  }
}

/// Signed division of the accumulator (sign-extended into the data
/// register) by an operand, at dword or qword width. The quotient lands
/// in RAX, the remainder in RDX.
pub fn division(block: &mut Block, regs: &RegFile, r: &Operand, size: i32) {
  block.out(if size == 8 { "cqo" } else { "cdq" });
  block.out(&format!("idiv {}", r.to_str(regs)));
}

pub fn uop(block: &mut Block, regs: &RegFile, op: Uop, r: &Operand) {
  match op {
    Uop::Inc | Uop::Dec => block.out(&format!("{} {}, 1", op.mnemonic(), r.to_str(regs))),
    _ => block.out(&format!("{} {}", op.mnemonic(), r.to_str(regs))),
  }
}

/// `setCC dest`: materialize a flags value as 0/1.
pub fn set_cc(block: &mut Block, regs: &RegFile, cond: Cond, dest: &Operand) {
  block.out(&format!("set{} {}", cond.suffix(), dest.to_str(regs)));
}

/// Zero `count` bytes at RDI with `rep stos`. RAX must hold the fill
/// value and RCX is clobbered for the count.
pub fn rep_stos(block: &mut Block, regs: &RegFile, dest: &Operand, wordsize: i32, count: i32) {
  lea(block, regs, &Operand::Reg(RegIndex::Rdi), dest);
  block.out("mov rax, 0");
  block.out(&format!("mov rcx, {}", count / wordsize));
  block.out("rep stosq");
}

/*==== The output file ====*/

/// The assembly output context: the file text under construction.
pub struct AsmCtx {
  buf: String,
  /// Indentation depth.
  depth: usize,
  /// Lines written, for tracing.
  pub line_no: u32,
}

impl Default for AsmCtx {
  fn default() -> Self { Self::new() }
}

impl AsmCtx {
  #[must_use] pub fn new() -> AsmCtx {
    AsmCtx { buf: String::new(), depth: 0, line_no: 0 }
  }

  /// Write one line at the current indentation.
  pub fn out(&mut self, line: &str) {
    for _ in 0..self.depth {
      self.buf.push_str("    ");
    }
    self.buf.push_str(line);
    self.buf.push('\n');
    self.line_no += 1;
  }

  /// Enter a block, signalled by indentation.
  pub fn enter(&mut self) { self.depth += 1 }

  pub fn leave(&mut self) { self.depth = self.depth.saturating_sub(1) }

  pub fn comment(&mut self, text: &str) {
    if text.is_empty() {
      self.out("");
    } else {
      self.out(&format!("; {text}"));
    }
  }

  pub fn file_prologue(&mut self) {
    self.out(".intel_syntax noprefix");
  }

  pub fn file_epilogue(&mut self) {}

  /// Symbol, linkage and alignment for one function.
  pub fn fn_linkage(&mut self, name: &str) {
    self.out("");
    self.out(".balign 16");
    self.out(&format!(".globl {name}"));
    self.out(&format!("{name}:"));
  }

  pub fn label(&mut self, label: &str) {
    self.out(&format!("{label}:"));
  }

  pub fn jump(&mut self, label: &str) {
    self.out(&format!("jmp {label}"));
  }

  /// Jump to `label` when the (false-)condition holds.
  pub fn branch(&mut self, cond: Cond, label: &str) {
    self.out(&format!("j{} {label}", cond.suffix()));
  }

  pub fn call(&mut self, label: &str) {
    self.out(&format!("call {label}"));
  }

  pub fn ret(&mut self) {
    self.out("ret");
  }

  pub fn rodata_section(&mut self) {
    self.out("");
    self.out(".section .rodata");
  }

  pub fn data_section(&mut self) {
    self.out("");
    self.out(".section .data");
  }

  /// A labeled string constant.
  pub fn string_constant(&mut self, label: &str, value: &str) {
    self.label(label);
    self.out(&format!(".asciz \"{value}\""));
  }

  /// Labeled initialized or zeroed storage.
  pub fn static_data(&mut self, label: &str, global: bool, size: i32,
                     init: Option<&crate::ir::StaticInit>) {
    if global {
      self.out(&format!(".globl {label}"));
    }
    self.label(label);
    match init {
      Some(crate::ir::StaticInit::Int(value)) => match size {
        1 => self.out(&format!(".byte {value}")),
        2 => self.out(&format!(".value {value}")),
        4 => self.out(&format!(".long {value}")),
        _ => self.out(&format!(".quad {value}")),
      },
      Some(crate::ir::StaticInit::Addr(target)) => self.out(&format!(".quad {target}")),
      None => self.out(&format!(".zero {}", size.max(1))),
    }
  }

  /// The accumulated file text.
  #[must_use] pub fn into_string(self) -> String {
    self.buf
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::operand::Operand;
  use crate::reg::RegFile;

  #[test]
  fn prologue_and_epilogue_shape() {
    let mut block = Block::default();
    fn_prologue(&mut block, 24);
    assert_eq!(block.instrs, "push rbp\nmov rbp, rsp\nsub rsp, 24\n");

    let mut block = Block::default();
    fn_epilogue(&mut block);
    assert_eq!(block.instrs, "mov rsp, rbp\npop rbp\n");
  }

  #[test]
  fn widening_moves() {
    let mut regs = RegFile::new();
    let r = regs.request(crate::reg::RegIndex::Rbx, 8).unwrap();

    // Byte loads widen explicitly
    let mut block = Block::default();
    mov(&mut block, &regs, &Operand::Reg(r), &Operand::mem(crate::reg::RegIndex::Rbp, -1, 1));
    assert_eq!(block.instrs, "movzx rbx, byte ptr [rbp-1]\n");

    // Dword loads widen through the 32-bit alias
    let mut block = Block::default();
    mov(&mut block, &regs, &Operand::Reg(r), &Operand::mem(crate::reg::RegIndex::Rbp, -4, 4));
    assert_eq!(block.instrs, "mov ebx, dword ptr [rbp-4]\n");
  }

  #[test]
  fn lea_strips_the_size_prefix() {
    let regs = RegFile::new();
    let mut block = Block::default();
    lea(&mut block, &regs, &Operand::Reg(crate::reg::RegIndex::Rbx),
        &Operand::mem(crate::reg::RegIndex::Rbp, -16, 4));
    assert_eq!(block.instrs, "lea rbx, [rbp-16]\n");
  }

  #[test]
  fn fn_linkage_directives() {
    let mut asm = AsmCtx::new();
    asm.fn_linkage("main");
    let text = asm.into_string();
    assert!(text.contains(".balign 16"));
    assert!(text.contains(".globl main"));
    assert!(text.contains("main:"));
  }
}
