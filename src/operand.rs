//! IR operands: the value sites instructions read and write, and the
//! conditions carried in the flags register.

use crate::arch::Architecture;
use crate::reg::{RegFile, RegIndex};

/// A comparison outcome held in the flags register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
  Equal,
  NotEqual,
  Greater,
  GreaterEqual,
  Less,
  LessEqual,
}

impl Cond {
  /// The `jCC`/`setCC`/`cmovCC` suffix.
  #[must_use] pub fn suffix(self) -> &'static str {
    match self {
      Cond::Equal => "e",
      Cond::NotEqual => "ne",
      Cond::Greater => "g",
      Cond::GreaterEqual => "ge",
      Cond::Less => "l",
      Cond::LessEqual => "le",
    }
  }

  /// The complementary condition.
  #[must_use] pub fn negate(self) -> Cond {
    match self {
      Cond::Equal => Cond::NotEqual,
      Cond::NotEqual => Cond::Equal,
      Cond::Greater => Cond::LessEqual,
      Cond::GreaterEqual => Cond::Less,
      Cond::Less => Cond::GreaterEqual,
      Cond::LessEqual => Cond::Greater,
    }
  }

  /// The condition tested by a comparison operator.
  #[must_use] pub fn from_op(op: crate::ast::Op) -> Option<Cond> {
    use crate::ast::Op;
    Some(match op {
      Op::Equal => Cond::Equal,
      Op::NotEqual => Cond::NotEqual,
      Op::Greater => Cond::Greater,
      Op::GreaterEqual => Cond::GreaterEqual,
      Op::Less => Cond::Less,
      Op::LessEqual => Cond::LessEqual,
      _ => return None,
    })
  }
}

/// A memory reference: `size ptr [base + index*factor + offset]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mem {
  pub base: Option<RegIndex>,
  pub index: Option<RegIndex>,
  pub factor: i32,
  pub offset: i32,
  /// Access width in bytes.
  pub size: i32,
}

/// A value site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
  Undefined,
  Invalid,
  /// The result of a void expression.
  Void,
  /// A value in the flags register. The condition is the one under which
  /// the value is FALSE, so a conditional branch on it jumps to the else
  /// path.
  Flags(Cond),
  Reg(RegIndex),
  /// A value in memory.
  Mem(Mem),
  /// A region referred to by address (an array, say); materialized with
  /// LEA when a plain value is required.
  MemRef(Mem),
  /// An integer immediate.
  Literal(i32),
  /// A code label (a function's address).
  Label(String),
  /// A value in labeled storage.
  LabelMem { label: String, size: i32 },
  /// The address of labeled storage.
  LabelOffset(String),
  /// A value pushed onto the stack.
  Stack { size: i32 },
}

impl Operand {
  /// A memory operand off a base register.
  #[must_use] pub fn mem(base: RegIndex, offset: i32, size: i32) -> Operand {
    Operand::Mem(Mem { base: Some(base), index: None, factor: 0, offset, size })
  }

  /// A memory reference off a base register.
  #[must_use] pub fn mem_ref(base: RegIndex, offset: i32, size: i32) -> Operand {
    Operand::MemRef(Mem { base: Some(base), index: None, factor: 0, offset, size })
  }

  /// Release any registers this operand holds.
  pub fn free(&self, regs: &mut RegFile) {
    match self {
      Operand::Reg(r) => regs.free(*r),
      Operand::Mem(mem) | Operand::MemRef(mem) => {
        if let Some(base) = mem.base { regs.free(base) }
        if let Some(index) = mem.index { regs.free(index) }
      }
      _ => {}
    }
  }

  /// The width of the value at this site, in bytes.
  #[must_use] pub fn size(&self, arch: &Architecture, regs: &RegFile) -> i32 {
    match self {
      Operand::Reg(r) => {
        let width = regs.allocated_as(*r);
        if width == 0 { arch.wordsize } else { width }
      }
      Operand::Mem(mem) | Operand::MemRef(mem) => mem.size,
      Operand::LabelMem { size, .. } => *size,
      Operand::Literal(_) => arch.wordsize,
      Operand::Label(_) | Operand::LabelOffset(_) | Operand::Stack { .. } => arch.wordsize,
      _ => 0,
    }
  }

  /// Render for the assembler, Intel syntax.
  #[must_use] pub fn to_str(&self, regs: &RegFile) -> String {
    match self {
      Operand::Flags(cond) => cond.suffix().to_owned(),
      Operand::Reg(r) => regs.to_str(*r).to_owned(),
      Operand::Mem(mem) | Operand::MemRef(mem) => mem_to_str(mem, regs),
      Operand::Literal(n) => n.to_string(),
      Operand::Label(label) | Operand::LabelOffset(label) => format!("offset {label}"),
      Operand::LabelMem { label, size } =>
        format!("{} ptr [{label}]", size_name(*size)),
      Operand::Undefined | Operand::Invalid | Operand::Void | Operand::Stack { .. } => {
        log::error!("internal error(operand): no text for {self:?}");
        "<invalid>".to_owned()
      }
    }
  }
}

/// The operand-size keyword for a width in bytes.
fn size_name(size: i32) -> &'static str {
  match size {
    1 => "byte",
    2 => "word",
    4 => "dword",
    8 => "qword",
    16 => "oword",
    _ => "undefined",
  }
}

fn mem_to_str(mem: &Mem, regs: &RegFile) -> String {
  let size = size_name(mem.size);
  let base = mem.base.map(|r| regs.name(r, 8)).unwrap_or_default();

  match mem.index {
    Some(index) if mem.factor != 0 => {
      let index = regs.name(index, 8);
      if mem.offset == 0 {
        format!("{size} ptr [{base}+{index}*{}]", mem.factor)
      } else {
        format!("{size} ptr [{base}+{index}*{}{:+}]", mem.factor, mem.offset)
      }
    }
    _ if mem.offset == 0 => format!("{size} ptr [{base}]"),
    _ => format!("{size} ptr [{base}{:+}]", mem.offset),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn condition_negation_is_involutive() {
    for cond in [Cond::Equal, Cond::NotEqual, Cond::Greater,
                 Cond::GreaterEqual, Cond::Less, Cond::LessEqual] {
      assert_eq!(cond.negate().negate(), cond);
      assert_ne!(cond.negate(), cond);
    }
  }

  #[test]
  fn memory_operand_text() {
    let regs = RegFile::new();
    assert_eq!(Operand::mem(RegIndex::Rbp, -8, 4).to_str(&regs),
               "dword ptr [rbp-8]");
    assert_eq!(Operand::mem(RegIndex::Rbp, 16, 8).to_str(&regs),
               "qword ptr [rbp+16]");
    assert_eq!(Operand::mem(RegIndex::Rax, 0, 1).to_str(&regs),
               "byte ptr [rax]");

    let indexed = Operand::Mem(Mem {
      base: Some(RegIndex::Rbp),
      index: Some(RegIndex::Rcx),
      factor: 4,
      offset: -20,
      size: 4,
    });
    assert_eq!(indexed.to_str(&regs), "dword ptr [rbp+rcx*4-20]");
  }

  #[test]
  fn register_operand_uses_allocated_width() {
    let mut regs = RegFile::new();
    let r = regs.request(RegIndex::Rbx, 4).expect("free");
    assert_eq!(Operand::Reg(r).to_str(&regs), "ebx");
  }

  #[test]
  fn freeing_an_operand_releases_registers() {
    let mut regs = RegFile::new();
    let r = regs.alloc(8);
    Operand::Reg(r).free(&mut regs);
    assert!(!regs.is_used(r));
  }
}
