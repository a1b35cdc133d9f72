//! Expression lowering: `emitter_value` computes an operand for an AST
//! expression, honoring a placement request from the caller.
//!
//! Each shape produces its natural operand (a literal, a stack slot, a
//! register, condition flags); the request conversion at the tail moves
//! the value where the consumer needs it.

use super::{EmitterCtx, branch_on_value};
use crate::asm;
use crate::ast::{Literal, NodeId, NodeKind, Op};
use crate::ir::BlockId;
use crate::operand::{Cond, Mem, Operand};
use crate::reg::{CALLER_SAVED_REGS, RegIndex};
use crate::sym::{Storage, SymTag};
use crate::ty::Ty;

/// Where the caller wants a value placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Request {
  /// Anywhere, flags included.
  Any,
  /// The value is discarded.
  Void,
  /// Any register.
  Reg,
  /// A register or a memory operand.
  RegOrMem,
  /// A memory operand; the caller intends to write through it.
  Mem,
  /// Usable directly as an assembly operand: a register, immediate or
  /// label.
  Value,
  /// An array region, by reference.
  Array,
  /// Condition flags.
  Flags,
  /// The return register.
  Return,
  /// Pushed onto the stack.
  Stack,
}

/// Compute the value of an expression, placing it per `request`. The
/// current block is threaded through and may change (short circuits,
/// ternaries and calls split blocks).
pub(crate) fn emitter_value(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                            node: NodeId, request: Request) -> Operand {
  let value = emitter_value_inner(ctx, block, node);
  convert(ctx, block, value, request)
}

/// Compute the value of an expression directly into an already-placed
/// operand.
pub(crate) fn emitter_value_suggest(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                                    node: NodeId, dest: &Operand) {
  let value = emitter_value(ctx, block, node, Request::Value);
  if value != *dest {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::mov(b, regs, dest, &value);
    value.free(&mut ctx.regs);
  }
}

fn emitter_value_inner(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, node: NodeId) -> Operand {
  match ctx.ast[node].kind.clone() {
    NodeKind::Bop { op, l, r } => {
      if op.is_assignment() {
        emitter_assign(ctx, block, op, l, r)
      } else if op.is_member() {
        emitter_member(ctx, block, node, op, l, r)
      } else if op.is_logical() {
        emitter_logical(ctx, block, op, l, r)
      } else if op == Op::Comma {
        let left = emitter_value(ctx, block, l, Request::Void);
        left.free(&mut ctx.regs);
        emitter_value_inner(ctx, block, r)
      } else if Cond::from_op(op).is_some() {
        emitter_comparison(ctx, block, op, l, r)
      } else {
        emitter_bop(ctx, block, node, op, l, r)
      }
    }

    NodeKind::Uop { op, r } => emitter_uop(ctx, block, node, op, r),
    NodeKind::Top { cond, l, r } => emitter_ternary(ctx, block, node, cond, l, r),
    NodeKind::Index { l, r } => emitter_index(ctx, block, node, l, r),
    NodeKind::Call { l } => emitter_call(ctx, block, node, l),
    NodeKind::Cast { r, .. } => emitter_cast(ctx, block, node, r),
    NodeKind::Sizeof { r } => {
      let size = ctx.ast.dt(r).size(ctx.arch, ctx.syms);
      Operand::Literal(size)
    }

    NodeKind::Literal(Literal::Int(n)) => Operand::Literal(n),
    NodeKind::Literal(Literal::Bool(b)) => Operand::Literal(i32::from(b)),
    NodeKind::Literal(Literal::Char(c)) => Operand::Literal(i32::from(c)),
    NodeKind::Literal(Literal::Str(s)) => ctx.ir.string_constant(&s),
    NodeKind::Literal(Literal::Ident(_)) => emitter_symbol(ctx, node),
    NodeKind::Literal(Literal::Init) => {
      ctx.unhandled("emitter_value", "literal", "compound initializer");
      Operand::Invalid
    }

    NodeKind::VaStart { ap, last } => emitter_va_start(ctx, block, ap, last),
    NodeKind::VaEnd { ap } => {
      let list = emitter_value(ctx, block, ap, Request::Mem);
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, *block);
        asm::mov(b, regs, &list, &Operand::Literal(0));
      }
      list.free(&mut ctx.regs);
      Operand::Void
    }
    NodeKind::VaArg { ap, .. } => emitter_va_arg(ctx, block, node, ap),
    NodeKind::VaCopy { dst, src } => {
      let dst = emitter_value(ctx, block, dst, Request::Mem);
      let src = emitter_value(ctx, block, src, Request::Value);
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, *block);
        asm::mov(b, regs, &dst, &src);
      }
      src.free(&mut ctx.regs);
      dst.free(&mut ctx.regs);
      Operand::Void
    }

    NodeKind::Invalid | NodeKind::Empty => Operand::Invalid,

    kind => {
      let kind = format!("{kind:?}");
      ctx.unhandled("emitter_value", "AST node", &kind);
      Operand::Invalid
    }
  }
}

/*==== Operand plumbing ====*/

fn operand_size(ctx: &EmitterCtx<'_>, value: &Operand) -> i32 {
  value.size(ctx.arch, &ctx.regs)
}

/// Load a value into a fresh register of the given width.
fn get_in_reg(ctx: &mut EmitterCtx<'_>, block: BlockId, src: Operand, size: i32) -> Operand {
  if let Operand::Reg(_) = src { return src }

  let dest = Operand::Reg(ctx.regs.alloc(size));
  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, block);
    asm::mov(b, regs, &dest, &src);
  }
  src.free(&mut ctx.regs);
  dest
}

/// Materialize a memory reference as a plain address value.
fn ref_to_value(ctx: &mut EmitterCtx<'_>, block: BlockId, value: Operand) -> Operand {
  let dest = Operand::Reg(ctx.regs.alloc(ctx.arch.wordsize));
  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, block);
    asm::lea(b, regs, &dest, &value);
  }
  value.free(&mut ctx.regs);
  dest
}

/// Honor a placement request.
fn convert(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
           mut value: Operand, request: Request) -> Operand {
  // Unless the caller asked for the region itself, a memory reference
  // becomes a plain address value
  if matches!(value, Operand::MemRef(_) | Operand::LabelOffset(_))
    && !matches!(request, Request::Mem | Request::Array | Request::Any | Request::Stack) {
    if let Operand::MemRef(_) = value {
      value = ref_to_value(ctx, *block, value);
    }
  }

  // A truth value in the flags must materialize before anything but a
  // branch consumes it
  if matches!(value, Operand::Flags(_))
    && !matches!(request, Request::Flags | Request::Any | Request::Void
                 | Request::Return | Request::Stack) {
    value = emitter_flags_to_reg(ctx, *block, value);
  }

  match request {
    Request::Any | Request::Array => value,

    Request::Void => {
      value.free(&mut ctx.regs);
      Operand::Void
    }

    Request::Reg => {
      let size = operand_size(ctx, &value);
      get_in_reg(ctx, *block, value, size.clamp(1, 8))
    }

    Request::RegOrMem => match value {
      Operand::Reg(_) | Operand::Mem(_) | Operand::LabelMem { .. } => value,
      _ => {
        let size = operand_size(ctx, &value);
        get_in_reg(ctx, *block, value, size.clamp(1, 8))
      }
    },

    Request::Value => match value {
      Operand::Reg(_) | Operand::Literal(_) | Operand::Label(_) | Operand::LabelOffset(_) =>
        value,
      _ => {
        let size = operand_size(ctx, &value);
        get_in_reg(ctx, *block, value, size.clamp(1, 8))
      }
    },

    Request::Mem => match value {
      Operand::Mem(_) | Operand::LabelMem { .. } => value,
      Operand::MemRef(mem) => Operand::Mem(mem),
      _ => {
        ctx.unhandled("convert", "operand", "non-lvalue for a memory request");
        value
      }
    },

    Request::Flags => {
      if let Operand::Flags(_) = value { return value }

      // Test against zero; equality selects the false path
      let value = match value {
        Operand::Literal(_) => {
          let size = ctx.arch.wordsize;
          get_in_reg(ctx, *block, value, size)
        }
        other => other,
      };
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, *block);
        asm::compare(b, regs, &value, &Operand::Literal(0));
      }
      value.free(&mut ctx.regs);
      Operand::Flags(Cond::Equal)
    }

    Request::Return => emitter_to_return(ctx, *block, value),

    Request::Stack => emitter_to_stack(ctx, *block, value),
  }
}

/// Move a value into the return register.
fn emitter_to_return(ctx: &mut EmitterCtx<'_>, block: BlockId, value: Operand) -> Operand {
  if value == Operand::Reg(RegIndex::Rax) { return value }

  if operand_size(ctx, &value) > ctx.arch.wordsize {
    ctx.unhandled("emitter_to_return", "value", "oversize return value");
    value.free(&mut ctx.regs);
    return Operand::Invalid;
  }

  let size = operand_size(ctx, &value).clamp(1, 8);
  let rax_name = ctx.regs.name(RegIndex::Rax, size);
  let line = match &value {
    Operand::Flags(cond) => {
      // Materialize the truth value; the flags hold the false condition
      format!("set{} {rax_name}", cond.negate().suffix())
    }
    _ => format!("mov {rax_name}, {}", value.to_str(&ctx.regs)),
  };
  ctx.out(block, &line);
  if matches!(value, Operand::Flags(_)) && size > 1 {
    // setcc writes one byte
    let line = format!("movzx {}, {}",
                       ctx.regs.name(RegIndex::Rax, size), ctx.regs.name(RegIndex::Rax, 1));
    ctx.out(block, &line);
  }

  value.free(&mut ctx.regs);
  Operand::Reg(RegIndex::Rax)
}

/// Push a value; oversize memory operands go on backwards in word
/// chunks, so the lowest address ends up lowest on the stack.
fn emitter_to_stack(ctx: &mut EmitterCtx<'_>, block: BlockId, value: Operand) -> Operand {
  let wordsize = ctx.arch.wordsize;

  match value {
    Operand::Mem(mem) | Operand::MemRef(mem) if mem.size > wordsize => {
      let total = ctx.arch.align_word(mem.size);
      let mut chunk = mem;
      chunk.size = wordsize;
      chunk.offset += total - wordsize;

      let mut pushed = 0;
      while pushed < total {
        {
          let regs = &ctx.regs;
          let b = ctx.ir.block_mut(ctx.fun, block);
          asm::push(b, regs, &Operand::Mem(chunk));
        }
        chunk.offset -= wordsize;
        pushed += wordsize;
      }

      value.free(&mut ctx.regs);
      Operand::Stack { size: total }
    }

    // Arrays decay: their address is what goes to the callee
    Operand::MemRef(_) | Operand::LabelOffset(_) => {
      let addr = match value {
        Operand::MemRef(_) => ref_to_value(ctx, block, value),
        other => get_in_reg(ctx, block, other, wordsize),
      };
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, block);
        asm::push(b, regs, &addr);
      }
      addr.free(&mut ctx.regs);
      Operand::Stack { size: wordsize }
    }

    // Narrow memory can't be pushed directly; bounce through a register
    Operand::Mem(mem) if mem.size < wordsize => {
      let loaded = get_in_reg(ctx, block, value, wordsize);
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, block);
        asm::push(b, regs, &loaded);
      }
      loaded.free(&mut ctx.regs);
      Operand::Stack { size: wordsize }
    }

    Operand::LabelMem { ref label, size } if size < wordsize => {
      let loaded = get_in_reg(ctx, block, Operand::LabelMem { label: clone_label(label), size },
                              wordsize);
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, block);
        asm::push(b, regs, &loaded);
      }
      loaded.free(&mut ctx.regs);
      value.free(&mut ctx.regs);
      Operand::Stack { size: wordsize }
    }

    Operand::Flags(_) => {
      let materialized = emitter_flags_to_reg(ctx, block, value);
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, block);
        asm::push(b, regs, &materialized);
      }
      materialized.free(&mut ctx.regs);
      Operand::Stack { size: wordsize }
    }

    _ => {
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, block);
        asm::push(b, regs, &value);
      }
      value.free(&mut ctx.regs);
      Operand::Stack { size: wordsize }
    }
  }
}

fn clone_label(label: &str) -> String { label.to_owned() }

/// Turn a flags value into a 0/1 register value.
fn emitter_flags_to_reg(ctx: &mut EmitterCtx<'_>, block: BlockId, value: Operand) -> Operand {
  let Operand::Flags(cond) = value else { return value };

  let dest = Operand::Reg(ctx.regs.alloc(1));
  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, block);
    // The carried condition selects the false path
    asm::set_cc(b, regs, cond.negate(), &dest);
  }
  if let Operand::Reg(r) = dest {
    let line = format!("movzx {}, {}", ctx.regs.name(r, 4), ctx.regs.name(r, 1));
    ctx.out(block, &line);
    ctx.regs.set_width(r, 4);
  }
  dest
}

/*==== Leaves ====*/

/// The operand for a name: label for functions, stack slot for locals
/// and parameters, labeled storage for globals, immediate for enum
/// constants.
fn emitter_symbol(ctx: &mut EmitterCtx<'_>, node: NodeId) -> Operand {
  let Some(sym) = ctx.ast[node].symbol else { return Operand::Invalid };

  let dt = ctx.syms[sym].dt.clone().unwrap_or_else(Ty::invalid);
  let size = dt.size(ctx.arch, ctx.syms);

  match ctx.syms[sym].tag {
    SymTag::EnumConstant => Operand::Literal(ctx.syms[sym].const_value),

    SymTag::Id if dt.is_function() && !dt.is_invalid() => {
      match &ctx.syms[sym].label {
        Some(label) => Operand::Label(label.clone()),
        None => Operand::Invalid,
      }
    }

    SymTag::Id | SymTag::Param => {
      let is_local = ctx.syms[sym].tag == SymTag::Param
        || matches!(ctx.syms[sym].storage, Storage::Auto | Storage::Undefined);

      if is_local {
        let offset = ctx.syms[sym].offset;
        if dt.is_array() && !dt.is_invalid() {
          Operand::mem_ref(RegIndex::Rbp, offset, size)
        } else {
          Operand::mem(RegIndex::Rbp, offset, size)
        }
      } else {
        let label = match &ctx.syms[sym].label {
          Some(label) => label.clone(),
          None => ctx.arch.mangle(&ctx.syms[sym].ident),
        };
        if dt.is_array() && !dt.is_invalid() {
          Operand::LabelOffset(label)
        } else {
          Operand::LabelMem { label, size }
        }
      }
    }

    tag => {
      ctx.unhandled("emitter_symbol", "symbol tag", tag.to_str());
      Operand::Invalid
    }
  }
}

/*==== Operators ====*/

fn bop_opcode(ctx: &mut EmitterCtx<'_>, op: Op) -> Option<asm::Bop> {
  Some(match op {
    Op::Add | Op::AddAssign => asm::Bop::Add,
    Op::Subtract | Op::SubAssign => asm::Bop::Sub,
    Op::Multiply | Op::MulAssign => asm::Bop::Mul,
    Op::BitwiseAnd | Op::AndAssign => asm::Bop::BitAnd,
    Op::BitwiseOr | Op::OrAssign => asm::Bop::BitOr,
    Op::BitwiseXor | Op::XorAssign => asm::Bop::BitXor,
    Op::Shl | Op::ShlAssign => asm::Bop::Shl,
    Op::Shr | Op::ShrAssign => asm::Bop::Shr,
    _ => {
      ctx.unhandled("bop_opcode", "operator", op.to_str());
      return None;
    }
  })
}

/// The element size to scale by, when one operand of `+`/`-` is a
/// pointer and the other an integer.
fn pointer_scale(ctx: &EmitterCtx<'_>, op: Op, l: NodeId, r: NodeId) -> Option<(bool, i32)> {
  if !matches!(op, Op::Add | Op::Subtract | Op::AddAssign | Op::SubAssign) {
    return None;
  }

  let ldt = ctx.ast.dt(l);
  let rdt = ctx.ast.dt(r);
  let l_ptr = ldt.is_ptr() && !ldt.is_invalid();
  let r_ptr = rdt.is_ptr() && !rdt.is_invalid();

  if l_ptr && !r_ptr {
    let elem = ldt.derive_base().size(ctx.arch, ctx.syms);
    (elem > 1).then_some((false, elem))
  } else if r_ptr && !l_ptr {
    let elem = rdt.derive_base().size(ctx.arch, ctx.syms);
    (elem > 1).then_some((true, elem))
  } else {
    None
  }
}

/// Multiply an integer operand by an element size, for pointer
/// arithmetic.
fn scale_operand(ctx: &mut EmitterCtx<'_>, block: BlockId, value: Operand, elem: i32) -> Operand {
  match value {
    Operand::Literal(n) => Operand::Literal(n * elem),
    value => {
      let size = operand_size(ctx, &value).clamp(1, 8);
      let reg = get_in_reg(ctx, block, value, size);
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, block);
        asm::bop(b, regs, asm::Bop::Mul, &reg, &Operand::Literal(elem));
      }
      reg
    }
  }
}

/// Plain arithmetic and bitwise operators: left in a register, operate,
/// result stays in the register.
fn emitter_bop(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, node: NodeId,
               op: Op, l: NodeId, r: NodeId) -> Operand {
  match op {
    Op::Divide | Op::Modulo => return emitter_division(ctx, block, node, op, l, r),
    Op::Shl | Op::Shr => return emitter_shift(ctx, block, op, l, r),
    _ => {}
  }

  let scale = pointer_scale(ctx, op, l, r);

  let mut left = emitter_value(ctx, block, l, Request::Reg);
  let mut right = emitter_value(ctx, block, r, Request::Value);

  match scale {
    // Integer + pointer: the left side carries the scaling
    Some((true, elem)) => left = scale_operand(ctx, *block, left, elem),
    Some((false, elem)) => right = scale_operand(ctx, *block, right, elem),
    None => {}
  }

  if let Some(opcode) = bop_opcode(ctx, op) {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::bop(b, regs, opcode, &left, &right);
  }

  right.free(&mut ctx.regs);
  left
}

/// Shifts take their count in CL, unless it is immediate.
fn emitter_shift(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                 op: Op, l: NodeId, r: NodeId) -> Operand {
  let left = emitter_value(ctx, block, l, Request::Reg);
  let right = emitter_value(ctx, block, r, Request::Value);
  let opcode = if matches!(op, Op::Shl | Op::ShlAssign) { asm::Bop::Shl } else { asm::Bop::Shr };

  if let Operand::Literal(_) = right {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::shift(b, regs, opcode, &left, &right);
    return left;
  }

  // The count might already sit in the count register
  if right == Operand::Reg(RegIndex::Rcx) {
    {
      let regs = &ctx.regs;
      let b = ctx.ir.block_mut(ctx.fun, *block);
      asm::shift(b, regs, opcode, &left, &right);
    }
    right.free(&mut ctx.regs);
    return left;
  }

  let rcx_old = ctx.take_reg(*block, RegIndex::Rcx, ctx.arch.wordsize);
  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::mov(b, regs, &Operand::Reg(RegIndex::Rcx), &right);
    asm::shift(b, regs, opcode, &left, &right);
  }
  right.free(&mut ctx.regs);
  ctx.give_back_reg(*block, RegIndex::Rcx, rcx_old);

  left
}

/// Bring a divisor to the division width, out of the registers the
/// instruction claims.
fn divisor_operand(ctx: &mut EmitterCtx<'_>, block: BlockId,
                   right: Operand, size: i32) -> Operand {
  let mut right = match right {
    // No immediate form; also the width must be explicit
    Operand::Literal(_) => get_in_reg(ctx, block, right, size),

    Operand::Reg(r) => {
      let width = ctx.regs.allocated_as(r);
      if width == size {
        right
      } else if width > size {
        // Reinterpret the low bytes
        ctx.regs.set_width(r, size);
        right
      } else {
        let widened = Operand::Reg(ctx.regs.alloc(size));
        {
          let regs = &ctx.regs;
          let b = ctx.ir.block_mut(ctx.fun, block);
          asm::movsx(b, regs, &widened, &right);
        }
        right.free(&mut ctx.regs);
        widened
      }
    }

    Operand::Mem(mem) if mem.size == size => right,
    Operand::Mem(_) => {
      let loaded = Operand::Reg(ctx.regs.alloc(size));
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, block);
        asm::movsx(b, regs, &loaded, &right);
      }
      right.free(&mut ctx.regs);
      loaded
    }

    other => get_in_reg(ctx, block, other, size),
  };

  // The instruction claims RAX and RDX
  for clobbered in [RegIndex::Rax, RegIndex::Rdx] {
    if right == Operand::Reg(clobbered) {
      let fresh = Operand::Reg(ctx.regs.alloc(size));
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, block);
        asm::mov(b, regs, &fresh, &right);
      }
      ctx.regs.free(clobbered);
      right = fresh;
    }
  }

  right
}

/// Division and modulo through the RAX/RDX pair.
fn emitter_division(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, node: NodeId,
                    op: Op, l: NodeId, r: NodeId) -> Operand {
  let size = if ctx.ast.dt(node).size(ctx.arch, ctx.syms) > 4 { 8 } else { 4 };

  let left = emitter_value(ctx, block, l, Request::Value);
  let right = emitter_value(ctx, block, r, Request::Any);
  let right = divisor_operand(ctx, *block, right, size);

  let left_in_rax = left == Operand::Reg(RegIndex::Rax);
  let rax_old = if left_in_rax {
    ctx.regs.set_width(RegIndex::Rax, size);
    0
  } else {
    ctx.take_reg(*block, RegIndex::Rax, size)
  };
  let rdx_old = ctx.take_reg(*block, RegIndex::Rdx, size);

  // Dividend into the accumulator, sign extended
  if !left_in_rax {
    let left_size = operand_size(ctx, &left);
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    let rax = Operand::Reg(RegIndex::Rax);
    match &left {
      Operand::Literal(_) => asm::mov(b, regs, &rax, &left),
      _ if left_size < size => asm::movsx(b, regs, &rax, &left),
      _ => asm::mov(b, regs, &rax, &left),
    }
    left.free(&mut ctx.regs);
  }

  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::division(b, regs, &right, size);
  }
  right.free(&mut ctx.regs);

  // Quotient in RAX, remainder in RDX
  let result = Operand::Reg(ctx.regs.alloc(size));
  let source = if op == Op::Divide { RegIndex::Rax } else { RegIndex::Rdx };
  let line = format!("mov {}, {}",
                     result.to_str(&ctx.regs), ctx.regs.name(source, size));
  ctx.out(*block, &line);

  ctx.give_back_reg(*block, RegIndex::Rdx, rdx_old);
  if left_in_rax {
    ctx.regs.free(RegIndex::Rax);
  } else {
    ctx.give_back_reg(*block, RegIndex::Rax, rax_old);
  }

  result
}

/// Comparisons compute flags; the carried condition is the negation of
/// the source operator, selecting the false path.
fn emitter_comparison(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                      op: Op, l: NodeId, r: NodeId) -> Operand {
  let left = emitter_value(ctx, block, l, Request::Reg);
  let right = emitter_value(ctx, block, r, Request::Value);

  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::compare(b, regs, &left, &right);
  }

  left.free(&mut ctx.regs);
  right.free(&mut ctx.regs);

  let cond = Cond::from_op(op).expect("comparison operator");
  Operand::Flags(cond.negate())
}

/// `&&` and `||` short circuit through the block graph, materializing a
/// 0/1 result.
fn emitter_logical(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                   op: Op, l: NodeId, r: NodeId) -> Operand {
  let fun = ctx.fun;
  let rhs = ctx.ir.create_block(fun);
  let set_true = ctx.ir.create_block(fun);
  let set_false = ctx.ir.create_block(fun);
  let done = ctx.ir.create_block(fun);

  let result = Operand::Reg(ctx.regs.alloc(4));

  // The left operand decides alone when it short-circuits
  let (on_true, on_false) = match op {
    Op::LogicalAnd => (rhs, set_false),
    _ => (set_true, rhs),
  };
  let mut b = *block;
  let flags = emitter_value(ctx, &mut b, l, Request::Flags);
  if let Operand::Flags(cond) = flags {
    ctx.ir.branch(fun, b, cond, on_true, on_false);
  }

  let mut b = rhs;
  let flags = emitter_value(ctx, &mut b, r, Request::Flags);
  if let Operand::Flags(cond) = flags {
    ctx.ir.branch(fun, b, cond, set_true, set_false);
  }

  let line = format!("mov {}, 1", result.to_str(&ctx.regs));
  ctx.out(set_true, &line);
  ctx.ir.jump(fun, set_true, done);

  let line = format!("mov {}, 0", result.to_str(&ctx.regs));
  ctx.out(set_false, &line);
  ctx.ir.jump(fun, set_false, done);

  *block = done;
  result
}

fn emitter_uop(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, node: NodeId,
               op: Op, r: NodeId) -> Operand {
  match op {
    Op::LogicalNot => {
      let value = emitter_value(ctx, block, r, Request::Flags);
      match value {
        // Negating a truth value flips the false-condition
        Operand::Flags(cond) => Operand::Flags(cond.negate()),
        other => other,
      }
    }

    Op::BitwiseNot | Op::Negate => {
      let value = emitter_value(ctx, block, r, Request::Reg);
      let opcode = if op == Op::Negate { asm::Uop::Neg } else { asm::Uop::BitwiseNot };
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, *block);
        asm::uop(b, regs, opcode, &value);
      }
      value
    }

    Op::UnaryPlus => emitter_value_inner(ctx, block, r),

    Op::Deref => {
      let ptr = emitter_value(ctx, block, r, Request::Reg);
      let Operand::Reg(base) = ptr else { return Operand::Invalid };
      ctx.regs.set_width(base, 8);

      let dt = ctx.ast.dt(node);
      let size = dt.size(ctx.arch, ctx.syms);
      if dt.is_array() && !dt.is_invalid() {
        Operand::mem_ref(base, 0, size)
      } else {
        Operand::mem(base, 0, size)
      }
    }

    Op::AddressOf => {
      let place = emitter_value(ctx, block, r, Request::Mem);
      match place {
        Operand::Mem(mut mem) => {
          mem.size = ctx.arch.wordsize;
          ref_to_value(ctx, *block, Operand::Mem(mem))
        }
        Operand::LabelMem { label, .. } => {
          get_in_reg(ctx, *block, Operand::LabelOffset(label), ctx.arch.wordsize)
        }
        other => other,
      }
    }

    Op::PreIncrement | Op::PreDecrement => {
      let place = emitter_value(ctx, block, r, Request::Mem);
      let forward = op == Op::PreIncrement;
      emitter_step(ctx, *block, node, &place, forward);
      place
    }

    Op::PostIncrement | Op::PostDecrement => {
      // The previous value is the result; hold it in a register while the
      // place updates
      let place = emitter_value(ctx, block, r, Request::Mem);
      let size = operand_size(ctx, &place).clamp(1, 8);
      let old = Operand::Reg(ctx.regs.alloc(size));
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, *block);
        asm::mov(b, regs, &old, &place);
      }
      let forward = op == Op::PostIncrement;
      emitter_step(ctx, *block, node, &place, forward);
      place.free(&mut ctx.regs);
      old
    }

    _ => {
      ctx.unhandled("emitter_uop", "operator", op.to_str());
      Operand::Invalid
    }
  }
}

/// Add or subtract one step to a place: 1 for scalars, the element size
/// for pointers.
fn emitter_step(ctx: &mut EmitterCtx<'_>, block: BlockId, node: NodeId,
                place: &Operand, forward: bool) {
  let dt = ctx.ast.dt(node);
  let step = if dt.is_ptr() && !dt.is_invalid() {
    dt.derive_base().size(ctx.arch, ctx.syms).max(1)
  } else {
    1
  };

  let regs = &ctx.regs;
  let b = ctx.ir.block_mut(ctx.fun, block);
  if step == 1 {
    asm::uop(b, regs, if forward { asm::Uop::Inc } else { asm::Uop::Dec }, place);
  } else {
    let opcode = if forward { asm::Bop::Add } else { asm::Bop::Sub };
    asm::bop(b, regs, opcode, place, &Operand::Literal(step));
  }
}

fn emitter_ternary(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, node: NodeId,
                   cond: NodeId, l: NodeId, r: NodeId) -> Operand {
  let fun = ctx.fun;
  let then_block = ctx.ir.create_block(fun);
  let else_block = ctx.ir.create_block(fun);
  let done = ctx.ir.create_block(fun);

  let size = ctx.ast.dt(node).size(ctx.arch, ctx.syms).clamp(1, 8);
  let dest = Operand::Reg(ctx.regs.alloc(size));

  branch_on_value(ctx, *block, cond, then_block, else_block);

  let mut b = then_block;
  emitter_value_suggest(ctx, &mut b, l, &dest);
  ctx.ir.jump(fun, b, done);

  let mut b = else_block;
  emitter_value_suggest(ctx, &mut b, r, &dest);
  ctx.ir.jump(fun, b, done);

  *block = done;
  dest
}

/// Array and pointer indexing: a scaled-index memory operand when the
/// element size allows, explicit arithmetic otherwise.
fn emitter_index(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, node: NodeId,
                 l: NodeId, r: NodeId) -> Operand {
  let elem_size = ctx.ast.dt(node).size(ctx.arch, ctx.syms);
  let is_array = {
    let dt = ctx.ast.dt(l);
    dt.is_array() && !dt.is_invalid()
  };

  let result_ref = {
    let dt = ctx.ast.dt(node);
    dt.is_array() && !dt.is_invalid()
  };
  let wrap = |mem: Mem| if result_ref { Operand::MemRef(mem) } else { Operand::Mem(mem) };

  if is_array {
    let base = emitter_value(ctx, block, l, Request::Array);

    // A global array's label becomes a base register
    let base = match base {
      Operand::LabelOffset(_) => {
        let reg = get_in_reg(ctx, *block, base, ctx.arch.wordsize);
        match reg {
          Operand::Reg(r) => Operand::MemRef(Mem {
            base: Some(r), index: None, factor: 0, offset: 0, size: elem_size,
          }),
          other => other,
        }
      }
      other => other,
    };

    let (Operand::Mem(mem) | Operand::MemRef(mem)) = base else { return Operand::Invalid };

    let index = emitter_value(ctx, block, r, Request::Value);
    match index {
      Operand::Literal(n) => {
        let mut out = mem;
        out.offset += elem_size * n;
        out.size = elem_size;
        wrap(out)
      }
      Operand::Reg(idx) if matches!(elem_size, 1 | 2 | 4 | 8) && mem.index.is_none() => {
        ctx.regs.set_width(idx, 8);
        let mut out = mem;
        out.index = Some(idx);
        out.factor = elem_size;
        out.size = elem_size;
        wrap(out)
      }
      index => {
        // Awkward element size: compute the address explicitly
        let idx = get_in_reg(ctx, *block, index, ctx.arch.wordsize);
        let base_addr = ref_to_value(ctx, *block, Operand::MemRef(mem));
        {
          let regs = &ctx.regs;
          let b = ctx.ir.block_mut(ctx.fun, *block);
          asm::bop(b, regs, asm::Bop::Mul, &idx, &Operand::Literal(elem_size));
          asm::bop(b, regs, asm::Bop::Add, &idx, &base_addr);
        }
        base_addr.free(&mut ctx.regs);
        let Operand::Reg(idx) = idx else { return Operand::Invalid };
        wrap(Mem { base: Some(idx), index: None, factor: 0, offset: 0, size: elem_size })
      }
    }

  } else {
    // Pointer: the base is a value
    let ptr = emitter_value(ctx, block, l, Request::Reg);
    let Operand::Reg(base) = ptr else { return Operand::Invalid };
    ctx.regs.set_width(base, 8);

    let index = emitter_value(ctx, block, r, Request::Value);
    match index {
      Operand::Literal(n) => wrap(Mem {
        base: Some(base), index: None, factor: 0, offset: elem_size * n, size: elem_size,
      }),
      index => {
        let idx = get_in_reg(ctx, *block, index, ctx.arch.wordsize);
        let Operand::Reg(idx) = idx else { return Operand::Invalid };
        if matches!(elem_size, 1 | 2 | 4 | 8) {
          wrap(Mem {
            base: Some(base), index: Some(idx), factor: elem_size, offset: 0, size: elem_size,
          })
        } else {
          {
            let regs = &ctx.regs;
            let b = ctx.ir.block_mut(ctx.fun, *block);
            asm::bop(b, regs, asm::Bop::Mul, &Operand::Reg(idx), &Operand::Literal(elem_size));
            asm::bop(b, regs, asm::Bop::Add, &Operand::Reg(idx), &Operand::Reg(base));
          }
          ctx.regs.free(base);
          wrap(Mem { base: Some(idx), index: None, factor: 0, offset: 0, size: elem_size })
        }
      }
    }
  }
}

/// Field access: adjust the offset and narrow the size; `->` first loads
/// the pointer.
fn emitter_member(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, _node: NodeId,
                  op: Op, l: NodeId, r: NodeId) -> Operand {
  let Some(field) = ctx.ast[r].symbol else { return Operand::Invalid };
  let field_offset = ctx.syms[field].offset;
  let field_dt = ctx.syms[field].dt.clone().unwrap_or_else(Ty::invalid);
  let field_size = field_dt.size(ctx.arch, ctx.syms);
  let field_is_array = field_dt.is_array() && !field_dt.is_invalid();

  let wrap = |mem: Mem| if field_is_array { Operand::MemRef(mem) } else { Operand::Mem(mem) };

  if op.is_deref() {
    let ptr = emitter_value(ctx, block, l, Request::Reg);
    let Operand::Reg(base) = ptr else { return Operand::Invalid };
    ctx.regs.set_width(base, 8);
    return wrap(Mem {
      base: Some(base), index: None, factor: 0, offset: field_offset, size: field_size,
    });
  }

  let base = emitter_value(ctx, block, l, Request::Mem);
  match base {
    Operand::Mem(mut mem) => {
      mem.offset += field_offset;
      mem.size = field_size;
      wrap(mem)
    }
    // Global records are reached through their label's address
    Operand::LabelMem { label, .. } => {
      let addr = get_in_reg(ctx, *block, Operand::LabelOffset(label), ctx.arch.wordsize);
      let Operand::Reg(base) = addr else { return Operand::Invalid };
      wrap(Mem {
        base: Some(base), index: None, factor: 0, offset: field_offset, size: field_size,
      })
    }
    other => other,
  }
}

/*==== Assignment ====*/

fn emitter_assign(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                  op: Op, l: NodeId, r: NodeId) -> Operand {
  let place = emitter_value(ctx, block, l, Request::Mem);

  match op {
    Op::Assign => {
      let size = operand_size(ctx, &place);

      // Aggregate assignment copies word by word
      if size > ctx.arch.wordsize {
        let source = emitter_value(ctx, block, r, Request::Mem);
        super::decl::copy_region(ctx, *block, &place, &source);
        place.free(&mut ctx.regs);
        return source;
      }

      let value = emitter_value(ctx, block, r, Request::Value);
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, *block);
        asm::mov(b, regs, &place, &value);
      }
      place.free(&mut ctx.regs);
      value
    }

    Op::MulAssign => {
      // imul cannot take a memory destination: load, multiply, store
      let value = emitter_value(ctx, block, r, Request::Reg);
      {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, *block);
        asm::bop(b, regs, asm::Bop::Mul, &value, &place);
        asm::mov(b, regs, &place, &value);
      }
      place.free(&mut ctx.regs);
      value
    }

    Op::AddAssign | Op::SubAssign | Op::AndAssign | Op::OrAssign | Op::XorAssign => {
      let scale = pointer_scale(ctx, op, l, r);
      let mut value = emitter_value(ctx, block, r, Request::Value);
      if let Some((false, elem)) = scale {
        value = scale_operand(ctx, *block, value, elem);
      }
      if let Some(opcode) = bop_opcode(ctx, op) {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, *block);
        asm::bop(b, regs, opcode, &place, &value);
      }
      place.free(&mut ctx.regs);
      value
    }

    Op::ShlAssign | Op::ShrAssign => {
      let opcode = if op == Op::ShlAssign { asm::Bop::Shl } else { asm::Bop::Shr };
      let value = emitter_value(ctx, block, r, Request::Value);

      if let Operand::Literal(_) = value {
        let regs = &ctx.regs;
        let b = ctx.ir.block_mut(ctx.fun, *block);
        asm::shift(b, regs, opcode, &place, &value);
      } else {
        let rcx_old = ctx.take_reg(*block, RegIndex::Rcx, ctx.arch.wordsize);
        {
          let regs = &ctx.regs;
          let b = ctx.ir.block_mut(ctx.fun, *block);
          asm::mov(b, regs, &Operand::Reg(RegIndex::Rcx), &value);
          asm::shift(b, regs, opcode, &place, &value);
        }
        ctx.give_back_reg(*block, RegIndex::Rcx, rcx_old);
      }
      place.free(&mut ctx.regs);
      value
    }

    Op::DivAssign | Op::ModAssign => {
      // Compute into a register, then store
      let bop_op = if op == Op::DivAssign { Op::Divide } else { Op::Modulo };
      let quotient = emitter_division_store(ctx, block, bop_op, &place, r);
      place.free(&mut ctx.regs);
      quotient
    }

    _ => {
      ctx.unhandled("emitter_assign", "operator", op.to_str());
      place.free(&mut ctx.regs);
      Operand::Invalid
    }
  }
}

/// `/=` and `%=`: run the division with the place as dividend, store the
/// result back.
fn emitter_division_store(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                          op: Op, place: &Operand, r: NodeId) -> Operand {
  let size = operand_size(ctx, place).clamp(4, 8);

  let right = emitter_value(ctx, block, r, Request::Any);
  let right = divisor_operand(ctx, *block, right, size);

  let rax_old = ctx.take_reg(*block, RegIndex::Rax, size);
  let rdx_old = ctx.take_reg(*block, RegIndex::Rdx, size);

  {
    let place_size = operand_size(ctx, place);
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    let rax = Operand::Reg(RegIndex::Rax);
    if place_size < size {
      asm::movsx(b, regs, &rax, place);
    } else {
      asm::mov(b, regs, &rax, place);
    }
    asm::division(b, regs, &right, size);
  }
  right.free(&mut ctx.regs);

  let result = Operand::Reg(ctx.regs.alloc(size));
  let source = if op == Op::Divide { RegIndex::Rax } else { RegIndex::Rdx };
  let line = format!("mov {}, {}", result.to_str(&ctx.regs), ctx.regs.name(source, size));
  ctx.out(*block, &line);

  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::mov(b, regs, place, &result);
  }

  ctx.give_back_reg(*block, RegIndex::Rdx, rdx_old);
  ctx.give_back_reg(*block, RegIndex::Rax, rax_old);

  result
}

/*==== Calls ====*/

/// Function call: spill the live caller-saved registers, push the
/// arguments right to left, call, pop the arguments, recover the
/// registers.
fn emitter_call(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                node: NodeId, l: NodeId) -> Operand {
  let fun = ctx.fun;
  let ret_dt = ctx.ast.dt(node);
  let is_void = ret_dt.is_void(ctx.syms);
  let ret_size = ret_dt.size(ctx.arch, ctx.syms).clamp(1, 8);

  // A call on a plain function name is direct; anything else goes
  // through a pointer
  let direct_target = match &ctx.ast[l].kind {
    NodeKind::Literal(Literal::Ident(_)) => ctx.ast[l].symbol.filter(|&sym| {
      ctx.syms[sym].dt.as_ref()
        .is_some_and(|dt| dt.is_function() && !dt.is_invalid())
    }),
    _ => None,
  };

  // Save the live caller-saved registers
  let saved: arrayvec::ArrayVec<RegIndex, { CALLER_SAVED_REGS.len() }> =
    CALLER_SAVED_REGS.into_iter().filter(|&r| ctx.regs.is_used(r)).collect();
  for &r in &saved {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(fun, *block);
    asm::save_reg(b, regs, r);
  }

  // Arguments go on backwards
  let args = ctx.ast[node].children.clone();
  let mut arg_size = 0;
  for &arg in args.iter().rev() {
    let pushed = emitter_value(ctx, block, arg, Request::Stack);
    if let Operand::Stack { size } = pushed {
      arg_size += size;
    }
  }

  let ret_block = ctx.ir.create_block(fun);
  match direct_target {
    Some(sym) => ctx.ir.call(fun, *block, sym, ret_block),
    None => {
      let target = emitter_value(ctx, block, l, Request::Value);
      let target_str = target.to_str(&ctx.regs);
      let target_str = target_str.strip_prefix("offset ").unwrap_or(&target_str).to_owned();
      ctx.ir.call_indirect(fun, *block, target.clone(), &target_str, ret_block);
      target.free(&mut ctx.regs);
    }
  }
  *block = ret_block;

  // Pick the return value up before anything else touches RAX
  let result = if is_void {
    Operand::Void
  } else if ctx.regs.is_used(RegIndex::Rax) {
    // The caller holds RAX; it is about to be restored, so move the
    // return value elsewhere
    let fresh = Operand::Reg(ctx.regs.alloc(ret_size));
    let line = format!("mov {}, {}",
                       fresh.to_str(&ctx.regs), ctx.regs.name(RegIndex::Rax, ret_size));
    ctx.out(*block, &line);
    fresh
  } else {
    ctx.regs.request(RegIndex::Rax, ret_size);
    Operand::Reg(RegIndex::Rax)
  };

  // Pop the arguments
  {
    let b = ctx.ir.block_mut(fun, *block);
    asm::pop_n(b, ctx.arch.wordsize, arg_size / ctx.arch.wordsize);
  }

  // Restore in reverse; stacks are LIFO
  for &r in saved.iter().rev() {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(fun, *block);
    asm::restore_reg(b, regs, r);
  }

  result
}

fn emitter_cast(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                node: NodeId, r: NodeId) -> Operand {
  let value = emitter_value(ctx, block, r, Request::Any);
  let target = ctx.ast.dt(node).size(ctx.arch, ctx.syms).clamp(1, 8);

  if matches!(value, Operand::Literal(_) | Operand::Flags(_)) {
    return value;
  }

  let current = operand_size(ctx, &value);
  if current == target {
    return value;
  }

  if current < target {
    // Widen with sign extension
    let dest = Operand::Reg(ctx.regs.alloc(target));
    {
      let regs = &ctx.regs;
      let b = ctx.ir.block_mut(ctx.fun, *block);
      asm::movsx(b, regs, &dest, &value);
    }
    value.free(&mut ctx.regs);
    dest
  } else {
    // Narrow by reinterpreting the low bytes
    let dest = get_in_reg(ctx, *block, value, current);
    if let Operand::Reg(r) = dest {
      ctx.regs.set_width(r, target);
    }
    dest
  }
}

/*==== Variadics ====*/

/// `va_start(ap, last)`: point the list just past the last named
/// parameter.
fn emitter_va_start(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                    ap: NodeId, last: NodeId) -> Operand {
  let list = emitter_value(ctx, block, ap, Request::Mem);

  let Some(param) = ctx.ast[last].symbol else {
    list.free(&mut ctx.regs);
    return Operand::Void;
  };
  let end = {
    let dt = ctx.syms[param].dt.clone().unwrap_or_else(Ty::invalid);
    ctx.syms[param].offset + ctx.arch.align_word(dt.size(ctx.arch, ctx.syms))
  };

  let addr = Operand::Reg(ctx.regs.alloc(ctx.arch.wordsize));
  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::lea(b, regs, &addr, &Operand::mem(RegIndex::Rbp, end, ctx.arch.wordsize));
    asm::mov(b, regs, &list, &addr);
  }
  addr.free(&mut ctx.regs);
  list.free(&mut ctx.regs);

  Operand::Void
}

/// `va_arg(ap, T)`: read through the list pointer, then bump it by the
/// slot size.
fn emitter_va_arg(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                  node: NodeId, ap: NodeId) -> Operand {
  let size = ctx.ast.dt(node).size(ctx.arch, ctx.syms);
  let slot = ctx.arch.align_word(size);

  let list = emitter_value(ctx, block, ap, Request::Mem);
  let ptr = Operand::Reg(ctx.regs.alloc(ctx.arch.wordsize));
  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::mov(b, regs, &ptr, &list);
    asm::bop(b, regs, asm::Bop::Add, &list, &Operand::Literal(slot));
  }
  list.free(&mut ctx.regs);

  let Operand::Reg(base) = ptr else { return Operand::Invalid };
  Operand::mem(base, 0, size)
}
