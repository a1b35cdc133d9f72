//! Declaration emission: static storage for module-level and
//! function-local statics, initializer stores and zeroing for locals.

use super::{EmitterCtx, value, zero_mem};
use crate::asm;
use crate::ast::{Literal, NodeId, NodeKind, Op};
use crate::eval;
use crate::ir::{BlockId, StaticInit};
use crate::operand::{Mem, Operand};
use crate::reg::RegIndex;
use crate::sym::{Storage, SymId, SymTag};
use crate::ty::Ty;
use value::{Request, emitter_value};

/// A module-level declaration: reserve and initialize static storage.
/// Functions already got labels; code comes from their implementations.
pub(crate) fn emitter_decl_module(ctx: &mut EmitterCtx<'_>, node: NodeId) {
  let NodeKind::Decl { .. } = ctx.ast[node].kind else { return };

  for n in 0..ctx.ast[node].children.len() {
    let child = ctx.ast[node].children[n];
    emitter_decl_static(ctx, child);
  }
}

/// Emit static storage for one declarator, if it declares a static
/// variable.
fn emitter_decl_static(ctx: &mut EmitterCtx<'_>, declarator: NodeId) {
  let Some(sym) = ctx.ast[declarator].symbol else { return };
  if ctx.syms[sym].tag != SymTag::Id { return }
  if ctx.syms[sym].storage != Storage::Static { return }

  let dt = ctx.syms[sym].dt.clone().unwrap_or_else(Ty::invalid);
  if dt.is_function() && !dt.is_invalid() { return }

  let Some(label) = ctx.syms[sym].label.clone() else { return };
  let size = dt.size(ctx.arch, ctx.syms);

  // The analyzer has already required a compile-time constant
  let init = match ctx.ast[declarator].kind {
    NodeKind::Bop { op: Op::Assign, r, .. } => static_init_value(ctx, r),
    _ => None,
  };

  ctx.ir.global(&label, true, size, init);
}

/// The static initial value of an expression: a folded integer, or the
/// label of a string constant. Compound initializers degrade to zeroed
/// storage.
fn static_init_value(ctx: &mut EmitterCtx<'_>, init: NodeId) -> Option<StaticInit> {
  if let NodeKind::Literal(Literal::Str(s)) = &ctx.ast[init].kind {
    let s = s.clone();
    let constant = ctx.ir.string_constant(&s);
    if let Operand::LabelOffset(label) = constant {
      return Some(StaticInit::Addr(label));
    }
  }

  let result = eval::eval(ctx.arch, ctx.ast, ctx.syms, init);
  result.known.then_some(StaticInit::Int(result.value))
}

/// A declaration in statement position: store initializers into the
/// fresh stack slots, zero uninitialized aggregates, and give local
/// statics their storage.
pub(crate) fn emitter_decl_local(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, node: NodeId) {
  let NodeKind::Decl { .. } = ctx.ast[node].kind else { return };

  for n in 0..ctx.ast[node].children.len() {
    let child = ctx.ast[node].children[n];
    emitter_decl_node(ctx, block, child);
  }
}

fn emitter_decl_node(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, declarator: NodeId) {
  let Some(sym) = ctx.ast[declarator].symbol else { return };
  if !matches!(ctx.syms[sym].tag, SymTag::Id) { return }

  let dt = ctx.syms[sym].dt.clone().unwrap_or_else(Ty::invalid);
  if dt.is_function() && !dt.is_invalid() {
    // A local prototype; nothing to store
    return;
  }

  match ctx.syms[sym].storage {
    // A local with static duration lives in the data section
    Storage::Static => emitter_decl_static(ctx, declarator),
    Storage::Extern => {}

    _ => {
      let place = local_place(ctx, sym, &dt);

      match ctx.ast[declarator].kind {
        NodeKind::Bop { op: Op::Assign, r, .. } => {
          if matches!(ctx.ast[r].kind, NodeKind::Literal(Literal::Init)) {
            emitter_compound_init(ctx, block, r, place);
          } else {
            emitter_init_store(ctx, block, place, r);
          }
        }

        // Uninitialized aggregates are zeroed; scalars are left alone
        _ => {
          let aggregate = !dt.is_invalid() && (dt.is_array() || dt.is_record(ctx.syms));
          if aggregate {
            zero_mem(ctx, *block, &Operand::Mem(place));
          }
        }
      }
    }
  }
}

fn local_place(ctx: &EmitterCtx<'_>, sym: SymId, dt: &Ty) -> Mem {
  Mem {
    base: Some(RegIndex::Rbp),
    index: None,
    factor: 0,
    offset: ctx.syms[sym].offset,
    size: dt.size(ctx.arch, ctx.syms),
  }
}

/// Store a computed initializer into a stack slot.
fn emitter_init_store(ctx: &mut EmitterCtx<'_>, block: &mut BlockId, place: Mem, init: NodeId) {
  if place.size > ctx.arch.wordsize {
    // Aggregate initialization from another aggregate value
    let source = emitter_value(ctx, block, init, Request::Mem);
    copy_region(ctx, *block, &Operand::Mem(place), &source);
    source.free(&mut ctx.regs);
    return;
  }

  let value = emitter_value(ctx, block, init, Request::Value);
  {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, *block);
    asm::mov(b, regs, &Operand::Mem(place), &value);
  }
  value.free(&mut ctx.regs);
}

/// Normalize labeled storage to a register-based region.
fn region_mem(ctx: &mut EmitterCtx<'_>, block: BlockId, operand: &Operand) -> Option<Mem> {
  match operand {
    Operand::Mem(mem) | Operand::MemRef(mem) => Some(*mem),
    Operand::LabelMem { label, size } => {
      let addr = ctx.regs.alloc(ctx.arch.wordsize);
      let line = format!("mov {}, offset {label}", ctx.regs.name(addr, 8));
      ctx.out(block, &line);
      Some(Mem { base: Some(addr), index: None, factor: 0, offset: 0, size: *size })
    }
    _ => None,
  }
}

/// Copy a region word by word through a scratch register. Frees any
/// registers acquired for normalization, but not the given operands'.
pub(crate) fn copy_region(ctx: &mut EmitterCtx<'_>, block: BlockId,
                          dest: &Operand, source: &Operand) {
  let (Some(dmem), Some(smem)) = (region_mem(ctx, block, dest), region_mem(ctx, block, source))
  else {
    ctx.unhandled("copy_region", "operand", "non-memory region");
    return;
  };

  let wordsize = ctx.arch.wordsize;
  let total = ctx.arch.align_word(dmem.size);
  let scratch = Operand::Reg(ctx.regs.alloc(wordsize));

  let mut from = smem;
  let mut to = dmem;
  from.size = wordsize;
  to.size = wordsize;

  let mut copied = 0;
  while copied < total {
    {
      let regs = &ctx.regs;
      let b = ctx.ir.block_mut(ctx.fun, block);
      asm::mov(b, regs, &scratch, &Operand::Mem(from));
      asm::mov(b, regs, &Operand::Mem(to), &scratch);
    }
    from.offset += wordsize;
    to.offset += wordsize;
    copied += wordsize;
  }

  scratch.free(&mut ctx.regs);
  // Release normalization registers that neither operand owns
  if !matches!(dest, Operand::Mem(_) | Operand::MemRef(_))
    && let Some(base) = dmem.base {
    ctx.regs.free(base);
  }
  if !matches!(source, Operand::Mem(_) | Operand::MemRef(_))
    && let Some(base) = smem.base {
    ctx.regs.free(base);
  }
}

/// Store a compound initializer element by element.
pub(crate) fn emitter_compound_init(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                                    node: NodeId, base: Mem) {
  let dt = ctx.ast.dt(node);
  let elements = ctx.ast[node].children.clone();

  if dt.is_record(ctx.syms) && !dt.is_invalid() {
    let Some(record) = dt.record_sym(ctx.syms) else { return };
    let fields: Vec<SymId> = ctx.syms[record].children.iter().copied()
      .filter(|&f| ctx.syms[f].tag == SymTag::Id)
      .collect();

    for (element, field) in elements.into_iter().zip(fields) {
      let field_dt = ctx.syms[field].dt.clone().unwrap_or_else(Ty::invalid);
      let place = Mem {
        offset: base.offset + ctx.syms[field].offset,
        size: field_dt.size(ctx.arch, ctx.syms),
        ..base
      };
      emitter_init_element(ctx, block, element, place);
    }

  } else if dt.is_array() && !dt.is_invalid() {
    let elem_size = dt.derive_base().size(ctx.arch, ctx.syms);

    for (n, element) in elements.into_iter().enumerate() {
      let place = Mem {
        offset: base.offset + elem_size * n as i32,
        size: elem_size,
        ..base
      };
      emitter_init_element(ctx, block, element, place);
    }
  }
}

fn emitter_init_element(ctx: &mut EmitterCtx<'_>, block: &mut BlockId,
                        element: NodeId, place: Mem) {
  if matches!(ctx.ast[element].kind, NodeKind::Literal(Literal::Init)) {
    emitter_compound_init(ctx, block, element, place);
  } else {
    emitter_init_store(ctx, block, place, element);
  }
}
