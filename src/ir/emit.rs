//! Serialization of the optimized IR into the assembly writer: functions
//! in creation order, each block's label, pending text and terminator,
//! then the static data sections.

use super::{FnId, IrCtx, Term};
use crate::asm::AsmCtx;
use crate::idx::Idx;
use crate::ir::{BlockId, StaticData};
use crate::sym::SymTable;

/// Write the whole IR context out.
pub fn emit(ctx: &IrCtx, syms: &SymTable, asm: &mut AsmCtx) {
  asm.file_prologue();

  for n in 0..ctx.fns.len() {
    emit_fn(ctx, syms, asm, FnId::from_usize(n));
  }

  let statics: Vec<_> = ctx.sdata.iter()
    .filter(|d| matches!(d, StaticData::Global { .. }))
    .collect();
  if !statics.is_empty() {
    asm.data_section();
    for data in statics {
      if let StaticData::Global { label, global, size, init } = data {
        asm.static_data(label, *global, *size, init.as_ref());
      }
    }
  }

  let strings: Vec<_> = ctx.sdata.iter()
    .filter(|d| matches!(d, StaticData::StringConstant { .. }))
    .collect();
  if !strings.is_empty() {
    asm.rodata_section();
    for data in strings {
      if let StaticData::StringConstant { label, value } = data {
        asm.string_constant(label, value);
      }
    }
  }

  asm.file_epilogue();
}

fn emit_fn(ctx: &IrCtx, syms: &SymTable, asm: &mut AsmCtx, fun: FnId) {
  log::debug!("emitting fn {}", ctx.fns[fun].name);

  asm.fn_linkage(&ctx.fns[fun].name);

  let blocks = ctx.block_ids(fun);
  for (n, &block) in blocks.iter().enumerate() {
    let next = blocks.get(n + 1).copied();
    emit_block(ctx, syms, asm, fun, block, next);
  }
}

fn emit_block(ctx: &IrCtx, syms: &SymTable, asm: &mut AsmCtx,
              fun: FnId, block: BlockId, next: Option<BlockId>) {
  let b = ctx.fns[fun].blocks[block].as_ref().expect("live block");

  asm.label(&b.label);
  asm.enter();

  for line in b.instrs.lines() {
    asm.out(line);
  }

  // Terminators that continue in another block jump there, unless it
  // follows immediately
  let jump_to = match &b.term {
    Some(Term::Jump(to)) => Some(*to),

    Some(Term::Branch { cond, if_true, if_false }) => {
      if let crate::operand::Operand::Flags(cond) = cond {
        let target = ctx.fns[fun].blocks[*if_false].as_ref().expect("live block");
        asm.branch(*cond, &target.label);
      }
      Some(*if_true)
    }

    Some(Term::Call { target, ret }) => {
      match &syms[*target].label {
        Some(label) => asm.call(label),
        None => asm.call(&syms[*target].ident),
      }
      Some(*ret)
    }

    // The call instruction itself is already in the block text
    Some(Term::CallIndirect { ret, .. }) => Some(*ret),

    Some(Term::Return) => {
      asm.ret();
      None
    }

    None => {
      log::error!("internal error(emit_block): unterminated block {}", b.label);
      None
    }
  };

  if let Some(to) = jump_to
    && next != Some(to) {
    let target = ctx.fns[fun].blocks[to].as_ref().expect("live block");
    asm.jump(&target.label);
  }

  asm.leave();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::IrCtx;

  #[test]
  fn fallthrough_jumps_are_elided() {
    let mut ir = IrCtx::new();
    let f = ir.create_fn("f", 0);
    let entry = ir.fns[f].entry;
    let epilogue = ir.fns[f].epilogue;
    ir.jump(f, entry, epilogue);

    let syms = SymTable::new();
    let mut asm = AsmCtx::new();
    emit(&ir, &syms, &mut asm);
    let text = asm.into_string();

    // prologue -> entry -> epilogue are consecutive; no jumps needed
    assert!(!text.contains("jmp"));
    assert!(text.contains("ret"));
  }

  #[test]
  fn branch_emits_conditional_jump_to_false_path() {
    let mut ir = IrCtx::new();
    let f = ir.create_fn("f", 0);
    let entry = ir.fns[f].entry;
    let epilogue = ir.fns[f].epilogue;

    let then = ir.create_block(f);
    let els = ir.create_block(f);
    ir.branch(f, entry, crate::operand::Cond::Equal, then, els);
    ir.jump(f, then, epilogue);
    ir.jump(f, els, epilogue);

    let else_label = ir.fns[f].blocks[els].as_ref().unwrap().label.clone();
    let syms = SymTable::new();
    let mut asm = AsmCtx::new();
    emit(&ir, &syms, &mut asm);
    let text = asm.into_string();

    assert!(text.contains(&format!("je {else_label}")));
  }
}
