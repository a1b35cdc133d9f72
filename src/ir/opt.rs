//! Block level analysis: two fixed-point passes over each function's
//! block graph.
//!
//! 1. Unreachable block removal (UBR): a block with no predecessors is
//!    deleted and its edges unlinked.
//! 2. Linear block combination (LBC): a block whose sole successor has
//!    only it as predecessor is spliced with that successor. Transitively
//!    this fuses whole linear chains.
//!
//! UBR informs LBC: removing a block can reduce another's predecessor
//! count to one, enabling a merge. The reverse does not hold, so UBR runs
//! first.

use super::{FnId, IrCtx};
use crate::idx::Idx;

/// Run UBR then LBC to fixed point on every function.
pub fn block_level_analysis(ctx: &mut IrCtx) {
  for n in 0..ctx.fns.len() {
    let fun = FnId::from_usize(n);
    ubr(ctx, fun);
    lbc(ctx, fun);
  }
}

/// Unreachable block removal. Restarts the scan after each deletion,
/// since deleting one block can orphan another.
fn ubr(ctx: &mut IrCtx, fun: FnId) {
  'restart: loop {
    for block in ctx.block_ids(fun) {
      if ctx.pred_count(fun, block) == 0 {
        log::debug!("ubr: removing unreachable block {}",
                    ctx.fns[fun].blocks[block].as_ref().expect("live block").label);
        ctx.block_delete(fun, block);
        continue 'restart;
      }
    }
    return;
  }
}

/// Linear block combination. Restarts after each merge; a merge can
/// create a longer mergeable chain.
fn lbc(ctx: &mut IrCtx, fun: FnId) {
  'restart: loop {
    for block in ctx.block_ids(fun) {
      // Exactly one successor (a call's callee edge counts, keeping call
      // boundaries intact), whose only predecessor is this block
      if ctx.succ_count(fun, block) != 1 { continue }

      let succ = ctx.fns[fun].blocks[block].as_ref().expect("live block").succs[0];
      if succ == block || ctx.pred_count(fun, succ) != 1 { continue }

      log::debug!("lbc: combining {} <- {}",
                  ctx.fns[fun].blocks[block].as_ref().expect("live block").label,
                  ctx.fns[fun].blocks[succ].as_ref().expect("live block").label);
      ctx.blocks_combine(fun, block, succ);
      continue 'restart;
    }
    return;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::{IrCtx, Term};
  use crate::operand::Cond;

  #[test]
  fn removes_unreachable_blocks() {
    let mut ir = IrCtx::new();
    let f = ir.create_fn("f", 0);
    let entry = ir.fns[f].entry;
    let epilogue = ir.fns[f].epilogue;

    // entry jumps straight to the epilogue; orphan never runs
    let orphan = ir.create_block(f);
    ir.jump(f, entry, epilogue);
    ir.jump(f, orphan, epilogue);

    block_level_analysis(&mut ir);
    assert!(ir.fns[f].blocks[orphan].is_none());
  }

  #[test]
  fn fuses_linear_chains() {
    let mut ir = IrCtx::new();
    let f = ir.create_fn("f", 0);
    let entry = ir.fns[f].entry;
    let epilogue = ir.fns[f].epilogue;

    let a = ir.create_block(f);
    let b = ir.create_block(f);
    ir.block_mut(f, a).out("mov rax, 1");
    ir.block_mut(f, b).out("mov rbx, 2");
    ir.jump(f, entry, a);
    ir.jump(f, a, b);
    ir.jump(f, b, epilogue);

    block_level_analysis(&mut ir);

    // The whole chain collapses into the prologue block
    let prologue = ir.fns[f].prologue;
    let text = &ir.fns[f].blocks[prologue].as_ref().unwrap().instrs;
    assert!(text.contains("mov rax, 1") && text.contains("mov rbx, 2"));
    assert!(ir.fns[f].blocks[a].is_none());
    assert!(ir.fns[f].blocks[b].is_none());
    // The epilogue merged too; the distinguished id was updated
    assert!(matches!(
      ir.fns[f].blocks[ir.fns[f].epilogue].as_ref().unwrap().term,
      Some(Term::Return)));
  }

  #[test]
  fn branches_block_fusion() {
    let mut ir = IrCtx::new();
    let f = ir.create_fn("f", 0);
    let entry = ir.fns[f].entry;
    let epilogue = ir.fns[f].epilogue;

    let t = ir.create_block(f);
    let e = ir.create_block(f);
    ir.branch(f, entry, Cond::Equal, t, e);
    ir.jump(f, t, epilogue);
    ir.jump(f, e, epilogue);

    block_level_analysis(&mut ir);

    // Both arms survive: neither is the epilogue's sole predecessor
    assert!(ir.fns[f].blocks[t].is_some());
    assert!(ir.fns[f].blocks[e].is_some());
  }

  #[test]
  fn optimizing_twice_is_a_no_op() {
    let mut ir = IrCtx::new();
    let f = ir.create_fn("f", 0);
    let entry = ir.fns[f].entry;
    let epilogue = ir.fns[f].epilogue;
    let a = ir.create_block(f);
    ir.jump(f, entry, a);
    ir.jump(f, a, epilogue);

    block_level_analysis(&mut ir);
    let after_once: Vec<_> = ir.block_ids(f);
    block_level_analysis(&mut ir);
    assert_eq!(ir.block_ids(f), after_once);
  }
}
