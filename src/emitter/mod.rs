//! Code generation: lowers the annotated AST into the IR, allocating the
//! stack frame and threading a current block through every statement.
//!
//! Statements split the block graph (branches, loops, returns); the
//! expression lowering lives in `value`, declarations in `decl`.

pub mod decl;
pub mod value;

use crate::arch::Architecture;
use crate::ast::{Ast, NodeId, NodeKind};
use crate::ir::{BlockId, FnId, IrCtx};
use crate::operand::{Cond, Operand};
use crate::reg::{RegFile, RegIndex};
use crate::sym::{Storage, SymId, SymTable, SymTag};

use value::{Request, emitter_value};

/// The emitter context for one translation unit.
pub(crate) struct EmitterCtx<'a> {
  pub ir: &'a mut IrCtx,
  pub ast: &'a Ast,
  pub syms: &'a mut SymTable,
  pub arch: &'a Architecture,

  /// The register file. Explicit state of the stack-discipline allocator.
  pub regs: RegFile,

  /// The function being emitted.
  pub fun: FnId,
  /// Jump targets for `return`, `break` and `continue`.
  pub return_to: Option<BlockId>,
  pub break_to: Option<BlockId>,
  pub continue_to: Option<BlockId>,

  /// Disambiguates the labels of function-local statics.
  static_no: u32,

  pub internal_errors: u32,
}

impl<'a> EmitterCtx<'a> {
  /// Log an unhandled-case internal error and keep going.
  pub fn unhandled(&mut self, function: &str, what: &str, which: &str) {
    log::error!("internal error({function}): unhandled {what}: '{which}'");
    self.internal_errors += 1;
  }

  /// Append a formatted instruction to a block of the current function.
  pub fn out(&mut self, block: BlockId, line: &str) {
    self.ir.block_out(self.fun, block, line);
  }

  /// Forcibly acquire a specific register, spilling its current contents
  /// to the stack if it is in use. Returns the width to hand back to
  /// [`give_back_reg`](Self::give_back_reg).
  pub fn take_reg(&mut self, block: BlockId, r: RegIndex, size: i32) -> i32 {
    let old = self.regs.allocated_as(r);
    if old != 0 {
      let line = format!("push {}", self.regs.name(r, 8));
      self.out(block, &line);
    }
    self.regs.set_width(r, size);
    old
  }

  /// Undo a [`take_reg`](Self::take_reg).
  pub fn give_back_reg(&mut self, block: BlockId, r: RegIndex, old: i32) {
    if old != 0 {
      let line = format!("pop {}", self.regs.name(r, 8));
      self.out(block, &line);
      self.regs.set_width(r, old);
    } else {
      self.regs.free(r);
    }
  }

  /// A unique label for a function-local static.
  pub fn local_static_label(&mut self, ident: &str) -> String {
    let label = format!("{}.{}", self.arch.mangle(ident), self.static_no);
    self.static_no += 1;
    label
  }
}

/// Lower an analyzed module to IR, returning the IR context and the
/// number of internal errors hit on the way.
pub fn emitter(ast: &Ast, syms: &mut SymTable, arch: &Architecture,
               tree: NodeId) -> (IrCtx, u32) {
  let mut ir = IrCtx::new();

  let mut ctx = EmitterCtx {
    ir: &mut ir,
    ast,
    syms,
    arch,
    regs: RegFile::new(),
    fun: FnId(0),
    return_to: None,
    break_to: None,
    continue_to: None,
    static_no: 0,
    internal_errors: 0,
  };

  assign_labels(&mut ctx);
  emitter_module(&mut ctx, tree);
  let emitter_errors = ctx.internal_errors;

  let internal_errors = emitter_errors + ir.internal_errors;
  (ir, internal_errors)
}

/// Give every function and every static-storage variable its linker
/// label, including symbols pulled in from used modules.
fn assign_labels(ctx: &mut EmitterCtx<'_>) {
  for sym in ctx.syms.ids().collect::<Vec<_>>() {
    let s = &ctx.syms[sym];
    if s.tag != SymTag::Id || s.label.is_some() { continue }

    let is_fn = s.dt.as_ref().is_some_and(crate::ty::Ty::is_function);
    let is_static_storage = matches!(s.storage, Storage::Static | Storage::Extern);
    if !is_fn && !is_static_storage { continue }

    // A local static shares its name freely; disambiguate
    let module_level = s.parent
      .is_some_and(|p| ctx.syms[p].parent == Some(ctx.syms.global) || p == ctx.syms.global);
    let label = if is_fn || module_level {
      ctx.arch.mangle(&ctx.syms[sym].ident)
    } else {
      let ident = ctx.syms[sym].ident.clone();
      ctx.local_static_label(&ident)
    };
    ctx.syms[sym].label = Some(label);
  }
}

fn emitter_module(ctx: &mut EmitterCtx<'_>, tree: NodeId) {
  log::debug!("emitting module");

  for n in 0..ctx.ast[tree].children.len() {
    let child = ctx.ast[tree].children[n];
    match &ctx.ast[child].kind {
      NodeKind::FnImpl { .. } => emitter_fn_impl(ctx, child),
      NodeKind::Decl { .. } => decl::emitter_decl_module(ctx, child),
      NodeKind::Using { .. } | NodeKind::Empty | NodeKind::Invalid => {}
      kind => {
        let kind = format!("{kind:?}");
        ctx.unhandled("emitter_module", "AST node", &kind);
      }
    }
  }
}

fn emitter_fn_impl(ctx: &mut EmitterCtx<'_>, node: NodeId) {
  let NodeKind::FnImpl { body, .. } = ctx.ast[node].kind else { unreachable!() };

  let Some(sym) = ctx.ast[node].symbol else { return };
  let Some(label) = ctx.syms[sym].label.clone() else { return };

  log::debug!("emitting fn {label}");

  let stacksize = fn_allocate_stack(ctx.arch, ctx.syms, sym);
  let fun = ctx.ir.create_fn(&label, stacksize);
  ctx.syms[sym].ir_fn = Some(fun);
  ctx.fun = fun;

  let epilogue = ctx.ir.fns[fun].epilogue;
  let old_return = ctx.return_to.replace(epilogue);

  let entry = ctx.ir.fns[fun].entry;
  let end = emitter_code(ctx, entry, body);
  ctx.ir.jump(fun, end, epilogue);

  ctx.return_to = old_return;
}

/// Compute the stack frame: parameters get positive offsets past the
/// saved frame pointer and return address, locals negative offsets by a
/// depth-first scope walk. Returns the frame size to reserve.
pub(crate) fn fn_allocate_stack(arch: &Architecture, syms: &mut SymTable, fun: SymId) -> i32 {
  // Two words already on the stack: the return address and the saved base
  // pointer
  let mut param_offset = 2 * arch.wordsize;

  // Oversize return values travel through a hidden temporary
  let returns_big = syms[fun].dt.as_ref()
    .is_some_and(|dt| dt.derive_return().size(arch, syms) > arch.wordsize);
  if returns_big {
    param_offset += arch.wordsize;
  }

  for n in 0..syms[fun].children.len() {
    let param = syms[fun].children[n];
    if syms[param].tag != SymTag::Param { continue }

    let size = syms[param].dt.clone().map_or(arch.wordsize, |dt| dt.size(arch, syms));
    syms[param].offset = param_offset;
    param_offset += arch.align_word(size);
  }

  // The stack grows down; the frame size is the negation of the last
  // offset handed out
  -scope_assign_offsets(arch, syms, fun, 0)
}

fn scope_assign_offsets(arch: &Architecture, syms: &mut SymTable, scope: SymId,
                        mut offset: i32) -> i32 {
  for n in 0..syms[scope].children.len() {
    let child = syms[scope].children[n];
    match syms[child].tag {
      SymTag::Scope => offset = scope_assign_offsets(arch, syms, child, offset),
      SymTag::Id if syms[child].storage == Storage::Auto => {
        let size = syms[child].dt.clone().map_or(0, |dt| dt.size(arch, syms));
        offset -= arch.align_word(size);
        syms[child].offset = offset;
      }
      _ => {}
    }
  }
  offset
}

/// Emit a compound statement into `block`, returning the block control
/// continues in.
pub(crate) fn emitter_code(ctx: &mut EmitterCtx<'_>, mut block: BlockId, node: NodeId) -> BlockId {
  for n in 0..ctx.ast[node].children.len() {
    let child = ctx.ast[node].children[n];
    block = emitter_line(ctx, block, child);
  }
  block
}

fn emitter_line(ctx: &mut EmitterCtx<'_>, mut block: BlockId, node: NodeId) -> BlockId {
  match &ctx.ast[node].kind {
    NodeKind::Empty | NodeKind::Invalid => block,

    NodeKind::Code => emitter_code(ctx, block, node),
    NodeKind::Branch { .. } => emitter_branch(ctx, block, node),
    NodeKind::Loop { .. } => emitter_loop(ctx, block, node),
    NodeKind::Iter { .. } => emitter_iter(ctx, block, node),
    NodeKind::Decl { .. } => {
      decl::emitter_decl_local(ctx, &mut block, node);
      block
    }

    NodeKind::Return { value } => {
      let value = *value;
      if let Some(value) = value {
        let result = emitter_value(ctx, &mut block, value, Request::Return);
        result.free(&mut ctx.regs);
      }
      let target = ctx.return_to.expect("return outside function");
      ctx.ir.jump(ctx.fun, block, target);
      ctx.ir.create_block(ctx.fun)
    }

    NodeKind::Break => {
      match ctx.break_to {
        Some(target) => ctx.ir.jump(ctx.fun, block, target),
        None => ctx.unhandled("emitter_line", "break", "outside loop"),
      }
      ctx.ir.create_block(ctx.fun)
    }

    NodeKind::Continue => {
      match ctx.continue_to {
        Some(target) => ctx.ir.jump(ctx.fun, block, target),
        None => ctx.unhandled("emitter_line", "continue", "outside loop"),
      }
      ctx.ir.create_block(ctx.fun)
    }

    _ if ctx.ast.is_value(node) => {
      let result = emitter_value(ctx, &mut block, node, Request::Void);
      result.free(&mut ctx.regs);
      block
    }

    kind => {
      let kind = format!("{kind:?}");
      ctx.unhandled("emitter_line", "AST node", &kind);
      block
    }
  }
}

/// Evaluate `cond` and branch: control reaches `if_true` when it holds,
/// `if_false` otherwise. An `Empty` condition always holds.
pub(crate) fn branch_on_value(ctx: &mut EmitterCtx<'_>, mut block: BlockId, cond: NodeId,
                              if_true: BlockId, if_false: BlockId) {
  if matches!(ctx.ast[cond].kind, NodeKind::Empty) {
    ctx.ir.jump(ctx.fun, block, if_true);
    return;
  }

  let flags = emitter_value(ctx, &mut block, cond, Request::Flags);
  let cond = match flags {
    Operand::Flags(cond) => cond,
    _ => Cond::Equal,
  };
  ctx.ir.branch(ctx.fun, block, cond, if_true, if_false);
}

fn emitter_branch(ctx: &mut EmitterCtx<'_>, block: BlockId, node: NodeId) -> BlockId {
  let NodeKind::Branch { cond, l, r } = ctx.ast[node].kind else { unreachable!() };

  let then_block = ctx.ir.create_block(ctx.fun);
  let else_block = r.map(|_| ctx.ir.create_block(ctx.fun));
  let join = ctx.ir.create_block(ctx.fun);

  branch_on_value(ctx, block, cond, then_block, else_block.unwrap_or(join));

  let end = emitter_code(ctx, then_block, l);
  ctx.ir.jump(ctx.fun, end, join);

  if let (Some(r), Some(else_block)) = (r, else_block) {
    let end = emitter_code(ctx, else_block, r);
    ctx.ir.jump(ctx.fun, end, join);
  }

  join
}

fn emitter_loop(ctx: &mut EmitterCtx<'_>, block: BlockId, node: NodeId) -> BlockId {
  let NodeKind::Loop { cond, body, is_do } = ctx.ast[node].kind else { unreachable!() };

  let check = ctx.ir.create_block(ctx.fun);
  let body_block = ctx.ir.create_block(ctx.fun);
  let after = ctx.ir.create_block(ctx.fun);

  // A while loop tests before the first iteration, a do loop after
  ctx.ir.jump(ctx.fun, block, if is_do { body_block } else { check });

  let old_break = ctx.break_to.replace(after);
  let old_continue = ctx.continue_to.replace(check);
  let end = emitter_code(ctx, body_block, body);
  ctx.break_to = old_break;
  ctx.continue_to = old_continue;

  ctx.ir.jump(ctx.fun, end, check);
  branch_on_value(ctx, check, cond, body_block, after);

  after
}

fn emitter_iter(ctx: &mut EmitterCtx<'_>, mut block: BlockId, node: NodeId) -> BlockId {
  let NodeKind::Iter { init, cond, step, body } = ctx.ast[node].kind else { unreachable!() };

  // Initialize
  match &ctx.ast[init].kind {
    NodeKind::Empty => {}
    NodeKind::Decl { .. } => decl::emitter_decl_local(ctx, &mut block, init),
    _ => {
      let result = emitter_value(ctx, &mut block, init, Request::Void);
      result.free(&mut ctx.regs);
    }
  }

  let check = ctx.ir.create_block(ctx.fun);
  let body_block = ctx.ir.create_block(ctx.fun);
  let step_block = ctx.ir.create_block(ctx.fun);
  let after = ctx.ir.create_block(ctx.fun);

  ctx.ir.jump(ctx.fun, block, check);
  branch_on_value(ctx, check, cond, body_block, after);

  let old_break = ctx.break_to.replace(after);
  let old_continue = ctx.continue_to.replace(step_block);
  let end = emitter_code(ctx, body_block, body);
  ctx.break_to = old_break;
  ctx.continue_to = old_continue;
  ctx.ir.jump(ctx.fun, end, step_block);

  let mut sb = step_block;
  if !matches!(ctx.ast[step].kind, NodeKind::Empty) {
    let result = emitter_value(ctx, &mut sb, step, Request::Void);
    result.free(&mut ctx.regs);
  }
  ctx.ir.jump(ctx.fun, sb, check);

  after
}

/// Zero uninitialized storage. `REP STOS` above a size threshold scaled
/// by current register pressure, an unrolled move sequence below it.
pub(crate) fn zero_mem(ctx: &mut EmitterCtx<'_>, block: BlockId, dest: &Operand) {
  let mem = match dest {
    Operand::Mem(mem) | Operand::MemRef(mem) => *mem,
    _ => {
      ctx.unhandled("zero_mem", "operand", "non-memory");
      return;
    }
  };

  let size = mem.size;
  let wordsize = ctx.arch.wordsize;

  let pressure = i32::from(ctx.regs.is_used(RegIndex::Rax))
    + i32::from(ctx.regs.is_used(RegIndex::Rcx))
    + i32::from(ctx.regs.is_used(RegIndex::Rdi));

  if size >= wordsize * 10 * (1 + pressure) {
    let rax_old = ctx.take_reg(block, RegIndex::Rax, wordsize);
    let rcx_old = ctx.take_reg(block, RegIndex::Rcx, wordsize);
    let rdi_old = ctx.take_reg(block, RegIndex::Rdi, wordsize);

    let excess = size % wordsize;
    {
      let regs = &ctx.regs;
      let b = ctx.ir.block_mut(ctx.fun, block);
      crate::asm::rep_stos(b, regs, dest, wordsize, size - excess);
      if excess != 0 {
        let tail = Operand::mem(RegIndex::Rdi, 0, excess);
        crate::asm::mov(b, regs, &tail, &Operand::Literal(0));
      }
    }

    ctx.give_back_reg(block, RegIndex::Rdi, rdi_old);
    ctx.give_back_reg(block, RegIndex::Rcx, rcx_old);
    ctx.give_back_reg(block, RegIndex::Rax, rax_old);

  } else {
    let regs = &ctx.regs;
    let b = ctx.ir.block_mut(ctx.fun, block);
    let mut chunk = mem;
    chunk.size = wordsize;

    let mut done = 0;
    while done + wordsize <= size {
      crate::asm::mov(b, regs, &Operand::Mem(chunk), &Operand::Literal(0));
      chunk.offset += wordsize;
      done += wordsize;
    }
    if done < size {
      chunk.size = size - done;
      crate::asm::mov(b, regs, &Operand::Mem(chunk), &Operand::Literal(0));
    }
  }
}
