//! Semantic analysis: walks the module tree attaching types to AST nodes
//! and symbols, validating operator applicability, declarations,
//! initializers and control flow.
//!
//! Analysis never aborts; invalid types flow through the rest of the
//! expression to keep one mistake from echoing.

pub mod decl;
pub mod value;

use hashbrown::HashSet;

use crate::Builtins;
use crate::arch::Architecture;
use crate::ast::{Ast, NodeId, NodeKind};
use crate::error;
use crate::sym::{SymId, SymTable};
use crate::ty::Ty;

/// The result of analyzing a module.
#[derive(Debug, Default)]
pub struct AnalyzerResult {
  pub errors: u32,
  pub warnings: u32,
  pub internal_errors: u32,
}

/// Analysis context local to the function being analyzed.
pub(crate) struct FnCtx {
  pub fun: SymId,
  pub return_ty: Ty,
}

/// The analyzer context for one module walk.
pub(crate) struct AnalyzerCtx<'a> {
  pub ast: &'a mut Ast,
  pub syms: &'a mut SymTable,
  pub arch: &'a Architecture,
  pub builtins: &'a Builtins,

  /// The enclosing function, for `return` and `va_start`.
  pub fnctx: Option<FnCtx>,

  /// Incomplete basic symbols already reported, so the same missing
  /// struct is not diagnosed at every use.
  pub incomplete_decl_ignore: HashSet<SymId>,
  pub incomplete_ptr_ignore: HashSet<SymId>,

  pub errors: u32,
  pub warnings: u32,
  pub internal_errors: u32,
}

impl<'a> AnalyzerCtx<'a> {
  /// Log an unhandled-case internal error and keep going.
  pub fn unhandled(&mut self, function: &str, what: &str, which: &str) {
    log::error!("internal error({function}): unhandled {what}: '{which}'");
    self.internal_errors += 1;
  }
}

/// Analyze a module tree, attaching types and diagnosing misuse.
pub fn analyzer(ast: &mut Ast, syms: &mut SymTable, arch: &Architecture,
                builtins: &Builtins, tree: NodeId) -> AnalyzerResult {
  let mut ctx = AnalyzerCtx {
    ast, syms, arch, builtins,
    fnctx: None,
    incomplete_decl_ignore: HashSet::new(),
    incomplete_ptr_ignore: HashSet::new(),
    errors: 0,
    warnings: 0,
    internal_errors: 0,
  };

  analyzer_module(&mut ctx, tree);

  AnalyzerResult {
    errors: ctx.errors,
    warnings: ctx.warnings,
    internal_errors: ctx.internal_errors,
  }
}

fn analyzer_module(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  log::debug!("analyzing module");

  for n in 0..ctx.ast[node].children.len() {
    let child = ctx.ast[node].children[n];
    analyzer_node(ctx, child, true);
  }
}

/// Analyze one statement-or-declaration node.
pub(crate) fn analyzer_node(ctx: &mut AnalyzerCtx<'_>, node: NodeId, module: bool) {
  match &ctx.ast[node].kind {
    NodeKind::Empty | NodeKind::Invalid | NodeKind::Using { .. } => {}

    NodeKind::FnImpl { .. } => analyzer_fn_impl(ctx, node),
    NodeKind::Decl { .. } => decl::analyzer_decl(ctx, node, module),

    NodeKind::Code => analyzer_code(ctx, node),
    NodeKind::Branch { .. } => analyzer_branch(ctx, node),
    NodeKind::Loop { .. } => analyzer_loop(ctx, node),
    NodeKind::Iter { .. } => analyzer_iter(ctx, node),
    NodeKind::Return { .. } => analyzer_return(ctx, node),
    NodeKind::Break | NodeKind::Continue => {}

    _ if ctx.ast.is_value(node) => {
      // Statement expression; the value is discarded
      value::analyzer_value(ctx, node);
    }

    _ => ctx.unhandled("analyzer_node", "AST node", &format!("{:?}", ctx.ast[node].kind)),
  }
}

fn analyzer_fn_impl(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  log::trace!("FnImpl");

  let NodeKind::FnImpl { decl, body } = ctx.ast[node].kind else { unreachable!() };

  decl::analyzer_decl(ctx, decl, true);

  let Some(fun) = ctx.ast[node].symbol else {
    analyzer_node(ctx, body, false);
    return;
  };

  // The implemented symbol must be a function
  let dt = ctx.syms[fun].dt.clone().unwrap_or_else(Ty::invalid);
  if !dt.is_function() {
    error::fn_tag(ctx, node);
  }

  let old = ctx.fnctx.replace(FnCtx { fun, return_ty: dt.derive_return() });
  analyzer_node(ctx, body, false);
  ctx.fnctx = old;
}

fn analyzer_code(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  for n in 0..ctx.ast[node].children.len() {
    let child = ctx.ast[node].children[n];
    analyzer_node(ctx, child, false);
  }
}

fn analyzer_branch(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  log::trace!("Branch");

  let NodeKind::Branch { cond, l, r } = ctx.ast[node].kind else { unreachable!() };

  let cond_dt = value::analyzer_value(ctx, cond);
  if !cond_dt.is_condition(ctx.syms) {
    error::type_expected(ctx, cond, "if", "a condition");
  }

  analyzer_node(ctx, l, false);
  if let Some(r) = r {
    analyzer_node(ctx, r, false);
  }
}

fn analyzer_loop(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  log::trace!("Loop");

  let NodeKind::Loop { cond, body, is_do } = ctx.ast[node].kind else { unreachable!() };

  let cond_dt = value::analyzer_value(ctx, cond);
  if !cond_dt.is_condition(ctx.syms) {
    let where_ = if is_do { "do loop" } else { "while loop" };
    error::type_expected(ctx, cond, where_, "a condition");
  }

  analyzer_node(ctx, body, false);
}

fn analyzer_iter(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  log::trace!("Iter");

  let NodeKind::Iter { init, cond, step, body } = ctx.ast[node].kind else { unreachable!() };

  match &ctx.ast[init].kind {
    NodeKind::Empty => {}
    NodeKind::Decl { .. } => decl::analyzer_decl(ctx, init, false),
    _ => { value::analyzer_value(ctx, init); }
  }

  if !matches!(ctx.ast[cond].kind, NodeKind::Empty) {
    let cond_dt = value::analyzer_value(ctx, cond);
    if !cond_dt.is_condition(ctx.syms) {
      error::type_expected(ctx, cond, "for loop", "a condition");
    }
  }

  if !matches!(ctx.ast[step].kind, NodeKind::Empty) {
    value::analyzer_value(ctx, step);
  }

  analyzer_node(ctx, body, false);
}

fn analyzer_return(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  log::trace!("Return");

  let NodeKind::Return { value } = ctx.ast[node].kind else { unreachable!() };

  let Some(value) = value else { return };
  let found = value::analyzer_value(ctx, value);

  if let Some(fnctx) = &ctx.fnctx {
    let expected = fnctx.return_ty.clone();
    if !found.is_compatible(&expected) {
      error::return_type(ctx, value, &expected, &found);
    }
  }
}
