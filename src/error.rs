//! User-facing diagnostics.
//!
//! Every diagnostic is a line-prefixed `file:line:col: error: ...` message
//! on stderr, with identifiers, types, operators and numbers highlighted.
//! Parser errors on the same source line as the previous one are
//! suppressed to avoid cascades, except that each distinct undefined name
//! gets its own report.

use crate::analyzer::AnalyzerCtx;
use crate::ast::{NodeId, Op};
use crate::lexer::Loc;
use crate::parser::ParserCtx;
use crate::sym::{SymId, SymTable, SymTag};
use crate::ty::Ty;

const NORMAL: &str = "\x1b[0m";
const RED: &str = "\x1b[1;31m";
const GREEN: &str = "\x1b[1;32m";
const MAGENTA: &str = "\x1b[1;35m";
const CYAN: &str = "\x1b[1;36m";
const WHITE: &str = "\x1b[1;37m";

/// A highlighted string: an identifier or quoted source text.
fn hl(s: &str) -> String { format!("{WHITE}{s}{NORMAL}") }

/// A highlighted operator.
fn op_str(o: Op) -> String { format!("{CYAN}{}{NORMAL}", o.to_str()) }

/// A highlighted number.
fn num(n: i32) -> String { format!("{MAGENTA}{n}{NORMAL}") }

/// A highlighted type.
fn ty_str(syms: &SymTable, ty: &Ty) -> String {
  format!("{GREEN}{}{NORMAL}", ty.to_str(syms))
}

/// A symbol with its declared type embedded around its name, `int x[5]`
/// style. Falls back to `tag ident` for non-value symbols.
fn named_sym(syms: &SymTable, sym: SymId) -> String {
  let s = &syms[sym];
  match s.tag {
    SymTag::Id | SymTag::Param => match &s.dt {
      Some(dt) => {
        let embedded = format!("{WHITE}{}{GREEN}", s.ident);
        format!("{GREEN}{}{NORMAL}", dt.to_str_embed(syms, &embedded))
      }
      None => hl(&s.ident),
    },
    tag => format!("{CYAN}{}{NORMAL} {WHITE}{}{NORMAL}", tag.to_str(), s.ident),
  }
}

fn loc_prefix(loc: &Loc) -> String {
  format!("{}:{}:{}: ", loc.file, loc.line, loc.col)
}

fn print_error(loc: &Loc, msg: &str) {
  eprintln!("{}{RED}error{NORMAL}: {msg}", loc_prefix(loc));
}

/// A secondary note attached to the previous error.
fn note(loc: &Loc, msg: &str) {
  eprintln!("{}{msg}", loc_prefix(loc));
}

/*==== Parser errors ====*/

fn report_parser(ctx: &mut ParserCtx<'_>, msg: &str) {
  let loc = ctx.loc();
  if loc.line == ctx.last_error_line { return }

  print_error(&loc, msg);
  ctx.errors += 1;
  ctx.last_error_line = loc.line;
}

pub(crate) fn expected(ctx: &mut ParserCtx<'_>, expected: &str) {
  let msg = format!("expected {}, found '{}'", hl(expected), hl(&ctx.lexer.buffer));
  report_parser(ctx, &msg);
}

pub(crate) fn undef_sym(ctx: &mut ParserCtx<'_>, name: &str) {
  // One report per distinct undefined name per line
  let line = ctx.loc().line;
  if !ctx.reported_undef.insert((line, name.to_owned())) { return }

  let loc = ctx.loc();
  print_error(&loc, &format!("'{}' undefined", hl(name)));
  ctx.errors += 1;
  ctx.last_error_line = line;
}

pub(crate) fn undef_type(ctx: &mut ParserCtx<'_>) {
  let msg = format!("'{}' undefined, expected type", hl(&ctx.lexer.buffer));
  report_parser(ctx, &msg);
}

pub(crate) fn illegal_outside(ctx: &mut ParserCtx<'_>, what: &str, outside: &str) {
  let msg = format!("illegal {what} outside of {outside}");
  report_parser(ctx, &msg);
}

pub(crate) fn redeclared_sym_as(ctx: &mut ParserCtx<'_>, sym: SymId, tag: SymTag) {
  let what = if tag == SymTag::Id { "different symbol type" } else { tag.to_str() };
  let msg = format!("{} redeclared as {}", hl(&ctx.comp.syms[sym].ident), what);
  report_parser(ctx, &msg);

  if let Some(&first) = ctx.comp.syms[sym].decls.first() {
    let loc = ctx.comp.ast[first].loc.clone();
    note(&loc, "first declaration here");
  }
}

pub(crate) fn reimplemented_sym(ctx: &mut ParserCtx<'_>, sym: SymId) {
  let msg = format!("{} reimplemented", named_sym(&ctx.comp.syms, sym));
  report_parser(ctx, &msg);

  if let Some(impl_node) = ctx.comp.syms[sym].impl_node {
    let loc = ctx.comp.ast[impl_node].loc.clone();
    note(&loc, "first implementation here");
  }
}

pub(crate) fn file_not_found(ctx: &mut ParserCtx<'_>, name: &str) {
  let msg = format!("file not found, '{}'", hl(name));
  report_parser(ctx, &msg);
}

/*==== Analyzer errors ====*/

fn report_analyzer(ctx: &mut AnalyzerCtx<'_>, node: NodeId, msg: &str) {
  print_error(&ctx.ast[node].loc.clone(), msg);
  ctx.errors += 1;
}

/// Render the node as its symbol with embedded type, or just its type.
fn node_str(ctx: &AnalyzerCtx<'_>, node: NodeId) -> String {
  match ctx.ast[node].symbol {
    Some(sym) if !ctx.syms[sym].ident.is_empty() && ctx.syms[sym].dt.is_some() =>
      named_sym(ctx.syms, sym),
    _ => ty_str(ctx.syms, &ctx.ast.dt(node)),
  }
}

pub(crate) fn type_expected(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                            where_: &str, expected: &str) {
  let msg = format!("{} requires {expected}, found {}", hl(where_), node_str(ctx, node));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn op_type_expected(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                               o: Op, expected: &str) {
  let msg = format!("{} requires {expected}, found {}", op_str(o), node_str(ctx, node));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn type_expected_type(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                                 where_: &str, expected: &Ty) {
  let msg = format!("{where_} requires {}, found {}",
                    ty_str(ctx.syms, expected), ty_str(ctx.syms, &ctx.ast.dt(node)));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn lvalue(ctx: &mut AnalyzerCtx<'_>, node: NodeId, o: Op) {
  let msg = format!("{} requires an lvalue", op_str(o));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn mismatch(ctx: &mut AnalyzerCtx<'_>, node: NodeId, o: Op, l: &Ty, r: &Ty) {
  mismatch_where(ctx, node, o.to_str(), l, r);
}

pub(crate) fn mismatch_where(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                             o: &str, l: &Ty, r: &Ty) {
  let msg = format!("type mismatch between {} and {} for {CYAN}{o}{NORMAL}",
                    ty_str(ctx.syms, l), ty_str(ctx.syms, r));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn void_deref(ctx: &mut AnalyzerCtx<'_>, node: NodeId, o: Op) {
  let msg = match ctx.ast[node].symbol {
    Some(sym) if !ctx.syms[sym].ident.is_empty() =>
      format!("{} dereference of {} would result in void value",
              op_str(o), hl(&ctx.syms[sym].ident)),
    _ => format!("{} dereference would result in void value", op_str(o)),
  };
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn degree(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                     thing: &str, expected: i32, found: i32, where_: &str) {
  let few = if expected > found { "few" } else { "many" };
  let msg = format!("too {few} {thing} given to {}: expected {}, given {}",
                    hl(where_), num(expected), num(found));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn param_mismatch(ctx: &mut AnalyzerCtx<'_>, node: NodeId, fun: NodeId,
                             n: usize, expected: &Ty, found: &Ty) {
  let n_str = num(n as i32 + 1);
  let msg = match ctx.ast[fun].symbol {
    Some(sym) if !ctx.syms[sym].ident.is_empty() => {
      let name = hl(&ctx.syms[sym].ident);
      match ctx.syms.nth_param(sym, n) {
        Some(param) => format!("type mismatch at parameter {n_str} of {name}, {}: found {}",
                               named_sym(ctx.syms, param), ty_str(ctx.syms, found)),
        None => format!("type mismatch at parameter {n_str} of {name}, expected {}: found {}",
                        ty_str(ctx.syms, expected), ty_str(ctx.syms, found)),
      }
    }
    _ => format!("type mismatch at parameter {n_str}, expected {}: found {}",
                 ty_str(ctx.syms, expected), ty_str(ctx.syms, found)),
  };
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn member(ctx: &mut AnalyzerCtx<'_>, node: NodeId, o: Op, field: &str) {
  let msg = format!("{} expected field of {}, found {}",
                    op_str(o), node_str(ctx, node), hl(field));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn vax_list(ctx: &mut AnalyzerCtx<'_>, node: NodeId, where_: &str, which: &str) {
  let msg = format!("{which} parameter of {} requires {}", hl(where_), hl("va_list"));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn vax_lvalue(ctx: &mut AnalyzerCtx<'_>, node: NodeId, where_: &str, which: &str) {
  let msg = format!("{which} parameter of {} requires an lvalue", hl(where_));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn va_start_non_param(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  let msg = match ctx.ast[node].symbol {
    Some(sym) => format!("{} expected parameter name, found {}",
                         hl("va_start"), named_sym(ctx.syms, sym)),
    None => format!("{} expected parameter name", hl("va_start")),
  };
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn illegal_init(ctx: &mut AnalyzerCtx<'_>, node: NodeId, what: &str) {
  let name = match ctx.ast[node].symbol {
    Some(sym) => hl(&ctx.syms[sym].ident),
    None => String::new(),
  };
  let msg = format!("illegal initialization of {what} {name}");
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn init_mismatch(ctx: &mut AnalyzerCtx<'_>, variable: NodeId, init: NodeId) {
  let var = match ctx.ast[variable].symbol {
    Some(sym) => named_sym(ctx.syms, sym),
    None => node_str(ctx, variable),
  };
  let msg = format!("incompatible initialization of {var} from {}", node_str(ctx, init));
  report_analyzer(ctx, init, &msg);
}

pub(crate) fn init_field_mismatch(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                                  record: SymId, field: SymId) {
  let msg = format!("type mismatch: initialization of {} field {} given {}",
                    named_sym(ctx.syms, record), named_sym(ctx.syms, field),
                    ty_str(ctx.syms, &ctx.ast.dt(node)));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn init_excess_elements(ctx: &mut AnalyzerCtx<'_>, node: NodeId, record: SymId) {
  let msg = format!("excess initializers after the last field of {}",
                    named_sym(ctx.syms, record));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn conflicting_declarations(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                                       sym: SymId, found: &Ty) {
  let msg = format!("{} redeclared as conflicting type {}",
                    named_sym(ctx.syms, sym), ty_str(ctx.syms, found));
  report_analyzer(ctx, node, &msg);
  other_decl_notes(ctx, node, sym);
}

pub(crate) fn redeclared(ctx: &mut AnalyzerCtx<'_>, node: NodeId, sym: SymId) {
  let msg = format!("{} redeclared", named_sym(ctx.syms, sym));
  report_analyzer(ctx, node, &msg);
  other_decl_notes(ctx, node, sym);
}

fn other_decl_notes(ctx: &AnalyzerCtx<'_>, node: NodeId, sym: SymId) {
  let here = ctx.ast[node].loc.clone();
  for &decl in &ctx.syms[sym].decls {
    let loc = &ctx.ast[decl].loc;
    if loc.line != here.line || loc.file != here.file {
      note(loc, "also declared here");
    }
  }
}

pub(crate) fn already_const(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  let msg = match ctx.ast[node].symbol {
    Some(sym) if !ctx.syms[sym].ident.is_empty() =>
      format!("{} was already qualified with {}", hl(&ctx.syms[sym].ident), hl("const")),
    _ => format!("type was already qualified with {}", hl("const")),
  };
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn illegal_const(ctx: &mut AnalyzerCtx<'_>, node: NodeId, ty: &Ty) {
  let what = if ty.is_array() { "an array" } else { "a function" };
  let msg = format!("illegal qualification of {what} as {}", hl("const"));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn illegal_sym_as_value(ctx: &mut AnalyzerCtx<'_>, node: NodeId, sym: SymId) {
  let msg = format!("cannot use {} as a value", named_sym(ctx.syms, sym));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn compile_time_known(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                                 sym: Option<SymId>, what: &str) {
  let name = match sym {
    Some(sym) => hl(&ctx.syms[sym].ident),
    None => hl(""),
  };
  let msg = format!("declaration of {name} needed a compile-time known {what}");
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn static_compile_time_known(ctx: &mut AnalyzerCtx<'_>, node: NodeId, sym: SymId) {
  let msg = format!("initialization of static variable {} needed a compile-time known value",
                    hl(&ctx.syms[sym].ident));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn illegal_array_size(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                                 sym: Option<SymId>, size: i32) {
  let name = match sym {
    Some(sym) => named_sym(ctx.syms, sym),
    None => String::new(),
  };
  let msg = format!("declaration of array {name} expected positive size, found {}", num(size));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn compound_literal_without_type(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  report_analyzer(ctx, node, "compound literal is missing an explicit type");
}

/// The basic symbol whose incompleteness `ty` inherits, for the ignore
/// sets.
fn incomplete_basic(ty: &Ty) -> Option<SymId> {
  match &ty.kind {
    crate::ty::TyKind::Basic(sym) => Some(*sym),
    crate::ty::TyKind::Array(base, _) => incomplete_basic(base),
    _ => None,
  }
}

pub(crate) fn incomplete_compound(ctx: &mut AnalyzerCtx<'_>, node: NodeId, ty: &Ty) {
  let msg = format!("compound initialization of incomplete type {}", ty_str(ctx.syms, ty));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn incomplete_ptr(ctx: &mut AnalyzerCtx<'_>, node: NodeId, o: Op, ty: &Ty) {
  if let Some(basic) = incomplete_basic(&ty.derive_base())
    && !ctx.incomplete_ptr_ignore.insert(basic) {
    return;
  }
  let msg = format!("{} dereference of incomplete type {}", op_str(o), ty_str(ctx.syms, ty));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn incomplete_decl(ctx: &mut AnalyzerCtx<'_>, node: NodeId, ty: &Ty) {
  if let Some(basic) = incomplete_basic(ty)
    && !ctx.incomplete_decl_ignore.insert(basic) {
    return;
  }
  let name = match ctx.ast[node].symbol {
    Some(sym) => hl(&ctx.syms[sym].ident),
    None => String::new(),
  };
  let msg = format!("declaration of {name} with incomplete type {}", ty_str(ctx.syms, ty));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn incomplete_param_decl(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                                    n: usize, ty: &Ty) {
  if let Some(basic) = incomplete_basic(ty)
    && !ctx.incomplete_decl_ignore.insert(basic) {
    return;
  }
  let msg = format!("declaration of parameter {} with incomplete type {}",
                    num(n as i32), ty_str(ctx.syms, ty));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn incomplete_return_decl(ctx: &mut AnalyzerCtx<'_>, node: NodeId, ty: &Ty) {
  if let Some(basic) = incomplete_basic(ty)
    && !ctx.incomplete_decl_ignore.insert(basic) {
    return;
  }
  let msg = format!("declaration of a function returning incomplete type {}",
                    ty_str(ctx.syms, ty));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn const_assignment(ctx: &mut AnalyzerCtx<'_>, node: NodeId, o: Op) {
  let msg = format!("assignment through {} to {} value", op_str(o), hl("const"));
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn fn_tag(ctx: &mut AnalyzerCtx<'_>, node: NodeId) {
  let msg = match ctx.ast[node].symbol {
    Some(sym) => format!("implementation of {}, which is not a function",
                         named_sym(ctx.syms, sym)),
    None => "implementation of something which is not a function".to_owned(),
  };
  report_analyzer(ctx, node, &msg);
}

pub(crate) fn return_type(ctx: &mut AnalyzerCtx<'_>, node: NodeId, expected: &Ty, found: &Ty) {
  let msg = format!("function return requires {}, found {}",
                    ty_str(ctx.syms, expected), ty_str(ctx.syms, found));
  report_analyzer(ctx, node, &msg);
}
