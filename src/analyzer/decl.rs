//! Declaration analysis: resolves storage classes, builds types from
//! declaration-specifier and declarator trees, validates initializers and
//! redeclarations, and lays out records.

use super::{AnalyzerCtx, value};
use crate::ast::{Literal, NodeId, NodeKind, Op};
use crate::error;
use crate::eval;
use crate::sym::{Storage, SymId, SymTag};
use crate::ty::{ARRAY_SIZE_ERROR, ARRAY_SIZE_UNSPECIFIED, Ty, TyKind};

/// Analyze a declaration line: one basic type and any number of
/// declarators.
pub(crate) fn analyzer_decl(ctx: &mut AnalyzerCtx<'_>, node: NodeId, module: bool) {
  log::trace!("Decl");

  let NodeKind::Decl { basic, storage } = ctx.ast[node].kind else { unreachable!() };

  let basic_dt = analyzer_decl_basic(ctx, basic);

  for n in 0..ctx.ast[node].children.len() {
    let child = ctx.ast[node].children[n];
    let dt = analyzer_decl_node(ctx, child, basic_dt.clone(), module, storage);

    // Variables need a complete type. Typedefs and the like don't
    let is_var = matches!(ctx.ast[child].symbol, Some(sym) if ctx.syms[sym].tag == SymTag::Id);
    if is_var && !dt.is_complete(ctx.syms) {
      error::incomplete_decl(ctx, child, &dt);
    }
  }
}

/// Analyze a type in expression position (casts, `sizeof`, `va_arg`).
pub(crate) fn analyzer_type(ctx: &mut AnalyzerCtx<'_>, node: NodeId) -> Ty {
  log::trace!("Type");

  let NodeKind::Type { basic, expr } = ctx.ast[node].kind else {
    ctx.unhandled("analyzer_type", "AST node", "non-type");
    return Ty::invalid();
  };

  let basic_dt = analyzer_decl_basic(ctx, basic);
  let dt = analyzer_decl_node(ctx, expr, basic_dt, false, None);
  ctx.ast[node].dt = Some(dt.clone());
  dt
}

/// Build the basic type from a declaration-specifier subtree.
fn analyzer_decl_basic(ctx: &mut AnalyzerCtx<'_>, node: NodeId) -> Ty {
  let dt = match &ctx.ast[node].kind {
    NodeKind::Struct { .. } => analyzer_struct(ctx, node),
    NodeKind::Union { .. } => analyzer_union(ctx, node),
    NodeKind::Enum { .. } => analyzer_enum(ctx, node),

    NodeKind::Literal(Literal::Ident(_)) => match ctx.ast[node].symbol {
      Some(sym) => match ctx.syms[sym].tag {
        SymTag::Type | SymTag::Struct | SymTag::Union | SymTag::Enum => Ty::basic(sym),
        // A typedef aliases the full declared type
        SymTag::Typedef => match &ctx.syms[sym].dt {
          Some(dt) => dt.derive_from(),
          None => Ty::invalid(),
        },
        _ => {
          error::illegal_sym_as_value(ctx, node, sym);
          Ty::invalid()
        }
      },
      None => Ty::invalid(),
    },

    NodeKind::Const { r } => {
      let r = *r;
      let mut dt = analyzer_decl_basic(ctx, r);
      if dt.is_const {
        error::already_const(ctx, node);
      }
      dt.is_const = true;
      dt
    }

    NodeKind::Invalid => Ty::invalid(),

    kind => {
      let kind = format!("{kind:?}");
      ctx.unhandled("analyzer_decl_basic", "AST node", &kind);
      Ty::invalid()
    }
  };

  ctx.ast[node].dt = Some(dt.clone());
  dt
}

fn analyzer_struct(ctx: &mut AnalyzerCtx<'_>, node: NodeId) -> Ty {
  for n in 0..ctx.ast[node].children.len() {
    let field = ctx.ast[node].children[n];
    analyzer_decl(ctx, field, false);
  }

  let Some(sym) = ctx.ast[node].symbol else { return Ty::invalid() };

  // Definitions get their layout computed now, so that `sizeof` folds
  if !ctx.ast[node].children.is_empty() || ctx.syms[sym].complete {
    layout_record(ctx, sym);
  }

  Ty::basic(sym)
}

fn analyzer_union(ctx: &mut AnalyzerCtx<'_>, node: NodeId) -> Ty {
  for n in 0..ctx.ast[node].children.len() {
    let field = ctx.ast[node].children[n];
    analyzer_decl(ctx, field, false);
  }

  let Some(sym) = ctx.ast[node].symbol else { return Ty::invalid() };

  if !ctx.ast[node].children.is_empty() || ctx.syms[sym].complete {
    layout_record(ctx, sym);
  }

  Ty::basic(sym)
}

/// Assign field offsets and compute the size of a record. Struct fields
/// are laid out consecutively, each word-aligned; union fields all start
/// at the record's base. Fields of contained anonymous records get offsets
/// relative to the outer record, matching their lookup transparency.
fn layout_record(ctx: &mut AnalyzerCtx<'_>, sym: SymId) {
  let is_union = ctx.syms[sym].tag == SymTag::Union;
  let mut size = 0i32;

  for n in 0..ctx.syms[sym].children.len() {
    let field = ctx.syms[sym].children[n];

    let field_size = match ctx.syms[field].tag {
      SymTag::Id => {
        let dt = ctx.syms[field].dt.clone().unwrap_or_else(Ty::invalid);
        dt.size(ctx.arch, ctx.syms)
      }
      // An anonymous record member contributes its own layout, shifted to
      // this offset
      SymTag::Struct | SymTag::Union if ctx.syms[field].ident.is_empty() => {
        layout_record(ctx, field);
        ctx.syms[field].size
      }
      _ => continue,
    };

    if is_union {
      ctx.syms[field].offset = 0;
      size = size.max(field_size);
    } else {
      let offset = size;
      ctx.syms[field].offset = offset;
      if !matches!(ctx.syms[field].tag, SymTag::Id) {
        shift_field_offsets(ctx, field, offset);
      }
      size += ctx.arch.align_word(field_size);
    }
  }

  ctx.syms[sym].size = size;
}

/// Shift the fields of an anonymous record member by the member's offset
/// within its container.
fn shift_field_offsets(ctx: &mut AnalyzerCtx<'_>, record: SymId, delta: i32) {
  if delta == 0 { return }
  for n in 0..ctx.syms[record].children.len() {
    let field = ctx.syms[record].children[n];
    match ctx.syms[field].tag {
      SymTag::Id => ctx.syms[field].offset += delta,
      SymTag::Struct | SymTag::Union if ctx.syms[field].ident.is_empty() =>
        shift_field_offsets(ctx, field, delta),
      _ => {}
    }
  }
}

fn analyzer_enum(ctx: &mut AnalyzerCtx<'_>, node: NodeId) -> Ty {
  let Some(sym) = ctx.ast[node].symbol else { return Ty::invalid() };

  // Enums are int-sized
  ctx.syms[sym].size = ctx.syms[ctx.builtins.int_].size;
  let dt = Ty::basic(sym);

  // Assign types and values to the constants, auto-incrementing from the
  // last explicit value
  let mut next_const = 0;

  for n in 0..ctx.ast[node].children.len() {
    let child = ctx.ast[node].children[n];

    let target = match ctx.ast[child].kind {
      NodeKind::Bop { op: Op::Assign, l, r } => {
        value::analyzer_value(ctx, r);
        let constant = eval::eval(ctx.arch, ctx.ast, ctx.syms, r);
        if constant.known {
          next_const = constant.value;
        } else {
          let sym = ctx.ast[l].symbol;
          error::compile_time_known(ctx, r, sym, "enum constant");
        }
        l
      }
      NodeKind::Literal(Literal::Ident(_)) => child,
      NodeKind::Invalid => continue,
      _ => {
        let kind = format!("{:?}", ctx.ast[child].kind);
        ctx.unhandled("analyzer_enum", "AST node", &kind);
        continue;
      }
    };

    if let Some(constant) = ctx.ast[target].symbol {
      analyzer_decl_ident_literal(ctx, target, dt.clone(), false, None);
      ctx.syms[constant].const_value = next_const;
      next_const += 1;
    }
  }

  dt
}

/// Build a parameter-list function type from a declarator `Call` node.
fn analyzer_param_list(ctx: &mut AnalyzerCtx<'_>, node: NodeId, ret: Ty) -> Ty {
  log::trace!("ParamList");

  let mut params = vec![];
  let mut variadic = false;

  for n in 0..ctx.ast[node].children.len() {
    let param = ctx.ast[node].children[n];

    match ctx.ast[param].kind {
      // The grammar has already ensured the ellipsis is final and unique
      NodeKind::Ellipsis => variadic = true,

      NodeKind::Param { basic, expr } => {
        let basic_dt = analyzer_decl_basic(ctx, basic);
        let mut dt = analyzer_decl_node(ctx, expr, basic_dt, false, None);

        if !dt.is_complete(ctx.syms) {
          error::incomplete_param_decl(ctx, param, params.len() + 1, &dt);
        }

        // Array parameters decay to pointers; the callee receives an
        // address either way
        if dt.is_array() && !dt.is_invalid() {
          dt = Ty::ptr(dt.derive_base());
          if let Some(sym) = ctx.ast[expr].symbol
            && ctx.syms[sym].tag == SymTag::Param {
            ctx.syms[sym].dt = Some(dt.clone());
          }
        }

        ctx.ast[param].dt = Some(dt.clone());
        params.push(dt);
      }

      _ => {
        let kind = format!("{:?}", ctx.ast[param].kind);
        ctx.unhandled("analyzer_param_list", "AST node", &kind);
      }
    }
  }

  Ty::function(ret, params, variadic)
}

/// Traverse a declarator tree, wrapping `base` outward into the declared
/// type and attaching it to the declared symbol.
pub(crate) fn analyzer_decl_node(ctx: &mut AnalyzerCtx<'_>, node: NodeId, base: Ty,
                                 module: bool, storage: Option<Storage>) -> Ty {
  match ctx.ast[node].kind {
    NodeKind::Invalid | NodeKind::Empty => {
      ctx.ast[node].dt = Some(base.clone());
      base
    }

    NodeKind::Bop { op: Op::Assign, l, r } =>
      analyzer_decl_assign_bop(ctx, node, l, r, base, module, storage),

    NodeKind::Uop { op: Op::Deref, r } => {
      let dt = analyzer_decl_node(ctx, r, Ty::ptr(base), module, storage);
      ctx.ast[node].dt = Some(dt.clone());
      dt
    }

    NodeKind::Const { r } => {
      let mut base = base;
      if base.is_const {
        error::already_const(ctx, node);
      } else if matches!(base.kind, TyKind::Array(..) | TyKind::Function { .. }) {
        error::illegal_const(ctx, node, &base);
      } else {
        base.is_const = true;
      }
      analyzer_decl_node(ctx, r, base, module, storage)
    }

    NodeKind::Call { l } => {
      if !base.is_complete(ctx.syms) {
        error::incomplete_return_decl(ctx, node, &base);
      }
      let fn_dt = analyzer_param_list(ctx, node, base);
      analyzer_decl_node(ctx, l, fn_dt, module, storage)
    }

    NodeKind::Index { l, r } => {
      let size = analyzer_array_size(ctx, l, r);
      analyzer_decl_node(ctx, l, Ty::array(base, size), module, storage)
    }

    NodeKind::Literal(Literal::Ident(_)) =>
      analyzer_decl_ident_literal(ctx, node, base, module, storage),

    ref kind => {
      let kind = format!("{kind:?}");
      ctx.unhandled("analyzer_decl_node", "AST node", &kind);
      ctx.ast[node].dt = Some(base.clone());
      base
    }
  }
}

/// Validate an array declarator's size expression.
fn analyzer_array_size(ctx: &mut AnalyzerCtx<'_>, declarator: NodeId, size: NodeId) -> i32 {
  // `[]`: unspecified, hopefully inferred from an initializer later
  if matches!(ctx.ast[size].kind, NodeKind::Empty) {
    return ARRAY_SIZE_UNSPECIFIED;
  }

  value::analyzer_value(ctx, size);
  let result = eval::eval(ctx.arch, ctx.ast, ctx.syms, size);

  if !result.known {
    let sym = ctx.ast[declarator].symbol;
    error::compile_time_known(ctx, size, sym, "array size");
    ARRAY_SIZE_ERROR
  } else if result.value <= 0 {
    let sym = ctx.ast[declarator].symbol;
    error::illegal_array_size(ctx, size, sym, result.value);
    ARRAY_SIZE_ERROR
  } else {
    result.value
  }
}

/// The declarator's initializer: `declarator = value`.
fn analyzer_decl_assign_bop(ctx: &mut AnalyzerCtx<'_>, node: NodeId, l: NodeId, r: NodeId,
                            base: Ty, module: bool, storage: Option<Storage>) -> Ty {
  let mut declared = analyzer_decl_node(ctx, l, base, module, storage);

  // Compound initializer?
  if matches!(ctx.ast[r].kind, NodeKind::Literal(Literal::Init)) {
    value::analyzer_compound_init(ctx, r, &declared);

    // Infer an unspecified array size from the initializer
    if declared.is_array() && declared.array_size() == ARRAY_SIZE_UNSPECIFIED {
      let inferred = ctx.ast.dt(r).array_size();
      declared.set_array_size(inferred);
      if let Some(sym) = ctx.ast[l].symbol
        && let Some(dt) = &mut ctx.syms[sym].dt {
        dt.set_array_size(inferred);
      }
      ctx.ast[l].dt = Some(declared.clone());
    }

  // Plain initializer
  } else {
    let found = value::analyzer_value(ctx, r);

    if !found.is_compatible(&declared) {
      error::init_mismatch(ctx, l, r);
    } else if !declared.is_assignment(ctx.syms) && !declared.is_array() {
      error::op_type_expected(ctx, l, Op::Assign, "an assignable type");
    }
  }

  // Is initializing this symbol legal at all?
  if let Some(sym) = ctx.ast[l].symbol {
    if ctx.syms[sym].tag == SymTag::Typedef {
      error::illegal_init(ctx, node, "a typedef");
    } else if storage == Some(Storage::Extern) {
      // Illegal whether or not an earlier declaration was extern
      error::illegal_init(ctx, node, "an extern variable");
    } else if ctx.syms[sym].storage == Storage::Static
      && !eval::is_constant_init(ctx.arch, ctx.ast, ctx.syms, r) {
      error::static_compile_time_known(ctx, r, sym);
    }
  }

  ctx.ast[node].dt = Some(declared.clone());
  declared
}

/// The declarator leaf: resolve storage, attach the built type to the
/// symbol, and check consistency across redeclarations.
fn analyzer_decl_ident_literal(ctx: &mut AnalyzerCtx<'_>, node: NodeId, base: Ty,
                               module: bool, storage: Option<Storage>) -> Ty {
  let is_fn = matches!(base.kind, TyKind::Function { .. });

  // An explicit storage keyword wins; otherwise functions default to
  // extern, module-level data to static, locals to auto
  let resolved = storage.unwrap_or(
    if is_fn { Storage::Extern }
    else if module { Storage::Static }
    else { Storage::Auto });
  ctx.ast[node].storage = resolved;

  let Some(sym) = ctx.ast[node].symbol else {
    ctx.ast[node].dt = Some(base.clone());
    return base;
  };

  if ctx.syms[sym].tag == SymTag::Id && ctx.syms[sym].storage == Storage::Undefined {
    // The first declaration fixes the storage class
    ctx.syms[sym].storage = resolved;
  }

  if matches!(ctx.syms[sym].tag,
              SymTag::Id | SymTag::Param | SymTag::EnumConstant | SymTag::Typedef) {
    match &ctx.syms[sym].dt {
      None => ctx.syms[sym].dt = Some(base.clone()),

      // Conflicts between parameter declarations are reported against the
      // function type instead
      Some(_) if ctx.syms[sym].tag == SymTag::Param => {}

      Some(prev) if !prev.is_equal(&base) => {
        let base = base.clone();
        error::conflicting_declarations(ctx, node, sym, &base);
      }

      // Even matching redeclarations are only legal for functions,
      // fields and externs. The first declaration site never counts
      // against itself, so re-analysis stays idempotent
      Some(_) => {
        let parent_tag = ctx.syms[sym].parent.map(|p| ctx.syms[p].tag);
        if ctx.syms[sym].tag == SymTag::Id && !is_fn
          && !matches!(parent_tag, Some(SymTag::Struct | SymTag::Union))
          && ctx.syms[sym].storage != Storage::Extern
          && ctx.syms[sym].decls.first() != Some(&node) {
          error::redeclared(ctx, node, sym);
        }
      }
    }
  }

  ctx.ast[node].dt = Some(base.clone());
  base
}
