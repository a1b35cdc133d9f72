//! Expression analysis: attaches result types bottom-up and enforces
//! operand capabilities per operator category.

use super::{AnalyzerCtx, decl};
use crate::ast::{Literal, NodeId, NodeKind, Op};
use crate::error;
use crate::sym::SymTag;
use crate::ty::Ty;

/// Analyze an expression, returning (and attaching) its result type.
pub(crate) fn analyzer_value(ctx: &mut AnalyzerCtx<'_>, node: NodeId) -> Ty {
  let dt = match ctx.ast[node].kind.clone() {
    NodeKind::Bop { op, l, r } => {
      if op == Op::Assign {
        analyzer_assignment_bop(ctx, node, op, l, r)
      } else if op.is_assignment() {
        analyzer_numeric_bop(ctx, node, op, l, r)
      } else if op.is_numeric() {
        analyzer_numeric_bop(ctx, node, op, l, r)
      } else if op.is_ordinal() || op.is_equality() {
        analyzer_comparison_bop(ctx, node, op, l, r)
      } else if op.is_member() {
        analyzer_member_bop(ctx, node, op, l, r)
      } else if op.is_logical() {
        analyzer_logical_bop(ctx, node, op, l, r)
      } else if op == Op::Comma {
        analyzer_comma_bop(ctx, node, l, r)
      } else {
        ctx.unhandled("analyzer_value", "operator", op.to_str());
        Ty::invalid()
      }
    }

    NodeKind::Uop { op, r } => analyzer_uop(ctx, node, op, r),
    NodeKind::Top { cond, l, r } => analyzer_ternary(ctx, node, cond, l, r),
    NodeKind::Index { l, r } => analyzer_index(ctx, node, l, r),
    NodeKind::Call { l } => analyzer_call(ctx, node, l),
    NodeKind::Cast { ty, r } => {
      let dt = decl::analyzer_type(ctx, ty);
      analyzer_value(ctx, r);
      dt.derive_from()
    }
    NodeKind::Sizeof { r } => {
      if matches!(ctx.ast[r].kind, NodeKind::Type { .. }) {
        decl::analyzer_type(ctx, r);
      } else {
        analyzer_value(ctx, r);
      }
      Ty::basic(ctx.builtins.int_)
    }

    NodeKind::Literal(lit) => analyzer_literal(ctx, node, &lit),

    NodeKind::VaStart { ap, last } => analyzer_va_start(ctx, node, ap, last),
    NodeKind::VaEnd { ap } => {
      analyzer_va_list(ctx, ap, "va_end", "the first");
      Ty::basic(ctx.builtins.void_)
    }
    NodeKind::VaArg { ap, ty } => {
      analyzer_va_list(ctx, ap, "va_arg", "the first");
      decl::analyzer_type(ctx, ty).derive_from()
    }
    NodeKind::VaCopy { dst, src } => {
      analyzer_va_list(ctx, dst, "va_copy", "the first");
      analyzer_va_list(ctx, src, "va_copy", "the second");
      Ty::basic(ctx.builtins.void_)
    }

    NodeKind::Invalid | NodeKind::Empty => Ty::invalid(),

    kind => {
      let kind = format!("{kind:?}");
      ctx.unhandled("analyzer_value", "AST node", &kind);
      Ty::invalid()
    }
  };

  ctx.ast[node].dt = Some(dt.clone());
  dt
}

/// `+ - * / % & | ^ << >>` and their assigning forms.
fn analyzer_numeric_bop(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                        op: Op, l: NodeId, r: NodeId) -> Ty {
  let lt = analyzer_value(ctx, l);
  let rt = analyzer_value(ctx, r);

  if !lt.is_numeric(ctx.syms) || !rt.is_numeric(ctx.syms) {
    let which = if !lt.is_numeric(ctx.syms) { l } else { r };
    error::op_type_expected(ctx, which, op, "a numeric type");
  }

  if op.is_assignment() {
    check_assignment_target(ctx, op, l, &lt);
  }

  // Pointer arithmetic: ptr ± integer keeps the pointer type, and the
  // difference of two pointers is an integer
  let l_ptr = lt.is_ptr() && !lt.is_invalid();
  let r_ptr = rt.is_ptr() && !rt.is_invalid();
  if matches!(op, Op::Add | Op::Subtract | Op::AddAssign | Op::SubAssign)
    && (l_ptr || r_ptr) {
    return if l_ptr && r_ptr {
      if op == Op::Subtract {
        Ty::basic(ctx.builtins.int_)
      } else {
        error::mismatch(ctx, node, op, &lt, &rt);
        Ty::invalid()
      }
    } else if l_ptr {
      lt.derive_from()
    } else {
      rt.derive_from()
    };
  }

  if !lt.is_compatible(&rt) {
    error::mismatch(ctx, node, op, &lt, &rt);
    return Ty::invalid();
  }

  // Assignment takes the right's type; either will do otherwise
  if op.is_assignment() { rt.derive_from() } else { lt.derive_from() }
}

/// Plain `=`.
fn analyzer_assignment_bop(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                           op: Op, l: NodeId, r: NodeId) -> Ty {
  let lt = analyzer_value(ctx, l);
  let rt = analyzer_value(ctx, r);

  if !lt.is_assignment(ctx.syms) {
    error::op_type_expected(ctx, l, op, "an assignable type");
  } else {
    check_assignment_target(ctx, op, l, &lt);
  }

  if !rt.is_compatible(&lt) {
    error::mismatch(ctx, node, op, &lt, &rt);
    return Ty::invalid();
  }

  rt.derive_from()
}

/// An assigning operator needs a mutable lvalue on its left.
fn check_assignment_target(ctx: &mut AnalyzerCtx<'_>, op: Op, l: NodeId, lt: &Ty) {
  if !ctx.ast.is_lvalue(l) {
    error::lvalue(ctx, l, op);
  } else if lt.is_const {
    error::const_assignment(ctx, l, op);
  }
}

/// `== != < <= > >=`
fn analyzer_comparison_bop(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                           op: Op, l: NodeId, r: NodeId) -> Ty {
  let lt = analyzer_value(ctx, l);
  let rt = analyzer_value(ctx, r);

  let (capable_l, capable_r) = if op.is_ordinal() {
    (lt.is_ordinal(ctx.syms), rt.is_ordinal(ctx.syms))
  } else {
    (lt.is_equality(ctx.syms), rt.is_equality(ctx.syms))
  };

  if !capable_l || !capable_r {
    let which = if !capable_l { l } else { r };
    error::op_type_expected(ctx, which, op, "a comparable type");
  }

  if !lt.is_compatible(&rt) {
    error::mismatch(ctx, node, op, &lt, &rt);
    return Ty::invalid();
  }

  Ty::basic(ctx.builtins.bool_)
}

/// `.` and `->`.
fn analyzer_member_bop(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                       op: Op, l: NodeId, r: NodeId) -> Ty {
  let lt = analyzer_value(ctx, l);

  let record = if op.is_deref() {
    if !lt.is_ptr() {
      error::op_type_expected(ctx, l, op, "a pointer");
      None
    } else if lt.record_sym(ctx.syms).is_none() {
      if !lt.is_invalid() {
        error::op_type_expected(ctx, l, op, "a structure pointer");
      }
      None
    } else {
      let pointee = lt.derive_base();
      if !pointee.is_complete(ctx.syms) {
        let lt = lt.clone();
        error::incomplete_ptr(ctx, node, op, &lt);
        None
      } else {
        lt.record_sym(ctx.syms)
      }
    }
  } else if !lt.is_record(ctx.syms) {
    error::op_type_expected(ctx, l, op, "a structure type");
    None
  } else {
    lt.record_sym(ctx.syms)
  };

  let Some(record) = record else { return Ty::invalid() };

  // The field was left unresolved by the parser; the record type is only
  // known now
  let Some(field_name) = ctx.ast.ident(r).map(str::to_owned) else { return Ty::invalid() };
  let Some(field) = ctx.syms.child(record, &field_name) else {
    error::member(ctx, l, op, &field_name);
    return Ty::invalid();
  };

  ctx.ast[r].symbol = Some(field);
  let mut dt = ctx.syms[field].dt.clone().unwrap_or_else(Ty::invalid);
  // Constness infects field access
  if lt.is_const { dt.is_const = true }
  ctx.ast[r].dt = Some(dt.clone());
  dt
}

/// `&&` and `||`.
fn analyzer_logical_bop(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                        op: Op, l: NodeId, r: NodeId) -> Ty {
  let lt = analyzer_value(ctx, l);
  let rt = analyzer_value(ctx, r);

  if !lt.is_condition(ctx.syms) {
    error::op_type_expected(ctx, l, op, "a condition");
  }
  if !rt.is_condition(ctx.syms) {
    error::op_type_expected(ctx, r, op, "a condition");
  }

  Ty::basic(ctx.builtins.bool_)
}

/// The comma operator: evaluates both, yields the right.
fn analyzer_comma_bop(ctx: &mut AnalyzerCtx<'_>, _node: NodeId, l: NodeId, r: NodeId) -> Ty {
  analyzer_value(ctx, l);
  let rt = analyzer_value(ctx, r);

  if rt.is_void(ctx.syms) {
    error::op_type_expected(ctx, r, Op::Comma, "a non-void value");
    return Ty::invalid();
  }

  rt.derive_from()
}

fn analyzer_uop(ctx: &mut AnalyzerCtx<'_>, node: NodeId, op: Op, r: NodeId) -> Ty {
  let rt = analyzer_value(ctx, r);

  match op {
    Op::LogicalNot => {
      if !rt.is_condition(ctx.syms) {
        error::op_type_expected(ctx, r, op, "a condition");
      }
      Ty::basic(ctx.builtins.bool_)
    }

    Op::BitwiseNot | Op::UnaryPlus | Op::Negate => {
      if !rt.is_numeric(ctx.syms) {
        error::op_type_expected(ctx, r, op, "a numeric type");
        Ty::invalid()
      } else {
        rt.derive_from()
      }
    }

    Op::PreIncrement | Op::PreDecrement | Op::PostIncrement | Op::PostDecrement => {
      if !rt.is_numeric(ctx.syms) {
        error::op_type_expected(ctx, r, op, "a numeric type");
        Ty::invalid()
      } else {
        check_assignment_target(ctx, op, r, &rt);
        rt.derive_from()
      }
    }

    Op::Deref => {
      if !rt.is_ptr() {
        error::op_type_expected(ctx, r, op, "a pointer");
        return Ty::invalid();
      }

      let base = rt.derive_base();
      if base.is_void(ctx.syms) {
        error::void_deref(ctx, node, op);
        Ty::invalid()
      } else if !base.is_complete(ctx.syms) {
        error::incomplete_ptr(ctx, node, op, &rt);
        Ty::invalid()
      } else {
        base
      }
    }

    Op::AddressOf => {
      if !ctx.ast.is_lvalue(r) {
        error::lvalue(ctx, r, op);
        Ty::invalid()
      } else {
        Ty::ptr(rt.derive_from())
      }
    }

    _ => {
      ctx.unhandled("analyzer_uop", "operator", op.to_str());
      Ty::invalid()
    }
  }
}

fn analyzer_ternary(ctx: &mut AnalyzerCtx<'_>, node: NodeId,
                    cond: NodeId, l: NodeId, r: NodeId) -> Ty {
  let ct = analyzer_value(ctx, cond);
  let lt = analyzer_value(ctx, l);
  let rt = analyzer_value(ctx, r);

  if !ct.is_condition(ctx.syms) {
    error::type_expected(ctx, cond, "?:", "a condition");
  }

  if !lt.is_compatible(&rt) {
    error::mismatch_where(ctx, node, "?:", &lt, &rt);
    return Ty::invalid();
  }

  lt.derive_from()
}

fn analyzer_index(ctx: &mut AnalyzerCtx<'_>, node: NodeId, l: NodeId, r: NodeId) -> Ty {
  let lt = analyzer_value(ctx, l);
  let rt = analyzer_value(ctx, r);

  if !rt.is_numeric(ctx.syms) {
    error::op_type_expected(ctx, r, Op::Add, "a numeric index");
  }

  if !lt.is_array() && !lt.is_ptr() {
    error::type_expected(ctx, l, "indexing", "an array or pointer");
    return Ty::invalid();
  }

  if lt.is_ptr() && !lt.is_array() {
    let base = lt.derive_base();
    if base.is_void(ctx.syms) {
      error::void_deref(ctx, node, Op::Deref);
      return Ty::invalid();
    }
    if !base.is_complete(ctx.syms) {
      error::incomplete_ptr(ctx, node, Op::Deref, &lt);
      return Ty::invalid();
    }
  }

  lt.derive_base()
}

fn analyzer_call(ctx: &mut AnalyzerCtx<'_>, node: NodeId, l: NodeId) -> Ty {
  let lt = analyzer_value(ctx, l);

  let Some(crate::ty::TyKind::Function { ret, params, variadic }) = lt.callable().cloned()
  else {
    if !lt.is_invalid() {
      error::type_expected(ctx, l, "()", "a function");
    }
    return Ty::invalid();
  };

  let args = ctx.ast[node].children.clone();

  // Variadic functions tolerate excess arguments
  let arity_ok = if variadic { args.len() >= params.len() } else { args.len() == params.len() };
  if !arity_ok {
    let name = match ctx.ast[l].symbol {
      Some(sym) => ctx.syms[sym].ident.clone(),
      None => "function".to_owned(),
    };
    error::degree(ctx, node, "parameters", params.len() as i32, args.len() as i32, &name);
  } else {
    for (n, (&arg, param)) in args.iter().zip(&params).enumerate() {
      let at = analyzer_value(ctx, arg);
      if !at.is_compatible(param) {
        error::param_mismatch(ctx, arg, l, n, param, &at);
      }
    }
    // Analyze any variadic tail for types, unchecked
    for &arg in args.iter().skip(params.len()) {
      analyzer_value(ctx, arg);
    }
  }

  (*ret).clone()
}

fn analyzer_literal(ctx: &mut AnalyzerCtx<'_>, node: NodeId, lit: &Literal) -> Ty {
  match lit {
    Literal::Int(_) => Ty::basic(ctx.builtins.int_),
    Literal::Bool(_) => Ty::basic(ctx.builtins.bool_),
    Literal::Char(_) => Ty::basic(ctx.builtins.char_),
    Literal::Str(_) => Ty::ptr(Ty::basic(ctx.builtins.char_)),

    Literal::Ident(_) => match ctx.ast[node].symbol {
      Some(sym) => match ctx.syms[sym].tag {
        SymTag::Id | SymTag::Param | SymTag::EnumConstant =>
          ctx.syms[sym].dt.clone().unwrap_or_else(Ty::invalid),
        _ => {
          error::illegal_sym_as_value(ctx, node, sym);
          Ty::invalid()
        }
      },
      // Already reported as undefined by the parser; pretend int
      None => Ty::basic(ctx.builtins.int_),
    },

    Literal::Init => {
      error::compound_literal_without_type(ctx, node);
      Ty::invalid()
    }
  }
}

/// Validate a compound initializer against the initialized aggregate.
pub(crate) fn analyzer_compound_init(ctx: &mut AnalyzerCtx<'_>, node: NodeId, dt: &Ty) {
  if !dt.is_complete(ctx.syms) {
    error::incomplete_compound(ctx, node, dt);
    ctx.ast[node].dt = Some(Ty::invalid());
    return;
  }

  let elements = ctx.ast[node].children.clone();

  // Struct and union initializers pair elements with fields
  if !dt.is_invalid() && dt.is_record(ctx.syms) {
    let record = dt.record_sym(ctx.syms).expect("checked record");
    let fields: Vec<_> = ctx.syms[record].children.iter().copied()
      .filter(|&f| ctx.syms[f].tag == SymTag::Id)
      .collect();

    // A union initializer covers its first field only
    let limit = if dt.is_union(ctx.syms) { 1.min(fields.len()) } else { fields.len() };

    for (n, &element) in elements.iter().enumerate() {
      let Some(&field) = fields.get(n).filter(|_| n < limit) else {
        error::init_excess_elements(ctx, element, record);
        break;
      };

      let field_dt = ctx.syms[field].dt.clone().unwrap_or_else(Ty::invalid);
      if matches!(ctx.ast[element].kind, NodeKind::Literal(Literal::Init)) {
        analyzer_compound_init(ctx, element, &field_dt);
      } else {
        let et = analyzer_value(ctx, element);
        if !et.is_compatible(&field_dt) {
          error::init_field_mismatch(ctx, element, record, field);
        }
      }
    }

    ctx.ast[node].dt = Some(dt.derive_from());

  } else if !dt.is_invalid() && dt.is_array() {
    let element_dt = dt.derive_base();
    let declared = dt.array_size();

    for &element in &elements {
      if matches!(ctx.ast[element].kind, NodeKind::Literal(Literal::Init)) {
        analyzer_compound_init(ctx, element, &element_dt);
      } else {
        let et = analyzer_value(ctx, element);
        if !et.is_compatible(&element_dt) {
          error::type_expected_type(ctx, element, "array initializer", &element_dt);
        }
      }
    }

    if declared >= 0 && elements.len() as i32 > declared {
      error::degree(ctx, node, "elements", declared, elements.len() as i32,
                    "array initializer");
    }

    ctx.ast[node].dt = Some(Ty::array(element_dt, elements.len() as i32));

  } else {
    error::init_mismatch(ctx, node, node);
    ctx.ast[node].dt = Some(Ty::invalid());
  }
}

fn analyzer_va_start(ctx: &mut AnalyzerCtx<'_>, _node: NodeId, ap: NodeId, last: NodeId) -> Ty {
  analyzer_va_list(ctx, ap, "va_start", "the first");

  // The second argument must name a parameter of the enclosing function
  let named_param = if_ok_param(ctx, last);
  if !named_param {
    error::va_start_non_param(ctx, last);
  } else {
    let sym = ctx.ast[last].symbol.expect("checked param");
    let dt = ctx.syms[sym].dt.clone();
    ctx.ast[last].dt = dt;
  }

  Ty::basic(ctx.builtins.void_)
}

fn if_ok_param(ctx: &AnalyzerCtx<'_>, node: NodeId) -> bool {
  let Some(sym) = ctx.ast[node].symbol else { return false };
  if ctx.syms[sym].tag != SymTag::Param { return false }
  match &ctx.fnctx {
    Some(fnctx) => ctx.syms[sym].parent == Some(fnctx.fun),
    None => false,
  }
}

/// An argument of the `va_*` family: an lvalue of `va_list` type.
fn analyzer_va_list(ctx: &mut AnalyzerCtx<'_>, node: NodeId, where_: &str, which: &str) {
  let dt = analyzer_value(ctx, node);

  if !dt.is_invalid() && dt.basic_sym() != Some(ctx.builtins.intptr) {
    error::vax_list(ctx, node, where_, which);
  } else if !ctx.ast.is_lvalue(node) {
    error::vax_lvalue(ctx, node, where_, which);
  }
}
