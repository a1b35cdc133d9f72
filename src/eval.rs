//! Compile-time evaluation of integer expressions over the AST.
//!
//! Folds what it can and reports `known: false` for the rest; it is total
//! and never fails. Used for array sizes, enum constants and validating
//! static initializers.

use crate::arch::Architecture;
use crate::ast::{Ast, Literal, NodeId, NodeKind, Op};
use crate::sym::{SymTable, SymTag};

/// The outcome of an evaluation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvalResult {
  pub known: bool,
  pub value: i32,
}

const UNKNOWN: EvalResult = EvalResult { known: false, value: 0 };

fn known(value: i32) -> EvalResult {
  EvalResult { known: true, value }
}

/// Attempt to evaluate an expression.
pub fn eval(arch: &Architecture, ast: &Ast, syms: &SymTable, node: NodeId) -> EvalResult {
  match &ast[node].kind {
    NodeKind::Bop { op, l, r } => eval_bop(arch, ast, syms, *op, *l, *r),
    NodeKind::Uop { op, r } => eval_uop(arch, ast, syms, *op, *r),
    NodeKind::Top { cond, l, r } => eval_ternary(arch, ast, syms, *cond, *l, *r),
    NodeKind::Cast { r, .. } => eval(arch, ast, syms, *r),
    NodeKind::Sizeof { r } => known(ast.dt(*r).size(arch, syms)),
    NodeKind::Literal(lit) => eval_literal(ast, syms, node, lit),

    // Never known
    NodeKind::Call { .. } | NodeKind::Index { .. }
    | NodeKind::VaStart { .. } | NodeKind::VaEnd { .. }
    | NodeKind::VaArg { .. } | NodeKind::VaCopy { .. } => UNKNOWN,

    _ => UNKNOWN,
  }
}

fn eval_bop(arch: &Architecture, ast: &Ast, syms: &SymTable,
            op: Op, l: NodeId, r: NodeId) -> EvalResult {
  let lv = eval(arch, ast, syms, l);
  let rv = eval(arch, ast, syms, r);

  if op.is_assignment() {
    return UNKNOWN;
  }

  if op == Op::Comma {
    return EvalResult { known: lv.known && rv.known, value: rv.value };
  }

  if op.is_member() {
    return rv;
  }

  // The logical connectives short-circuit: one decisive known operand
  // suffices
  if op == Op::LogicalAnd {
    return if lv.known && rv.known {
      known(i32::from(lv.value != 0 && rv.value != 0))
    } else if (lv.known && lv.value == 0) || (rv.known && rv.value == 0) {
      known(0)
    } else {
      UNKNOWN
    };
  }

  if op == Op::LogicalOr {
    return if lv.known && rv.known {
      known(i32::from(lv.value != 0 || rv.value != 0))
    } else if (lv.known && lv.value != 0) || (rv.known && rv.value != 0) {
      known(1)
    } else {
      UNKNOWN
    };
  }

  let value = match op {
    Op::BitwiseAnd => lv.value & rv.value,
    Op::BitwiseOr => lv.value | rv.value,
    Op::BitwiseXor => lv.value ^ rv.value,
    Op::Equal => i32::from(lv.value == rv.value),
    Op::NotEqual => i32::from(lv.value != rv.value),
    Op::Greater => i32::from(lv.value > rv.value),
    Op::GreaterEqual => i32::from(lv.value >= rv.value),
    Op::Less => i32::from(lv.value < rv.value),
    Op::LessEqual => i32::from(lv.value <= rv.value),
    Op::Shr => lv.value.wrapping_shr(rv.value as u32),
    Op::Shl => lv.value.wrapping_shl(rv.value as u32),
    Op::Add => lv.value.wrapping_add(rv.value),
    Op::Subtract => lv.value.wrapping_sub(rv.value),
    Op::Multiply => lv.value.wrapping_mul(rv.value),
    Op::Divide => lv.value.checked_div(rv.value).unwrap_or(0),
    Op::Modulo => lv.value.checked_rem(rv.value).unwrap_or(0),
    _ => return UNKNOWN,
  };

  EvalResult { known: lv.known && rv.known, value }
}

fn eval_uop(arch: &Architecture, ast: &Ast, syms: &SymTable,
            op: Op, r: NodeId) -> EvalResult {
  match op {
    Op::AddressOf | Op::Deref
    | Op::PreIncrement | Op::PreDecrement
    | Op::PostIncrement | Op::PostDecrement => UNKNOWN,

    _ => {
      let rv = eval(arch, ast, syms, r);
      let value = match op {
        Op::LogicalNot => i32::from(rv.value == 0),
        Op::BitwiseNot => !rv.value,
        Op::UnaryPlus => rv.value,
        Op::Negate => rv.value.wrapping_neg(),
        _ => return UNKNOWN,
      };
      EvalResult { known: rv.known, value }
    }
  }
}

fn eval_ternary(arch: &Architecture, ast: &Ast, syms: &SymTable,
                cond: NodeId, l: NodeId, r: NodeId) -> EvalResult {
  let cv = eval(arch, ast, syms, cond);
  let lv = eval(arch, ast, syms, l);
  let rv = eval(arch, ast, syms, r);

  if cv.known {
    // Only the taken branch needs to be known
    if cv.value != 0 { lv } else { rv }
  } else if lv.known && rv.known && lv.value == rv.value {
    // Both branches agree, the condition doesn't matter
    known(lv.value)
  } else {
    UNKNOWN
  }
}

fn eval_literal(ast: &Ast, syms: &SymTable, node: NodeId, lit: &Literal) -> EvalResult {
  match lit {
    Literal::Int(n) => known(*n),
    Literal::Char(c) => known(i32::from(*c)),
    Literal::Bool(b) => known(i32::from(*b)),

    // Only enum constants are known at compile time
    Literal::Ident(_) => match ast[node].symbol {
      Some(sym) if syms[sym].tag == SymTag::EnumConstant => known(syms[sym].const_value),
      _ => UNKNOWN,
    },

    Literal::Str(_) | Literal::Init => UNKNOWN,
  }
}

/// Whether an initializer is a compile-time constant: compound
/// initializers are if all their elements are, everything else if it
/// evaluates.
pub fn is_constant_init(arch: &Architecture, ast: &Ast, syms: &SymTable, node: NodeId) -> bool {
  if let NodeKind::Literal(Literal::Init) = &ast[node].kind {
    ast[node].children.iter().all(|&element| is_constant_init(arch, ast, syms, element))
  } else if let NodeKind::Literal(Literal::Str(_)) = &ast[node].kind {
    // String constants have static storage
    true
  } else {
    eval(arch, ast, syms, node).known
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::{Architecture, Os};
  use crate::lexer::Loc;

  fn int_node(ast: &mut Ast, n: i32) -> NodeId {
    ast.create(NodeKind::Literal(Literal::Int(n)), Loc::builtin())
  }

  #[test]
  fn folds_arithmetic() {
    let arch = Architecture::amd64(Os::Linux);
    let syms = SymTable::new();
    let mut ast = Ast::new();
    let l = int_node(&mut ast, 6);
    let r = int_node(&mut ast, 7);
    let mul = ast.create(NodeKind::Bop { op: Op::Multiply, l, r }, Loc::builtin());
    assert_eq!(eval(&arch, &ast, &syms, mul), known(42));
  }

  #[test]
  fn short_circuit_with_one_unknown() {
    let arch = Architecture::amd64(Os::Linux);
    let syms = SymTable::new();
    let mut ast = Ast::new();
    let zero = int_node(&mut ast, 0);
    let unknown = ast.create(
      NodeKind::Literal(Literal::Ident("x".into())), Loc::builtin());
    let and = ast.create(
      NodeKind::Bop { op: Op::LogicalAnd, l: zero, r: unknown }, Loc::builtin());
    assert_eq!(eval(&arch, &ast, &syms, and), known(0));

    let one = int_node(&mut ast, 1);
    let or = ast.create(
      NodeKind::Bop { op: Op::LogicalOr, l: unknown, r: one }, Loc::builtin());
    assert_eq!(eval(&arch, &ast, &syms, or), known(1));
  }

  #[test]
  fn division_by_zero_is_not_a_panic() {
    let arch = Architecture::amd64(Os::Linux);
    let syms = SymTable::new();
    let mut ast = Ast::new();
    let l = int_node(&mut ast, 1);
    let r = int_node(&mut ast, 0);
    let div = ast.create(NodeKind::Bop { op: Op::Divide, l, r }, Loc::builtin());
    assert!(eval(&arch, &ast, &syms, div).known);
  }

  #[test]
  fn assignment_is_never_known() {
    let arch = Architecture::amd64(Os::Linux);
    let syms = SymTable::new();
    let mut ast = Ast::new();
    let l = int_node(&mut ast, 1);
    let r = int_node(&mut ast, 2);
    let assign = ast.create(NodeKind::Bop { op: Op::Assign, l, r }, Loc::builtin());
    assert!(!eval(&arch, &ast, &syms, assign).known);
  }

  #[test]
  fn ternary_folds_through_known_condition() {
    let arch = Architecture::amd64(Os::Linux);
    let syms = SymTable::new();
    let mut ast = Ast::new();
    let cond = int_node(&mut ast, 1);
    let l = int_node(&mut ast, 10);
    let r = ast.create(NodeKind::Literal(Literal::Ident("x".into())), Loc::builtin());
    let top = ast.create(NodeKind::Top { cond, l, r }, Loc::builtin());
    assert_eq!(eval(&arch, &ast, &syms, top), known(10));
  }
}
