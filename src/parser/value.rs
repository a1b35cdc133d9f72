//! Expression parsing: the classic precedence climb, from the comma
//! operator down to primary expressions.

use super::{ParserCtx, decl};
use crate::ast::{Literal, NodeId, NodeKind, Op};
use crate::error;
use crate::lexer::{Keyword, Punct, Token};

/// `Value = AssignValue [{ "," AssignValue }]`
pub(crate) fn parser_value(ctx: &mut ParserCtx<'_>) -> NodeId {
  let mut node = parser_assign_value(ctx);

  while ctx.see_punct(Punct::Comma) {
    let loc = ctx.loc();
    ctx.accept();
    let r = parser_assign_value(ctx);
    node = ctx.comp.ast.create(NodeKind::Bop { op: Op::Comma, l: node, r }, loc);
  }

  node
}

/// `AssignValue = Ternary [ AssignOp AssignValue ]`
///
/// Right associative.
pub(crate) fn parser_assign_value(ctx: &mut ParserCtx<'_>) -> NodeId {
  let node = parser_ternary(ctx);

  let op = match ctx.lexer.token {
    Token::Punct(Punct::Assign) => Op::Assign,
    Token::Punct(Punct::PlusAssign) => Op::AddAssign,
    Token::Punct(Punct::MinusAssign) => Op::SubAssign,
    Token::Punct(Punct::TimesAssign) => Op::MulAssign,
    Token::Punct(Punct::DivideAssign) => Op::DivAssign,
    Token::Punct(Punct::ModuloAssign) => Op::ModAssign,
    Token::Punct(Punct::BitwiseAndAssign) => Op::AndAssign,
    Token::Punct(Punct::BitwiseOrAssign) => Op::OrAssign,
    Token::Punct(Punct::BitwiseXorAssign) => Op::XorAssign,
    Token::Punct(Punct::ShlAssign) => Op::ShlAssign,
    Token::Punct(Punct::ShrAssign) => Op::ShrAssign,
    _ => return node,
  };

  let loc = ctx.loc();
  ctx.accept();
  let r = parser_assign_value(ctx);
  ctx.comp.ast.create(NodeKind::Bop { op, l: node, r }, loc)
}

/// `Ternary = LogicalOr [ "?" Ternary ":" Ternary ]`
fn parser_ternary(ctx: &mut ParserCtx<'_>) -> NodeId {
  let node = parser_logical_or(ctx);

  if ctx.see_punct(Punct::Question) {
    let loc = ctx.loc();
    ctx.accept();
    let l = parser_ternary(ctx);
    ctx.match_punct(Punct::Colon);
    let r = parser_ternary(ctx);
    return ctx.comp.ast.create(NodeKind::Top { cond: node, l, r }, loc);
  }

  node
}

/// A left associative chain of binary operators.
macro_rules! bop_level {
  ($(#[$attr:meta])* $name:ident, $below:ident, $(($punct:ident, $op:ident)),*) => {
    $(#[$attr])*
    fn $name(ctx: &mut ParserCtx<'_>) -> NodeId {
      let mut node = $below(ctx);
      loop {
        let op = match ctx.lexer.token {
          $(Token::Punct(Punct::$punct) => Op::$op,)*
          _ => return node,
        };
        let loc = ctx.loc();
        ctx.accept();
        let r = $below(ctx);
        node = ctx.comp.ast.create(NodeKind::Bop { op, l: node, r }, loc);
      }
    }
  };
}

bop_level! {
  /// `LogicalOr = LogicalAnd [{ "||" LogicalAnd }]`
  parser_logical_or, parser_logical_and, (LogicalOr, LogicalOr)
}
bop_level! {
  /// `LogicalAnd = BitwiseOr [{ "&&" BitwiseOr }]`
  parser_logical_and, parser_bitwise_or, (LogicalAnd, LogicalAnd)
}
bop_level! {
  /// `BitwiseOr = BitwiseXor [{ "|" BitwiseXor }]`
  parser_bitwise_or, parser_bitwise_xor, (BitwiseOr, BitwiseOr)
}
bop_level! {
  /// `BitwiseXor = BitwiseAnd [{ "^" BitwiseAnd }]`
  parser_bitwise_xor, parser_bitwise_and, (BitwiseXor, BitwiseXor)
}
bop_level! {
  /// `BitwiseAnd = Equality [{ "&" Equality }]`
  parser_bitwise_and, parser_equality, (BitwiseAnd, BitwiseAnd)
}
bop_level! {
  /// `Equality = Rel [{ ( "==" | "!=" ) Rel }]`
  parser_equality, parser_rel, (Equal, Equal), (NotEqual, NotEqual)
}
bop_level! {
  /// `Rel = Shift [{ ( ">" | ">=" | "<" | "<=" ) Shift }]`
  parser_rel, parser_shift,
  (Greater, Greater), (GreaterEqual, GreaterEqual), (Less, Less), (LessEqual, LessEqual)
}
bop_level! {
  /// `Shift = Expr [{ ( "<<" | ">>" ) Expr }]`
  parser_shift, parser_expr, (Shl, Shl), (Shr, Shr)
}
bop_level! {
  /// `Expr = Term [{ ( "+" | "-" ) Term }]`
  parser_expr, parser_term, (Plus, Add), (Minus, Subtract)
}
bop_level! {
  /// `Term = Unary [{ ( "*" | "/" | "%" ) Unary }]`
  parser_term, parser_unary, (Times, Multiply), (Divide, Divide), (Modulo, Modulo)
}

/// `Unary = ( UnaryOp Unary ) | ( "sizeof" SizeofOperand )
///        | Object [{ "++" | "--" }]`
fn parser_unary(ctx: &mut ParserCtx<'_>) -> NodeId {
  let op = match ctx.lexer.token {
    Token::Punct(Punct::LogicalNot) => Some(Op::LogicalNot),
    Token::Punct(Punct::BitwiseNot) => Some(Op::BitwiseNot),
    Token::Punct(Punct::Minus) => Some(Op::Negate),
    Token::Punct(Punct::Plus) => Some(Op::UnaryPlus),
    Token::Punct(Punct::Times) => Some(Op::Deref),
    Token::Punct(Punct::BitwiseAnd) => Some(Op::AddressOf),
    Token::Punct(Punct::PlusPlus) => Some(Op::PreIncrement),
    Token::Punct(Punct::MinusMinus) => Some(Op::PreDecrement),
    _ => None,
  };

  let mut node = if let Some(op) = op {
    let loc = ctx.loc();
    ctx.accept();
    let r = parser_unary(ctx);
    ctx.comp.ast.create(NodeKind::Uop { op, r }, loc)
  } else if ctx.see_keyword(Keyword::Sizeof) {
    parser_sizeof(ctx)
  } else {
    parser_object(ctx)
  };

  loop {
    let op = match ctx.lexer.token {
      Token::Punct(Punct::PlusPlus) => Op::PostIncrement,
      Token::Punct(Punct::MinusMinus) => Op::PostDecrement,
      _ => return node,
    };
    let loc = ctx.loc();
    ctx.accept();
    node = ctx.comp.ast.create(NodeKind::Uop { op, r: node }, loc);
  }
}

/// `Sizeof = "sizeof" ( ( "(" Type ")" ) | Unary )`
fn parser_sizeof(ctx: &mut ParserCtx<'_>) -> NodeId {
  let loc = ctx.loc();
  ctx.match_keyword(Keyword::Sizeof);

  let r = if ctx.see_punct(Punct::LParen) {
    ctx.accept();
    let r = if decl::token_is_decl(ctx) {
      decl::parser_type(ctx)
    } else {
      parser_value(ctx)
    };
    ctx.match_punct(Punct::RParen);
    r
  } else {
    parser_unary(ctx)
  };

  ctx.comp.ast.create(NodeKind::Sizeof { r }, loc)
}

/// `Object = Factor [{ ( "[" Value "]" ) | ( "(" [ Args ] ")" )
///                   | ( "." <Ident> ) | ( "->" <Ident> ) }]`
fn parser_object(ctx: &mut ParserCtx<'_>) -> NodeId {
  let mut node = parser_factor(ctx);

  loop {
    let loc = ctx.loc();

    // Array or pointer indexing
    if ctx.try_match_punct(Punct::LBracket) {
      let r = parser_value(ctx);
      ctx.match_punct(Punct::RBracket);
      node = ctx.comp.ast.create(NodeKind::Index { l: node, r }, loc);

    // Function call
    } else if ctx.try_match_punct(Punct::LParen) {
      let symbol = ctx.comp.ast[node].symbol;
      let call = ctx.comp.ast.create_with_symbol(NodeKind::Call { l: node }, loc, symbol);

      if !ctx.see_punct(Punct::RParen) {
        loop {
          let arg = parser_assign_value(ctx);
          ctx.comp.ast.add_child(call, arg);
          if !ctx.try_match_punct(Punct::Comma) { break }
        }
      }
      ctx.match_punct(Punct::RParen);
      node = call;

    // Record member access. The field is left unresolved for the analyzer,
    // which knows the record type
    } else if ctx.see_punct(Punct::Period) || ctx.see_punct(Punct::Arrow) {
      let op = if ctx.see_punct(Punct::Period) { Op::Member } else { Op::MemberDeref };
      ctx.accept();

      let field_loc = ctx.loc();
      let name = ctx.match_ident();
      let r = ctx.comp.ast.create(NodeKind::Literal(Literal::Ident(name)), field_loc);
      node = ctx.comp.ast.create(NodeKind::Bop { op, l: node, r }, loc);

    } else {
      return node;
    }
  }
}

/// `Factor = ( "(" ( Type ")" Unary | Value ")" ) )
///         | <Int> | <Str> | <Char> | "true" | "false"
///         | ( "{" [ AssignValue [{ "," AssignValue }] ] "}" )
///         | VaOp | <Ident>`
fn parser_factor(ctx: &mut ParserCtx<'_>) -> NodeId {
  let loc = ctx.loc();

  // Parenthesized expression, or a cast
  if ctx.try_match_punct(Punct::LParen) {
    if decl::token_is_decl(ctx) {
      let ty = decl::parser_type(ctx);
      ctx.match_punct(Punct::RParen);
      let r = parser_unary(ctx);
      return ctx.comp.ast.create(NodeKind::Cast { ty, r }, loc);
    }

    let node = parser_value(ctx);
    ctx.match_punct(Punct::RParen);
    return node;
  }

  // Compound initializer
  if ctx.try_match_punct(Punct::LBrace) {
    let node = ctx.comp.ast.create(NodeKind::Literal(Literal::Init), loc);
    if !ctx.see_punct(Punct::RBrace) {
      loop {
        let element = parser_assign_value(ctx);
        ctx.comp.ast.add_child(node, element);
        if !ctx.try_match_punct(Punct::Comma) { break }
      }
    }
    ctx.match_punct(Punct::RBrace);
    return node;
  }

  if ctx.see_int() {
    let value = ctx.match_int();
    return ctx.comp.ast.create(NodeKind::Literal(Literal::Int(value)), loc);
  }

  if ctx.see_str() {
    let value = ctx.match_str();
    return ctx.comp.ast.create(NodeKind::Literal(Literal::Str(value)), loc);
  }

  if ctx.see_char() {
    let value = ctx.match_char();
    return ctx.comp.ast.create(NodeKind::Literal(Literal::Char(value)), loc);
  }

  if ctx.see_keyword(Keyword::True) || ctx.see_keyword(Keyword::False) {
    let value = ctx.see_keyword(Keyword::True);
    ctx.accept();
    return ctx.comp.ast.create(NodeKind::Literal(Literal::Bool(value)), loc);
  }

  if ctx.see_keyword(Keyword::VaStart) || ctx.see_keyword(Keyword::VaEnd)
    || ctx.see_keyword(Keyword::VaArg) || ctx.see_keyword(Keyword::VaCopy) {
    return parser_va_op(ctx);
  }

  if ctx.see_ident() {
    let name = ctx.lexer.buffer.clone();
    let symbol = ctx.comp.syms.find(ctx.scope, &name);

    let node = ctx.comp.ast.create_with_symbol(
      NodeKind::Literal(Literal::Ident(name.clone())), loc, symbol);

    if symbol.is_some() {
      ctx.accept();
    } else {
      error::undef_sym(ctx, &name);
      ctx.next();
    }

    return node;
  }

  error::expected(ctx, "expression");
  let node = ctx.comp.ast.create(NodeKind::Invalid, loc);
  ctx.next();
  node
}

/// `VaOp = "va_start" "(" AssignValue "," <Ident> ")"
///       | "va_end" "(" AssignValue ")"
///       | "va_arg" "(" AssignValue "," Type ")"
///       | "va_copy" "(" AssignValue "," AssignValue ")"`
fn parser_va_op(ctx: &mut ParserCtx<'_>) -> NodeId {
  let loc = ctx.loc();
  let kw = match ctx.lexer.token {
    Token::Keyword(kw) => kw,
    _ => unreachable!("checked by caller"),
  };
  ctx.accept();
  ctx.match_punct(Punct::LParen);

  let ap = parser_assign_value(ctx);

  let kind = match kw {
    Keyword::VaStart => {
      ctx.match_punct(Punct::Comma);
      // The name of the last named parameter
      let last_loc = ctx.loc();
      let name = ctx.lexer.buffer.clone();
      let symbol = ctx.see_ident()
        .then(|| ctx.comp.syms.find(ctx.scope, &name))
        .flatten();
      let last = ctx.comp.ast.create_with_symbol(
        NodeKind::Literal(Literal::Ident(name.clone())), last_loc, symbol);
      if symbol.is_some() {
        ctx.accept();
      } else {
        error::undef_sym(ctx, &name);
        ctx.next();
      }
      NodeKind::VaStart { ap, last }
    }
    Keyword::VaEnd => NodeKind::VaEnd { ap },
    Keyword::VaArg => {
      ctx.match_punct(Punct::Comma);
      let ty = decl::parser_type(ctx);
      NodeKind::VaArg { ap, ty }
    }
    _ => {
      ctx.match_punct(Punct::Comma);
      let src = parser_assign_value(ctx);
      NodeKind::VaCopy { dst: ap, src }
    }
  };

  ctx.match_punct(Punct::RParen);

  ctx.comp.ast.create(kind, loc)
}
