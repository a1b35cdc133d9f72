//! Parsing of declarations, declarators and type specifications.
//!
//! The declarator grammar mirrors C: `DeclExpr` handles initializers,
//! `DeclUnary` the `*` and `const` prefixes, `DeclObject` the `[]` and
//! `()` postfixes, `DeclAtom` names and grouping parens. The same
//! productions serve named declarations, parameters and abstract types;
//! `in_decl` and the symbol tag tell them which parts are allowed.

use if_chain::if_chain;

use super::{ParserCtx, parser_code, value};
use crate::ast::{Literal, NodeId, NodeKind, Op};
use crate::error;
use crate::lexer::{Keyword, Punct};
use crate::sym::{Storage, SymId, SymTag};

/// Whether the current token begins a declaration: a storage class, type
/// qualifier, aggregate keyword, built-in type name, or an identifier
/// naming a type in scope.
pub(crate) fn token_is_decl(ctx: &ParserCtx<'_>) -> bool {
  for kw in [
    Keyword::Const,
    Keyword::Auto, Keyword::Static, Keyword::Extern, Keyword::Typedef,
    Keyword::Struct, Keyword::Union, Keyword::Enum,
    Keyword::Void, Keyword::Bool, Keyword::Char, Keyword::Int,
  ] {
    if ctx.see_keyword(kw) { return true }
  }

  ctx.see_ident()
    && matches!(ctx.comp.syms.find(ctx.scope, &ctx.lexer.buffer),
                Some(sym) if ctx.comp.syms[sym].is_type())
}

/// `Type = DeclBasic DeclExpr#`
///
/// The declarator is told not to allow identifiers or initializers, and
/// not to create symbols.
pub(crate) fn parser_type(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("Type");

  let loc = ctx.loc();
  let basic = parser_decl_basic(ctx);
  let expr = parser_decl_expr(ctx, false, SymTag::Scope);
  ctx.comp.ast.create(NodeKind::Type { basic, expr }, loc)
}

/// `Decl = Storage DeclBasic ( ";" | DeclExpr# ( [{ "," DeclExpr# }] ";"
///                                             | Code# ) )`
///
/// The declarators are told to require identifiers, allow initializers
/// and create symbols.
pub(crate) fn parser_decl(ctx: &mut ParserCtx<'_>, module: bool) -> NodeId {
  log::trace!("Decl");

  let loc = ctx.loc();
  let storage = parser_storage(ctx);
  let basic = parser_decl_basic(ctx);
  let node = ctx.comp.ast.create(NodeKind::Decl { basic, storage }, loc);

  // A lone aggregate definition, `struct x {...};`
  if ctx.try_match_punct(Punct::Semicolon) {
    return node;
  }

  // Grammatically typedef is a storage class, but semantically a symbol tag
  let tag = if storage == Some(Storage::Typedef) { SymTag::Typedef } else { SymTag::Id };

  let first = parser_decl_expr(ctx, true, tag);
  ctx.comp.ast.add_child(node, first);

  if ctx.see_punct(Punct::LBrace) {
    // Function implementation
    let loc = ctx.loc();
    let symbol = ctx.comp.ast[first].symbol;

    if let Some(sym) = symbol {
      if ctx.comp.syms[sym].impl_node.is_some() {
        error::reimplemented_sym(ctx, sym);
      }
    }

    if !module {
      error::illegal_outside(ctx, "function implementation", "module level code");
    }

    let old_scope = match symbol {
      Some(sym) => ctx.scope_set(sym),
      None => ctx.scope,
    };
    let body = parser_code(ctx);
    ctx.scope = old_scope;

    let impl_node = ctx.comp.ast.create_with_symbol(
      NodeKind::FnImpl { decl: node, body }, loc, symbol);
    if let Some(sym) = symbol
      && ctx.comp.syms[sym].impl_node.is_none() {
      ctx.comp.syms[sym].impl_node = Some(impl_node);
    }
    return impl_node;
  }

  while ctx.try_match_punct(Punct::Comma) {
    let next = parser_decl_expr(ctx, true, tag);
    ctx.comp.ast.add_child(node, next);
  }
  ctx.match_punct(Punct::Semicolon);

  node
}

/// `Field = DeclBasic [ DeclExpr# [{ "," DeclExpr# }] ] ";"`
fn parser_field(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("Field");

  let loc = ctx.loc();
  let basic = parser_decl_basic(ctx);
  let node = ctx.comp.ast.create(NodeKind::Decl { basic, storage: None }, loc);

  if !ctx.see_punct(Punct::Semicolon) {
    loop {
      let field = parser_decl_expr(ctx, true, SymTag::Id);
      ctx.comp.ast.add_child(node, field);
      if !ctx.try_match_punct(Punct::Comma) { break }
    }
  }

  ctx.match_punct(Punct::Semicolon);

  node
}

/// `EnumField = Name# [ "=" AssignValue ]`
fn parser_enum_field(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("EnumField");

  let node = parser_name(ctx, true, SymTag::EnumConstant);

  if ctx.see_punct(Punct::Assign) {
    let loc = ctx.loc();
    ctx.accept();
    let value = value::parser_assign_value(ctx);
    let symbol = ctx.comp.ast[node].symbol;
    ctx.comp.ast.create_with_symbol(
      NodeKind::Bop { op: Op::Assign, l: node, r: value }, loc, symbol)
  } else {
    node
  }
}

/// `Param = DeclBasic DeclExpr#`
///
/// Identifiers are accepted but not required; symbols are created only
/// when `in_decl`.
fn parser_param(ctx: &mut ParserCtx<'_>, in_decl: bool) -> NodeId {
  log::trace!("Param");

  let loc = ctx.loc();
  let basic = parser_decl_basic(ctx);
  let expr = parser_decl_expr(ctx, in_decl, SymTag::Param);
  let symbol = ctx.comp.ast[expr].symbol;
  ctx.comp.ast.create_with_symbol(NodeKind::Param { basic, expr }, loc, symbol)
}

/// `Storage = [ "auto" | "static" | "extern" | "typedef" ]`
fn parser_storage(ctx: &mut ParserCtx<'_>) -> Option<Storage> {
  if ctx.try_match_keyword(Keyword::Static) { Some(Storage::Static) }
  else if ctx.try_match_keyword(Keyword::Extern) { Some(Storage::Extern) }
  else if ctx.try_match_keyword(Keyword::Typedef) { Some(Storage::Typedef) }
  else if ctx.try_match_keyword(Keyword::Auto) { Some(Storage::Auto) }
  else { None }
}

/// `DeclBasic = [ "const" ] ( <TypeIdent> | StructUnion | Enum )`
fn parser_decl_basic(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("DeclBasic");

  let loc = ctx.loc();
  let is_const = ctx.try_match_keyword(Keyword::Const);

  let node = if ctx.see_keyword(Keyword::Struct) || ctx.see_keyword(Keyword::Union) {
    parser_struct_or_union(ctx)
  } else if ctx.see_keyword(Keyword::Enum) {
    parser_enum(ctx)
  } else if let Some(builtin) = builtin_type_keyword(ctx) {
    let name = ctx.dup_accept();
    ctx.comp.ast.create_with_symbol(
      NodeKind::Literal(Literal::Ident(name)), loc.clone(), Some(builtin))
  } else {
    let symbol = ctx.see_ident()
      .then(|| ctx.comp.syms.find(ctx.scope, &ctx.lexer.buffer))
      .flatten();

    match symbol {
      Some(sym) => {
        let name = ctx.dup_accept();
        ctx.comp.ast.create_with_symbol(
          NodeKind::Literal(Literal::Ident(name)), loc.clone(), Some(sym))
      }
      None => {
        if ctx.see_ident() {
          error::undef_type(ctx);
          ctx.next();
        } else {
          error::expected(ctx, "type name");
        }
        ctx.comp.ast.create(NodeKind::Invalid, loc.clone())
      }
    }
  };

  if is_const {
    let symbol = ctx.comp.ast[node].symbol;
    ctx.comp.ast.create_with_symbol(NodeKind::Const { r: node }, loc, symbol)
  } else {
    node
  }
}

/// The builtin type symbol for a type keyword, if the current token is one.
fn builtin_type_keyword(ctx: &ParserCtx<'_>) -> Option<SymId> {
  let b = &ctx.comp.builtins;
  if ctx.see_keyword(Keyword::Void) { Some(b.void_) }
  else if ctx.see_keyword(Keyword::Bool) { Some(b.bool_) }
  else if ctx.see_keyword(Keyword::Char) { Some(b.char_) }
  else if ctx.see_keyword(Keyword::Int) { Some(b.int_) }
  else { None }
}

/// `StructOrUnion = ("struct" | "union") Name# ^ ( "{" [{ Field }] "}" )`
fn parser_struct_or_union(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("StructOrUnion");

  let loc = ctx.loc();
  let tag = if ctx.try_match_keyword(Keyword::Struct) {
    SymTag::Struct
  } else {
    ctx.match_keyword(Keyword::Union);
    SymTag::Union
  };

  // Name; an anonymous aggregate gets an empty-identifier symbol and will
  // require a body
  let anonymous = !ctx.see_ident();
  let name = if anonymous {
    let sym = ctx.comp.syms.create_named(tag, ctx.scope, "");
    ctx.comp.ast.create_with_symbol(NodeKind::Empty, loc.clone(), Some(sym))
  } else {
    parser_name(ctx, true, tag)
  };

  let symbol = ctx.comp.ast[name].symbol;
  let node = ctx.comp.ast.create_with_symbol(
    match tag {
      SymTag::Struct => NodeKind::Struct { name },
      _ => NodeKind::Union { name },
    },
    loc, symbol);

  let Some(symbol) = symbol else { return node };
  let old_scope = ctx.scope_set(symbol);

  // Body
  if anonymous || ctx.see_punct(Punct::LBrace) {
    // Only error if not already reported for a wrong tag
    if ctx.comp.syms[symbol].impl_node.is_some() && ctx.comp.syms[symbol].tag == tag {
      error::reimplemented_sym(ctx, symbol);
    } else {
      ctx.comp.syms[symbol].impl_node = Some(node);
    }

    ctx.match_punct(Punct::LBrace);
    ctx.comp.syms[symbol].complete = true;

    while !ctx.see_punct(Punct::RBrace) && ctx.lexer.token != crate::lexer::Token::Eof {
      let field = parser_field(ctx);
      ctx.comp.ast.add_child(node, field);
    }

    ctx.match_punct(Punct::RBrace);
  }

  ctx.scope = old_scope;

  node
}

/// `Enum = "enum" Name# ^ ( "{" EnumField [{ "," EnumField }] "}" )`
fn parser_enum(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("Enum");

  let loc = ctx.loc();
  ctx.match_keyword(Keyword::Enum);

  let anonymous = !ctx.see_ident();
  let name = if anonymous {
    let sym = ctx.comp.syms.create_named(SymTag::Enum, ctx.scope, "");
    ctx.comp.ast.create_with_symbol(NodeKind::Empty, loc.clone(), Some(sym))
  } else {
    parser_name(ctx, true, SymTag::Enum)
  };

  let symbol = ctx.comp.ast[name].symbol;
  let node = ctx.comp.ast.create_with_symbol(NodeKind::Enum { name }, loc, symbol);

  let Some(symbol) = symbol else { return node };

  if anonymous || ctx.see_punct(Punct::LBrace) {
    ctx.match_punct(Punct::LBrace);
    ctx.comp.syms[symbol].complete = true;

    let old_scope = ctx.scope_set(symbol);
    if !ctx.see_punct(Punct::RBrace) {
      loop {
        let field = parser_enum_field(ctx);
        ctx.comp.ast.add_child(node, field);
        if !ctx.try_match_punct(Punct::Comma) { break }
      }
    }
    ctx.scope = old_scope;

    ctx.match_punct(Punct::RBrace);
  }

  node
}

/// `DeclExpr = DeclUnary [ "=" AssignValue ]`
///
/// `AssignValue` rather than `Value`, so that `int x = 5, y = 6;` is two
/// declarators rather than a comma expression.
fn parser_decl_expr(ctx: &mut ParserCtx<'_>, in_decl: bool, tag: SymTag) -> NodeId {
  log::trace!("DeclExpr");

  let node = parser_decl_unary(ctx, in_decl, tag);

  if ctx.see_punct(Punct::Assign) {
    if in_decl && tag == SymTag::Id {
      let loc = ctx.loc();
      ctx.accept();
      let init = value::parser_assign_value(ctx);
      let symbol = ctx.comp.ast[node].symbol;
      return ctx.comp.ast.create_with_symbol(
        NodeKind::Bop { op: Op::Assign, l: node, r: init }, loc, symbol);
    }

    error::illegal_outside(ctx, "initializer", "a declaration");
    let loc = ctx.loc();
    return ctx.comp.ast.create(NodeKind::Invalid, loc);
  }

  node
}

/// `DeclUnary = (( "*" | "const" ) DeclUnary) | DeclObject`
fn parser_decl_unary(ctx: &mut ParserCtx<'_>, in_decl: bool, tag: SymTag) -> NodeId {
  let loc = ctx.loc();

  if ctx.try_match_punct(Punct::Times) {
    let r = parser_decl_unary(ctx, in_decl, tag);
    let symbol = ctx.comp.ast[r].symbol;
    ctx.comp.ast.create_with_symbol(NodeKind::Uop { op: Op::Deref, r }, loc, symbol)
  } else if ctx.try_match_keyword(Keyword::Const) {
    let r = parser_decl_unary(ctx, in_decl, tag);
    let symbol = ctx.comp.ast[r].symbol;
    ctx.comp.ast.create_with_symbol(NodeKind::Const { r }, loc, symbol)
  } else {
    parser_decl_object(ctx, in_decl, tag)
  }
}

/// `DeclObject = DeclAtom [{ DeclFunction | ( "[" [ Value ] "]" ) }]`
fn parser_decl_object(ctx: &mut ParserCtx<'_>, in_decl: bool, tag: SymTag) -> NodeId {
  let mut node = parser_decl_atom(ctx, in_decl, tag);

  loop {
    let loc = ctx.loc();

    if ctx.see_punct(Punct::LParen) {
      node = parser_decl_function(ctx, in_decl, node);

    } else if ctx.try_match_punct(Punct::LBracket) {
      let symbol = ctx.comp.ast[node].symbol;

      let size = if ctx.try_match_punct(Punct::RBracket) {
        ctx.comp.ast.create(NodeKind::Empty, loc.clone())
      } else {
        let size = value::parser_value(ctx);
        ctx.match_punct(Punct::RBracket);
        size
      };

      node = ctx.comp.ast.create_with_symbol(
        NodeKind::Index { l: node, r: size }, loc, symbol);

    } else {
      return node;
    }
  }
}

/// `DeclFunction = "(" [ ( Param [{ "," Param }] [ "," "..." ] ) | "..." ] ")"`
fn parser_decl_function(ctx: &mut ParserCtx<'_>, in_decl: bool, atom: NodeId) -> NodeId {
  log::trace!("DeclFunction");

  ctx.match_punct(Punct::LParen);

  let symbol = ctx.comp.ast[atom].symbol;
  let node = ctx.comp.ast.create_with_symbol(NodeKind::Call { l: atom }, ctx.loc(), symbol);

  // Parameters are declared inside the function symbol's scope
  let old_scope = symbol.map(|sym| ctx.scope_set(sym));

  if !ctx.see_punct(Punct::RParen) {
    loop {
      if ctx.see_punct(Punct::Ellipsis) {
        let ellipsis = ctx.comp.ast.create(NodeKind::Ellipsis, ctx.loc());
        ctx.comp.ast.add_child(node, ellipsis);
        ctx.accept();
        break;
      }

      let param = parser_param(ctx, in_decl);
      ctx.comp.ast.add_child(node, param);
      if !ctx.try_match_punct(Punct::Comma) { break }
    }
  }

  if let Some(old) = old_scope { ctx.scope = old }

  ctx.match_punct(Punct::RParen);

  node
}

/// `DeclAtom = ( "(" DeclExpr ")" ) | Name | ε`
///
/// Outside a declaration identifiers are not allowed. Inside one, a name
/// is required except for parameters, where it is optional.
fn parser_decl_atom(ctx: &mut ParserCtx<'_>, in_decl: bool, tag: SymTag) -> NodeId {
  if ctx.try_match_punct(Punct::LParen) {
    let node = parser_decl_expr(ctx, in_decl, tag);
    ctx.match_punct(Punct::RParen);
    node
  } else if ctx.see_ident() {
    if in_decl || tag == SymTag::Param {
      parser_name(ctx, in_decl, tag)
    } else {
      error::illegal_outside(ctx, "identifier", "a declaration");
      let loc = ctx.loc();
      ctx.next();
      ctx.comp.ast.create(NodeKind::Invalid, loc)
    }
  } else if in_decl && tag != SymTag::Param {
    parser_name(ctx, in_decl, tag)
  } else {
    ctx.comp.ast.create(NodeKind::Empty, ctx.loc())
  }
}

/// `Name = <UnqualifiedIdent>`
///
/// When `in_decl`, creates a symbol in the current scope, or reuses one
/// found there, recording this declaration site. A symbol reused from an
/// older scope (a prototype from an included module, say) is moved into
/// the current scope, leaving a link behind.
fn parser_name(ctx: &mut ParserCtx<'_>, in_decl: bool, tag: SymTag) -> NodeId {
  log::trace!("Name");

  if !ctx.see_ident() {
    error::expected(ctx, "name");
    let loc = ctx.loc();
    let node = ctx.comp.ast.create(NodeKind::Literal(Literal::Ident(String::new())), loc);
    let sym = ctx.comp.syms.create_named(tag, ctx.scope, "");
    ctx.comp.ast[node].symbol = Some(sym);
    return node;
  }

  let loc = ctx.loc();
  let name = ctx.dup_accept();

  // Check for a collision in this scope only, so that declarations from
  // outer scopes are shadowed rather than redeclared. Aggregate tags are
  // the exception: `struct x` anywhere names the x in scope.
  let mut found = ctx.comp.syms.child(ctx.scope, &name);
  let reference_only = found.is_none()
    && matches!(tag, SymTag::Struct | SymTag::Union | SymTag::Enum);
  if reference_only {
    found = ctx.comp.syms.find(ctx.scope, &name);
  }

  let symbol = match found {
    Some(sym) => {
      // SPECIAL EXCEPTION
      // There is only one namespace, so in general a redeclaration with a
      // different tag is an error. Except: struct/union/enum tags may be
      // redeclared as a typedef, to allow the
      //   typedef struct x { ... } x;
      // idiom. This doesn't guarantee it redeclares the *right* symbol.
      if_chain! {
        if ctx.comp.syms[sym].tag != tag;
        if !(matches!(ctx.comp.syms[sym].tag, SymTag::Struct | SymTag::Union | SymTag::Enum)
             && tag == SymTag::Typedef);
        then {
          error::redeclared_sym_as(ctx, sym, tag);
        }
      }

      // A symbol declared at another module's top level (reached through
      // a module link) moves to this scope, leaving a link behind: its
      // implementation should see the scope it is actually in
      let foreign_module = ctx.comp.syms[sym].parent.is_some_and(|p| {
        p != ctx.scope
          && ctx.comp.syms[p].tag == SymTag::Scope
          && ctx.comp.syms[p].parent == Some(ctx.comp.syms.global)
      });
      if !reference_only && foreign_module && ctx.comp.syms[sym].parent != Some(ctx.scope) {
        ctx.comp.syms.change_parent(sym, ctx.scope);
      }

      sym
    }
    None if in_decl => ctx.comp.syms.create_named(tag, ctx.scope, &name),
    None => {
      error::undef_sym(ctx, &name);
      let node = ctx.comp.ast.create(NodeKind::Literal(Literal::Ident(name)), loc);
      return node;
    }
  };

  let node = ctx.comp.ast.create_with_symbol(
    NodeKind::Literal(Literal::Ident(name)), loc, Some(symbol));

  // Might be a duplicate declaration or a (matching) redefinition; the
  // analyzer decides
  ctx.comp.syms[symbol].decls.push(node);

  node
}
