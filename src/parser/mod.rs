//! Recursive descent parsing: statements, blocks and the module level.
//!
//! The parser resolves type names eagerly against the symbol tree it is
//! building, which is what disambiguates `T *x;` as a declaration rather
//! than a multiplication. Symbols are created at their declaration point,
//! before initializers or bodies are parsed, so that recursive references
//! work.
//!
//! Error recovery is one token of lookahead-free advancement: report,
//! skip a token, continue. Consecutive diagnostics on one source line are
//! suppressed.

pub mod decl;
pub mod value;

use std::path::{Path, PathBuf};

use hashbrown::HashSet;

use crate::CompilerCtx;
use crate::ast::{NodeId, NodeKind};
use crate::error;
use crate::lexer::{Keyword, Lexer, Loc, Punct, Token};
use crate::sym::SymId;

/// The outcome of parsing one file.
pub struct ParserResult {
  /// The module's AST root, if the file could be read.
  pub tree: Option<NodeId>,
  /// The module's scope symbol.
  pub module: Option<SymId>,
  pub errors: u32,
  pub warnings: u32,
  /// The input file could not be opened.
  pub notfound: bool,
}

/// Parser context for one translation unit.
pub(crate) struct ParserCtx<'a> {
  pub comp: &'a mut CompilerCtx,
  pub lexer: Lexer,

  /// Full path of the file being parsed, for resolving relative `using`s.
  pub path: PathBuf,
  /// The module-level scope of this file.
  pub module: SymId,
  /// The innermost scope.
  pub scope: SymId,

  /// How many levels of breakable control flow we are inside.
  pub break_level: u32,

  pub errors: u32,
  pub warnings: u32,
  /// The last line an error was reported on, for cascade suppression.
  pub last_error_line: u32,
  /// `(line, name)` pairs already reported as undefined.
  pub reported_undef: HashSet<(u32, String)>,
}

/// Parse a file into the compiler context, reusing the cached module if the
/// file was already included. The returned counters are zero for a cache
/// hit.
pub fn parse(comp: &mut CompilerCtx, input: &Path) -> ParserResult {
  let canonical = input.canonicalize().unwrap_or_else(|_| input.to_owned());

  if let Some(module) = comp.modules.get(&canonical) {
    return ParserResult {
      tree: Some(module.tree),
      module: Some(module.scope),
      errors: 0,
      warnings: 0,
      notfound: false,
    };
  }

  let Ok(src) = std::fs::read_to_string(input) else {
    return ParserResult {
      tree: None, module: None, errors: 0, warnings: 0, notfound: true,
    };
  };

  parse_source(comp, input, src)
}

/// Parse from an in-memory buffer. `input` is used for locations and for
/// resolving relative includes.
pub fn parse_source(comp: &mut CompilerCtx, input: &Path, src: String) -> ParserResult {
  let canonical = input.canonicalize().unwrap_or_else(|_| input.to_owned());
  let module = comp.syms.create_scope(comp.syms.global);

  // Register the module before parsing its body, so that cyclic `using`s
  // resolve to the partially-parsed scope instead of recursing
  let tree = comp.ast.create(crate::ast::NodeKind::Module, Loc::builtin());
  comp.ast[tree].symbol = Some(module);
  comp.modules.insert(canonical.clone(), crate::Module { tree, scope: module, analyzed: false });

  let mut ctx = ParserCtx {
    comp,
    lexer: Lexer::new(&input.display().to_string(), src),
    path: canonical.clone(),
    module,
    scope: module,
    break_level: 0,
    errors: 0,
    warnings: 0,
    last_error_line: 0,
    reported_undef: HashSet::new(),
  };

  ctx.lexer.next();
  parser_module(&mut ctx, tree);

  let (errors, warnings) = (ctx.errors, ctx.warnings);
  // Included files finish parsing before their includer, so this order is
  // dependency order
  comp.module_order.push(canonical);

  ParserResult { tree: Some(tree), module: Some(module), errors, warnings, notfound: false }
}

impl<'a> ParserCtx<'a> {
  /// Location of the current token.
  pub fn loc(&self) -> Loc { self.lexer.loc.clone() }

  /// Swap the innermost scope, returning the old one.
  pub fn scope_set(&mut self, scope: SymId) -> SymId {
    std::mem::replace(&mut self.scope, scope)
  }

  pub fn see_keyword(&self, kw: Keyword) -> bool {
    self.lexer.token == Token::Keyword(kw)
  }

  pub fn see_punct(&self, p: Punct) -> bool {
    self.lexer.token == Token::Punct(p)
  }

  pub fn see_ident(&self) -> bool { self.lexer.token == Token::Ident }

  pub fn see_int(&self) -> bool { self.lexer.token == Token::Int }

  pub fn see_str(&self) -> bool { self.lexer.token == Token::Str }

  pub fn see_char(&self) -> bool { self.lexer.token == Token::Char }

  /// Advance without accepting.
  pub fn next(&mut self) { self.lexer.next() }

  /// Accept the current token.
  pub fn accept(&mut self) {
    log::trace!("matched {}:{}: '{}'", self.lexer.loc.line, self.lexer.loc.col, self.lexer.buffer);
    self.lexer.next();
  }

  /// Accept the current token, returning its lexeme.
  pub fn dup_accept(&mut self) -> String {
    let old = self.lexer.buffer.clone();
    self.accept();
    old
  }

  pub fn match_keyword(&mut self, kw: Keyword) {
    if self.see_keyword(kw) {
      self.accept();
    } else {
      error::expected(self, &format!("'{}'", kw.to_str()));
      self.next();
    }
  }

  pub fn try_match_keyword(&mut self, kw: Keyword) -> bool {
    if self.see_keyword(kw) { self.accept(); true } else { false }
  }

  pub fn match_punct(&mut self, p: Punct) {
    if self.see_punct(p) {
      self.accept();
    } else {
      error::expected(self, &format!("'{}'", p.to_str()));
      self.next();
    }
  }

  pub fn try_match_punct(&mut self, p: Punct) -> bool {
    if self.see_punct(p) { self.accept(); true } else { false }
  }

  /// Accept an integer literal, returning its value.
  pub fn match_int(&mut self) -> i32 {
    let ret = self.lexer.buffer.parse().unwrap_or(0);
    if self.see_int() {
      self.accept();
    } else {
      error::expected(self, "integer");
      self.next();
    }
    ret
  }

  /// Accept an identifier, returning its text.
  pub fn match_ident(&mut self) -> String {
    let old = self.lexer.buffer.clone();
    if self.see_ident() {
      self.accept();
      old
    } else {
      error::expected(self, "identifier");
      self.next();
      String::new()
    }
  }

  /// Accept a string literal, returning its contents.
  pub fn match_str(&mut self) -> String {
    let old = self.lexer.buffer.clone();
    if self.see_str() {
      self.accept();
      old
    } else {
      error::expected(self, "string");
      self.next();
      String::new()
    }
  }

  /// Accept a character literal, returning its (unescaped) byte value.
  pub fn match_char(&mut self) -> u8 {
    let bytes = self.lexer.buffer.as_bytes();
    let value = match bytes {
      [b'\\', b'n', ..] => b'\n',
      [b'\\', b't', ..] => b'\t',
      [b'\\', b'r', ..] => b'\r',
      [b'\\', b'0', ..] => 0,
      [b'\\', c, ..] => *c,
      [c, ..] => *c,
      [] => 0,
    };
    if self.see_char() {
      self.accept();
    } else {
      error::expected(self, "character");
      self.next();
    }
    value
  }
}

/// `Module = [{ ModuleLine }]`
fn parser_module(ctx: &mut ParserCtx<'_>, node: NodeId) {
  log::trace!("Module");

  ctx.comp.ast[node].loc = ctx.loc();

  while ctx.lexer.token != Token::Eof {
    let line = parser_module_line(ctx);
    ctx.comp.ast.add_child(node, line);
  }
}

/// `ModuleLine = Using | Decl`
fn parser_module_line(ctx: &mut ParserCtx<'_>) -> NodeId {
  if ctx.see_keyword(Keyword::Using) {
    parser_using(ctx)
  } else {
    decl::parser_decl(ctx, true)
  }
}

/// `Using = "using" <Str> ";"`
///
/// Parses the named file (if not already cached) and grafts its module
/// scope into the current scope behind a module link.
fn parser_using(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("Using");

  let loc = ctx.loc();
  ctx.match_keyword(Keyword::Using);
  let name = ctx.match_str();

  let mut module = None;
  if !name.is_empty() {
    match resolve_include(ctx, &name) {
      Some(path) => {
        let res = parse(ctx.comp, &path);
        ctx.errors += res.errors;
        ctx.warnings += res.warnings;

        if res.notfound {
          error::file_not_found(ctx, &name);
        } else if let Some(scope) = res.module {
          ctx.comp.syms.create_module_link(ctx.scope, scope);
          module = Some(scope);
        }
      }
      None => error::file_not_found(ctx, &name),
    }
  }

  ctx.match_punct(Punct::Semicolon);

  ctx.comp.ast.create(NodeKind::Using { module }, loc)
}

/// Resolve an include name against the including file's directory, then
/// the configured search paths.
fn resolve_include(ctx: &ParserCtx<'_>, name: &str) -> Option<PathBuf> {
  let local = ctx.path.parent().map(|dir| dir.join(name));
  if let Some(p) = &local
    && p.exists() { return local }

  ctx.comp.search_paths.iter()
    .map(|dir| dir.join(name))
    .find(|p| p.exists())
}

/// `Code = ("{" [{ Line }] "}") | Line`
///
/// A braced block opens a fresh scope.
pub(crate) fn parser_code(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("Code");

  let loc = ctx.loc();
  let node;

  if ctx.see_punct(Punct::LBrace) {
    let scope = ctx.comp.syms.create_scope(ctx.scope);
    let old_scope = ctx.scope_set(scope);
    node = ctx.comp.ast.create_with_symbol(NodeKind::Code, loc, Some(scope));

    ctx.accept();
    while !ctx.see_punct(Punct::RBrace) && ctx.lexer.token != Token::Eof {
      let line = parser_line(ctx);
      ctx.comp.ast.add_child(node, line);
    }
    ctx.match_punct(Punct::RBrace);

    ctx.scope = old_scope;

  } else {
    node = ctx.comp.ast.create(NodeKind::Code, loc);
    let line = parser_line(ctx);
    ctx.comp.ast.add_child(node, line);
  }

  node
}

/// `Line = If | While | DoWhile | For
///       | (( "return" [ Value ] | "break" | "continue" | Value )? ";")
///       | Decl`
fn parser_line(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("Line");

  if ctx.see_keyword(Keyword::If) {
    return parser_if(ctx);
  } else if ctx.see_keyword(Keyword::While) {
    return parser_while(ctx);
  } else if ctx.see_keyword(Keyword::Do) {
    return parser_do_while(ctx);
  } else if ctx.see_keyword(Keyword::For) {
    return parser_for(ctx);
  } else if decl::token_is_decl(ctx) {
    return decl::parser_decl(ctx, false);
  }

  let loc = ctx.loc();

  let node = if ctx.try_match_keyword(Keyword::Return) {
    let value = if ctx.see_punct(Punct::Semicolon) {
      None
    } else {
      Some(value::parser_value(ctx))
    };
    ctx.comp.ast.create(NodeKind::Return { value }, loc)

  } else if ctx.try_match_keyword(Keyword::Break) {
    if ctx.break_level == 0 {
      error::illegal_outside(ctx, "break", "a loop");
    }
    ctx.comp.ast.create(NodeKind::Break, loc)

  } else if ctx.try_match_keyword(Keyword::Continue) {
    if ctx.break_level == 0 {
      error::illegal_outside(ctx, "continue", "a loop");
    }
    ctx.comp.ast.create(NodeKind::Continue, loc)

  // Allow empty lines
  } else if ctx.see_punct(Punct::Semicolon) {
    ctx.comp.ast.create(NodeKind::Empty, loc)

  } else {
    value::parser_value(ctx)
  };

  ctx.match_punct(Punct::Semicolon);

  node
}

/// `If = "if" Value Code [ "else" Code ]`
fn parser_if(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("If");

  let loc = ctx.loc();
  ctx.match_keyword(Keyword::If);

  let cond = value::parser_value(ctx);
  let l = parser_code(ctx);
  let r = ctx.try_match_keyword(Keyword::Else).then(|| parser_code(ctx));

  ctx.comp.ast.create(NodeKind::Branch { cond, l, r }, loc)
}

/// `While = "while" Value Code`
fn parser_while(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("While");

  let loc = ctx.loc();
  ctx.match_keyword(Keyword::While);

  let cond = value::parser_value(ctx);
  ctx.break_level += 1;
  let body = parser_code(ctx);
  ctx.break_level -= 1;

  ctx.comp.ast.create(NodeKind::Loop { cond, body, is_do: false }, loc)
}

/// `DoWhile = "do" Code "while" Value ";"`
fn parser_do_while(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("DoWhile");

  let loc = ctx.loc();
  ctx.match_keyword(Keyword::Do);

  ctx.break_level += 1;
  let body = parser_code(ctx);
  ctx.break_level -= 1;
  ctx.match_keyword(Keyword::While);
  let cond = value::parser_value(ctx);
  ctx.match_punct(Punct::Semicolon);

  ctx.comp.ast.create(NodeKind::Loop { cond, body, is_do: true }, loc)
}

/// `For = "for" [ "(" ] [ Decl | Value ] ";" [ Value ] ";" [ Value ] [ ")" ] Code`
///
/// The parentheses are optional, and each component may be empty.
fn parser_for(ctx: &mut ParserCtx<'_>) -> NodeId {
  log::trace!("For");

  let loc = ctx.loc();
  ctx.match_keyword(Keyword::For);
  ctx.try_match_punct(Punct::LParen);

  // The declaration, if any, lands in a scope of its own
  let scope = ctx.comp.syms.create_scope(ctx.scope);
  let old_scope = ctx.scope_set(scope);

  // Initializer. A declaration eats the semicolon itself
  let init = if decl::token_is_decl(ctx) {
    decl::parser_decl(ctx, false)
  } else {
    let init = if ctx.see_punct(Punct::Semicolon) {
      ctx.comp.ast.create(NodeKind::Empty, ctx.loc())
    } else {
      value::parser_value(ctx)
    };
    ctx.match_punct(Punct::Semicolon);
    init
  };

  // Condition
  let cond = if ctx.see_punct(Punct::Semicolon) {
    ctx.comp.ast.create(NodeKind::Empty, ctx.loc())
  } else {
    value::parser_value(ctx)
  };
  ctx.match_punct(Punct::Semicolon);

  // Iterator
  let step = if ctx.see_punct(Punct::RParen) || ctx.see_punct(Punct::LBrace) {
    ctx.comp.ast.create(NodeKind::Empty, ctx.loc())
  } else {
    value::parser_value(ctx)
  };

  ctx.try_match_punct(Punct::RParen);

  ctx.break_level += 1;
  let body = parser_code(ctx);
  ctx.break_level -= 1;

  ctx.scope = old_scope;

  let node = ctx.comp.ast.create(NodeKind::Iter { init, cond, step, body }, loc);
  ctx.comp.ast[node].symbol = Some(scope);
  node
}
