//! A compiler for a small C-like language, lowering source files to
//! x86-64 GNU-assembler text (Intel syntax).
//!
//! The pipeline: source text → token stream → AST + symbol tree →
//! annotated AST → per-function block IR → optimized IR → assembly text.
//! Each phase owns an explicit context; the [`CompilerCtx`] owns the
//! arenas shared across phases (AST, symbols) and the module cache, and
//! orchestrates one translation unit at a time.

pub mod arch;
pub mod asm;
pub mod ast;
pub mod analyzer;
pub mod emitter;
pub mod error;
pub mod eval;
pub mod idx;
pub mod ir;
pub mod lexer;
pub mod operand;
pub mod parser;
pub mod reg;
pub mod sym;
pub mod ty;

use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use arch::Architecture;
use ast::{Ast, NodeId};
use sym::{SymId, SymTable, TypeMask};

/// The built-in types, installed into the global namespace at context
/// creation.
pub struct Builtins {
  pub void_: SymId,
  pub bool_: SymId,
  pub char_: SymId,
  pub int_: SymId,
  /// `intptr_t`, which doubles as `va_list`.
  pub intptr: SymId,
}

/// A parsed module, cached per canonical path so each file is parsed and
/// analyzed once no matter how often it is `using`-ed.
pub struct Module {
  pub tree: NodeId,
  pub scope: SymId,
  pub analyzed: bool,
}

/// The per-compilation counters, aggregated across phases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompileResult {
  pub errors: u32,
  pub warnings: u32,
  pub internal_errors: u32,
}

impl CompileResult {
  /// Whether emission may proceed.
  #[must_use] pub fn clean(&self) -> bool {
    self.errors == 0 && self.internal_errors == 0
  }
}

/// The compiler context: arenas, module cache, builtins and counters.
pub struct CompilerCtx {
  pub arch: Architecture,
  pub ast: Ast,
  pub syms: SymTable,
  pub builtins: Builtins,

  /// Parsed modules by canonical path.
  pub modules: HashMap<PathBuf, Module>,
  /// Module completion order; includes finish before their includers, so
  /// this is dependency order.
  pub module_order: Vec<PathBuf>,
  /// Where `using` looks after the including file's directory.
  pub search_paths: Vec<PathBuf>,

  pub result: CompileResult,
}

impl CompilerCtx {
  /// Create a context for the given target, installing the built-in
  /// types.
  #[must_use] pub fn new(arch: Architecture, search_paths: Vec<PathBuf>) -> CompilerCtx {
    let mut syms = SymTable::new();
    let global = syms.global;

    let void_ = syms.create_type(global, "void", 0, TypeMask::empty());
    let bool_ = syms.create_type(global, "bool", 4, TypeMask::BOOL);
    let char_ = syms.create_type(global, "char", 1, TypeMask::INTEGRAL);
    let int_ = syms.create_type(global, "int", 4, TypeMask::INTEGRAL);

    syms.create_type(global, "int8_t", 1, TypeMask::INTEGRAL);
    syms.create_type(global, "int16_t", 2, TypeMask::INTEGRAL);
    syms.create_type(global, "int32_t", 4, TypeMask::INTEGRAL);
    let intptr = syms.create_type(global, "intptr_t", arch.wordsize, TypeMask::INTEGRAL);
    if arch.wordsize >= 8 {
      syms.create_type(global, "int64_t", 8, TypeMask::INTEGRAL);
    }

    CompilerCtx {
      arch,
      ast: Ast::new(),
      syms,
      builtins: Builtins { void_, bool_, char_, int_, intptr },
      modules: HashMap::new(),
      module_order: vec![],
      search_paths,
      result: CompileResult::default(),
    }
  }

  /// Compile one translation unit from a file, returning its assembly
  /// text when it came out clean.
  pub fn compile(&mut self, input: &Path) -> Option<String> {
    let res = parser::parse(self, input);

    if res.notfound {
      eprintln!("fcc: Input file '{}' doesn't exist", input.display());
      self.result.errors += 1;
      return None;
    }

    self.finish(res)
  }

  /// Compile one translation unit from an in-memory buffer; `filename`
  /// is used for diagnostics and include resolution.
  pub fn compile_source(&mut self, filename: &str, src: String) -> Option<String> {
    let res = parser::parse_source(self, Path::new(filename), src);
    self.finish(res)
  }

  fn finish(&mut self, res: parser::ParserResult) -> Option<String> {
    self.result.errors += res.errors;
    self.result.warnings += res.warnings;

    // Analyze every newly parsed module, dependencies first, so that
    // types from used modules are resolved before their users
    for path in self.module_order.clone() {
      let module = self.modules.get_mut(&path).expect("ordered module");
      if module.analyzed { continue }
      module.analyzed = true;

      let tree = module.tree;
      let analysis = analyzer::analyzer(
        &mut self.ast, &mut self.syms, &self.arch, &self.builtins, tree);
      self.result.errors += analysis.errors;
      self.result.warnings += analysis.warnings;
      self.result.internal_errors += analysis.internal_errors;
    }

    // Emission is gated on a clean front end
    if !self.result.clean() {
      return None;
    }

    let tree = res.tree?;
    let (mut ir, internal_errors) =
      emitter::emitter(&self.ast, &mut self.syms, &self.arch, tree);
    self.result.internal_errors += internal_errors;

    ir::opt::block_level_analysis(&mut ir);

    let mut out = asm::AsmCtx::new();
    ir::emit::emit(&ir, &self.syms, &mut out);

    if !self.result.clean() {
      return None;
    }

    Some(out.into_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use arch::Os;

  fn compile(src: &str) -> (Option<String>, CompileResult) {
    let mut ctx = CompilerCtx::new(Architecture::amd64(Os::Linux), vec![]);
    let out = ctx.compile_source("test.c", src.to_owned());
    (out, ctx.result)
  }

  #[test]
  fn empty_module_compiles() {
    let (out, result) = compile("");
    assert!(out.is_some());
    assert_eq!(result.errors, 0);
  }

  #[test]
  fn builtin_types_are_installed() {
    let ctx = CompilerCtx::new(Architecture::amd64(Os::Linux), vec![]);
    for name in ["void", "bool", "char", "int", "intptr_t", "int64_t"] {
      assert!(ctx.syms.find(ctx.syms.global, name).is_some(), "missing {name}");
    }
  }

  #[test]
  fn errors_gate_emission() {
    let (out, result) = compile("int main() { return undefined_thing; }");
    assert!(out.is_none());
    assert!(result.errors > 0);
  }
}
