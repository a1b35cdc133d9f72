//! Module inclusion through `using "file";`: cached parsing, symbol
//! grafting and cross-module calls.

use std::io::Write;

use fcc::CompilerCtx;
use fcc::arch::{Architecture, Os};

fn write_file(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
  let path = dir.join(name);
  let mut file = std::fs::File::create(&path).expect("create temp source");
  file.write_all(contents.as_bytes()).expect("write temp source");
  path
}

#[test]
fn using_grafts_declarations() {
  let dir = tempfile::tempdir().expect("tempdir");
  write_file(dir.path(), "defs.h", r#"
    typedef struct vec {
        int x;
        int y;
    } vec;

    int magnitude (vec* v);
  "#);
  let main = write_file(dir.path(), "main.c", r#"
    using "defs.h";

    int main () {
        vec v;
        v.x = 3;
        v.y = 4;
        return magnitude(&v);
    }
  "#);

  let mut ctx = CompilerCtx::new(Architecture::amd64(Os::Linux), vec![]);
  let out = ctx.compile(&main);
  assert_eq!(ctx.result.errors, 0);
  let text = out.expect("assembly");
  assert!(text.contains("call magnitude"));
}

#[test]
fn modules_are_parsed_once() {
  let dir = tempfile::tempdir().expect("tempdir");
  write_file(dir.path(), "shared.h", "int helper (int x);");
  write_file(dir.path(), "middle.h", r#"
    using "shared.h";

    int wrapped (int x);
  "#);
  let main = write_file(dir.path(), "main.c", r#"
    using "shared.h";
    using "middle.h";

    int main () {
        return helper(wrapped(1));
    }
  "#);

  let mut ctx = CompilerCtx::new(Architecture::amd64(Os::Linux), vec![]);
  let out = ctx.compile(&main);
  assert_eq!(ctx.result.errors, 0);
  assert!(out.is_some());
  // main, shared and middle; the double include of shared is cached
  assert_eq!(ctx.modules.len(), 3);
}

#[test]
fn missing_include_is_diagnosed() {
  let dir = tempfile::tempdir().expect("tempdir");
  let main = write_file(dir.path(), "main.c", r#"
    using "no_such_file.h";

    int main () { return 0; }
  "#);

  let mut ctx = CompilerCtx::new(Architecture::amd64(Os::Linux), vec![]);
  let out = ctx.compile(&main);
  assert!(out.is_none());
  assert!(ctx.result.errors > 0);
}

#[test]
fn search_paths_are_consulted() {
  let include_dir = tempfile::tempdir().expect("tempdir");
  let src_dir = tempfile::tempdir().expect("tempdir");
  write_file(include_dir.path(), "lib.h", "int exported (int x);");
  let main = write_file(src_dir.path(), "main.c", r#"
    using "lib.h";

    int main () {
        return exported(0);
    }
  "#);

  let mut ctx = CompilerCtx::new(
    Architecture::amd64(Os::Linux),
    vec![include_dir.path().to_owned()]);
  let out = ctx.compile(&main);
  assert_eq!(ctx.result.errors, 0);
  assert!(out.is_some());
}
