//! End-to-end pipeline tests: source strings in, assembly text and
//! diagnostics counters out.

use fcc::CompilerCtx;
use fcc::arch::{Architecture, Os};

fn compile(src: &str) -> (Option<String>, fcc::CompileResult) {
  let mut ctx = CompilerCtx::new(Architecture::amd64(Os::Linux), vec![]);
  let out = ctx.compile_source("test.c", src.to_owned());
  (out, ctx.result)
}

fn compile_clean(src: &str) -> String {
  let (out, result) = compile(src);
  assert_eq!(result.errors, 0, "unexpected errors");
  assert_eq!(result.internal_errors, 0, "internal errors");
  out.expect("assembly should be produced")
}

#[test]
fn constant_arithmetic_program() {
  let text = compile_clean("int main() { return 6*5*4*3*2*1; }");
  assert!(text.contains(".intel_syntax noprefix"));
  assert!(text.contains(".globl main"));
  assert!(text.contains("main:"));
  assert!(text.contains("imul"));
  assert!(text.contains("ret"));
}

#[test]
fn function_frames() {
  let text = compile_clean("int f(int x) { int y = x; return y; }");
  assert!(text.contains("push rbp"));
  assert!(text.contains("mov rbp, rsp"));
  assert!(text.contains("sub rsp,"));
  assert!(text.contains("mov rsp, rbp"));
  assert!(text.contains("pop rbp"));
}

#[test]
fn array_and_pointer_indexing_agree() {
  let text = compile_clean(r#"
    void f (int* v) {
        v[1] = v[1]*2;
        v[2] = v[2]*4;
    }

    int main () {
        int a[] = {0, 1, 2, 3, 4};
        f(a);
        a[1] = a[1]*2;
        return a[1] + a[2];
    }
  "#);
  assert!(text.contains("call f"));
  // Array elements are reached relative to the frame, pointer elements
  // through a loaded base
  assert!(text.contains("rbp"));
}

#[test]
fn structs_and_pointer_fields() {
  let text = compile_clean(r#"
    struct A {
        int x, y, z;
    };

    struct B {
        A* x;
        int y[3];
    };

    int f (B* b) {
        return b->x->y;
    }

    int main () {
        A a;
        B b;

        a.y = 2;

        b.x = &a;
        b.x->y = b.x->y*2;
        b.y[1] = 5;

        return b.y[1] + f(&b);
    }
  "#);
  assert!(text.contains("call f"));
  assert!(text.contains("lea"));
}

#[test]
fn recursive_factorial() {
  let text = compile_clean(r#"
    int factorial (int n) {
        if n <= 1
            return 1;

        else
            return n*factorial(n-1);
    }

    int main () {
        return factorial(6);
    }
  "#);
  assert!(text.contains("call factorial"));
  assert!(text.contains(".globl factorial"));
}

#[test]
fn loops_and_empty_for_components() {
  let text = compile_clean(r#"
    int main () {
        int n = 0;

        for (int i = 0; i < 10; i++)
            n++;

        for (;;) {
            n--;

            if n == 0
                break;
        }

        while n < 3
            n++;

        do
            n--;
        while (n > 0);

        return n;
    }
  "#);
  assert!(text.contains("jmp") || text.contains("je") || text.contains("jne"));
}

#[test]
fn undefined_name_diagnosed_once_per_line() {
  let (out, result) = compile("int main() { return undefined + undefined; }");
  assert!(out.is_none());
  assert_eq!(result.errors, 1);
}

#[test]
fn distinct_undefined_names_each_get_a_diagnostic() {
  let (out, result) = compile("int main() { return first + second; }");
  assert!(out.is_none());
  assert_eq!(result.errors, 2);
}

#[test]
fn type_mismatch_is_diagnosed() {
  let (out, result) = compile(r#"int main() { int x; x = "hello"; return x; }"#);
  assert!(out.is_none());
  assert!(result.errors > 0);
}

#[test]
fn conditions_and_short_circuits() {
  let text = compile_clean(r#"
    int main () {
        int a = 1;
        int b = 0;

        if (a && !b)
            return a || b ? 1 : 2;

        return 0;
    }
  "#);
  assert!(text.contains("cmp"));
}

#[test]
fn enums_fold_to_constants() {
  let text = compile_clean(r#"
    enum color { red, green = 5, blue };

    int main () {
        return blue;
    }
  "#);
  // blue auto-increments from the explicit 5
  assert!(text.contains('6'));
}

#[test]
fn typedef_struct_idiom() {
  compile_clean(r#"
    typedef struct point {
        int x;
        int y;
    } point;

    int main () {
        point p;
        p.x = 1;
        p.y = 2;
        return p.x + p.y;
    }
  "#);
}

#[test]
fn sizeof_is_compile_time() {
  let text = compile_clean(r#"
    struct pair { int a, b; };

    int main () {
        int xs[sizeof(pair)];
        return sizeof(xs) + sizeof(int);
    }
  "#);
  // No runtime computation of sizes
  assert!(!text.contains("call"));
}

#[test]
fn string_constants_are_deduplicated() {
  let text = compile_clean(r#"
    int puts (const char* s);

    int main () {
        puts("hello");
        puts("hello");
        puts("world");
        return 0;
    }
  "#);
  assert_eq!(text.matches(".asciz \"hello\"").count(), 1);
  assert_eq!(text.matches(".asciz \"world\"").count(), 1);
  assert!(text.contains(".section .rodata"));
}

#[test]
fn static_variables_get_storage() {
  let text = compile_clean(r#"
    int counter = 42;

    int main () {
        counter = counter + 1;
        return counter;
    }
  "#);
  assert!(text.contains(".section .data"));
  assert!(text.contains("counter:"));
  assert!(text.contains(".long 42"));
}

#[test]
fn variadic_functions_compile() {
  compile_clean(r#"
    int sum (int n, ...) {
        intptr_t args;
        va_start(args, n);

        int total = 0;

        for (int i = 0; i < n; i++)
            total += va_arg(args, int);

        va_end(args);
        return total;
    }

    int main () {
        return sum(3, 1, 2, 3);
    }
  "#);
}

#[test]
fn function_pointers_call_indirect() {
  let text = compile_clean(r#"
    int twice (int x) { return x*2; }

    int main () {
        int (*f)(int) = twice;
        return f(21);
    }
  "#);
  assert!(text.contains("call"));
}

#[test]
fn break_outside_loop_is_an_error() {
  let (out, result) = compile("int main() { break; return 0; }");
  assert!(out.is_none());
  assert!(result.errors > 0);
}

#[test]
fn extern_initializer_is_an_error() {
  let (out, result) = compile("extern int x = 5;");
  assert!(out.is_none());
  assert!(result.errors > 0);
}

#[test]
fn static_initializer_must_be_constant() {
  let (_, ok) = compile("int f(); int x = f();");
  assert!(ok.errors > 0);

  let (_, also_ok) = compile("int x = 5*5;");
  assert_eq!(also_ok.errors, 0);
}

#[test]
fn incomplete_type_diagnosed_once() {
  let (out, result) = compile(r#"
    struct opaque;

    opaque a;
    opaque b;
  "#);
  assert!(out.is_none());
  // The second declaration reuses the ignore set
  assert_eq!(result.errors, 1);
}

#[test]
fn arity_mismatch_is_diagnosed() {
  let (out, result) = compile(r#"
    int f (int a, int b) { return a + b; }

    int main () { return f(1); }
  "#);
  assert!(out.is_none());
  assert!(result.errors > 0);
}

#[test]
fn assignment_to_const_is_diagnosed() {
  let (out, result) = compile(r#"
    int main () {
        const int x = 5;
        x = 6;
        return x;
    }
  "#);
  assert!(out.is_none());
  assert!(result.errors > 0);
}

#[test]
fn fallthrough_jumps_are_elided_in_trivial_fns() {
  let text = compile_clean("void nothing() { }");
  // prologue, entry and epilogue fuse or fall through; a trivial body
  // needs no jumps
  assert!(!text.contains("jmp"));
}

#[test]
fn structs_pass_by_value() {
  let text = compile_clean(r#"
    struct pair { int a, b; };

    int sum (pair p) {
        return p.a + p.b;
    }

    int main () {
        pair p;
        p.a = 1;
        p.b = 2;
        return sum(p);
    }
  "#);
  // The aggregate goes over in word chunks
  assert!(text.contains("push qword ptr"));
}

#[test]
fn division_and_modulo() {
  let text = compile_clean(r#"
    int main () {
        int a = 17;
        int b = a/5;
        int c = a%5;
        return b*10 + c;
    }
  "#);
  assert!(text.contains("idiv"));
  assert!(text.contains("cdq"));
}

#[test]
fn shifts_by_immediate_and_register() {
  let text = compile_clean(r#"
    int main () {
        int x = 1;
        int n = 3;
        x = x << 4;
        x = x >> n;
        return x;
    }
  "#);
  assert!(text.contains("sal"));
  assert!(text.contains("sar"));
}

#[test]
fn char_literals_and_comma() {
  compile_clean(r#"
    int main () {
        char c = 'a';
        char d = '\n';
        int n;
        n = (1, 2);
        return c + d + n;
    }
  "#);
}

#[test]
fn pre_and_post_increment() {
  let text = compile_clean(r#"
    int main () {
        int n = 5;
        int a = n++;
        int b = ++n;
        int c = n--;
        return a + b + c;
    }
  "#);
  assert!(text.contains("add"));
  assert!(text.contains("sub"));
}

#[test]
fn nested_compound_initializers() {
  compile_clean(r#"
    struct inner { int a, b; };
    struct outer { inner i; int c; };

    int main () {
        outer o = {{1, 2}, 3};
        int grid[2][2] = {{1, 2}, {3, 4}};
        return o.c + grid[1][0];
    }
  "#);
}

#[test]
fn anonymous_union_fields_resolve() {
  compile_clean(r#"
    struct value {
        int tag;
        union {
            int number;
            char* text;
        };
    };

    int main () {
        value v;
        v.tag = 1;
        v.number = 42;
        return v.number;
    }
  "#);
}

#[test]
fn analysis_is_idempotent() {
  use fcc::analyzer;

  let mut ctx = CompilerCtx::new(Architecture::amd64(Os::Linux), vec![]);
  let src = r#"
    int square (int x) { return x*x; }

    int global = 4;

    int main () {
        return square(global);
    }
  "#;
  let res = fcc::parser::parse_source(&mut ctx, std::path::Path::new("idem.c"),
                                      src.to_owned());
  let tree = res.tree.expect("parsed");

  let first = analyzer::analyzer(
    &mut ctx.ast, &mut ctx.syms, &ctx.arch, &ctx.builtins, tree);
  let second = analyzer::analyzer(
    &mut ctx.ast, &mut ctx.syms, &ctx.arch, &ctx.builtins, tree);
  assert_eq!(first.errors, second.errors);
  assert_eq!(first.errors, 0);
}
