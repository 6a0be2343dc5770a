//! End-to-end tests: source text through the session, then the interpreter
//! or the evaluator.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use xi::arena::{Arena, ArenaConfig, ArenaError};
use xi::diagnostics::DiagnosticKind;
use xi::error::CompileError;
use xi::eval::evaluate;
use xi::parser::MAX_NESTING_DEPTH;
use xi::ir::{InterpError, Interpreter, Module, RtValue, WriteRecord};
use xi::session::{CompilationSession, CompileOptions};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn compile(source: &str) -> Module {
    init_logging();
    let arena = Arena::new();
    let mut session = CompilationSession::new(&arena, CompileOptions::new("e2e.xi"));
    match session.compile_to_ir(source) {
        Ok(module) => module,
        Err(err) => panic!(
            "failed to compile: {err}\n{}",
            session.diagnostics().render_all()
        ),
    }
}

/// Run `main` and return its value with everything written to stdout.
fn run_main(source: &str) -> (i64, String) {
    let module = compile(source);
    let mut interp = Interpreter::new(&module);
    let value = interp
        .call_int("main", &[])
        .unwrap_or_else(|e| panic!("main trapped: {e}\n{module}"));
    (value, String::from_utf8_lossy(&interp.output(1)).into_owned())
}

#[test]
fn test_arithmetic_program_agrees_with_evaluator() {
    init_logging();
    let source = "5 * 3 * (3 + 5) / 5";

    let arena = Arena::new();
    let mut session = CompilationSession::new(&arena, CompileOptions::new("calc.xi"));
    let program = session.front_end(source).unwrap();
    assert_eq!(evaluate(&program).unwrap(), 24.0);

    let module = session.lower_to_ir(&program).unwrap();
    assert_eq!(Interpreter::new(&module).call_int("main", &[]).unwrap(), 24);
}

#[test]
fn test_function_call() {
    let module = compile("fn add(a: int, b: int) int { return a + b; }");
    let mut interp = Interpreter::new(&module);
    assert_eq!(interp.call_int("add", &[2, 3]).unwrap(), 5);
    assert_eq!(interp.call_int("add", &[-7, 3]).unwrap(), -4);
}

#[test]
fn test_println_writes() {
    let module = compile("println(1, \"hi\", 2);");
    let mut interp = Interpreter::new(&module);
    interp.call_int("main", &[]).unwrap();

    let writes: Vec<&[u8]> = interp.writes().iter().map(|w| w.bytes.as_slice()).collect();
    assert_eq!(writes, vec![&b"hi"[..], &b" "[..], &b"2"[..], &b"\n"[..]]);
    assert!(interp.writes().iter().all(|w| w.fd == 1));
}

#[test]
fn test_recursion_and_const_functions() {
    let source = "\
const fib := fn(n: int) int {
    if (n < 2) { return n; }
    return fib(n - 1) + fib(n - 2);
};
fib(10);
";
    assert_eq!(run_main(source).0, 55);
}

#[test]
fn test_counted_loop_output() {
    let source = "\
var sum: int = 0;
loop (i = 1; i <= 4) : (i++) {
    print(1, i);
    sum += i;
}
println(1, \"\");
println(1, \"sum\", sum);
sum;
";
    let (value, stdout) = run_main(source);
    assert_eq!(value, 10);
    assert_eq!(stdout, "1234\nsum 10\n");
}

#[test]
fn test_while_style_loop_and_branches() {
    let source = "\
fn collatz(n: int) int {
    var steps: int = 0;
    loop (n != 1) {
        if (n % 2 == 0) { n /= 2; } else { n = 3 * n + 1; }
        ++steps;
    }
    return steps;
}
";
    let module = compile(source);
    let mut interp = Interpreter::new(&module);
    assert_eq!(interp.call_int("collatz", &[1]).unwrap(), 0);
    assert_eq!(interp.call_int("collatz", &[6]).unwrap(), 8);
    assert_eq!(interp.call_int("collatz", &[27]).unwrap(), 111);
}

#[test]
fn test_stderr_and_negative_numbers() {
    let module = compile("println(2, -42); print(1, 0);");
    let mut interp = Interpreter::new(&module);
    interp.call_int("main", &[]).unwrap();

    assert_eq!(interp.output(2), b"-42\n".to_vec());
    assert_eq!(interp.output(1), b"0".to_vec());
}

#[test]
fn test_float_function() {
    let module = compile("fn half(x: float) float { return x / 2.0; }");
    let mut interp = Interpreter::new(&module);
    assert_eq!(interp.run("half", &[7]).unwrap(), RtValue::Float(3.5));
}

#[test]
fn test_division_by_zero_keeps_earlier_output() {
    let module = compile("var z: int = 0;\nprintln(1, \"before\");\n10 / z;");
    let mut interp = Interpreter::new(&module);

    assert!(matches!(
        interp.call_int("main", &[]),
        Err(InterpError::DivisionByZero { .. })
    ));
    assert_eq!(
        interp.take_writes(),
        vec![
            WriteRecord {
                fd: 1,
                bytes: b"before".to_vec()
            },
            WriteRecord {
                fd: 1,
                bytes: b"\n".to_vec()
            },
        ]
    );
    assert!(interp.writes().is_empty());
}

#[test]
fn test_arena_limit_fails_the_unit() {
    init_logging();
    let options = CompileOptions {
        source_path: "big.xi".to_string(),
        arena: ArenaConfig {
            chunk_capacity: 1024,
            allocation_limit: Some(128),
        },
    };
    let arena = Arena::with_config(options.arena);
    let mut session = CompilationSession::new(&arena, options);
    let err = session
        .compile_to_ir("var a: int = 1 + 2 + 3 + 4 + 5 + 6 + 7 + 8 + 9 + 10;")
        .unwrap_err();

    assert!(matches!(err, CompileError::Arena(_)));
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn test_diagnostics_gate_and_render() {
    init_logging();
    let arena = Arena::new();
    let mut session = CompilationSession::new(&arena, CompileOptions::new("bad.xi"));
    let err = session
        .compile_to_ir("var a: int = 1\nprintln(1, a)\n")
        .unwrap_err();

    assert!(matches!(err, CompileError::Parse { count: 2 }));
    assert_eq!(err.exit_code(), 3);
    let diagnostics = session.diagnostics();
    assert_eq!(diagnostics.count_of(DiagnosticKind::Parser), 2);

    let first = &diagnostics.entries()[0].rendered;
    assert!(first.contains("  --> [1::15](bad.xi)\n"));
    assert!(first.contains(" 01| var a: int = 1\n"));
}

#[test]
fn test_session_stats() {
    init_logging();
    let arena = Arena::new();
    let mut session = CompilationSession::new(&arena, CompileOptions::new("stats.xi"));
    session
        .compile_to_ir("fn sq(x: int) int { return x * x; } sq(3);")
        .unwrap();

    let stats = session.stats();
    assert_eq!(stats.functions_lowered, 2);
    assert_eq!(stats.statements, 2);
    assert!(stats.blocks >= 2);
    assert!(stats.tokens > 10);
    assert_eq!(stats.instruction_counts.get("call"), Some(&1));

    let text = stats.to_string();
    assert!(text.starts_with("Compilation Session Statistics:\n"));
    assert!(text.contains("  Functions lowered: 2\n"));
}

#[test]
fn test_backing_exhaustion_fails_only_that_unit() {
    init_logging();
    let body: String = (0..400)
        .map(|i| format!("var v{i}: int = {i} * 2 + 1;\n"))
        .collect();

    let starved = Arena::with_config(ArenaConfig {
        chunk_capacity: 256,
        allocation_limit: None,
    });
    starved.set_backing_limit(Some(starved.allocated_bytes()));
    let err = {
        let mut session = CompilationSession::new(&starved, CompileOptions::new("starved.xi"));
        session.compile_to_ir(&body).unwrap_err()
    };
    assert!(matches!(
        err,
        CompileError::Arena(ArenaError::OutOfMemory { .. })
    ));
    assert_eq!(err.exit_code(), 5);

    // The next unit, and the same arena once rewound, compile normally.
    let module = compile(&format!("{body}v399;"));
    assert_eq!(Interpreter::new(&module).call_int("main", &[]).unwrap(), 799);

    let mut starved = starved;
    starved.reset();
    starved.set_backing_limit(None);
    let mut session = CompilationSession::new(&starved, CompileOptions::new("again.xi"));
    let module = session.compile_to_ir(&format!("{body}v7;")).unwrap();
    assert_eq!(Interpreter::new(&module).call_int("main", &[]).unwrap(), 15);
}

#[test]
fn test_deep_nesting_fails_the_unit_cleanly() {
    init_logging();
    let depth = 20 * MAX_NESTING_DEPTH;
    let source = format!("{}1{};", "(".repeat(depth), ")".repeat(depth));

    let arena = Arena::new();
    let mut session = CompilationSession::new(&arena, CompileOptions::new("deep.xi"));
    let err = session.compile_to_ir(&source).unwrap_err();
    assert!(matches!(err, CompileError::Parse { count: 1 }));

    let shallow = 32;
    let source = format!("{}20 + 22{};", "(".repeat(shallow), ")".repeat(shallow));
    assert_eq!(run_main(&source).0, 42);
}

#[test]
fn test_many_branches_in_one_function() {
    let count = 3000;
    let mut source = String::from("var n: int = 0;\n");
    for _ in 0..count {
        source.push_str("if (n < 100000) { n += 1; }\n");
    }
    source.push_str("n;");

    let started = Instant::now();
    let module = compile(&source);
    assert!(started.elapsed() < Duration::from_secs(30));

    let main = module.function("main").unwrap();
    assert!(main.blocks.len() > 2 * count);
    let names: HashSet<&str> = main.blocks.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names.len(), main.blocks.len());

    assert_eq!(Interpreter::new(&module).call_int("main", &[]).unwrap(), count as i64);
}

