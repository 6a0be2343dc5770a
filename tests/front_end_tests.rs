//! Integration tests for the tokenizer, the parser and the AST arena.

use xi::arena::{Arena, ArenaConfig, ArenaError};
use xi::ast::{Expr, NodeKind, Param, Stmt};
use xi::diagnostics::{DiagnosticKind, Diagnostics};
use xi::lexer::{tokenize, TokenKind};
use xi::parser::{parse, parse_expression, MAX_NESTING_DEPTH};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Parse `source`, returning the printed tree and the diagnostics.
fn parse_source(source: &str) -> (String, Diagnostics) {
    init_logging();
    let arena = Arena::new();
    let mut diagnostics = Diagnostics::new();
    let tokens = tokenize(source, "front.xi", &mut diagnostics);
    let program = parse(&tokens, &arena, "front.xi", &mut diagnostics)
        .unwrap_or_else(|e| panic!("arena failure parsing {source:?}: {e}"));
    (program.to_string(), diagnostics)
}

fn expr_tree(source: &str) -> String {
    let arena = Arena::new();
    let mut diagnostics = Diagnostics::new();
    let tokens = tokenize(source, "front.xi", &mut diagnostics);
    let expr = parse_expression(&tokens, &arena, "front.xi", &mut diagnostics).unwrap();
    assert!(diagnostics.is_empty(), "unexpected diagnostics for {source:?}");
    expr.to_string()
}

#[test]
fn test_token_stream_for_function() {
    init_logging();
    let mut diagnostics = Diagnostics::new();
    let tokens = tokenize("fn add(a: int) int { return a + 1; }", "t.xi", &mut diagnostics);
    let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();

    assert_eq!(
        kinds,
        vec![
            TokenKind::Fn,
            TokenKind::Identifier,
            TokenKind::LParen,
            TokenKind::Identifier,
            TokenKind::Colon,
            TokenKind::Int,
            TokenKind::RParen,
            TokenKind::Int,
            TokenKind::LBrace,
            TokenKind::Return,
            TokenKind::Identifier,
            TokenKind::Plus,
            TokenKind::Number,
            TokenKind::Semicolon,
            TokenKind::RBrace,
            TokenKind::Eof,
        ]
    );
    assert!(diagnostics.is_empty());
}

#[test]
fn test_two_character_operators_win() {
    let mut diagnostics = Diagnostics::new();
    let tokens = tokenize("a += b == c := d-- <= e && f", "t.xi", &mut diagnostics);
    let operators: Vec<_> = tokens
        .iter()
        .filter(|t| t.kind != TokenKind::Identifier && t.kind != TokenKind::Eof)
        .map(|t| t.kind)
        .collect();

    assert_eq!(
        operators,
        vec![
            TokenKind::PlusEquals,
            TokenKind::EqualEqual,
            TokenKind::Walrus,
            TokenKind::Decrement,
            TokenKind::LessEqual,
            TokenKind::AndAnd,
        ]
    );
}

#[test]
fn test_lexical_diagnostic_layout() {
    let mut diagnostics = Diagnostics::new();
    tokenize("var x: int = 1;\nvar y: int = 2 $ 3;", "layout.xi", &mut diagnostics);

    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics.entries()[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::Lexical);
    assert_eq!((diagnostic.line, diagnostic.column), (2, 16));
    assert!(diagnostic.rendered.starts_with("error: Lexical\n"));
    assert!(diagnostic.rendered.contains("var y: int = 2 $ 3;"));
    assert!(diagnostic.rendered.contains("Token not found '$'"));
}

#[test]
fn test_precedence_trees() {
    init_logging();
    assert_eq!(expr_tree("5 * 3 * (3 + 5) / 5"), "(/ (* (* 5 3) (group (+ 3 5))) 5)");
    assert_eq!(expr_tree("a + b * c - d"), "(- (+ a (* b c)) d)");
    assert_eq!(expr_tree("x = y += 1"), "(= x (+= y 1))");
    assert_eq!(expr_tree("!a == b"), "(== (! a) b)");
    assert_eq!(expr_tree("a > 1 && b <= 2 || c"), "(|| (&& (> a 1) (<= b 2)) c)");
    assert_eq!(expr_tree("f(x)++"), "(post++ (call f x))");
    assert_eq!(expr_tree("-f(1) % 3"), "(% (- (call f 1)) 3)");
}

#[test]
fn test_program_tree() {
    let source = "\
@module demo;
fn fact(n: int) int {
    if (n <= 1) { return 1; }
    return n * fact(n - 1);
}
var total: int = fact(5);
println(1, \"total\", total);
";
    let (tree, diagnostics) = parse_source(source);
    assert!(diagnostics.is_empty(), "{}", diagnostics.render_all());
    assert_eq!(
        tree,
        "program\n\
         \x20 module demo\n\
         \x20 fn fact(n: int) int\n\
         \x20   block\n\
         \x20     if (group (<= n 1))\n\
         \x20       block\n\
         \x20         return 1\n\
         \x20     return (* n (call fact (- n 1)))\n\
         \x20 var total: int = (call fact 5)\n\
         \x20 println fd=1 \"total\" total\n"
    );
}

#[test]
fn test_missing_semicolons_each_reported_once() {
    let (_, diagnostics) = parse_source("var a: int = 1\nvar b: int = 2\nvar c: int = 3;");

    assert_eq!(diagnostics.len(), 2);
    assert_eq!(diagnostics.count_of(DiagnosticKind::Parser), 2);
    let lines: Vec<_> = diagnostics.iter().map(|d| d.line).collect();
    assert_eq!(lines, vec![1, 2]);
    for diagnostic in diagnostics.iter() {
        assert!(diagnostic.message.contains("Expected ';'"));
    }
}

#[test]
fn test_recovery_keeps_later_statements() {
    init_logging();
    let arena = Arena::new();
    let mut diagnostics = Diagnostics::new();
    let tokens = tokenize("var a: int = ;\nvar b: int = 2;", "t.xi", &mut diagnostics);
    let program = parse(&tokens, &arena, "t.xi", &mut diagnostics).unwrap();

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(program.statements.len(), 2);
    match program.statements[0] {
        Stmt::Var { name, init, .. } => {
            assert_eq!(*name, "a");
            assert_eq!(init.map(|e| e.kind()), Some(NodeKind::Invalid));
        }
        other => panic!("expected a var, found {}", other.kind()),
    }
    assert!(matches!(program.statements[1], Stmt::Var { name: "b", .. }));
}

#[test]
fn test_parse_never_loops_on_garbage() {
    let inputs = [
        ")))",
        "fn (",
        "loop (",
        "if { else",
        "const x := 3;",
        "var : = ;;;",
        "print(",
        "{ { {",
    ];
    for input in inputs {
        let (_, diagnostics) = parse_source(input);
        assert!(!diagnostics.is_empty(), "no diagnostics for {input:?}");
    }
}

#[test]
fn test_arena_limit_aborts_parse() {
    init_logging();
    let arena = Arena::with_config(ArenaConfig {
        chunk_capacity: 256,
        allocation_limit: Some(64),
    });
    let mut diagnostics = Diagnostics::new();
    let tokens = tokenize("1 + 2 + 3 + 4 + 5 + 6 + 7 + 8;", "t.xi", &mut diagnostics);
    let err = parse(&tokens, &arena, "t.xi", &mut diagnostics).unwrap_err();

    assert!(matches!(err, ArenaError::Exhausted { limit: 64, .. }));
    assert!(arena.stats().bytes_requested <= 64);
}

#[test]
fn test_arena_references_stay_valid() {
    let arena = Arena::with_config(ArenaConfig {
        chunk_capacity: 64,
        allocation_limit: None,
    });

    let first: &Expr<'_> = arena.alloc(Expr::Number("42")).unwrap();
    let address = first as *const Expr<'_>;
    let name = arena.alloc_str("counter").unwrap();

    // Enough requests to spill into new chunks of both chains.
    for i in 0..500 {
        arena.alloc(Expr::Identifier("filler")).unwrap();
        arena.alloc_slice(&[i; 40]).unwrap();
    }

    assert_eq!(first as *const Expr<'_>, address);
    assert_eq!(*first, Expr::Number("42"));
    assert_eq!(name, "counter");
    assert!(arena.stats().oversized_allocations >= 500);
}

#[test]
fn test_long_parameter_list_respects_limit() {
    init_logging();
    let params: Vec<String> = (0..300).map(|i| format!("p{i}: int")).collect();
    let source = format!("fn wide({}) int {{ return 0; }}", params.join(", "));
    let mut diagnostics = Diagnostics::new();
    let tokens = tokenize(&source, "wide.xi", &mut diagnostics);

    let unlimited = Arena::new();
    parse(&tokens, &unlimited, "wide.xi", &mut diagnostics).unwrap();
    assert!(diagnostics.is_empty());
    // Growth to 4, 8, ... 512 parameters is charged, not just the final 300.
    let needed = unlimited.stats().bytes_requested;
    assert!(needed >= 1020 * std::mem::size_of::<Param<'_>>());

    let limit = needed - 1;
    let arena = Arena::with_config(ArenaConfig {
        chunk_capacity: 4096,
        allocation_limit: Some(limit),
    });
    let err = parse(&tokens, &arena, "wide.xi", &mut diagnostics).unwrap_err();
    assert!(matches!(err, ArenaError::Exhausted { .. }));
    assert!(arena.stats().bytes_requested <= limit);
}

#[test]
fn test_deep_nesting_is_a_diagnostic() {
    let depth = 10 * MAX_NESTING_DEPTH;
    let source = format!(
        "var x: int = {}1{};\nprintln(1, x);",
        "(".repeat(depth),
        ")".repeat(depth)
    );
    let (tree, diagnostics) = parse_source(&source);

    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics.entries()[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::Parser);
    assert_eq!(diagnostic.line, 1);
    assert!(diagnostic.message.contains("nested too deeply"));
    assert!(tree.ends_with("  println fd=1 x\n"));
}

