//! Integration tests for lowering: CFG shape, signatures and lowering errors.

use xi::arena::Arena;
use xi::error::{CompileError, LowerError};
use xi::ir::{BlockId, Function, Inst, IrType, Module};
use xi::session::{CompilationSession, CompileOptions};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn compile(source: &str) -> Result<Module, CompileError> {
    init_logging();
    let arena = Arena::new();
    let mut session = CompilationSession::new(&arena, CompileOptions::new("lower.xi"));
    session.compile_to_ir(source)
}

fn compile_ok(source: &str) -> Module {
    compile(source).unwrap_or_else(|e| panic!("failed to compile {source:?}: {e}"))
}

fn lowering_error(source: &str) -> LowerError {
    match compile(source) {
        Err(CompileError::Lowering(err)) => err,
        Err(other) => panic!("expected a lowering error for {source:?}, got {other}"),
        Ok(_) => panic!("expected a lowering error for {source:?}"),
    }
}

fn function<'m>(module: &'m Module, name: &str) -> &'m Function {
    module
        .function(name)
        .unwrap_or_else(|| panic!("no function {name}"))
}

fn block(function: &Function, name: &str) -> BlockId {
    function
        .block_by_name(name)
        .unwrap_or_else(|| panic!("no block {name} in {}", function.name))
}

/// Every block of every defined function ends in exactly one terminator.
fn assert_well_formed(module: &Module) {
    for function in module.functions.iter().filter(|f| !f.is_declaration) {
        assert!(!function.blocks.is_empty(), "{} has no blocks", function.name);
        for (index, b) in function.blocks.iter().enumerate() {
            let terminators = b
                .insts
                .iter()
                .filter(|id| function.value(**id).is_some_and(|v| v.inst.is_terminator()))
                .count();
            assert_eq!(terminators, 1, "{}:{} has {} terminators", function.name, b.name, terminators);
            assert!(
                function.terminator(BlockId(index as u32)).is_some(),
                "{}:{} does not end in a terminator",
                function.name,
                b.name
            );
        }
    }
}

#[test]
fn test_counted_loop_cfg() {
    let module = compile_ok(
        "var total: int = 0;\n\
         loop (i = 0; i < 5) : (i++) { total += i; }\n\
         total;",
    );
    assert_well_formed(&module);

    let main = function(&module, "main");
    let entry = block(main, "entry");
    let cond = block(main, "loop.cond");
    let body = block(main, "loop.body");
    let step = block(main, "loop.step");
    let after = block(main, "loop.after");

    assert_eq!(main.predecessors(cond), vec![entry, step]);
    assert_eq!(main.successors(cond), vec![body, after]);
    assert_eq!(main.successors(body), vec![step]);
    assert_eq!(main.predecessors(after), vec![cond]);
    assert!(matches!(main.terminator(after), Some(Inst::Ret { value: Some(_) })));
}

#[test]
fn test_if_elif_else_cfg() {
    let module = compile_ok(
        "fn classify(n: int) int {\n\
             if (n < 0) { return 1; } elif (n == 0) { return 2; } else { return 3; }\n\
         }",
    );
    assert_well_formed(&module);

    let classify = function(&module, "classify");
    let names: Vec<_> = classify.blocks.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "entry",
            "if.then",
            "if.else",
            "if.after",
            "if.then.1",
            "if.else.1",
            "if.after.1",
        ]
    );

    // Both inner arms return: the inner join is unreachable and only falls
    // through to the outer join.
    let inner_after = block(classify, "if.after.1");
    assert!(classify.predecessors(inner_after).is_empty());
    assert_eq!(classify.block(inner_after).map(|b| b.insts.len()), Some(1));
}

#[test]
fn test_loop_without_header_runs_until_return() {
    let module = compile_ok(
        "fn first_square_over(limit: int) int {\n\
             var n: int = 1;\n\
             loop {\n\
                 if (n * n > limit) { return n; }\n\
                 n++;\n\
             }\n\
             return 0;\n\
         }",
    );
    assert_well_formed(&module);

    let f = function(&module, "first_square_over");
    let cond = block(f, "loop.cond");
    assert!(matches!(f.terminator(cond), Some(Inst::CondBr { .. })));
}

#[test]
fn test_signatures() {
    let module = compile_ok(
        "fn flag(x: int) bool { return x > 3; }\n\
         fn letter(c: char) char { return c; }\n\
         fn half(x: float) float { return x / 2.0; }\n\
         fn nothing() nil { return; }\n\
         fn greeting() str { return \"hi\"; }",
    );
    assert_well_formed(&module);

    let flag = function(&module, "flag");
    assert_eq!((flag.params.clone(), flag.ret), (vec![IrType::I64], IrType::I1));
    assert_eq!(function(&module, "letter").ret, IrType::I8);
    assert_eq!(function(&module, "half").params, vec![IrType::F64]);
    assert_eq!(function(&module, "nothing").ret, IrType::Void);
    assert_eq!(function(&module, "greeting").ret, IrType::Ptr);
    assert!(module.function("main").is_none());
}

#[test]
fn test_runtime_declared_once_on_first_print() {
    let quiet = compile_ok("fn f() int { return 1; }");
    assert!(quiet.function("xi_write").is_none());
    assert!(quiet.function("xi_itoa").is_none());

    let module = compile_ok("println(1, 1); println(1, 2); print(2, \"x\");");
    assert_well_formed(&module);
    let declarations: Vec<_> = module
        .functions
        .iter()
        .filter(|f| f.is_declaration)
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(declarations, vec!["xi_itoa", "xi_write"]);

    // One itoa buffer per function, however many prints it has.
    let main = function(&module, "main");
    let buffers = main
        .values
        .iter()
        .filter(|v| matches!(v.inst, Inst::AllocaBytes { .. }))
        .count();
    assert_eq!(buffers, 1);
}

#[test]
fn test_module_directive_names_module() {
    let module = compile_ok("@module numbers; fn one() int { return 1; }");
    assert_eq!(module.name, "numbers");
    assert!(module.print().starts_with("; ModuleID = 'numbers'\n"));

    let unnamed = compile_ok("fn one() int { return 1; }");
    assert_eq!(unnamed.name, "lower");
}

#[test]
fn test_printed_ir() {
    let module = compile_ok("fn add(a: int, b: int) int { return a + b; }");
    let text = module.print();

    assert!(text.contains("define i64 @add(i64 %0, i64 %1) {\nentry:\n"));
    assert!(text.contains("alloca i64"));
    assert!(text.contains("add i64 "));
    assert!(text.contains("ret i64 "));
}

#[test]
fn test_lowering_errors() {
    assert_eq!(
        lowering_error("fn f() int { return y; }"),
        LowerError::UnknownVariable {
            name: "y".to_string()
        }
    );
    assert_eq!(
        lowering_error("nope(1);"),
        LowerError::UnresolvedCallee {
            name: "nope".to_string()
        }
    );
    assert_eq!(
        lowering_error("fn f(a: int) int { return a; } f(1, 2);"),
        LowerError::ArityMismatch {
            name: "f".to_string(),
            expected: 1,
            found: 2
        }
    );
    assert_eq!(
        lowering_error("var p: point = 1;"),
        LowerError::UnknownType {
            name: "point".to_string()
        }
    );
    assert!(matches!(
        lowering_error("var a: int = 1; (a + 1) = 2;"),
        LowerError::InvalidAssignTarget { .. }
    ));
    assert_eq!(
        lowering_error("fn f() int { return; }"),
        LowerError::MissingReturnValue {
            function: "f".to_string()
        }
    );
    assert_eq!(
        lowering_error("fn f() nil { return 1; }"),
        LowerError::UnexpectedReturnValue {
            function: "f".to_string()
        }
    );
    assert_eq!(
        lowering_error("fn f() int { return 1; } fn f() int { return 2; }"),
        LowerError::DuplicateFunction {
            name: "f".to_string()
        }
    );
    assert!(matches!(
        lowering_error("var s: str = \"a\"; var n: int = s;"),
        LowerError::TypeMismatch { .. }
    ));
}
