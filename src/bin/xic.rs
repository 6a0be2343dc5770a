// xic is the command-line driver for the xi compiler. It reads one source file, runs the
// session phases, and prints what --emit asks for: the token stream, the AST tree, or the
// IR module (LLVM IR too when built with the `llvm` feature). --eval prints the
// double-precision value of an arithmetic program, and --run interprets `main`, forwarding
// its recorded writes to stdout or stderr and exiting with its return value. Diagnostics
// are printed once at the end, and a failed compile exits with the status of its phase.

//! Command-line driver for the xi compiler.

use clap::{ArgAction, Parser, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use xi::arena::{Arena, ArenaConfig, DEFAULT_CHUNK_CAPACITY};
use xi::codegen::ENTRY_FUNCTION;
use xi::diagnostics::DiagnosticKind;
use xi::error::{CompileError, CompileResult};
use xi::eval::evaluate;
use xi::ir::{InterpConfig, Interpreter};
use xi::session::{CompilationSession, CompileOptions};

#[derive(Parser, Debug)]
#[command(name = "xic", about = "Compile xi source into IR", version)]
struct Cli {
    /// Source file to compile
    input: PathBuf,

    /// What to print after the front end
    #[arg(long, value_enum, default_value_t = Emit::None)]
    emit: Emit,

    /// Print the value of an arithmetic program
    #[arg(long)]
    eval: bool,

    /// Interpret `main` and exit with its result
    #[arg(long)]
    run: bool,

    /// Print session statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Arena chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_CAPACITY)]
    arena_chunk: usize,

    /// Upper bound on arena bytes
    #[arg(long)]
    arena_limit: Option<usize>,

    /// Instruction budget for --run
    #[arg(long)]
    max_steps: Option<u64>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Emit {
    Tokens,
    Ast,
    Ir,
    #[cfg(feature = "llvm")]
    Llvm,
    None,
}

fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(log::LevelFilter::Info);
        }
        2 => {
            builder.filter_level(log::LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
        }
    }
    builder.init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err);
            err.exit_code()
        }
    };
    process::exit(code);
}

fn run(cli: &Cli) -> CompileResult<i32> {
    let source = fs::read_to_string(&cli.input)?;
    let options = CompileOptions {
        source_path: cli.input.display().to_string(),
        arena: ArenaConfig {
            chunk_capacity: cli.arena_chunk,
            allocation_limit: cli.arena_limit,
        },
    };

    let arena = Arena::with_config(options.arena);
    let mut session = CompilationSession::new(&arena, options);
    let result = compile(cli, &mut session, &source);

    session.diagnostics_mut().has_errors();
    if cli.stats {
        eprint!("{}", session.stats());
    }
    result
}

fn compile(cli: &Cli, session: &mut CompilationSession<'_>, source: &str) -> CompileResult<i32> {
    if cli.emit == Emit::Tokens {
        for token in session.tokenize(source) {
            println!("{}", token);
        }
        let count = session.diagnostics().count_of(DiagnosticKind::Lexical);
        return match count {
            0 => Ok(0),
            count => Err(CompileError::Lexical { count }),
        };
    }

    let program = session.front_end(source)?;
    if cli.emit == Emit::Ast {
        print!("{}", program);
    }
    if cli.eval {
        println!("{}", evaluate(&program)?);
    }

    #[cfg(feature = "llvm")]
    {
        if cli.emit == Emit::Llvm {
            let context = inkwell::context::Context::create();
            let name = xi::session::module_name(session.path());
            let mut builder = xi::llvm::LlvmBuilder::new(&context, &name);
            session.lower(&program, &mut builder)?;
            print!("{}", builder.print());
            return Ok(0);
        }
    }

    if cli.eval && !cli.run && cli.emit != Emit::Ir {
        return Ok(0);
    }

    let module = session.lower_to_ir(&program)?;
    if cli.emit == Emit::Ir {
        print!("{}", module);
    }
    if !cli.run {
        return Ok(0);
    }

    let mut config = InterpConfig::default();
    if let Some(max_steps) = cli.max_steps {
        config.max_steps = max_steps;
    }
    let mut interpreter = Interpreter::with_config(&module, config);
    let result = interpreter.call_int(ENTRY_FUNCTION, &[]);

    // Output produced before a trap is still forwarded.
    let (mut stdout, mut stderr) = (io::stdout().lock(), io::stderr().lock());
    for write in interpreter.writes() {
        match write.fd {
            2 => stderr.write_all(&write.bytes)?,
            _ => stdout.write_all(&write.bytes)?,
        }
    }
    stdout.flush()?;

    Ok(result? as i32)
}
