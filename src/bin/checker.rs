use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};

use checker::{
    diagnostics::{Result, SourcePos},
    environment::{module_not_found, Environment, ModuleResolver},
    CheckerError, ExecutionContext, Interpreter, Repl,
};

#[derive(Parser)]
#[command(author, version, about = "Checker language interpreter")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a Checker script file
    Run {
        script: PathBuf,
        /// Extra directories searched for required modules
        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,
    },
    /// Start an interactive REPL session
    Repl {
        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,
    },
    /// Evaluate a snippet of Checker code and print its value
    Eval { source: String },
    /// Report free variables of a script that nothing defines
    Check { script: PathBuf },
}

/// Resolves module file names against a list of directories, in order.
struct FileResolver {
    dirs: Vec<PathBuf>,
}

impl ModuleResolver for FileResolver {
    fn resolve(&self, file_name: &str, pos: &SourcePos) -> Result<String> {
        for dir in &self.dirs {
            let candidate = dir.join(file_name);
            if candidate.is_file() {
                return Ok(fs::read_to_string(candidate)?);
            }
        }
        Err(module_not_found(file_name, pos))
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Only initialize if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Repl {
        include: Vec::new(),
    });
    match execute(command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command) -> std::result::Result<ExitCode, CheckerError> {
    match command {
        Command::Run { script, include } => {
            run_script(&script, include)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Repl { include } => {
            let mut dirs = vec![PathBuf::from(".")];
            dirs.extend(include);
            let interpreter =
                Interpreter::with_resolver(FileResolver { dirs }, ExecutionContext::default());
            Repl::with_interpreter(interpreter).run()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Eval { source } => {
            let mut interpreter = Interpreter::new();
            let value = interpreter.eval_source(&source)?;
            println!("{value}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { script } => check_script(&script),
    }
}

fn script_context(path: &Path) -> ExecutionContext {
    ExecutionContext {
        filename: path.to_string_lossy().into_owned(),
    }
}

fn run_script(path: &Path, include: Vec<PathBuf>) -> Result<()> {
    let source = fs::read_to_string(path)?;
    let script_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut dirs = vec![script_dir];
    dirs.extend(include);
    let mut interpreter = Interpreter::with_resolver(FileResolver { dirs }, script_context(path));
    interpreter.eval_source(&source)?;
    Ok(())
}

fn check_script(path: &Path) -> std::result::Result<ExitCode, CheckerError> {
    let source = fs::read_to_string(path)?;
    let interpreter = Interpreter::with_context(script_context(path));
    let node = interpreter.parse(&source)?;
    let base = interpreter.base_environment();
    let undefined: Vec<String> = node
        .free_vars()
        .into_iter()
        .filter(|name| !Environment::is_defined(&base, name))
        .collect();
    if undefined.is_empty() {
        println!("{}: ok", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    for name in &undefined {
        println!("{}: undefined symbol `{name}`", path.display());
    }
    Ok(ExitCode::FAILURE)
}
