//! Spezi Compiler
//!
//! A small statically-typed struct-and-function language compiled through
//! LLVM or QBE.

mod backend;
mod driver;
mod frontend;
mod middle;
mod types;
mod utils;

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use driver::{BackendKind, CompilationOptions, CompilationOutcome, MessageFormat};

/// Spezi Compiler
#[derive(Parser, Debug)]
#[command(name = "spezic")]
#[command(version)]
#[command(about = "Spezi compiler - structs, extension methods, and overloads on LLVM or QBE")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log every compiler phase
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Diagnostic output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    message_format: MessageFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a source file to an executable
    Build {
        #[command(flatten)]
        target: Target,

        /// Optimization level passed to the native toolchain (0-3)
        #[arg(short = 'O', default_value = "0")]
        opt_level: u8,

        /// Link against a library
        #[arg(short = 'l', value_name = "LIB")]
        libraries: Vec<String>,

        /// Keep the intermediate IR file
        #[arg(long)]
        keep_ir: bool,
    },
    /// Check a source file for errors
    Check {
        /// Input source file (.spz)
        input: PathBuf,

        /// Additional import search directory
        #[arg(short = 'I', value_name = "DIR")]
        include_paths: Vec<PathBuf>,
    },
    /// Write the generated IR without invoking the toolchain
    Emit {
        #[command(flatten)]
        target: Target,
    },
    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct Target {
    /// Input source file (.spz)
    input: PathBuf,

    /// Output file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Backend to use
    #[arg(long, value_enum, default_value = "llvm")]
    backend: BackendKind,

    /// Additional import search directory
    #[arg(short = 'I', value_name = "DIR")]
    include_paths: Vec<PathBuf>,
}

impl Target {
    fn into_options(self, verbose: bool, message_format: MessageFormat) -> CompilationOptions {
        CompilationOptions {
            input: self.input,
            output: self.output,
            backend: self.backend,
            include_paths: self.include_paths,
            verbose,
            message_format,
            ..CompilationOptions::default()
        }
    }
}

fn init_logging(verbose: bool) {
    let env = env_logger::Env::default().default_filter_or("warn");
    let mut builder = env_logger::Builder::from_env(env);
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn main() {
    let Cli {
        command,
        verbose,
        message_format,
    } = Cli::parse();
    init_logging(verbose);

    let result = match command {
        Commands::Build {
            target,
            opt_level,
            libraries,
            keep_ir,
        } => driver::compile(CompilationOptions {
            opt_level,
            libraries,
            keep_ir,
            ..target.into_options(verbose, message_format)
        }),
        Commands::Emit { target } => driver::compile(CompilationOptions {
            emit_ir_only: true,
            ..target.into_options(verbose, message_format)
        }),
        Commands::Check {
            input,
            include_paths,
        } => driver::check(CompilationOptions {
            input,
            include_paths,
            verbose,
            message_format,
            ..CompilationOptions::default()
        }),
        Commands::Version => {
            println!("spezic {}", env!("CARGO_PKG_VERSION"));
            println!("Backends: llvm, qbe");
            return;
        }
    };

    match result {
        Ok(CompilationOutcome::Failed { errors }) => {
            eprintln!(
                "error: compilation failed with {} error{}",
                errors,
                if errors == 1 { "" } else { "s" }
            );
            process::exit(1);
        }
        Ok(CompilationOutcome::Checked) => println!("No errors found"),
        Ok(CompilationOutcome::Emitted(path)) => println!("Wrote {}", path.display()),
        Ok(CompilationOutcome::Built(path)) => println!("Output: {}", path.display()),
        Err(e) => {
            eprintln!("error: {:#}", e);
            process::exit(1);
        }
    }
}
