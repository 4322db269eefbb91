// crustcc: C subset to x86-64 assembly compiler

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser as CliParser;
use tracing_subscriber::EnvFilter;

use crustcc::codegen;

/// Command-line interface
#[derive(CliParser, Debug)]
#[command(name = "crustcc", version, about = "Compile a C subset to x86-64 assembly")]
struct Cli {
    /// C source file to compile
    input: PathBuf,

    /// Write assembly to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the resolved AST to stderr before generating code
    #[arg(long)]
    dump_ast: bool,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", cli.input.display(), e);
            process::exit(1);
        }
    };

    tracing::info!(input = %cli.input.display(), bytes = source.len(), "compiling");

    let assembly = crustcc::analyze(&source).and_then(|program| {
        if cli.dump_ast {
            eprintln!("{:#?}", program);
        }
        codegen::generate(&program)
    });

    let assembly = match assembly {
        Ok(assembly) => assembly,
        Err(e) => {
            eprintln!("{}", e.render(&source));
            process::exit(1);
        }
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = fs::write(path, assembly) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
        }
        None => print!("{}", assembly),
    }
}
