#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use querydiff::cli::app::{Cli, Command, RuntimeArgs};
use querydiff::cli::commands;
use querydiff::config::RuntimePaths;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_USAGE_ERROR: i32 = 64;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    let command_name = command_name(&cli.command);
    println!("querydiff: starting `{command_name}`");

    match execute(cli) {
        Ok(()) => {
            println!("querydiff: completed `{command_name}` (exit_code={EXIT_SUCCESS})");
            EXIT_SUCCESS
        }
        Err(error) => {
            eprintln!("querydiff: failed `{command_name}` (exit_code={EXIT_RUNTIME_FAILURE})");
            eprintln!("{error:#}");
            EXIT_RUNTIME_FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Check(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::check::run(&args, &runtime_paths)
        }
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Check(_) => "check",
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    querydiff::config::resolve_runtime_paths(&cwd, args.out_dir.as_deref())
}
