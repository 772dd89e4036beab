use std::env;
use std::fs;
use std::process::ExitCode;

use sorrel_core::error::format_error;
use sorrel_core::{eval_source, EvalOptions};

use sorrel_lang::repl;

fn help() -> ! {
    println!("Usage: sorrel [--dump-bytecode] [-e CODE] [file]");
    println!();
    println!("Options:");
    println!("  --dump-bytecode   Disassemble each compiled chunk to stderr");
    println!("  -e CODE           Evaluate CODE and exit");
    println!("  --version         Show version");
    println!("  -h, --help        Show this help");
    std::process::exit(0);
}

fn unknown_option(opt: &str) -> ! {
    eprintln!("unknown option: {}", opt);
    std::process::exit(2);
}

struct Cli {
    options: EvalOptions,
    code: Option<String>,
    file: Option<String>,
}

fn parse_args() -> Cli {
    let mut cli = Cli {
        options: EvalOptions::default(),
        code: None,
        file: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => help(),
            "--version" => {
                println!("sorrel {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--dump-bytecode" => cli.options.dump_bytecode = true,
            "-e" => match args.next() {
                Some(code) => cli.code = Some(code),
                None => {
                    eprintln!("-e requires an argument");
                    std::process::exit(2);
                }
            },
            other if other.starts_with('-') => unknown_option(other),
            other => cli.file = Some(other.to_string()),
        }
    }
    cli
}

fn eval_and_report(source: &str, options: &EvalOptions, print_result: bool) -> ExitCode {
    match eval_source(source, options) {
        Ok(value) => {
            if print_result {
                println!("{}", value);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            for line in format_error(&err) {
                eprintln!("{}", line);
            }
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = parse_args();

    if let Some(code) = &cli.code {
        return eval_and_report(code, &cli.options, true);
    }

    if let Some(path) = &cli.file {
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("cannot read {}: {}", path, err);
                return ExitCode::FAILURE;
            }
        };
        return eval_and_report(&source, &cli.options, false);
    }

    match repl::run(&cli.options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("repl error: {}", err);
            ExitCode::FAILURE
        }
    }
}
