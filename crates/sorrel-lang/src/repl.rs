use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use sorrel_core::error::format_error;
use sorrel_core::{eval_source_in, EvalOptions, Registry};

const PROMPT: &str = "=> ";

/// Line loop: read, compile, run in a fresh frame against the shared
/// namespace, print the result or the error chain, until EOF.
pub fn run(options: &EvalOptions) -> Result<(), ReadlineError> {
    let registry = Registry::global();
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                match eval_source_in(&line, options, &registry) {
                    Ok(value) => println!("{}", value),
                    Err(err) => {
                        for out in format_error(&err) {
                            eprintln!("{}", out);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}
