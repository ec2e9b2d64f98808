use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{
    diagnostics::{CheckerError, Result},
    runtime::Interpreter,
};

const PROMPT: &str = "> ";
const CONTINUATION_PROMPT: &str = "| ";

pub struct Repl {
    interpreter: Interpreter,
}

impl Repl {
    pub fn new() -> Self {
        Self::with_interpreter(Interpreter::new())
    }

    pub fn with_interpreter(interpreter: Interpreter) -> Self {
        Self { interpreter }
    }

    /// Reads statements until `:quit` or end of input. Input that ends
    /// mid-statement keeps collecting lines under a continuation prompt.
    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        let mut pending = String::new();
        loop {
            let prompt = if pending.is_empty() {
                PROMPT
            } else {
                CONTINUATION_PROMPT
            };
            match editor.readline(prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if pending.is_empty() {
                        if trimmed == ":quit" || trimmed == ":exit" {
                            break;
                        }
                        if trimmed.is_empty() {
                            continue;
                        }
                    }
                    pending.push_str(&line);
                    pending.push('\n');
                    match self.interpreter.eval_source(&pending) {
                        Err(err) if err.is_incomplete() => continue,
                        outcome => {
                            editor.add_history_entry(pending.trim_end()).ok();
                            pending.clear();
                            match outcome {
                                Ok(value) => println!("{value}"),
                                Err(err) => eprintln!("{err}"),
                            }
                        }
                    }
                }
                Err(ReadlineError::Interrupted) if !pending.is_empty() => pending.clear(),
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}

fn readline_error(err: ReadlineError) -> CheckerError {
    CheckerError::from(std::io::Error::new(std::io::ErrorKind::Other, err))
}
