//! User interaction used by the catalog and the remote session
//!
//! Library code never talks to the terminal directly; it goes through [`Interaction`] so that
//! prompts can be scripted in tests.

use anyhow::{Context, anyhow};
use std::io::{BufRead, Write};

pub trait Interaction: Sync {
    /// Show a progress/status line to the user
    fn report(&self, message: &str);

    /// Ask a yes/no question, blocking until a valid answer is given
    fn confirm(&self, question: &str) -> anyhow::Result<bool>;

    /// Ask for the username to use on `host`
    fn username(&self, host: &str) -> anyhow::Result<String>;
}

pub const CONTINUE_PROMPT: &str = "Continue? (yes/no): ";

/// [`Interaction`] backed by stdin/stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct Terminal;

impl Interaction for Terminal {
    fn report(&self, message: &str) {
        println!("{message}");
    }

    fn confirm(&self, question: &str) -> anyhow::Result<bool> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        ask_yes_no(&mut stdin.lock(), &mut stdout.lock(), question)
    }

    fn username(&self, host: &str) -> anyhow::Result<String> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        ask_line(
            &mut stdin.lock(),
            &mut stdout.lock(),
            &format!("Please enter your username for {host}: "),
        )
    }
}

/// Keep asking until the answer is one of y/yes/n/no
pub fn ask_yes_no(
    input: &mut impl BufRead,
    output: &mut impl Write,
    question: &str,
) -> anyhow::Result<bool> {
    loop {
        let answer = ask_line(input, output, question)?;
        match answer.to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(output, "Invalid input. Please enter yes/no.")
                .context("failed to write prompt")?,
        }
    }
}

fn ask_line(
    input: &mut impl BufRead,
    output: &mut impl Write,
    question: &str,
) -> anyhow::Result<String> {
    write!(output, "{question}").context("failed to write prompt")?;
    output.flush().context("failed to flush prompt")?;
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .context("failed to read answer")?;
    if read == 0 {
        return Err(anyhow!("no answer given (end of input)"));
    }
    Ok(line.trim().to_string())
}
