use std::io::{BufRead, Write};

use anyhow::{Context, Result, bail};

/// Fills in a missing comparison argument by asking on the terminal. Values
/// already given on the command line are returned untouched.
pub fn value_or_prompt<R, W>(
    given: Option<&str>,
    question: &str,
    flag: &str,
    interactive: bool,
    input: &mut R,
    output: &mut W,
) -> Result<String>
where
    R: BufRead,
    W: Write,
{
    if let Some(value) = given.map(str::trim).filter(|value| !value.is_empty()) {
        return Ok(value.to_owned());
    }
    if !interactive {
        bail!("{flag} is required when stdin is not a terminal");
    }

    write!(output, "{question}: ").context("failed to write prompt")?;
    output.flush().context("failed to flush prompt")?;

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("failed to read answer from stdin")?;
    let answer = line.trim();
    if answer.is_empty() {
        bail!("{flag} must not be empty");
    }
    Ok(answer.to_owned())
}
