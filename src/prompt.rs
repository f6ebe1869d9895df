use std::io::{self, BufRead, Write};

/// Asks a yes/no question. Accepts English and Russian affirmatives.
pub fn confirm<R: BufRead, W: Write>(question: &str, input: &mut R, output: &mut W) -> io::Result<bool> {
    write!(output, "{} (y/n): ", question)?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "да" | "д"
    ))
}
