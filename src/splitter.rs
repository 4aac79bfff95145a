//! Splits a command line into the commands of a pipeline.

use crate::config::MAX_STAGES;
use crate::error::ParseError;
use tracing::trace;

pub const DELIMITER: char = '|';
pub const QUOTE: char = '"';
pub const ESCAPE: char = '\\';

/// Split `line` at every `|` that is not inside a double-quoted run.
///
/// Each command is trimmed. A line made only of delimiters and whitespace
/// yields no commands at all; otherwise empty commands are kept in place so
/// the caller can point at them.
///
/// ```
/// use pipesh::splitter::split;
/// assert_eq!(split(r#"echo "a|b" | cat"#).unwrap(), vec![r#"echo "a|b""#, "cat"]);
/// ```
pub fn split(line: &str) -> Result<Vec<String>, ParseError> {
    split_with_limit(line, MAX_STAGES)
}

pub fn split_with_limit(line: &str, max_stages: usize) -> Result<Vec<String>, ParseError> {
    let mut stages = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    let mut prev = None;

    for (pos, c) in line.char_indices() {
        match c {
            QUOTE if prev != Some(ESCAPE) => in_quotes = !in_quotes,
            DELIMITER if !in_quotes => {
                stages.push(line[start..pos].trim().to_string());
                start = pos + c.len_utf8();
            }
            _ => (),
        }
        prev = Some(c);
    }

    if in_quotes {
        return Err(ParseError::UnclosedQuote {
            text: line.trim().to_string(),
        });
    }
    stages.push(line[start..].trim().to_string());

    if stages.iter().all(|s| s.is_empty()) {
        return Ok(Vec::new());
    }
    if stages.len() > max_stages {
        return Err(ParseError::TooManyStages { max: max_stages });
    }

    trace!(count = stages.len(), "split line into commands");
    Ok(stages)
}
