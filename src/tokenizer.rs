//! Splits one command into its argument vector.

use crate::config::MAX_ARGS;
use crate::error::ParseError;
use crate::splitter::{ESCAPE, QUOTE};
use std::ffi::CString;
use std::iter::Peekable;
use std::str::Chars;

pub type Token = String;

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// Tokenize `stage` with the default argument limit.
///
/// Blanks outside quotes separate tokens. A double-quoted run is one token,
/// kept verbatim without its quotes, and may be empty. `\"` stands for a
/// literal quote both inside and outside a quoted run.
pub fn tokenize(stage: &str) -> Result<Vec<Token>, ParseError> {
    tokenize_with_limit(stage, MAX_ARGS)
}

pub fn tokenize_with_limit(stage: &str, max_args: usize) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = stage.chars().peekable();
    let mut word: Option<String> = None;

    let push = |tokens: &mut Vec<Token>, token: Token| {
        if tokens.len() == max_args {
            return Err(ParseError::TooManyArgs {
                text: stage.to_string(),
                max: max_args,
            });
        }
        tokens.push(token);
        Ok(())
    };

    while let Some(c) = chars.next() {
        if is_blank(c) {
            if let Some(w) = word.take() {
                push(&mut tokens, w)?;
            }
        } else if c == QUOTE {
            if let Some(w) = word.take() {
                push(&mut tokens, w)?;
            }
            let quoted = quoted_run(&mut chars).ok_or_else(|| ParseError::UnclosedQuote {
                text: stage.to_string(),
            })?;
            push(&mut tokens, quoted)?;
        } else if c == ESCAPE && chars.peek() == Some(&QUOTE) {
            chars.next();
            word.get_or_insert_with(String::new).push(QUOTE);
        } else {
            word.get_or_insert_with(String::new).push(c);
        }
    }

    if let Some(w) = word {
        push(&mut tokens, w)?;
    }
    Ok(tokens)
}

/// Consume up to the closing quote. `None` if the run is never closed.
fn quoted_run(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut run = String::new();
    while let Some(c) = chars.next() {
        match c {
            QUOTE => return Some(run),
            ESCAPE if chars.peek() == Some(&QUOTE) => {
                chars.next();
                run.push(QUOTE);
            }
            _ => run.push(c),
        }
    }
    None
}

/// One parsed command of a pipeline, ready for image replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub index: usize,
    /// The command text as it appeared in the line, trimmed.
    pub text: String,
    pub args: Vec<Token>,
    argv: Vec<CString>,
}

impl Stage {
    /// Tokenize `text` into a launchable stage.
    ///
    /// Fails on an empty command and on tokens that cannot be passed to the
    /// OS because they contain a nul byte.
    pub fn parse(index: usize, text: &str, max_args: usize) -> Result<Self, ParseError> {
        let args = tokenize_with_limit(text, max_args)?;
        if args.is_empty() {
            return Err(ParseError::EmptyStage { index });
        }

        let argv = args
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseError::InteriorNul {
                text: text.to_string(),
            })?;

        Ok(Stage {
            index,
            text: text.to_string(),
            args,
            argv,
        })
    }

    pub fn program(&self) -> &str {
        &self.args[0]
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn is_terminator(&self, keyword: &str) -> bool {
        self.program() == keyword
    }

    /// Status requested by `exit [N]`. `Ok(None)` means "keep the last status".
    pub fn exit_status(&self) -> Result<Option<i32>, ParseError> {
        match self.args.get(1) {
            None => Ok(None),
            Some(arg) => arg
                .parse::<i32>()
                .map(Some)
                .map_err(|_| ParseError::InvalidExitStatus { arg: arg.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bare("ls", &["ls"])]
    #[case::unquoted("grep .zip", &["grep", ".zip"])]
    #[case::quoted("grep \".zip\"", &["grep", ".zip"])]
    #[case::quoted_space("grep \".png .zip\"", &["grep", ".png .zip"])]
    #[case::empty_quotes("echo \"\"", &["echo", ""])]
    #[case::inner_blanks("echo \"a   b   c\"", &["echo", "a   b   c"])]
    #[case::mixed_blanks("echo\t\ttest \n x", &["echo", "test", "x"])]
    #[case::quote_boundaries("echo hello\"world\"test", &["echo", "hello", "world", "test"])]
    #[case::delimiter_in_quotes("echo \"a|b\"", &["echo", "a|b"])]
    #[case::escaped_quote_in_run(r#"echo "say \"hi\"""#, &["echo", r#"say "hi""#])]
    #[case::escaped_quote_bare(r#"echo a\"b"#, &["echo", r#"a"b"#])]
    #[case::lone_backslash(r"echo a\b", &["echo", r"a\b"])]
    #[case::single_quotes_are_literal("echo 'a b'", &["echo", "'a", "b'"])]
    #[case::unicode("echo \"测试 🚀\"", &["echo", "测试 🚀"])]
    fn tokenizes(#[case] stage: &str, #[case] expected: &[&str]) {
        assert_eq!(tokenize(stage).unwrap(), expected);
    }

    #[test]
    fn blank_stage_has_no_tokens() {
        assert!(tokenize("").unwrap().is_empty());
        assert!(tokenize(" \t ").unwrap().is_empty());
    }

    #[test]
    fn unclosed_quote_is_reported() {
        assert_eq!(
            tokenize("echo \"hello world").unwrap_err(),
            ParseError::UnclosedQuote {
                text: "echo \"hello world".to_string()
            }
        );
    }

    #[test]
    fn argument_overflow_is_distinct() {
        assert_eq!(tokenize_with_limit("a b c", 3).unwrap().len(), 3);
        assert_eq!(
            tokenize_with_limit("a b c d", 3).unwrap_err(),
            ParseError::TooManyArgs {
                text: "a b c d".to_string(),
                max: 3
            }
        );
        assert!(matches!(
            tokenize_with_limit("a b c \"d\"", 3).unwrap_err(),
            ParseError::TooManyArgs { .. }
        ));
    }

    #[test]
    fn default_limit_allows_sixty_four_arguments() {
        let line = vec!["x"; 64].join(" ");
        assert_eq!(tokenize(&line).unwrap().len(), 64);
        let line = vec!["x"; 65].join(" ");
        assert!(matches!(
            tokenize(&line).unwrap_err(),
            ParseError::TooManyArgs { max: 64, .. }
        ));
    }

    #[test]
    fn simple_commands_round_trip() {
        for line in ["ls -la /tmp", "  wc   -l ", "grep -v foo\tbar"] {
            let joined = tokenize(line).unwrap().join(" ");
            let expected = line.split_whitespace().collect::<Vec<_>>().join(" ");
            assert_eq!(joined, expected);
        }
        assert_eq!(tokenize("echo hi there").unwrap().join(" "), "echo hi there");
    }

    #[test]
    fn stage_prepares_argv() {
        let stage = Stage::parse(2, "grep \".png .zip\"", MAX_ARGS).unwrap();
        assert_eq!(stage.index, 2);
        assert_eq!(stage.program(), "grep");
        assert_eq!(
            stage.argv(),
            &[CString::new("grep").unwrap(), CString::new(".png .zip").unwrap()]
        );
    }

    #[test]
    fn stage_rejects_empty_and_nul() {
        assert_eq!(
            Stage::parse(1, "  ", MAX_ARGS).unwrap_err(),
            ParseError::EmptyStage { index: 1 }
        );
        assert!(matches!(
            Stage::parse(0, "echo a\0b", MAX_ARGS).unwrap_err(),
            ParseError::InteriorNul { .. }
        ));
    }

    #[test]
    fn exit_status_argument() {
        let stage = Stage::parse(0, "exit", MAX_ARGS).unwrap();
        assert!(stage.is_terminator("exit"));
        assert_eq!(stage.exit_status(), Ok(None));

        let stage = Stage::parse(0, "exit 3", MAX_ARGS).unwrap();
        assert_eq!(stage.exit_status(), Ok(Some(3)));

        let stage = Stage::parse(0, "exit three", MAX_ARGS).unwrap();
        assert_eq!(
            stage.exit_status(),
            Err(ParseError::InvalidExitStatus {
                arg: "three".to_string()
            })
        );
    }
}
