//! Pure byte-level text edits
//!
//! Both edits work on raw bytes so fixtures that are not valid UTF-8 survive
//! untouched outside the edited region. Lines are `\n`-terminated and their
//! terminators are preserved exactly.

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which matches of a substitution pattern are replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Occurrence {
    /// Every match in the input
    #[default]
    All,
    /// Only the first match in the input
    First,
    /// The first match on each line, like `sed 's/a/b/'`
    FirstPerLine,
}

pub(crate) fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Replace matches of `pattern` with `replacement`
///
/// `replacement` may reference capture groups as `$1` or `${name}`; a literal
/// dollar sign is written `$$`. With `strict`, an input without any match
/// fails with [`Error::PatternNotFound`].
pub fn substitute(
    input: &[u8],
    pattern: &str,
    replacement: &str,
    occurrence: Occurrence,
    strict: bool,
) -> Result<Vec<u8>> {
    let re = compile(pattern)?;
    let rep = replacement.as_bytes();

    let (output, matched) = match occurrence {
        Occurrence::All => (re.replace_all(input, rep).into_owned(), re.is_match(input)),
        Occurrence::First => (re.replace(input, rep).into_owned(), re.is_match(input)),
        Occurrence::FirstPerLine => {
            let mut output = Vec::with_capacity(input.len());
            let mut matched = false;
            for line in input.split_inclusive(|b| *b == b'\n') {
                let (body, terminator) = split_terminator(line);
                if re.is_match(body) {
                    matched = true;
                    output.extend_from_slice(&re.replace(body, rep));
                } else {
                    output.extend_from_slice(body);
                }
                output.extend_from_slice(terminator);
            }
            (output, matched)
        }
    };

    if strict && !matched {
        return Err(Error::PatternNotFound(pattern.to_string()));
    }

    Ok(output)
}

/// Replace the first `old` with `new` on the 1-indexed `line` only
pub fn edit_line(input: &[u8], line: usize, old: &str, new: &str) -> Result<Vec<u8>> {
    let lines: Vec<&[u8]> = input.split_inclusive(|b| *b == b'\n').collect();

    if line == 0 || line > lines.len() {
        return Err(Error::LineOutOfRange {
            line,
            lines: lines.len(),
        });
    }

    let (body, terminator) = split_terminator(lines[line - 1]);
    let needle = old.as_bytes();
    let position = find(body, needle).ok_or_else(|| Error::SubstringNotFound {
        line,
        needle: old.to_string(),
    })?;

    let mut output = Vec::with_capacity(input.len() + new.len());
    for before in &lines[..line - 1] {
        output.extend_from_slice(before);
    }
    output.extend_from_slice(&body[..position]);
    output.extend_from_slice(new.as_bytes());
    output.extend_from_slice(&body[position + needle.len()..]);
    output.extend_from_slice(terminator);
    for after in &lines[line..] {
        output.extend_from_slice(after);
    }

    Ok(output)
}

fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    match line.last() {
        Some(b'\n') => line.split_at(line.len() - 1),
        _ => (line, &[]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
