//! Parsers for watch files and script files.
//!
//! Watch files hold one [`Directive`] per line ([`parse_watch_str`],
//! [`parse_watch_file`]). Script files hold one device command per line
//! ([`parse_script_str`], [`parse_script_file`]). Both skip blank lines and
//! `#` comments, and strip inline comments (` # …`) outside quoted strings.

use crate::directive::Directive;
use crate::directives::{Count, Repeat, Signal, Slice, Trigger};
use anyhow::{Context as _, Result, anyhow, bail};
use std::path::Path;
use std::time::Duration;

/// Parse a watch file from a string slice.
///
/// # Errors
///
/// Returns an error if any line holds an unknown directive, a malformed
/// argument, or an unclosed quoted string.
///
/// # Example
///
/// ```
/// use shelltap::parse_watch_str;
///
/// let directives = parse_watch_str("count \"ERR\"\nrepeat \"net stats\" 2s\n").unwrap();
/// assert_eq!(directives.len(), 2);
/// ```
pub fn parse_watch_str(content: &str) -> Result<Vec<Box<dyn Directive>>> {
    let mut directives = Vec::new();
    for (line_num, line) in meaningful_lines(content) {
        let directive = parse_line(line)
            .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
        directives.push(directive);
    }
    Ok(directives)
}

/// Parse a watch file from disk. Delegates to [`parse_watch_str`].
pub fn parse_watch_file(path: impl AsRef<Path>) -> Result<Vec<Box<dyn Directive>>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read watch file: {}", path.display()))?;
    parse_watch_str(&content)
}

/// Parse a script: every remaining line is sent to the device verbatim.
pub fn parse_script_str(content: &str) -> Vec<String> {
    meaningful_lines(content)
        .map(|(_, line)| line.to_string())
        .collect()
}

/// Read and parse a script file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no commands.
pub fn parse_script_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script file: {}", path.display()))?;
    let commands = parse_script_str(&content);
    if commands.is_empty() {
        bail!("Script file has no commands: {}", path.display());
    }
    Ok(commands)
}

/// Non-empty, non-comment lines with inline comments removed, numbered from 0.
fn meaningful_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(n, line)| (n, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| (n, strip_inline_comment(line)))
        .filter(|(_, line)| !line.is_empty())
}

type ParseFn = fn(&str) -> Result<Box<dyn Directive>>;

static REGISTRY: &[(&str, ParseFn)] = &[
    (Count::NAME, Count::parse_boxed),
    (Signal::NAME, Signal::parse_boxed),
    (Slice::NAME, Slice::parse_boxed),
    (Trigger::NAME, Trigger::parse_boxed),
    (Repeat::NAME, Repeat::parse_boxed),
];

/// Dispatch one line to the matching directive's parser.
///
/// To add a new directive, add one entry to [`REGISTRY`] using its `NAME`
/// constant and `parse_boxed` function pointer.
fn parse_line(line: &str) -> Result<Box<dyn Directive>> {
    let (name, args) = line.split_once(' ').unwrap_or((line, ""));
    REGISTRY
        .iter()
        .find(|(directive, _)| *directive == name)
        .map(|(_, parse)| parse(args))
        .unwrap_or_else(|| Err(anyhow!("Unknown directive: {}", line)))
}

/// Strip inline comments from a line, preserving `#` inside quoted strings.
fn strip_inline_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if ch == '#' && !in_quotes {
            return line[..i].trim();
        }
    }
    line
}

/// Split a leading quoted string off `args`.
///
/// Returns the unescaped string and the rest of the input after the closing
/// quote.
pub(crate) fn take_quoted(args: &str) -> Result<(String, &str)> {
    let args = args.trim_start();
    if !args.starts_with('"') {
        bail!("Expected quoted string, got: {}", args);
    }
    let mut escaped = false;
    let mut end = None;
    for (i, ch) in args.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '"' {
            end = Some(i);
            break;
        }
    }
    let end = end.ok_or_else(|| anyhow!("Unclosed quote in: {}", args))?;
    Ok((parse_quoted_string(&args[..=end])?, &args[end + 1..]))
}

/// Fail if anything but whitespace follows the last argument.
pub(crate) fn expect_end(rest: &str, directive: &str) -> Result<()> {
    let rest = rest.trim();
    if rest.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Unexpected arguments after '{}': {}", directive, rest))
    }
}

/// Parse a duration string: `1s`, `500ms`, `1.5s`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(ms_str) = s.strip_suffix("ms") {
        let ms: u64 = ms_str
            .trim()
            .parse()
            .context("Invalid milliseconds value")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(s_str) = s.strip_suffix('s') {
        let secs: f64 = s_str.trim().parse().context("Invalid seconds value")?;
        Duration::try_from_secs_f64(secs).context("Invalid seconds value")
    } else {
        Err(anyhow!("Duration must end with 's' or 'ms', got: {}", s))
    }
}

/// Parse a double-quoted string, processing `\n`, `\r`, `\t`, `\"`, and `\\`.
pub(crate) fn parse_quoted_string(s: &str) -> Result<String> {
    let s = s.trim();
    if s.len() < 2 || !s.starts_with('"') {
        return Err(anyhow!("Expected string to start with '\"'"));
    }
    if !s.ends_with('"') {
        return Err(anyhow!("Expected string to end with '\"'"));
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s[1..s.len() - 1].chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Ok(out)
}
