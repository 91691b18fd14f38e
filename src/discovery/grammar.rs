//! Help-text grammar.
//!
//! Listing (`help`):
//!
//! ```text
//! Available commands:
//!   clear    : Clear screen.
//!   kernel   : Kernel commands
//!   net      : Networking commands
//!              Usage: net <subcommand>
//! ```
//!
//! Per-command help (`net --help`):
//!
//! ```text
//! net - Networking commands
//! Subcommands:
//!   iface  :Print information about network interfaces
//!   stats  Show network statistics
//!          Usage: net stats [<index>]
//! ```

use super::registry::Argument;
use crate::ansi;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static ROOT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\s+:\s*(.*)$").expect("valid root line regex"));
static ROOT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+\s+:").expect("valid root start regex"));
static SUB_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w[\w-]*)\s+:\s*(.*)$").expect("valid subcommand regex"));
static SUB_SPACED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w[\w-]+)\s{2,}(.+)$").expect("valid subcommand regex"));
static SUB_COLON_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w[\w-]*\s+:").expect("valid subcommand regex"));
static SUB_SPACED_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w[\w-]+\s{2,}").expect("valid subcommand regex"));
static USAGE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i).*usage:\s*").expect("valid usage regex"));
static ARGUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<[^>]+>|\[<[^\]>]+>\]|\[[^\]<>]+\])").expect("valid argument regex")
});

/// One command line of a listing or help reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpEntry {
    pub name: String,
    pub description: String,
    /// Text of the `Usage:` lines, empty when there were none.
    pub usage: String,
    pub args: Vec<Argument>,
}

/// Parsed root listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub marker_found: bool,
    pub entries: Vec<HelpEntry>,
}

/// ANSI-stripped, trimmed, non-empty lines.
pub fn clean_lines(text: &str) -> Vec<String> {
    ansi::clean(text)
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Bracketed arguments: `<x>` is required, `[x]` and `[<x>]` optional.
/// Repeated names keep their first form.
pub fn parse_arguments(text: &str) -> Vec<Argument> {
    let mut seen = HashSet::new();
    ARGUMENT
        .find_iter(text)
        .filter_map(|m| {
            let raw = m.as_str();
            let name: String = raw.chars().filter(|c| !matches!(c, '<' | '>' | '[' | ']')).collect();
            seen.insert(name.clone()).then(|| Argument {
                name,
                required: raw.starts_with('<'),
            })
        })
        .collect()
}

fn usage_text(line: &str) -> Option<String> {
    if !line.to_lowercase().contains("usage:") {
        return None;
    }
    Some(USAGE_PREFIX.replace(line, "").trim().to_string())
}

/// Parse the reply to the list probe.
pub fn parse_listing(text: &str, marker: &str) -> Listing {
    let lines = clean_lines(text);
    let mut listing = Listing::default();
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if line.contains(marker) {
            listing.marker_found = true;
            i += 1;
            continue;
        }
        if !listing.marker_found {
            i += 1;
            continue;
        }
        let Some(caps) = ROOT_LINE.captures(line) else {
            i += 1;
            continue;
        };

        let description = caps[2].trim().to_string();
        let mut full_text = description.clone();
        let mut usage = Vec::new();
        let mut in_usage = false;
        let mut j = i + 1;
        while j < lines.len() {
            let next = &lines[j];
            if ROOT_START.is_match(next) {
                break;
            }
            if let Some(text) = usage_text(next) {
                in_usage = true;
                if !text.is_empty() {
                    usage.push(text);
                }
                full_text.push(' ');
                full_text.push_str(next);
                i = j;
                j += 1;
                continue;
            }
            if in_usage || next.contains(':') {
                break;
            }
            full_text.push(' ');
            full_text.push_str(next);
            i = j;
            j += 1;
        }

        listing.entries.push(HelpEntry {
            name: caps[1].to_string(),
            description,
            usage: usage.join(" "),
            args: parse_arguments(&full_text),
        });
        i += 1;
    }
    listing
}

/// Parse the `--help` reply of `parent` (its full name) into direct children.
///
/// An empty result is a normal leaf, not an error.
pub fn parse_subcommands(text: &str, parent: &str) -> Vec<HelpEntry> {
    let lines = clean_lines(text);
    let parent = parent.trim();
    let last_segment = parent.split_whitespace().last().unwrap_or(parent);

    // "cmd - description" on its own: a plain command with no subcommands.
    // A short reply that still opens a subcommand section is parsed normally.
    let has_section = lines
        .iter()
        .any(|l| l.to_lowercase().starts_with("subcommands:"));
    if !has_section
        && lines.len() <= 3
        && lines
            .iter()
            .any(|l| l.contains(parent) && l.contains('-') && !l.contains("--"))
    {
        return Vec::new();
    }

    let mut entries = Vec::new();
    let mut in_section = false;
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if line.to_lowercase().starts_with("subcommands:") {
            in_section = true;
            i += 1;
            continue;
        }
        if !in_section {
            i += 1;
            continue;
        }
        let Some(caps) = SUB_COLON
            .captures(line)
            .or_else(|| SUB_SPACED.captures(line))
        else {
            i += 1;
            continue;
        };
        let name = caps[1].to_string();
        if name == parent || name == last_segment {
            i += 1;
            continue;
        }

        let mut description = caps[2].trim().to_string();
        let mut usage = Vec::new();
        let mut in_usage = false;
        let mut j = i + 1;
        while j < lines.len() {
            let next = &lines[j];
            if SUB_COLON_START.is_match(next) || SUB_SPACED_START.is_match(next) {
                break;
            }
            if let Some(text) = usage_text(next) {
                in_usage = true;
                if !text.is_empty() {
                    usage.push(text);
                }
                i = j;
                j += 1;
                continue;
            }
            if next.contains(':') {
                break;
            }
            if in_usage {
                j += 1;
                continue;
            }
            if next.starts_with(|c: char| c.is_ascii_uppercase()) {
                break;
            }
            description.push(' ');
            description.push_str(next);
            i = j;
            j += 1;
        }

        let usage = usage.join(" ");
        let args = parse_arguments(&format!("{description} {usage}"));
        entries.push(HelpEntry {
            name,
            description,
            usage,
            args,
        });
        i += 1;
    }
    entries
}

/// Whether the first lines of a help reply carry a `<name> - <text>` header,
/// which marks a command that only groups its children.
pub fn has_category_header(text: &str, name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    let Ok(header) = Regex::new(&format!(r"(?i)^\s*{}\s*-(?:[^-]|$)", regex::escape(name))) else {
        return false;
    };
    ansi::clean(text)
        .split('\n')
        .take(5)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .any(|line| header.is_match(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(name: &str, required: bool) -> Argument {
        Argument {
            name: name.into(),
            required,
        }
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            parse_arguments("read <address> [<width>] [-v] <address>"),
            vec![arg("address", true), arg("width", false), arg("-v", false)]
        );
        assert!(parse_arguments("no arguments here").is_empty());
    }

    #[test]
    fn test_parse_listing_basic() {
        let listing = parse_listing(
            "Available commands:\nfoo : does foo\nbar : does bar",
            "Available commands:",
        );
        assert!(listing.marker_found);
        let names: Vec<_> = listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["foo", "bar"]);
        assert!(listing.entries.iter().all(|e| e.args.is_empty()));
        assert_eq!(listing.entries[0].description, "does foo");
    }

    #[test]
    fn test_parse_listing_zephyr_output() {
        let text = "help\r\nPlease press the <Tab> button to see all available commands.\r\n\
                    Available commands:\r\n  \
                    clear    : Clear screen.\r\n  \
                    device   : Device commands\r\n  \
                    mem      : Read memory\r\n             \
                    Usage: mem <address> [<width>]\r\n\
                    \x1b[1;32muart:~$ \x1b[m";
        let listing = parse_listing(text, "Available commands:");
        let names: Vec<_> = listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["clear", "device", "mem"]);
        let mem = &listing.entries[2];
        assert_eq!(mem.usage, "mem <address> [<width>]");
        assert_eq!(mem.args, vec![arg("address", true), arg("width", false)]);
    }

    #[test]
    fn test_parse_listing_without_marker() {
        let listing = parse_listing("foo : does foo\n", "Available commands:");
        assert!(!listing.marker_found);
        assert!(listing.entries.is_empty());
    }

    #[test]
    fn test_parse_subcommands_colon_format() {
        let entries = parse_subcommands("Subcommands:\nstats : show stats\niface : show iface", "net");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["stats", "iface"]);
    }

    #[test]
    fn test_parse_subcommands_spaced_format_with_usage() {
        let text = "net stats --help\r\nnet stats - Show network statistics\r\nSubcommands:\r\n  \
                    all     Show all statistics\r\n  \
                    iface   Show interface statistics\r\n          \
                    Usage: net stats iface <index>\r\n\
                    uart:~$ ";
        let entries = parse_subcommands(text, "net stats");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, "iface");
        assert_eq!(entries[1].usage, "net stats iface <index>");
        assert_eq!(entries[1].args, vec![arg("index", true)]);
    }

    #[test]
    fn test_subcommand_named_like_parent_skipped() {
        let entries = parse_subcommands(
            "Subcommands:\n  iface : again\n  up : bring up\n  net iface : full",
            "net iface",
        );
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["up"]);
    }

    #[test]
    fn test_simple_help_is_leaf() {
        assert!(parse_subcommands("reboot --help\nreboot - Reboot the board\nuart:~$ ", "reboot").is_empty());
        assert!(parse_subcommands("", "reboot").is_empty());
    }

    #[test]
    fn test_short_help_with_section_has_children() {
        let entries = parse_subcommands("net - Networking
Subcommands:
stats : show stats", "net");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["stats"]);
    }

    #[test]
    fn test_description_continuation() {
        let entries = parse_subcommands(
            "Subcommands:\n  dump : dump memory\n  starting at the given offset\n  Next : other",
            "mem",
        );
        assert_eq!(entries[0].description, "dump memory starting at the given offset");
    }

    #[test]
    fn test_category_header() {
        assert!(has_category_header("net - Networking commands\nSubcommands:\n", "net"));
        assert!(has_category_header("\x1b[1mNET\x1b[m -Networking", "net"));
        assert!(!has_category_header("net --help\nSubcommands:\n", "net"));
        assert!(!has_category_header("a\nb\nc\nd\ne\nnet - late header", "net"));
    }
}
