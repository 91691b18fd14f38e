use super::tail;
use serde::{Deserialize, Serialize};

/// Counts occurrences of a literal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteralCounter {
    pub pattern: String,
    #[serde(default)]
    pub count: u64,
}

impl LiteralCounter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            count: 0,
        }
    }

    pub(super) fn update(&mut self, buffer: &mut String, chunk: &str) -> bool {
        if self.pattern.is_empty() {
            return false;
        }
        let combined = format!("{buffer}{chunk}");
        // The tail is shorter than the pattern, so every match here
        // includes at least one character of the new chunk.
        let found = combined.matches(self.pattern.as_str()).count() as u64;
        *buffer = tail(&combined, self.pattern.chars().count() - 1);
        self.count += found;
        found > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(counter: &mut LiteralCounter, chunks: &[&str]) {
        let mut buffer = String::new();
        for chunk in chunks {
            counter.update(&mut buffer, chunk);
        }
    }

    #[test]
    fn test_count_across_chunks() {
        let mut counter = LiteralCounter::new("ERR");
        feed(&mut counter, &["xx-E", "RR-yy-ERR"]);
        assert_eq!(counter.count, 2);
    }

    #[test]
    fn test_non_overlapping() {
        let mut counter = LiteralCounter::new("aa");
        feed(&mut counter, &["aaaa"]);
        assert_eq!(counter.count, 2);
    }

    #[test]
    fn test_match_not_recounted_from_tail() {
        let mut counter = LiteralCounter::new("OK");
        feed(&mut counter, &["OK", "", "x", "OK"]);
        assert_eq!(counter.count, 2);
    }

    #[test]
    fn test_multibyte_pattern_split() {
        let mut counter = LiteralCounter::new("°C");
        feed(&mut counter, &["25°", "C and 30°C"]);
        assert_eq!(counter.count, 2);
    }

    #[test]
    fn test_single_char_pattern_keeps_no_tail() {
        let mut counter = LiteralCounter::new(">");
        let mut buffer = String::new();
        assert!(counter.update(&mut buffer, "a>b>"));
        assert_eq!(buffer, "");
        assert_eq!(counter.count, 2);
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        let mut counter = LiteralCounter::new("");
        feed(&mut counter, &["anything"]);
        assert_eq!(counter.count, 0);
    }
}
