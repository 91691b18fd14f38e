//! [`Count`] directive: count occurrences of a literal.
//!
//! Watch-file syntax: `count "ERR"`

use crate::directive::Directive;
use crate::matchers::{CounterKind, LiteralCounter, Scope};
use crate::parser::{expect_end, take_quoted};
use crate::workbench::Workbench;
use anyhow::{Result, bail};

pub struct Count {
    pub pattern: String,
}

impl Count {
    pub const NAME: &'static str = "count";
}

impl Directive for Count {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        let (pattern, rest) = take_quoted(args)?;
        expect_end(rest, Self::NAME)?;
        if pattern.is_empty() {
            bail!("'count' needs a non-empty pattern");
        }
        Ok(Self { pattern })
    }

    fn apply(&self, bench: &mut Workbench) -> Result<()> {
        bench.watchers.counters().add(
            CounterKind::Literal(LiteralCounter::new(self.pattern.clone())),
            Scope::All,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_parse() {
        assert_eq!(Count::parse(r#""ERR""#).unwrap().pattern, "ERR");
        assert_eq!(Count::parse(r#""a \"b\"""#).unwrap().pattern, r#"a "b""#);
    }

    #[test]
    fn test_parse_rejects() {
        assert!(Count::parse(r#""""#).is_err());
        assert!(Count::parse("ERR").is_err());
        assert!(Count::parse(r#""ERR" extra"#).is_err());
    }

    #[test]
    fn test_apply() {
        let mut bench = Workbench::new(&Config::default());
        Count::parse(r#""ERR""#).unwrap().apply(&mut bench).unwrap();
        assert_eq!(bench.watchers.counters().len(), 1);
    }
}
