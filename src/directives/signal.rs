//! [`Signal`] directive: track the latest of two outcomes.
//!
//! Watch-file syntax:
//! - `signal "PASS" "FAIL"`: back to pending 5 seconds after the last match
//! - `signal "link up" "link down" 30s`: custom reset delay

use crate::directive::Directive;
use crate::matchers::{CounterKind, Scope, SignalCounter};
use crate::parser::{parse_duration, take_quoted};
use crate::workbench::Workbench;
use anyhow::{Result, bail};
use std::time::Duration;

pub struct Signal {
    pub positive: String,
    pub negative: String,
    pub reset_delay: Option<Duration>,
}

impl Signal {
    pub const NAME: &'static str = "signal";
}

impl Directive for Signal {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        let (positive, rest) = take_quoted(args)?;
        let (negative, rest) = take_quoted(rest)?;
        if positive.is_empty() && negative.is_empty() {
            bail!("'signal' needs at least one non-empty pattern");
        }
        let rest = rest.trim();
        let reset_delay = if rest.is_empty() {
            None
        } else {
            Some(parse_duration(rest)?)
        };
        Ok(Self {
            positive,
            negative,
            reset_delay,
        })
    }

    fn apply(&self, bench: &mut Workbench) -> Result<()> {
        let mut counter = SignalCounter::new(self.positive.clone(), self.negative.clone());
        if let Some(delay) = self.reset_delay {
            counter = counter.with_reset_delay(delay);
        }
        bench
            .watchers
            .counters()
            .add(CounterKind::Signal(counter), Scope::All);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_delay() {
        let signal = Signal::parse(r#""PASS" "FAIL""#).unwrap();
        assert_eq!(signal.positive, "PASS");
        assert_eq!(signal.negative, "FAIL");
        assert_eq!(signal.reset_delay, None);
    }

    #[test]
    fn test_parse_custom_delay() {
        let signal = Signal::parse(r#""up" "down" 1.5s"#).unwrap();
        assert_eq!(signal.reset_delay, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_rejects() {
        assert!(Signal::parse(r#""PASS""#).is_err());
        assert!(Signal::parse(r#""" """#).is_err());
        assert!(Signal::parse(r#""a" "b" soon"#).is_err());
    }
}
