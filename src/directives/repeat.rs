//! [`Repeat`] directive: send a command on a fixed interval.
//!
//! Watch-file syntax: `repeat "net stats" 2s`

use crate::directive::Directive;
use crate::parser::{parse_duration, take_quoted};
use crate::workbench::Workbench;
use anyhow::{Result, bail};
use std::time::Duration;

pub struct Repeat {
    pub command: String,
    pub interval: Duration,
}

impl Repeat {
    pub const NAME: &'static str = "repeat";
}

impl Directive for Repeat {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        let (command, rest) = take_quoted(args)?;
        if command.is_empty() {
            bail!("'repeat' needs a non-empty command");
        }
        let interval = parse_duration(rest)?;
        if interval.is_zero() {
            bail!("'repeat' interval must be positive");
        }
        Ok(Self { command, interval })
    }

    fn apply(&self, bench: &mut Workbench) -> Result<()> {
        bench
            .scheduler
            .add(self.command.clone(), self.command.clone(), self.interval)?;
        Ok(())
    }
}
