//! [`Trigger`] directive: answer a pattern with a command.
//!
//! Watch-file syntax: `trigger "login:" "root"`

use crate::directive::Directive;
use crate::parser::{expect_end, take_quoted};
use crate::workbench::Workbench;
use anyhow::{Result, bail};

pub struct Trigger {
    pub pattern: String,
    pub command: String,
}

impl Trigger {
    pub const NAME: &'static str = "trigger";
}

impl Directive for Trigger {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        let (pattern, rest) = take_quoted(args)?;
        let (command, rest) = take_quoted(rest)?;
        expect_end(rest, Self::NAME)?;
        if pattern.is_empty() || command.is_empty() {
            bail!("'trigger' needs a non-empty pattern and command");
        }
        Ok(Self { pattern, command })
    }

    fn apply(&self, bench: &mut Workbench) -> Result<()> {
        bench
            .watchers
            .triggers()
            .add(self.pattern.clone(), self.command.clone());
        Ok(())
    }
}
