//! [`Slice`] directive: keep the text between two markers.
//!
//! Watch-file syntax:
//! - `slice "IP: "`: up to the end of the line
//! - `slice "temp=" "C"`: up to a custom end marker

use crate::directive::Directive;
use crate::matchers::{CounterKind, FieldSlicer, Scope};
use crate::parser::{expect_end, take_quoted};
use crate::workbench::Workbench;
use anyhow::{Result, bail};

pub struct Slice {
    pub start: String,
    pub end: String,
}

impl Slice {
    pub const NAME: &'static str = "slice";
}

impl Directive for Slice {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        let (start, rest) = take_quoted(args)?;
        if start.is_empty() {
            bail!("'slice' needs a non-empty start marker");
        }
        let end = if rest.trim().is_empty() {
            "\n".to_string()
        } else {
            let (end, rest) = take_quoted(rest)?;
            expect_end(rest, Self::NAME)?;
            end
        };
        Ok(Self { start, end })
    }

    fn apply(&self, bench: &mut Workbench) -> Result<()> {
        bench.watchers.counters().add(
            CounterKind::Slicer(FieldSlicer::new(self.start.clone(), self.end.clone())),
            Scope::All,
        );
        Ok(())
    }
}
