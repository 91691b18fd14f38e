//! The [`Directive`] trait implemented by every watch-file keyword.

use crate::workbench::Workbench;
use anyhow::Result;

/// A single watch-file directive.
///
/// To add a new directive:
///
/// 1. Define `pub const NAME: &'static str` on your struct, the keyword used
///    in watch files (e.g. `"count"`).
/// 2. Re-export the struct from `src/directives/mod.rs`.
/// 3. Add one entry to the `REGISTRY` in [`crate::parser`]:
///    `(MyDirective::NAME, MyDirective::parse_boxed)`.
pub trait Directive: 'static {
    /// The keyword, accessible at runtime through a trait object.
    fn name(&self) -> &'static str;

    /// Parse from the argument string (everything after the keyword).
    fn parse(args: &str) -> Result<Self>
    where
        Self: Sized;

    /// Parse and box. This is the function-pointer type stored in the
    /// directive registry.
    fn parse_boxed(args: &str) -> Result<Box<dyn Directive>>
    where
        Self: Sized,
    {
        Ok(Box::new(Self::parse(args)?))
    }

    /// Install the directive into `bench`.
    fn apply(&self, bench: &mut Workbench) -> Result<()>;
}
