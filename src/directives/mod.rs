mod count;
mod repeat;
mod signal;
mod slice;
mod trigger;

pub use count::Count;
pub use repeat::Repeat;
pub use signal::Signal;
pub use slice::Slice;
pub use trigger::Trigger;
