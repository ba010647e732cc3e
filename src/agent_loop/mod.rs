//! Turn loop primitives (runner, events, hooks, context transforms).

pub mod events;
pub mod hooks;
pub mod runner;
pub mod transform;
pub mod types;

pub use events::*;
pub use hooks::*;
pub use runner::*;
pub use transform::*;
pub use types::*;
