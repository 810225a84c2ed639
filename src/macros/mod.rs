//! Jump code macros
//!
//! - `expander` - placeholder inference and substitution
//! - `registry` - macro storage, expansion and persistence

pub mod expander;
pub mod registry;

pub use registry::{MacroDefinition, MacroDocument, MacroEntry, MacroRegistry, MacroSummary};
