//! Command protocol parsing and dispatch for planner output.
//!
//! A planner answers with a block like:
//!
//! ```text
//! BEGIN
//! QUERY(get_issue(PROJ-1))
//! END
//! ```
//!
//! [`parse`] turns that into [`ParsedEvent`]s and [`dispatch`] runs them in
//! order against an [`Executor`], usually a [`runtime::ToolLayer`].
//!
//! # Example
//!
//! ```no_run
//! use runtime::{LayerConfig, ToolLayer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let layer = ToolLayer::new();
//! layer.start(LayerConfig::default())?;
//!
//! let mut events = planner::parse("BEGIN\nQUERY(ping())\nEND")?;
//! planner::dispatch(&layer, &mut events)?;
//! if let Some(result) = &events[0].result {
//!     println!("{}", planner::render_result(result));
//! }
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod error;
mod event;
mod parser;
mod render;

pub use dispatch::{Executor, Outcome, dispatch};
pub use error::{Error, ParseError, Result};
pub use event::{CommandType, ParsedEvent};
pub use parser::parse;
pub use render::render_result;
