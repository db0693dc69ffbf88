pub mod parse;
pub mod runner;

pub use parse::{parse, ParsedTrace};
pub use runner::ToolCommand;
