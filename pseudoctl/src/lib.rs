pub mod cli;
pub mod harness;
pub mod step;

pub use cli::{Cli, Command};
pub use harness::{hex_dump, Harness, Outcome, StepFailure};
pub use step::{Step, StepError};
