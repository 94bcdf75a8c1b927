mod core;
mod parameter;

pub use self::core::{CommandLineParser, GroupSpec};
pub use crate::param::{ActionHandler, LeadingDash, Param, Value};
