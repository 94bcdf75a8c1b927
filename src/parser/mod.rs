pub(crate) mod base;
pub(crate) mod interface;
pub(crate) mod middleware;
pub(crate) mod printer;

pub use middleware::GeneralParser;
pub(crate) use interface::{ConsoleInterface, UserInterface};
