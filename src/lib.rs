//! `declarg` is a declarative command line parser for Rust.
//!
//! Commands are described through a builder Api: parameters ([`Param`]) are declared on
//! a [`CommandLineParser`], compiled into a per-command registry, and a stateful
//! token-consumption engine parses `argv` into typed values, dispatches to
//! sub-commands, and renders help text.  Design priorities:
//! * *Declarative parameters*:
//! Positionals, options, flags, counters, pass-through, and sub-command selectors are
//! all declared the same way, with behavior (store/append/count/...) resolved at
//! declaration time.
//! * *Flexible arity*:
//! [`Nargs`] accepts exact counts, `?`/`*`/`+`, bounded and stepped ranges, explicit
//! count sets, and a remainder mode - and the parser backtracks when a greedy
//! variable-arity parameter consumes values a trailing positional needs.
//! * *Constraint groups*:
//! [`GroupSpec`] expresses mutual exclusion and mutual dependency, validated once all
//! tokens are consumed.
//! * *Detailed yet basic UX*:
//! Usage errors are single-line messages referencing the offending parameter's
//! canonical form (e.g. `--foo / -f`); `--help` always wins, even when parsing failed
//! elsewhere.
//!
//! # Usage
//! ```no_run
//! use declarg::{CommandLineParser, Nargs, Param};
//!
//! let parser = CommandLineParser::new("summer")
//!     .about("Sum the items.")
//!     .add(Param::counter("verbose").short('v'))
//!     .add(
//!         Param::positional("item")
//!             .nargs(Nargs::one_or_more())
//!             .with_type::<i64>()
//!             .help("The items to sum."),
//!     )
//!     .build();
//!
//! let parsed = parser.parse();
//! let items = parsed.get_all::<i64>("item").unwrap_or_default();
//! println!("Sum: {}", items.iter().sum::<i64>());
//! ```
//!
//! ```console
//! $ summer 1 2 3
//! Sum: 6
//!
//! $ summer 1 blah
//! argument item: bad value='blah' for type=i64
//! ```
mod api;
mod config;
mod context;
mod errors;
mod model;
mod param;
mod parser;
mod registry;

pub use api::*;
pub use config::CommandConfig;
pub use context::{Context, Parsed};
pub use errors::{DefinitionError, UsageError, DEFAULT_USAGE_EXIT_CODE};
pub use model::{Nargs, NargsError};
pub use parser::GeneralParser;
