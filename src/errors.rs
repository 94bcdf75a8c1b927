use thiserror::Error;

use crate::model::NargsError;

/// Exit code used for usage errors unless overridden via
/// [`CommandConfig`](crate::CommandConfig).
pub const DEFAULT_USAGE_EXIT_CODE: i32 = 3;

/// An error in the declaration of a command, parameter, or group.
///
/// Definition errors indicate a programming mistake in the CLI's declaration, not a user
/// input problem.  They are reported when the declaration is compiled (`build_parser`)
/// and are never caught internally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Name conflict - multiple parameters within a command cannot share the name '{0}'.")]
    NameConflict(String),

    #[error("Option '{option}' conflict between '{existing}' and '{param}'.")]
    OptionConflict {
        option: String,
        existing: String,
        param: String,
    },

    #[error("Cannot declare a second pass-through parameter - '{second}' follows '{first}'.")]
    DuplicatePassThru { first: String, second: String },

    #[error(
        "Only one Action or SubCommand parameter is allowed in a given command - \
         cannot contain both '{first}' and '{second}'."
    )]
    MultipleDispatch { first: String, second: String },

    #[error("Additional positional parameters cannot follow '{unfollowable}' {why} - '{param}' is invalid.")]
    UnfollowablePositional {
        unfollowable: String,
        why: String,
        param: String,
    },

    #[error("No choices were registered for '{0}'.")]
    NoChoices(String),

    #[error("Invalid choice '{choice}' for '{param}' - it was already registered.")]
    DuplicateChoice { param: String, choice: String },

    #[error("Invalid choice '{choice}' for '{param}' - choices may not be empty or start with '-'.")]
    InvalidChoice { param: String, choice: String },

    #[error("Group '{0}' cannot be both mutually exclusive and mutually dependent.")]
    ConflictingGroupKind(String),

    #[error("Cannot add '{param}' to group '{group}' - {why}.")]
    InvalidGroupMember {
        param: String,
        group: String,
        why: String,
    },

    #[error(
        "Action flags in the same phase must have distinct order values or share a \
         mutually exclusive group - conflicting order={order}: {params}."
    )]
    ActionFlagOrderConflict { order: i32, params: String },

    #[error("Invalid nargs for '{param}': {source}")]
    InvalidNargs { param: String, source: NargsError },

    #[error("Bad option string '{option}' for '{param}' - {why}.")]
    InvalidOptionString {
        param: String,
        option: String,
        why: String,
    },

    #[error("Invalid declaration for '{param}' - {why}.")]
    InvalidParameter { param: String, why: String },
}

/// A user-facing parsing error.
///
/// Every variant renders as a single-line, human-readable message referencing the
/// offending parameter's canonical usage string (e.g. `--foo / -f`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("argument {usage}: {reason}")]
    MissingArgument { usage: String, reason: String },

    #[error("{}", render_params_missing(.usages, .reason))]
    ParamsMissing {
        usages: Vec<String>,
        reason: Option<String>,
    },

    #[error(
        "argument conflict - the following arguments cannot be combined: {} ({reason})",
        .usages.join(", ")
    )]
    ParamConflict { usages: Vec<String>, reason: String },

    #[error("argument {usage}: invalid choice: '{value}' (choose from: {})", .choices.join(", "))]
    InvalidChoice {
        usage: String,
        value: String,
        choices: Vec<String>,
    },

    #[error("argument {usage}: {message}")]
    BadValue { usage: String, message: String },

    #[error("{0}")]
    NoSuchOption(String),

    #[error(
        "ambiguous short option combination '{token}' - it may refer to any of: {}",
        .usages.join(", ")
    )]
    AmbiguousCombo { token: String, usages: Vec<String> },
}

impl UsageError {
    pub(crate) fn missing(usage: impl Into<String>) -> Self {
        UsageError::MissingArgument {
            usage: usage.into(),
            reason: "missing required argument value".to_string(),
        }
    }

    pub(crate) fn missing_because(usage: impl Into<String>, reason: impl Into<String>) -> Self {
        UsageError::MissingArgument {
            usage: usage.into(),
            reason: reason.into(),
        }
    }
}

fn render_params_missing(usages: &[String], reason: &Option<String>) -> String {
    let prefix = if usages.len() > 1 {
        "arguments missing - the following arguments are required"
    } else {
        "argument missing - the following argument is required"
    };
    let suffix = match reason {
        Some(reason) => format!(" ({reason})"),
        None => String::default(),
    };
    format!("{prefix}: {}{suffix}", usages.join(", "))
}
