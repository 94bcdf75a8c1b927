use crate::errors::DEFAULT_USAGE_EXIT_CODE;

/// Parsing behavior switches, applied to a whole command tree.
///
/// ### Example
/// ```
/// use declarg::CommandConfig;
///
/// let config = CommandConfig {
///     ignore_unknown: true,
///     ..CommandConfig::default()
/// };
/// # assert!(config.allow_backtrack);
/// ```
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Whether backtracking is enabled for positionals following params with variable
    /// nargs.
    pub allow_backtrack: bool,
    /// Whether unrecognized leftover arguments are tolerated instead of raising an
    /// error.
    pub ignore_unknown: bool,
    /// Whether missing required parameters are tolerated instead of raising an error.
    pub allow_missing: bool,
    /// Whether an invalid environment-variable value fails parsing (`true`) or is
    /// ignored (`false`).
    pub strict_env: bool,
    /// Whether the `--help` / `-h` action flag is added automatically.
    pub add_help: bool,
    /// The exit code used when a usage error terminates the process.
    pub usage_exit_code: i32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            allow_backtrack: true,
            ignore_unknown: false,
            allow_missing: false,
            strict_env: true,
            add_help: true,
            usage_exit_code: DEFAULT_USAGE_EXIT_CODE,
        }
    }
}
