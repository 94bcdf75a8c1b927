use std::collections::HashSet;
use std::env;

use crate::config::CommandConfig;
use crate::context::{Context, Parsed};
use crate::errors::UsageError;
use crate::param::{ActionFlagData, FlagEffect, ParamId, Value};
use crate::parser::base::{CommandParser, ParseOutcome};
use crate::parser::interface::UserInterface;
use crate::parser::printer::Printer;
use crate::registry::CommandTree;

/// The configured command line parser.
/// Built via [`CommandLineParser::build`](crate::CommandLineParser::build).
///
/// The compiled declaration is read-only, so one `GeneralParser` may be reused for any
/// number of parses; per-invocation state lives in a fresh [`Context`] each time.
pub struct GeneralParser {
    tree: CommandTree,
    config: CommandConfig,
    user_interface: Box<dyn UserInterface>,
}

impl std::fmt::Debug for GeneralParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneralParser")
            .field("tree", &self.tree)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Progress of one end-to-end parse: the context and the chain of command levels
/// entered so far.
struct DriveState {
    ctx: Context,
    chain: Vec<usize>,
    path: Vec<String>,
}

impl GeneralParser {
    pub(crate) fn new(
        tree: CommandTree,
        config: CommandConfig,
        user_interface: Box<dyn UserInterface>,
    ) -> Self {
        Self {
            tree,
            config,
            user_interface,
        }
    }

    /// The root command's program name and about message.
    pub fn details(&self) -> (String, Option<String>) {
        let root = &self.tree.nodes[0];
        (root.name.clone(), root.about.clone())
    }

    /// The program name and about message of a direct sub-command, if it exists.
    pub fn sub_details(&self, choice: &str) -> Option<(String, Option<String>)> {
        let root = &self.tree.nodes[0];
        let child = root.child(choice)?;
        let node = &self.tree.nodes[child];
        Some((format!("{} {}", root.name, node.name), node.about.clone()))
    }

    /// Run the parser against the input tokens, returning the typed result or the usage
    /// error, without printing anything or executing action flags.  Intended for
    /// library-style use and tests.
    pub fn try_parse(&self, tokens: &[&str]) -> Result<Parsed, UsageError> {
        let mut state = DriveState::new(tokens);
        self.drive(&mut state)
    }

    /// Run the command line parser against the input tokens.
    ///
    /// Parsing descends through sub-command levels; after all tokens are consumed,
    /// group constraints are validated and the final values are assembled.  Provided
    /// action flags then execute in order: before-main flags (including the built-in
    /// `--help`, which prints and returns `Err(0)`), the dispatch-action handler, and
    /// after-main flags.
    ///
    /// On a usage error, a single-line message is printed to the error interface and
    /// `Err` carries the configured exit code.  `--help` wins over usage errors
    /// whenever it was among the supplied tokens.
    pub fn parse_tokens(&self, tokens: &[&str]) -> Result<Parsed, i32> {
        let mut state = DriveState::new(tokens);
        match self.drive(&mut state) {
            Ok(parsed) => {
                let (before, after) = self.provided_action_flags(&state);
                for data in before {
                    match data.effect {
                        FlagEffect::Help => {
                            self.print_help(&state);
                            return Err(0);
                        }
                        FlagEffect::Call(handler) => handler(&parsed),
                        FlagEffect::CallExit(handler, code) => {
                            handler(&parsed);
                            return Err(code);
                        }
                    }
                }

                self.run_dispatch(&state, &parsed);

                for data in after {
                    match data.effect {
                        FlagEffect::Help => {
                            self.print_help(&state);
                            return Err(0);
                        }
                        FlagEffect::Call(handler) => handler(&parsed),
                        FlagEffect::CallExit(handler, code) => {
                            handler(&parsed);
                            return Err(code);
                        }
                    }
                }

                Ok(parsed)
            }
            Err(error) => {
                if self.help_provided(&state, tokens) {
                    self.print_help(&state);
                    return Err(0);
                }
                self.user_interface.print_error(error.to_string());
                Err(self.config.usage_exit_code)
            }
        }
    }

    /// Run the command line parser against the Cli [`env::args`], exiting the process
    /// on errors or exit-style action flags.
    pub fn parse(&self) -> Parsed {
        let command_input: Vec<String> = env::args().skip(1).collect();
        let tokens: Vec<&str> = command_input.iter().map(AsRef::as_ref).collect();
        match self.parse_tokens(tokens.as_slice()) {
            Ok(parsed) => parsed,
            Err(exit_code) => std::process::exit(exit_code),
        }
    }

    /// Descend through the command levels, then assemble the final values.
    fn drive(&self, state: &mut DriveState) -> Result<Parsed, UsageError> {
        loop {
            let node = *state.chain.last().expect("internal error - chain starts non-empty");
            match CommandParser::parse_args(&self.tree, node, &self.config, &mut state.ctx)? {
                ParseOutcome::Complete => break,
                ParseOutcome::Next { node: next, remaining } => {
                    state.path.push(self.tree.nodes[next].name.clone());
                    state.ctx = state.ctx.child(remaining);
                    state.chain.push(next);
                }
            }
        }

        let mut parsed = Parsed::default();
        for choice in &state.path {
            parsed.push_command(choice.clone());
        }

        let mut seen: HashSet<ParamId> = HashSet::default();
        for node in &state.chain {
            let params = &self.tree.nodes[*node].params;
            let ids = params
                .positionals
                .iter()
                .chain(params.options.iter())
                .chain(params.pass_thru.iter());
            for id in ids {
                if seen.insert(*id) {
                    let param = self.tree.store.param(*id);
                    let value = match param.result_value(&state.ctx) {
                        Ok(value) => value,
                        Err(_) if self.config.allow_missing => Value::Unset,
                        Err(error) => return Err(error),
                    };
                    parsed.insert(param.name.clone(), value);
                }
            }
        }

        Ok(parsed)
    }

    /// The action flags that were provided, split by phase and ordered for execution.
    fn provided_action_flags(
        &self,
        state: &DriveState,
    ) -> (Vec<ActionFlagData>, Vec<ActionFlagData>) {
        let node = *state.chain.last().expect("internal error - chain starts non-empty");
        let mut provided: Vec<(ActionFlagData, &str)> = self.tree.nodes[node]
            .params
            .options
            .iter()
            .filter_map(|id| {
                let param = self.tree.store.param(*id);
                match param.action_flag {
                    Some(data) if state.ctx.num_provided(*id) > 0 => {
                        Some((data, param.name.as_str()))
                    }
                    _ => None,
                }
            })
            .collect();
        provided.sort_by_key(|(data, name)| (!data.before_main, data.order, name.to_string()));

        let split = provided
            .iter()
            .position(|(data, _)| !data.before_main)
            .unwrap_or(provided.len());
        let after = provided.split_off(split);
        (
            provided.into_iter().map(|(data, _)| data).collect(),
            after.into_iter().map(|(data, _)| data).collect(),
        )
    }

    fn run_dispatch(&self, state: &DriveState, parsed: &Parsed) {
        let node = *state.chain.last().expect("internal error - chain starts non-empty");
        if let Some(action_id) = self.tree.nodes[node].params.action {
            let param = self.tree.store.param(action_id);
            if let Ok(Some(entry)) = param.selected_choice(&state.ctx) {
                if let Some(handler) = entry.handler {
                    handler(parsed);
                }
            }
        }
    }

    /// Whether the built-in help flag applies: either it was recorded during parsing,
    /// or one of its option strings appears among the supplied tokens (so it fires
    /// despite parse failures elsewhere).
    fn help_provided(&self, state: &DriveState, tokens: &[&str]) -> bool {
        let node = *state.chain.last().expect("internal error - chain starts non-empty");
        let help = self.tree.nodes[node].params.options.iter().find(|id| {
            matches!(
                self.tree.store.param(**id).action_flag,
                Some(ActionFlagData {
                    effect: FlagEffect::Help,
                    ..
                })
            )
        });
        let Some(help_id) = help else {
            return false;
        };

        if state.ctx.num_provided(*help_id) > 0 || state.ctx.is_parsing(*help_id) {
            return true;
        }
        // Tokens after a bare '--' are pass-through values, not options.
        let param = self.tree.store.param(*help_id);
        tokens.iter().take_while(|token| **token != "--").any(|token| {
            param
                .long_opts
                .iter()
                .chain(param.short_opts.iter())
                .any(|opt| opt == token)
        })
    }

    fn print_help(&self, state: &DriveState) {
        let node = *state.chain.last().expect("internal error - chain starts non-empty");
        let mut program = self.tree.nodes[0].name.clone();
        for choice in &state.path {
            program.push(' ');
            program.push_str(choice);
        }
        Printer::terminal().print_help(&self.tree, node, &program, &*self.user_interface);
    }
}

impl DriveState {
    fn new(tokens: &[&str]) -> Self {
        Self {
            ctx: Context::new(tokens.iter().map(|token| token.to_string()).collect()),
            chain: vec![0],
            path: Vec::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CommandLineParser, GroupSpec, Param};
    use crate::model::Nargs;
    use crate::parser::interface::util::channel_interface;
    use crate::test::assert_contains;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case(vec!["--help"])]
    #[case(vec!["-h"])]
    fn help_prints_and_exits_zero(#[case] tokens: Vec<&str>) {
        let (sender, receiver) = channel_interface();
        let parser = CommandLineParser::new("program")
            .add(Param::flag("flag").short('f'))
            .add(Param::positional("item").nargs(Nargs::zero_or_more()))
            .build_with_interface(Box::new(sender))
            .unwrap();

        let error_code = parser.parse_tokens(tokens.as_slice()).unwrap_err();
        assert_eq!(error_code, 0);

        let message = receiver.consume_message();
        assert_contains!(message, "usage: program [-h] [-f] [ITEM ...]");
        assert_contains!(message, "-h, --help");
        assert_contains!(message, "-f, --flag");
    }

    #[test]
    fn help_wins_over_missing_arguments() {
        let (sender, receiver) = channel_interface();
        let parser = CommandLineParser::new("program")
            .add(Param::option("needed").required(true))
            .build_with_interface(Box::new(sender))
            .unwrap();

        let error_code = parser.parse_tokens(&["--help"]).unwrap_err();
        assert_eq!(error_code, 0);

        let message = receiver.consume_message();
        assert_contains!(message, "usage: program");
    }

    #[test]
    fn help_wins_even_after_a_bad_token() {
        let (sender, receiver) = channel_interface();
        let parser = CommandLineParser::new("program")
            .add(Param::option("size").with_type::<u32>())
            .build_with_interface(Box::new(sender))
            .unwrap();

        let error_code = parser.parse_tokens(&["--size", "x", "--help"]).unwrap_err();
        assert_eq!(error_code, 0);

        let message = receiver.consume_message();
        assert_contains!(message, "usage: program");
    }

    #[test]
    fn usage_error_prints_and_exits_with_configured_code() {
        let (sender, receiver) = channel_interface();
        let parser = CommandLineParser::new("program")
            .add(Param::option("needed").required(true))
            .build_with_interface(Box::new(sender))
            .unwrap();

        let error_code = parser.parse_tokens(&[]).unwrap_err();
        assert_eq!(error_code, 3);

        let (message, error) = receiver.consume();
        assert_eq!(message, None);
        assert_contains!(error.unwrap(), "--needed");
    }

    #[test]
    fn sub_command_help_uses_sub_program_name() {
        let (sender, receiver) = channel_interface();
        let parser = CommandLineParser::new("program")
            .branch(Param::sub_command("command"))
            .command("run", |sub| sub.add(Param::flag("fast")))
            .build_with_interface(Box::new(sender))
            .unwrap();

        let error_code = parser.parse_tokens(&["run", "--help"]).unwrap_err();
        assert_eq!(error_code, 0);

        let message = receiver.consume_message();
        assert_contains!(message, "usage: program run");
        assert_contains!(message, "--fast");
    }

    #[test]
    fn details() {
        let parser = CommandLineParser::new("program")
            .about("Does things.")
            .branch(Param::sub_command("command"))
            .command("run", |sub| sub.about("Runs things."))
            .build_parser()
            .unwrap();

        assert_eq!(
            parser.details(),
            ("program".to_string(), Some("Does things.".to_string()))
        );
        assert_eq!(
            parser.sub_details("run"),
            Some(("program run".to_string(), Some("Runs things.".to_string())))
        );
        assert_eq!(parser.sub_details("walk"), None);
    }

    #[test]
    fn parser_is_reusable() {
        let parser = CommandLineParser::new("program")
            .add(Param::positional("item"))
            .build_parser()
            .unwrap();

        let first = parser.try_parse(&["a"]).unwrap();
        let second = parser.try_parse(&["b"]).unwrap();
        assert_eq!(first.get::<String>("item"), Some("a".to_string()));
        assert_eq!(second.get::<String>("item"), Some("b".to_string()));
    }

    #[test]
    fn group_conflict_beats_missing() {
        // Both a conflict and a missing-required condition apply; the conflict wins.
        let parser = CommandLineParser::new("program")
            .add(Param::option("needed").required(true))
            .group(
                GroupSpec::new("modes")
                    .exclusive()
                    .add(Param::flag("json"))
                    .add(Param::flag("csv")),
            )
            .build_parser()
            .unwrap();

        let error = parser.try_parse(&["--json", "--csv"]).unwrap_err();
        assert_matches!(error, UsageError::ParamConflict { .. });
    }
}
