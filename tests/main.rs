use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use rstest::rstest;

use declarg::{
    CommandConfig, CommandLineParser, GeneralParser, GroupSpec, Nargs, Param, Parsed, UsageError,
};

#[test]
fn builder_compiles() {
    CommandLineParser::new("organization");
}

fn bar_baz_parser() -> GeneralParser {
    CommandLineParser::new("program")
        .add(Param::positional("bar"))
        .add(Param::option("baz").short('b').nargs(Nargs::exactly(2)))
        .build_parser()
        .unwrap()
}

#[test]
fn positional_is_not_an_option() {
    // Setup
    let parser = bar_baz_parser();

    // Execute
    let error = parser.try_parse(&["--bar", "not-an-opt"]).unwrap_err();

    // Verify
    assert_matches!(error, UsageError::NoSuchOption(message) => {
        assert!(message.contains("--bar"), "unexpected message: {message}");
    });
}

#[test]
fn positional_with_two_value_option() {
    // Setup
    let parser = bar_baz_parser();

    // Execute
    let parsed = parser.try_parse(&["x", "-b", "a", "b"]).unwrap();

    // Verify
    assert_eq!(parsed.get::<String>("bar"), Some("x".to_string()));
    assert_eq!(
        parsed.get_all::<String>("baz"),
        Some(vec!["a".to_string(), "b".to_string()])
    );
}

#[rstest]
#[case(vec![], true)]
#[case(vec!["--bar"], false)]
fn flag_toggles_from_default(#[case] tokens: Vec<&str>, #[case] expected: bool) {
    // Setup
    let parser = CommandLineParser::new("program")
        .add(Param::flag("bar").default(true))
        .build_parser()
        .unwrap();

    // Execute
    let parsed = parser.try_parse(tokens.as_slice()).unwrap();

    // Verify
    assert_eq!(parsed.flag("bar"), expected);
}

#[rstest]
#[case(vec![], 0)]
#[case(vec!["-v"], 1)]
#[case(vec!["-v", "-v"], 2)]
#[case(vec!["-vvv"], 3)]
#[case(vec!["-v=3"], 3)]
#[case(vec!["-v", "3"], 3)]
#[case(vec!["--verbose", "--verbose"], 2)]
fn counter(#[case] tokens: Vec<&str>, #[case] expected: i64) {
    // Setup
    let parser = CommandLineParser::new("program")
        .add(Param::counter("verbose").short('v'))
        .build_parser()
        .unwrap();

    // Execute
    let parsed = parser.try_parse(tokens.as_slice()).unwrap();

    // Verify
    assert_eq!(parsed.count("verbose"), expected);
}

fn sub_command_parser() -> GeneralParser {
    CommandLineParser::new("program")
        .branch(Param::sub_command("command"))
        .command("bar", |sub| sub.add(Param::option("value").short('b')))
        .command("baz", |sub| sub.add(Param::option("value").short('b')))
        .build_parser()
        .unwrap()
}

#[test]
fn sub_command_scopes_options() {
    // Setup
    let parser = sub_command_parser();

    // Execute
    let parsed = parser.try_parse(&["bar", "-b", "c"]).unwrap();

    // Verify
    assert_eq!(parsed.commands(), &["bar".to_string()]);
    assert_eq!(parsed.get::<String>("command"), Some("bar".to_string()));
    assert_eq!(parsed.get::<String>("value"), Some("c".to_string()));
}

#[test]
fn sub_command_options_must_follow_the_sub_command() {
    // Setup
    let parser = sub_command_parser();

    // Execute
    let error = parser.try_parse(&["-b", "c", "bar"]).unwrap_err();

    // Verify
    assert_matches!(error, UsageError::BadValue { message, .. } => {
        assert_eq!(message, "subcommand arguments must be provided after the subcommand");
    });
}

#[test]
fn unknown_sub_command_choice() {
    // Setup
    let parser = sub_command_parser();

    // Execute
    let error = parser.try_parse(&["qux"]).unwrap_err();

    // Verify
    assert_matches!(error, UsageError::InvalidChoice { value, choices, .. } => {
        assert_eq!(value, "qux");
        assert_eq!(choices, vec!["bar".to_string(), "baz".to_string()]);
    });
}

#[test]
fn optional_sub_command_runs_the_parent() {
    // Setup
    let parser = CommandLineParser::new("program")
        .add(Param::flag("fast"))
        .branch(Param::sub_command("command").optional())
        .command("bar", |sub| sub)
        .build_parser()
        .unwrap();

    // Execute
    let parsed = parser.try_parse(&["--fast"]).unwrap();

    // Verify
    assert!(parsed.commands().is_empty());
    assert!(parsed.flag("fast"));
}

#[test]
fn multi_word_sub_command_choice() {
    // Setup
    let parser = CommandLineParser::new("program")
        .branch(Param::sub_command("command"))
        .command("run", |sub| sub)
        .command("dry run", |sub| sub.add(Param::flag("strict")))
        .build_parser()
        .unwrap();

    // Execute
    let parsed = parser.try_parse(&["dry", "run", "--strict"]).unwrap();

    // Verify
    assert_eq!(parsed.get::<String>("command"), Some("dry run".to_string()));
    assert!(parsed.flag("strict"));
}

#[rstest]
#[case(vec!["--bar", "a", "b", "c"])]
#[case(vec!["c", "--bar", "a", "b"])]
fn greedy_option_stops_at_arity(#[case] tokens: Vec<&str>) {
    // Option placement relative to positionals is irrelevant when no ambiguity exists.
    let parser = CommandLineParser::new("program")
        .add(Param::option("bar").nargs(Nargs::exactly(2)))
        .add(Param::positional("baz"))
        .build_parser()
        .unwrap();

    let parsed = parser.try_parse(tokens.as_slice()).unwrap();
    assert_eq!(
        parsed.get_all::<String>("bar"),
        Some(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(parsed.get::<String>("baz"), Some("c".to_string()));
}

#[test]
fn pass_thru_captures_verbatim() {
    // Setup
    let parser = CommandLineParser::new("program")
        .add(Param::option("foo"))
        .add(Param::pass_thru("rest"))
        .build_parser()
        .unwrap();

    // Execute
    let parsed = parser.try_parse(&["--foo", "1", "--", "x", "-y", "z"]).unwrap();

    // Verify
    assert_eq!(parsed.get::<String>("foo"), Some("1".to_string()));
    assert_eq!(
        parsed.get_all::<String>("rest"),
        Some(vec!["x".to_string(), "-y".to_string(), "z".to_string()])
    );
}

#[test]
fn pass_thru_required_but_absent() {
    let parser = CommandLineParser::new("program")
        .add(Param::pass_thru("rest").required(true))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&[]).unwrap_err();
    assert_matches!(error, UsageError::ParamsMissing { usages, .. } => {
        assert_eq!(usages, vec!["rest".to_string()]);
    });
}

#[test]
fn bare_double_dash_without_pass_thru() {
    let parser = CommandLineParser::new("program")
        .add(Param::positional("item"))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["x", "--"]).unwrap_err();
    assert_matches!(error, UsageError::NoSuchOption(message) => {
        assert_eq!(message, "invalid argument: --");
    });
}

//
// Backtracking
//

#[test]
fn trailing_positional_reclaims_from_greedy_positional() {
    // Setup
    let parser = CommandLineParser::new("program")
        .add(Param::positional("items").nargs(Nargs::one_or_more()))
        .add(Param::positional("last"))
        .build_parser()
        .unwrap();

    // Execute
    let parsed = parser.try_parse(&["w", "x", "y"]).unwrap();

    // Verify
    assert_eq!(
        parsed.get_all::<String>("items"),
        Some(vec!["w".to_string(), "x".to_string()])
    );
    assert_eq!(parsed.get::<String>("last"), Some("y".to_string()));
}

#[test]
fn trailing_positional_reclaims_from_greedy_option() {
    // Setup
    let parser = CommandLineParser::new("program")
        .add(Param::option("bar").nargs(Nargs::one_or_more()))
        .add(Param::positional("baz"))
        .build_parser()
        .unwrap();

    // Execute
    let parsed = parser.try_parse(&["--bar", "a", "b", "c"]).unwrap();

    // Verify
    assert_eq!(
        parsed.get_all::<String>("bar"),
        Some(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(parsed.get::<String>("baz"), Some("c".to_string()));
}

#[test]
fn backtrack_prefers_smallest_rollback() {
    // Rolling back 2 values suffices; the greedy parameter keeps the rest.
    let parser = CommandLineParser::new("program")
        .add(Param::positional("items").nargs(Nargs::one_or_more()))
        .add(Param::positional("pair").nargs(Nargs::exactly(2)))
        .build_parser()
        .unwrap();

    let parsed = parser.try_parse(&["a", "b", "c", "d"]).unwrap();
    assert_eq!(
        parsed.get_all::<String>("items"),
        Some(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(
        parsed.get_all::<String>("pair"),
        Some(vec!["c".to_string(), "d".to_string()])
    );
}

#[test]
fn typed_parameters_never_backtrack() {
    // Converted values cannot be un-parsed, so the trailing positional stays missing.
    let parser = CommandLineParser::new("program")
        .add(
            Param::positional("nums")
                .nargs(Nargs::one_or_more())
                .with_type::<u32>(),
        )
        .add(Param::positional("last"))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["1", "2", "3"]).unwrap_err();
    assert_matches!(error, UsageError::ParamsMissing { usages, .. } => {
        assert_eq!(usages, vec!["last".to_string()]);
    });
}

#[test]
fn backtracking_can_be_disabled() {
    let parser = CommandLineParser::new("program")
        .config(CommandConfig {
            allow_backtrack: false,
            ..CommandConfig::default()
        })
        .add(Param::positional("items").nargs(Nargs::one_or_more()))
        .add(Param::positional("last"))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["w", "x", "y"]).unwrap_err();
    assert_matches!(error, UsageError::ParamsMissing { usages, .. } => {
        assert_eq!(usages, vec!["last".to_string()]);
    });
}

#[test]
fn under_satisfied_set_arity_rolls_back() {
    // {1,3} cannot keep 2 values; one is rolled back, and with no positional left to
    // claim it, the leftover is unrecognized.
    let parser = CommandLineParser::new("program")
        .add(Param::positional("items").nargs(Nargs::of_set([1, 3]).unwrap()))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["a", "b"]).unwrap_err();
    assert_matches!(error, UsageError::NoSuchOption(message) => {
        assert_eq!(message, "unrecognized arguments: b");
    });
}

//
// Values, choices, and validation
//

#[test]
fn negative_numbers_are_values() {
    let parser = CommandLineParser::new("program")
        .add(Param::positional("delta"))
        .build_parser()
        .unwrap();

    let parsed = parser.try_parse(&["-5"]).unwrap();
    assert_eq!(parsed.get::<i64>("delta"), Some(-5));
}

#[test]
fn dash_prefixed_junk_is_rejected() {
    let parser = CommandLineParser::new("program")
        .add(Param::positional("delta"))
        .build_parser()
        .unwrap();

    // The positional refuses '-x5', so it goes unplaced; with 'delta' satisfied, the
    // leftover is reported as unrecognized.
    let error = parser.try_parse(&["ok", "-x5"]).unwrap_err();
    assert_matches!(error, UsageError::NoSuchOption(message) => {
        assert_eq!(message, "unrecognized arguments: -x5");
    });

    // When the refusal leaves the positional unsatisfied, the missing parameter is the
    // better error.
    let error = parser.try_parse(&["-x5"]).unwrap_err();
    assert_matches!(error, UsageError::ParamsMissing { usages, .. } => {
        assert_eq!(usages, vec!["delta".to_string()]);
    });
}

#[test]
fn invalid_choice_lists_the_alternatives() {
    let parser = CommandLineParser::new("program")
        .add(Param::option("mode").choices(["fast", "slow"]))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["--mode", "medium"]).unwrap_err();
    assert_matches!(error, UsageError::InvalidChoice { value, choices, .. } => {
        assert_eq!(value, "medium");
        assert_eq!(choices, vec!["fast".to_string(), "slow".to_string()]);
    });
}

#[test]
fn typed_option_rejects_unconvertible_values() {
    let parser = CommandLineParser::new("program")
        .add(Param::option("size").with_type::<u32>())
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["--size", "many"]).unwrap_err();
    assert_matches!(error, UsageError::BadValue { message, .. } => {
        assert!(message.contains("many"), "unexpected message: {message}");
        assert!(message.contains("u32"), "unexpected message: {message}");
    });
}

#[test]
fn store_rejects_repetition() {
    let parser = CommandLineParser::new("program")
        .add(Param::option("foo"))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["--foo", "a", "--foo", "b"]).unwrap_err();
    assert_matches!(error, UsageError::BadValue { .. });
}

#[test]
fn missing_required_option_is_always_reported() {
    let parser = CommandLineParser::new("program")
        .add(Param::positional("item"))
        .add(Param::flag("fast"))
        .add(Param::option("needed").required(true))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["x", "--fast"]).unwrap_err();
    assert_matches!(error, UsageError::ParamsMissing { usages, .. } => {
        assert_eq!(usages, vec!["--needed".to_string()]);
    });
}

#[test]
fn unrecognized_arguments_are_reported() {
    let parser = CommandLineParser::new("program")
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["stray"]).unwrap_err();
    assert_matches!(error, UsageError::NoSuchOption(message) => {
        assert_eq!(message, "unrecognized arguments: stray");
    });
}

#[test]
fn unknown_tokens_may_be_ignored() {
    let parser = CommandLineParser::new("program")
        .config(CommandConfig {
            ignore_unknown: true,
            ..CommandConfig::default()
        })
        .build_parser()
        .unwrap();

    parser.try_parse(&["stray"]).unwrap();
}

#[test]
fn missing_params_may_be_allowed() {
    let parser = CommandLineParser::new("program")
        .config(CommandConfig {
            allow_missing: true,
            ..CommandConfig::default()
        })
        .add(Param::option("needed").required(true))
        .build_parser()
        .unwrap();

    let parsed = parser.try_parse(&[]).unwrap();
    assert!(!parsed.contains("needed"));
}

//
// Groups
//

fn group_parser() -> GeneralParser {
    CommandLineParser::new("program")
        .group(
            GroupSpec::new("output")
                .exclusive()
                .add(Param::flag("json"))
                .add(Param::flag("csv")),
        )
        .group(
            GroupSpec::new("auth")
                .dependent()
                .add(Param::option("user"))
                .add(Param::option("token")),
        )
        .build_parser()
        .unwrap()
}

#[rstest]
#[case(vec![])]
#[case(vec!["--json"])]
#[case(vec!["--csv"])]
fn exclusive_group_accepts_zero_or_one(#[case] tokens: Vec<&str>) {
    group_parser().try_parse(tokens.as_slice()).unwrap();
}

#[test]
fn exclusive_group_rejects_two() {
    let error = group_parser().try_parse(&["--json", "--csv"]).unwrap_err();
    assert_matches!(error, UsageError::ParamConflict { usages, .. } => {
        assert_eq!(usages, vec!["--json".to_string(), "--csv".to_string()]);
    });
}

#[test]
fn dependent_group_names_only_the_missing_members() {
    let error = group_parser().try_parse(&["--user", "me"]).unwrap_err();
    assert_matches!(error, UsageError::ParamsMissing { usages, reason } => {
        assert_eq!(usages, vec!["--token".to_string()]);
        assert_eq!(reason, Some("because --user was provided".to_string()));
    });
}

#[test]
fn dependent_group_accepts_all_or_none() {
    let parser = group_parser();
    parser.try_parse(&[]).unwrap();
    parser.try_parse(&["--user", "me", "--token", "t"]).unwrap();
}

#[test]
fn required_group_must_be_provided() {
    let parser = CommandLineParser::new("program")
        .group(
            GroupSpec::new("modes")
                .exclusive()
                .required()
                .add(Param::flag("json"))
                .add(Param::flag("csv")),
        )
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&[]).unwrap_err();
    assert_matches!(error, UsageError::ParamsMissing { .. });

    parser.try_parse(&["--csv"]).unwrap();
}

#[test]
fn nested_groups_validate_inner_first() {
    // The inner exclusive pair conflicts before the outer dependent group reports
    // anything about its other member.
    let parser = CommandLineParser::new("program")
        .group(
            GroupSpec::new("outer")
                .dependent()
                .add(Param::option("anchor"))
                .nest(
                    GroupSpec::new("inner")
                        .exclusive()
                        .add(Param::flag("json"))
                        .add(Param::flag("csv")),
                ),
        )
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&["--json", "--csv"]).unwrap_err();
    assert_matches!(error, UsageError::ParamConflict { .. });
}

//
// Environment variables
//

#[test]
fn env_var_fallback() {
    std::env::set_var("DECLARG_TEST_FALLBACK", "7");
    let parser = CommandLineParser::new("program")
        .add(
            Param::option("size")
                .with_type::<u32>()
                .env_var("DECLARG_TEST_MISSING_VAR")
                .env_var("DECLARG_TEST_FALLBACK"),
        )
        .build_parser()
        .unwrap();

    let parsed = parser.try_parse(&[]).unwrap();
    assert_eq!(parsed.get::<u32>("size"), Some(7));
}

#[test]
fn cli_value_wins_over_env_var() {
    std::env::set_var("DECLARG_TEST_LOSER", "7");
    let parser = CommandLineParser::new("program")
        .add(Param::option("size").with_type::<u32>().env_var("DECLARG_TEST_LOSER"))
        .build_parser()
        .unwrap();

    let parsed = parser.try_parse(&["--size", "3"]).unwrap();
    assert_eq!(parsed.get::<u32>("size"), Some(3));
}

#[test]
fn strict_env_rejects_invalid_values() {
    std::env::set_var("DECLARG_TEST_INVALID", "many");
    let parser = CommandLineParser::new("program")
        .add(Param::option("size").with_type::<u32>().env_var("DECLARG_TEST_INVALID"))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&[]).unwrap_err();
    assert_matches!(error, UsageError::BadValue { .. });
}

#[test]
fn lenient_env_ignores_invalid_values() {
    std::env::set_var("DECLARG_TEST_IGNORED", "many");
    let parser = CommandLineParser::new("program")
        .config(CommandConfig {
            strict_env: false,
            ..CommandConfig::default()
        })
        .add(Param::option("size").with_type::<u32>().env_var("DECLARG_TEST_IGNORED"))
        .build_parser()
        .unwrap();

    let parsed = parser.try_parse(&[]).unwrap();
    assert_eq!(parsed.get::<u32>("size"), None);
}

//
// Dispatch actions
//

static RUN_CALLS: AtomicUsize = AtomicUsize::new(0);
static DRY_RUN_CALLS: AtomicUsize = AtomicUsize::new(0);

fn on_run(_: &Parsed) {
    RUN_CALLS.fetch_add(1, Ordering::SeqCst);
}

fn on_dry_run(_: &Parsed) {
    DRY_RUN_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn dispatch_action_selects_a_handler() {
    // Setup
    let parser = CommandLineParser::new("program")
        .add(
            Param::dispatch("action")
                .choice("run", on_run)
                .choice("dry run", on_dry_run),
        )
        .build_parser()
        .unwrap();

    // Execute
    let parsed = parser.parse_tokens(&["dry", "run"]).unwrap();

    // Verify
    assert_eq!(parsed.get::<String>("action"), Some("dry run".to_string()));
    assert_eq!(DRY_RUN_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(RUN_CALLS.load(Ordering::SeqCst), 0);
}

#[test]
fn dispatch_action_requires_a_choice() {
    let parser = CommandLineParser::new("program")
        .add(Param::dispatch("action").choice("run", on_run))
        .build_parser()
        .unwrap();

    let error = parser.try_parse(&[]).unwrap_err();
    assert_matches!(error, UsageError::MissingArgument { usage, .. } => {
        assert_eq!(usage, "action");
    });
}

//
// Interleaving property
//

#[test]
fn option_placement_is_irrelevant_without_ambiguity() {
    // Setup: fixed-arity parameters only; positional relative order is preserved while
    // option units are shuffled into arbitrary positions.
    let parser = CommandLineParser::new("program")
        .add(Param::positional("first"))
        .add(Param::positional("second"))
        .add(Param::option("x").with_type::<u32>())
        .add(Param::flag("fast").short('f'))
        .build_parser()
        .unwrap();

    let positionals = ["1", "2"];
    let units: Vec<Vec<&str>> = vec![vec!["--x", "9"], vec!["-f"]];

    for _ in 0..50 {
        // Execute: randomly interleave the option units between the positionals.
        let mut slots: Vec<usize> = (0..units.len())
            .map(|_| thread_rng().gen_range(0..=positionals.len()))
            .collect();
        slots.sort_unstable();
        let mut order: Vec<usize> = (0..units.len()).collect();
        order.shuffle(&mut thread_rng());

        let mut tokens: Vec<&str> = Vec::default();
        let mut unit_index = 0;
        for (position, positional) in positionals.iter().copied().enumerate() {
            while unit_index < slots.len() && slots[unit_index] == position {
                tokens.extend(units[order[unit_index]].iter().copied());
                unit_index += 1;
            }
            tokens.push(positional);
        }
        while unit_index < slots.len() {
            tokens.extend(units[order[unit_index]].iter().copied());
            unit_index += 1;
        }

        // Verify: every permutation yields the canonical result.
        let parsed = parser.try_parse(tokens.as_slice()).unwrap();
        assert_eq!(parsed.get::<String>("first"), Some("1".to_string()), "{tokens:?}");
        assert_eq!(parsed.get::<String>("second"), Some("2".to_string()), "{tokens:?}");
        assert_eq!(parsed.get::<u32>("x"), Some(9), "{tokens:?}");
        assert!(parsed.flag("fast"), "{tokens:?}");
    }
}

//
// Combined short options
//

#[test]
fn combined_flags_with_trailing_value() {
    let parser = CommandLineParser::new("program")
        .add(Param::flag("all").short('a'))
        .add(Param::flag("brief").short('b'))
        .add(Param::option("file").short('c'))
        .build_parser()
        .unwrap();

    let parsed = parser.try_parse(&["-abc", "out.txt"]).unwrap();
    assert!(parsed.flag("all"));
    assert!(parsed.flag("brief"));
    assert_eq!(parsed.get::<String>("file"), Some("out.txt".to_string()));

    // The trailing characters form a value for the last flag in the combo instead.
    let parsed = parser.try_parse(&["-cab"]).unwrap();
    assert_eq!(parsed.get::<String>("file"), Some("ab".to_string()));
    assert!(!parsed.flag("all"));
    assert!(!parsed.flag("brief"));
}

#[test]
fn exit_codes() {
    // Usage errors exit with the default code 3; parse errors print to the interface,
    // which is not captured here.
    let parser = CommandLineParser::new("program")
        .add(Param::option("needed").required(true))
        .build_parser()
        .unwrap();

    assert_eq!(parser.parse_tokens(&[]).unwrap_err(), 3);
}
