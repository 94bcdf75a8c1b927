use std::collections::HashMap;
use std::str::FromStr;

use crate::param::{GroupId, Param, ParamId, Value};

/// Mutable state scoped to a single parse invocation.
///
/// Holds the unconsumed tokens, the values accumulated per parameter, and the number of
/// times each parameter/group was provided.  Parameters themselves are stateless with
/// respect to individual invocations; mutating the context is the only way parsed
/// values become visible.  The active context is always passed explicitly - there is no
/// implicit thread-local stack, so concurrent parses of the same declaration are safe
/// as long as each uses its own context.
#[derive(Debug, Default)]
pub struct Context {
    pub(crate) remaining: Vec<String>,
    parsing: HashMap<ParamId, Value>,
    provided: HashMap<ParamId, usize>,
    provided_groups: HashMap<GroupId, usize>,
    pub(crate) actions_taken: usize,
}

impl Context {
    pub(crate) fn new(argv: Vec<String>) -> Self {
        Self {
            remaining: argv,
            ..Self::default()
        }
    }

    /// A child context for a nested sub-command parse.  The child starts with a copy of
    /// the already-parsed values and provided counts, so ancestor parameters remain
    /// visible and further parsing cannot retroactively corrupt this context.
    pub(crate) fn child(&self, remaining: Vec<String>) -> Self {
        Self {
            remaining,
            parsing: self.parsing.clone(),
            provided: self.provided.clone(),
            provided_groups: self.provided_groups.clone(),
            actions_taken: self.actions_taken,
        }
    }

    /// The currently accumulated value for `param`, lazily initialized via the
    /// parameter's action on first access.
    pub(crate) fn parsing_value(&mut self, param: &Param) -> Value {
        self.parsing
            .entry(param.id)
            .or_insert_with(|| param.init_value())
            .clone()
    }

    /// The stored value, without initializing it.
    pub(crate) fn peek_value(&self, id: ParamId) -> Option<&Value> {
        self.parsing.get(&id)
    }

    pub(crate) fn set_parsing_value(&mut self, id: ParamId, value: Value) {
        self.parsing.insert(id, value);
    }

    /// Whether any value (even an initial one) has been recorded for the parameter.
    pub(crate) fn is_parsing(&self, id: ParamId) -> bool {
        self.parsing.contains_key(&id)
    }

    /// Increment (or, during backtracking, decrement) the provided counter.
    pub(crate) fn record_action(&mut self, id: ParamId, delta: isize) {
        let count = self.provided.entry(id).or_insert(0);
        *count = count.saturating_add_signed(delta);
        if delta > 0 {
            self.actions_taken += delta as usize;
        }
    }

    pub(crate) fn clear_provided(&mut self, id: ParamId) {
        self.provided.insert(id, 0);
    }

    pub(crate) fn num_provided(&self, id: ParamId) -> usize {
        self.provided.get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn record_group_action(&mut self, id: GroupId, delta: isize) {
        let count = self.provided_groups.entry(id).or_insert(0);
        *count = count.saturating_add_signed(delta);
    }

    pub(crate) fn num_provided_group(&self, id: GroupId) -> usize {
        self.provided_groups.get(&id).copied().unwrap_or(0)
    }
}

/// The final values surfaced by a successful parse.
///
/// Values are keyed by parameter name.  Typed access goes through [`FromStr`], the same
/// convention used for declaring typed parameters.
///
/// ### Example
/// ```
/// # use declarg::{CommandLineParser, Param};
/// let parser = CommandLineParser::new("program")
///     .add(Param::option("size").short('s'))
///     .build();
/// let parsed = parser.parse_tokens(&["--size", "5"]).unwrap();
/// assert_eq!(parsed.get::<u32>("size"), Some(5));
/// ```
#[derive(Debug, Default)]
pub struct Parsed {
    values: HashMap<String, Value>,
    path: Vec<String>,
}

impl Parsed {
    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub(crate) fn push_command(&mut self, choice: impl Into<String>) {
        self.path.push(choice.into());
    }

    /// The raw stored value, if any was recorded.
    pub fn raw(&self, name: &str) -> Option<&Value> {
        match self.values.get(name) {
            Some(Value::Unset) | None => None,
            Some(value) => Some(value),
        }
    }

    /// Whether a (non-default) value is present for the parameter.
    pub fn contains(&self, name: &str) -> bool {
        self.raw(name).is_some()
    }

    /// A single value, converted via `FromStr`.  `None` when absent or inconvertible.
    pub fn get<T: FromStr>(&self, name: &str) -> Option<T> {
        match self.raw(name)? {
            Value::Str(value) => value.parse().ok(),
            Value::Int(value) => value.to_string().parse().ok(),
            Value::Bool(value) => value.to_string().parse().ok(),
            _ => None,
        }
    }

    /// Accumulated values, each converted via `FromStr`.
    pub fn get_all<T: FromStr>(&self, name: &str) -> Option<Vec<T>> {
        match self.raw(name)? {
            Value::Strs(values) => values.iter().map(|value| value.parse().ok()).collect(),
            _ => None,
        }
    }

    /// A flag's stored constant; `false` when the flag never fired and no other default
    /// was declared.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.raw(name), Some(Value::Bool(true)))
    }

    /// A counter's accumulated total.
    pub fn count(&self, name: &str) -> i64 {
        match self.raw(name) {
            Some(Value::Int(count)) => *count,
            _ => 0,
        }
    }

    /// The chain of sub-command choices that were selected, outermost first.
    pub fn commands(&self) -> &[String] {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Nargs;
    use crate::param::{Action, LeadingDash, ParamKind};

    fn append_param(id: ParamId) -> Param {
        Param {
            id,
            name: format!("param{id}"),
            kind: ParamKind::Positional,
            action: Action::Append,
            nargs: Nargs::zero_or_more(),
            required: false,
            default: None,
            choices: None,
            choice_map: Vec::default(),
            long_opts: Vec::default(),
            short_opts: Vec::default(),
            env_vars: Vec::default(),
            allow_leading_dash: LeadingDash::default(),
            validator: None,
            action_flag: None,
            group: None,
            help: None,
            hide: false,
            declaration_error: None,
        }
    }

    #[test]
    fn lazy_init() {
        let param = append_param(0);
        let mut ctx = Context::default();

        assert!(!ctx.is_parsing(0));
        assert_eq!(ctx.parsing_value(&param), Value::Strs(Vec::default()));
        assert!(ctx.is_parsing(0));
    }

    #[test]
    fn record_and_rollback() {
        let mut ctx = Context::default();
        ctx.record_action(3, 2);
        assert_eq!(ctx.num_provided(3), 2);
        ctx.record_action(3, -1);
        assert_eq!(ctx.num_provided(3), 1);
        ctx.record_action(3, -5);
        assert_eq!(ctx.num_provided(3), 0);
    }

    #[test]
    fn child_copies_state() {
        let param = append_param(1);
        let mut ctx = Context::new(vec!["a".to_string(), "b".to_string()]);
        param.take_action(&mut ctx, Some("x"), false).unwrap();

        let mut child = ctx.child(vec!["b".to_string()]);
        assert_eq!(child.num_provided(1), 1);
        param.take_action(&mut child, Some("y"), false).unwrap();

        // The parent never sees the child's values.
        assert_eq!(ctx.num_provided(1), 1);
        assert_eq!(
            ctx.peek_value(1),
            Some(&Value::Strs(vec!["x".to_string()]))
        );
        assert_eq!(
            child.peek_value(1),
            Some(&Value::Strs(vec!["x".to_string(), "y".to_string()]))
        );
    }

    #[test]
    fn parsed_typed_access() {
        let mut parsed = Parsed::default();
        parsed.insert("size", Value::Str("5".to_string()));
        parsed.insert("items", Value::Strs(vec!["1".to_string(), "2".to_string()]));
        parsed.insert("verbose", Value::Int(3));
        parsed.insert("flag", Value::Bool(true));
        parsed.insert("unset", Value::Unset);

        assert_eq!(parsed.get::<u32>("size"), Some(5));
        assert_eq!(parsed.get_all::<u32>("items"), Some(vec![1, 2]));
        assert_eq!(parsed.count("verbose"), 3);
        assert!(parsed.flag("flag"));
        assert!(!parsed.contains("unset"));
        assert!(!parsed.contains("missing"));
        assert_eq!(parsed.get::<u32>("missing"), None);
    }
}
