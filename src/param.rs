use std::fmt;

use crate::context::{Context, Parsed};
use crate::errors::UsageError;
use crate::model::Nargs;

pub(crate) type ParamId = usize;
pub(crate) type GroupId = usize;

/// A handler executed when an `Action` dispatch choice is selected, or by an action flag.
pub type ActionHandler = fn(&Parsed);

/// A parsed value, as accumulated in the [`Context`] during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Nothing has been stored yet.
    Unset,
    Bool(bool),
    Int(i64),
    Str(String),
    Strs(Vec<String>),
}

impl Value {
    pub(crate) fn strs(&self) -> &[String] {
        match self {
            Value::Strs(values) => values,
            _ => &[],
        }
    }
}

/// The behavior executed on each incoming raw token, resolved once at declaration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    /// Exactly one value; a second occurrence is a usage error.
    Store,
    /// Accumulate values into a list, bounded by the declared arity.
    Append,
    /// Flag-style: store a constant, no incoming value.
    StoreConst(Value),
    /// Flag-style: append a constant per occurrence.
    AppendConst(Value),
    /// Numeric accumulation; accepts bare occurrences or explicit signed values.
    Count { increment: i64 },
    /// Pass-through: store the raw token list unprocessed.
    StoreAll,
    /// Choice-map: accumulate words, validating prefixes of multi-word choices.
    Concatenate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    Positional,
    Option,
    PassThru,
    SubCommand,
    DispatchAction,
}

impl ParamKind {
    pub(crate) fn is_positional(&self) -> bool {
        matches!(
            self,
            ParamKind::Positional | ParamKind::SubCommand | ParamKind::DispatchAction
        )
    }
}

/// How values beginning with a dash are treated for a given parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeadingDash {
    /// Accept a dash-prefixed value only when it looks like a negative number.
    #[default]
    Numeric,
    /// Accept any dash-prefixed value (as long as it is not a known option string).
    Always,
    /// Reject every dash-prefixed value, numbers included.
    Never,
}

/// One registered choice of a `SubCommand` or dispatch `Action` parameter.
#[derive(Clone)]
pub(crate) struct ChoiceEntry {
    /// `None` represents the default choice, selected when no value is provided.
    pub(crate) choice: Option<String>,
    pub(crate) help: Option<String>,
    pub(crate) handler: Option<ActionHandler>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlagEffect {
    /// Print generated help text and exit 0.
    Help,
    /// Run the handler when triggered.
    Call(ActionHandler),
    /// Run the handler, then exit with the given code.
    CallExit(ActionHandler, i32),
}

impl fmt::Debug for ChoiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChoiceEntry({:?})", self.choice)
    }
}

/// Action-flag configuration: execution phase and relative order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ActionFlagData {
    pub(crate) order: i32,
    pub(crate) before_main: bool,
    pub(crate) always_available: bool,
    pub(crate) effect: FlagEffect,
}

type Validator = Box<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// A declared parameter: a positional, an option, a flag, a counter, a pass-through, or
/// a sub-command/dispatch selector.  Construct via the builder constructors
/// (`Param::positional`, `Param::option`, `Param::flag`, ...).
///
/// `Param` is consulted immutably during every parse; per-invocation state lives in the
/// [`Context`] only, so sequential parses of the same declaration do not interfere.
pub struct Param {
    pub(crate) id: ParamId,
    pub(crate) name: String,
    pub(crate) kind: ParamKind,
    pub(crate) action: Action,
    pub(crate) nargs: Nargs,
    pub(crate) required: bool,
    pub(crate) default: Option<Value>,
    pub(crate) choices: Option<Vec<String>>,
    pub(crate) choice_map: Vec<ChoiceEntry>,
    pub(crate) long_opts: Vec<String>,
    pub(crate) short_opts: Vec<String>,
    pub(crate) env_vars: Vec<String>,
    pub(crate) allow_leading_dash: LeadingDash,
    pub(crate) validator: Option<Validator>,
    pub(crate) action_flag: Option<ActionFlagData>,
    pub(crate) group: Option<GroupId>,
    pub(crate) help: Option<String>,
    pub(crate) hide: bool,
    /// Builder-detected declaration problem, surfaced when the command is compiled.
    pub(crate) declaration_error: Option<crate::errors::DefinitionError>,
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ParamKind::Positional => "Positional",
            ParamKind::Option => "Option",
            ParamKind::PassThru => "PassThru",
            ParamKind::SubCommand => "SubCommand",
            ParamKind::DispatchAction => "Action",
        };
        write!(
            f,
            "{kind}[{name}, nargs={nargs}, required={required}]",
            name = self.usage(),
            nargs = self.nargs,
            required = self.required,
        )
    }
}

impl Param {
    /// Whether this parameter may fire without a value (e.g. flags, counters).
    pub(crate) fn accepts_none(&self) -> bool {
        matches!(
            self.action,
            Action::StoreConst(_) | Action::AppendConst(_) | Action::Count { .. }
        )
    }

    /// Whether this parameter consumes values at all.
    pub(crate) fn accepts_values(&self) -> bool {
        !matches!(self.action, Action::StoreConst(_) | Action::AppendConst(_))
    }

    /// The canonical usage string referenced by error messages, e.g. `--foo / -f`.
    pub(crate) fn usage(&self) -> String {
        if self.kind.is_positional() || self.kind == ParamKind::PassThru {
            return self.name.clone();
        }

        let mut parts: Vec<&str> = self.long_opts.iter().map(AsRef::as_ref).collect();
        parts.extend(self.short_opts.iter().map(AsRef::<str>::as_ref));

        if parts.is_empty() {
            self.name.clone()
        } else {
            parts.join(" / ")
        }
    }

    /// Single-character short forms, used for combined flags such as `-abc`.
    pub(crate) fn combinable(&self) -> impl Iterator<Item = char> + '_ {
        self.short_opts
            .iter()
            .filter(|opt| opt.len() == 2)
            .filter_map(|opt| opt.chars().nth(1))
    }

    /// The initial value placed in the context on first access.
    pub(crate) fn init_value(&self) -> Value {
        match &self.action {
            Action::Store | Action::StoreAll => Value::Unset,
            Action::Append | Action::AppendConst(_) | Action::Concatenate => {
                Value::Strs(Vec::default())
            }
            Action::StoreConst(_) => self.default.clone().unwrap_or(Value::Unset),
            Action::Count { .. } => match &self.default {
                Some(Value::Int(start)) => Value::Int(*start),
                _ => Value::Int(0),
            },
        }
    }

    // region Argument Handling

    /// Apply a single incoming token (or a bare, valueless occurrence) to the context.
    /// Returns the number of values recorded (1).
    pub(crate) fn take_action(
        &self,
        ctx: &mut Context,
        value: Option<&str>,
        short_combo: bool,
    ) -> Result<usize, UsageError> {
        match &self.action {
            Action::Append | Action::Concatenate => {
                let count = ctx.parsing_value(self).strs().len();
                if self.nargs.max_reached(count) {
                    return Err(UsageError::BadValue {
                        usage: self.usage(),
                        message: format!(
                            "cannot accept any additional args with nargs={}: val_count={count}",
                            self.nargs
                        ),
                    });
                }
            }
            Action::Store => {
                if let Value::Str(existing) = ctx.parsing_value(self) {
                    return Err(UsageError::BadValue {
                        usage: self.usage(),
                        message: format!(
                            "received value={value:?} but a stored value='{existing}' already exists"
                        ),
                    });
                }
            }
            _ => {}
        }

        ctx.record_action(self.id, 1);

        match &self.action {
            Action::StoreConst(constant) => {
                self.reject_value(value)?;
                ctx.set_parsing_value(self.id, constant.clone());
            }
            Action::AppendConst(constant) => {
                self.reject_value(value)?;
                let mut values = ctx.parsing_value(self);
                if let (Value::Strs(list), Value::Str(text)) = (&mut values, constant) {
                    list.push(text.clone());
                }
                ctx.set_parsing_value(self.id, values);
            }
            Action::Count { increment } => {
                let amount = match value {
                    Some(value) => self.prepare_count(value, short_combo)?,
                    None => *increment,
                };
                let current = match ctx.parsing_value(self) {
                    Value::Int(current) => current,
                    _ => 0,
                };
                ctx.set_parsing_value(self.id, Value::Int(current + amount));
            }
            Action::Store => {
                let value = self.expect_value(value)?;
                self.validate(value)?;
                ctx.set_parsing_value(self.id, Value::Str(value.to_string()));
            }
            Action::Append => {
                let value = self.expect_value(value)?;
                self.validate(value)?;
                let mut values = ctx.parsing_value(self);
                if let Value::Strs(list) = &mut values {
                    list.push(value.to_string());
                }
                ctx.set_parsing_value(self.id, values);
            }
            Action::Concatenate => {
                let value = self.expect_value(value)?;
                // A multi-word token is split and validated word by word, so a prefix of
                // a multi-word choice is accepted pending further tokens.
                let mut values = ctx.parsing_value(self);
                for word in value.split(' ').filter(|word| !word.is_empty()) {
                    self.validate_choice_word(values.strs(), word)?;
                    if let Value::Strs(list) = &mut values {
                        list.push(word.to_string());
                    }
                }
                ctx.set_parsing_value(self.id, values);
            }
            Action::StoreAll => {
                unreachable!("internal error - pass-through parameters use take_all")
            }
        }

        Ok(1)
    }

    /// Store the verbatim token list for a pass-through parameter.
    pub(crate) fn take_all(&self, ctx: &mut Context, values: Vec<String>) {
        ctx.record_action(self.id, values.len().max(1) as isize);
        ctx.set_parsing_value(self.id, Value::Strs(values));
    }

    /// Whether the next queued token would be accepted as a value, without recording it.
    pub(crate) fn would_accept(&self, ctx: &Context, value: &str, short_combo: bool) -> bool {
        match &self.action {
            Action::Store | Action::StoreAll => {
                if !matches!(ctx.peek_value(self.id), None | Some(Value::Unset)) {
                    return false;
                }
            }
            Action::Append | Action::Concatenate => {
                let count = ctx
                    .peek_value(self.id)
                    .map(|value| value.strs().len())
                    .unwrap_or(0);
                if self.nargs.max_reached(count) {
                    return false;
                }
            }
            Action::StoreConst(_) | Action::AppendConst(_) => return false,
            Action::Count { .. } => return self.prepare_count(value, short_combo).is_ok(),
        }

        if matches!(self.action, Action::Concatenate) {
            self.accepts_choice_word(ctx, value)
        } else {
            self.validate(value).is_ok()
        }
    }

    fn reject_value(&self, value: Option<&str>) -> Result<(), UsageError> {
        match value {
            None => Ok(()),
            Some(value) => Err(UsageError::BadValue {
                usage: self.usage(),
                message: format!("received value='{value}' but no values are accepted"),
            }),
        }
    }

    fn expect_value<'v>(&self, value: Option<&'v str>) -> Result<&'v str, UsageError> {
        value.ok_or_else(|| UsageError::missing(self.usage()))
    }

    /// Interpret a counter value: an explicit signed integer, or the trailing characters
    /// of a short-option combo such as `-vvv`.
    fn prepare_count(&self, value: &str, short_combo: bool) -> Result<i64, UsageError> {
        if let Ok(amount) = value.parse::<i64>() {
            return Ok(amount);
        }

        let combinable: Vec<char> = self.combinable().collect();
        if short_combo
            && !value.is_empty()
            && !combinable.is_empty()
            && value.chars().all(|c| combinable.contains(&c))
        {
            // +1 for the short option that preceded this value.
            return Ok(value.len() as i64 + 1);
        }

        Err(UsageError::BadValue {
            usage: self.usage(),
            message: format!("bad counter value='{value}'"),
        })
    }

    /// Validate a single incoming value against the leading-dash policy, the declared
    /// choices, and the configured type.
    pub(crate) fn validate(&self, value: &str) -> Result<(), UsageError> {
        if value.len() > 1 && value.starts_with('-') {
            let acceptable = match self.allow_leading_dash {
                LeadingDash::Always => true,
                LeadingDash::Numeric => is_numeric(value),
                LeadingDash::Never => false,
            };
            if !acceptable {
                return Err(UsageError::BadValue {
                    usage: self.usage(),
                    message: format!("invalid value='{value}'"),
                });
            }
        } else if matches!(self.allow_leading_dash, LeadingDash::Never) && value.starts_with('-') {
            return Err(UsageError::BadValue {
                usage: self.usage(),
                message: format!("invalid value='{value}'"),
            });
        }

        if let Some(choices) = &self.choices {
            if !choices.iter().any(|choice| choice == value) {
                return Err(UsageError::InvalidChoice {
                    usage: self.usage(),
                    value: value.to_string(),
                    choices: choices.clone(),
                });
            }
        }

        if let Some(validator) = &self.validator {
            validator(value).map_err(|message| UsageError::BadValue {
                usage: self.usage(),
                message,
            })?;
        }

        Ok(())
    }

    /// Incremental choice-map validation: a prefix of a multi-word choice is accepted
    /// pending further tokens.
    fn validate_choice_word(&self, words: &[String], value: &str) -> Result<(), UsageError> {
        let candidate = if words.is_empty() {
            value.to_string()
        } else {
            format!("{} {value}", words.join(" "))
        };

        let choices: Vec<&str> = self
            .choice_map
            .iter()
            .filter_map(|entry| entry.choice.as_deref())
            .collect();
        if choices.iter().any(|choice| *choice == candidate) {
            return Ok(());
        }

        if let Some(max) = self.nargs.max() {
            if words.len() + 1 > max {
                return Err(UsageError::BadValue {
                    usage: self.usage(),
                    message: "too many values".to_string(),
                });
            }
        }

        let prefix = format!("{candidate} ");
        if choices.iter().any(|choice| choice.starts_with(&prefix)) {
            Ok(())
        } else {
            Err(UsageError::InvalidChoice {
                usage: self.usage(),
                value: candidate,
                choices: choices.iter().map(|c| c.to_string()).collect(),
            })
        }
    }

    fn accepts_choice_word(&self, ctx: &Context, value: &str) -> bool {
        let words = ctx
            .peek_value(self.id)
            .map(|current| current.strs().to_vec())
            .unwrap_or_default();
        self.validate_choice_word(&words, value).is_ok()
    }

    /// The final value surfaced after parsing: applies defaults, checks required-ness,
    /// and re-validates the arity of accumulated values.
    pub(crate) fn result_value(&self, ctx: &Context) -> Result<Value, UsageError> {
        let value = ctx.peek_value(self.id).cloned().unwrap_or_else(|| self.init_value());

        match &self.action {
            // Constant and counting actions surface their accumulated value as-is; the
            // declared arity constrains tokens, not occurrences.
            Action::StoreConst(_) | Action::AppendConst(_) | Action::Count { .. } => Ok(value),
            Action::Store => match value {
                Value::Unset => {
                    if self.required {
                        Err(UsageError::missing(self.usage()))
                    } else {
                        Ok(self.default.clone().unwrap_or(Value::Unset))
                    }
                }
                value => Ok(value),
            },
            Action::StoreAll => match value {
                Value::Unset => {
                    if self.required {
                        Err(UsageError::missing_because(
                            self.usage(),
                            "missing pass thru args separated from others with '--'",
                        ))
                    } else {
                        Ok(self.default.clone().unwrap_or(Value::Unset))
                    }
                }
                value => Ok(value),
            },
            Action::Append | Action::Concatenate => {
                let mut values = match value {
                    Value::Strs(values) => values,
                    _ => Vec::default(),
                };
                if values.is_empty() {
                    if let Some(default) = &self.default {
                        match default {
                            Value::Strs(defaults) => values = defaults.clone(),
                            Value::Str(default) => values.push(default.clone()),
                            _ => {}
                        }
                    }
                }

                let count = values.len();
                if count == 0 && !self.nargs.contains(0) {
                    if self.required {
                        return Err(UsageError::missing(self.usage()));
                    }
                } else if !self.nargs.contains(count) && !self.nargs.satisfied(count) {
                    return Err(UsageError::BadValue {
                        usage: self.usage(),
                        message: format!(
                            "expected nargs={} values but found {count}",
                            self.nargs
                        ),
                    });
                }

                if matches!(self.action, Action::Concatenate) {
                    if count == 0 {
                        return Ok(Value::Unset);
                    }
                    return Ok(Value::Str(values.join(" ")));
                }

                Ok(Value::Strs(values))
            }
        }
    }

    /// The selected choice entry for a choice-map parameter, or `None` when the default
    /// (valueless) choice applies and none was registered.
    pub(crate) fn selected_choice(&self, ctx: &Context) -> Result<Option<&ChoiceEntry>, UsageError> {
        match self.result_value(ctx)? {
            Value::Str(choice) => self
                .choice_map
                .iter()
                .find(|entry| entry.choice.as_deref() == Some(choice.as_str()))
                .map(Some)
                .ok_or_else(|| UsageError::InvalidChoice {
                    usage: self.usage(),
                    value: choice.clone(),
                    choices: self
                        .choice_map
                        .iter()
                        .filter_map(|entry| entry.choice.clone())
                        .collect(),
                }),
            _ => Ok(self.choice_map.iter().find(|entry| entry.choice.is_none())),
        }
    }

    // endregion

    // region Backtracking Support

    /// Backtracking only applies to untyped append-style parameters with variable arity;
    /// converted values cannot be un-parsed back into their original tokens.
    pub(crate) fn is_backtrackable(&self) -> bool {
        matches!(self.action, Action::Append)
            && self.nargs.is_variable()
            && self.validator.is_none()
    }

    /// The rollback counts that would leave this parameter's own arity satisfied.
    pub(crate) fn can_pop_counts(&self, ctx: &Context) -> Vec<usize> {
        if !self.is_backtrackable() {
            return Vec::default();
        }

        let count = ctx
            .peek_value(self.id)
            .map(|value| value.strs().len())
            .unwrap_or(0);
        (1..count).filter(|k| self.nargs.satisfied(count - k)).collect()
    }

    /// Roll back the trailing `count` values, returning them in their original order.
    pub(crate) fn pop_last(&self, ctx: &mut Context, count: usize) -> Option<Vec<String>> {
        let values = ctx.peek_value(self.id)?.strs().to_vec();
        if !self.is_backtrackable()
            || count == 0
            || count >= values.len()
            || !self.nargs.satisfied(values.len() - count)
        {
            return None;
        }

        let (kept, popped) = values.split_at(values.len() - count);
        ctx.set_parsing_value(self.id, Value::Strs(kept.to_vec()));
        ctx.record_action(self.id, -(count as isize));
        Some(popped.to_vec())
    }

    /// Reset every partially-consumed value, returning them in their original order.
    pub(crate) fn reset(&self, ctx: &mut Context) -> Vec<String> {
        if !matches!(self.action, Action::Append) || self.validator.is_some() {
            return Vec::default();
        }

        let values = ctx
            .peek_value(self.id)
            .map(|value| value.strs().to_vec())
            .unwrap_or_default();
        if !values.is_empty() {
            ctx.set_parsing_value(self.id, self.init_value());
            ctx.clear_provided(self.id);
        }
        values
    }

    // endregion
}

/// A dash-prefixed value is treated as numeric only when it matches a plain negative
/// integer or decimal.
pub(crate) fn is_numeric(text: &str) -> bool {
    let Some(rest) = text.strip_prefix('-') else {
        return false;
    };

    match rest.split_once('.') {
        Some((whole, frac)) => {
            !frac.is_empty()
                && whole.chars().all(|c| c.is_ascii_digit())
                && frac.chars().all(|c| c.is_ascii_digit())
        }
        None => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupMember {
    Param(ParamId),
    Group(GroupId),
}

/// A named collection of parameters and/or nested groups, with optional mutual
/// exclusion or mutual dependency constraints validated after parsing.
#[derive(Debug)]
pub(crate) struct Group {
    pub(crate) id: GroupId,
    pub(crate) name: String,
    pub(crate) mutually_exclusive: bool,
    pub(crate) mutually_dependent: bool,
    pub(crate) required: bool,
    pub(crate) members: Vec<GroupMember>,
    pub(crate) parent: Option<GroupId>,
}

impl Group {
    fn member_usage(&self, member: &GroupMember, params: &[Param], groups: &[Group]) -> String {
        match member {
            GroupMember::Param(id) => params[*id].usage(),
            GroupMember::Group(id) => groups[*id].name.clone(),
        }
    }

    fn member_required(&self, member: &GroupMember, params: &[Param], groups: &[Group]) -> bool {
        match member {
            GroupMember::Param(id) => params[*id].required,
            GroupMember::Group(id) => groups[*id].required,
        }
    }

    /// Partition members into provided/missing and enforce the group constraints.
    /// Conflict errors win over missing-argument errors when both could apply.
    pub(crate) fn validate(
        &self,
        ctx: &mut Context,
        params: &[Param],
        groups: &[Group],
    ) -> Result<(), UsageError> {
        let mut provided = Vec::default();
        let mut missing = Vec::default();

        for member in &self.members {
            let count = match member {
                GroupMember::Param(id) => ctx.num_provided(*id),
                GroupMember::Group(id) => ctx.num_provided_group(*id),
            };
            if count > 0 {
                provided.push(member);
            } else {
                missing.push(member);
            }
        }

        ctx.record_group_action(self.id, provided.len() as isize);

        if self.mutually_exclusive && provided.len() >= 2 {
            return Err(UsageError::ParamConflict {
                usages: provided
                    .iter()
                    .map(|member| self.member_usage(member, params, groups))
                    .collect(),
                reason: "they are mutually exclusive - only one is allowed".to_string(),
            });
        }

        if self.mutually_dependent && !provided.is_empty() && !missing.is_empty() {
            let provided_str = provided
                .iter()
                .map(|member| self.member_usage(member, params, groups))
                .collect::<Vec<String>>()
                .join(", ");
            let be = if provided.len() == 1 { "was" } else { "were" };
            return Err(UsageError::ParamsMissing {
                usages: missing
                    .iter()
                    .map(|member| self.member_usage(member, params, groups))
                    .collect(),
                reason: Some(format!("because {provided_str} {be} provided")),
            });
        }

        let required = self.required
            || (self.mutually_dependent
                && self
                    .members
                    .iter()
                    .any(|member| self.member_required(member, params, groups)));
        if required && ctx.num_provided_group(self.id) == 0 {
            return Err(UsageError::ParamsMissing {
                usages: missing
                    .iter()
                    .map(|member| self.member_usage(member, params, groups))
                    .collect(),
                reason: None,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("-5", true)]
    #[case("-5.5", true)]
    #[case("-.5", true)]
    #[case("-123", true)]
    #[case("-", false)]
    #[case("-x", false)]
    #[case("-5x", false)]
    #[case("-5.", false)]
    #[case("--5", false)]
    #[case("5", false)]
    fn numeric(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(is_numeric(text), expected);
    }
}
