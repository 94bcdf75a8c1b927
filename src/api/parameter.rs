use std::str::FromStr;

use crate::errors::DefinitionError;
use crate::model::Nargs;
use crate::param::{
    Action, ActionFlagData, ActionHandler, ChoiceEntry, FlagEffect, LeadingDash, Param, ParamKind,
    Value,
};

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(values: Vec<String>) -> Self {
        Value::Strs(values)
    }
}

fn base(name: impl Into<String>, kind: ParamKind, action: Action, nargs: Nargs) -> Param {
    Param {
        id: usize::MAX,
        name: name.into(),
        kind,
        action,
        nargs,
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

impl Param {
    /// A parameter supplied by position.  Takes exactly one value unless
    /// [`nargs`](Param::nargs) says otherwise; required whenever its arity does not
    /// permit zero values.
    ///
    /// ### Example
    /// ```
    /// # use declarg::{CommandLineParser, Param};
    /// let parser = CommandLineParser::new("program")
    ///     .add(Param::positional("item"))
    ///     .build();
    /// let parsed = parser.parse_tokens(&["x"]).unwrap();
    /// assert_eq!(parsed.get::<String>("item"), Some("x".to_string()));
    /// ```
    pub fn positional(name: impl Into<String>) -> Self {
        let mut param = base(name, ParamKind::Positional, Action::Store, Nargs::exactly(1));
        param.required = true;
        param
    }

    /// A parameter supplied via `--long` / `-short` prefixed tokens.  Takes exactly one
    /// value unless [`nargs`](Param::nargs) says otherwise.  A `--name` long form is
    /// derived from the name when no explicit long form is declared.
    pub fn option(name: impl Into<String>) -> Self {
        base(name, ParamKind::Option, Action::Store, Nargs::exactly(1))
    }

    /// A (typically boolean) option that does not accept any values.  Stores `true`
    /// when specified; use [`default`](Param::default) to invert the toggle.
    pub fn flag(name: impl Into<String>) -> Self {
        let mut param = base(
            name,
            ParamKind::Option,
            Action::StoreConst(Value::Bool(true)),
            Nargs::exactly(0),
        );
        param.default = Some(Value::Bool(false));
        param
    }

    /// A flag-like option that counts the number of times it was specified.  A combined
    /// short form such as `-vvv` counts once per repeated character, and an explicit
    /// integer value (`-v 3` / `-v=3`) is added verbatim.
    pub fn counter(name: impl Into<String>) -> Self {
        let mut param = base(
            name,
            ParamKind::Option,
            Action::Count { increment: 1 },
            Nargs::optional(),
        );
        param.default = Some(Value::Int(0));
        param
    }

    /// Captures every token after a literal `--`, verbatim and unparsed.
    pub fn pass_thru(name: impl Into<String>) -> Self {
        let mut param = base(name, ParamKind::PassThru, Action::StoreAll, Nargs::remainder());
        param.allow_leading_dash = LeadingDash::Always;
        param
    }

    /// The special positional through which parsing transfers to a child command.
    /// Register children with [`CommandLineParser::command`](crate::CommandLineParser::command);
    /// multi-word choices consume as many tokens as their word count.
    pub fn sub_command(name: impl Into<String>) -> Self {
        let mut param = base(
            name,
            ParamKind::SubCommand,
            Action::Concatenate,
            Nargs::one_or_more(),
        );
        param.required = true;
        param
    }

    /// A dispatch-action selector: a positional whose (possibly multi-word) choice
    /// selects a handler to run after parsing.
    pub fn dispatch(name: impl Into<String>) -> Self {
        let mut param = base(
            name,
            ParamKind::DispatchAction,
            Action::Concatenate,
            Nargs::one_or_more(),
        );
        param.required = true;
        param
    }

    /// A flag that triggers a handler when specified.  Runs before the dispatch phase
    /// by default; see [`after_main`](Param::after_main) and [`order`](Param::order).
    pub fn action_flag(name: impl Into<String>, handler: ActionHandler) -> Self {
        let mut param = Self::flag(name);
        param.action_flag = Some(ActionFlagData {
            order: 1,
            before_main: true,
            always_available: false,
            effect: FlagEffect::Call(handler),
        });
        param
    }

    /// The built-in help action: always available, fires even when parsing failed
    /// elsewhere, and exits with status 0.
    pub(crate) fn help_action() -> Self {
        let mut param = Self::flag("help")
            .long("--help")
            .short('h')
            .help("Show this help message and exit.");
        param.action_flag = Some(ActionFlagData {
            order: i32::MIN,
            before_main: true,
            always_available: true,
            effect: FlagEffect::Help,
        });
        param
    }

    // region Declaration Options

    /// The number of values this parameter expects.  For positionals this also adjusts
    /// required-ness (an arity permitting zero values makes the parameter optional);
    /// multi-value arities switch the storage action to accumulation.
    pub fn nargs(mut self, nargs: Nargs) -> Self {
        match self.kind {
            ParamKind::Positional => {
                self.action = if nargs == 1 || nargs == Nargs::optional() {
                    Action::Store
                } else {
                    Action::Append
                };
                if nargs.is_remainder() {
                    self.action = Action::Append;
                    self.allow_leading_dash = LeadingDash::Always;
                }
                self.required = !nargs.contains(0);
                self.nargs = nargs;
            }
            ParamKind::Option => {
                if nargs.contains(0) && !matches!(self.action, Action::Count { .. }) {
                    self.defer_error(DefinitionError::InvalidParameter {
                        param: self.name.clone(),
                        why: format!(
                            "nargs={nargs} would allow 0 values - use a flag or counter instead"
                        ),
                    });
                }
                if matches!(self.action, Action::Store | Action::Append) {
                    self.action = if nargs == 1 { Action::Store } else { Action::Append };
                }
                self.nargs = nargs;
            }
            _ => {
                self.defer_error(DefinitionError::InvalidParameter {
                    param: self.name.clone(),
                    why: "nargs cannot be overridden for this parameter type".to_string(),
                });
            }
        }
        self
    }

    /// Add a single-character short form, e.g. `'f'` for `-f`.
    pub fn short(mut self, short: char) -> Self {
        if short == '-' {
            self.defer_error(DefinitionError::InvalidOptionString {
                param: self.name.clone(),
                option: "-".repeat(2),
                why: "short options may not contain '-'".to_string(),
            });
        } else {
            self.short_opts.push(format!("-{short}"));
        }
        self
    }

    /// Add a multi-character short form such as `-foo`.  Multi-character shorts cannot
    /// participate in combined clusters.
    pub fn short_str(mut self, option: impl Into<String>) -> Self {
        let option = option.into();
        let body = option.strip_prefix('-').unwrap_or_default();
        if body.is_empty() || body.starts_with('-') || body.contains('-') || option.contains('=') {
            self.defer_error(DefinitionError::InvalidOptionString {
                param: self.name.clone(),
                option,
                why: "short options must start with a single '-' and may not contain '-' or '='"
                    .to_string(),
            });
        } else {
            self.short_opts.push(option);
        }
        self
    }

    /// Add an explicit `--long` form.  When none is declared, one is derived from the
    /// parameter name (underscores become dashes).
    pub fn long(mut self, option: impl Into<String>) -> Self {
        let option = option.into();
        let valid = option.strip_prefix("--").map(|body| {
            !body.is_empty() && !body.starts_with('-') && !body.ends_with('-') && !body.contains('=')
        });
        if valid == Some(true) {
            self.long_opts.push(option);
        } else {
            self.defer_error(DefinitionError::InvalidOptionString {
                param: self.name.clone(),
                option,
                why: "long options must start with '--', may not end with '-', and may not contain '='"
                    .to_string(),
            });
        }
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// The value surfaced when this parameter is never supplied.  For flags, a `true`
    /// default inverts the stored constant, so specifying the flag toggles to `false`.
    pub fn default(mut self, default: impl Into<Value>) -> Self {
        let default = default.into();
        if let (Action::StoreConst(constant), Value::Bool(toggle)) = (&mut self.action, &default) {
            *constant = Value::Bool(!toggle);
        }
        self.default = Some(default);
        self
    }

    /// The specific values users must pick from.
    pub fn choices(mut self, choices: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let choices: Vec<String> = choices.into_iter().map(Into::into).collect();
        if choices.is_empty() {
            self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "choices cannot be empty when specified".to_string(),
            });
        } else {
            self.choices = Some(choices);
        }
        self
    }

    /// Validate every value by attempting a `FromStr` conversion to `T`.  Typed
    /// parameters never participate in backtracking.
    pub fn with_type<T: FromStr>(mut self) -> Self {
        self.validator = Some(Box::new(|value: &str| match T::from_str(value) {
            Ok(_) => Ok(()),
            Err(_) => Err(format!(
                "bad value='{value}' for type={}",
                std::any::type_name::<T>()
            )),
        }));
        self
    }

    /// An environment variable to source this option's value from when it was not
    /// supplied on the command line.  May be repeated; the first set variable wins.
    pub fn env_var(mut self, name: impl Into<String>) -> Self {
        self.env_vars.push(name.into());
        self
    }

    pub fn allow_leading_dash(mut self, policy: LeadingDash) -> Self {
        self.allow_leading_dash = policy;
        self
    }

    /// The amount added per bare occurrence of a counter.
    pub fn increment(mut self, amount: i64) -> Self {
        match &mut self.action {
            Action::Count { increment } => *increment = amount,
            _ => self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "increment only applies to counters".to_string(),
            }),
        }
        self
    }

    /// Store a custom constant instead of `true` when this flag fires.
    pub fn constant(mut self, constant: impl Into<Value>) -> Self {
        match &mut self.action {
            Action::StoreConst(current) | Action::AppendConst(current) => {
                *current = constant.into()
            }
            _ => self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "constants only apply to flags".to_string(),
            }),
        }
        self
    }

    /// Accumulate the flag's constant into a list per occurrence, instead of storing it
    /// once.
    pub fn append_const(mut self, constant: impl Into<Value>) -> Self {
        match self.action {
            Action::StoreConst(_) => {
                self.action = Action::AppendConst(constant.into());
                self.default = None;
            }
            _ => self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "append_const only applies to flags".to_string(),
            }),
        }
        self
    }

    /// Make a sub-command selector optional: when no choice is provided, the parent
    /// command itself runs.
    pub fn optional(mut self) -> Self {
        match self.kind {
            ParamKind::SubCommand => {
                self.required = false;
                self.choice_map.push(ChoiceEntry {
                    choice: None,
                    help: None,
                    handler: None,
                });
            }
            _ => self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "optional() only applies to sub-command parameters".to_string(),
            }),
        }
        self
    }

    /// Register a dispatch choice and the handler to run when it is selected.  Choices
    /// may contain spaces; users provide the words as separate tokens.
    pub fn choice(mut self, choice: impl Into<String>, handler: ActionHandler) -> Self {
        self.register_choice(choice.into(), None, Some(handler));
        self
    }

    /// Like [`choice`](Param::choice), with help text for the choice.
    pub fn choice_help(
        mut self,
        choice: impl Into<String>,
        handler: ActionHandler,
        help: impl Into<String>,
    ) -> Self {
        self.register_choice(choice.into(), Some(help.into()), Some(handler));
        self
    }

    /// The handler to run when no choice is provided; makes the selector optional.
    pub fn default_choice(mut self, handler: ActionHandler) -> Self {
        if self.choice_map.iter().any(|entry| entry.choice.is_none()) {
            self.defer_error(DefinitionError::DuplicateChoice {
                param: self.name.clone(),
                choice: "(default)".to_string(),
            });
        } else {
            self.required = false;
            self.choice_map.push(ChoiceEntry {
                choice: None,
                help: None,
                handler: Some(handler),
            });
        }
        self
    }

    /// Document the help message for this parameter.
    pub fn help(mut self, description: impl Into<String>) -> Self {
        self.help = Some(description.into());
        self
    }

    /// Exclude this parameter from usage / help messages.
    pub fn hide(mut self) -> Self {
        self.hide = true;
        self
    }

    /// The relative execution order of this action flag within its phase.
    pub fn order(mut self, order: i32) -> Self {
        match &mut self.action_flag {
            Some(data) => data.order = order,
            None => self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "order only applies to action flags".to_string(),
            }),
        }
        self
    }

    /// Run this action flag after the dispatch phase instead of before it.
    pub fn after_main(mut self) -> Self {
        match &mut self.action_flag {
            Some(data) => {
                data.before_main = false;
                if data.always_available {
                    self.defer_error(DefinitionError::InvalidParameter {
                        param: self.name.clone(),
                        why: "always_available cannot be combined with after_main".to_string(),
                    });
                }
            }
            None => self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "after_main only applies to action flags".to_string(),
            }),
        }
        self
    }

    /// Allow this action flag to fire even when parsing failed elsewhere.
    pub fn always_available(mut self) -> Self {
        match &mut self.action_flag {
            Some(data) => {
                if data.before_main {
                    data.always_available = true;
                } else {
                    self.defer_error(DefinitionError::InvalidParameter {
                        param: self.name.clone(),
                        why: "always_available cannot be combined with after_main".to_string(),
                    });
                }
            }
            None => self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "always_available only applies to action flags".to_string(),
            }),
        }
        self
    }

    /// Exit with the given status after this action flag's handler runs.
    pub fn and_exit(mut self, code: i32) -> Self {
        match &mut self.action_flag {
            Some(data) => {
                if let FlagEffect::Call(handler) = data.effect {
                    data.effect = FlagEffect::CallExit(handler, code);
                }
            }
            None => self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "and_exit only applies to action flags".to_string(),
            }),
        }
        self
    }

    // endregion

    fn register_choice(&mut self, choice: String, help: Option<String>, handler: Option<ActionHandler>) {
        if !matches!(self.kind, ParamKind::SubCommand | ParamKind::DispatchAction) {
            self.defer_error(DefinitionError::InvalidParameter {
                param: self.name.clone(),
                why: "choices with handlers only apply to dispatch parameters".to_string(),
            });
            return;
        }
        if choice.is_empty() || choice.starts_with('-') {
            self.defer_error(DefinitionError::InvalidChoice {
                param: self.name.clone(),
                choice,
            });
            return;
        }
        if self.choice_map.iter().any(|entry| entry.choice.as_deref() == Some(choice.as_str())) {
            self.defer_error(DefinitionError::DuplicateChoice {
                param: self.name.clone(),
                choice,
            });
            return;
        }

        self.choice_map.push(ChoiceEntry {
            choice: Some(choice),
            help,
            handler,
        });
        self.update_choice_nargs();
    }

    /// Recompute the arity from the word counts of the registered choices; a default
    /// (valueless) choice contributes zero.
    pub(crate) fn update_choice_nargs(&mut self) {
        let counts: Vec<usize> = self
            .choice_map
            .iter()
            .map(|entry| {
                entry
                    .choice
                    .as_ref()
                    .map(|choice| choice.split(' ').count())
                    .unwrap_or(0)
            })
            .collect();
        if let Ok(nargs) = Nargs::of_set(counts) {
            self.nargs = nargs;
        }
    }

    pub(crate) fn add_choice_entry(&mut self, entry: ChoiceEntry) -> Result<(), DefinitionError> {
        if let Some(choice) = &entry.choice {
            if choice.is_empty() || choice.starts_with('-') {
                return Err(DefinitionError::InvalidChoice {
                    param: self.name.clone(),
                    choice: choice.clone(),
                });
            }
            if self
                .choice_map
                .iter()
                .any(|existing| existing.choice.as_deref() == Some(choice.as_str()))
            {
                return Err(DefinitionError::DuplicateChoice {
                    param: self.name.clone(),
                    choice: choice.clone(),
                });
            }
        }
        self.choice_map.push(entry);
        self.update_choice_nargs();
        Ok(())
    }

    fn defer_error(&mut self, error: DefinitionError) {
        if self.declaration_error.is_none() {
            self.declaration_error = Some(error);
        }
    }

    /// Finalize the declaration for the compiled registry: derive a long form when
    /// needed and order the option strings by decreasing length.
    pub(crate) fn into_compiled(mut self, id: usize) -> Self {
        self.id = id;
        if self.kind == ParamKind::Option && self.long_opts.is_empty() {
            self.long_opts.push(format!("--{}", self.name.replace('_', "-")));
        }
        self.long_opts.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        self.long_opts.dedup();
        self.short_opts.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        self.short_opts.dedup();
        self
    }
}
