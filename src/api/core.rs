use crate::config::CommandConfig;
use crate::errors::DefinitionError;
use crate::param::{ChoiceEntry, Group, GroupId, GroupMember, Param, ParamKind};
use crate::parser::{ConsoleInterface, GeneralParser, UserInterface};
use crate::registry::{CommandParameters, CommandTree, CompiledCommand, ParamStore};

/// A declared group of parameters, optionally mutually exclusive or mutually dependent.
/// Members are declared inside the group and added to the command together with it.
///
/// ### Example
/// ```
/// # use declarg::{CommandLineParser, GroupSpec, Param};
/// let parser = CommandLineParser::new("program")
///     .group(
///         GroupSpec::new("output").exclusive()
///             .add(Param::flag("json"))
///             .add(Param::flag("csv")),
///     )
///     .build();
/// # parser.parse_tokens(&["--json"]).unwrap();
/// ```
pub struct GroupSpec {
    name: String,
    mutually_exclusive: bool,
    mutually_dependent: bool,
    required: bool,
    params: Vec<Param>,
    nested: Vec<GroupSpec>,
    error: Option<DefinitionError>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mutually_exclusive: false,
            mutually_dependent: false,
            required: false,
            params: Vec::default(),
            nested: Vec::default(),
            error: None,
        }
    }

    /// If one member is provided, no other member may be.
    pub fn exclusive(mut self) -> Self {
        if self.mutually_dependent {
            self.error
                .get_or_insert(DefinitionError::ConflictingGroupKind(self.name.clone()));
        } else {
            self.mutually_exclusive = true;
        }
        self
    }

    /// If one member is provided, every other member must also be.
    pub fn dependent(mut self) -> Self {
        if self.mutually_exclusive {
            self.error
                .get_or_insert(DefinitionError::ConflictingGroupKind(self.name.clone()));
        } else {
            self.mutually_dependent = true;
        }
        self
    }

    /// Require at least one member of this group to be provided.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn add(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Nest another group inside this one.
    pub fn nest(mut self, group: GroupSpec) -> Self {
        self.nested.push(group);
        self
    }
}

/// The base command line parser.
///
/// Declare parameters with [`add`](CommandLineParser::add), groups with
/// [`group`](CommandLineParser::group), and sub-commands with
/// [`branch`](CommandLineParser::branch) + [`command`](CommandLineParser::command);
/// then [`build`](CommandLineParser::build) compiles the declaration, reporting any
/// definition errors.
///
/// ### Example
/// ```
/// # use declarg::{CommandLineParser, Param};
/// let parser = CommandLineParser::new("program")
///     .add(Param::flag("verbose").short('v'))
///     .add(Param::positional("item"))
///     .build();
///
/// let parsed = parser.parse_tokens(&["-v", "x"]).unwrap();
/// assert!(parsed.flag("verbose"));
/// assert_eq!(parsed.get::<String>("item"), Some("x".to_string()));
/// ```
pub struct CommandLineParser {
    program: String,
    about: Option<String>,
    config: CommandConfig,
    params: Vec<Param>,
    groups: Vec<GroupSpec>,
    children: Vec<(String, CommandLineParser)>,
    deferred_error: Option<DefinitionError>,
}

impl CommandLineParser {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            about: None,
            config: CommandConfig::default(),
            params: Vec::default(),
            groups: Vec::default(),
            children: Vec::default(),
            deferred_error: None,
        }
    }

    /// Document the about message for this command.
    /// If repeated, only the final message will apply.
    pub fn about(mut self, description: impl Into<String>) -> Self {
        self.about.replace(description.into());
        self
    }

    /// Override the parsing configuration.  Only the root command's configuration
    /// applies; it governs the whole tree.
    pub fn config(mut self, config: CommandConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a parameter.  The order of positional parameters corresponds to their
    /// positional order during parsing; option order does not affect semantics.
    pub fn add(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Add a group of parameters.  The group's members are added along with it.
    pub fn group(mut self, group: GroupSpec) -> Self {
        self.groups.push(group);
        self
    }

    /// Declare the sub-command selector through which parsing transfers to a child
    /// command.  Pair with [`command`](CommandLineParser::command).
    pub fn branch(mut self, param: Param) -> Self {
        if param.kind != ParamKind::SubCommand {
            self.deferred_error
                .get_or_insert(DefinitionError::InvalidParameter {
                    param: param.name.clone(),
                    why: "branch requires a sub-command parameter".to_string(),
                });
        }
        self.params.push(param);
        self
    }

    /// Register a sub-command for the given choice.  Choices may contain spaces; users
    /// provide the words as separate tokens.
    ///
    /// ### Example
    /// ```
    /// # use declarg::{CommandLineParser, Param};
    /// let parser = CommandLineParser::new("program")
    ///     .branch(Param::sub_command("command"))
    ///     .command("sync", |sub| sub.add(Param::flag("force")))
    ///     .build();
    ///
    /// let parsed = parser.parse_tokens(&["sync", "--force"]).unwrap();
    /// assert_eq!(parsed.commands(), &["sync".to_string()]);
    /// assert!(parsed.flag("force"));
    /// ```
    pub fn command(
        mut self,
        choice: impl Into<String>,
        setup_fn: impl FnOnce(CommandLineParser) -> CommandLineParser,
    ) -> Self {
        let choice = choice.into();
        let child = setup_fn(CommandLineParser::new(choice.clone()));
        self.children.push((choice, child));
        self
    }

    /// Build the command line parser as a Result.
    /// This finalizes the declaration and checks for definition errors (e.g. a repeated
    /// parameter name or option string).
    pub fn build_parser(self) -> Result<GeneralParser, DefinitionError> {
        self.build_with_interface(Box::new(ConsoleInterface::default()))
    }

    /// Build the command line parser.
    /// If a definition error is encountered, exits with error code `1`.
    pub fn build(self) -> GeneralParser {
        match self.build_parser() {
            Ok(parser) => parser,
            Err(error) => {
                eprintln!("{error}");
                std::process::exit(1);
            }
        }
    }

    pub(crate) fn build_with_interface(
        self,
        user_interface: Box<dyn UserInterface>,
    ) -> Result<GeneralParser, DefinitionError> {
        let config = self.config.clone();
        let mut store = ParamStore::default();
        let mut nodes = Vec::default();
        compile_node(self, None, true, &config, &mut store, &mut nodes)?;
        let tree = CommandTree { store, nodes };
        Ok(GeneralParser::new(tree, config, user_interface))
    }
}

fn compile_node(
    mut cli: CommandLineParser,
    parent: Option<&CommandParameters>,
    is_root: bool,
    config: &CommandConfig,
    store: &mut ParamStore,
    nodes: &mut Vec<CompiledCommand>,
) -> Result<usize, DefinitionError> {
    if let Some(error) = cli.deferred_error.take() {
        return Err(error);
    }

    if is_root && config.add_help {
        cli.params.insert(0, Param::help_action());
    }

    // Register the children as choices of the sub-command selector.
    let sub_index = cli
        .params
        .iter()
        .position(|param| param.kind == ParamKind::SubCommand);
    match sub_index {
        Some(index) => {
            for (choice, child) in &cli.children {
                cli.params[index].add_choice_entry(ChoiceEntry {
                    choice: Some(choice.clone()),
                    help: child.about.clone(),
                    handler: None,
                })?;
            }
            let has_real_choice = cli.params[index]
                .choice_map
                .iter()
                .any(|entry| entry.choice.is_some());
            if !has_real_choice {
                return Err(DefinitionError::NoChoices(cli.params[index].name.clone()));
            }
        }
        None if !cli.children.is_empty() => {
            return Err(DefinitionError::InvalidParameter {
                param: cli.program.clone(),
                why: "sub-commands require a sub-command parameter (see branch)".to_string(),
            });
        }
        None => {}
    }

    // Flatten groups: their members join this command's parameters.
    let mut pending: Vec<Param> = cli.params.drain(..).collect();
    let mut local_groups: Vec<GroupId> = Vec::default();
    for group in cli.groups.drain(..) {
        flatten_group(group, None, store, &mut pending, &mut local_groups)?;
    }

    let mut local_ids = Vec::default();
    for mut param in pending.drain(..) {
        if let Some(error) = param.declaration_error.take() {
            return Err(error);
        }
        let id = store.params.len();
        let param = param.into_compiled(id);
        if let Some(gid) = param.group {
            store.groups[gid].members.push(GroupMember::Param(id));
        }
        store.params.push(param);
        local_ids.push(id);
    }

    let registry = CommandParameters::process(&local_ids, &local_groups, store, parent)?;
    let node_index = nodes.len();
    nodes.push(CompiledCommand {
        name: cli.program,
        about: cli.about,
        params: registry,
        children: Vec::default(),
    });

    let parent_registry = nodes[node_index].params.clone();
    for (choice, child) in cli.children {
        let child_index = compile_node(child, Some(&parent_registry), false, config, store, nodes)?;
        nodes[node_index].children.push((choice, child_index));
    }

    Ok(node_index)
}

fn flatten_group(
    spec: GroupSpec,
    parent: Option<GroupId>,
    store: &mut ParamStore,
    pending: &mut Vec<Param>,
    local_groups: &mut Vec<GroupId>,
) -> Result<GroupId, DefinitionError> {
    if let Some(error) = spec.error {
        return Err(error);
    }

    let gid = store.groups.len();
    store.groups.push(Group {
        id: gid,
        name: spec.name.clone(),
        mutually_exclusive: spec.mutually_exclusive,
        mutually_dependent: spec.mutually_dependent,
        required: spec.required,
        members: Vec::default(),
        parent,
    });

    for mut param in spec.params {
        if spec.mutually_exclusive {
            if (param.kind.is_positional() && !param.nargs.contains(0))
                || param.kind == ParamKind::PassThru
            {
                return Err(DefinitionError::InvalidGroupMember {
                    param: param.name.clone(),
                    group: spec.name.clone(),
                    why: "such parameters cannot be mutually exclusive".to_string(),
                });
            } else if param.kind == ParamKind::Option && param.required {
                return Err(DefinitionError::InvalidGroupMember {
                    param: param.name.clone(),
                    group: spec.name.clone(),
                    why: "required parameters cannot be mutually exclusive (but the group can be required)"
                        .to_string(),
                });
            }
        }
        param.group = Some(gid);
        pending.push(param);
    }

    for nested in spec.nested {
        let child = flatten_group(nested, Some(gid), store, pending, local_groups)?;
        // Re-borrow: flatten_group may have grown the group list.
        store.groups[gid].members.push(GroupMember::Group(child));
    }

    local_groups.push(gid);
    Ok(gid)
}
