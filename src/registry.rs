use std::collections::HashMap;

use crate::context::Context;
use crate::errors::{DefinitionError, UsageError};
use crate::param::{Group, GroupId, Param, ParamId, ParamKind};

/// Owns every compiled parameter and group across the full command tree.  Parameter and
/// group ids index into this store.
#[derive(Debug, Default)]
pub(crate) struct ParamStore {
    pub(crate) params: Vec<Param>,
    pub(crate) groups: Vec<Group>,
}

impl ParamStore {
    pub(crate) fn param(&self, id: ParamId) -> &Param {
        &self.params[id]
    }

    pub(crate) fn group(&self, id: GroupId) -> &Group {
        &self.groups[id]
    }
}

/// The result of resolving a short-option token against the registry.
#[derive(Debug)]
pub(crate) enum ShortLookup {
    /// `(param, inline value)` pairs; all but the last are valueless combo flags.
    Found(Vec<(ParamId, Option<String>)>),
    /// The token does not address any option at this level.
    NotFound,
    /// The token is an ambiguous mix of multi-character and single-character shorts.
    Ambiguous(UsageError),
}

/// The compiled parameter registry for one command level.
///
/// Built once per command when the declaration is compiled, then consulted immutably
/// during every parse.  A child level inherits and extends its parent's options and
/// groups.
#[derive(Debug, Clone)]
pub(crate) struct CommandParameters {
    pub(crate) positionals: Vec<ParamId>,
    pub(crate) options: Vec<ParamId>,
    pub(crate) groups: Vec<GroupId>,
    pub(crate) sub_command: Option<ParamId>,
    pub(crate) action: Option<ParamId>,
    pub(crate) pass_thru: Option<ParamId>,
    /// Exact option string (with dashes) to parameter.
    pub(crate) option_map: HashMap<String, ParamId>,
    /// Short option strings (without the leading dash), ordered by decreasing length
    /// then lexically, for greedy combo disambiguation.
    pub(crate) combo_option_map: Vec<(String, ParamId)>,
}

impl CommandParameters {
    pub(crate) fn process(
        local: &[ParamId],
        local_groups: &[GroupId],
        store: &ParamStore,
        parent: Option<&CommandParameters>,
    ) -> Result<Self, DefinitionError> {
        let mut positionals = Vec::default();
        let mut options = Vec::default();
        let mut pass_thru = parent.and_then(|parent| parent.pass_thru);

        let mut names: HashMap<&str, ParamId> = HashMap::default();
        for id in local {
            let param = store.param(*id);
            if names.insert(param.name.as_str(), *id).is_some() {
                return Err(DefinitionError::NameConflict(param.name.clone()));
            }

            match param.kind {
                ParamKind::Positional | ParamKind::SubCommand | ParamKind::DispatchAction => {
                    positionals.push(*id)
                }
                ParamKind::Option => options.push(*id),
                ParamKind::PassThru => {
                    if let Some(first) = pass_thru {
                        return Err(DefinitionError::DuplicatePassThru {
                            first: store.param(first).name.clone(),
                            second: param.name.clone(),
                        });
                    }
                    pass_thru = Some(*id);
                }
            }
        }

        let (sub_command, action) = Self::process_positionals(&positionals, store)?;

        let (options, option_map, combo_option_map) =
            Self::process_options(options, store, parent)?;
        Self::process_action_flags(&options, store)?;

        let mut groups: Vec<GroupId> = parent.map(|parent| parent.groups.clone()).unwrap_or_default();
        let mut local_sorted: Vec<GroupId> = local_groups.to_vec();
        // Nested groups validate before the groups containing them.
        local_sorted.sort_by_key(|id| std::cmp::Reverse(group_depth(store, *id)));
        groups.extend(local_sorted);

        Ok(Self {
            positionals,
            options,
            groups,
            sub_command,
            action,
            pass_thru,
            option_map,
            combo_option_map,
        })
    }

    fn process_positionals(
        positionals: &[ParamId],
        store: &ParamStore,
    ) -> Result<(Option<ParamId>, Option<ParamId>), DefinitionError> {
        let mut sub_command = None;
        let mut action = None;
        let mut dispatch: Option<ParamId> = None;
        let mut unfollowable: Option<(ParamId, &str)> = None;

        for id in positionals {
            let param = store.param(*id);
            if let Some((blocker, why)) = unfollowable {
                return Err(DefinitionError::UnfollowablePositional {
                    unfollowable: store.param(blocker).name.clone(),
                    why: why.to_string(),
                    param: param.name.clone(),
                });
            }

            match param.kind {
                ParamKind::SubCommand | ParamKind::DispatchAction => {
                    if let Some(first) = dispatch {
                        return Err(DefinitionError::MultipleDispatch {
                            first: store.param(first).name.clone(),
                            second: param.name.clone(),
                        });
                    }
                    dispatch = Some(*id);

                    if param.kind == ParamKind::SubCommand {
                        sub_command = Some(*id);
                        // Parsing transfers to the chosen child; nothing may follow.
                        unfollowable = Some((*id, "because it transfers parsing to a sub-command"));
                    } else {
                        action = Some(*id);
                        if param.choice_map.is_empty() {
                            return Err(DefinitionError::NoChoices(param.name.clone()));
                        }
                    }
                }
                _ => {
                    if param.nargs.contains(0) {
                        unfollowable =
                            Some((*id, "because it is a positional that is not required"));
                    } else if param.nargs.is_variable() && param.choices.is_none() {
                        unfollowable = Some((
                            *id,
                            "because it accepts a variable number of arguments with no specific choices defined",
                        ));
                    }
                }
            }
        }

        Ok((sub_command, action))
    }

    fn process_options(
        local: Vec<ParamId>,
        store: &ParamStore,
        parent: Option<&CommandParameters>,
    ) -> Result<(Vec<ParamId>, HashMap<String, ParamId>, Vec<(String, ParamId)>), DefinitionError>
    {
        let (mut options, mut option_map, mut combos) = match parent {
            Some(parent) => (
                parent.options.clone(),
                parent.option_map.clone(),
                parent
                    .combo_option_map
                    .iter()
                    .cloned()
                    .collect::<HashMap<String, ParamId>>(),
            ),
            None => (Vec::default(), HashMap::default(), HashMap::default()),
        };

        for id in local {
            let param = store.param(id);
            for option in param.long_opts.iter().chain(param.short_opts.iter()) {
                match option_map.get(option) {
                    Some(existing) if *existing != id => {
                        return Err(DefinitionError::OptionConflict {
                            option: option.clone(),
                            existing: store.param(*existing).name.clone(),
                            param: param.name.clone(),
                        });
                    }
                    _ => {
                        option_map.insert(option.clone(), id);
                    }
                }
            }
            for short in &param.short_opts {
                combos.insert(short[1..].to_string(), id);
            }
            options.push(id);
        }

        let mut combo_option_map: Vec<(String, ParamId)> = combos.into_iter().collect();
        combo_option_map.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        Ok((options, option_map, combo_option_map))
    }

    /// Two action flags in the same phase may only share an order value when they belong
    /// to the same mutually exclusive group; their relative execution order would
    /// otherwise be undefined.
    fn process_action_flags(options: &[ParamId], store: &ParamStore) -> Result<(), DefinitionError> {
        let mut flags: Vec<ParamId> = options
            .iter()
            .copied()
            .filter(|id| store.param(*id).action_flag.is_some())
            .collect();
        flags.sort_by_key(|id| {
            let param = store.param(*id);
            let data = param.action_flag.expect("internal error - filtered to action flags");
            (!data.before_main, data.order, param.name.clone())
        });

        let mut found_non_always = false;
        let mut buckets: HashMap<(bool, i32), Vec<ParamId>> = HashMap::default();
        for id in &flags {
            let param = store.param(*id);
            let data = param.action_flag.expect("internal error - filtered to action flags");
            if found_non_always && data.always_available {
                return Err(DefinitionError::ActionFlagOrderConflict {
                    order: data.order,
                    params: format!(
                        "always-available flag '{}' must be ordered before flags that are not always available",
                        param.usage()
                    ),
                });
            } else if !data.always_available {
                found_non_always = true;
            }
            buckets.entry((data.before_main, data.order)).or_default().push(*id);
        }

        for ((_, order), bucket) in buckets {
            if bucket.len() < 2 {
                continue;
            }
            let group = store.param(bucket[0]).group;
            let shared_exclusive = group
                .map(|gid| store.group(gid).mutually_exclusive)
                .unwrap_or(false)
                && bucket.iter().all(|id| store.param(*id).group == group);
            if !shared_exclusive {
                return Err(DefinitionError::ActionFlagOrderConflict {
                    order,
                    params: bucket
                        .iter()
                        .map(|id| store.param(*id).usage())
                        .collect::<Vec<String>>()
                        .join(", "),
                });
            }
        }

        Ok(())
    }

    // region Option Resolution

    /// Resolve a `--opt` / `--opt=value` token.  `None` means "not recognized here".
    pub(crate) fn long_option_to_param_value_pair(
        &self,
        token: &str,
    ) -> Option<(ParamId, Option<String>)> {
        match token.split_once('=') {
            Some((option, value)) => {
                let id = self.option_map.get(option)?;
                Some((*id, Some(value.to_string())))
            }
            None => {
                let id = self.option_map.get(token)?;
                Some((*id, None))
            }
        }
    }

    /// Resolve a `-o` / `-ovalue` / `-o=value` / `-abc` token into the parameter(s) it
    /// addresses.  When several pairs result (a combined cluster of single-character
    /// flags), all but the last must be valueless.
    pub(crate) fn short_option_to_param_value_pairs(
        &self,
        ctx: &Context,
        store: &ParamStore,
        token: &str,
    ) -> ShortLookup {
        if let Some((option, value)) = token.split_once('=') {
            return match self.option_map.get(option) {
                Some(id) => ShortLookup::Found(vec![(*id, Some(value.to_string()))]),
                None => ShortLookup::NotFound,
            };
        }

        if let Some(id) = self.option_map.get(token) {
            return ShortLookup::Found(vec![(*id, None)]);
        }

        let tail = &token[1..];
        if tail.len() < 2 {
            return ShortLookup::NotFound;
        }
        if let Some(error) = self.combo_ambiguity(store, token) {
            return ShortLookup::Ambiguous(error);
        }

        // The first character picks the parameter; the rest is its value when accepted.
        let mut chars = tail.chars();
        let key = chars.next().expect("internal error - tail has at least 2 chars");
        let value: String = chars.collect();
        let Some(first) = self.combo_lookup(key) else {
            return ShortLookup::NotFound;
        };

        if store.param(first).would_accept(ctx, &value, true) {
            return ShortLookup::Found(vec![(first, Some(value))]);
        }

        // Multi-char shorts can never be combined with each other, but single-char ones
        // can - every character must then be a valid combinable flag.
        let mut pairs = Vec::default();
        for c in tail.chars() {
            match self.combo_lookup(c) {
                Some(id) => pairs.push((id, None)),
                None => return ShortLookup::NotFound,
            }
        }
        ShortLookup::Found(pairs)
    }

    fn combo_lookup(&self, key: char) -> Option<ParamId> {
        self.combo_option_map
            .iter()
            .find(|(combo, _)| combo.len() == 1 && combo.chars().next() == Some(key))
            .map(|(_, id)| *id)
    }

    /// A combo token that interleaves a multi-character short form with single-character
    /// forms cannot be resolved deterministically.
    fn combo_ambiguity(&self, store: &ParamStore, token: &str) -> Option<UsageError> {
        let to_check = &token[1..];
        let mut ambiguous: Vec<ParamId> = Vec::default();

        for (combo, id) in &self.combo_option_map {
            if combo.len() > 1 {
                if combo.as_str() == to_check {
                    // An exact multi-char match would have been found in the option map;
                    // reaching here means it collided with nothing - allow it.
                    return None;
                }
                if to_check.contains(combo.as_str()) {
                    ambiguous.push(*id);
                    for (single, single_id) in &self.combo_option_map {
                        if single.len() == 1
                            && to_check.contains(single.as_str())
                            && !ambiguous.contains(single_id)
                        {
                            ambiguous.push(*single_id);
                        }
                    }
                }
            }
        }

        if ambiguous.is_empty() {
            None
        } else {
            Some(UsageError::AmbiguousCombo {
                token: token.to_string(),
                usages: ambiguous.iter().map(|id| store.param(*id).usage()).collect(),
            })
        }
    }

    /// Resolve any option-looking token, long or short.  `None` means unrecognized.
    pub(crate) fn option_param_value_pairs(
        &self,
        ctx: &Context,
        store: &ParamStore,
        token: &str,
    ) -> Option<Vec<(ParamId, Option<String>)>> {
        if token.starts_with("--") {
            return self.long_option_to_param_value_pair(token).map(|pair| vec![pair]);
        }
        if token.starts_with('-') && token != "-" {
            return match self.short_option_to_param_value_pairs(ctx, store, token) {
                ShortLookup::Found(pairs) => Some(pairs),
                _ => None,
            };
        }
        None
    }

    /// Whether an option-looking token addresses an option at this level that accepts
    /// values.  Used to produce clearer errors for misplaced sub-command options.
    pub(crate) fn find_option_that_accepts_values(
        &self,
        store: &ParamStore,
        token: &str,
    ) -> Option<ParamId> {
        let id = if token.starts_with("--") {
            let option = token.split_once('=').map(|(option, _)| option).unwrap_or(token);
            self.option_map.get(option).copied()
        } else if token.starts_with('-') && token.len() > 1 {
            match self.option_map.get(token) {
                Some(id) => Some(*id),
                None => token.chars().nth(1).and_then(|key| self.combo_lookup(key)),
            }
        } else {
            None
        };

        id.filter(|id| store.param(*id).accepts_values())
    }

    // endregion

    /// All required parameters that received zero values.  The sub-command positional is
    /// excluded - it is validated separately during command transfer.
    pub(crate) fn missing(&self, ctx: &Context, store: &ParamStore) -> Vec<ParamId> {
        let mut missing = Vec::default();

        for id in self.positionals.iter().chain(self.options.iter()) {
            if Some(*id) == self.sub_command {
                continue;
            }
            let param = store.param(*id);
            if param.required && param.group.is_none() && ctx.num_provided(*id) == 0 {
                missing.push(*id);
            }
        }
        if let Some(id) = self.pass_thru {
            let param = store.param(id);
            if param.required && param.group.is_none() && ctx.num_provided(id) == 0 {
                missing.push(id);
            }
        }

        missing
    }
}

fn group_depth(store: &ParamStore, id: GroupId) -> usize {
    let mut depth = 0;
    let mut current = store.group(id).parent;
    while let Some(parent) = current {
        depth += 1;
        current = store.group(parent).parent;
    }
    depth
}

/// One compiled command level: its registry plus the choice-to-child mapping.
#[derive(Debug)]
pub(crate) struct CompiledCommand {
    pub(crate) name: String,
    pub(crate) about: Option<String>,
    pub(crate) params: CommandParameters,
    pub(crate) children: Vec<(String, usize)>,
}

impl CompiledCommand {
    pub(crate) fn child(&self, choice: &str) -> Option<usize> {
        self.children
            .iter()
            .find(|(name, _)| name == choice)
            .map(|(_, index)| *index)
    }
}

/// The fully compiled command tree, shared read-only across parses.
#[derive(Debug)]
pub(crate) struct CommandTree {
    pub(crate) store: ParamStore,
    pub(crate) nodes: Vec<CompiledCommand>,
}

impl CommandTree {
    /// Search the not-yet-selected descendant commands for an option that would accept
    /// values and matches the token.  Used to detect sub-command options that were
    /// provided before the sub-command itself.
    pub(crate) fn find_nested_option_that_accepts_values(
        &self,
        node: usize,
        token: &str,
    ) -> Option<ParamId> {
        let mut pending: Vec<usize> = self.nodes[node]
            .children
            .iter()
            .map(|(_, index)| *index)
            .collect();

        while let Some(index) = pending.pop() {
            let child = &self.nodes[index];
            if let Some(id) = child.params.find_option_that_accepts_values(&self.store, token) {
                return Some(id);
            }
            pending.extend(child.children.iter().map(|(_, index)| *index));
        }

        None
    }
}
