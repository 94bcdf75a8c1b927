use std::collections::VecDeque;

use crate::config::CommandConfig;
use crate::context::Context;
use crate::errors::UsageError;
use crate::param::{Param, ParamId};
use crate::registry::{CommandTree, ShortLookup};

#[cfg(feature = "tracing_debug")]
use tracing::debug;

/// Internal control-flow signals raised while consuming tokens.  `Backtrack` is caught
/// by the main loop and never surfaces to users.
#[derive(Debug)]
pub(crate) enum Signal {
    Usage(UsageError),
    Backtrack,
}

impl From<UsageError> for Signal {
    fn from(error: UsageError) -> Self {
        Signal::Usage(error)
    }
}

/// How a single level of parsing concluded.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParseOutcome {
    /// All tokens at this level were consumed; no sub-command applies.
    Complete,
    /// Control (and the remaining tokens) transfers to a child command.
    Next { node: usize, remaining: Vec<String> },
}

/// Stateful parser used for a single pass of argument parsing at one command level.
pub(crate) struct CommandParser<'p> {
    tree: &'p CommandTree,
    node: usize,
    config: &'p CommandConfig,
    arg_deque: VecDeque<String>,
    /// Not-yet-satisfied positional parameters, in declaration order.
    positionals: Vec<ParamId>,
    /// The last parameter that actively consumed values, for backtracking.
    last_consumed: Option<ParamId>,
    /// Tokens this parser could not place; reported as unrecognized or handed onward.
    deferred: Vec<String>,
}

impl<'p> CommandParser<'p> {
    /// Parse all tokens held by the context at the given command level.
    pub(crate) fn parse_args(
        tree: &'p CommandTree,
        node: usize,
        config: &'p CommandConfig,
        ctx: &mut Context,
    ) -> Result<ParseOutcome, UsageError> {
        let mut parser = Self {
            tree,
            node,
            config,
            arg_deque: VecDeque::default(),
            positionals: tree.nodes[node].params.positionals.clone(),
            last_consumed: None,
            deferred: Vec::default(),
        };

        parser.run(ctx)?;
        ctx.remaining = std::mem::take(&mut parser.deferred);

        parser.env_fallback(ctx)?;

        let params = &tree.nodes[node].params;
        for gid in &params.groups {
            tree.store
                .group(*gid)
                .validate(ctx, &tree.store.params, &tree.store.groups)?;
        }

        if let Some(sub_id) = params.sub_command {
            let sub_param = tree.store.param(sub_id);
            if let Some(choice) = sub_param
                .selected_choice(ctx)?
                .and_then(|entry| entry.choice.clone())
            {
                let child = tree.nodes[node]
                    .child(&choice)
                    .expect("internal error - registered choices must map to a child command");

                // Unsatisfied positionals at this level cannot be explained by the
                // transfer; missing options are re-checked at the final level.
                let missing_positionals: Vec<ParamId> = params
                    .missing(ctx, &tree.store)
                    .into_iter()
                    .filter(|id| tree.store.param(*id).kind.is_positional())
                    .collect();
                if !missing_positionals.is_empty() && !config.allow_missing {
                    return Err(parser.params_missing(missing_positionals));
                }

                return Ok(ParseOutcome::Next {
                    node: child,
                    remaining: std::mem::take(&mut ctx.remaining),
                });
            }
        }

        let missing = params.missing(ctx, &tree.store);
        let dispatch_missing = params
            .action
            .map(|action| missing.contains(&action))
            .unwrap_or(false);
        if !missing.is_empty() && !config.allow_missing && !dispatch_missing {
            // A missing dispatch action is excluded - its own error message is better.
            return Err(parser.params_missing(missing));
        } else if !ctx.remaining.is_empty() && !config.ignore_unknown {
            return Err(UsageError::NoSuchOption(format!(
                "unrecognized arguments: {}",
                ctx.remaining.join(" ")
            )));
        }

        Ok(ParseOutcome::Complete)
    }

    fn param(&self, id: ParamId) -> &'p Param {
        self.tree.store.param(id)
    }

    fn params_missing(&self, ids: Vec<ParamId>) -> UsageError {
        UsageError::ParamsMissing {
            usages: ids.into_iter().map(|id| self.param(id).usage()).collect(),
            reason: None,
        }
    }

    /// The main token-classification loop.
    fn run(&mut self, ctx: &mut Context) -> Result<(), UsageError> {
        self.arg_deque = self.extract_pass_thru(ctx);

        while let Some(arg) = self.arg_deque.pop_front() {
            #[cfg(feature = "tracing_debug")]
            {
                debug!("processing token: {arg:?}");
            }

            let result = if arg == "--" || arg.starts_with("---") {
                match self.try_remainder(ctx, &arg) {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(Signal::Usage(UsageError::NoSuchOption(format!(
                        "invalid argument: {arg}"
                    )))),
                    Err(signal) => Err(signal),
                }
            } else if arg.starts_with("--") {
                self.handle_long(ctx, &arg)
            } else if arg.starts_with('-') && arg != "-" {
                self.handle_short(ctx, &arg)
            } else {
                self.handle_positional(ctx, arg.clone())
            };

            match result {
                Ok(()) => {}
                // The rolled-back tokens are back on the queue; re-enter the loop to
                // retry positional handling from the restored positional.
                Err(Signal::Backtrack) => {}
                Err(Signal::Usage(error)) => return Err(error),
            }
        }

        Ok(())
    }

    /// Everything after the first bare `--` goes verbatim into the pass-through
    /// parameter; parsing proceeds only on the tokens before it.  A required
    /// pass-through that is absent fails lazily, via the missing-params check.
    fn extract_pass_thru(&mut self, ctx: &mut Context) -> VecDeque<String> {
        let remaining = std::mem::take(&mut ctx.remaining);
        if let Some(pt_id) = self.tree.nodes[self.node].params.pass_thru {
            if let Some(separator) = remaining.iter().position(|token| token == "--") {
                let mut head = remaining;
                let tail = head.split_off(separator + 1);
                head.pop();
                self.param(pt_id).take_all(ctx, tail);
                return VecDeque::from(head);
            }
        }
        VecDeque::from(remaining)
    }

    fn handle_positional(&mut self, ctx: &mut Context, arg: String) -> Result<(), Signal> {
        if self.positionals.is_empty() {
            // It may belong to a not-yet-resolved sub-command.
            self.deferred.push(arg);
            return Ok(());
        }

        let id = self.positionals.remove(0);
        let param = self.param(id);
        if param.nargs.is_remainder() {
            return self.take_remainder(ctx, id, &arg).map_err(Signal::Usage);
        }

        let found = match param.take_action(ctx, Some(&arg), false) {
            Ok(found) => found,
            Err(error) => {
                // Restored so a subsequent sub-command transfer attempt is not precluded.
                self.positionals.insert(0, id);
                return Err(Signal::Usage(error));
            }
        };

        match self.consume_values(ctx, id, found) {
            Ok(_) => {
                self.last_consumed = Some(id);
                Ok(())
            }
            Err(Signal::Backtrack) => {
                self.positionals.insert(0, id);
                Err(Signal::Backtrack)
            }
            Err(signal) => Err(signal),
        }
    }

    fn handle_long(&mut self, ctx: &mut Context, arg: &str) -> Result<(), Signal> {
        let params = &self.tree.nodes[self.node].params;
        match params.long_option_to_param_value_pair(arg) {
            Some((id, value)) => self.handle_option_value(ctx, id, value, false),
            None => {
                self.check_sub_command_options(arg)?;
                if !self.try_remainder(ctx, arg)? {
                    self.deferred.push(arg.to_string());
                }
                Ok(())
            }
        }
    }

    fn handle_short(&mut self, ctx: &mut Context, arg: &str) -> Result<(), Signal> {
        let params = &self.tree.nodes[self.node].params;
        match params.short_option_to_param_value_pairs(ctx, &self.tree.store, arg) {
            ShortLookup::Found(pairs) => {
                let (last, head) = pairs
                    .split_last()
                    .expect("internal error - a resolved short option has at least one pair");
                // In a combined cluster, only the final option may accept values.
                for (id, _) in head {
                    self.param(*id).take_action(ctx, None, true)?;
                }
                let (id, value) = last.clone();
                self.handle_option_value(ctx, id, value, true)
            }
            ShortLookup::Ambiguous(error) => Err(Signal::Usage(error)),
            ShortLookup::NotFound => {
                if self.try_remainder(ctx, arg)? {
                    return Ok(());
                }
                self.check_sub_command_options(arg)?;
                if !self.positionals.is_empty() {
                    // A short token might coincide with a positional value (e.g. '-5').
                    match self.handle_positional(ctx, arg.to_string()) {
                        Ok(()) => Ok(()),
                        Err(Signal::Backtrack) => Err(Signal::Backtrack),
                        Err(Signal::Usage(_)) => {
                            self.deferred.push(arg.to_string());
                            Ok(())
                        }
                    }
                } else {
                    self.deferred.push(arg.to_string());
                    Ok(())
                }
            }
        }
    }

    /// Shared value/constant resolution for long options and the last short in a combo.
    fn handle_option_value(
        &mut self,
        ctx: &mut Context,
        id: ParamId,
        value: Option<String>,
        short_combo: bool,
    ) -> Result<(), Signal> {
        let param = self.param(id);
        if value.is_some() || (param.accepts_none() && !param.accepts_values()) {
            param.take_action(ctx, value.as_deref(), short_combo)?;
            return Ok(());
        }

        let found = self.consume_values(ctx, id, 0)?;
        if found == 0 {
            if param.accepts_none() {
                param.take_action(ctx, None, short_combo)?;
            }
        } else {
            self.last_consumed = Some(id);
        }
        Ok(())
    }

    /// Before a sub-command has been chosen, an option-looking token may actually belong
    /// to a not-yet-selected sub-command; report that specifically instead of a generic
    /// missing-argument error.
    fn check_sub_command_options(&self, arg: &str) -> Result<(), Signal> {
        if self.positionals.is_empty() {
            return Ok(());
        }
        match self.tree.find_nested_option_that_accepts_values(self.node, arg) {
            Some(id) => Err(Signal::Usage(UsageError::BadValue {
                usage: self.param(id).usage(),
                message: "subcommand arguments must be provided after the subcommand".to_string(),
            })),
            None => Ok(()),
        }
    }

    /// When exactly one positional with remainder arity is outstanding, it captures the
    /// token and everything after it, unconditionally.
    fn try_remainder(&mut self, ctx: &mut Context, arg: &str) -> Result<bool, Signal> {
        let applies = self.positionals.len() == 1
            && self.param(self.positionals[0]).nargs.is_remainder();
        if applies {
            let id = self.positionals.remove(0);
            self.take_remainder(ctx, id, arg)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn take_remainder(&mut self, ctx: &mut Context, id: ParamId, first: &str) -> Result<(), UsageError> {
        let param = self.param(id);
        param.take_action(ctx, Some(first), false)?;
        while let Some(value) = self.arg_deque.pop_front() {
            param.take_action(ctx, Some(&value), false)?;
        }
        self.last_consumed = Some(id);
        Ok(())
    }

    /// Greedily pull values from the queue for the given parameter until its arity is
    /// satisfied, an option boundary is hit, or the queue empties.
    fn consume_values(
        &mut self,
        ctx: &mut Context,
        id: ParamId,
        mut found: usize,
    ) -> Result<usize, Signal> {
        let param = self.param(id);
        loop {
            if param.nargs.max_reached(found) {
                return self.finalize_consume(ctx, id, None, found, None);
            }

            let Some(value) = self.arg_deque.pop_front() else {
                return self.finalize_consume(ctx, id, None, found, None);
            };

            if value.starts_with("--") {
                // A long-option-looking token always ends consumption.
                return self.finalize_consume(ctx, id, Some(value), found, None);
            } else if value.starts_with('-') && value != "-" {
                let params = &self.tree.nodes[self.node].params;
                if params
                    .option_param_value_pairs(ctx, &self.tree.store, &value)
                    .is_some()
                {
                    return self.finalize_consume(ctx, id, Some(value), found, None);
                }
                if let Err(Signal::Usage(error)) = self.check_sub_command_options(&value) {
                    return self.finalize_consume(ctx, id, Some(value), found, Some(error));
                }
                if !param.would_accept(ctx, &value, false) {
                    let error = UsageError::NoSuchOption(format!("invalid argument: {value}"));
                    return self.finalize_consume(ctx, id, Some(value), found, Some(error));
                }
            }

            match param.take_action(ctx, Some(&value), false) {
                Ok(count) => found += count,
                Err(error) => {
                    return self.finalize_consume(ctx, id, Some(value), found, Some(error));
                }
            }
        }
    }

    /// Check arity satisfaction at the end of consumption, attempting rollback before
    /// degrading to a missing-argument error.
    fn finalize_consume(
        &mut self,
        ctx: &mut Context,
        id: ParamId,
        value: Option<String>,
        found: usize,
        exc: Option<UsageError>,
    ) -> Result<usize, Signal> {
        let param = self.param(id);
        // Tokens available to downstream positionals, excluding the boundary token.
        let queued = self.arg_deque.len();

        if param.nargs.satisfied(found) {
            if let Some(value) = value {
                self.arg_deque.push_front(value);
            }
            // A satisfied greedy parameter may still have over-consumed values that the
            // trailing positionals need.
            if self.config.allow_backtrack && queued < self.positionals_needed() {
                if let Some(rolled) = self.rollback_self(ctx, id, found, queued) {
                    return Ok(found - rolled);
                }
            }
            #[cfg(feature = "tracing_debug")]
            {
                debug!("consumed {found} values for {param:?}");
            }
            return Ok(found);
        }

        if let Some(value) = value {
            self.arg_deque.push_front(value);
        }

        if self.config.allow_backtrack && found >= 2 {
            if let Some(rolled) = self.rollback_self(ctx, id, found, queued) {
                return Ok(found - rolled);
            }
        }
        if self.config.allow_backtrack
            && param.kind.is_positional()
            && self.cross_backtrack(ctx, id, queued)
        {
            return Err(Signal::Backtrack);
        }

        if let Some(error) = exc {
            return Err(Signal::Usage(error));
        }
        Err(Signal::Usage(UsageError::missing_because(
            param.usage(),
            format!("expected {} values, but only found {found}", param.nargs.min()),
        )))
    }

    /// Roll back the smallest number of this parameter's trailing values that leaves its
    /// own arity satisfied while covering the minimums of all remaining positionals.
    fn positionals_needed(&self) -> usize {
        self.positionals
            .iter()
            .map(|id| effective_min(self.param(*id)))
            .sum()
    }

    fn rollback_self(
        &mut self,
        ctx: &mut Context,
        id: ParamId,
        found: usize,
        queued: usize,
    ) -> Option<usize> {
        let param = self.param(id);
        let needed: usize = self.positionals_needed();

        for count in param.can_pop_counts(ctx) {
            if count >= found {
                // Only values from the current consumption pass may roll back.
                break;
            }
            if count + queued >= needed {
                let popped = param
                    .pop_last(ctx, count)
                    .expect("internal error - a viable rollback count must pop");
                #[cfg(feature = "tracing_debug")]
                {
                    debug!("rolled back {count} values from {param:?}");
                }
                for value in popped.into_iter().rev() {
                    self.arg_deque.push_front(value);
                }
                return Some(count);
            }
        }
        None
    }

    /// The aggressive cross-parameter form: undo part of the previous parameter's
    /// consumption, reset the current positional's partial values, and signal the main
    /// loop to restart positional handling from that same positional.
    fn cross_backtrack(&mut self, ctx: &mut Context, current_id: ParamId, queued: usize) -> bool {
        let Some(prev_id) = self.last_consumed else {
            return false;
        };
        if prev_id == current_id {
            return false;
        }

        let prev = self.param(prev_id);
        let current = self.param(current_id);
        let current_partial = current_count(ctx, current);
        let needed: usize = effective_min(current)
            + self
                .positionals
                .iter()
                .map(|id| effective_min(self.param(*id)))
                .sum::<usize>();

        for count in prev.can_pop_counts(ctx) {
            if count + current_partial + queued >= needed {
                let Some(popped) = prev.pop_last(ctx, count) else {
                    return false;
                };
                let reset = current.reset(ctx);
                #[cfg(feature = "tracing_debug")]
                {
                    debug!("cross-backtrack: moved {count} values from {prev:?} toward {current:?}");
                }
                // Restore original token order: the previous parameter's tokens came
                // before the current positional's partial values.
                for value in reset.into_iter().rev() {
                    self.arg_deque.push_front(value);
                }
                for value in popped.into_iter().rev() {
                    self.arg_deque.push_front(value);
                }
                return true;
            }
        }
        false
    }

    /// Source still-unset options from their declared environment variables, first set
    /// variable wins.
    fn env_fallback(&self, ctx: &mut Context) -> Result<(), UsageError> {
        let params = &self.tree.nodes[self.node].params;
        for id in &params.options {
            let param = self.param(*id);
            if param.env_vars.is_empty() || ctx.num_provided(*id) > 0 {
                continue;
            }

            for var in &param.env_vars {
                let Ok(raw) = std::env::var(var) else {
                    continue;
                };
                match param.take_action(ctx, Some(&raw), false) {
                    Ok(_) => {}
                    Err(error) => {
                        if self.config.strict_env {
                            return Err(error);
                        }
                        // The rejected value must not count as provided.
                        ctx.clear_provided(*id);
                        #[cfg(feature = "tracing_debug")]
                        {
                            debug!("ignoring invalid env value from {var}: {error}");
                        }
                        let _ = error;
                    }
                }
                break;
            }
        }
        Ok(())
    }
}

/// The number of values a positional still needs during backtracking viability checks:
/// its minimum arity, or 1 when its minimum is 0 but it accepts exactly 1 value.
fn effective_min(param: &Param) -> usize {
    let min = param.nargs.min();
    if min > 0 {
        min
    } else if param.nargs.max() == Some(1) && param.nargs.contains(1) {
        1
    } else {
        0
    }
}

fn current_count(ctx: &Context, param: &Param) -> usize {
    ctx.peek_value(param.id)
        .map(|value| value.strs().len())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Param;
    use crate::model::Nargs;

    #[test]
    fn effective_min_counts() {
        let exact = Param::positional("a").nargs(Nargs::exactly(2)).into_compiled(0);
        assert_eq!(effective_min(&exact), 2);

        let optional = Param::positional("b").nargs(Nargs::optional()).into_compiled(1);
        assert_eq!(effective_min(&optional), 1);

        let any = Param::positional("c").nargs(Nargs::zero_or_more()).into_compiled(2);
        assert_eq!(effective_min(&any), 0);
    }
}
