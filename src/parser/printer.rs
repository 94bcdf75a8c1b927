use terminal_size::{terminal_size, Width};

use crate::param::{Param, ParamKind};
use crate::parser::interface::UserInterface;
use crate::registry::CommandTree;

// We'll target 95% of the total width, to ensure the renderer doesn't literally use the
// full space.
const TARGET_TOTAL_FACTOR: f64 = 0.95;
const FALLBACK_WIDTH: usize = 80;
const PADDING_WIDTH: usize = 2;
const MAIN_INDENT: usize = 1;

/// Renders generated usage/help text for one command level.
pub(crate) struct Printer {
    width: usize,
}

impl Printer {
    pub(crate) fn terminal() -> Self {
        let width = if let Some((Width(terminal_width), _)) = terminal_size() {
            (terminal_width as f64 * TARGET_TOTAL_FACTOR) as usize
        } else {
            FALLBACK_WIDTH
        };
        Self { width }
    }

    pub(crate) fn print_help(
        &self,
        tree: &CommandTree,
        node: usize,
        program: &str,
        user_interface: &dyn UserInterface,
    ) {
        let command = &tree.nodes[node];
        let params = &command.params;

        let mut usage = format!("usage: {program}");
        for id in &params.options {
            let param = tree.store.param(*id);
            if !param.hide {
                usage.push(' ');
                usage.push_str(&option_usage(param));
            }
        }
        for id in &params.positionals {
            let param = tree.store.param(*id);
            if !param.hide {
                usage.push(' ');
                usage.push_str(&positional_usage(param));
            }
        }
        user_interface.print(usage);

        if let Some(about) = &command.about {
            user_interface.print(String::default());
            user_interface.print(about.clone());
        }

        let positionals: Vec<&Param> = params
            .positionals
            .iter()
            .chain(params.pass_thru.iter())
            .map(|id| tree.store.param(*id))
            .filter(|param| !param.hide)
            .collect();
        if !positionals.is_empty() {
            user_interface.print("positional arguments:".to_string());
            let mut entries = Vec::default();
            for param in &positionals {
                entries.push((positional_usage(param), param.help.clone()));
                for entry in &param.choice_map {
                    if let (Some(choice), help) = (&entry.choice, &entry.help) {
                        entries.push((format!("  {choice}"), help.clone()));
                    }
                }
            }
            self.print_entries(user_interface, entries);
        }

        let options: Vec<&Param> = params
            .options
            .iter()
            .map(|id| tree.store.param(*id))
            .filter(|param| !param.hide)
            .collect();
        if !options.is_empty() {
            user_interface.print("options:".to_string());
            let entries = options
                .iter()
                .map(|param| (option_help_key(param), param.help.clone()))
                .collect();
            self.print_entries(user_interface, entries);
        }

        if !command.children.is_empty() {
            user_interface.print("subcommands:".to_string());
            let entries = command
                .children
                .iter()
                .map(|(choice, index)| (choice.clone(), tree.nodes[*index].about.clone()))
                .collect();
            self.print_entries(user_interface, entries);
        }
    }

    fn print_entries(
        &self,
        user_interface: &dyn UserInterface,
        entries: Vec<(String, Option<String>)>,
    ) {
        let left_width = entries
            .iter()
            .map(|(left, _)| left.len())
            .max()
            .unwrap_or(0);
        let help_width = self
            .width
            .saturating_sub(MAIN_INDENT + left_width + PADDING_WIDTH)
            .max(16);
        let indent = MAIN_INDENT + left_width + PADDING_WIDTH;

        for (left, help) in entries {
            match help {
                None => user_interface.print(format!("{0:1$}{left}", "", MAIN_INDENT)),
                Some(help) => {
                    let mut lines = wrap(&help, help_width).into_iter();
                    let first = lines.next().unwrap_or_default();
                    user_interface.print(format!(
                        "{0:1$}{left:2$}{0:3$}{first}",
                        "", MAIN_INDENT, left_width, PADDING_WIDTH
                    ));
                    for line in lines {
                        user_interface.print(format!("{0:1$}{line}", "", indent));
                    }
                }
            }
        }
    }
}

fn metavar(param: &Param) -> String {
    param.name.to_ascii_uppercase()
}

fn positional_usage(param: &Param) -> String {
    let name = metavar(param);
    if param.kind == ParamKind::PassThru {
        return format!("[-- {name} ...]");
    }

    match (param.nargs.min(), param.nargs.max()) {
        (0, None) => format!("[{name} ...]"),
        (_, None) => format!("{name} [...]"),
        (0, Some(1)) => format!("[{name}]"),
        (1, Some(1)) => name,
        (0, Some(_)) => format!("[{name} ...]"),
        _ => format!("{name} ..."),
    }
}

fn option_usage(param: &Param) -> String {
    let form = param
        .short_opts
        .last()
        .or(param.long_opts.last())
        .cloned()
        .unwrap_or_default();
    let piece = if param.accepts_values() {
        format!("{form} {}", metavar(param))
    } else {
        form
    };
    if param.required {
        piece
    } else {
        format!("[{piece}]")
    }
}

fn option_help_key(param: &Param) -> String {
    let mut forms: Vec<&str> = param.short_opts.iter().map(AsRef::as_ref).collect();
    forms.extend(param.long_opts.iter().map(AsRef::<str>::as_ref));
    let joined = forms.join(", ");
    if param.accepts_values() {
        format!("{joined} {}", metavar(param))
    } else {
        joined
    }
}

fn wrap(paragraph: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::default();
    let mut current = String::default();

    for word in paragraph.split(' ') {
        if word.is_empty() {
            continue;
        }
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + word.len() + 1 <= width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", vec![])]
    #[case("one", vec!["one"])]
    #[case("alpha beta gamma", vec!["alpha beta", "gamma"])]
    #[case("a b c d e", vec!["a b c d e"])]
    fn wrapping(#[case] text: &str, #[case] expected: Vec<&str>) {
        assert_eq!(wrap(text, 10), expected);
    }
}
