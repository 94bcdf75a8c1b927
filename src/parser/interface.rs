/// Output routing for parse results: help text goes to `print`, errors to
/// `print_error`.  Swapped out for an in-memory implementation in tests.
pub(crate) trait UserInterface {
    fn print(&self, message: String);
    fn print_error(&self, message: String);
}

#[derive(Default)]
pub(crate) struct ConsoleInterface {}

impl UserInterface for ConsoleInterface {
    fn print(&self, message: String) {
        println!("{message}");
    }

    fn print_error(&self, message: String) {
        eprintln!("{message}");
    }
}
