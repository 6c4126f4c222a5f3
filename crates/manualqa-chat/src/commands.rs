/// Session commands recognised before a line is treated as a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    /// `/manual <id>`; `None` when the id is missing.
    Manual(Option<String>),
    Clear,
    Manuals,
    Help,
}

impl Command {
    pub fn parse(input: &str) -> Option<Command> {
        let line = input.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            return Some(Command::Exit);
        }
        let rest = line.strip_prefix('/')?;
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (rest, None),
        };
        match name.to_ascii_lowercase().as_str() {
            "manual" => Some(Command::Manual(arg.map(str::to_string))),
            "clear" => Some(Command::Clear),
            "manuals" => Some(Command::Manuals),
            "help" => Some(Command::Help),
            "exit" | "quit" => Some(Command::Exit),
            _ => None,
        }
    }
}

pub const HELP: &str = "Commands:\n  /manual <id>  pin the manual scope\n  /clear        clear the manual scope\n  /manuals      list manuals\n  exit          quit";
