// File: ./src/cli.rs
//! Command-line parsing and help for the `lessoncal` binary.
use anyhow::Result;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Poll forever (default).
    Run,
    /// A single poll cycle, then exit.
    Once,
    /// Print the occurrences in the current window without touching state.
    Preview,
    Students,
    Balance { name: String, count: u32 },
    Link { name: String, recipient: String },
    Paid { lesson_id: String, paid: bool },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub root: Option<PathBuf>,
    pub command: Command,
}

impl Args {
    /// Parses arguments without the program name.
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut root = None;
        let mut rest = Vec::new();

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-r" | "--root" => {
                    let Some(path) = iter.next() else {
                        anyhow::bail!("--root needs a path");
                    };
                    root = Some(PathBuf::from(path));
                }
                "-h" | "--help" | "help" => {
                    return Ok(Self {
                        root,
                        command: Command::Help,
                    });
                }
                _ => rest.push(arg),
            }
        }

        let command = match rest.first().map(String::as_str) {
            None | Some("run") => Command::Run,
            Some("once") => Command::Once,
            Some("preview") => Command::Preview,
            Some("students") => Command::Students,
            Some("balance") => {
                let [_, name, count] = rest.as_slice() else {
                    anyhow::bail!("usage: balance <name> <count>");
                };
                let count = count
                    .parse()
                    .map_err(|_| anyhow::anyhow!("'{}' is not a lesson count", count))?;
                Command::Balance {
                    name: name.clone(),
                    count,
                }
            }
            Some("link") => {
                let [_, name, recipient] = rest.as_slice() else {
                    anyhow::bail!("usage: link <name> <recipient>");
                };
                Command::Link {
                    name: name.clone(),
                    recipient: recipient.clone(),
                }
            }
            Some("paid") => match rest.as_slice() {
                [_, id] => Command::Paid {
                    lesson_id: id.clone(),
                    paid: true,
                },
                [_, id, flag] if flag == "--unpaid" => Command::Paid {
                    lesson_id: id.clone(),
                    paid: false,
                },
                _ => anyhow::bail!("usage: paid <lesson-id> [--unpaid]"),
            },
            Some(other) => anyhow::bail!("Unknown command '{}'. Try --help.", other),
        };

        Ok(Self { root, command })
    }
}

pub fn print_help(binary_name: &str) {
    println!(
        "Lessoncal v{} - CalDAV lesson reminders and prepaid-balance tracking",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("USAGE:");
    println!("    {} [--root <path>] [COMMAND]", binary_name);
    println!();
    println!("COMMANDS:");
    println!("    run                          Poll the calendar and run jobs (default)");
    println!("    once                         Run a single poll cycle and exit");
    println!("    preview                      Print the lessons in the lookahead window");
    println!("    students                     List students and prepaid balances");
    println!("    balance <name> <count>       Set a student's prepaid lesson count");
    println!("    link <name> <recipient>      Send a student's reminders to <recipient>");
    println!("    paid <lesson-id> [--unpaid]  Mark a lesson paid (or unpaid)");
    println!();
    println!("OPTIONS:");
    println!("    -r, --root <path>     Use a different directory for config and data.");
    println!("    -h, --help            Show this help message.");
    println!();
    println!("CONFIG:");
    println!("    config.toml needs at least: url, username, password");
}
