//! Shell command grammar and execution
//!
//! Commands are whitespace-separated, one per line, each with a
//! single-letter shortcut. Integer arguments are decimal with at most
//! eight digits; anything longer aborts the command with a clear message.

use simbly_core::diag;
use simbly_core::limits::MAX_INT_DIGITS;
use simbly_runtime::{Program, Runtime};

pub const HELP_RUN: &str = "run executes simbly programs. command usage -> run <source_file_name> <optional_integer_args_separated_by_whitespace>";
pub const HELP_KILL: &str = "kill stops the execution of the simbly program with the specified ID. command usage -> kill <non_negative_integer>";
pub const HELP_LIST: &str = "list lists the program that's currently running, and the total number of programs, on each runtime. command usage -> list";
pub const HELP_HELP: &str = "help prints this message. command usage -> help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run { file: String, args: Vec<i32> },
    Kill(i32),
    List,
    Help,
    Exit,
}

/// A decimal integer of at most [`MAX_INT_DIGITS`] digits.
fn parse_bounded_int(word: &str, too_long: &str, usage: &str) -> Result<i32, String> {
    if !word.bytes().all(|b| b.is_ascii_digit()) || word.is_empty() {
        return Err(usage.to_string());
    }
    if word.len() > MAX_INT_DIGITS {
        return Err(too_long.to_string());
    }
    Ok(word
        .parse()
        .expect("eight decimal digits always fit an i32"))
}

/// Parse one shell line. The caller filters out blank input first.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Err("empty input".to_string());
    };

    match cmd {
        "q" | "exit" | "quit" => Ok(Command::Exit),
        "h" | "help" => Ok(Command::Help),
        "l" | "list" => Ok(Command::List),
        "k" | "kill" => {
            let Some(word) = words.next() else {
                return Err(
                    "kill command expects an argument with the non-negative ID number of the program you want to kill"
                        .to_string(),
                );
            };
            let id = parse_bounded_int(
                word,
                &format!("program ID can't be longer than {MAX_INT_DIGITS} digits"),
                HELP_KILL,
            )?;
            Ok(Command::Kill(id))
        }
        "r" | "run" => {
            let Some(file) = words.next() else {
                return Err(HELP_RUN.to_string());
            };
            let mut args = Vec::new();
            for word in words {
                args.push(parse_bounded_int(
                    word,
                    &format!("integer value can't be longer than {MAX_INT_DIGITS} digits"),
                    HELP_RUN,
                )?);
            }
            Ok(Command::Run {
                file: file.to_string(),
                args,
            })
        }
        _ => Err("unrecognized command".to_string()),
    }
}

/// Execute one command against the runtime; false means quit.
pub fn execute(rt: &Runtime, cmd: Command) -> bool {
    match cmd {
        Command::Exit => return false,
        Command::Help => {
            // One message, so program output can't interleave the lines.
            diag::shell_msg(&format!("{HELP_RUN}\n{HELP_KILL}\n{HELP_LIST}\n{HELP_HELP}"));
        }
        Command::List => {
            for status in rt.list() {
                match status.current {
                    Some(id) => diag::shell_msg(&format!(
                        "Program {} is currently running on runtime {}. Total programs running {}.",
                        id, status.index, status.count
                    )),
                    None => diag::shell_msg(&format!(
                        "No programs are running on runtime {}",
                        status.index
                    )),
                }
            }
        }
        Command::Kill(id) => {
            if !rt.kill(id) {
                diag::shell_msg(&format!("couldn't find program with ID {id}"));
            }
        }
        Command::Run { file, args } => match Program::new(&file, &args) {
            Ok(prog) => rt.attach(prog),
            Err(_) => diag::shell_msg(&format!("file \"{file}\" doesn't exist")),
        },
    }
    true
}

/// The welcome banner: the text boxed in stars, twice as wide as the
/// text itself.
pub fn banner(text: &str) -> String {
    let width = 2 * text.len();
    let start = width / 4;

    let border = "*".repeat(width);
    let mut middle = String::with_capacity(width);
    middle.push('*');
    for _ in 1..start {
        middle.push(' ');
    }
    middle.push_str(text);
    for _ in (start + text.len())..(width - 1) {
        middle.push(' ');
    }
    middle.push('*');

    format!("{border}\n{middle}\n{border}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exit_variants() {
        for line in ["q", "exit", "quit"] {
            assert_eq!(parse_command(line), Ok(Command::Exit));
        }
    }

    #[test]
    fn test_parse_shortcuts() {
        assert_eq!(parse_command("l"), Ok(Command::List));
        assert_eq!(parse_command("list"), Ok(Command::List));
        assert_eq!(parse_command("h"), Ok(Command::Help));
        assert_eq!(parse_command("help"), Ok(Command::Help));
    }

    #[test]
    fn test_parse_run_with_args() {
        assert_eq!(
            parse_command("run prog.sim 42 17"),
            Ok(Command::Run {
                file: "prog.sim".to_string(),
                args: vec![42, 17],
            })
        );
        assert_eq!(
            parse_command("r prog.sim"),
            Ok(Command::Run {
                file: "prog.sim".to_string(),
                args: vec![],
            })
        );
    }

    #[test]
    fn test_parse_run_without_file_shows_usage() {
        assert_eq!(parse_command("run"), Err(HELP_RUN.to_string()));
    }

    #[test]
    fn test_parse_run_rejects_non_digit_args() {
        assert_eq!(parse_command("run prog.sim abc"), Err(HELP_RUN.to_string()));
        assert_eq!(parse_command("run prog.sim -5"), Err(HELP_RUN.to_string()));
    }

    #[test]
    fn test_parse_run_arg_digit_limit() {
        // Eight digits pass, nine abort the command.
        assert!(parse_command("run prog.sim 99999999").is_ok());
        let err = parse_command("run prog.sim 999999999").unwrap_err();
        assert!(err.contains("can't be longer"));
    }

    #[test]
    fn test_parse_kill() {
        assert_eq!(parse_command("kill 7"), Ok(Command::Kill(7)));
        assert_eq!(parse_command("k 7"), Ok(Command::Kill(7)));
    }

    #[test]
    fn test_parse_kill_without_id() {
        let err = parse_command("kill").unwrap_err();
        assert!(err.contains("kill command expects an argument"));
    }

    #[test]
    fn test_parse_kill_rejects_bad_ids() {
        assert_eq!(parse_command("kill abc"), Err(HELP_KILL.to_string()));
        let err = parse_command("kill 999999999").unwrap_err();
        assert!(err.contains("can't be longer"));
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(
            parse_command("frobnicate"),
            Err("unrecognized command".to_string())
        );
    }

    #[test]
    fn test_execute_exit_stops_the_loop() {
        let mut rt = Runtime::new(1);
        assert!(!execute(&rt, Command::Exit));
        rt.shutdown();
    }

    #[test]
    fn test_execute_run_missing_file_keeps_running() {
        let mut rt = Runtime::new(1);
        assert!(execute(
            &rt,
            Command::Run {
                file: "/no/such/file.sim".to_string(),
                args: vec![],
            }
        ));
        assert_eq!(rt.total_programs(), 0);
        rt.shutdown();
    }

    #[test]
    fn test_banner_shape() {
        let text = "Welcome to the Simbly interpreter!";
        let banner = banner(text);
        let lines: Vec<&str> = banner.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 2 * text.len());
        assert_eq!(lines[1].len(), 2 * text.len());
        assert_eq!(lines[0], lines[2]);
        assert!(lines[0].chars().all(|c| c == '*'));
        assert!(lines[1].starts_with('*') && lines[1].ends_with('*'));
        assert!(lines[1].contains(text));
    }
}
