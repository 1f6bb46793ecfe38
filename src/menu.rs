//! Interactive menu
//!
//! Reads one of three single-character commands and the free-text fields
//! they need, and forwards each finished command to the session.

use std::io::{self, BufRead, Write};
use std::thread;

use tokio::sync::mpsc;
use tracing::debug;

use crate::client::UserCommand;

/// Menu entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuOption {
    Broadcast,
    Private,
    Exit,
}

/// Parse a menu line; only its first non-blank character counts
pub fn parse_option(line: &str) -> Option<MenuOption> {
    match line.trim_start().chars().next()?.to_ascii_uppercase() {
        'B' => Some(MenuOption::Broadcast),
        'P' => Some(MenuOption::Private),
        'E' => Some(MenuOption::Exit),
        _ => None,
    }
}

fn print_main_menu<W: Write>(output: &mut W) -> io::Result<()> {
    write!(output, "\n'B'roadcast message\n'P'rivate message\n'E'xit\n")?;
    output.flush()
}

/// Prompt and read one line; `None` on end of input
fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, text: &str) -> io::Result<Option<String>> {
    write!(output, "{}", text)?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Read the next complete command
///
/// End of input at the menu means exit; at a prompt it cancels only that
/// operation.
pub fn read_command<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> io::Result<UserCommand> {
    loop {
        print_main_menu(output)?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(UserCommand::Exit);
        }

        match parse_option(&line) {
            Some(MenuOption::Broadcast) => {
                match prompt(input, output, "Message to broadcast (Ctrl-d to cancel operation): ")? {
                    Some(body) => return Ok(UserCommand::Broadcast(body)),
                    None => writeln!(output, "\nOperation cancelled")?,
                }
            }
            Some(MenuOption::Private) => {
                let Some(recipient) =
                    prompt(input, output, "Username of recipient (Ctrl-d to cancel operation): ")?
                else {
                    writeln!(output, "\nOperation cancelled")?;
                    continue;
                };
                match prompt(input, output, "Message to user (Ctrl-d to cancel operation): ")? {
                    Some(body) => return Ok(UserCommand::Private { recipient, body }),
                    None => writeln!(output, "\nOperation cancelled")?,
                }
            }
            Some(MenuOption::Exit) => return Ok(UserCommand::Exit),
            None => writeln!(output, "Unknown option")?,
        }
    }
}

/// Run the menu on stdin in its own thread
///
/// Stops after forwarding `Exit` or when the session stops listening.
pub fn spawn_menu(tx: mpsc::Sender<UserCommand>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("menu".to_string()).spawn(move || {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        loop {
            let command = match read_command(&mut input, &mut output) {
                Ok(command) => command,
                Err(e) => {
                    debug!("Menu input failed: {}", e);
                    UserCommand::Exit
                }
            };
            let done = command == UserCommand::Exit;
            if tx.blocking_send(command).is_err() || done {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn read_all(script: &str) -> (Vec<UserCommand>, String) {
        let mut input = Cursor::new(script.as_bytes().to_vec());
        let mut output = Vec::new();
        let mut commands = Vec::new();
        loop {
            let command = read_command(&mut input, &mut output).unwrap();
            let done = command == UserCommand::Exit;
            commands.push(command);
            if done {
                break;
            }
        }
        (commands, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_parse_option() {
        assert_eq!(parse_option("B\n"), Some(MenuOption::Broadcast));
        assert_eq!(parse_option("p"), Some(MenuOption::Private));
        assert_eq!(parse_option("  e\n"), Some(MenuOption::Exit));
        assert_eq!(parse_option("x"), None);
        assert_eq!(parse_option("\n"), None);
    }

    #[test]
    fn test_broadcast_private_exit() {
        let (commands, _) = read_all("B\nhello world\nP\nbob\nsecret\nE\n");
        assert_eq!(
            commands,
            vec![
                UserCommand::Broadcast("hello world".into()),
                UserCommand::Private {
                    recipient: "bob".into(),
                    body: "secret".into()
                },
                UserCommand::Exit,
            ]
        );
    }

    #[test]
    fn test_unknown_option_reprompts() {
        let (commands, output) = read_all("z\nE\n");
        assert_eq!(commands, vec![UserCommand::Exit]);
        assert!(output.contains("Unknown option"));
    }

    #[test]
    fn test_end_of_input_at_prompt_cancels() {
        let (commands, output) = read_all("B\n");
        assert!(output.contains("Operation cancelled"));
        // Then end of input at the menu exits
        assert_eq!(commands, vec![UserCommand::Exit]);
    }

    #[test]
    fn test_end_of_input_at_menu_exits() {
        let (commands, _) = read_all("");
        assert_eq!(commands, vec![UserCommand::Exit]);
    }
}
