//! Terminal prompts

use cloudcode_deploy::Prompter;
use colored::Colorize;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, BufRead, IsTerminal, Write};

/// Reads answers from stdin
pub struct StdinPrompter;

impl StdinPrompter {
    fn read_line(&self) -> io::Result<String> {
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stdin closed while waiting for an answer",
            ));
        }
        Ok(line.trim().to_string())
    }
}

impl Prompter for StdinPrompter {
    fn confirm(&self, message: &str, default: bool) -> io::Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            print!("{} {} ", message.bold(), hint);
            io::stdout().flush()?;

            match self.read_line()?.to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => println!("  Please answer y or n"),
            }
        }
    }

    fn input(&self, message: &str, default: Option<&str>) -> io::Result<String> {
        match default {
            Some(d) if !d.is_empty() => print!("{} [{}]: ", message.bold(), d.cyan()),
            _ => print!("{}: ", message.bold()),
        }
        io::stdout().flush()?;

        let answer = self.read_line()?;
        if answer.is_empty() {
            Ok(default.unwrap_or_default().to_string())
        } else {
            Ok(answer)
        }
    }

    fn password(&self, message: &str) -> io::Result<String> {
        print!("{}: ", message.bold());
        io::stdout().flush()?;

        if !io::stdin().is_terminal() {
            return self.read_line();
        }

        terminal::enable_raw_mode()?;
        let result = read_hidden();
        terminal::disable_raw_mode()?;
        println!();
        result
    }
}

/// Read a line without echoing it. Raw mode must be enabled.
fn read_hidden() -> io::Result<String> {
    let mut value = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(value),
            KeyCode::Backspace => {
                value.pop();
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
            }
            KeyCode::Char(c) => value.push(c),
            KeyCode::Esc => {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"));
            }
            _ => {}
        }
    }
}
