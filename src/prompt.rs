use std::io::{self, BufRead, Write};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    style::Stylize,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tui_input::{backend::crossterm::EventHandler, Input};

use crate::error::Error;

/// Blocking "ask the user for a string" capability.
pub trait Prompter {
    fn ask(&mut self, label: &str) -> Result<String, Error>;

    /// Like [`Prompter::ask`] but without echoing the answer.
    fn ask_secret(&mut self, label: &str) -> Result<String, Error>;

    fn confirm(&mut self, question: &str, default: bool) -> Result<bool, Error> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = self.ask(&format!("{question} {hint} "))?.to_lowercase();
            match answer.as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => eprintln!("Please respond with yes or no (y/n)."),
            }
        }
    }
}

/// Prompts on the controlling terminal.
#[derive(Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn label(label: &str) -> Result<(), Error> {
        let mut stderr = io::stderr();
        write!(stderr, "{}", format!("[?] {label}").magenta())?;
        stderr.flush()?;
        Ok(())
    }
}

impl Prompter for TerminalPrompter {
    fn ask(&mut self, label: &str) -> Result<String, Error> {
        Self::label(label)?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(Error::Prompt("input closed".into()));
        }
        Ok(line.trim().to_string())
    }

    fn ask_secret(&mut self, label: &str) -> Result<String, Error> {
        Self::label(label)?;
        let result = {
            let _raw = RawMode::enable()?;
            read_hidden()
        };
        eprintln!();
        result
    }
}

struct RawMode;

impl RawMode {
    fn enable() -> Result<Self, Error> {
        enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn read_hidden() -> Result<String, Error> {
    let mut input = Input::default();
    loop {
        let event = event::read()?;
        if let Event::Key(key) = event {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Enter => return Ok(input.value().to_string()),
                KeyCode::Esc => return Err(Error::Prompt("cancelled".into())),
                KeyCode::Char('c') | KeyCode::Char('d')
                    if key.modifiers.contains(KeyModifiers::CONTROL) =>
                {
                    return Err(Error::Prompt("cancelled".into()))
                }
                _ => {
                    input.handle_event(&event);
                }
            }
        }
    }
}
