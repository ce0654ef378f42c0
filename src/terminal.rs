use std::{
    io::{stdout, Stdout, Write},
    ops::{Deref, DerefMut},
};

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use ratatui::{backend::CrosstermBackend, TerminalOptions, Viewport};

type TerminalBackend<W> = ratatui::Terminal<CrosstermBackend<W>>;

/// Raw-mode terminal drawing into an inline viewport of `height` rows.
pub struct Terminal<W: Write> {
    inner: TerminalBackend<W>,
}

impl Terminal<Stdout> {
    pub fn new(height: u16) -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let backend = CrosstermBackend::new(stdout());
        let terminal = ratatui::Terminal::with_options(
            backend,
            TerminalOptions {
                viewport: Viewport::Inline(height),
            },
        );

        match terminal {
            Ok(inner) => Ok(Self { inner }),
            Err(err) => {
                let _ = disable_raw_mode();
                Err(err.into())
            }
        }
    }
}

impl<W: Write> Deref for Terminal<W> {
    type Target = TerminalBackend<W>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<W: Write> DerefMut for Terminal<W> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<W: Write> Drop for Terminal<W> {
    fn drop(&mut self) {
        let _ = self.inner.clear();
        let _ = disable_raw_mode();
    }
}
