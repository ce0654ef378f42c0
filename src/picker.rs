use std::io::{self, Write};

use crossterm::event::{self, Event, KeyEventKind};
use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};
use ratatui::prelude::*;
use ratatui::widgets::*;
use unicode_width::UnicodeWidthStr;

use crate::{entry::ServerEntry, input::InputBuffer, terminal::Terminal};

const INFO_TEXT_NORMAL_MODE: &str =
    "(Esc) quit | (↑) move up | (↓) move down | (Enter) connect | (/) search";
const INFO_TEXT_SEARCH_MODE: &str =
    "(Esc) quit search | (↑) move up | (↓) move down | (Enter) connect";
const SEARCH_SYMBOL: &str = "🔍 ";
const COLUMNS: usize = 4;

enum Mode {
    Normal,
    Search,
}

/// Interactive fuzzy selector over the server list.
pub struct Picker {
    data: Vec<ServerEntry>,
    state: TableState,
    // indices into `data` of the rows currently shown
    visible: Vec<usize>,
    input_buffer: InputBuffer,
    mode: Mode,
}

impl Picker {
    pub fn new(data: Vec<ServerEntry>) -> Self {
        let visible = (0..data.len()).collect();
        Self {
            state: TableState::default().with_selected(Some(0)),
            visible,
            input_buffer: InputBuffer::new(SEARCH_SYMBOL),
            mode: Mode::Normal,
            data,
        }
    }

    /// Rows needed to show every entry plus header, search box and help line.
    pub fn height(&self) -> u16 {
        self.data.len() as u16 + 6
    }

    pub fn select(
        &mut self,
        terminal: &mut Terminal<impl Write>,
    ) -> io::Result<Option<ServerEntry>> {
        loop {
            self.draw(terminal)?;
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            use event::KeyCode::*;
            let searching = matches!(self.mode, Mode::Search);
            match (key.code, searching) {
                (Down, _) => self.down(),
                (Up, _) => self.up(),
                (Enter, _) => {
                    if let Some(entry) = self.selected() {
                        terminal.clear()?;
                        return Ok(Some(entry));
                    }
                }
                (Esc, false) => {
                    terminal.clear()?;
                    return Ok(None);
                }
                (Char('/'), false) => {
                    self.mode = Mode::Search;
                    self.input_buffer.reset();
                }
                (Esc, true) => {
                    self.input_buffer.reset();
                    self.mode = Mode::Normal;
                    self.refilter();
                }
                (_, true) => {
                    self.input_buffer.handle_event(Event::Key(key));
                    self.refilter();
                }
                _ => {}
            }
        }
    }

    fn selected(&self) -> Option<ServerEntry> {
        let row = self.state.selected()?;
        let idx = *self.visible.get(row)?;
        self.data.get(idx).cloned()
    }

    fn refilter(&mut self) {
        self.visible = self.matches().into_iter().map(|(idx, _)| idx).collect();
        self.state
            .select(if self.visible.is_empty() { None } else { Some(0) });
    }

    pub fn draw(&mut self, terminal: &mut Terminal<impl Write>) -> io::Result<()> {
        terminal.draw(|frame| {
            self.ui(frame);
        })?;
        Ok(())
    }

    fn ui(&mut self, f: &mut Frame) {
        let header = Row::new(
            ["Entry", "User", "Host", "Vault"]
                .map(|title| Cell::from(title).style(Style::default().add_modifier(Modifier::UNDERLINED))),
        )
        .style(Style::default().add_modifier(Modifier::BOLD));

        let rows: Vec<Row> = self
            .matches()
            .into_iter()
            .map(|(idx, indices)| {
                let columns = columns(&self.data[idx]);
                Row::new(
                    columns
                        .iter()
                        .zip(indices.iter())
                        .map(|(text, hits)| Cell::from(Line::from(highlight_spans(text, hits))))
                        .collect::<Vec<_>>(),
                )
            })
            .collect();

        let widths = self.column_widths();
        let table = Table::new(
            rows,
            [
                Constraint::Length(widths[0] + 1),
                Constraint::Length(widths[1] + 1),
                Constraint::Min(widths[2] + 1),
                Constraint::Min(widths[3]),
            ],
        )
        .header(header)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_spacing(HighlightSpacing::Always);

        let info = match self.mode {
            Mode::Normal => Paragraph::new(Line::from(INFO_TEXT_NORMAL_MODE)).centered(),
            Mode::Search => Paragraph::new(Line::from(INFO_TEXT_SEARCH_MODE)).centered(),
        };

        if matches!(self.mode, Mode::Search) {
            let recs = Layout::vertical([
                Constraint::Length(self.data.len() as u16 + 2),
                Constraint::Length(3),
                Constraint::Length(1),
            ])
            .split(f.size());

            let input = Paragraph::new(
                Text::from(self.input_buffer.line()).style(Style::default().fg(Color::Cyan)),
            )
            .block(Block::default().borders(Borders::ALL));

            StatefulWidget::render(table, recs[0], f.buffer_mut(), &mut self.state);
            input.render(recs[1], f.buffer_mut());
            info.render(recs[2], f.buffer_mut());

            f.set_cursor(
                recs[1].x + 1 + self.input_buffer.visual_cursor() as u16,
                recs[1].y + 1,
            );
        } else {
            let recs = Layout::vertical([
                Constraint::Length(self.data.len() as u16 + 2),
                Constraint::Length(1),
            ])
            .split(f.size());

            StatefulWidget::render(table, recs[0], f.buffer_mut(), &mut self.state);
            info.render(recs[1], f.buffer_mut());
        }
    }

    fn column_widths(&self) -> [u16; COLUMNS] {
        let mut widths = [0u16; COLUMNS];
        for entry in &self.data {
            for (width, text) in widths.iter_mut().zip(columns(entry)) {
                *width = (*width).max(UnicodeWidthStr::width(text.as_str()) as u16);
            }
        }
        widths
    }

    fn up(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => self.visible.len() - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i))
    }

    fn down(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < self.visible.len() => i + 1,
            _ => 0,
        };
        self.state.select(Some(i))
    }

    /// Entries matching the search pattern with matched char positions per
    /// column. Everything matches an empty pattern.
    fn matches(&self) -> Vec<(usize, [Vec<usize>; COLUMNS])> {
        let pattern = self.input_buffer.pattern();
        if pattern.is_empty() {
            return (0..self.data.len())
                .map(|idx| (idx, Default::default()))
                .collect();
        }

        let matcher = SkimMatcherV2::default();
        self.data
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let columns = columns(entry);
                let indices: [Vec<usize>; COLUMNS] = std::array::from_fn(|col| {
                    matcher
                        .fuzzy_indices(&columns[col], pattern)
                        .map(|(_, indices)| indices)
                        .unwrap_or_default()
                });
                if indices.iter().all(Vec::is_empty) {
                    None
                } else {
                    Some((idx, indices))
                }
            })
            .collect()
    }
}

fn columns(entry: &ServerEntry) -> [String; COLUMNS] {
    [
        entry.name.clone(),
        entry.username.clone().unwrap_or_else(|| "-".into()),
        entry.host.clone(),
        entry.secret_ref.clone().unwrap_or_else(|| "-".into()),
    ]
}

fn highlight_spans<'b>(input: &str, indices: &[usize]) -> Vec<Span<'b>> {
    let mut spans = Vec::new();
    let mut current_segment = String::new();

    let highlight_style = Style::default()
        .fg(Color::Rgb(250, 0, 0))
        .bg(Color::Rgb(0xFF, 0xFC, 0x67))
        .add_modifier(Modifier::BOLD);
    for (i, c) in input.chars().enumerate() {
        if indices.contains(&i) {
            if !current_segment.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_segment)));
            }
            spans.push(Span::styled(c.to_string(), highlight_style));
        } else {
            current_segment.push(c);
        }
    }

    if !current_segment.is_empty() {
        spans.push(Span::raw(current_segment));
    }

    spans
}
