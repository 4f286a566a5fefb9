use crate::structs::*;
use crate::window::*;

use chrono::{DateTime, Local, Utc};
use crossterm::{
    cursor,
    event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    style::{self, Attribute, Color, ResetColor, SetAttribute, SetForegroundColor},
    terminal, ExecutableCommand, QueueableCommand,
};
use std::io::{self, Write};

pub const TITLE: &str = "PÜNKTLI - DEPARTURES";
const LOCATING: &str = "Locating...";
const SCANNING: &str = "Scanning for connections...";
const NO_DEPARTURES: &str = "No upcoming departures";

/// What a key press asks the app to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Refresh,
    Quit,
}

pub fn key_action(key: &KeyEvent) -> Option<Action> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        KeyCode::Char('r') => Some(Action::Refresh),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub line: String,
    pub destination: String,
    pub departure: String,
    pub countdown: String,
    pub delay: String,
    pub delayed: bool,
    pub platform: String,
}

impl Row {
    pub fn new(c: &Connection, now: DateTime<Utc>) -> Self {
        Self {
            line: c.line.clone(),
            destination: c.destination.clone(),
            // Shown in the stop's own offset
            departure: c.departure.format("%H:%M").to_string(),
            countdown: countdown(c, now),
            delay: c.formatted_delay(),
            delayed: c.delay.map_or(false, |d| d > 0),
            platform: c.platform_label().to_string(),
        }
    }
}

pub fn countdown(c: &Connection, now: DateTime<Utc>) -> String {
    let secs = c.departure_utc().signed_duration_since(now).num_seconds();
    if secs < 60 {
        "now".to_string()
    } else {
        format!("{} min", secs / 60)
    }
}

/// Everything drawn in one tick, computed from a single snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub clock: String,
    pub location: String,
    pub rows: Vec<Row>,
    pub empty_text: &'static str,
    pub stale: bool,
    pub status: Option<String>,
}

impl Frame {
    pub fn build(state: &WindowState, policy: &WindowPolicy, now: DateTime<Utc>, limit: usize) -> Self {
        let rows = state
            .current_view(now, policy)
            .iter()
            .take(limit)
            .map(|c| Row::new(c, now))
            .collect();

        let status = state.last_error.as_ref().map(|e| {
            format!(
                "[{}] {}",
                e.at.with_timezone(&Local).format("%H:%M:%S"),
                e.message
            )
        });

        Self {
            clock: now.with_timezone(&Local).format("%H:%M:%S").to_string(),
            location: state.location_name().unwrap_or(LOCATING).to_string(),
            rows,
            empty_text: if state.has_fetched() { NO_DEPARTURES } else { SCANNING },
            stale: state.is_stale(now, policy),
            status,
        }
    }
}

//////////////////////////////////////////////////////////
// Terminal
//////////////////////////////////////////////////////////
pub struct Tui<W: Write> {
    out: W,
}

impl Tui<io::Stdout> {
    pub fn setup() -> io::Result<Self> {
        let mut out = io::stdout();
        terminal::enable_raw_mode()?;
        out.execute(terminal::EnterAlternateScreen)?;
        out.execute(cursor::Hide)?;
        Ok(Self { out })
    }

    pub fn teardown(&mut self) {
        restore_terminal();
    }
}

/// Leaves the alternate screen. Also used from the panic hook.
pub fn restore_terminal() {
    let mut out = io::stdout();
    let _ = out.execute(cursor::Show);
    let _ = out.execute(terminal::LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
    let _ = out.flush();
}

impl<W: Write> Tui<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn draw(&mut self, frame: &Frame) -> io::Result<()> {
        self.out.queue(cursor::MoveTo(0, 0))?;
        self.out.queue(terminal::Clear(terminal::ClearType::All))?;
        self.draw_header(frame)?;
        self.draw_table(frame)?;
        self.draw_status(frame)?;
        self.draw_footer()?;
        self.out.flush()
    }

    fn draw_header(&mut self, frame: &Frame) -> io::Result<()> {
        self.out.queue(SetForegroundColor(Color::Magenta))?;
        self.out.queue(SetAttribute(Attribute::Bold))?;
        self.out.queue(style::Print(TITLE))?;
        self.out.queue(SetAttribute(Attribute::Reset))?;
        self.out.queue(cursor::MoveToNextLine(1))?;

        self.out.queue(SetForegroundColor(Color::Cyan))?;
        self.out.queue(style::Print(&frame.clock))?;
        self.out.queue(ResetColor)?;
        self.out.queue(style::Print("  ::  "))?;
        self.out.queue(SetForegroundColor(Color::Yellow))?;
        self.out.queue(style::Print(&frame.location))?;
        self.out.queue(ResetColor)?;
        if frame.stale {
            self.out.queue(SetForegroundColor(Color::Red))?;
            self.out.queue(style::Print("  [STALE]"))?;
            self.out.queue(ResetColor)?;
        }
        self.out.queue(cursor::MoveToNextLine(2))?;
        Ok(())
    }

    fn draw_table(&mut self, frame: &Frame) -> io::Result<()> {
        if frame.rows.is_empty() {
            self.out.queue(SetAttribute(Attribute::Dim))?;
            self.out.queue(style::Print(frame.empty_text))?;
            self.out.queue(SetAttribute(Attribute::Reset))?;
            self.out.queue(cursor::MoveToNextLine(1))?;
            return Ok(());
        }

        self.out.queue(SetAttribute(Attribute::Bold))?;
        self.out.queue(style::Print(format!(
            "{:<10} {:<28} {:>5} {:>7} {:>5} {:>8}",
            "LINE", "DESTINATION", "DEP", "IN", "DELAY", "PLATFORM"
        )))?;
        self.out.queue(SetAttribute(Attribute::Reset))?;
        self.out.queue(cursor::MoveToNextLine(1))?;

        for row in frame.rows.iter() {
            self.out.queue(SetForegroundColor(Color::Cyan))?;
            self.out.queue(style::Print(format!("{:<10} ", truncate(&row.line, 10))))?;
            self.out.queue(SetForegroundColor(Color::Yellow))?;
            self.out.queue(style::Print(format!("{:<28} ", truncate(&row.destination, 28))))?;
            self.out.queue(SetForegroundColor(Color::White))?;
            self.out.queue(style::Print(format!("{:>5} {:>7} ", row.departure, row.countdown)))?;
            self.out.queue(SetForegroundColor(if row.delayed { Color::Red } else { Color::DarkGrey }))?;
            self.out.queue(style::Print(format!("{:>5} ", row.delay)))?;
            self.out.queue(SetForegroundColor(Color::DarkGrey))?;
            self.out.queue(style::Print(format!("{:>8}", row.platform)))?;
            self.out.queue(ResetColor)?;
            self.out.queue(cursor::MoveToNextLine(1))?;
        }
        Ok(())
    }

    fn draw_status(&mut self, frame: &Frame) -> io::Result<()> {
        if let Some(status) = &frame.status {
            self.out.queue(cursor::MoveToNextLine(1))?;
            self.out.queue(SetForegroundColor(Color::Red))?;
            self.out.queue(style::Print(status))?;
            self.out.queue(ResetColor)?;
            self.out.queue(cursor::MoveToNextLine(1))?;
        }
        Ok(())
    }

    fn draw_footer(&mut self) -> io::Result<()> {
        self.out.queue(cursor::MoveToNextLine(1))?;
        self.out.queue(SetAttribute(Attribute::Dim))?;
        self.out.queue(style::Print("r to refresh, q/Esc to quit"))?;
        self.out.queue(SetAttribute(Attribute::Reset))?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut cut: String = s.chars().take(max.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}
