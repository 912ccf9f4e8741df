//! Terminal presentation: the arbiter's view and the input worker's key
//! capture.

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use dronefield_core::blackboard::{FrameView, ViewState};
use dronefield_core::config::{GRID_HEIGHT, GRID_WIDTH};
use dronefield_core::{Cell, Key, Outcome};
use futures::StreamExt;
use std::io::{self, IsTerminal, Stdout, Write};
use tracing::{debug, warn};

/// Picks the terminal view when stdout is a terminal, headless otherwise.
pub fn open_view() -> Box<dyn FrameView> {
    if !io::stdout().is_terminal() {
        return Box::new(HeadlessView);
    }
    match TerminalView::new() {
        Ok(view) => Box::new(view),
        Err(e) => {
            warn!("Cannot take over the terminal, running headless: {}", e);
            Box::new(HeadlessView)
        }
    }
}

/// Draws the grid scaled to the terminal on the alternate screen.
pub struct TerminalView {
    out: Stdout,
}

impl TerminalView {
    pub fn new() -> io::Result<Self> {
        let mut out = io::stdout();
        execute!(out, EnterAlternateScreen, Hide)?;
        Ok(Self { out })
    }

    /// Maps a grid cell to a screen cell below the header line.
    fn project(col: i32, row: i32, cols: u16, rows: u16) -> (u16, u16) {
        let rows = rows.saturating_sub(1).max(1);
        let x = col as u64 * cols as u64 / GRID_WIDTH as u64;
        let y = row as u64 * rows as u64 / GRID_HEIGHT as u64;
        (x as u16, y as u16 + 1)
    }

    fn centred(&mut self, line: u16, text: &str, color: Color) -> io::Result<()> {
        let (cols, _) = terminal::size()?;
        let x = cols.saturating_sub(text.len() as u16) / 2;
        queue!(self.out, MoveTo(x, line), SetForegroundColor(color), Print(text), ResetColor)
    }
}

impl FrameView for TerminalView {
    fn render(&mut self, view: &ViewState<'_>) -> io::Result<()> {
        let (cols, rows) = terminal::size()?;
        queue!(self.out, Clear(ClearType::All))?;

        match view {
            ViewState::Menu => {
                let mid = rows / 2;
                self.centred(mid.saturating_sub(1), "DRONEFIELD", Color::Cyan)?;
                self.centred(mid + 1, "press 's' to start, 'q' to quit", Color::White)?;
                self.centred(mid + 2, "w e r / s d f / x c v to steer, p to pause", Color::DarkGrey)?;
            }
            ViewState::Running {
                grid,
                drone,
                score,
                paused,
            } => {
                let header = format!("score {}{}", score, if *paused { "   [paused]" } else { "" });
                queue!(self.out, MoveTo(1, 0), Print(header))?;

                for (pos, cell) in grid.occupied() {
                    let (x, y) = Self::project(pos.x, pos.y, cols, rows);
                    let (glyph, color) = match cell {
                        Cell::Obstacle => ('o', Color::Yellow),
                        Cell::Target(d) => ((b'0' + d) as char, Color::Green),
                        _ => continue,
                    };
                    queue!(self.out, MoveTo(x, y), SetForegroundColor(color), Print(glyph), ResetColor)?;
                }
                let (x, y) = Self::project(drone.x, drone.y, cols, rows);
                queue!(self.out, MoveTo(x, y), SetForegroundColor(Color::Blue), Print('+'), ResetColor)?;
            }
            ViewState::Finished { outcome, score } => {
                let (text, color) = match outcome {
                    Outcome::Win => (format!("YOU WIN - score {}", score), Color::Green),
                    Outcome::Lose => ("GAME OVER".to_string(), Color::Red),
                    Outcome::Fault(reason) => (format!("fleet fault: {}", reason), Color::Red),
                    other => (format!("episode ended ({})", other), Color::White),
                };
                self.centred(rows / 2, &text, color)?;
            }
        }
        self.out.flush()
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, LeaveAlternateScreen);
    }
}

/// View used when nothing can be drawn; frames only reach the log.
pub struct HeadlessView;

impl FrameView for HeadlessView {
    fn render(&mut self, view: &ViewState<'_>) -> io::Result<()> {
        if let ViewState::Finished { outcome, score } = view {
            debug!("Final screen: {} (score {})", outcome, score);
        }
        Ok(())
    }
}

/// Restores cooked mode on drop.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Reads operator keys from the terminal in raw mode.
pub struct KeyReader {
    events: EventStream,
    _raw: RawMode,
}

impl KeyReader {
    pub fn open() -> io::Result<Self> {
        if !io::stdin().is_terminal() {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "stdin is not a terminal"));
        }
        let raw = RawMode::enable()?;
        Ok(Self {
            events: EventStream::new(),
            _raw: raw,
        })
    }

    /// Next key of the key map. `None` once the terminal is gone.
    pub async fn next_key(&mut self) -> Option<Key> {
        loop {
            match self.events.next().await? {
                Ok(Event::Key(event)) => {
                    if let Some(key) = translate(&event) {
                        return Some(key);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Terminal read failed: {}", e);
                    return None;
                }
            }
        }
    }
}

/// Maps a terminal key press to a fleet key.
fn translate(event: &KeyEvent) -> Option<Key> {
    if event.kind != KeyEventKind::Press {
        return None;
    }
    match event.code {
        KeyCode::Char(c) => Key::from_char(c),
        _ => None,
    }
}
