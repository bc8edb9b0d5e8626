//! Operator I/O: prompts, menus, notices and the live camera preview.
//!
//! The session drives everything through the [`Console`] trait so the state
//! machine can be exercised without a terminal.

use crate::preview::{AsciiRenderer, Overlay};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Stylize;
use crossterm::{cursor, execute, queue, terminal};
use image::RgbImage;
use rollcall_store::AttendanceRecord;
use std::io::{self, BufRead, Write};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Warning,
    Error,
}

pub trait Console {
    /// Read one line. `None` at end of input.
    fn prompt(&mut self, label: &str) -> io::Result<Option<String>>;

    /// Read one line without echo.
    fn prompt_secret(&mut self, label: &str) -> io::Result<Option<String>>;

    /// Offer a numbered menu and return the chosen index. `None` at end of input.
    fn choose(&mut self, title: &str, options: &[&str]) -> io::Result<Option<usize>>;

    fn notice(&mut self, kind: NoticeKind, message: &str);

    fn show_table(&mut self, records: &[AttendanceRecord]);

    fn begin_preview(&mut self) -> io::Result<()>;

    /// Must be safe to call after a failed or partial `begin_preview`.
    fn end_preview(&mut self);

    fn show_frame(
        &mut self,
        frame: &RgbImage,
        overlays: &[Overlay],
        status: &str,
    ) -> io::Result<()>;

    /// Non-blocking check for the cancel key.
    fn cancel_requested(&mut self) -> io::Result<bool>;
}

/// Live preview scope. The console leaves preview mode when this drops.
pub struct Preview<'a> {
    console: &'a mut dyn Console,
}

impl<'a> Preview<'a> {
    pub fn begin(console: &'a mut dyn Console) -> io::Result<Self> {
        if let Err(e) = console.begin_preview() {
            console.end_preview();
            return Err(e);
        }
        Ok(Self { console })
    }

    pub fn show(&mut self, frame: &RgbImage, overlays: &[Overlay], status: &str) -> io::Result<()> {
        self.console.show_frame(frame, overlays, status)
    }

    pub fn cancel_requested(&mut self) -> io::Result<bool> {
        self.console.cancel_requested()
    }
}

impl Drop for Preview<'_> {
    fn drop(&mut self) {
        self.console.end_preview();
    }
}

/// Attendance rows as an aligned text table.
pub fn format_table(records: &[AttendanceRecord]) -> String {
    let headers = ["Name", "Time", "Date"];
    let mut widths = headers.map(str::len);
    for r in records {
        widths[0] = widths[0].max(r.name.chars().count());
        widths[1] = widths[1].max(r.time.len());
        widths[2] = widths[2].max(r.date.len());
    }

    let row = |cells: [&str; 3]| {
        format!(
            "{:<w0$}  {:<w1$}  {:<w2$}",
            cells[0],
            cells[1],
            cells[2],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2]
        )
        .trim_end()
        .to_string()
    };

    let mut out = vec![row(headers)];
    out.push(row([
        "-".repeat(widths[0]).as_str(),
        "-".repeat(widths[1]).as_str(),
        "-".repeat(widths[2]).as_str(),
    ]));
    for r in records {
        out.push(row([r.name.as_str(), r.time.as_str(), r.date.as_str()]));
    }
    out.join("\n")
}

/// Console on the controlling terminal.
pub struct TerminalConsole {
    renderer: Option<AsciiRenderer>,
}

impl TerminalConsole {
    pub fn new() -> Self {
        Self { renderer: None }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

/// Leaves raw mode when dropped.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        terminal::disable_raw_mode().ok();
    }
}

impl Console for TerminalConsole {
    fn prompt(&mut self, label: &str) -> io::Result<Option<String>> {
        print!("{label}: ");
        io::stdout().flush()?;
        self.read_line()
    }

    fn prompt_secret(&mut self, label: &str) -> io::Result<Option<String>> {
        print!("{label}: ");
        io::stdout().flush()?;

        let mut secret = String::new();
        {
            let _raw = RawMode::enable()?;
            loop {
                let Event::Key(KeyEvent {
                    code, modifiers, kind, ..
                }) = event::read()?
                else {
                    continue;
                };
                if kind != KeyEventKind::Press {
                    continue;
                }
                match code {
                    KeyCode::Enter => break,
                    KeyCode::Backspace => {
                        secret.pop();
                    }
                    KeyCode::Char('c') | KeyCode::Char('d')
                        if modifiers.contains(KeyModifiers::CONTROL) =>
                    {
                        print!("\r\n");
                        return Ok(None);
                    }
                    KeyCode::Char(c) => secret.push(c),
                    _ => {}
                }
            }
        }
        println!();
        Ok(Some(secret))
    }

    fn choose(&mut self, title: &str, options: &[&str]) -> io::Result<Option<usize>> {
        println!();
        println!("{}", title.bold());
        for (i, option) in options.iter().enumerate() {
            println!("  {}) {option}", i + 1);
        }
        loop {
            let Some(answer) = self.prompt("Select")? else {
                return Ok(None);
            };
            match answer.trim().parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => println!("Choose 1-{}.", options.len()),
            }
        }
    }

    fn notice(&mut self, kind: NoticeKind, message: &str) {
        let tag = match kind {
            NoticeKind::Info => "[info]".green(),
            NoticeKind::Warning => "[warning]".yellow(),
            NoticeKind::Error => "[error]".red(),
        };
        println!("{} {message}", tag.bold());
    }

    fn show_table(&mut self, records: &[AttendanceRecord]) {
        println!();
        println!("{}", format_table(records));
        println!("({} rows)", records.len());
    }

    fn begin_preview(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            terminal::EnterAlternateScreen,
            cursor::Hide,
            terminal::Clear(terminal::ClearType::All)
        )?;
        self.renderer = Some(AsciiRenderer::fit_terminal());
        Ok(())
    }

    fn end_preview(&mut self) {
        self.renderer = None;
        let mut stdout = io::stdout();
        execute!(stdout, cursor::Show, terminal::LeaveAlternateScreen).ok();
        terminal::disable_raw_mode().ok();
    }

    fn show_frame(
        &mut self,
        frame: &RgbImage,
        overlays: &[Overlay],
        status: &str,
    ) -> io::Result<()> {
        let renderer = self.renderer.get_or_insert_with(AsciiRenderer::fit_terminal);
        let art = renderer.render(frame, overlays);
        let status_row = renderer.height() as u16 + 1;

        let mut stdout = io::stdout();
        queue!(stdout, cursor::MoveTo(0, 0))?;
        write!(stdout, "{art}")?;
        queue!(
            stdout,
            cursor::MoveTo(0, status_row),
            terminal::Clear(terminal::ClearType::CurrentLine)
        )?;
        write!(stdout, "{status}  (q/Esc to stop)")?;
        stdout.flush()
    }

    fn cancel_requested(&mut self) -> io::Result<bool> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(KeyEvent {
                code, modifiers, kind, ..
            }) = event::read()?
            {
                if kind != KeyEventKind::Press {
                    continue;
                }
                match code {
                    KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(true),
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                        return Ok(true);
                    }
                    _ => {}
                }
            }
        }
        Ok(false)
    }
}
