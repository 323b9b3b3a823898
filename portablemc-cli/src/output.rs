//! The output layer: one API emitting, depending on the selected mode, either
//! human-readable log lines or machine-readable tab-separated records.

use std::io::{IsTerminal, StdoutLock, Write};
use std::time::{Duration, Instant};
use std::fmt::Display;
use std::{env, io};


/// Sink of everything the commands print.
#[derive(Debug)]
pub struct Output {
    mode: Mode,
    color: bool,
    /// True while the last human line is a pending one, left unterminated so the
    /// next line overwrites it.
    pending_line: bool,
}

/// The two rendering modes behind the one logging API.
#[derive(Debug)]
enum Mode {
    /// Human lines, filtered below the threshold level.
    Pretty { threshold: LogLevel },
    /// Tab-separated machine records, never filtered.
    Records,
}

impl Output {

    pub fn human(log_level: LogLevel) -> Self {
        Self {
            mode: Mode::Pretty { threshold: log_level },
            color: stdout_supports_color(),
            pending_line: false,
        }
    }

    pub fn human_color(log_level: LogLevel) -> Self {
        Self {
            mode: Mode::Pretty { threshold: log_level },
            color: true,
            pending_line: false,
        }
    }

    pub fn tab_separated() -> Self {
        Self {
            mode: Mode::Records,
            color: false,
            pending_line: false,
        }
    }

    /// Open a log record under the given tag. The tag is the first field of
    /// machine records and never appears on human output.
    pub fn log(&mut self, tag: impl Display) -> Log<'_> {

        let mut writer = io::stdout().lock();

        if let Mode::Records = self.mode {
            write!(writer, "{tag}").unwrap();
        }

        Log {
            output: self,
            writer,
            shown: false,
        }

    }

}

/// Generates one [`Log::line`] shorthand per level.
macro_rules! level_shorthands {
    ($( $name:ident => $level:ident ),* $(,)?) => { $(
        pub fn $name<D: Display>(&mut self, message: D) -> &mut Self {
            self.line(LogLevel::$level, message)
        }
    )* };
}

/// An open log record, fed with machine fields and human lines until dropped.
#[derive(Debug)]
pub struct Log<'a> {
    output: &'a mut Output,
    writer: StdoutLock<'static>,
    /// Whether the last human line passed the level filter, gating the additional
    /// lines below it.
    shown: bool,
}

impl Log<'_> {

    /// Append one machine field.
    pub fn arg<D: Display>(&mut self, arg: D) -> &mut Self {
        if let Mode::Records = self.output.mode {
            write!(self.writer, "\t{}", Escape(arg)).unwrap();
        }
        self
    }

    /// Append every item as a machine field.
    pub fn args<D, I>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = D>,
        D: Display,
    {
        if let Mode::Records = self.output.mode {
            for arg in args {
                write!(self.writer, "\t{}", Escape(arg)).unwrap();
            }
        }
        self
    }

    /// Write one human line at the given level, dropped when below the configured
    /// verbosity.
    pub fn line<D: Display>(&mut self, level: LogLevel, message: D) -> &mut Self {

        if let Mode::Pretty { threshold } = self.output.mode {

            self.shown = level >= threshold;
            if !self.shown {
                return self;
            }

            let (badge, color) = match level {
                LogLevel::Info => ("INFO", "\x1b[34m"),
                LogLevel::Pending => ("..", ""),
                LogLevel::Success => ("OK", "\x1b[92m"),
                LogLevel::Warning => ("WARN", "\x1b[33m"),
                LogLevel::Error => ("FAILED", "\x1b[31m"),
            };

            // Overwrite a pending line: back to column one and clear it.
            let rewind = if self.output.pending_line { "\r\x1b[K" } else { "" };

            if self.output.color && !color.is_empty() {
                write!(self.writer, "{rewind}[{color}{badge:^6}\x1b[0m] {message}").unwrap();
            } else {
                write!(self.writer, "{rewind}[{badge:^6}] {message}").unwrap();
            }

            if level == LogLevel::Pending {
                self.output.pending_line = true;
            } else {
                self.output.pending_line = false;
                self.writer.write_all(b"\n").unwrap();
            }

        }

        self

    }

    /// Write an indented human continuation line, shown only when the line above
    /// it was shown.
    pub fn additional<D: Display>(&mut self, message: D) -> &mut Self {
        if let Mode::Pretty { .. } = self.output.mode {
            if self.shown {
                if self.output.pending_line {
                    self.writer.write_all(b"\n").unwrap();
                    self.output.pending_line = false;
                }
                writeln!(self.writer, "         {message}").unwrap();
            }
        }
        self
    }

    level_shorthands! {
        info => Info,
        pending => Pending,
        success => Success,
        warning => Warning,
        error => Error,
    }

}

impl Drop for Log<'_> {
    fn drop(&mut self) {

        // Machine records are one line each.
        if let Mode::Records = self.output.mode {
            self.writer.write_all(b"\n").unwrap();
        }

        self.writer.flush().unwrap();

    }
}

/// Importance of a human line, also the verbosity threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Detail, hidden unless verbose.
    Info,
    /// Something is in progress, the line is overwritten by the next one.
    Pending,
    /// A phase completed.
    Success,
    Warning,
    Error,
}

/// Wrapper escaping the two structural characters of the machine format, tab and
/// line return, as the literal `\t` and `\n`.
struct Escape<D: Display>(D);

impl<D: Display> Display for Escape<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {

        use std::fmt::Write;

        struct Writer<'a, 'b>(&'a mut std::fmt::Formatter<'b>);

        impl Write for Writer<'_, '_> {
            fn write_str(&mut self, s: &str) -> std::fmt::Result {
                for chunk in s.split_inclusive(['\t', '\n']) {
                    match chunk.as_bytes().last() {
                        Some(b'\t') => {
                            self.0.write_str(&chunk[..chunk.len() - 1])?;
                            self.0.write_str("\\t")?;
                        }
                        Some(b'\n') => {
                            self.0.write_str(&chunk[..chunk.len() - 1])?;
                            self.0.write_str("\\n")?;
                        }
                        _ => self.0.write_str(chunk)?,
                    }
                }
                Ok(())
            }
        }

        write!(Writer(f), "{}", self.0)

    }
}

/// Tracks a running download to derive its speed, and mutes the reports of
/// batches that transfer nothing (everything already present).
#[derive(Debug)]
pub struct DownloadTracker {
    started: Option<Instant>,
}

#[derive(Debug)]
pub struct DownloadMetrics {
    /// Time since the first report of the batch.
    pub elapsed: Duration,
    /// Mean speed since then, in bytes per second.
    pub speed: f32,
}

impl DownloadTracker {

    pub fn new() -> Self {
        Self { started: None }
    }

    pub fn handle(&mut self, count: u32, total_count: u32, bytes: u64, total_bytes: u64) -> Option<DownloadMetrics> {

        let _ = total_bytes;

        let started = *self.started.get_or_insert_with(Instant::now);
        let done = count == total_count;

        if bytes == 0 {
            if done {
                self.started = None;
            }
            return None;
        }

        let elapsed = started.elapsed();
        if done {
            self.started = None;
        }

        Some(DownloadMetrics {
            elapsed,
            speed: bytes as f32 / elapsed.as_secs_f32(),
        })

    }

}

/// Color unless `NO_COLOR` or a dumb terminal asks otherwise, and only on a
/// terminal.
fn stdout_supports_color() -> bool {

    if !io::stdout().is_terminal() {
        return false;
    }

    if env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()) {
        return false;
    }

    if cfg!(unix) && env::var_os("TERM").is_some_and(|term| term == "dumb") {
        return false;
    }

    true

}
