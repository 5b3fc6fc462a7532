use super::Transport;
use crate::domain::{LogLevel, RenderedEntry};
use chrono::SecondsFormat;
use console::Style;
use parking_lot::Mutex;
use std::io::{self, Write};

/// Colorized single-line echo.
///
/// `<timestamp> <LEVEL> [<service>] <message> <meta json>`
pub struct ConsoleTransport {
    writer: Mutex<Box<dyn Write + Send>>,
    colors: bool,
}

impl ConsoleTransport {
    pub fn stdout() -> Self {
        let colors = console::colors_enabled();
        Self::with_writer(Box::new(io::stdout()), colors)
    }

    pub fn with_writer(writer: Box<dyn Write + Send>, colors: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            colors,
        }
    }

    fn level_style(level: LogLevel) -> Style {
        match level {
            LogLevel::Debug => Style::new().blue(),
            LogLevel::Info => Style::new().green(),
            LogLevel::Warn => Style::new().yellow(),
            LogLevel::Error => Style::new().red().bold(),
        }
    }

    pub fn format(&self, rendered: &RenderedEntry) -> String {
        let entry = &rendered.entry;
        let level = entry.level.as_str().to_uppercase();
        let level = if self.colors {
            Self::level_style(entry.level)
                .force_styling(true)
                .apply_to(level)
                .to_string()
        } else {
            level
        };

        let mut line = format!(
            "{} {} [{}] {}",
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            entry.service,
            entry.message
        );
        if let Some(request_id) = &entry.request_id {
            line.push_str(&format!(" (requestId={request_id})"));
        }
        if let Some(meta) = entry.meta.as_ref().filter(|m| !m.is_empty()) {
            if let Ok(json) = serde_json::to_string(meta) {
                line.push(' ');
                line.push_str(&json);
            }
        }
        line
    }
}

impl Transport for ConsoleTransport {
    fn name(&self) -> &'static str {
        "console"
    }

    fn write(&self, entry: &RenderedEntry) {
        let line = self.format(entry);
        let mut writer = self.writer.lock();
        // A broken terminal is not something the logger can recover from.
        let _ = writeln!(writer, "{line}");
        let _ = writer.flush();
    }
}
