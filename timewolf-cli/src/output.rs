#[cfg(feature = "colored-output")]
use colored::*;
use timewolf_engine::container::Report;
use timewolf_engine::{ModuleStatus, RunEvent, RunReport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    /// One display line per event worth showing to the user.
    pub fn format_event(&self, event: &RunEvent) -> Option<String> {
        match event {
            RunEvent::Message {
                source,
                text,
                is_error,
            } => {
                let color = if *is_error { Color::Red } else { Color::Cyan };
                Some(format!("[{}] {text}", self.colorize(source, &color, false)))
            }
            RunEvent::Status { module, status } => {
                let color = match status {
                    ModuleStatus::Completed => Color::Green,
                    ModuleStatus::Error => Color::Red,
                    ModuleStatus::Cancelled => Color::Yellow,
                    _ => return None,
                };
                Some(format!(
                    "[{module}] {}",
                    self.colorize(&status.to_string(), &color, true)
                ))
            }
            RunEvent::ContainerCount { module, count } => {
                Some(format!("[{module}] Processing {count} containers"))
            }
            RunEvent::ThreadState { .. } => None,
        }
    }

    /// Every recorded error with its origin, or an empty string.
    pub fn format_error_summary(&self, report: &RunReport) -> String {
        if report.errors.is_empty() {
            return String::new();
        }

        let mut output = String::new();
        output.push_str(&self.colorize("Errors encountered during the run:", &Color::Red, true));
        output.push('\n');
        for record in &report.errors {
            let origin = record.module.as_deref().unwrap_or("core");
            let severity = if record.critical {
                self.colorize("critical", &Color::Red, true)
            } else {
                self.colorize("error", &Color::Yellow, false)
            };
            output.push_str(&format!("  {origin} [{severity}]: {}\n", record.message));
        }
        if report.has_critical_errors() {
            output.push_str(&self.colorize("Critical error found. Aborting.", &Color::Red, true));
            output.push('\n');
        }
        output
    }

    pub fn format_reports(&self, reports: &[(String, std::sync::Arc<Report>)]) -> String {
        let mut output = String::new();
        for (source, report) in reports {
            output.push_str(&self.colorize(
                &format!("Report from {source}:"),
                &Color::Green,
                true,
            ));
            output.push('\n');
            output.push_str(&report.text);
            output.push('\n');
        }
        output
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Red => text.red(),
                    Color::Cyan => text.cyan(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (color, bold, self.colored);
            text.to_string()
        }
    }
}

enum Color {
    Green,
    Yellow,
    Red,
    Cyan,
}

/// Print events to stderr until every publisher is dropped.
pub fn spawn_event_printer(mut rx: mpsc::Receiver<RunEvent>, colored: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let output = OutputManager::new(colored);
        while let Some(event) = rx.recv().await {
            if let Some(line) = output.format_event(&event) {
                eprintln!("{line}");
            }
        }
    })
}
