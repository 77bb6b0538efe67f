//! Terminal style helpers using crossterm ANSI escape sequences.

use crossterm::style::{Attribute, Color, SetAttribute, SetForegroundColor};

/// Wrap text in bold.
pub fn bold(text: &str) -> String {
    format!(
        "{}{}{}",
        SetAttribute(Attribute::Bold),
        text,
        SetAttribute(Attribute::Reset)
    )
}

/// Wrap text in dim (faint).
pub fn dim(text: &str) -> String {
    format!(
        "{}{}{}",
        SetAttribute(Attribute::Dim),
        text,
        SetAttribute(Attribute::Reset)
    )
}

/// Wrap text in a foreground color.
pub fn fg_color(text: &str, color: Color) -> String {
    format!(
        "{}{}{}",
        SetForegroundColor(color),
        text,
        SetForegroundColor(Color::Reset)
    )
}

pub fn info(text: &str) -> String {
    fg_color(text, Color::Cyan)
}

pub fn success(text: &str) -> String {
    fg_color(text, Color::Green)
}

pub fn warning(text: &str) -> String {
    fg_color(text, Color::Yellow)
}

pub fn error(text: &str) -> String {
    fg_color(text, Color::Red)
}

/// Server and tool names.
pub fn highlight(text: &str) -> String {
    fg_color(text, Color::Magenta)
}

/// The REPL prompt: "tether> " with a bold magenta name.
pub fn prompt() -> String {
    format!(
        "{}{}tether>{} ",
        SetForegroundColor(Color::Magenta),
        SetAttribute(Attribute::Bold),
        SetAttribute(Attribute::Reset)
    )
}

/// Format a call success line: "  ✓ name (0.12s)" (green icon).
pub fn call_success(name: &str, elapsed_secs: f64) -> String {
    format!(
        "  {}✓{} {} {}",
        SetForegroundColor(Color::Green),
        SetForegroundColor(Color::Reset),
        bold(name),
        dim(&format!("({elapsed_secs:.2}s)"))
    )
}

/// Format a call failure line: "  ✗ name (0.12s)" (red icon).
pub fn call_failure(name: &str, elapsed_secs: f64) -> String {
    format!(
        "  {}✗{} {} {}",
        SetForegroundColor(Color::Red),
        SetForegroundColor(Color::Reset),
        bold(name),
        dim(&format!("({elapsed_secs:.2}s)"))
    )
}
