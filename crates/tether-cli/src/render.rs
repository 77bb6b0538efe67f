//! Text rendering for REPL output.

use crate::command::USAGE;
use crate::style;
use serde_json::Value;
use std::fmt::Write;
use tether_mcp::{ServerInfo, ServerStatus};
use tether_types::{Failure, ResourceDescriptor, ToolCallResult, ToolDescriptor};

pub fn banner() -> String {
    let lines = [
        "┌──────────────────────────────────────────┐",
        "│ tether - MCP tool server client          │",
        "│                                          │",
        "│ Type 'help' for available commands       │",
        "│ Type 'exit' or 'quit' to exit            │",
        "└──────────────────────────────────────────┘",
    ];
    lines
        .iter()
        .map(|line| style::highlight(line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn help() -> String {
    let width = USAGE.iter().map(|(form, _)| form.len()).max().unwrap_or(0);
    let mut out = style::bold("Available commands:");
    for (form, description) in USAGE {
        let _ = write!(out, "\n  {} - {description}", style::info(&format!("{form:<width$}")));
    }
    out
}

pub fn servers(servers: &[ServerStatus]) -> String {
    if servers.is_empty() {
        return style::warning("No servers defined in configuration.");
    }
    let mut out = style::info("Available servers:");
    for (idx, server) in servers.iter().enumerate() {
        let status = if server.connected {
            style::success(&format!("[Connected, {} tools]", server.tool_count))
        } else {
            style::warning("[Not Connected]")
        };
        let _ = write!(
            out,
            "\n  {}. {} {status}  {}",
            idx + 1,
            style::highlight(&format!("{:<20}", server.name)),
            style::dim(&server.command)
        );
    }
    out
}

pub fn connected(server: &str, info: &ServerInfo, tool_count: usize) -> String {
    let mut out = style::success(&format!("Connected to {server}"));
    if !info.name.is_empty() {
        let _ = write!(out, " {}", style::dim(&format!("({} {})", info.name, info.version)));
    }
    let _ = write!(out, " with {tool_count} tools available.");
    out
}

pub fn tools(server: &str, tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return style::warning(&format!("No tools found on server '{server}'"));
    }
    let mut out = format!("{} {}:", style::info("Tools for"), style::highlight(server));
    for (idx, tool) in tools.iter().enumerate() {
        let _ = write!(out, "\n  {}. {}", idx + 1, style::highlight(&tool.name));
        if let Some(line) = tool.description.lines().next().filter(|l| !l.is_empty()) {
            let _ = write!(out, " {}", style::dim(&format!("- {line}")));
        }
    }
    out
}

pub fn tool_details(tool: &ToolDescriptor) -> String {
    let mut out = style::highlight("Tool Details:");
    let _ = write!(out, "\n{}{}", style::info("Name:        "), tool.name);
    let _ = write!(out, "\n{}{}", style::info("Description: "), tool.description);

    if let Some(annotations) = &tool.annotations {
        let mut hints = Vec::new();
        if let Some(title) = &annotations.title {
            hints.push(format!("title: {title}"));
        }
        if annotations.read_only_hint == Some(true) {
            hints.push("read-only".to_string());
        }
        if annotations.destructive_hint == Some(true) {
            hints.push("destructive".to_string());
        }
        if annotations.idempotent_hint == Some(true) {
            hints.push("idempotent".to_string());
        }
        if !hints.is_empty() {
            let _ = write!(out, "\n{}{}", style::info("Hints:       "), hints.join(", "));
        }
    }

    let _ = write!(out, "\n{}\n{}", style::info("Input Schema:"), pretty(&tool.input_schema));
    if let Some(output) = &tool.output_schema {
        let _ = write!(out, "\n{}\n{}", style::info("Output Schema:"), pretty(output));
    }
    out
}

pub fn resources(server: &str, resources: &[ResourceDescriptor]) -> String {
    if resources.is_empty() {
        return style::warning(&format!("No resources exposed by '{server}'"));
    }
    let mut out = format!("{} {}:", style::info("Resources for"), style::highlight(server));
    for (idx, resource) in resources.iter().enumerate() {
        let _ = write!(out, "\n  {}. {} {}", idx + 1, style::highlight(&resource.name), resource.uri);
        if let Some(mime) = &resource.mime_type {
            let _ = write!(out, " {}", style::dim(&format!("({mime})")));
        }
    }
    out
}

/// Header line plus pretty-printed payload for one call.
pub fn call_result(tool: &str, result: &ToolCallResult, elapsed_secs: f64) -> String {
    match result {
        ToolCallResult::Success(_) => format!(
            "{}\n{}\n{}",
            style::call_success(tool, elapsed_secs),
            style::highlight("Result:"),
            pretty(&result.to_json())
        ),
        ToolCallResult::Failure(failure) => format!(
            "{}\n{}",
            style::call_failure(tool, elapsed_secs),
            self::failure(failure)
        ),
    }
}

pub fn failure(failure: &Failure) -> String {
    format!(
        "{} {}",
        style::error(&format!("Error [{}]:", failure.kind.code())),
        failure.message
    )
}

pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
