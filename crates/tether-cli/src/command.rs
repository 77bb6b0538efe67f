//! REPL command parsing.

use serde_json::Value;

/// One line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Servers,
    Connect(String),
    Tools(String),
    Info {
        server: String,
        tool: Option<String>,
    },
    /// `arguments` is `None` when they should be prompted for.
    Call {
        server: String,
        tool: String,
        arguments: Option<Value>,
    },
    Resources(String),
    Refresh(String),
    Disconnect(String),
    Exit,
    Empty,
}

pub const USAGE: &[(&str, &str)] = &[
    ("servers", "List configured servers"),
    ("connect <server>", "Connect to a server"),
    ("tools <server>", "List tools for a server"),
    ("info <server> [tool]", "Show tool descriptions and input schemas"),
    ("call <server> <tool> [json]", "Call a tool; prompts for arguments without json"),
    ("resources <server>", "List resources a server exposes"),
    ("refresh <server>", "Re-fetch a server's tool list"),
    ("disconnect <server>", "Close a server connection"),
    ("help", "Show this help"),
    ("exit, quit", "Leave tether"),
];

impl Command {
    /// Parse one input line. The error is a message for the operator.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        let (verb, rest) = next_word(input);
        let verb = verb.to_lowercase();

        match verb.as_str() {
            "" => Ok(Command::Empty),
            "help" | "?" => Ok(Command::Help),
            "servers" => Ok(Command::Servers),
            "exit" | "quit" | "q" => Ok(Command::Exit),
            "connect" => one_server(rest, "connect <server>").map(Command::Connect),
            "tools" => one_server(rest, "tools <server>").map(Command::Tools),
            "resources" => one_server(rest, "resources <server>").map(Command::Resources),
            "refresh" => one_server(rest, "refresh <server>").map(Command::Refresh),
            "disconnect" => one_server(rest, "disconnect <server>").map(Command::Disconnect),
            "info" => {
                let (server, rest) = next_word(rest);
                let (tool, _) = next_word(rest);
                if server.is_empty() {
                    return Err(usage("info <server> [tool]"));
                }
                Ok(Command::Info {
                    server: server.to_string(),
                    tool: (!tool.is_empty()).then(|| tool.to_string()),
                })
            }
            "call" => {
                let (server, rest) = next_word(rest);
                let (tool, json) = next_word(rest);
                if server.is_empty() || tool.is_empty() {
                    return Err(usage("call <server> <tool> [json]"));
                }
                let arguments = if json.is_empty() {
                    None
                } else {
                    Some(
                        serde_json::from_str(json)
                            .map_err(|e| format!("Invalid JSON arguments: {e}"))?,
                    )
                };
                Ok(Command::Call {
                    server: server.to_string(),
                    tool: tool.to_string(),
                    arguments,
                })
            }
            other => Err(format!(
                "Unknown command: {other}. Type 'help' for available commands."
            )),
        }
    }
}

/// Split off the first whitespace-delimited word; the remainder is trimmed.
fn next_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

fn one_server(rest: &str, form: &str) -> Result<String, String> {
    let (server, extra) = next_word(rest);
    if server.is_empty() || !extra.is_empty() {
        return Err(usage(form));
    }
    Ok(server.to_string())
}

fn usage(form: &str) -> String {
    format!("Usage: {form}")
}
