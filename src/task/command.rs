//! Command grammar for agent tasks.
//!
//! Commands are read one per line from the text parts of a task message:
//! `name` or `name(args)`. Free text is ignored, so commands can be mixed
//! with ordinary prose.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::protocol::a2a::TaskMessage;

lazy_static! {
    static ref COMMAND_LINE: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?$")
        .expect("Invalid command regex");
    static ref DURATION: Regex =
        Regex::new(r"^(\d+)\s*(ms|s)$").expect("Invalid duration regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespondKind {
    Text,
    File,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSpec {
    /// Return a JSON-RPC error with this code.
    Code(i32),
    /// Fail the task with an internal error.
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Wait(Duration),
    Respond { kind: RespondKind, payload: String },
    Ask(String),
    Stream(u32),
    Error(ErrorSpec),
    GetHeaders,
    Unknown(String),
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::Wait(_) => "wait",
            Command::Respond { .. } => "respond",
            Command::Ask(_) => "ask",
            Command::Stream(_) => "stream",
            Command::Error(_) => "error",
            Command::GetHeaders => "get_headers",
            Command::Unknown(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandParseError {
    #[error("invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },
}

fn invalid(command: &str, reason: impl Into<String>) -> CommandParseError {
    CommandParseError::InvalidArguments {
        command: command.to_string(),
        reason: reason.into(),
    }
}

/// Parse one line. `None` means the line is not a command at all.
pub fn parse_line(line: &str) -> Option<Result<Command, CommandParseError>> {
    let captures = COMMAND_LINE.captures(line.trim())?;
    let name = captures.get(1)?.as_str();
    let args = captures.get(2).map(|m| m.as_str().trim());
    Some(parse_command(name, args))
}

fn parse_command(name: &str, args: Option<&str>) -> Result<Command, CommandParseError> {
    match name {
        "wait" => {
            let arg = required(name, args)?;
            parse_duration(strip_key(arg, "duration"))
                .map(Command::Wait)
                .ok_or_else(|| invalid(name, format!("bad duration {:?}", arg)))
        }
        "respond" => {
            let arg = required(name, args)?;
            let (kind, payload) = arg
                .split_once(',')
                .ok_or_else(|| invalid(name, "expected kind and payload"))?;
            let kind = match strip_key(kind.trim(), "kind") {
                "text" => RespondKind::Text,
                "file" => RespondKind::File,
                "data" => RespondKind::Data,
                other => return Err(invalid(name, format!("unknown kind {:?}", other))),
            };
            Ok(Command::Respond {
                kind,
                payload: unquote(strip_key(payload.trim(), "payload")),
            })
        }
        "ask" => {
            let arg = required(name, args)?;
            Ok(Command::Ask(unquote(strip_key(arg, "prompt"))))
        }
        "stream" => {
            let arg = required(name, args)?;
            match strip_key(arg, "count").parse::<u32>() {
                Ok(count) if count > 0 => Ok(Command::Stream(count)),
                _ => Err(invalid(name, format!("bad count {:?}", arg))),
            }
        }
        "error" => {
            let arg = unquote(strip_key(required(name, args)?, "code"));
            if arg == "fail" {
                return Ok(Command::Error(ErrorSpec::Fail));
            }
            arg.parse::<i32>()
                .map(|code| Command::Error(ErrorSpec::Code(code)))
                .map_err(|_| invalid(name, format!("bad code {:?}", arg)))
        }
        "get_headers" => match args {
            None | Some("") => Ok(Command::GetHeaders),
            Some(_) => Err(invalid(name, "takes no arguments")),
        },
        other => Ok(Command::Unknown(other.to_string())),
    }
}

fn required<'a>(command: &str, args: Option<&'a str>) -> Result<&'a str, CommandParseError> {
    match args {
        Some(arg) if !arg.is_empty() => Ok(arg),
        _ => Err(invalid(command, "missing argument")),
    }
}

/// Accepts both `value` and `key=value`.
fn strip_key<'a>(arg: &'a str, key: &str) -> &'a str {
    arg.strip_prefix(key)
        .and_then(|rest| rest.trim_start().strip_prefix('='))
        .map(str::trim)
        .unwrap_or(arg)
}

/// Decode a JSON string literal; anything else is taken verbatim.
fn unquote(arg: &str) -> String {
    if arg.starts_with('"') {
        if let Ok(decoded) = serde_json::from_str::<String>(arg) {
            return decoded;
        }
    }
    arg.to_string()
}

fn parse_duration(arg: &str) -> Option<Duration> {
    let captures = DURATION.captures(arg)?;
    let amount: u64 = captures.get(1)?.as_str().parse().ok()?;
    match captures.get(2)?.as_str() {
        "ms" => Some(Duration::from_millis(amount)),
        _ => Some(Duration::from_secs(amount)),
    }
}

/// Every command found in `text`, in order. Malformed commands are dropped.
pub fn parse_commands(text: &str) -> Vec<Command> {
    text.lines()
        .filter_map(parse_line)
        .filter_map(|result| match result {
            Ok(command) => Some(command),
            Err(e) => {
                debug!("Ignoring malformed command: {}", e);
                None
            }
        })
        .collect()
}

/// Commands from every text part of a message.
pub fn parse_message(message: &TaskMessage) -> Vec<Command> {
    message.text_parts().flat_map(parse_commands).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_command() {
        let text = r#"
wait(250ms)
respond(text, "hello, world")
respond(data, {"a": 1})
ask(give me X)
stream(3)
error(-32050)
error(fail)
get_headers
"#;
        assert_eq!(
            parse_commands(text),
            vec![
                Command::Wait(Duration::from_millis(250)),
                Command::Respond {
                    kind: RespondKind::Text,
                    payload: "hello, world".to_string()
                },
                Command::Respond {
                    kind: RespondKind::Data,
                    payload: r#"{"a": 1}"#.to_string()
                },
                Command::Ask("give me X".to_string()),
                Command::Stream(3),
                Command::Error(ErrorSpec::Code(-32050)),
                Command::Error(ErrorSpec::Fail),
                Command::GetHeaders,
            ]
        );
    }

    #[test]
    fn test_keyed_arguments() {
        assert_eq!(
            parse_line("stream(count=3)"),
            Some(Ok(Command::Stream(3)))
        );
        assert_eq!(
            parse_line("wait(duration = 5s)"),
            Some(Ok(Command::Wait(Duration::from_secs(5))))
        );
        assert_eq!(
            parse_line(r#"ask(prompt="give me X")"#),
            Some(Ok(Command::Ask("give me X".to_string())))
        );
    }

    #[test]
    fn test_prose_is_ignored() {
        assert_eq!(parse_line("please do the thing"), None);
        assert!(parse_commands("Hello there, agent.\nThanks!").is_empty());
    }

    #[test]
    fn test_unknown_name_is_kept() {
        assert_eq!(
            parse_commands("dance(twice)"),
            vec![Command::Unknown("dance".to_string())]
        );
    }

    #[test]
    fn test_malformed_arguments_dropped() {
        assert!(matches!(
            parse_line("wait(soon)"),
            Some(Err(CommandParseError::InvalidArguments { .. }))
        ));
        assert!(matches!(parse_line("stream(0)"), Some(Err(_))));
        assert!(matches!(parse_line("respond(audio, x)"), Some(Err(_))));
        assert!(parse_commands("wait(soon)\nstream(0)\nget_headers(now)").is_empty());
    }

    #[test]
    fn test_parse_message_reads_all_text_parts() {
        let mut message = TaskMessage::user_text("respond(text, a)");
        message
            .parts
            .push(crate::protocol::a2a::Part::text("ask(more?)"));
        let commands = parse_message(&message);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].name(), "ask");
    }
}
