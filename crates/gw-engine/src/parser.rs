//! Textual command grammar
//!
//! Whitespace-separated tokens, case-insensitive keywords. Multiple
//! commands separate with `;`. The parser only builds command objects;
//! validation against live state happens at execute time on the audio
//! thread.
//!
//! | command   | arguments                              |
//! |-----------|----------------------------------------|
//! | add       | `<typeName> [instanceName]`            |
//! | remove    | `<instanceName>`                       |
//! | rename    | `<old> <new>`                          |
//! | route     | `<src> <dst> [audio\|video\|event]`    |
//! | unroute   | `<src> [<dst>] [kind]`                 |
//! | set       | `<module> <param> <float>`             |
//! | bpm       | `<float>`                              |
//! | play / stop / pause / reset | —                    |
//! | pattern   | `<name> <stepCount>`                   |
//! | undo / redo | —                                    |
//! | list / connections / patterns | — (queries)        |

use gw_core::{GwError, GwResult};
use gw_module::PortKind;

use crate::commands::{
    AddModuleCommand, AddPatternCommand, ConnectCommand, ConnectParameterCommand,
    DisconnectCommand, EngineCommand, PauseTransportCommand, RemoveModuleCommand,
    RenameModuleCommand, ResetTransportCommand, SetBpmCommand, SetParameterCommand,
    StartTransportCommand, StopTransportCommand,
};

/// Read-only questions answered without touching the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    ListModules,
    ListConnections,
    ListPatterns,
}

/// One parsed action from a command line
pub enum ParsedAction {
    Command(Box<dyn EngineCommand>),
    Undo,
    Redo,
    Query(Query),
}

/// Parse a command line into actions
///
/// Empty lines parse to no actions; unknown keywords and malformed
/// arguments are errors.
pub fn parse_command(line: &str) -> GwResult<Vec<ParsedAction>> {
    let mut actions = Vec::new();
    for part in line.split(';') {
        let tokens: Vec<&str> = part.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        actions.push(parse_tokens(&tokens)?);
    }
    Ok(actions)
}

fn parse_tokens(tokens: &[&str]) -> GwResult<ParsedAction> {
    let keyword = tokens[0].to_ascii_lowercase();
    let args = &tokens[1..];

    let action = match keyword.as_str() {
        "add" => {
            let type_name = expect_arg(args, 0, "add <typeName> [name]")?;
            ParsedAction::Command(Box::new(AddModuleCommand::new(type_name, args.get(1).copied())))
        }
        "remove" => {
            let name = expect_arg(args, 0, "remove <instanceName>")?;
            ParsedAction::Command(Box::new(RemoveModuleCommand::new(name)))
        }
        "rename" => {
            let old = expect_arg(args, 0, "rename <old> <new>")?;
            let new = expect_arg(args, 1, "rename <old> <new>")?;
            ParsedAction::Command(Box::new(RenameModuleCommand::new(old, new)))
        }
        "route" => {
            let source = expect_arg(args, 0, "route <src> <dst> [kind]")?;
            let target = expect_arg(args, 1, "route <src> <dst> [kind]")?;
            let kind = args.get(2).map(|k| parse_kind(k)).transpose()?;
            if kind == Some(PortKind::Parameter) {
                // Parameter links carry dotted paths as src/dst
                ParsedAction::Command(Box::new(ConnectParameterCommand::new(source, target)))
            } else {
                ParsedAction::Command(Box::new(ConnectCommand::new(source, target, kind)))
            }
        }
        "unroute" => {
            let source = expect_arg(args, 0, "unroute <src> [<dst>] [kind]")?;
            // The optional second token may be a target or a kind
            let (target, kind) = match (args.get(1), args.get(2)) {
                (Some(token), None) => match parse_kind(token) {
                    Ok(kind) => (None, Some(kind)),
                    Err(_) => (Some(*token), None),
                },
                (Some(target), Some(kind)) => (Some(*target), Some(parse_kind(kind)?)),
                _ => (None, None),
            };
            ParsedAction::Command(Box::new(DisconnectCommand::new(source, target, kind)))
        }
        "set" => {
            let module = expect_arg(args, 0, "set <module> <param> <value>")?;
            let param = expect_arg(args, 1, "set <module> <param> <value>")?;
            let value = parse_float(expect_arg(args, 2, "set <module> <param> <value>")?)?;
            ParsedAction::Command(Box::new(SetParameterCommand::new(module, param, value)))
        }
        "bpm" => {
            let value = parse_float(expect_arg(args, 0, "bpm <float>")?)?;
            ParsedAction::Command(Box::new(SetBpmCommand::new(value)))
        }
        "play" => ParsedAction::Command(Box::new(StartTransportCommand::new())),
        "stop" => ParsedAction::Command(Box::new(StopTransportCommand::new())),
        "pause" => ParsedAction::Command(Box::new(PauseTransportCommand::new())),
        "reset" => ParsedAction::Command(Box::new(ResetTransportCommand::new())),
        "pattern" => {
            let name = expect_arg(args, 0, "pattern <name> <stepCount>")?;
            let steps: usize = expect_arg(args, 1, "pattern <name> <stepCount>")?
                .parse()
                .map_err(|_| GwError::InvalidParam("step count must be an integer".into()))?;
            ParsedAction::Command(Box::new(AddPatternCommand::new(Some(name), steps)))
        }
        "undo" => ParsedAction::Undo,
        "redo" => ParsedAction::Redo,
        "list" => ParsedAction::Query(Query::ListModules),
        "connections" => ParsedAction::Query(Query::ListConnections),
        "patterns" => ParsedAction::Query(Query::ListPatterns),
        other => {
            return Err(GwError::InvalidParam(format!("unknown command '{other}'")));
        }
    };
    Ok(action)
}

fn expect_arg<'a>(args: &[&'a str], index: usize, usage: &str) -> GwResult<&'a str> {
    args.get(index)
        .copied()
        .ok_or_else(|| GwError::InvalidParam(format!("usage: {usage}")))
}

fn parse_float(token: &str) -> GwResult<f32> {
    token
        .parse()
        .map_err(|_| GwError::InvalidParam(format!("'{token}' is not a number")))
}

fn parse_kind(token: &str) -> GwResult<PortKind> {
    PortKind::parse(token)
        .ok_or_else(|| GwError::InvalidParam(format!("unknown connection kind '{token}'")))
}
