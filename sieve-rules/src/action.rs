//! Actions fired by a matching rule.
//!
//! Actions are a closed tagged variant: `log` writes a fixed-format line to
//! stderr, `block` serves a canned `429` rejection, `shell` spawns an
//! external command rendered from selector values. Each action declares the
//! response state it contributes up front so the evaluator can skip a second
//! serving action once one has already produced a response. New kinds are
//! added by extending the enum and its dispatch.

use std::io::{self, Write};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::RequestContext;
use crate::error::{ActionError, LoadError};
use crate::selector::Selector;
use crate::state::ResponseState;

/// Default body served by the `block` action.
pub const DEFAULT_BLOCK_MESSAGE: &str = "Blocked";

/// Raw `{name, params}` pair as it appears in the rule file. Kept alongside
/// the compiled action so state dumps can echo the configuration back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// A compiled action. Parameters are validated at load time; `act` never
/// fails on configuration, only on I/O.
#[derive(Debug)]
pub enum Action {
    Log(LogAction),
    Block(BlockAction),
    Shell(ShellAction),
}

impl Action {
    /// Instantiates an action from its rule-file spec. Unknown names and
    /// missing or wrongly typed parameters are load errors.
    pub fn from_spec(spec: &ActionSpec) -> Result<Action, LoadError> {
        match spec.name.as_str() {
            "log" => Ok(Action::Log(LogAction::from_params(&spec.params)?)),
            "block" => Ok(Action::Block(BlockAction::from_params(&spec.params)?)),
            "shell" => Ok(Action::Shell(ShellAction::from_params(&spec.params)?)),
            other => Err(LoadError::UnknownAction(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Log(_) => "log",
            Action::Block(_) => "block",
            Action::Shell(_) => "shell",
        }
    }

    /// The response state this action contributes when it fires.
    pub fn response_state(&self) -> ResponseState {
        match self {
            Action::Log(_) => ResponseState::Untouched,
            Action::Block(_) => ResponseState::Served,
            Action::Shell(_) => ResponseState::Untouched,
        }
    }

    /// Fires the action for `rule_name` against `ctx`.
    pub fn act<C: RequestContext>(&self, rule_name: &str, ctx: &mut C) -> Result<(), ActionError> {
        match self {
            Action::Log(action) => action.act(rule_name, ctx),
            Action::Block(action) => action.act(ctx),
            Action::Shell(action) => action.act(ctx),
        }
    }
}

/// Writes one line per firing to stderr.
///
/// Line format:
/// `[<rule>] <YYYY-MM-DD HH:MM:SS.sss> <X-Forwarded-For> <METHOD> <HOST><URI> "<BODY>" "<USER-AGENT>"`
#[derive(Debug)]
pub struct LogAction;

impl LogAction {
    fn from_params(params: &Map<String, Value>) -> Result<LogAction, LoadError> {
        // only the stderr destination is wired up; the value must still be
        // a string for the rule file to load
        if let Some(destination) = params.get("destination") {
            if !destination.is_string() {
                return Err(LoadError::ActionParam {
                    action: "log",
                    param: "destination",
                    problem: "must be a string",
                });
            }
        }
        Ok(LogAction)
    }

    fn act<C: RequestContext + ?Sized>(&self, rule_name: &str, ctx: &C) -> Result<(), ActionError> {
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();
        let line = format_line(rule_name, &timestamp, ctx);
        let stderr = io::stderr();
        let mut sink = stderr.lock();
        writeln!(sink, "{}", line).map_err(ActionError::Log)
    }
}

fn format_line<C: RequestContext + ?Sized>(rule_name: &str, timestamp: &str, ctx: &C) -> String {
    format!(
        "[{}] {} {} {} {}{} \"{}\" \"{}\"",
        rule_name,
        timestamp,
        ctx.header("X-Forwarded-For").unwrap_or(""),
        ctx.method(),
        ctx.host(),
        ctx.uri(),
        String::from_utf8_lossy(ctx.body()),
        ctx.header("User-Agent").unwrap_or(""),
    )
}

/// Serves `429 Too Many Requests` with a configurable message body.
#[derive(Debug)]
pub struct BlockAction {
    message: Vec<u8>,
}

impl BlockAction {
    fn from_params(params: &Map<String, Value>) -> Result<BlockAction, LoadError> {
        let message = match params.get("message") {
            Some(Value::String(message)) => message.clone().into_bytes(),
            Some(_) => {
                return Err(LoadError::ActionParam {
                    action: "block",
                    param: "message",
                    problem: "must be a string",
                })
            }
            None => DEFAULT_BLOCK_MESSAGE.as_bytes().to_vec(),
        };
        Ok(BlockAction { message })
    }

    fn act<C: RequestContext + ?Sized>(&self, ctx: &mut C) -> Result<(), ActionError> {
        ctx.set_status_code(429);
        ctx.write(&self.message);
        Ok(())
    }
}

/// Spawns an external command rendered from the request.
///
/// `cmd` is a template whose `%v` placeholders are filled left to right
/// with the values extracted by the `args` selectors. The rendered string
/// is split on whitespace; the first token is the program, the rest its
/// arguments. The child inherits the proxy's stdout and stderr.
#[derive(Debug)]
pub struct ShellAction {
    cmd: String,
    args: Vec<Selector>,
}

impl ShellAction {
    fn from_params(params: &Map<String, Value>) -> Result<ShellAction, LoadError> {
        let cmd = match params.get("cmd") {
            Some(Value::String(cmd)) => cmd.clone(),
            Some(_) => {
                return Err(LoadError::ActionParam {
                    action: "shell",
                    param: "cmd",
                    problem: "must be a string",
                })
            }
            None => {
                return Err(LoadError::ActionParam {
                    action: "shell",
                    param: "cmd",
                    problem: "is required",
                })
            }
        };
        let mut args = Vec::new();
        match params.get("args") {
            None => {}
            Some(Value::Array(items)) => {
                for item in items {
                    let raw = item.as_str().ok_or(LoadError::ActionParam {
                        action: "shell",
                        param: "args",
                        problem: "must be an array of selector strings",
                    })?;
                    args.push(Selector::parse(raw).map_err(|source| LoadError::Selector {
                        selector: raw.to_string(),
                        source,
                    })?);
                }
            }
            Some(_) => {
                return Err(LoadError::ActionParam {
                    action: "shell",
                    param: "args",
                    problem: "must be an array of selector strings",
                })
            }
        }
        Ok(ShellAction { cmd, args })
    }

    fn render<C: RequestContext + ?Sized>(&self, ctx: &C) -> String {
        let mut rendered = self.cmd.clone();
        for selector in &self.args {
            let (value, _) = selector.matches(ctx);
            rendered = rendered.replacen("%v", &value, 1);
        }
        rendered
    }

    fn act<C: RequestContext + ?Sized>(&self, ctx: &C) -> Result<(), ActionError> {
        let rendered = self.render(ctx);
        let mut parts = rendered.split_whitespace();
        let program = parts.next().ok_or(ActionError::EmptyCommand)?;
        let mut child = Command::new(program)
            .args(parts)
            .spawn()
            .map_err(|source| ActionError::Spawn {
                command: rendered.clone(),
                source,
            })?;
        // reap in the background so finished commands do not linger
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}
