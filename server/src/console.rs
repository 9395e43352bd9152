//! Line-oriented operator console
//!
//! Each input line parses into a [`Command`], which [`Console::execute`] maps
//! onto the server lifecycle or a [`ServerHandle`](crate::control::ServerHandle)
//! operation. Snapshots come back as JSON text.

use crate::client_registry::SessionId;
use crate::countdown::MAX_COUNTDOWN_SECS;
use crate::error::{Result, ServerError};
use crate::network::Server;
use log::info;
use serde::Serialize;
use std::str::FromStr;

pub const HELP: &str = "\
commands:
  start [port]                         start the server
  stop                                 stop the server
  list                                 list connected clients
  say <text>                           broadcast a server message
  countdown                            start the countdown with current settings
  countdown cancel                     cancel a running countdown
  settings                             show countdown settings
  settings pre|post <commands>         set pre/post countdown commands
  settings duration <secs>             set countdown duration
  kick <name> | kickid <id>            disconnect a client
  ban <name> | banid <id>              ban a client's address
  unban <ip> | bans                    lift a ban / list bans
  accept players|spectators [on|off]   show or set acceptance
  whitelist [on|off]                   show or toggle the whitelist
  whitelist add|remove name|ip <value> edit the whitelist
  help | quit";

/// Countdown parameters used by the `countdown` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownSettings {
    pub pre_commands: String,
    pub post_commands: String,
    pub duration: u32,
}

impl Default for CountdownSettings {
    fn default() -> Self {
        Self {
            pre_commands: String::new(),
            post_commands: String::new(),
            duration: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsUpdate {
    Pre(String),
    Post(String),
    Duration(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Players,
    Spectators,
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::Players => write!(f, "players"),
            Audience::Spectators => write!(f, "spectators"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListTarget {
    Name(String),
    Ip(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { port: Option<u16> },
    Stop,
    List,
    Say(String),
    Countdown,
    CountdownCancel,
    Settings(Option<SettingsUpdate>),
    Kick(String),
    KickId(SessionId),
    Ban(String),
    BanId(SessionId),
    Unban(String),
    Bans,
    Accept {
        audience: Audience,
        value: Option<bool>,
    },
    Whitelist,
    WhitelistEnabled(bool),
    WhitelistAdd(ListTarget),
    WhitelistRemove(ListTarget),
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = ServerError;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = split_word(line);
        let rest = rest.trim();

        let command = match verb {
            "start" => Command::Start {
                port: if rest.is_empty() {
                    None
                } else {
                    Some(parse_number(rest, "port")?)
                },
            },
            "stop" => Command::Stop,
            "list" => Command::List,
            "say" => Command::Say(required(rest, "message")?),
            "countdown" => match rest {
                "" => Command::Countdown,
                "cancel" => Command::CountdownCancel,
                other => return Err(unknown(other)),
            },
            "settings" => Command::Settings(parse_settings(rest)?),
            "kick" => Command::Kick(required(rest, "name")?),
            "kickid" => Command::KickId(parse_number(rest, "id")?),
            "ban" => Command::Ban(required(rest, "name")?),
            "banid" => Command::BanId(parse_number(rest, "id")?),
            "unban" => Command::Unban(required(rest, "ip")?),
            "bans" => Command::Bans,
            "accept" => {
                let (kind, value) = split_word(rest);
                let audience = match kind {
                    "players" => Audience::Players,
                    "spectators" => Audience::Spectators,
                    _ => {
                        return Err(ServerError::validation(
                            "usage: accept players|spectators [on|off]",
                        ))
                    }
                };
                let value = match value.trim() {
                    "" => None,
                    toggle => Some(parse_toggle(toggle)?),
                };
                Command::Accept { audience, value }
            }
            "whitelist" => parse_whitelist(rest)?,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "" => return Err(ServerError::validation("empty command")),
            other => return Err(unknown(other)),
        };

        Ok(command)
    }
}

fn parse_settings(rest: &str) -> Result<Option<SettingsUpdate>> {
    if rest.is_empty() {
        return Ok(None);
    }

    let (field, value) = split_word(rest);
    let value = value.trim();
    let update = match field {
        "pre" => SettingsUpdate::Pre(value.to_string()),
        "post" => SettingsUpdate::Post(value.to_string()),
        "duration" => {
            let duration: u32 = parse_number(value, "duration")?;
            if duration == 0 || duration > MAX_COUNTDOWN_SECS {
                return Err(ServerError::validation(format!(
                    "duration must be between 1 and {}",
                    MAX_COUNTDOWN_SECS
                )));
            }
            SettingsUpdate::Duration(duration)
        }
        _ => {
            return Err(ServerError::validation(
                "usage: settings [pre|post|duration <value>]",
            ))
        }
    };
    Ok(Some(update))
}

fn parse_whitelist(rest: &str) -> Result<Command> {
    let (action, rest) = split_word(rest);
    match action {
        "" => Ok(Command::Whitelist),
        "on" | "off" => Ok(Command::WhitelistEnabled(parse_toggle(action)?)),
        "add" | "remove" => {
            let (kind, value) = split_word(rest.trim());
            let value = required(value.trim(), "value")?;
            let target = match kind {
                "name" => ListTarget::Name(value),
                "ip" => ListTarget::Ip(value),
                _ => {
                    return Err(ServerError::validation(
                        "usage: whitelist add|remove name|ip <value>",
                    ))
                }
            };
            Ok(if action == "add" {
                Command::WhitelistAdd(target)
            } else {
                Command::WhitelistRemove(target)
            })
        }
        other => Err(unknown(other)),
    }
}

fn split_word(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest),
        None => (text, ""),
    }
}

fn required(value: &str, what: &str) -> Result<String> {
    if value.is_empty() {
        return Err(ServerError::validation(format!("missing {}", what)));
    }
    Ok(value.to_string())
}

fn parse_number<T: FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ServerError::validation(format!("invalid {}: {:?}", what, value)))
}

fn parse_toggle(value: &str) -> Result<bool> {
    match value {
        "on" | "true" => Ok(true),
        "off" | "false" => Ok(false),
        other => Err(ServerError::validation(format!(
            "expected on or off, got {:?}",
            other
        ))),
    }
}

fn unknown(word: &str) -> ServerError {
    ServerError::validation(format!("unknown command {:?}, try help", word))
}

/// What the caller should do after a command ran
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    Quit,
}

pub struct Console {
    server: Server,
    settings: CountdownSettings,
}

impl Console {
    pub fn new(server: Server, settings: CountdownSettings) -> Self {
        Self { server, settings }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn settings(&self) -> &CountdownSettings {
        &self.settings
    }

    /// Parses and runs one input line
    pub async fn execute_line(&mut self, line: &str) -> Result<Outcome> {
        let command: Command = line.parse()?;
        self.execute(command).await
    }

    pub async fn execute(&mut self, command: Command) -> Result<Outcome> {
        let reply = match command {
            Command::Start { port } => {
                if let Some(port) = port {
                    self.server.set_port(port);
                }
                let address = self.server.start().await?;
                format!("server started on {}", address)
            }
            Command::Stop => {
                self.server.stop().await?;
                "server stopped".to_string()
            }
            Command::List => to_json(&self.server.handle()?.list_clients().await?)?,
            Command::Say(text) => {
                self.server.handle()?.broadcast_message(&text)?;
                "message sent".to_string()
            }
            Command::Countdown => {
                let settings = &self.settings;
                self.server.handle()?.start_countdown(
                    &settings.pre_commands,
                    &settings.post_commands,
                    settings.duration,
                )?;
                info!("Countdown of {}s started", settings.duration);
                format!("countdown started ({}s)", settings.duration)
            }
            Command::CountdownCancel => {
                if self.server.handle()?.cancel_countdown().await? {
                    "countdown cancelled".to_string()
                } else {
                    "no countdown running".to_string()
                }
            }
            Command::Settings(update) => {
                match update {
                    Some(SettingsUpdate::Pre(commands)) => self.settings.pre_commands = commands,
                    Some(SettingsUpdate::Post(commands)) => self.settings.post_commands = commands,
                    Some(SettingsUpdate::Duration(duration)) => self.settings.duration = duration,
                    None => {}
                }
                to_json(&self.settings)?
            }
            Command::Kick(name) => {
                let count = self.server.handle()?.disconnect_by_name(&name).await?;
                format!("kicked {} client(s)", count)
            }
            Command::KickId(id) => {
                if self.server.handle()?.disconnect_by_id(id).await? {
                    format!("kicked client {}", id)
                } else {
                    format!("no client with id {}", id)
                }
            }
            Command::Ban(name) => {
                let count = self.server.handle()?.ban_by_name(&name).await?;
                format!("banned {} address(es)", count)
            }
            Command::BanId(id) => {
                if self.server.handle()?.ban_by_id(id).await? {
                    format!("banned client {}", id)
                } else {
                    format!("no client with id {}", id)
                }
            }
            Command::Unban(ip) => {
                if self.server.handle()?.unban(&ip).await? {
                    format!("unbanned {}", ip)
                } else {
                    format!("{} was not banned", ip)
                }
            }
            Command::Bans => to_json(&self.server.handle()?.list_bans().await?)?,
            Command::Accept { audience, value } => {
                let handle = self.server.handle()?;
                match (audience, value) {
                    (Audience::Players, Some(value)) => handle.set_accepting_players(value).await?,
                    (Audience::Spectators, Some(value)) => {
                        handle.set_accepting_spectators(value).await?
                    }
                    (_, None) => {}
                }
                let current = match audience {
                    Audience::Players => handle.accepting_players(),
                    Audience::Spectators => handle.accepting_spectators(),
                };
                format!("accepting {}: {}", audience, current)
            }
            Command::Whitelist => to_json(&self.server.handle()?.whitelist().await?)?,
            Command::WhitelistEnabled(enabled) => {
                self.server.handle()?.set_whitelist_enabled(enabled).await?;
                format!("whitelist enabled: {}", enabled)
            }
            Command::WhitelistAdd(target) => {
                let handle = self.server.handle()?;
                let added = match &target {
                    ListTarget::Name(name) => handle.add_name_to_whitelist(name).await?,
                    ListTarget::Ip(ip) => handle.add_ip_to_whitelist(ip).await?,
                };
                if added {
                    "whitelist entry added".to_string()
                } else {
                    "already whitelisted".to_string()
                }
            }
            Command::WhitelistRemove(target) => {
                let handle = self.server.handle()?;
                let removed = match &target {
                    ListTarget::Name(name) => handle.remove_name_from_whitelist(name).await?,
                    ListTarget::Ip(ip) => handle.remove_ip_from_whitelist(ip).await?,
                };
                if removed {
                    "whitelist entry removed".to_string()
                } else {
                    "not whitelisted".to_string()
                }
            }
            Command::Help => HELP.to_string(),
            Command::Quit => return Ok(Outcome::Quit),
        };

        Ok(Outcome::Reply(reply))
    }

    /// Stops the server if it is still running
    pub async fn shutdown(&mut self) -> Result<()> {
        self.server.stop().await
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| ServerError::Operation(e.to_string()))
}
