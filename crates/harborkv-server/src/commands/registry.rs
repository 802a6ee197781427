use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use harborkv_proto::Resp;

use crate::errors::ServerError;
use crate::server::conn::ConnState;
use crate::server::Server;

/// The fixed category tags commands may carry.
pub mod category {
    pub const CONNECTION: &str = "connection";
    pub const SLOW: &str = "slow";
    pub const FAST: &str = "fast";
    pub const ADMIN: &str = "admin";
    pub const DANGEROUS: &str = "dangerous";
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const PUBSUB: &str = "pubsub";
    pub const STRING: &str = "string";
    pub const LIST: &str = "list";
    pub const SET: &str = "set";
    pub const SORTED_SET: &str = "sorted_set";
    pub const HASH: &str = "hash";
}

/// Keys and channels a command touches, as reported by its extractor and
/// consumed by ACL authorization.
#[derive(Debug, Default, Clone)]
pub struct CommandKeys {
    pub read_keys: Vec<String>,
    pub write_keys: Vec<String>,
    pub channels: Vec<String>,
}

pub type KeyExtractor = fn(&[String]) -> Result<CommandKeys, ServerError>;

pub type HandlerFuture<'a> = BoxFuture<'a, Result<Resp, ServerError>>;

pub type Handler = for<'a> fn(
    &'a Arc<Server>,
    &'a mut ConnState,
    &'a [String],
    bool,
) -> HandlerFuture<'a>;

/// Wrap an `async fn(server, conn, argv, replay)` into a registrable handler.
#[macro_export]
macro_rules! handler {
    ($f:path) => {{
        fn __boxed<'a>(
            server: &'a std::sync::Arc<$crate::server::Server>,
            conn: &'a mut $crate::server::conn::ConnState,
            argv: &'a [String],
            replay: bool,
        ) -> $crate::commands::registry::HandlerFuture<'a> {
            Box::pin($f(server, conn, argv, replay))
        }
        __boxed as $crate::commands::registry::Handler
    }};
}

pub struct SubCommand {
    pub name: &'static str,
    pub categories: &'static [&'static str],
    pub sync: bool,
    pub key_extractor: KeyExtractor,
    pub handler: Handler,
}

pub struct Command {
    pub name: &'static str,
    pub categories: &'static [&'static str],
    pub sync: bool,
    pub key_extractor: KeyExtractor,
    pub handler: Handler,
    pub subcommands: Vec<SubCommand>,
}

/// The effective command entry after subcommand resolution.
#[derive(Copy, Clone)]
pub struct Resolved<'a> {
    pub command: &'a Command,
    pub subcommand: Option<&'a SubCommand>,
}

impl<'a> Resolved<'a> {
    pub fn categories(&self) -> &'static [&'static str] {
        self.subcommand.map_or(self.command.categories, |s| s.categories)
    }

    pub fn sync(&self) -> bool {
        self.subcommand.map_or(self.command.sync, |s| s.sync)
    }

    pub fn key_extractor(&self) -> KeyExtractor {
        self.subcommand
            .map_or(self.command.key_extractor, |s| s.key_extractor)
    }

    pub fn handler(&self) -> Handler {
        self.subcommand.map_or(self.command.handler, |s| s.handler)
    }

    pub fn is_write(&self) -> bool {
        self.categories().contains(&category::WRITE)
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, Command>,
}

impl CommandRegistry {
    pub fn register(&mut self, command: Command) {
        self.commands.insert(command.name, command);
    }

    /// Look up `argv[0]` (and `argv[1]` for commands with subcommands),
    /// case-insensitively.
    pub fn resolve<'a>(&'a self, argv: &[String]) -> Result<Resolved<'a>, ServerError> {
        let name = argv
            .first()
            .ok_or(ServerError::WrongArgs("command"))?
            .to_lowercase();
        let command = self
            .commands
            .get(name.as_str())
            .ok_or_else(|| ServerError::UnknownCommand(name.clone()))?;
        if command.subcommands.is_empty() {
            return Ok(Resolved {
                command,
                subcommand: None,
            });
        }
        let sub_name = argv
            .get(1)
            .ok_or(ServerError::WrongArgs("subcommand"))?;
        let subcommand = command
            .subcommands
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(sub_name))
            .ok_or_else(|| ServerError::UnknownSubCommand(name.clone(), sub_name.clone()))?;
        Ok(Resolved {
            command,
            subcommand: Some(subcommand),
        })
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

pub fn no_keys(_argv: &[String]) -> Result<CommandKeys, ServerError> {
    Ok(CommandKeys::default())
}

pub fn arity_exact(argv: &[String], n: usize, name: &'static str) -> Result<(), ServerError> {
    if argv.len() != n {
        return Err(ServerError::WrongArgs(name));
    }
    Ok(())
}

pub fn arity_min(argv: &[String], n: usize, name: &'static str) -> Result<(), ServerError> {
    if argv.len() < n {
        return Err(ServerError::WrongArgs(name));
    }
    Ok(())
}
