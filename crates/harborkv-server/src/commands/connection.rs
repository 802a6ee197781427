use std::sync::Arc;

use harborkv_proto::Resp;

use crate::commands::registry::{
    arity_exact, category as cat, no_keys, Command, CommandRegistry,
};
use crate::errors::ServerError;
use crate::handler;
use crate::server::conn::ConnState;
use crate::server::Server;

pub fn register(reg: &mut CommandRegistry) {
    reg.register(Command {
        name: "ping",
        categories: &[cat::CONNECTION, cat::FAST],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(ping),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "echo",
        categories: &[cat::CONNECTION, cat::FAST],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(echo),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "auth",
        categories: &[cat::CONNECTION, cat::FAST],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(auth),
        subcommands: vec![],
    });
}

async fn ping(
    _server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    match argv.len() {
        1 => Ok(Resp::Simple("PONG".into())),
        2 => Ok(Resp::bulk(&argv[1])),
        _ => Err(ServerError::WrongArgs("ping")),
    }
}

async fn echo(
    _server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "echo")?;
    Ok(Resp::bulk(&argv[1]))
}

async fn auth(
    server: &Arc<Server>,
    conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    server.acl.authenticate_connection(conn.id, argv)?;
    Ok(Resp::ok())
}
