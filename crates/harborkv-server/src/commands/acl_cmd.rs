use std::sync::Arc;

use harborkv_proto::Resp;

use crate::commands::registry::{
    arity_exact, arity_min, category as cat, no_keys, Command, CommandRegistry, SubCommand,
};
use crate::errors::ServerError;
use crate::handler;
use crate::server::conn::ConnState;
use crate::server::Server;

pub fn register(reg: &mut CommandRegistry) {
    reg.register(Command {
        name: "acl",
        categories: &[cat::ADMIN, cat::SLOW],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(whoami),
        subcommands: vec![
            SubCommand {
                name: "setuser",
                categories: &[cat::ADMIN, cat::SLOW, cat::DANGEROUS],
                sync: false,
                key_extractor: no_keys,
                handler: handler!(setuser),
            },
            SubCommand {
                name: "deluser",
                categories: &[cat::ADMIN, cat::SLOW, cat::DANGEROUS],
                sync: false,
                key_extractor: no_keys,
                handler: handler!(deluser),
            },
            SubCommand {
                name: "getuser",
                categories: &[cat::ADMIN, cat::SLOW],
                sync: false,
                key_extractor: no_keys,
                handler: handler!(getuser),
            },
            SubCommand {
                name: "list",
                categories: &[cat::ADMIN, cat::SLOW],
                sync: false,
                key_extractor: no_keys,
                handler: handler!(list),
            },
            SubCommand {
                name: "whoami",
                categories: &[cat::ADMIN, cat::SLOW],
                sync: false,
                key_extractor: no_keys,
                handler: handler!(whoami),
            },
        ],
    });
}

async fn setuser(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 3, "acl setuser")?;
    server.acl.set_user(&argv[2..])?;
    Ok(Resp::ok())
}

async fn deluser(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 3, "acl deluser")?;
    let dropped = server.acl.delete_users(&argv[2..]);
    // A deleted user's live connections go with it.
    server.kill_connections(&dropped).await;
    Ok(Resp::ok())
}

async fn getuser(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "acl getuser")?;
    let user = server
        .acl
        .get_user(&argv[2])
        .ok_or_else(|| ServerError::NoSuchUser(argv[2].clone()))?;

    let mut flags = vec![Resp::bulk(if user.enabled { "on" } else { "off" })];
    if user.no_password {
        flags.push(Resp::bulk("nopass"));
    }
    if user.no_keys {
        flags.push(Resp::bulk("nokeys"));
    }

    let signed = |included: &[String], excluded: &[String], prefix: &str| {
        let mut out = Vec::new();
        for item in included {
            out.push(Resp::bulk(format!("+{prefix}{item}")));
        }
        for item in excluded {
            out.push(Resp::bulk(format!("-{prefix}{item}")));
        }
        Resp::Array(out)
    };

    let mut key_patterns = Vec::new();
    for pattern in &user.included_read_keys {
        key_patterns.push(Resp::bulk(format!("%R~{pattern}")));
    }
    for pattern in &user.included_write_keys {
        key_patterns.push(Resp::bulk(format!("%W~{pattern}")));
    }

    Ok(Resp::Array(vec![
        Resp::bulk("username"),
        Resp::bulk(&user.username),
        Resp::bulk("flags"),
        Resp::Array(flags),
        Resp::bulk("passwords"),
        Resp::Integer(user.passwords.len() as i64),
        Resp::bulk("categories"),
        signed(&user.included_categories, &user.excluded_categories, "@"),
        Resp::bulk("commands"),
        signed(&user.included_commands, &user.excluded_commands, ""),
        Resp::bulk("keys"),
        Resp::Array(key_patterns),
        Resp::bulk("channels"),
        signed(
            &user.included_pubsub_channels,
            &user.excluded_pubsub_channels,
            "&",
        ),
    ]))
}

async fn list(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "acl list")?;
    let mut usernames = server.acl.list_users();
    usernames.sort();
    Ok(Resp::Array(usernames.into_iter().map(Resp::bulk).collect()))
}

async fn whoami(
    server: &Arc<Server>,
    conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "acl whoami")?;
    Ok(Resp::bulk(server.acl.whoami(conn.id)))
}
