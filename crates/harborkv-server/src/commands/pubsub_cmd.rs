use std::sync::Arc;

use harborkv_proto::Resp;

use crate::commands::registry::{
    arity_exact, arity_min, category as cat, no_keys, Command, CommandKeys, CommandRegistry,
    SubCommand,
};
use crate::errors::ServerError;
use crate::handler;
use crate::server::conn::ConnState;
use crate::server::Server;

pub fn register(reg: &mut CommandRegistry) {
    for name in ["subscribe", "psubscribe"] {
        reg.register(Command {
            name,
            categories: &[cat::PUBSUB, cat::CONNECTION, cat::FAST],
            sync: false,
            key_extractor: channel_args,
            handler: handler!(subscribe),
            subcommands: vec![],
        });
    }
    for name in ["unsubscribe", "punsubscribe"] {
        reg.register(Command {
            name,
            categories: &[cat::PUBSUB, cat::CONNECTION, cat::FAST],
            sync: false,
            key_extractor: channel_args,
            handler: handler!(unsubscribe),
            subcommands: vec![],
        });
    }
    reg.register(Command {
        name: "publish",
        categories: &[cat::PUBSUB, cat::FAST],
        // Ordered cluster-wide through the replicator, but not a keyspace
        // write, so it never reaches the AOF.
        sync: true,
        key_extractor: publish_channel,
        handler: handler!(publish),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "pubsub",
        categories: &[cat::PUBSUB, cat::SLOW],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(channels),
        subcommands: vec![
            SubCommand {
                name: "channels",
                categories: &[cat::PUBSUB, cat::SLOW],
                sync: false,
                key_extractor: no_keys,
                handler: handler!(channels),
            },
            SubCommand {
                name: "numsub",
                categories: &[cat::PUBSUB, cat::SLOW],
                sync: false,
                key_extractor: no_keys,
                handler: handler!(numsub),
            },
            SubCommand {
                name: "numpat",
                categories: &[cat::PUBSUB, cat::SLOW],
                sync: false,
                key_extractor: no_keys,
                handler: handler!(numpat),
            },
        ],
    });
}

fn channel_args(argv: &[String]) -> Result<CommandKeys, ServerError> {
    Ok(CommandKeys {
        channels: argv.get(1..).map(|c| c.to_vec()).unwrap_or_default(),
        ..CommandKeys::default()
    })
}

fn publish_channel(argv: &[String]) -> Result<CommandKeys, ServerError> {
    arity_exact(argv, 3, "publish")?;
    Ok(CommandKeys {
        channels: vec![argv[1].clone()],
        ..CommandKeys::default()
    })
}

async fn subscribe(
    server: &Arc<Server>,
    conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 2, "subscribe")?;
    let with_pattern = argv[0].eq_ignore_ascii_case("psubscribe");
    let kind = if with_pattern { "psubscribe" } else { "subscribe" };

    let mut confirmations = Vec::new();
    for name in &argv[1..] {
        server
            .pubsub
            .subscribe(conn.id, name, with_pattern, conn.push_tx.clone());
        let count = if with_pattern {
            conn.patterns.insert(name.clone());
            conn.patterns.len()
        } else {
            conn.channels.insert(name.clone());
            conn.channels.len()
        };
        confirmations.push(Resp::Array(vec![
            Resp::bulk(kind),
            Resp::bulk(name),
            Resp::Integer(count as i64),
        ]));
    }
    if confirmations.len() == 1 {
        return Ok(Resp::Simple(kind.into()));
    }
    Ok(Resp::Array(confirmations))
}

async fn unsubscribe(
    server: &Arc<Server>,
    conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    let with_pattern = argv[0].eq_ignore_ascii_case("punsubscribe");
    let kind = if with_pattern {
        "punsubscribe"
    } else {
        "unsubscribe"
    };

    // No channels means all current subscriptions of the matching kind.
    let requested: Vec<String> = if argv.len() > 1 {
        argv[1..].to_vec()
    } else if with_pattern {
        conn.patterns.iter().cloned().collect()
    } else {
        conn.channels.iter().cloned().collect()
    };

    let mut confirmations = Vec::new();
    for name in &requested {
        let detached = server.pubsub.unsubscribe(conn.id, name, with_pattern);
        if with_pattern {
            conn.patterns.remove(name);
            // A pattern unsubscribe may also detach matching exact channels.
            for channel in &detached {
                conn.channels.remove(channel);
            }
        } else {
            conn.channels.remove(name);
        }
        let remaining = if with_pattern {
            conn.patterns.len()
        } else {
            conn.channels.len()
        };
        confirmations.push(Resp::Array(vec![
            Resp::bulk(kind),
            Resp::bulk(name),
            Resp::Integer(remaining as i64),
        ]));
    }
    if confirmations.len() <= 1 {
        return Ok(Resp::Simple(kind.into()));
    }
    Ok(Resp::Array(confirmations))
}

async fn publish(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "publish")?;
    let receivers = server.pubsub.publish(&argv[1], &argv[2]);
    Ok(Resp::Integer(receivers as i64))
}

async fn channels(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    if argv.len() > 3 {
        return Err(ServerError::WrongArgs("pubsub channels"));
    }
    let names = server.pubsub.channels(argv.get(2).map(|s| s.as_str()));
    Ok(Resp::Array(names.into_iter().map(Resp::bulk).collect()))
}

async fn numsub(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    let names = argv.get(2..).map(|n| n.to_vec()).unwrap_or_default();
    let mut out = Vec::with_capacity(names.len() * 2);
    for (name, count) in server.pubsub.numsub(&names) {
        out.push(Resp::bulk(name));
        out.push(Resp::Integer(count as i64));
    }
    Ok(Resp::Array(out))
}

async fn numpat(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "pubsub numpat")?;
    Ok(Resp::Integer(server.pubsub.numpat() as i64))
}
