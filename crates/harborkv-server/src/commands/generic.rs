use std::sync::Arc;

use harborkv_proto::Resp;

use crate::commands::registry::{
    arity_exact, arity_min, category as cat, no_keys, Command, CommandKeys, CommandRegistry,
};
use crate::errors::ServerError;
use crate::glob::glob_match;
use crate::handler;
use crate::server::conn::ConnState;
use crate::server::Server;
use crate::time::now_ms;

pub fn register(reg: &mut CommandRegistry) {
    reg.register(Command {
        name: "del",
        categories: &[cat::WRITE, cat::FAST],
        sync: true,
        key_extractor: all_write_keys,
        handler: handler!(del),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "exists",
        categories: &[cat::READ, cat::FAST],
        sync: false,
        key_extractor: all_read_keys,
        handler: handler!(exists),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "type",
        categories: &[cat::READ, cat::FAST],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(type_of),
        subcommands: vec![],
    });
    for name in ["expire", "pexpire"] {
        reg.register(Command {
            name,
            categories: &[cat::WRITE, cat::FAST],
            sync: true,
            key_extractor: write_key_1,
            handler: handler!(expire),
            subcommands: vec![],
        });
    }
    for name in ["ttl", "pttl"] {
        reg.register(Command {
            name,
            categories: &[cat::READ, cat::FAST],
            sync: false,
            key_extractor: read_key_1,
            handler: handler!(ttl),
            subcommands: vec![],
        });
    }
    reg.register(Command {
        name: "persist",
        categories: &[cat::WRITE, cat::FAST],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(persist),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "keys",
        categories: &[cat::READ, cat::SLOW, cat::DANGEROUS],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(keys),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "dbsize",
        categories: &[cat::READ, cat::FAST],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(dbsize),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "flushall",
        categories: &[cat::WRITE, cat::SLOW, cat::ADMIN, cat::DANGEROUS],
        sync: true,
        key_extractor: no_keys,
        handler: handler!(flushall),
        subcommands: vec![],
    });
}

fn read_key_1(argv: &[String]) -> Result<CommandKeys, ServerError> {
    arity_min(argv, 2, "key")?;
    Ok(CommandKeys {
        read_keys: vec![argv[1].clone()],
        ..CommandKeys::default()
    })
}

fn write_key_1(argv: &[String]) -> Result<CommandKeys, ServerError> {
    arity_min(argv, 2, "key")?;
    Ok(CommandKeys {
        write_keys: vec![argv[1].clone()],
        ..CommandKeys::default()
    })
}

fn all_read_keys(argv: &[String]) -> Result<CommandKeys, ServerError> {
    arity_min(argv, 2, "keys")?;
    Ok(CommandKeys {
        read_keys: argv[1..].to_vec(),
        ..CommandKeys::default()
    })
}

fn all_write_keys(argv: &[String]) -> Result<CommandKeys, ServerError> {
    arity_min(argv, 2, "keys")?;
    Ok(CommandKeys {
        write_keys: argv[1..].to_vec(),
        ..CommandKeys::default()
    })
}

async fn del(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 2, "del")?;
    let mut deleted = 0;
    for key in &argv[1..] {
        match server.keyspace.delete_key(key).await {
            Ok(()) => deleted += 1,
            Err(ServerError::KeyNotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Resp::Integer(deleted))
}

async fn exists(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 2, "exists")?;
    let mut present = 0;
    for key in &argv[1..] {
        if server.keyspace.key_exists(key).await {
            present += 1;
        }
    }
    Ok(Resp::Integer(present))
}

async fn type_of(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "type")?;
    let key = &argv[1];
    let ks = &server.keyspace;
    if !ks.key_exists(key).await {
        return Ok(Resp::Simple("none".into()));
    }
    match ks.rlock_key(key).await {
        Ok(()) => {}
        Err(ServerError::KeyNotFound(_)) => return Ok(Resp::Simple("none".into())),
        Err(e) => return Err(e),
    }
    let result = ks.get_value(key).await;
    ks.runlock_key(key);
    match result {
        Ok(value) => Ok(Resp::Simple(value.type_name().into())),
        Err(ServerError::KeyNotFound(_)) => Ok(Resp::Simple("none".into())),
        Err(e) => Err(e),
    }
}

async fn expire(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "expire")?;
    let key = &argv[1];
    let amount: i64 = argv[2]
        .parse()
        .map_err(|_| ServerError::Value("expire time is not an integer".into()))?;
    let millis = if argv[0].eq_ignore_ascii_case("pexpire") {
        amount
    } else {
        amount.saturating_mul(1000)
    };

    let ks = &server.keyspace;
    if !ks.key_exists(key).await {
        return Ok(Resp::Integer(0));
    }
    match ks.lock_key(key).await {
        Ok(()) => {}
        Err(ServerError::KeyNotFound(_)) => return Ok(Resp::Integer(0)),
        Err(e) => return Err(e),
    }
    let at = (now_ms() as i64).saturating_add(millis).max(1) as u64;
    let result = ks.set_expiry(key, at, true).await;
    ks.unlock_key(key);
    result?;
    Ok(Resp::Integer(1))
}

async fn ttl(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "ttl")?;
    let key = &argv[1];
    let ks = &server.keyspace;
    if !ks.key_exists(key).await {
        return Ok(Resp::Integer(-2));
    }
    let at = match ks.get_expiry(key) {
        Ok(at) => at,
        Err(ServerError::KeyNotFound(_)) => return Ok(Resp::Integer(-2)),
        Err(e) => return Err(e),
    };
    if at == 0 {
        return Ok(Resp::Integer(-1));
    }
    let remaining_ms = at.saturating_sub(now_ms()) as i64;
    if argv[0].eq_ignore_ascii_case("pttl") {
        Ok(Resp::Integer(remaining_ms))
    } else {
        Ok(Resp::Integer(remaining_ms / 1000))
    }
}

async fn persist(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "persist")?;
    let key = &argv[1];
    let ks = &server.keyspace;
    if !ks.key_exists(key).await {
        return Ok(Resp::Integer(0));
    }
    match ks.lock_key(key).await {
        Ok(()) => {}
        Err(ServerError::KeyNotFound(_)) => return Ok(Resp::Integer(0)),
        Err(e) => return Err(e),
    }
    let had_expiry = ks.get_expiry(key).map(|at| at != 0).unwrap_or(false);
    let result = ks.remove_expiry(key);
    ks.unlock_key(key);
    result?;
    Ok(Resp::Integer(if had_expiry { 1 } else { 0 }))
}

async fn keys(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "keys")?;
    let pattern = &argv[1];
    let mut names: Vec<String> = server
        .keyspace
        .live_keys()
        .into_iter()
        .filter(|k| glob_match(pattern, k))
        .collect();
    names.sort();
    Ok(Resp::Array(names.into_iter().map(Resp::bulk).collect()))
}

async fn dbsize(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 1, "dbsize")?;
    Ok(Resp::Integer(server.keyspace.len() as i64))
}

async fn flushall(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 1, "flushall")?;
    server.keyspace.flush_all();
    Ok(Resp::ok())
}
