use std::collections::HashMap;
use std::sync::Arc;

use harborkv_proto::Resp;

use crate::commands::registry::{
    arity_exact, arity_min, category as cat, Command, CommandKeys, CommandRegistry,
};
use crate::errors::ServerError;
use crate::handler;
use crate::server::conn::ConnState;
use crate::server::Server;
use crate::store::Value;

pub fn register(reg: &mut CommandRegistry) {
    reg.register(Command {
        name: "hset",
        categories: &[cat::WRITE, cat::FAST, cat::HASH],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(hset),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "hdel",
        categories: &[cat::WRITE, cat::FAST, cat::HASH],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(hdel),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "hget",
        categories: &[cat::READ, cat::FAST, cat::HASH],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(hget),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "hexists",
        categories: &[cat::READ, cat::FAST, cat::HASH],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(hexists),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "hlen",
        categories: &[cat::READ, cat::FAST, cat::HASH],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(hlen),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "hgetall",
        categories: &[cat::READ, cat::SLOW, cat::HASH],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(hgetall),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "hkeys",
        categories: &[cat::READ, cat::SLOW, cat::HASH],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(hkeys),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "hvals",
        categories: &[cat::READ, cat::SLOW, cat::HASH],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(hvals),
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

async fn read_hash(
    server: &Arc<Server>,
    key: &str,
) -> Result<Option<HashMap<String, String>>, ServerError> {
    let ks = &server.keyspace;
    if !ks.key_exists(key).await {
        return Ok(None);
    }
    match ks.rlock_key(key).await {
        Ok(()) => {}
        Err(ServerError::KeyNotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    }
    let result = ks.get_value(key).await;
    ks.runlock_key(key);
    match result {
        Ok(Value::Hash(fields)) => Ok(Some(fields)),
        Ok(_) => Err(ServerError::WrongType(key.to_string())),
        Err(ServerError::KeyNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn hset(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(ServerError::WrongArgs("hset"));
    }
    let key = &argv[1];
    let ks = &server.keyspace;
    let created = ks.create_key_and_lock(key).await?;
    let result = async {
        let mut fields = if created {
            HashMap::new()
        } else {
            match ks.get_value(key).await? {
                Value::Hash(fields) => fields,
                _ => return Err(ServerError::WrongType(key.clone())),
            }
        };
        let mut added = 0;
        for pair in argv[2..].chunks(2) {
            if fields.insert(pair[0].clone(), pair[1].clone()).is_none() {
                added += 1;
            }
        }
        ks.set_value(key, Value::Hash(fields)).await?;
        Ok(Resp::Integer(added))
    }
    .await;
    ks.unlock_key(key);
    result
}

async fn hdel(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 3, "hdel")?;
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
    let result: Result<(Resp, bool), ServerError> = async {
        let mut fields = match ks.get_value(key).await? {
            Value::Hash(fields) => fields,
            _ => return Err(ServerError::WrongType(key.clone())),
        };
        let mut removed = 0;
        for field in &argv[2..] {
            if fields.remove(field).is_some() {
                removed += 1;
            }
        }
        if fields.is_empty() {
            // Deleting the last field deletes the key, lock included.
            ks.remove_entry(key);
            Ok((Resp::Integer(removed), false))
        } else {
            ks.set_value(key, Value::Hash(fields)).await?;
            Ok((Resp::Integer(removed), true))
        }
    }
    .await;
    crate::commands::finish_write(ks, key, result)
}

async fn hget(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "hget")?;
    Ok(read_hash(server, &argv[1])
        .await?
        .and_then(|fields| fields.get(&argv[2]).cloned())
        .map(Resp::bulk)
        .unwrap_or(Resp::Null))
}

async fn hexists(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "hexists")?;
    let present = read_hash(server, &argv[1])
        .await?
        .map_or(false, |fields| fields.contains_key(&argv[2]));
    Ok(Resp::Integer(if present { 1 } else { 0 }))
}

async fn hlen(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "hlen")?;
    let count = read_hash(server, &argv[1]).await?.map_or(0, |f| f.len());
    Ok(Resp::Integer(count as i64))
}

async fn hgetall(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "hgetall")?;
    let mut sorted: Vec<(String, String)> = read_hash(server, &argv[1])
        .await?
        .map(|fields| fields.into_iter().collect())
        .unwrap_or_default();
    sorted.sort();
    let mut out = Vec::with_capacity(sorted.len() * 2);
    for (field, value) in sorted {
        out.push(Resp::bulk(field));
        out.push(Resp::bulk(value));
    }
    Ok(Resp::Array(out))
}

async fn hkeys(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "hkeys")?;
    let mut fields: Vec<String> = read_hash(server, &argv[1])
        .await?
        .map(|f| f.into_keys().collect())
        .unwrap_or_default();
    fields.sort();
    Ok(Resp::Array(fields.into_iter().map(Resp::bulk).collect()))
}

async fn hvals(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "hvals")?;
    let mut sorted: Vec<(String, String)> = read_hash(server, &argv[1])
        .await?
        .map(|fields| fields.into_iter().collect())
        .unwrap_or_default();
    sorted.sort();
    Ok(Resp::Array(
        sorted.into_iter().map(|(_, v)| Resp::bulk(v)).collect(),
    ))
}
