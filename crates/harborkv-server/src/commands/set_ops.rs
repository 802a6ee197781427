use std::collections::HashSet;
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
        name: "sadd",
        categories: &[cat::WRITE, cat::FAST, cat::SET],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(sadd),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "srem",
        categories: &[cat::WRITE, cat::FAST, cat::SET],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(srem),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "scard",
        categories: &[cat::READ, cat::FAST, cat::SET],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(scard),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "sismember",
        categories: &[cat::READ, cat::FAST, cat::SET],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(sismember),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "smembers",
        categories: &[cat::READ, cat::SLOW, cat::SET],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(smembers),
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

async fn read_set(server: &Arc<Server>, key: &str) -> Result<Option<HashSet<String>>, ServerError> {
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
        Ok(Value::Set(members)) => Ok(Some(members)),
        Ok(_) => Err(ServerError::WrongType(key.to_string())),
        Err(ServerError::KeyNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn sadd(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 3, "sadd")?;
    let key = &argv[1];
    let ks = &server.keyspace;
    let created = ks.create_key_and_lock(key).await?;
    let result = async {
        let mut members = if created {
            HashSet::new()
        } else {
            match ks.get_value(key).await? {
                Value::Set(members) => members,
                _ => return Err(ServerError::WrongType(key.clone())),
            }
        };
        let mut added = 0;
        for member in &argv[2..] {
            if members.insert(member.clone()) {
                added += 1;
            }
        }
        ks.set_value(key, Value::Set(members)).await?;
        Ok(Resp::Integer(added))
    }
    .await;
    ks.unlock_key(key);
    result
}

async fn srem(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 3, "srem")?;
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
        let mut members = match ks.get_value(key).await? {
            Value::Set(members) => members,
            _ => return Err(ServerError::WrongType(key.clone())),
        };
        let mut removed = 0;
        for member in &argv[2..] {
            if members.remove(member) {
                removed += 1;
            }
        }
        if members.is_empty() {
            // Removing the last member deletes the key, lock included.
            ks.remove_entry(key);
            Ok((Resp::Integer(removed), false))
        } else {
            ks.set_value(key, Value::Set(members)).await?;
            Ok((Resp::Integer(removed), true))
        }
    }
    .await;
    crate::commands::finish_write(ks, key, result)
}

async fn scard(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "scard")?;
    let count = read_set(server, &argv[1]).await?.map_or(0, |m| m.len());
    Ok(Resp::Integer(count as i64))
}

async fn sismember(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "sismember")?;
    let present = read_set(server, &argv[1])
        .await?
        .map_or(false, |m| m.contains(&argv[2]));
    Ok(Resp::Integer(if present { 1 } else { 0 }))
}

async fn smembers(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "smembers")?;
    let mut members: Vec<String> = read_set(server, &argv[1])
        .await?
        .map(|m| m.into_iter().collect())
        .unwrap_or_default();
    members.sort();
    Ok(Resp::Array(members.into_iter().map(Resp::bulk).collect()))
}
