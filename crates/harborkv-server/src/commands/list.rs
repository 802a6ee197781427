use std::collections::VecDeque;
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
    for name in ["lpush", "rpush"] {
        reg.register(Command {
            name,
            categories: &[cat::WRITE, cat::FAST, cat::LIST],
            sync: true,
            key_extractor: write_key_1,
            handler: handler!(push),
            subcommands: vec![],
        });
    }
    for name in ["lpop", "rpop"] {
        reg.register(Command {
            name,
            categories: &[cat::WRITE, cat::FAST, cat::LIST],
            sync: true,
            key_extractor: write_key_1,
            handler: handler!(pop),
            subcommands: vec![],
        });
    }
    reg.register(Command {
        name: "llen",
        categories: &[cat::READ, cat::FAST, cat::LIST],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(llen),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "lrange",
        categories: &[cat::READ, cat::SLOW, cat::LIST],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(lrange),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "lindex",
        categories: &[cat::READ, cat::FAST, cat::LIST],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(lindex),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "lset",
        categories: &[cat::WRITE, cat::FAST, cat::LIST],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(lset),
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

async fn read_list(server: &Arc<Server>, key: &str) -> Result<Option<VecDeque<String>>, ServerError> {
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
        Ok(Value::List(items)) => Ok(Some(items)),
        Ok(_) => Err(ServerError::WrongType(key.to_string())),
        Err(ServerError::KeyNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn push(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 3, "lpush")?;
    let key = &argv[1];
    let left = argv[0].eq_ignore_ascii_case("lpush");
    let ks = &server.keyspace;
    let created = ks.create_key_and_lock(key).await?;
    let result = async {
        let mut items = if created {
            VecDeque::new()
        } else {
            match ks.get_value(key).await? {
                Value::List(items) => items,
                _ => return Err(ServerError::WrongType(key.clone())),
            }
        };
        for element in &argv[2..] {
            if left {
                items.push_front(element.clone());
            } else {
                items.push_back(element.clone());
            }
        }
        let len = items.len() as i64;
        ks.set_value(key, Value::List(items)).await?;
        Ok(Resp::Integer(len))
    }
    .await;
    ks.unlock_key(key);
    result
}

async fn pop(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "lpop")?;
    let key = &argv[1];
    let left = argv[0].eq_ignore_ascii_case("lpop");
    let ks = &server.keyspace;
    if !ks.key_exists(key).await {
        return Ok(Resp::Null);
    }
    match ks.lock_key(key).await {
        Ok(()) => {}
        Err(ServerError::KeyNotFound(_)) => return Ok(Resp::Null),
        Err(e) => return Err(e),
    }
    let result: Result<(Resp, bool), ServerError> = async {
        let mut items = match ks.get_value(key).await? {
            Value::List(items) => items,
            _ => return Err(ServerError::WrongType(key.clone())),
        };
        let popped = if left {
            items.pop_front()
        } else {
            items.pop_back()
        };
        match popped {
            Some(element) => {
                if items.is_empty() {
                    // Popping the last element deletes the key; its lock
                    // goes with the entry, so no unlock afterwards.
                    ks.remove_entry(key);
                    Ok((Resp::bulk(element), false))
                } else {
                    ks.set_value(key, Value::List(items)).await?;
                    Ok((Resp::bulk(element), true))
                }
            }
            None => Ok((Resp::Null, true)),
        }
    }
    .await;
    crate::commands::finish_write(ks, key, result)
}

async fn llen(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "llen")?;
    let len = read_list(server, &argv[1]).await?.map_or(0, |l| l.len());
    Ok(Resp::Integer(len as i64))
}

fn clamp_range(len: i64, mut start: i64, mut stop: i64) -> Option<(usize, usize)> {
    if start < 0 {
        start += len;
    }
    if stop < 0 {
        stop += len;
    }
    let start = start.max(0);
    let stop = stop.min(len - 1);
    if len == 0 || start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

async fn lrange(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 4, "lrange")?;
    let start: i64 = argv[2]
        .parse()
        .map_err(|_| ServerError::Value("start is not an integer".into()))?;
    let stop: i64 = argv[3]
        .parse()
        .map_err(|_| ServerError::Value("stop is not an integer".into()))?;
    let Some(items) = read_list(server, &argv[1]).await? else {
        return Ok(Resp::Array(vec![]));
    };
    let Some((start, stop)) = clamp_range(items.len() as i64, start, stop) else {
        return Ok(Resp::Array(vec![]));
    };
    Ok(Resp::Array(
        items
            .iter()
            .skip(start)
            .take(stop - start + 1)
            .map(Resp::bulk)
            .collect(),
    ))
}

async fn lindex(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "lindex")?;
    let mut index: i64 = argv[2]
        .parse()
        .map_err(|_| ServerError::Value("index is not an integer".into()))?;
    let Some(items) = read_list(server, &argv[1]).await? else {
        return Ok(Resp::Null);
    };
    if index < 0 {
        index += items.len() as i64;
    }
    if index < 0 || index >= items.len() as i64 {
        return Ok(Resp::Null);
    }
    Ok(items
        .get(index as usize)
        .map(Resp::bulk)
        .unwrap_or(Resp::Null))
}

async fn lset(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 4, "lset")?;
    let key = &argv[1];
    let mut index: i64 = argv[2]
        .parse()
        .map_err(|_| ServerError::Value("index is not an integer".into()))?;
    let ks = &server.keyspace;
    if !ks.key_exists(key).await {
        return Err(ServerError::KeyNotFound(key.clone()));
    }
    ks.lock_key(key).await?;
    let result = async {
        let mut items = match ks.get_value(key).await? {
            Value::List(items) => items,
            _ => return Err(ServerError::WrongType(key.clone())),
        };
        if index < 0 {
            index += items.len() as i64;
        }
        if index < 0 || index >= items.len() as i64 {
            return Err(ServerError::Value("index out of range".into()));
        }
        items[index as usize] = argv[3].clone();
        ks.set_value(key, Value::List(items)).await?;
        Ok(Resp::ok())
    }
    .await;
    ks.unlock_key(key);
    result
}
