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
        name: "set",
        categories: &[cat::WRITE, cat::FAST, cat::STRING],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(set),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "get",
        categories: &[cat::READ, cat::FAST, cat::STRING],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(get),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "mset",
        categories: &[cat::WRITE, cat::SLOW, cat::STRING],
        sync: true,
        key_extractor: mset_keys,
        handler: handler!(mset),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "mget",
        categories: &[cat::READ, cat::FAST, cat::STRING],
        sync: false,
        key_extractor: all_read_keys,
        handler: handler!(mget),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "append",
        categories: &[cat::WRITE, cat::FAST, cat::STRING],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(append),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "strlen",
        categories: &[cat::READ, cat::FAST, cat::STRING],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(strlen),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "setrange",
        categories: &[cat::WRITE, cat::FAST, cat::STRING],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(setrange),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "getrange",
        categories: &[cat::READ, cat::FAST, cat::STRING],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(getrange),
        subcommands: vec![],
    });
    for name in ["incr", "decr", "incrby", "decrby"] {
        reg.register(Command {
            name,
            categories: &[cat::WRITE, cat::FAST, cat::STRING],
            sync: true,
            key_extractor: write_key_1,
            handler: handler!(incr_decr),
            subcommands: vec![],
        });
    }
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

fn mset_keys(argv: &[String]) -> Result<CommandKeys, ServerError> {
    if argv.len() < 3 || argv.len() % 2 == 0 {
        return Err(ServerError::WrongArgs("mset"));
    }
    Ok(CommandKeys {
        write_keys: argv[1..].iter().step_by(2).cloned().collect(),
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

async fn set(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "set")?;
    write_one(server, &argv[1], Value::adapt(&argv[2])).await?;
    Ok(Resp::ok())
}

async fn mset(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    if argv.len() < 3 || argv.len() % 2 == 0 {
        return Err(ServerError::WrongArgs("mset"));
    }
    for pair in argv[1..].chunks(2) {
        write_one(server, &pair[0], Value::adapt(&pair[1])).await?;
    }
    Ok(Resp::ok())
}

async fn get(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "get")?;
    match read_string(server, &argv[1]).await? {
        Some(s) => {
            server.metrics.inc_hit();
            Ok(Resp::bulk(s))
        }
        None => {
            server.metrics.inc_miss();
            Ok(Resp::Null)
        }
    }
}

async fn mget(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 2, "mget")?;
    let mut out = Vec::with_capacity(argv.len() - 1);
    for key in &argv[1..] {
        match read_string(server, key).await {
            Ok(Some(s)) => out.push(Resp::bulk(s)),
            // MGET never fails per-key; wrong types read as null
            Ok(None) | Err(ServerError::WrongType(_)) => out.push(Resp::Null),
            Err(e) => return Err(e),
        }
    }
    Ok(Resp::Array(out))
}

async fn append(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "append")?;
    let key = &argv[1];
    let ks = &server.keyspace;
    let created = ks.create_key_and_lock(key).await?;
    let result = async {
        let mut current = if created {
            String::new()
        } else {
            string_at(server, key).await?
        };
        current.push_str(&argv[2]);
        let len = current.len() as i64;
        ks.set_value(key, Value::Str(current)).await?;
        Ok(Resp::Integer(len))
    }
    .await;
    ks.unlock_key(key);
    result
}

async fn strlen(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "strlen")?;
    match read_string(server, &argv[1]).await? {
        Some(s) => Ok(Resp::Integer(s.len() as i64)),
        None => Ok(Resp::Integer(0)),
    }
}

async fn setrange(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 4, "setrange")?;
    let key = &argv[1];
    let offset: usize = argv[2]
        .parse()
        .map_err(|_| ServerError::Value("offset is not a non-negative integer".into()))?;
    let patch = argv[3].as_bytes();

    let ks = &server.keyspace;
    let created = ks.create_key_and_lock(key).await?;
    let result = async {
        let mut buf = if created {
            Vec::new()
        } else {
            string_at(server, key).await?.into_bytes()
        };
        if buf.len() < offset + patch.len() {
            buf.resize(offset + patch.len(), 0);
        }
        buf[offset..offset + patch.len()].copy_from_slice(patch);
        let len = buf.len() as i64;
        let s = String::from_utf8(buf)
            .map_err(|_| ServerError::Value("resulting value is not valid utf-8".into()))?;
        ks.set_value(key, Value::Str(s)).await?;
        Ok(Resp::Integer(len))
    }
    .await;
    ks.unlock_key(key);
    result
}

async fn getrange(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 4, "getrange")?;
    let Some(s) = read_string(server, &argv[1]).await? else {
        return Ok(Resp::bulk(""));
    };
    let len = s.len() as i64;
    let mut start: i64 = argv[2]
        .parse()
        .map_err(|_| ServerError::Value("start is not an integer".into()))?;
    let mut end: i64 = argv[3]
        .parse()
        .map_err(|_| ServerError::Value("end is not an integer".into()))?;
    if start < 0 {
        start += len;
    }
    if end < 0 {
        end += len;
    }
    let start = start.max(0);
    let end = end.min(len - 1);
    if start > end || len == 0 {
        return Ok(Resp::bulk(""));
    }
    Ok(Resp::bulk(&s.as_bytes()[start as usize..=end as usize]))
}

async fn incr_decr(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    let name = argv[0].to_lowercase();
    let delta: i64 = match name.as_str() {
        "incr" => {
            arity_exact(argv, 2, "incr")?;
            1
        }
        "decr" => {
            arity_exact(argv, 2, "decr")?;
            -1
        }
        _ => {
            arity_exact(argv, 3, "incrby")?;
            let n: i64 = argv[2]
                .parse()
                .map_err(|_| ServerError::Value("increment is not an integer".into()))?;
            if name == "decrby" {
                -n
            } else {
                n
            }
        }
    };

    let key = &argv[1];
    let ks = &server.keyspace;
    let created = ks.create_key_and_lock(key).await?;
    let result = async {
        let current = if created {
            0
        } else {
            match ks.get_value(key).await? {
                Value::Int(n) => n,
                _ => return Err(ServerError::WrongType(key.clone())),
            }
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| ServerError::Value("increment would overflow".into()))?;
        ks.set_value(key, Value::Int(next)).await?;
        Ok(Resp::Integer(next))
    }
    .await;
    ks.unlock_key(key);
    result
}

/// SET-style write: create or lock, replace the value, unlock.
async fn write_one(server: &Arc<Server>, key: &str, value: Value) -> Result<(), ServerError> {
    let ks = &server.keyspace;
    ks.create_key_and_lock(key).await?;
    let result = ks.set_value(key, value).await;
    ks.unlock_key(key);
    result
}

/// GET-style read returning None for a missing key.
async fn read_string(server: &Arc<Server>, key: &str) -> Result<Option<String>, ServerError> {
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
        Ok(value) => value
            .as_wire_string()
            .map(Some)
            .ok_or_else(|| ServerError::WrongType(key.to_string())),
        Err(ServerError::KeyNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read under an already-held write lock.
async fn string_at(server: &Arc<Server>, key: &str) -> Result<String, ServerError> {
    server
        .keyspace
        .get_value(key)
        .await?
        .as_wire_string()
        .ok_or_else(|| ServerError::WrongType(key.to_string()))
}
