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
        name: "zadd",
        categories: &[cat::WRITE, cat::FAST, cat::SORTED_SET],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(zadd),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "zrem",
        categories: &[cat::WRITE, cat::FAST, cat::SORTED_SET],
        sync: true,
        key_extractor: write_key_1,
        handler: handler!(zrem),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "zscore",
        categories: &[cat::READ, cat::FAST, cat::SORTED_SET],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(zscore),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "zcard",
        categories: &[cat::READ, cat::FAST, cat::SORTED_SET],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(zcard),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "zrange",
        categories: &[cat::READ, cat::SLOW, cat::SORTED_SET],
        sync: false,
        key_extractor: read_key_1,
        handler: handler!(zrange),
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

fn parse_score(raw: &str) -> Result<f64, ServerError> {
    raw.parse()
        .map_err(|_| ServerError::Value("score is not a valid float".into()))
}

/// Scores render without a trailing `.0` for whole numbers.
fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.is_finite() {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

async fn read_zset(
    server: &Arc<Server>,
    key: &str,
) -> Result<Option<HashMap<String, f64>>, ServerError> {
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
        Ok(Value::SortedSet(members)) => Ok(Some(members)),
        Ok(_) => Err(ServerError::WrongType(key.to_string())),
        Err(ServerError::KeyNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Sort by (score asc, member asc) — the zset iteration order.
fn ranked(members: HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut entries: Vec<(String, f64)> = members.into_iter().collect();
    entries.sort_by(|(ma, sa), (mb, sb)| {
        sa.partial_cmp(sb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ma.cmp(mb))
    });
    entries
}

async fn zadd(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(ServerError::WrongArgs("zadd"));
    }
    let key = &argv[1];
    let ks = &server.keyspace;
    let created = ks.create_key_and_lock(key).await?;
    let result = async {
        let mut members = if created {
            HashMap::new()
        } else {
            match ks.get_value(key).await? {
                Value::SortedSet(members) => members,
                _ => return Err(ServerError::WrongType(key.clone())),
            }
        };
        let mut added = 0;
        for pair in argv[2..].chunks(2) {
            let score = parse_score(&pair[0])?;
            if members.insert(pair[1].clone(), score).is_none() {
                added += 1;
            }
        }
        ks.set_value(key, Value::SortedSet(members)).await?;
        Ok(Resp::Integer(added))
    }
    .await;
    ks.unlock_key(key);
    result
}

async fn zrem(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_min(argv, 3, "zrem")?;
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
            Value::SortedSet(members) => members,
            _ => return Err(ServerError::WrongType(key.clone())),
        };
        let mut removed = 0;
        for member in &argv[2..] {
            if members.remove(member).is_some() {
                removed += 1;
            }
        }
        if members.is_empty() {
            // Removing the last member deletes the key, lock included.
            ks.remove_entry(key);
            Ok((Resp::Integer(removed), false))
        } else {
            ks.set_value(key, Value::SortedSet(members)).await?;
            Ok((Resp::Integer(removed), true))
        }
    }
    .await;
    crate::commands::finish_write(ks, key, result)
}

async fn zscore(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 3, "zscore")?;
    Ok(read_zset(server, &argv[1])
        .await?
        .and_then(|members| members.get(&argv[2]).copied())
        .map(|score| Resp::bulk(format_score(score)))
        .unwrap_or(Resp::Null))
}

async fn zcard(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 2, "zcard")?;
    let count = read_zset(server, &argv[1]).await?.map_or(0, |m| m.len());
    Ok(Resp::Integer(count as i64))
}

async fn zrange(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    if argv.len() != 4 && argv.len() != 5 {
        return Err(ServerError::WrongArgs("zrange"));
    }
    let with_scores = match argv.get(4) {
        Some(flag) if flag.eq_ignore_ascii_case("withscores") => true,
        Some(_) => return Err(ServerError::WrongArgs("zrange")),
        None => false,
    };
    let mut start: i64 = argv[2]
        .parse()
        .map_err(|_| ServerError::Value("start is not an integer".into()))?;
    let mut stop: i64 = argv[3]
        .parse()
        .map_err(|_| ServerError::Value("stop is not an integer".into()))?;

    let Some(members) = read_zset(server, &argv[1]).await? else {
        return Ok(Resp::Array(vec![]));
    };
    let entries = ranked(members);
    let len = entries.len() as i64;
    if start < 0 {
        start += len;
    }
    if stop < 0 {
        stop += len;
    }
    let start = start.max(0);
    let stop = stop.min(len - 1);
    if len == 0 || start > stop {
        return Ok(Resp::Array(vec![]));
    }

    let mut out = Vec::new();
    for (member, score) in &entries[start as usize..=stop as usize] {
        out.push(Resp::bulk(member));
        if with_scores {
            out.push(Resp::bulk(format_score(*score)));
        }
    }
    Ok(Resp::Array(out))
}
