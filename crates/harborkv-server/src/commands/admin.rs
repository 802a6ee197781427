use std::sync::atomic::Ordering;
use std::sync::Arc;

use harborkv_proto::Resp;

use crate::commands::registry::{
    arity_exact, category as cat, no_keys, Command, CommandRegistry,
};
use crate::errors::ServerError;
use crate::handler;
use crate::server::conn::ConnState;
use crate::server::Server;
use crate::sys::meminfo::read_memory_stats;

pub fn register(reg: &mut CommandRegistry) {
    reg.register(Command {
        name: "info",
        categories: &[cat::SLOW, cat::DANGEROUS],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(info),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "save",
        categories: &[cat::ADMIN, cat::SLOW, cat::DANGEROUS],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(save),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "lastsave",
        categories: &[cat::ADMIN, cat::FAST],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(lastsave),
        subcommands: vec![],
    });
    reg.register(Command {
        name: "bgrewriteaof",
        categories: &[cat::ADMIN, cat::SLOW, cat::DANGEROUS],
        sync: false,
        key_extractor: no_keys,
        handler: handler!(bgrewriteaof),
        subcommands: vec![],
    });
}

/// Sections-formatted server report, assembled from the metrics counters,
/// the keyspace byte accounting and the kernel memory report.
async fn info(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 1, "info")?;
    let m = &server.metrics;
    let ks = &server.keyspace;
    let load = |counter: &std::sync::atomic::AtomicU64| counter.load(Ordering::Relaxed);

    let mut out = String::with_capacity(512);
    out.push_str("# server\r\n");
    out.push_str(&format!("server_id:{}\r\n", server.cfg.server_id));
    out.push_str(&format!("uptime_ms:{}\r\n", m.uptime_ms()));
    out.push_str(&format!(
        "cluster_enabled:{}\r\n",
        if server.replicator.is_some() { 1 } else { 0 }
    ));

    out.push_str("\r\n# memory\r\n");
    out.push_str(&format!("used_memory_bytes:{}\r\n", ks.mem_used()));
    out.push_str(&format!("max_memory_bytes:{}\r\n", server.cfg.max_memory));
    out.push_str(&format!(
        "eviction_policy:{}\r\n",
        server.cfg.eviction_policy.as_str()
    ));
    if let Ok(sys) = read_memory_stats() {
        out.push_str(&format!("system_memory_bytes:{}\r\n", sys.total_bytes));
        out.push_str(&format!(
            "system_memory_available_bytes:{}\r\n",
            sys.available_bytes
        ));
    }

    out.push_str("\r\n# keyspace\r\n");
    out.push_str(&format!("keys:{}\r\n", ks.len()));
    out.push_str(&format!("keys_with_expiry:{}\r\n", ks.keys_with_expiry().len()));

    out.push_str("\r\n# stats\r\n");
    out.push_str(&format!(
        "commands_processed:{}\r\n",
        load(&m.commands_total)
    ));
    out.push_str(&format!("keyspace_hits:{}\r\n", load(&m.hits_total)));
    out.push_str(&format!("keyspace_misses:{}\r\n", load(&m.misses_total)));
    out.push_str(&format!("evicted_keys:{}\r\n", load(&m.evictions_total)));
    out.push_str(&format!("expired_keys:{}\r\n", load(&m.expired_total)));
    out.push_str(&format!(
        "events_published:{}\r\n",
        load(&m.events_published_total)
    ));
    out.push_str(&format!(
        "events_dropped:{}\r\n",
        load(&m.events_dropped_total)
    ));
    out.push_str(&format!("aof_appends:{}\r\n", load(&m.aof_appends_total)));
    out.push_str(&format!("aof_errors:{}\r\n", load(&m.aof_errors_total)));
    out.push_str(&format!("snapshots_taken:{}\r\n", load(&m.snapshots_total)));
    out.push_str(&format!(
        "snapshot_errors:{}\r\n",
        load(&m.snapshot_errors_total)
    ));

    out.push_str("\r\n# pubsub\r\n");
    out.push_str(&format!(
        "active_channels:{}\r\n",
        server.pubsub.channels(None).len()
    ));
    out.push_str(&format!("active_patterns:{}\r\n", server.pubsub.numpat()));

    Ok(Resp::bulk(out))
}

async fn save(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 1, "save")?;
    let snapshotter = server
        .snapshotter
        .as_ref()
        .ok_or_else(|| ServerError::Value("snapshots are disabled in in-memory mode".into()))?;
    snapshotter.take_snapshot().await?;
    Ok(Resp::ok())
}

async fn lastsave(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 1, "lastsave")?;
    let snapshotter = server
        .snapshotter
        .as_ref()
        .ok_or_else(|| ServerError::Value("snapshots are disabled in in-memory mode".into()))?;
    Ok(Resp::Integer(snapshotter.last_save_millis()))
}

async fn bgrewriteaof(
    server: &Arc<Server>,
    _conn: &mut ConnState,
    argv: &[String],
    _replay: bool,
) -> Result<Resp, ServerError> {
    arity_exact(argv, 1, "bgrewriteaof")?;
    let aof = server
        .aof
        .as_ref()
        .ok_or_else(|| ServerError::Value("the append-only log is disabled in in-memory mode".into()))?;
    if aof.rewrite_in_progress() {
        return Err(ServerError::AofRewriteInProgress);
    }
    let aof = aof.clone();
    let keyspace = server.keyspace.clone();
    tokio::spawn(async move {
        if let Err(e) = aof.rewrite(&keyspace).await {
            tracing::warn!(error = %e, "aof rewrite failed");
        }
    });
    Ok(Resp::Simple(
        "Background append only file rewriting started".into(),
    ))
}
