use std::collections::HashSet;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use harborkv_proto::{argv_from_resp, read_value, ProtoError, Resp};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::acl::AuthzRequest;
use crate::cluster::REPLICATION_TIMEOUT;
use crate::errors::ServerError;
use crate::server::Server;

/// Replies larger than this are written in chunks (flow control only).
const REPLY_CHUNK_BYTES: usize = 1024;

/// Per-connection dispatcher state: identity lives in the ACL registry,
/// subscription bookkeeping lives here.
pub struct ConnState {
    pub id: u64,
    pub push_tx: mpsc::Sender<Resp>,
    pub channels: HashSet<String>,
    pub patterns: HashSet<String>,
}

impl ConnState {
    pub fn new(id: u64, push_tx: mpsc::Sender<Resp>) -> Self {
        Self {
            id,
            push_tx,
            channels: HashSet::new(),
            patterns: HashSet::new(),
        }
    }

    /// A stateless stand-in for replay paths (AOF restore, replicated
    /// entries) that never subscribes and receives no pushes.
    pub fn detached() -> Self {
        let (push_tx, _discard) = mpsc::channel(1);
        Self::new(0, push_tx)
    }
}

/// A dispatch outcome: a local value, or raw reply bytes from the
/// replicator.
#[derive(Debug)]
pub enum Reply {
    Value(Resp),
    Raw(Bytes),
}

pub async fn write_chunked<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
) -> std::io::Result<()> {
    for chunk in bytes.chunks(REPLY_CHUNK_BYTES) {
        writer.write_all(chunk).await?;
    }
    writer.flush().await
}

/// The per-connection loop: read a frame, dispatch it, write the reply;
/// pub/sub pushes and the kill switch interleave via `select!`.
pub async fn handle_connection(stream: TcpStream, server: Arc<Server>) -> anyhow::Result<()> {
    let conn_id = server.allocate_conn_id();
    server.acl.register_connection(conn_id);
    let (push_tx, mut push_rx) = mpsc::channel::<Resp>(server.cfg.pubsub_capacity);
    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
    server.register_kill_switch(conn_id, kill_tx);
    let mut conn = ConnState::new(conn_id, push_tx);
    tracing::debug!(conn_id, "connection open");

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(4096);
    let max_frame = server.cfg.max_frame_bytes;

    let result: anyhow::Result<()> = async {
        loop {
            tokio::select! {
                frame = read_value(&mut reader, max_frame, &mut buf) => match frame {
                    Ok(Some((value, raw))) => {
                        let reply = match argv_from_resp(&value) {
                            Ok(argv) => {
                                match execute_command(&server, &mut conn, &argv, Some(&raw), false)
                                    .await
                                {
                                    Ok(Reply::Value(resp)) => resp.to_bytes(),
                                    Ok(Reply::Raw(bytes)) => BytesMut::from(&bytes[..]),
                                    Err(e) => e.to_resp().to_bytes(),
                                }
                            }
                            Err(e) => ServerError::from(e).to_resp().to_bytes(),
                        };
                        write_chunked(&mut writer, &reply).await?;
                    }
                    Ok(None) => return Ok(()),
                    Err(ProtoError::Io(e)) => return Err(e.into()),
                    Err(e) => {
                        // Framing is unrecoverable after a decode error:
                        // report it and close.
                        let reply = ServerError::from(e).to_resp().to_bytes();
                        let _ = write_chunked(&mut writer, &reply).await;
                        return Ok(());
                    }
                },
                Some(push) = push_rx.recv() => {
                    write_chunked(&mut writer, &push.to_bytes()).await?;
                }
                _ = kill_rx.recv() => return Ok(()),
            }
        }
    }
    .await;

    server.pubsub.drop_connection(conn_id);
    server.acl.remove_connection(conn_id);
    server.remove_kill_switch(conn_id);
    tracing::debug!(conn_id, "connection closed");
    result
}

/// Resolve, authorize, synchronize and execute one command. `replay` marks
/// commands re-entering from the AOF or the replicator: they skip
/// authorization and are never re-queued to the AOF.
pub async fn execute_command(
    server: &Arc<Server>,
    conn: &mut ConnState,
    argv: &[String],
    raw: Option<&Bytes>,
    replay: bool,
) -> Result<Reply, ServerError> {
    server.metrics.inc_commands();
    let resolved = server.registry.resolve(argv)?;
    let keys = (resolved.key_extractor())(argv)?;

    if !replay {
        server.acl.authorize_connection(
            conn.id,
            &AuthzRequest {
                command: resolved.command.name,
                subcommand: resolved.subcommand.map(|s| s.name),
                categories: resolved.categories(),
                read_keys: &keys.read_keys,
                write_keys: &keys.write_keys,
                channels: &keys.channels,
            },
        )?;
    }

    let is_write = resolved.is_write();
    let in_cluster = server.replicator.is_some();
    if is_write {
        server.keyspace.begin_mutation().await;
    }

    let result = async {
        if !in_cluster || !resolved.sync() || replay {
            let resp = (resolved.handler())(server, conn, argv, replay).await?;
            if is_write && !replay {
                if let (Some(aof), Some(raw)) = (&server.aof, raw) {
                    aof.append(raw.clone()).await;
                }
            }
            return Ok(Reply::Value(resp));
        }

        // Cluster mode and a sync command: the leader orders it through the
        // replicator, followers forward or refuse.
        let Some(replicator) = &server.replicator else {
            return Err(ServerError::NotLeader);
        };
        if replicator.is_leader() {
            let bytes = replicator.apply(argv, REPLICATION_TIMEOUT).await?;
            return Ok(Reply::Raw(bytes));
        }
        if server.cfg.forward_command {
            if let (Some(membership), Some(raw)) = (&server.membership, raw) {
                membership.forward_to_leader(raw.clone()).await?;
                return Ok(Reply::Value(Resp::ok()));
            }
        }
        Err(ServerError::NotLeader)
    }
    .await;

    if is_write {
        server.keyspace.end_mutation();
    }
    result
}
