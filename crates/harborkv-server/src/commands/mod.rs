pub mod acl_cmd;
pub mod admin;
pub mod connection;
pub mod generic;
pub mod hash;
pub mod list;
pub mod pubsub_cmd;
pub mod registry;
pub mod set_ops;
pub mod string;
pub mod zset;

use harborkv_proto::Resp;
use registry::CommandRegistry;

use crate::errors::ServerError;
use crate::store::Keyspace;

/// The full command catalog, one `register` call per group.
pub fn build_registry() -> CommandRegistry {
    let mut reg = CommandRegistry::default();
    connection::register(&mut reg);
    generic::register(&mut reg);
    string::register(&mut reg);
    list::register(&mut reg);
    set_ops::register(&mut reg);
    zset::register(&mut reg);
    hash::register(&mut reg);
    acl_cmd::register(&mut reg);
    pubsub_cmd::register(&mut reg);
    admin::register(&mut reg);
    reg
}

/// Close out a write that may have deleted its own key: the second tuple
/// element says whether the lock still exists and must be released.
pub(crate) fn finish_write(
    ks: &Keyspace,
    key: &str,
    result: Result<(Resp, bool), ServerError>,
) -> Result<Resp, ServerError> {
    match result {
        Ok((resp, unlock)) => {
            if unlock {
                ks.unlock_key(key);
            }
            Ok(resp)
        }
        Err(e) => {
            ks.unlock_key(key);
            Err(e)
        }
    }
}
