use std::env;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EvictionPolicy {
    NoEviction,
    AllKeysLfu,
    AllKeysLru,
    VolatileLfu,
    VolatileLru,
    AllKeysRandom,
    VolatileRandom,
}

impl EvictionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionPolicy::NoEviction => "noeviction",
            EvictionPolicy::AllKeysLfu => "allkeys-lfu",
            EvictionPolicy::AllKeysLru => "allkeys-lru",
            EvictionPolicy::VolatileLfu => "volatile-lfu",
            EvictionPolicy::VolatileLru => "volatile-lru",
            EvictionPolicy::AllKeysRandom => "allkeys-random",
            EvictionPolicy::VolatileRandom => "volatile-random",
        }
    }

    pub fn is_volatile(self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileLfu | EvictionPolicy::VolatileLru | EvictionPolicy::VolatileRandom
        )
    }

    pub fn is_lfu(self) -> bool {
        matches!(self, EvictionPolicy::AllKeysLfu | EvictionPolicy::VolatileLfu)
    }

    pub fn is_lru(self) -> bool {
        matches!(self, EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru)
    }

    pub fn is_random(self) -> bool {
        matches!(
            self,
            EvictionPolicy::AllKeysRandom | EvictionPolicy::VolatileRandom
        )
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noeviction" => Ok(EvictionPolicy::NoEviction),
            "allkeys-lfu" => Ok(EvictionPolicy::AllKeysLfu),
            "allkeys-lru" => Ok(EvictionPolicy::AllKeysLru),
            "volatile-lfu" => Ok(EvictionPolicy::VolatileLfu),
            "volatile-lru" => Ok(EvictionPolicy::VolatileLru),
            "allkeys-random" => Ok(EvictionPolicy::AllKeysRandom),
            "volatile-random" => Ok(EvictionPolicy::VolatileRandom),
            other => Err(format!("unknown eviction policy {other}")),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AofSyncStrategy {
    Always,
    EverySec,
    No,
}

impl FromStr for AofSyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(AofSyncStrategy::Always),
            "everysec" => Ok(AofSyncStrategy::EverySec),
            "no" => Ok(AofSyncStrategy::No),
            other => Err(format!("unknown aof sync strategy {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub tls: bool,
    pub mtls: bool,
    pub cert_key_pairs: Vec<(String, String)>,
    pub client_cas: Vec<String>,
    pub data_dir: String,
    pub restore_aof: bool,
    pub restore_snapshot: bool,
    pub aof_sync_strategy: AofSyncStrategy,
    pub snapshot_interval_secs: u64,
    pub snapshot_threshold: u64,
    pub max_memory: u64,
    pub eviction_policy: EvictionPolicy,
    pub require_pass: bool,
    pub password: String,
    pub acl_config: Option<String>,
    pub bootstrap_cluster: bool,
    pub join_addr: Option<String>,
    pub forward_command: bool,
    pub server_id: String,
    pub raft_bind_port: u16,
    pub member_list_bind_port: u16,
    pub in_memory: bool,
    pub max_frame_bytes: usize,
    pub pubsub_capacity: usize,
    pub aof_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 7878,
            tls: false,
            mtls: false,
            cert_key_pairs: Vec::new(),
            client_cas: Vec::new(),
            data_dir: "./data".to_string(),
            restore_aof: false,
            restore_snapshot: false,
            aof_sync_strategy: AofSyncStrategy::EverySec,
            snapshot_interval_secs: 300,
            snapshot_threshold: 1_000,
            max_memory: 0,
            eviction_policy: EvictionPolicy::NoEviction,
            require_pass: false,
            password: String::new(),
            acl_config: None,
            bootstrap_cluster: false,
            join_addr: None,
            forward_command: false,
            server_id: "harborkv-1".to_string(),
            raft_bind_port: 8000,
            member_list_bind_port: 8001,
            in_memory: false,
            max_frame_bytes: 8 * 1024 * 1024,
            pubsub_capacity: 256,
            aof_queue_capacity: 4_096,
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = env::var("HARBORKV_BIND_ADDR") {
            c.bind_addr = v;
        }
        if let Ok(v) = env::var("HARBORKV_PORT") {
            c.port = v.parse().unwrap_or(c.port);
        }
        c.tls = env_bool("HARBORKV_TLS", c.tls);
        c.mtls = env_bool("HARBORKV_MTLS", c.mtls);
        if let Ok(v) = env::var("HARBORKV_CERT_KEY_PAIRS") {
            // "cert1:key1,cert2:key2"
            c.cert_key_pairs = v
                .split(',')
                .filter_map(|pair| {
                    let (cert, key) = pair.split_once(':')?;
                    Some((cert.to_string(), key.to_string()))
                })
                .collect();
        }
        if let Ok(v) = env::var("HARBORKV_CLIENT_CAS") {
            c.client_cas = v.split(',').map(str::to_string).collect();
        }
        if let Ok(v) = env::var("HARBORKV_DATA_DIR") {
            c.data_dir = v;
        }
        c.restore_aof = env_bool("HARBORKV_RESTORE_AOF", c.restore_aof);
        c.restore_snapshot = env_bool("HARBORKV_RESTORE_SNAPSHOT", c.restore_snapshot);
        if let Ok(v) = env::var("HARBORKV_AOF_SYNC_STRATEGY") {
            match v.parse() {
                Ok(s) => c.aof_sync_strategy = s,
                Err(e) => tracing::warn!("HARBORKV_AOF_SYNC_STRATEGY: {e}, using everysec"),
            }
        }
        if let Ok(v) = env::var("HARBORKV_SNAPSHOT_INTERVAL") {
            c.snapshot_interval_secs = v.parse().unwrap_or(c.snapshot_interval_secs);
        }
        if let Ok(v) = env::var("HARBORKV_SNAPSHOT_THRESHOLD") {
            c.snapshot_threshold = v.parse().unwrap_or(c.snapshot_threshold);
        }
        if let Ok(v) = env::var("HARBORKV_MAX_MEMORY") {
            c.max_memory = v.parse().unwrap_or(c.max_memory);
        }
        if let Ok(v) = env::var("HARBORKV_EVICTION_POLICY") {
            match v.parse() {
                Ok(p) => c.eviction_policy = p,
                Err(e) => tracing::warn!("HARBORKV_EVICTION_POLICY: {e}, using noeviction"),
            }
        }
        c.require_pass = env_bool("HARBORKV_REQUIRE_PASS", c.require_pass);
        if let Ok(v) = env::var("HARBORKV_PASSWORD") {
            c.password = v;
        }
        if let Ok(v) = env::var("HARBORKV_ACL_CONFIG") {
            c.acl_config = Some(v);
        }
        c.bootstrap_cluster = env_bool("HARBORKV_BOOTSTRAP_CLUSTER", c.bootstrap_cluster);
        if let Ok(v) = env::var("HARBORKV_JOIN_ADDR") {
            c.join_addr = Some(v);
        }
        c.forward_command = env_bool("HARBORKV_FORWARD_COMMAND", c.forward_command);
        if let Ok(v) = env::var("HARBORKV_SERVER_ID") {
            c.server_id = v;
        }
        if let Ok(v) = env::var("HARBORKV_RAFT_BIND_PORT") {
            c.raft_bind_port = v.parse().unwrap_or(c.raft_bind_port);
        }
        if let Ok(v) = env::var("HARBORKV_MEMBER_LIST_BIND_PORT") {
            c.member_list_bind_port = v.parse().unwrap_or(c.member_list_bind_port);
        }
        c.in_memory = env_bool("HARBORKV_IN_MEMORY", c.in_memory);
        if let Ok(v) = env::var("HARBORKV_MAX_FRAME") {
            c.max_frame_bytes = v.parse().unwrap_or(c.max_frame_bytes);
        }
        if let Ok(v) = env::var("HARBORKV_PUBSUB_CAP") {
            c.pubsub_capacity = v.parse().unwrap_or(c.pubsub_capacity);
        }
        if let Ok(v) = env::var("HARBORKV_AOF_QUEUE_CAP") {
            c.aof_queue_capacity = v.parse().unwrap_or(c.aof_queue_capacity);
        }

        if c.require_pass && c.password.is_empty() && c.acl_config.is_none() {
            tracing::warn!(
                "HARBORKV_REQUIRE_PASS is set without HARBORKV_PASSWORD or an ACL file; \
                 the default user will be unreachable"
            );
        }
        c
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policies() {
        assert_eq!(
            "allkeys-lfu".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::AllKeysLfu
        );
        assert!("least-frequently".parse::<EvictionPolicy>().is_err());
        assert!(EvictionPolicy::VolatileRandom.is_volatile());
        assert!(!EvictionPolicy::AllKeysLru.is_volatile());
    }

    #[test]
    fn policy_names_roundtrip() {
        for policy in [
            EvictionPolicy::NoEviction,
            EvictionPolicy::AllKeysLfu,
            EvictionPolicy::AllKeysLru,
            EvictionPolicy::VolatileLfu,
            EvictionPolicy::VolatileLru,
            EvictionPolicy::AllKeysRandom,
            EvictionPolicy::VolatileRandom,
        ] {
            assert_eq!(policy.as_str().parse::<EvictionPolicy>(), Ok(policy));
        }
    }

    #[test]
    fn parses_sync_strategies() {
        assert_eq!(
            "EVERYSEC".parse::<AofSyncStrategy>().unwrap(),
            AofSyncStrategy::EverySec
        );
        assert!("sometimes".parse::<AofSyncStrategy>().is_err());
    }
}
