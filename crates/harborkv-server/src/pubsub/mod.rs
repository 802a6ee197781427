pub mod channel;

use std::sync::Arc;

use dashmap::DashMap;
use harborkv_proto::Resp;
use tokio::sync::mpsc;

use crate::glob::glob_match;
use crate::metrics::Metrics;

pub use channel::Channel;

/// Channel registry and fan-out. Exact-name and pattern channels live in
/// separate maps so a pattern literal can coexist with an identical name.
pub struct PubSub {
    channels: DashMap<String, Arc<Channel>>,
    pattern_channels: DashMap<String, Arc<Channel>>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl PubSub {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            channels: DashMap::new(),
            pattern_channels: DashMap::new(),
            capacity,
            metrics,
        }
    }

    fn map(&self, with_pattern: bool) -> &DashMap<String, Arc<Channel>> {
        if with_pattern {
            &self.pattern_channels
        } else {
            &self.channels
        }
    }

    /// Add the connection to the channel, creating it on first use.
    pub fn subscribe(
        &self,
        conn_id: u64,
        name: &str,
        with_pattern: bool,
        tx: mpsc::Sender<Resp>,
    ) {
        let channel = self
            .map(with_pattern)
            .entry(name.to_string())
            .or_insert_with(|| {
                Channel::spawn(name, with_pattern, self.capacity, self.metrics.clone())
            })
            .clone();
        channel.subscribe(conn_id, tx);
    }

    /// Remove the connection from matching channels and return the names it
    /// was actually subscribed to. For patterns this covers the channel
    /// whose pattern equals the literal plus any exact-name channel the
    /// pattern matches as a glob.
    pub fn unsubscribe(&self, conn_id: u64, name: &str, with_pattern: bool) -> Vec<String> {
        let mut removed = Vec::new();
        if with_pattern {
            if let Some(channel) = self.pattern_channels.get(name) {
                if channel.unsubscribe(conn_id) {
                    removed.push(channel.name().to_string());
                }
            }
            for entry in self.channels.iter() {
                if glob_match(name, entry.value().name()) && entry.value().unsubscribe(conn_id) {
                    removed.push(entry.value().name().to_string());
                }
            }
        } else if let Some(channel) = self.channels.get(name) {
            if channel.unsubscribe(conn_id) {
                removed.push(channel.name().to_string());
            }
        }
        self.reap_inactive();
        removed
    }

    /// Enqueue the message on every exact channel with this name and every
    /// pattern channel matching it. Returns the number of subscribers
    /// targeted.
    pub fn publish(&self, channel_name: &str, message: &str) -> usize {
        let mut receivers = 0;
        if let Some(channel) = self.channels.get(channel_name) {
            receivers += channel.publish(message);
        }
        for entry in self.pattern_channels.iter() {
            if entry.value().matches(channel_name) {
                receivers += entry.value().publish(message);
            }
        }
        if receivers > 0 {
            self.metrics.inc_published();
        }
        receivers
    }

    /// Active exact-name channels, optionally filtered by a glob.
    pub fn channels(&self, filter: Option<&str>) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .iter()
            .filter(|e| e.value().is_active())
            .filter(|e| filter.map_or(true, |pat| glob_match(pat, e.value().name())))
            .map(|e| e.value().name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn numpat(&self) -> usize {
        self.pattern_channels
            .iter()
            .filter(|e| e.value().is_active())
            .count()
    }

    pub fn numsub(&self, names: &[String]) -> Vec<(String, usize)> {
        names
            .iter()
            .map(|name| {
                let count = self
                    .channels
                    .get(name)
                    .map(|c| c.subscriber_count())
                    .unwrap_or(0);
                (name.clone(), count)
            })
            .collect()
    }

    /// Called when a connection closes: detach it everywhere.
    pub fn drop_connection(&self, conn_id: u64) {
        for entry in self.channels.iter() {
            entry.value().unsubscribe(conn_id);
        }
        for entry in self.pattern_channels.iter() {
            entry.value().unsubscribe(conn_id);
        }
        self.reap_inactive();
    }

    fn reap_inactive(&self) {
        self.channels.retain(|_, c| c.is_active());
        self.pattern_channels.retain(|_, c| c.is_active());
    }
}
