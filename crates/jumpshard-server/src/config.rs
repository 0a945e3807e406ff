//! Scheduler Configuration
//!
//! Centralized configuration for a jumpshard node with environment variable
//! overrides. Unparseable values are logged and the default is kept.

use crate::membership::NodeId;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Whether owned work runs in its own task or inline on the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchIsolation {
    /// Spawn each unit of work as a separate task; failures are contained.
    #[default]
    Enabled,
    /// Await work inline on the scheduler. A panic in the work is not contained.
    Disabled,
}

impl FromStr for DispatchIsolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" | "true" | "on" | "1" => Ok(Self::Enabled),
            "disabled" | "false" | "off" | "0" => Ok(Self::Disabled),
            other => Err(format!("unknown dispatch isolation mode '{other}'")),
        }
    }
}

impl fmt::Display for DispatchIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchIsolation::Enabled => write!(f, "enabled"),
            DispatchIsolation::Disabled => write!(f, "disabled"),
        }
    }
}

/// Node configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Identifier of this node (env: NODE_ID)
    pub node_id: NodeId,

    /// Bus topic carrying verification events (env: JUMPSHARD_TOPIC)
    pub topic: String,

    /// Maximum age of a cluster snapshot before it is recomputed
    /// (env: BUCKET_REFRESH_TTL_SECS)
    pub bucket_refresh_ttl: Duration,

    /// Upper bound on a single membership query (env: MEMBERSHIP_TIMEOUT_MS)
    pub membership_timeout: Duration,

    /// Dispatch isolation mode (env: DISPATCH_ISOLATION)
    pub dispatch_isolation: DispatchIsolation,

    /// Cap on concurrently running work units; None = unbounded
    /// (env: MAX_CONCURRENT_DISPATCHES)
    pub max_concurrent_dispatches: Option<usize>,

    /// Capacity of the in-process broadcast bus (env: BUS_CAPACITY)
    pub bus_capacity: usize,

    /// Static cluster members (env: CLUSTER_MEMBERS, comma-separated)
    pub cluster_members: Vec<NodeId>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(format!("jumpshard-node-{}", uuid::Uuid::new_v4())),
            topic: "verification".to_string(),
            bucket_refresh_ttl: Duration::from_secs(5 * 60),
            membership_timeout: Duration::from_millis(2000),
            dispatch_isolation: DispatchIsolation::Enabled,
            max_concurrent_dispatches: None,
            bus_capacity: 1024,
            cluster_members: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(node_id) = lookup("NODE_ID") {
            config.node_id = NodeId::new(node_id);
        }

        if let Some(topic) = lookup("JUMPSHARD_TOPIC") {
            config.topic = topic;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "BUCKET_REFRESH_TTL_SECS") {
            config.bucket_refresh_ttl = Duration::from_secs(secs);
        }

        if let Some(millis) = parse_var::<u64>(&lookup, "MEMBERSHIP_TIMEOUT_MS") {
            config.membership_timeout = Duration::from_millis(millis);
        }

        if let Some(isolation) = parse_var::<DispatchIsolation>(&lookup, "DISPATCH_ISOLATION") {
            config.dispatch_isolation = isolation;
        }

        if let Some(limit) = parse_var::<usize>(&lookup, "MAX_CONCURRENT_DISPATCHES") {
            config.max_concurrent_dispatches = (limit > 0).then_some(limit);
        }

        if let Some(capacity) = parse_var::<usize>(&lookup, "BUS_CAPACITY") {
            if capacity > 0 {
                config.bus_capacity = capacity;
            } else {
                warn!("BUS_CAPACITY must be positive, keeping default");
            }
        }

        if let Some(members) = lookup("CLUSTER_MEMBERS") {
            config.cluster_members = parse_members(&members);
        }

        config
    }
}

/// Split a comma-separated member list, dropping blanks.
pub fn parse_members(raw: &str) -> Vec<NodeId> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(NodeId::from)
        .collect()
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = lookup(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = key, value = %raw, error = %e, "Ignoring invalid config value");
            None
        }
    }
}
