//! Configuration for the node agent.

use std::time::Duration;

use clap::Parser;

/// Node agent configuration, from flags or `NODE_AGENT_*` environment variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "node-agent", version, about = "Cluster node agent")]
pub struct Config {
    /// Address of the cluster orchestrator, without port.
    #[arg(short = 'a', long, env = "NODE_AGENT_CLUSTER_ADDRESS", default_value = "localhost")]
    pub cluster_address: String,

    /// Port of the cluster orchestrator.
    #[arg(short = 'p', long, env = "NODE_AGENT_CLUSTER_PORT", default_value_t = 10000)]
    pub cluster_port: u16,

    /// Interval between node information heartbeats, in seconds.
    #[arg(
        long,
        env = "NODE_AGENT_HEARTBEAT_INTERVAL",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub heartbeat_interval_secs: u64,

    /// Runtime kinds served by the development runtime, comma-separated.
    #[arg(
        long,
        env = "NODE_AGENT_RUNTIMES",
        value_delimiter = ',',
        default_value = "containerd"
    )]
    pub runtimes: Vec<String>,

    /// MQTT keep-alive interval, in seconds.
    #[arg(
        long,
        env = "NODE_AGENT_MQTT_KEEP_ALIVE",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(5..)
    )]
    pub mqtt_keep_alive_secs: u64,

    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`.
    #[arg(long, env = "NODE_AGENT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn mqtt_keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive_secs)
    }
}
