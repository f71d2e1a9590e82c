// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::init::parse;
use crate::server::TailServerConfig;
use crate::tail::{SeedPolicy, TailConfig, WatchMode};

/// How a newly watched file's buffer is populated
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicyArg {
    /// Seed with the last lines already in the file
    #[default]
    Tail,
    /// Start empty and only buffer new lines
    Empty,
}

impl From<SeedPolicyArg> for SeedPolicy {
    fn from(s: SeedPolicyArg) -> Self {
        match s {
            SeedPolicyArg::Tail => SeedPolicy::Tail,
            SeedPolicyArg::Empty => SeedPolicy::Empty,
        }
    }
}

/// Watch mode for file system monitoring
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatchModeArg {
    /// Automatically select the best watching strategy (native first, poll fallback)
    #[default]
    Auto,
    /// Force native file system watching (inotify/kqueue/FSEvents)
    Native,
    /// Force polling mode (use for NFS or when native watching is unreliable)
    Poll,
}

impl From<WatchModeArg> for WatchMode {
    fn from(w: WatchModeArg) -> Self {
        match w {
            WatchModeArg::Auto => WatchMode::Auto,
            WatchModeArg::Native => WatchMode::Native,
            WatchModeArg::Poll => WatchMode::Poll,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Endpoint the tail server listens on
    #[arg(long, env = "TAILSTREAM_ENDPOINT", default_value = "localhost:9001", value_parser = parse::parse_endpoint)]
    pub endpoint: SocketAddr,

    /// Number of lines to buffer per file and replay to new clients
    #[arg(short = 'n', long, env = "TAILSTREAM_NUMBER", default_value = "10")]
    pub number: usize,

    /// Number of lines clients should keep on screen
    #[arg(short = 'l', long, env = "TAILSTREAM_LINES", default_value = "2000")]
    pub lines: usize,

    /// How a newly watched file's buffer is populated: tail or empty
    #[arg(
        value_enum,
        long,
        env = "TAILSTREAM_SEED_POLICY",
        default_value = "tail"
    )]
    pub seed_policy: SeedPolicyArg,

    /// Watch mode: auto (default), native (inotify/kqueue/FSEvents), poll (for NFS)
    #[arg(
        value_enum,
        long,
        env = "TAILSTREAM_WATCH_MODE",
        default_value = "auto"
    )]
    pub watch_mode: WatchModeArg,

    /// Poll interval in milliseconds; upper bound on latency when notifications are missed
    #[arg(long, env = "TAILSTREAM_POLL_INTERVAL_MS", default_value = "250")]
    pub poll_interval_ms: u64,

    /// Debounce interval in milliseconds for the native file watcher
    #[arg(long, env = "TAILSTREAM_DEBOUNCE_INTERVAL_MS", default_value = "100")]
    pub debounce_interval_ms: u64,

    /// Time in milliseconds a watched file may stay missing before its clients are closed
    #[arg(long, env = "TAILSTREAM_FILE_GONE_GRACE_MS", default_value = "30000")]
    pub file_gone_grace_ms: u64,

    /// Interval in milliseconds between heartbeats sent to idle clients
    #[arg(long, env = "TAILSTREAM_HEARTBEAT_INTERVAL_MS", default_value = "30000")]
    pub heartbeat_interval_ms: u64,

    /// Maximum line size in bytes (longer lines are truncated)
    #[arg(long, env = "TAILSTREAM_MAX_LINE_SIZE", default_value = "65536")]
    pub max_line_size: usize,

    /// Lines queued per client before a slow client is disconnected
    #[arg(long, env = "TAILSTREAM_SUBSCRIBER_QUEUE_SIZE", default_value = "1024")]
    pub subscriber_queue_size: usize,

    /// Files to start tailing immediately
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,
}

impl AgentRun {
    pub fn tail_config(&self) -> TailConfig {
        TailConfig {
            buffer_lines: self.number,
            seed_policy: self.seed_policy.into(),
            watch_mode: self.watch_mode.into(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            debounce_interval: Duration::from_millis(self.debounce_interval_ms),
            file_gone_grace: Duration::from_millis(self.file_gone_grace_ms),
            max_line_size: self.max_line_size,
            subscriber_queue_size: self.subscriber_queue_size,
        }
    }

    pub fn server_config(&self) -> TailServerConfig {
        TailServerConfig {
            lines: self.lines,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            ..Default::default()
        }
    }
}
