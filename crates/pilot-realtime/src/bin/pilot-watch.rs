//! Tail the DevOps Pilot realtime channel from a terminal.
//!
//! Connects to the push endpoint, subscribes to the requested channels after
//! every (re)connect, and logs each decoded event until Ctrl-C or until
//! reconnection gives up.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use pilot_realtime::{
    ChannelConfig, ChannelManager, ConnectionState, InboundMessage, RealtimeEvent,
    TungsteniteConnector,
};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "pilot-watch", version, about = "Watch DevOps Pilot realtime events")]
struct Cli {
    /// Base URL of the DevOps Pilot HTTP API.
    #[arg(long, env = "PILOT_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// Bearer token passed to the push endpoint.
    #[arg(long, env = "PILOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Channels to subscribe to after each connect.
    #[arg(
        long,
        env = "PILOT_CHANNELS",
        value_delimiter = ',',
        default_value = "metrics,alerts,deployments"
    )]
    channels: Vec<String>,

    /// Path of the push endpoint.
    #[arg(long, default_value = "/ws")]
    ws_path: String,

    /// Delay before the first reconnect, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    reconnect_delay_ms: u64,

    /// Reconnect attempts before giving up.
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Retry with backoff when the first handshake fails.
    #[arg(long)]
    retry_initial: bool,

    /// Seconds between keepalive pings (0 disables them).
    #[arg(long, default_value_t = 0)]
    keepalive_secs: u64,
}

impl Cli {
    fn channel_config(&self) -> ChannelConfig {
        let mut config = ChannelConfig::new(&self.api_url)
            .ws_path(&self.ws_path)
            .reconnect_base_delay(Duration::from_millis(self.reconnect_delay_ms))
            .reconnect_max_attempts(self.max_attempts)
            .reconnect_on_handshake_failure(self.retry_initial)
            .keepalive_interval(
                (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs)),
            );
        if let Some(token) = &self.token {
            config = config.token(token);
        }
        config
    }
}

fn log_message(message: &InboundMessage) {
    match RealtimeEvent::decode(message) {
        Ok(RealtimeEvent::MetricsUpdate(metrics)) => info!(
            cpu = metrics.cpu_usage,
            memory = metrics.memory_usage,
            disk = metrics.disk_usage,
            network = metrics.network_traffic,
            "metrics"
        ),
        Ok(RealtimeEvent::AlertTriggered(alert)) => warn!(%alert, "alert triggered"),
        Ok(RealtimeEvent::DeploymentStatus(status)) => info!(%status, "deployment status"),
        Ok(RealtimeEvent::Connection { message }) => {
            info!(text = message.as_deref().unwrap_or_default(), "server greeting")
        }
        Ok(RealtimeEvent::Subscribed { channel }) => {
            info!(channel = channel.as_deref().unwrap_or_default(), "subscribed")
        }
        Ok(RealtimeEvent::Error { message }) => {
            warn!(text = message.as_deref().unwrap_or_default(), "server error")
        }
        Ok(RealtimeEvent::Pong) => debug!("pong"),
        Ok(RealtimeEvent::Echo { data }) => debug!(%data, "echo"),
        Ok(RealtimeEvent::Unknown { kind }) => debug!(%kind, "unrecognized message type"),
        Err(e) => warn!(kind = %message.kind, error = %e, "failed to decode message"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let manager = ChannelManager::new(cli.channel_config(), TungsteniteConnector)?;

    manager.on_message(log_message);

    let resubscriber = manager.clone();
    let channels = cli.channels.clone();
    let open_token = manager.on_open(move || {
        for channel in &channels {
            if let Err(e) = resubscriber.subscribe(channel) {
                warn!(%channel, error = %e, "failed to subscribe");
            }
        }
    });

    let gave_up = Arc::new(Notify::new());
    let notify = Arc::clone(&gave_up);
    manager.on_exhausted(move |info| {
        error!(attempts = info.attempts, "realtime channel gave up reconnecting");
        notify.notify_one();
    });

    if let Err(e) = manager.connect().await {
        if !cli.retry_initial {
            manager.remove_handler(open_token);
            return Err(e.into());
        }
        warn!(error = %e, "initial connect failed; retrying in the background");
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupted; disconnecting");
        }
        () = gave_up.notified() => {}
    }

    // The open handler holds a handle clone; drop it so the actor can stop.
    manager.remove_handler(open_token);
    manager.disconnect();

    // Give the actor a moment to send the close frame before the runtime stops.
    let closed = async {
        while manager.state() != ConnectionState::Disconnected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(2), closed).await.is_err() {
        warn!("timed out waiting for the channel to close");
    }
    Ok(())
}
