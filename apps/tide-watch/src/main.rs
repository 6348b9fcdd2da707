mod render;

use std::sync::Arc;

use anyhow::Context;
use beach_tide::{
    ChannelClient, ChannelConfig, Subscription, SubscriptionError, SubscriptionState,
    TeardownScope, Topic,
};
use clap::Parser;
use render::{OutputFormat, Renderer};
use serde_json::Value;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "tide-watch", about = "Render events from server-push channels")]
struct Cli {
    /// Channels to subscribe to, e.g. SystemNotification.
    #[arg(required = true)]
    topics: Vec<String>,

    /// Overrides BEACH_TIDE_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Overrides BEACH_TIDE_PATH_PREFIX.
    #[arg(long)]
    path_prefix: Option<String>,

    /// Bearer token sent with every stream request.
    #[arg(long)]
    token: Option<String>,

    /// Close a channel on its first transport failure instead of reconnecting.
    #[arg(long)]
    no_reconnect: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl Cli {
    fn apply(&self, mut config: ChannelConfig) -> ChannelConfig {
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(prefix) = &self.path_prefix {
            config.path_prefix = prefix.clone();
        }
        if let Some(token) = &self.token {
            config.auth_token = Some(token.clone());
        }
        if self.no_reconnect {
            config.reconnect = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config =
        cli.apply(ChannelConfig::load().context("invalid BEACH_TIDE_* configuration")?);
    info!(base_url = %config.base_url, topics = ?cli.topics, "starting tide-watch");

    let client = ChannelClient::http(config);
    let renderer = Arc::new(Renderer::stdout(cli.format));
    let scope = TeardownScope::new();

    let mut subscriptions = Vec::with_capacity(cli.topics.len());
    for topic in &cli.topics {
        let subscription = open_channel(&client, topic, Arc::clone(&renderer))
            .with_context(|| format!("failed to subscribe to {topic}"))?;
        scope.register_for_teardown(&subscription);
        spawn_status_feedback(&subscription, Arc::clone(&renderer));
        subscriptions.push(subscription);
    }

    let ctrl_c = scope.bind(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c; shutting down");
        }
    });
    let all_closed = futures::future::join_all(
        subscriptions
            .iter()
            .map(|subscription| subscription.released()),
    );

    tokio::select! {
        _ = ctrl_c => info!("interrupted; closing channels"),
        _ = all_closed => warn!("every channel was closed by its transport"),
    }

    let closed = scope.teardown();
    futures::future::join_all(
        subscriptions
            .iter()
            .map(|subscription| subscription.released()),
    )
    .await;
    info!(closed, "tide-watch stopped");
    Ok(())
}

fn open_channel(
    client: &ChannelClient<beach_tide::transport::HttpTransport>,
    topic: &str,
    renderer: Arc<Renderer<std::io::Stdout>>,
) -> Result<Subscription, SubscriptionError> {
    client
        .subscribe(topic)
        .handler(move |payload: Value, topic: &Topic| renderer.render(&payload, topic))
        .on_error(|err: &SubscriptionError, topic: &Topic| {
            warn!(topic = %topic, error = %err, "channel error");
        })
        .open()
}

fn spawn_status_feedback(subscription: &Subscription, renderer: Arc<Renderer<std::io::Stdout>>) {
    let mut status = subscription.watch_state();
    let topic = subscription.topic().clone();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let state = *status.borrow_and_update();
            renderer.connection_state(&topic, state);
            if state == SubscriptionState::Closed {
                break;
            }
        }
    });
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}
