//! The assembled broker and its background tasks.

use anyhow::{Context, Result};
use rand::Rng;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, trace, warn};

use crate::config::RuntimeConfig;
use tag_broker::{
    BroadcastDispatcher, DispatcherSet, FanoutDispatcher, Protocol, ProtocolRouter, ServerMessage,
    SessionRouter, SimulatedProvider, SubscriptionRegistry, Tag, TagAddress, TagBrokerApi,
    TagValue,
};

/// Broker type served by the runtime.
pub type RuntimeBroker = SubscriptionRegistry<ProtocolRouter<SimulatedProvider, SimulatedProvider>>;

/// Broker runtime.
///
/// ## Wiring
///
/// ```text
///   ca provider ─┐                      ┌─► FanoutDispatcher ─► sessions
///                ├─► ProtocolRouter ─► SubscriptionRegistry
///   pva provider ┘                      └─► BroadcastDispatcher ─► update log
/// ```
pub struct BrokerRuntime {
    config: RuntimeConfig,
    ca: Arc<SimulatedProvider>,
    pva: Arc<SimulatedProvider>,
    broker: Arc<RuntimeBroker>,
    sessions: Arc<SessionRouter<RuntimeBroker>>,
    broadcast: Arc<BroadcastDispatcher>,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl BrokerRuntime {
    /// Build providers, dispatchers, the registry and the session router,
    /// then seed the providers.
    pub fn new(config: RuntimeConfig) -> Self {
        let ca = Arc::new(SimulatedProvider::new("ca"));
        let pva = Arc::new(SimulatedProvider::new("pva"));
        let provider = Arc::new(ProtocolRouter::new(
            ca.clone(),
            pva.clone(),
            config.broker.default_protocol,
        ));

        let fanout = Arc::new(FanoutDispatcher::new(config.broker.consumer_queue_capacity));
        let broadcast = Arc::new(BroadcastDispatcher::new(config.broker.broadcast_capacity));
        let dispatchers = DispatcherSet::new()
            .with(fanout.clone())
            .with(broadcast.clone());

        let broker = Arc::new(SubscriptionRegistry::with_config(
            provider,
            Arc::new(dispatchers),
            config.broker.clone(),
        ));
        let sessions = Arc::new(SessionRouter::new(broker.clone(), fanout));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runtime = Self {
            config,
            ca,
            pva,
            broker,
            sessions,
            broadcast,
            shutdown_tx,
            shutdown_rx,
        };
        runtime.seed();
        runtime
    }

    pub fn broker(&self) -> &Arc<RuntimeBroker> {
        &self.broker
    }

    pub fn sessions(&self) -> &Arc<SessionRouter<RuntimeBroker>> {
        &self.sessions
    }

    /// Simulated provider serving `protocol`.
    pub fn provider(&self, protocol: Protocol) -> &Arc<SimulatedProvider> {
        match protocol {
            Protocol::Ca => &self.ca,
            Protocol::Pva => &self.pva,
        }
    }

    fn locate(&self, tag: &Tag) -> (&Arc<SimulatedProvider>, Tag) {
        let address = TagAddress::parse(tag, self.config.broker.default_protocol);
        (self.provider(address.protocol), Tag::new(address.channel))
    }

    fn seed(&self) {
        for (tag, value) in &self.config.seed_tags {
            let (provider, channel) = self.locate(tag);
            provider.set_value(channel, value.clone());
        }
        info!(tags = self.config.seed_tags.len(), "Simulated providers seeded");
    }

    /// Move every seeded numeric channel one step.
    pub fn tick(&self) {
        self.ticker().tick();
    }

    fn ticker(&self) -> Ticker {
        Ticker {
            ca: self.ca.clone(),
            pva: self.pva.clone(),
            default_protocol: self.config.broker.default_protocol,
            seed_tags: self.config.seed_tags.iter().map(|(t, _)| t.clone()).collect(),
        }
    }

    /// Spawn the drift ticker and the update log.
    pub fn start(&self) {
        let period = self.config.tick_interval;
        if !period.is_zero() {
            let mut shutdown = self.shutdown_rx.clone();
            let ticker = self.ticker();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = interval.tick() => ticker.tick(),
                        _ = shutdown.changed() => {
                            debug!("Ticker stopped");
                            break;
                        }
                    }
                }
            });
        }

        let mut updates = Box::pin(self.broadcast.stream());
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.next() => match update {
                        Some(update) => trace!(tag = %update.tag, value = %update.value, "Update"),
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });

        info!(tick_ms = period.as_millis() as u64, "Runtime started");
    }

    /// Serve one consumer over a JSON-lines stream until input ends or the
    /// runtime shuts down.
    pub async fn run_console<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut session = self.sessions.connect();
        let mut lines = input.lines();
        let mut shutdown = self.shutdown_rx.clone();

        let result: Result<()> = async {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    Some(message) = session.updates.recv() => {
                        write_message(&mut output, &message).await?;
                    }
                    line = lines.next_line() => {
                        let Some(text) = line.context("Failed to read consumer input")? else {
                            break;
                        };
                        if text.trim().is_empty() {
                            continue;
                        }
                        for reply in self.sessions.handle_text(&session.id, &text).await {
                            write_message(&mut output, &reply).await?;
                        }
                        // Flush updates this line triggered (replays, write echoes).
                        while let Ok(message) = session.updates.try_recv() {
                            write_message(&mut output, &message).await?;
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = self.sessions.disconnect(&session.id).await {
            warn!(consumer = %session.id, error = %e, "Disconnect left provider errors");
        }
        result
    }

    /// Stop background tasks and close every provider subscription.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
        if let Err(e) = self.broker.shutdown().await {
            warn!(error = %e, "Provider errors during shutdown");
        }

        let metrics = self.broker.metrics().snapshot();
        info!(
            opens = metrics.opens,
            closes = metrics.closes,
            updates = metrics.updates_dispatched,
            writes = metrics.writes_forwarded,
            "Shutdown complete"
        );
    }
}

/// Drifts seeded numeric channels; owned by the ticker task.
struct Ticker {
    ca: Arc<SimulatedProvider>,
    pva: Arc<SimulatedProvider>,
    default_protocol: Protocol,
    seed_tags: Vec<Tag>,
}

impl Ticker {
    fn tick(&self) {
        let mut rng = rand::thread_rng();
        for tag in &self.seed_tags {
            let address = TagAddress::parse(tag, self.default_protocol);
            let provider = match address.protocol {
                Protocol::Ca => &self.ca,
                Protocol::Pva => &self.pva,
            };
            let channel = Tag::new(address.channel);
            let next = match provider.value_of(&channel) {
                Some(TagValue::Double(d)) => TagValue::Double(d + rng.gen_range(-0.5..0.5)),
                Some(TagValue::Int(i)) => TagValue::Int(i.wrapping_add(1)),
                _ => continue,
            };
            provider.publish(&channel, next);
        }
    }
}

async fn write_message<W: AsyncWrite + Unpin>(output: &mut W, message: &ServerMessage) -> Result<()> {
    let mut line = message.to_json().context("Failed to encode message")?;
    line.push('\n');
    output
        .write_all(line.as_bytes())
        .await
        .context("Failed to write to consumer")?;
    output.flush().await.context("Failed to flush consumer output")?;
    Ok(())
}
