//! Turning purchases into messages and pushing them to every channel.

pub mod message;
pub mod telegram;
pub mod tier;

use crate::classifier::PurchaseEvent;
use anyhow::Result;
use async_trait::async_trait;
use message::{LinkButton, MessageContext, render_purchase};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tier::tier_for;
use tokio::time::sleep;
use tracing::{info, warn};

/// A rendered message. `text` is Telegram-flavoured HTML.
#[derive(Debug, Clone)]
pub struct Notification {
    pub text: String,
    pub image: Option<PathBuf>,
    pub buttons: Vec<LinkButton>,
}

/// One delivery destination.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> String;

    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

pub struct Notifier {
    channels: Vec<Arc<dyn Channel>>,
    context: MessageContext,
    send_delay: Duration,
}

impl Notifier {
    pub fn new(
        channels: Vec<Arc<dyn Channel>>,
        context: MessageContext,
        send_delay: Duration,
    ) -> Self {
        Self {
            channels,
            context,
            send_delay,
        }
    }

    pub fn context(&self) -> &MessageContext {
        &self.context
    }

    pub async fn notify_purchase(&self, event: &PurchaseEvent) -> usize {
        let tier = tier_for(event.usd_value);
        let notification = render_purchase(event, tier, &self.context);
        let delivered = self.broadcast(&notification).await;

        info!(
            tier = tier.label,
            usd = event.usd_value,
            buyer = ?event.buyer,
            resolved_by = ?event.resolved_by,
            source = ?event.source,
            tx = ?event.tx_hash,
            "[BuyBot] Announced purchase to {}/{} channel(s)",
            delivered,
            self.channels.len()
        );
        delivered
    }

    /// Sends to every channel in order with a fixed pause between sends. A
    /// failing channel does not stop the others. Returns the successful count.
    pub async fn broadcast(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for (i, channel) in self.channels.iter().enumerate() {
            if i > 0 && !self.send_delay.is_zero() {
                sleep(self.send_delay).await;
            }
            match channel.deliver(notification).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Delivery to {} failed: {:#}", channel.name(), e),
            }
        }
        delivered
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records deliveries; fails every send when `failing` is set.
    #[derive(Default)]
    pub struct RecordingChannel {
        pub name: String,
        pub failing: bool,
        pub sent: Mutex<Vec<Notification>>,
    }

    pub fn context() -> MessageContext {
        MessageContext {
            token_symbol: "PBTC".to_string(),
            quote_symbol: "USDT".to_string(),
            total_supply: 1_000.0,
            explorer_url: "https://basescan.org".to_string(),
            chart_url: None,
            buy_url: None,
            image: None,
        }
    }

    /// A notifier that broadcasts to `channels` without pausing.
    pub fn notifier(channels: &[Arc<RecordingChannel>]) -> Arc<Notifier> {
        let channels = channels
            .iter()
            .map(|c| c.clone() as Arc<dyn Channel>)
            .collect();
        Arc::new(Notifier::new(channels, context(), Duration::ZERO))
    }

    impl RecordingChannel {
        pub fn named(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ..Default::default()
            })
        }

        pub fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                failing: true,
                ..Default::default()
            })
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|n| n.text.clone()).collect()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> String {
            self.name.clone()
        }

        async fn deliver(&self, notification: &Notification) -> Result<()> {
            if self.failing {
                anyhow::bail!("Bad Request: chat not found");
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }
}
