//! Session view controller
//!
//! Ties the session store client, the live channel, and the reconciler
//! together behind the surface a renderer polls: start a session, pump the
//! queued live events, read the merged log or the assembled turns, stop.
//!
//! All state mutation happens on the caller's task. The channel's background
//! task only feeds the subscription queue; [`SessionView::pump`] drains it,
//! so no state here is shared or locked.

use tracing::{debug, info, warn};

use crate::channel::{ChannelItem, LiveChannel, Subscription};
use crate::client::SessionClient;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::reconcile::Reconciler;
use crate::transcript::assemble;
use crate::types::{Event, EventType, Turn};

/// What [`SessionView::pump`] observed while draining the queue.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PumpOutcome {
    /// Live events appended to the pending buffer.
    pub appended: usize,
    /// Whether a status change arrived and a confirmed refetch ran.
    pub refetched: bool,
    /// Transport error reported by the channel, if any. The subscription is
    /// dead once this is set; call [`SessionView::resubscribe`] to recover.
    pub transport_error: Option<String>,
}

/// Controller for viewing one session at a time.
pub struct SessionView {
    client: SessionClient,
    channel: LiveChannel,
    reconciler: Reconciler,
    subscription: Option<Subscription>,
    session_id: Option<String>,
}

impl SessionView {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            client: SessionClient::new(config)?,
            channel: LiveChannel::new(&config.base_url)?,
            reconciler: Reconciler::new(),
            subscription: None,
            session_id: None,
        })
    }

    /// Attach to a session: reset all per-session state, open the live
    /// subscription, then fetch the initial confirmed snapshot.
    ///
    /// Subscribing before fetching means an event can arrive on both paths,
    /// never on neither; the reconciler's content-key dedup absorbs the
    /// overlap.
    pub async fn start(&mut self, session_id: &str) -> Result<()> {
        self.stop();
        self.reconciler = Reconciler::new();
        self.session_id = Some(session_id.to_string());
        self.subscription = Some(self.channel.subscribe(session_id));

        info!(session_id, "Starting session view");
        self.refresh_confirmed().await?;
        Ok(())
    }

    /// Detach from the current session. Idempotent.
    ///
    /// Cancels the subscription and bumps the fetch epoch so any in-flight
    /// response is discarded on arrival.
    pub fn stop(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.cancel();
        }
        if self.session_id.take().is_some() {
            self.reconciler.begin_fetch();
            debug!("Stopped session view");
        }
    }

    /// Drain every queued channel item and fold it into the reconciler.
    ///
    /// Status changes mean the confirmed log has moved, so one refetch runs
    /// after the drain. Call this from the render loop; it does no waiting
    /// beyond that refetch.
    pub async fn pump(&mut self) -> Result<PumpOutcome> {
        let mut outcome = PumpOutcome::default();
        let mut saw_status_change = false;

        if let Some(sub) = self.subscription.as_mut() {
            while let Some(item) = sub.try_next() {
                match item {
                    ChannelItem::Event(wire) => {
                        if wire.event_type == EventType::StatusChange {
                            saw_status_change = true;
                        }
                        if self.reconciler.append_live(wire).is_some() {
                            outcome.appended += 1;
                        }
                    }
                    ChannelItem::TransportError(msg) => {
                        warn!(error = %msg, "Live channel failed");
                        outcome.transport_error = Some(msg);
                        break;
                    }
                }
            }
        }

        if saw_status_change {
            self.refresh_confirmed().await?;
            outcome.refetched = true;
        }

        Ok(outcome)
    }

    /// Re-open the live subscription after a transport error.
    pub fn resubscribe(&mut self) {
        if let Some(id) = self.session_id.clone() {
            if let Some(old) = self.subscription.take() {
                old.cancel();
            }
            self.subscription = Some(self.channel.subscribe(&id));
            debug!(session_id = %id, "Resubscribed to live channel");
        }
    }

    /// Fetch the confirmed log and apply it under the epoch guard.
    ///
    /// A fetch failure leaves reconciler state untouched; a stale response
    /// (another fetch started while this one was in flight) is discarded.
    async fn refresh_confirmed(&mut self) -> Result<()> {
        let Some(id) = self.session_id.clone() else {
            return Ok(());
        };
        let epoch = self.reconciler.begin_fetch();
        let snapshot = self.client.fetch_session(&id).await?;
        self.reconciler.apply_snapshot(epoch, &snapshot);
        Ok(())
    }

    /// The merged event log: confirmed followed by pending.
    pub fn merged_events(&self) -> Vec<Event> {
        self.reconciler.merged_events()
    }

    /// Assemble the merged log into turns. Liveness follows the
    /// subscription: an attached view treats an unconcluded final turn as
    /// still working.
    pub fn turns(&self) -> Vec<Turn> {
        assemble(&self.reconciler.merged_events(), self.is_live())
    }

    /// Whether a live subscription is currently attached and healthy.
    pub fn is_live(&self) -> bool {
        self.subscription
            .as_ref()
            .map(|s| !s.is_cancelled())
            .unwrap_or(false)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}
