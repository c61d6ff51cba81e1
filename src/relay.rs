//! The relay loop: live updates first, then one round-robin step per tick.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::channels::{ChannelId, Message, MessageStream, PlatformClient};
use crate::clock::Clock;
use crate::error::{ChannelError, RelayError};
use crate::pipeline::{ForwardOutcome, Forwarder};
use crate::scheduler::{CandidateScanner, ChannelCursors, RoundRobin, Turn};
use crate::store::DedupStore;

/// Default wait after a tick that did nothing.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(5);

/// What the scheduler step of a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A candidate was found and handed to the forwarder.
    Forwarded(ForwardOutcome),
    /// Nothing eligible within the scan budget; the cursor moved by one.
    NoCandidate,
    /// Fetching the channel failed; its cursor is untouched.
    SourceFailed(String),
}

/// Summary of one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Outcomes for live messages drained at the start of the tick.
    pub live: Vec<ForwardOutcome>,
    pub turn: Turn,
    pub step: StepOutcome,
}

impl TickReport {
    /// Nothing arrived live and the visited channel had nothing to offer.
    pub fn is_idle(&self) -> bool {
        self.live.is_empty() && !matches!(self.step, StepOutcome::Forwarded(_))
    }

    /// Number of posts that reached the target this tick.
    pub fn sent(&self) -> usize {
        let step = matches!(&self.step, StepOutcome::Forwarded(o) if o.is_sent());
        self.live.iter().filter(|o| o.is_sent()).count() + usize::from(step)
    }
}

/// Owns every piece of relay state and drives it one tick at a time.
pub struct Relay {
    client: Arc<dyn PlatformClient>,
    forwarder: Forwarder,
    store: DedupStore,
    scanner: CandidateScanner,
    rotation: RoundRobin,
    cursors: ChannelCursors,
    live: Option<MessageStream>,
    clock: Arc<dyn Clock>,
    idle_wait: Duration,
}

impl Relay {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        forwarder: Forwarder,
        store: DedupStore,
        scanner: CandidateScanner,
        sources: Vec<ChannelId>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RelayError> {
        Ok(Self {
            client,
            forwarder,
            store,
            scanner,
            rotation: RoundRobin::new(sources)?,
            cursors: ChannelCursors::new(),
            live: None,
            clock,
            idle_wait: DEFAULT_IDLE_WAIT,
        })
    }

    /// Attach a subscription stream of new source messages.
    pub fn with_live(mut self, stream: MessageStream) -> Self {
        self.live = Some(stream);
        self
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn sources(&self) -> &[ChannelId] {
        self.rotation.channels()
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    pub fn cursors(&self) -> &ChannelCursors {
        &self.cursors
    }

    pub fn rotation(&self) -> &RoundRobin {
        &self.rotation
    }

    /// One iteration: forward queued live messages, then visit one channel.
    pub async fn tick(&mut self) -> TickReport {
        let mut live = Vec::new();
        for message in self.drain_live() {
            if let Some(outcome) = self.forward_live(&message).await {
                live.push(outcome);
            }
        }

        let turn = self.rotation.next_turn();
        if turn.new_pass {
            self.cursors.reset_all();
            info!(
                pass = turn.pass,
                previous_pass_idle = turn.previous_pass_idle,
                idle_passes = self.rotation.idle_passes(),
                "🔄 New sweep, rewinding every channel"
            );
        }

        let step = self.step(&turn.channel).await;
        TickReport { live, turn, step }
    }

    /// Loop forever. A panicking tick is logged and the loop carries on.
    pub async fn run(mut self) {
        info!(
            sources = self.sources().len(),
            target = %self.forwarder.target(),
            "Relay loop started"
        );

        loop {
            match AssertUnwindSafe(self.tick()).catch_unwind().await {
                Ok(report) => {
                    if report.is_idle() {
                        self.clock.sleep(self.idle_wait).await;
                    }
                }
                Err(payload) => {
                    let err = RelayError::TickPanicked(panic_message(payload.as_ref()));
                    error!(error = %err, "Relay tick failed, continuing");
                    self.clock.sleep(self.idle_wait).await;
                }
            }
        }
    }

    async fn step(&mut self, channel: &ChannelId) -> StepOutcome {
        let offset = self.cursors.visit(channel);

        match self
            .scanner
            .next_candidate(self.client.as_ref(), &self.store, channel, offset)
            .await
        {
            Ok(Some(candidate)) => {
                self.rotation.record_candidate();
                self.cursors.set(channel, candidate.new_offset);
                debug!(
                    key = %candidate.key,
                    offset = candidate.new_offset,
                    "Candidate found"
                );
                let outcome = self
                    .forwarder
                    .post(&mut self.store, &candidate.message, channel)
                    .await;
                StepOutcome::Forwarded(outcome)
            }
            Ok(None) => {
                let next = self.cursors.advance(channel, 1);
                debug!(channel = %channel, offset = next, "No candidate this visit");
                StepOutcome::NoCandidate
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Source unavailable, skipping this turn");
                StepOutcome::SourceFailed(e.to_string())
            }
        }
    }

    /// Pull whatever the subscription already has queued, without waiting.
    fn drain_live(&mut self) -> Vec<Message> {
        let mut drained = Vec::new();
        let Some(stream) = self.live.as_mut() else {
            return drained;
        };

        let mut ended = false;
        loop {
            match stream.next().now_or_never() {
                Some(Some(message)) => drained.push(message),
                Some(None) => {
                    ended = true;
                    break;
                }
                None => break,
            }
        }

        if ended {
            let err = ChannelError::SubscriptionClosed("live stream ended".into());
            warn!(error = %err, "Continuing with history scans only");
            self.live = None;
        }
        drained
    }

    async fn forward_live(&mut self, message: &Message) -> Option<ForwardOutcome> {
        let Some(origin) = self
            .rotation
            .channels()
            .iter()
            .find(|source| source.matches(&message.chat))
            .cloned()
        else {
            debug!(
                chat = message.chat.id,
                message_id = message.id,
                "Ignoring live message from a chat that is not a source"
            );
            return None;
        };

        Some(self.forwarder.post(&mut self.store, message, &origin).await)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
