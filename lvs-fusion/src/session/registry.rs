//! Meeting registry
//!
//! Maps a meeting code to the broadcast channel all of its observers listen
//! on. Sessions join on connect and leave on disconnect; SSE observers only
//! subscribe, and their subscription prunes the meeting when dropped. A
//! channel is removed once it has neither members nor receivers.

use lvs_common::messages::VerificationUpdate;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

#[derive(Debug)]
struct MeetingChannel {
    tx: broadcast::Sender<VerificationUpdate>,
    members: usize,
}

/// Shared meeting → observers table
#[derive(Debug, Clone)]
pub struct MeetingRegistry {
    meetings: Arc<RwLock<HashMap<String, MeetingChannel>>>,
    capacity: usize,
}

/// A session's place in its meeting
#[derive(Debug)]
pub struct Membership {
    meeting_code: String,
    tx: broadcast::Sender<VerificationUpdate>,
}

impl MeetingRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            meetings: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a session as a member and observer of its meeting
    pub async fn join(&self, meeting_code: &str) -> Membership {
        let mut meetings = self.meetings.write().await;
        let channel = meetings
            .entry(meeting_code.to_string())
            .or_insert_with(|| MeetingChannel {
                tx: broadcast::channel(self.capacity).0,
                members: 0,
            });
        channel.members += 1;
        debug!("Meeting {} now has {} members", meeting_code, channel.members);

        Membership {
            meeting_code: meeting_code.to_string(),
            tx: channel.tx.clone(),
        }
    }

    /// Observe a meeting without joining it
    pub async fn subscribe(&self, meeting_code: &str) -> Subscription {
        let mut meetings = self.meetings.write().await;
        let rx = meetings
            .entry(meeting_code.to_string())
            .or_insert_with(|| MeetingChannel {
                tx: broadcast::channel(self.capacity).0,
                members: 0,
            })
            .tx
            .subscribe();

        Subscription {
            updates: Some(BroadcastStream::new(rx)),
            meeting_code: meeting_code.to_string(),
            registry: self.clone(),
        }
    }

    /// Remove one meeting if it has neither members nor receivers
    pub async fn prune(&self, meeting_code: &str) {
        let mut meetings = self.meetings.write().await;
        let empty = meetings
            .get(meeting_code)
            .is_some_and(|channel| channel.members == 0 && channel.tx.receiver_count() == 0);
        if empty {
            meetings.remove(meeting_code);
            info!("Meeting {} has no observers left", meeting_code);
        }
    }

    /// Drop a membership; the channel goes once nobody is left
    ///
    /// Receivers obtained from the membership should be dropped first.
    pub async fn leave(&self, membership: Membership) {
        let meeting_code = membership.meeting_code;
        let mut meetings = self.meetings.write().await;
        if let Some(channel) = meetings.get_mut(&meeting_code) {
            channel.members = channel.members.saturating_sub(1);
        }
        meetings.retain(|code, channel| {
            let keep = channel.members > 0 || channel.tx.receiver_count() > 0;
            if !keep {
                info!("Meeting {} has no observers left", code);
            }
            keep
        });
    }

    /// Live receivers of a meeting (sessions and SSE observers)
    pub async fn observer_count(&self, meeting_code: &str) -> usize {
        self.meetings
            .read()
            .await
            .get(meeting_code)
            .map_or(0, |channel| channel.tx.receiver_count())
    }

    pub async fn meeting_count(&self) -> usize {
        self.meetings.read().await.len()
    }
}

/// Read-only stream of one meeting's updates
///
/// Dropping it removes the meeting once nobody else uses it.
pub struct Subscription {
    updates: Option<BroadcastStream<VerificationUpdate>>,
    meeting_code: String,
    registry: MeetingRegistry,
}

impl Stream for Subscription {
    type Item = Result<VerificationUpdate, BroadcastStreamRecvError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.updates.as_mut() {
            Some(updates) => Pin::new(updates).poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Receiver must be gone before the prune looks at receiver_count
        drop(self.updates.take());

        let registry = self.registry.clone();
        let meeting_code = std::mem::take(&mut self.meeting_code);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { registry.prune(&meeting_code).await });
            }
            Err(_) => debug!("No runtime to prune meeting {}", meeting_code),
        }
    }
}

impl Membership {
    pub fn meeting_code(&self) -> &str {
        &self.meeting_code
    }

    /// Receive every later update of the meeting, including this session's own
    pub fn subscribe(&self) -> broadcast::Receiver<VerificationUpdate> {
        self.tx.subscribe()
    }

    /// Fan an update out to every observer of the meeting
    pub fn broadcast(&self, update: VerificationUpdate) -> usize {
        // Err only when there are no receivers
        self.tx.send(update).unwrap_or(0)
    }
}
