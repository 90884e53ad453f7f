use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

use crate::application::ports::{AnalysisEvent, ProgressPublisher};

/// Per-job broadcast channels for live progress. Channels exist only while
/// someone is subscribed; events for jobs nobody watches are dropped.
pub struct ProgressBroadcaster {
    channels: Mutex<HashMap<i32, broadcast::Sender<AnalysisEvent>>>,
    capacity: usize,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<i32, broadcast::Sender<AnalysisEvent>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A lagging subscriber loses the oldest events, never the channel.
    pub fn subscribe(&self, job_id: i32) -> broadcast::Receiver<AnalysisEvent> {
        self.channels()
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, job_id: i32) -> usize {
        self.channels()
            .get(&job_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl ProgressPublisher for ProgressBroadcaster {
    fn publish(&self, event: AnalysisEvent) {
        let job_id = event.job_id;
        let terminal = event.is_terminal();
        let mut channels = self.channels();

        let Some(sender) = channels.get(&job_id) else {
            return;
        };
        if sender.send(event).is_err() {
            debug!("No subscribers left for analysis job {}", job_id);
            channels.remove(&job_id);
            return;
        }
        if terminal {
            channels.remove(&job_id);
        }
    }

    fn close(&self, job_id: i32) {
        // Receivers drain buffered events, then see the channel closed.
        self.channels().remove(&job_id);
    }
}
