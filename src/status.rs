//! Timestamped status updates fanned out over a broadcast channel, for consumers that
//! should not run on the channel task.

use chrono::{DateTime, Utc};
use crate::{
    media::{MediaFinishedListener, MediaStatus, MediaStatusListener},
    receiver::{ReceiverStatus, ReceiverStatusListener},
    util::named,
};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

const STATUS_BROADCAST_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct StatusUpdate {
    pub time: DateTime<Utc>,
    pub msg: StatusMessage,
}

#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum StatusMessage {
    Media(MediaStatus),
    MediaFinished,
    Receiver(ReceiverStatus),
}

#[derive(Debug)]
pub struct StatusBroadcaster {
    status_tx: broadcast::Sender<StatusUpdate>,
}

impl StatusBroadcaster {
    pub fn new() -> StatusBroadcaster {
        let (status_tx, _) = broadcast::channel(STATUS_BROADCAST_CHANNEL_CAPACITY);
        StatusBroadcaster { status_tx }
    }

    /// Updates published after this call. Lagging listeners skip the updates they missed.
    pub fn listen(&self) -> impl Stream<Item = StatusUpdate> + Send {
        BroadcastStream::new(self.status_tx.subscribe())
            .filter_map(|res| futures::future::ready(match res {
                Ok(it) => Some(it),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!(target: concat!(module_path!(),
                                                   "::StatusBroadcaster::listen"),
                                   n,
                                   "lagged");
                    None
                },
            }))
    }

    #[named]
    pub fn publish(&self, msg: StatusMessage) {
        const METHOD_PATH: &str = method_path!("StatusBroadcaster");

        let update = StatusUpdate {
            time: Utc::now(),
            msg,
        };

        tracing::trace!(target: METHOD_PATH,
                        ?update,
                        "status update");

        // An error just means no listeners are subscribed.
        let _ = self.status_tx.send(update);
    }
}

impl Default for StatusBroadcaster {
    fn default() -> StatusBroadcaster {
        StatusBroadcaster::new()
    }
}

impl MediaStatusListener for StatusBroadcaster {
    fn on_media_status_update(&self, status: &MediaStatus) {
        self.publish(StatusMessage::Media(status.clone()));
    }
}

impl MediaFinishedListener for StatusBroadcaster {
    fn on_media_finished(&self) {
        self.publish(StatusMessage::MediaFinished);
    }
}

impl ReceiverStatusListener for StatusBroadcaster {
    fn on_receiver_status_update(&self, status: &ReceiverStatus) {
        self.publish(StatusMessage::Receiver(status.clone()));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn listeners_receive_published_updates() {
        let broadcaster = StatusBroadcaster::new();
        let listener = broadcaster.listen();
        tokio::pin!(listener);

        broadcaster.on_media_finished();
        broadcaster.on_receiver_status_update(&ReceiverStatus::default());

        let first = listener.next().await.unwrap();
        assert!(matches!(first.msg, StatusMessage::MediaFinished));

        let second = listener.next().await.unwrap();
        assert!(matches!(second.msg, StatusMessage::Receiver(ref s) if s.volume_level == 1.0));
    }
}
