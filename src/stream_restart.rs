//! Seek live streams back to their start once, after the device starts them mid-way.

use crate::{
    controller::PlaybackController,
    media::{MediaStatus, MediaStatusListener, PlayerState},
    util::named,
};
use std::sync::{Arc, Mutex, PoisonError};

/// Playback position beyond which a fresh stream is sent back to 0.
pub const RESTART_THRESHOLD_SECS: f64 = 5.0;

pub struct StreamRestartHelper {
    state: Mutex<State>,
    restart: Box<dyn Fn() + Send + Sync>,
}

#[derive(Debug, Default)]
struct State {
    last_content_id: String,

    /// Set once the first playing status of the current content has been checked.
    done: bool,
}

impl StreamRestartHelper {
    /// `restart` runs on the channel task; it must not block.
    pub fn new(restart: impl Fn() + Send + Sync + 'static) -> StreamRestartHelper {
        StreamRestartHelper {
            state: Mutex::new(State::default()),
            restart: Box::new(restart),
        }
    }

    /// A helper that seeks `controller` to 0, registered as a media status listener.
    pub fn attach(controller: &Arc<PlaybackController>) -> Arc<StreamRestartHelper> {
        let weak = Arc::downgrade(controller);
        let helper = Arc::new(StreamRestartHelper::new(move || {
            if let Some(controller) = weak.upgrade() {
                controller.spawn_command("restart stream", |c| async move { c.seek(0.0).await });
            }
        }));

        controller.add_media_status_listener(helper.clone());
        helper
    }
}

impl MediaStatusListener for StreamRestartHelper {
    #[named]
    fn on_media_status_update(&self, status: &MediaStatus) {
        let fire = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

            if !status.content_id.is_empty() && status.content_id != state.last_content_id {
                state.last_content_id = status.content_id.clone();
                state.done = false;
            }

            if state.done
                || status.player_state != PlayerState::Playing
                || status.current_time <= 0.0
            {
                false
            } else {
                state.done = true;
                status.current_time > RESTART_THRESHOLD_SECS
            }
        };

        if fire {
            tracing::info!(target: method_path!("StreamRestartHelper"),
                           content_id = status.content_id,
                           current_time = status.current_time,
                           "restarting stream from the beginning");
            (self.restart)();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn playing(content_id: &str, current_time: f64) -> MediaStatus {
        MediaStatus {
            content_id: content_id.to_string(),
            current_time,
            player_state: PlayerState::Playing,
            ..MediaStatus::default()
        }
    }

    fn counting() -> (Arc<AtomicUsize>, StreamRestartHelper) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let helper = StreamRestartHelper::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, helper)
    }

    #[test]
    fn restarts_once_per_content() {
        let (count, helper) = counting();

        helper.on_media_status_update(&playing("X", 12.0));
        helper.on_media_status_update(&playing("X", 13.0));
        helper.on_media_status_update(&playing("X", 14.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        helper.on_media_status_update(&playing("Y", 20.0));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn early_position_disarms_without_restart() {
        let (count, helper) = counting();

        helper.on_media_status_update(&playing("X", 2.0));
        helper.on_media_status_update(&playing("X", 30.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn waits_for_playing_with_progress() {
        let (count, helper) = counting();

        let buffering = MediaStatus {
            player_state: PlayerState::Buffering,
            ..playing("X", 40.0)
        };
        helper.on_media_status_update(&buffering);
        helper.on_media_status_update(&playing("X", 0.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Sparse updates without a content id keep the current content.
        helper.on_media_status_update(&playing("", 40.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
