//! Human-readable outcome messages pushed out of the scheduler.
//!
//! Delivery is fire-and-forget: a sink that has gone away or is full drops the message and the
//! scheduler carries on. Each event is sent at most once.
use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::lane::LaneId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Notification {
    pub level: Level,
    pub lane_id: Option<LaneId>,
    pub message: String,
}

impl Notification {
    pub fn info(lane_id: Option<LaneId>, message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            lane_id,
            message: message.into(),
        }
    }

    pub fn success(lane_id: Option<LaneId>, message: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            lane_id,
            message: message.into(),
        }
    }

    pub fn error(lane_id: Option<LaneId>, message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            lane_id,
            message: message.into(),
        }
    }
}

pub trait Notify: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log, this is the default sink.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notify for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            Level::Error => error!("NOTIFY: {}", notification.message),
            _ => info!("NOTIFY: {}", notification.message),
        }
    }
}

impl Notify for UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        //Receiver dropped means nobody is listening any more
        let _ = self.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::{Level, Notification, Notify};

    #[test]
    fn test_that_channel_sink_ignores_closed_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.notify(Notification::success(Some(1), "Lane 1 confirmed"));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.level, Level::Success);
        assert_eq!(received.lane_id, Some(1));

        drop(rx);
        tx.notify(Notification::error(None, "nobody listening"));
    }
}
