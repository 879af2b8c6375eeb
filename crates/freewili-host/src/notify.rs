//! Delivery of unsolicited device notifications.

use crossbeam_channel::Sender;
use freewili_protocol::Notification;

/// Receives notifications that arrive while a session waits for a response.
///
/// Handlers run on the caller's thread inside `Session::call`, so they should
/// return quickly.
pub trait NotificationHandler: Send {
    /// Handle one notification.
    fn on_notification(&mut self, notification: Notification);
}

impl<F> NotificationHandler for F
where
    F: FnMut(Notification) + Send,
{
    fn on_notification(&mut self, notification: Notification) {
        self(notification)
    }
}

/// Forwards notifications into a channel for consumption on another thread.
///
/// A disconnected receiver drops notifications silently.
#[derive(Debug, Clone)]
pub struct ChannelHandler(pub Sender<Notification>);

impl NotificationHandler for ChannelHandler {
    fn on_notification(&mut self, notification: Notification) {
        if self.0.send(notification).is_err() {
            tracing::trace!("Notification receiver dropped");
        }
    }
}

/// Default handler: log the notification.
pub(crate) fn log_notification(port: &str, notification: &Notification) {
    match notification {
        Notification::Log { text } => tracing::info!("{}: device: {}", port, text),
        Notification::I2cInterrupt { data } => {
            tracing::info!("{}: I2C interrupt: {}", port, hex::encode(data))
        }
        Notification::IoChanged { mask } => {
            tracing::debug!("{}: IO changed: 0x{:08X}", port, mask)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_handler() {
        let mut seen = Vec::new();
        {
            let mut handler = |n: Notification| seen.push(n);
            handler.on_notification(Notification::IoChanged { mask: 3 });
        }
        assert_eq!(seen, vec![Notification::IoChanged { mask: 3 }]);
    }

    #[test]
    fn test_channel_handler() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut handler = ChannelHandler(tx);
        handler.on_notification(Notification::Log {
            text: "boot".to_string(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Log {
                text: "boot".to_string()
            }
        );
        drop(rx);
        handler.on_notification(Notification::IoChanged { mask: 0 });
    }
}
