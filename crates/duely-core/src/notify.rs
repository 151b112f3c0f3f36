use notify_rust::Notification;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::NotifyError;

pub const EXPIRING_TITLE: &str = "Item Expiring Soon";

pub fn expiring_body(name: &str) -> String {
    format!("{name} is about to expire")
}

pub trait Notifier {
    fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        (**self).notify(title, body)
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        (**self).notify(title, body)
    }
}

/// Desktop notifications through the platform notification service.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    appname: String,
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self {
            appname: "duely".to_string(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        Notification::new()
            .summary(title)
            .body(body)
            .appname(&self.appname)
            .show()
            .map(|_| ())
            .map_err(|err| NotifyError::Delivery(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNotifier;

impl Notifier for DisabledNotifier {
    fn notify(&self, title: &str, _body: &str) -> Result<(), NotifyError> {
        debug!(title, "notifications disabled; skipping");
        Ok(())
    }
}

/// Picks the notifier named by the `notify` setting.
pub fn from_config(cfg: &Config) -> Box<dyn Notifier> {
    if cfg.get_bool("notify").unwrap_or(true) {
        Box::new(DesktopNotifier::default())
    } else {
        Box::new(DisabledNotifier)
    }
}

/// Sends a notification and swallows any delivery failure.
pub fn fire_and_forget<N: Notifier + ?Sized>(notifier: &N, title: &str, body: &str) {
    if let Err(err) = notifier.notify(title, body) {
        warn!(error = %err, title, "notification not delivered");
    }
}
