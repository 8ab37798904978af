//! keel-notify — tells an external channel how a release ended.
//!
//! Delivery is best-effort: [`Notifier::send`] reports failures through
//! its `Result`, and [`deliver_best_effort`] is the one place that turns
//! such a failure into a log line instead of an abort.

pub mod error;
pub mod notifier;

pub use error::{NotifyError, NotifyResult};
pub use notifier::{
    Channel, Level, LogNotifier, Notification, Notifier, WebhookNotifier, deliver_best_effort,
};
