//! The `Notification` entity (spec §3, §4.6).

use crate::BagTag;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a [`Notification`].
pub type NotificationId = Uuid;

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    /// SMS text message.
    Sms,
    /// Email.
    Email,
    /// Mobile push notification.
    Push,
}

/// Notification lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Enqueued, not yet sent.
    Queued,
    /// Accepted by the `NotificationSink`.
    Sent,
    /// Rejected or undeliverable.
    Failed,
    /// Permanently abandoned after repeated failure.
    Dead,
}

/// A single outbound notification, deduplicated per
/// `(bag_tag, template_id, channel)` within a 10-minute window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification identity.
    pub notification_id: NotificationId,
    /// The bag this notification concerns.
    pub bag_tag: BagTag,
    /// Delivery channel.
    pub channel: NotificationChannel,
    /// Destination address/number/token, channel-specific.
    pub recipient: String,
    /// The message template to render.
    pub template_id: String,
    /// Lifecycle status.
    pub status: NotificationStatus,
}

impl Notification {
    /// Construct a freshly queued notification.
    pub fn new(
        bag_tag: BagTag,
        channel: NotificationChannel,
        recipient: impl Into<String>,
        template_id: impl Into<String>,
    ) -> Self {
        Self {
            notification_id: Uuid::new_v4(),
            bag_tag,
            channel,
            recipient: recipient.into(),
            template_id: template_id.into(),
            status: NotificationStatus::Queued,
        }
    }
}
