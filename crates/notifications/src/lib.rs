//! User notifications (in-app inbox).

pub mod notification;

pub use notification::{NewNotification, Notification, NotificationType};
