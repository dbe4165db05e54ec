//! Well-known names and message texts shared across crates.

/// Channel every publisher and subscriber shares on the bus.
pub const NOTIFICATIONS_CHANNEL: &str = "notifications";

/// Text carried by the `welcome` message.
pub const WELCOME_TEXT: &str = "Connected to WebSocket server";

/// Text carried by the `shutdown_notice` message.
pub const SHUTDOWN_NOTICE_TEXT: &str = "Server is shutting down. Please disconnect.";

/// Text carried by the periodic system notification.
pub const PERIODIC_NOTIFICATION_TEXT: &str = "Test notification";

/// Default text for `/notify` when no message is supplied.
pub const DEFAULT_NOTIFY_TEXT: &str = "Manual notification";

/// WebSocket close code sent when the server goes away (RFC 6455 "going away").
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close reason used when rejecting or force-closing during shutdown.
pub const SHUTTING_DOWN_REASON: &str = "Server is shutting down";
