pub mod dispatch;
pub mod encoding;
pub mod push;
pub mod vapid;
