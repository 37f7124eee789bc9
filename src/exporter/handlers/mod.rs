mod health;
mod metrics;

pub use self::health::health;
pub use self::metrics::{CONTENT_TYPE, metrics};
