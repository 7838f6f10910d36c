mod time_queue;

pub use time_queue::{TimeQueue, Timestamped};
