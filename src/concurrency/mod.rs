pub mod lock;

pub use lock::{LockKey, LockManager, LockSet};
