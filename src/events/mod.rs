//! Change notifications for prompt mutations

pub mod bus;

pub use bus::{ChangeEvent, ChangeEventBus, ChangeObserver, LoggingObserver, SubscriptionId};
