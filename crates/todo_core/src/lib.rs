pub mod error;
pub mod item;
pub mod notifications;
pub mod settings;
pub mod store;

pub use crate::item::{Priority, TodoId, TodoItem};
pub use crate::store::{PersistPolicy, TodoStore, TodoStoreBuilder};
