pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod listing;
pub mod reconcile;
pub mod runtime;
pub mod service;
pub mod store;
pub mod triple;

pub use error::{KeyValueError, Result};
pub use triple::{OwnerId, Triple};
