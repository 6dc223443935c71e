//! Flowstate Core - Types, the state channel primitive, and error handling

pub mod channel;
pub mod error;
pub mod types;

pub use channel::{StateChannel, Subscription};
pub use error::{Error, Result};
pub use types::*;
