pub mod config;
pub mod dead_letter;
pub mod domain_event;
pub mod error;
pub mod inbound;
pub mod io;
pub mod paths;
pub mod processor;
pub mod state;
pub mod types;

pub use error::{PlankError, Result};
