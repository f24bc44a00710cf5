//! Client-side media pipeline for the quiz game: chunked, integrity-checked
//! file transfer and clock synchronization for shared playback.

pub mod buffer;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod progress;
pub mod protocol;
pub mod socket;
pub mod transfer;
pub mod transport;

pub use error::{Result, TransferError};
