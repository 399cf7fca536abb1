//! Recording of one patrol round at a time.

mod controller;
mod error;
mod state;

pub use controller::{RecorderSnapshot, RoundRecorder, DEFAULT_AUTOSAVE_INTERVAL};
pub use error::RecorderError;
pub use state::{RecorderState, RecorderStatus, AUTOMATIC_DIRECTION};
