//! Real-time frame release for Discord voice/Go-Live pacing streams,
//! including pause/resume and cross-stream A/V synchronization.

pub mod clock;
pub mod error;
pub mod stream;

pub use clock::PacingClock;
pub use error::{Error, Result};
pub use stream::{PacingState, PacingStream};
