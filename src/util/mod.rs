mod clock;
mod error;
mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use status::{Code, EngineResult, Status};
