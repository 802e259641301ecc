pub mod clock;
pub mod errors;
pub mod logging;
pub mod ocpp_frame;
pub mod shutdown;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use errors::{CoreError, CoreResult};
pub use ocpp_frame::{Frame, FrameError};
pub use shutdown::{listen_for_shutdown_signals, ShutdownSignal};
