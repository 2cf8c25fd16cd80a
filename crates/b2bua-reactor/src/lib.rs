mod dispatcher;
mod error;
mod pacer;
mod signal;
mod thread_bridge;
mod timer;

pub use dispatcher::{Dispatcher, StopHandle, handle_callback_error};
pub use error::ReactorError;
pub use pacer::{Notifier, PeriodicPacer, Wake};
pub use signal::{SignalBridge, SignalService, signums};
pub use thread_bridge::{ThreadBridge, ThreadBridgeHandle};
pub use timer::{TimerHeap, TimerService};
