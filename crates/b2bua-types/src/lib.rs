pub mod call_state;
pub mod error;
pub mod ids;
pub mod mono_time;
pub mod route;

pub use call_state::CallState;
pub use error::{CallError, DomainError, ErrorKind};
pub use ids::{BandId, SignalSlotId, TimerId};
pub use mono_time::MonoTime;
pub use route::Route;
