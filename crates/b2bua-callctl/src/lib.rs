pub mod accounting;
pub mod call_controller;
pub mod call_map;
pub mod config;
pub mod error;
pub mod radius;
pub mod sdp;
pub mod translate;
pub mod ua;

pub use call_controller::{CallController, ControllerOptions, mangle_call_id};
pub use call_map::{CallMap, CallMapEvent};
pub use config::{Cli, Config};
pub use error::{CallControlViolation, CallMapError};
