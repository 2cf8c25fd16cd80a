use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("failed to install handler for signal {signum}: {source}")]
    SignalInstall {
        signum: i32,
        #[source]
        source: std::io::Error,
    },
    #[error("thread bridge channel disconnected")]
    BridgeDisconnected,
    #[error("dispatcher already running on another thread")]
    AlreadyRunning,
}
