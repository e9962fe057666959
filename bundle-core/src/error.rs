use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    /// Lifecycle invariant violated, the operator owning the bundle should abort.
    #[error("Bundle Error - {0}")]
    Bundle(String),

    #[error("Collector Error - {0}")]
    Collector(String),

    #[error("Process Error - {0}")]
    Process(String),

    #[error("Emitter Error - {0}")]
    Emitter(String),
}
