use crate::job::TaskError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("spawn error: {0}")]
    Spawn(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("engine has been shut down")]
    ShutDown,

    #[error("scheduler has already run")]
    AlreadyRun,

    #[error("a task named {0:?} is already scheduled")]
    DuplicateTask(String),

    #[error("unit {index} failed: {source}")]
    UnitFailed {
        index: usize,
        #[source]
        source: TaskError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn spawn<S: Into<String>>(msg: S) -> Self {
        Error::Spawn(msg.into())
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    /// True for errors caused by calling an engine out of order or registering
    /// the same task name twice.
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            Error::ShutDown | Error::AlreadyRun | Error::DuplicateTask(_)
        )
    }
}
