use dynacheck::CheckError;
use thiserror::Error;

/// Errors of the command line runner
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Loading configuration failed : {0}")]
    Config(#[from] Box<figment::Error>),
    #[error(transparent)]
    Check(#[from] CheckError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("Writing results failed : {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} check definitions were rejected")]
    Rejected(usize),
}

impl From<figment::Error> for RunnerError {
    fn from(err: figment::Error) -> Self {
        RunnerError::Config(Box::new(err))
    }
}
