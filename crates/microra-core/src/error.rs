use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("interface {interface:?}: {reason}")]
    Interface { interface: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
