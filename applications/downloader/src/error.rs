use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Client(#[from] ilias_client::ClientError),
}

pub type Result<T> = std::result::Result<T, DownloaderError>;
