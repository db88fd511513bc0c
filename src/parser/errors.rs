use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid Spotify URL. Please provide a valid track, playlist, album, or artist URL.")]
    InvalidUrl,
}
