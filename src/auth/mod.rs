//! Out-of-band authenticated requests
//!
//! Pairing and control calls to the streaming host go over HTTPS with a
//! client certificate. Nothing here shares state with the video pipeline.

mod mtls;

pub use mtls::{DEFAULT_CONTENT_TYPE, MtlsRequest};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0} cannot be empty")]
    EmptyArgument(&'static str),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid client key: {0}")]
    InvalidKey(String),
    #[error("invalid client identity: {0}")]
    Identity(#[source] native_tls::Error),
    #[error("tls: {0}")]
    Tls(String),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("http {status} {reason}")]
    HttpStatus {
        status: u16,
        reason: String,
        body: String,
    },
    #[error("malformed http response: {0}")]
    MalformedResponse(String),
    #[error("request task failed: {0}")]
    Task(String),
}
