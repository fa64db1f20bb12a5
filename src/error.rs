use thiserror::Error;

/// Errors shared by every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] binrw::Error),

    #[error(transparent)]
    Rsa(#[from] rsa::Error),

    #[error("stream ended before {0} bytes could be read")]
    TooSmall(usize),

    #[error("corrupt data: {0}")]
    Corrupt(&'static str),

    #[error("entry or section not found")]
    NotFound,

    #[error("expected a file, found a directory")]
    NotAFile,

    #[error("invalid signature type")]
    InvalidSignature,

    #[error("invalid certificate key type")]
    InvalidCertificate,

    #[error("no certificate in the chain matches issuer \"{0}\"")]
    CertificateNotFound(String),

    #[error("signature did not verify")]
    BadSignature,

    #[error("no common key with index {0}")]
    MissingKey(u8),

    #[error("cipher error: {0}")]
    Cipher(String),
}

pub type ContainerResult<T> = Result<T, ContainerError>;
