//! Error types shared by the `tokio-modbus` based client.
use crate::protocol as proto;

/// Represents all possible errors that can occur while talking to a simulator.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// Wraps `tokio_modbus::ExceptionCode`.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),
}

/// The result type for tokio operations.
pub type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

/// Flattens the nested `tokio_modbus` result into ours.
pub(crate) fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> Result<T> {
    match result {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err.into()), // Modbus exception
        Err(err) => Err(err.into()),     // IO error
    }
}

/// Extracts the single register of a one-register read.
pub(crate) fn single_register(words: &[u16]) -> std::result::Result<u16, proto::Error> {
    match words {
        [word] => Ok(*word),
        _ => Err(proto::Error::UnexpectedRegisterCount(words.len())),
    }
}
