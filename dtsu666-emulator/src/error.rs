use thiserror::Error;
use tokio_modbus::ExceptionCode;

use crate::catalog::CatalogError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("modbus transport error: {0}")]
    Modbus(#[from] tokio_modbus::Error),
    #[error("modbus exception: {0:?}")]
    Exception(ExceptionCode),
    #[error("no response within the transaction timeout")]
    Timeout,
    #[error("expected {expected} registers in response, got {actual}")]
    ResponseLength { expected: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid register catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("malformed telemetry payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("meter has no slave id and cannot serve requests")]
    NotSlave,
    #[error("modbus server stopped")]
    ServerStopped,
}

pub type Result<T> = std::result::Result<T, Error>;
