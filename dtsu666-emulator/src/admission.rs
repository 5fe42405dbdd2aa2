use tokio_modbus::slave::SlaveId;
use tokio_modbus::{ExceptionCode, FunctionCode, Request};

use crate::codec::{Address, Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Register range and target of an inbound request, as seen by an [`AdmissionPolicy`].
pub struct RequestMeta {
    pub slave: SlaveId,
    pub address: Option<Address>,
    pub count: Option<Quantity>,
}

impl RequestMeta {
    pub fn new(slave: SlaveId, request: &Request<'_>) -> Self {
        let (address, count) = match request {
            Request::ReadCoils(addr, cnt)
            | Request::ReadDiscreteInputs(addr, cnt)
            | Request::ReadInputRegisters(addr, cnt)
            | Request::ReadHoldingRegisters(addr, cnt) => (Some(*addr), Some(*cnt)),
            Request::WriteSingleCoil(addr, _) | Request::WriteSingleRegister(addr, _) => {
                (Some(*addr), Some(1))
            }
            Request::WriteMultipleCoils(addr, coils) => {
                (Some(*addr), Quantity::try_from(coils.len()).ok())
            }
            Request::WriteMultipleRegisters(addr, words) => {
                (Some(*addr), Quantity::try_from(words.len()).ok())
            }
            _ => (None, None),
        };
        Self {
            slave,
            address,
            count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Reject(ExceptionCode),
}

/// Decides whether an inbound request is serviced, before the register image is touched.
pub trait AdmissionPolicy: Send + Sync {
    fn decide(&self, function: FunctionCode, request: &RequestMeta) -> Admission;
}

impl<F> AdmissionPolicy for F
where
    F: Fn(FunctionCode, &RequestMeta) -> Admission + Send + Sync,
{
    fn decide(&self, function: FunctionCode, request: &RequestMeta) -> Admission {
        self(function, request)
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Serve holding register reads only. The image is written through `Meter::set_register`, never by the bus.
pub struct ReadHoldingOnly;

impl AdmissionPolicy for ReadHoldingOnly {
    fn decide(&self, function: FunctionCode, request: &RequestMeta) -> Admission {
        if function == FunctionCode::ReadHoldingRegisters {
            tracing::info!(
                "reading {} registers at 0x{:04x} (slave id {})",
                request.count.unwrap_or_default(),
                request.address.unwrap_or_default(),
                request.slave
            );
            Admission::Accept
        } else {
            tracing::warn!(
                "function 0x{:02x} not supported (slave id {})",
                function.value(),
                request.slave
            );
            Admission::Reject(ExceptionCode::IllegalFunction)
        }
    }
}
