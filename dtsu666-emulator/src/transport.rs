use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::slave::{Slave, SlaveContext, SlaveId};

use crate::codec::{Address, Quantity, Word};
use crate::error::{Error, Result};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

#[async_trait]
/// Bus master side of a Modbus link.
///
/// One transaction is in flight at a time; the `&mut self` receiver enforces it.
pub trait Transport: Send {
    /// Read `cnt` holding registers of device `remote` starting at `addr`.
    async fn read_holding_registers(
        &mut self,
        remote: SlaveId,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>>;
}

/// [`Transport`] backed by a tokio-modbus client context, usually attached to a serial line.
pub struct RtuTransport {
    context: Context,
    response_timeout: Duration,
}

impl RtuTransport {
    pub fn new(context: Context, response_timeout: Duration) -> Self {
        Self {
            context,
            response_timeout,
        }
    }

    /// Attach to an RS-485 line. Driver enable (RE/DE) is left to the serial driver.
    #[cfg(feature = "serial")]
    pub fn open(path: &str, baud_rate: u32, response_timeout: Duration) -> Result<Self> {
        let builder = tokio_serial::new(path, baud_rate);
        let serial_stream = tokio_serial::SerialStream::open(&builder)
            .map_err(|err| Error::Io(std::io::Error::other(err)))?;
        let context = tokio_modbus::client::rtu::attach_slave(serial_stream, Slave(0));
        Ok(Self::new(context, response_timeout))
    }
}

#[async_trait]
impl Transport for RtuTransport {
    async fn read_holding_registers(
        &mut self,
        remote: SlaveId,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>> {
        self.context.set_slave(Slave(remote));
        let words = tokio::time::timeout(
            self.response_timeout,
            self.context.read_holding_registers(addr, cnt),
        )
        .await
        .map_err(|_| Error::Timeout)??
        .map_err(Error::Exception)?;

        if words.len() != cnt as usize {
            return Err(Error::ResponseLength {
                expected: cnt.into(),
                actual: words.len(),
            });
        }
        Ok(words)
    }
}
