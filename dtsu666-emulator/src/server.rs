use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future;
use tokio_modbus::slave::SlaveId;
use tokio_modbus::{server, ExceptionCode, Request, Response, SlaveRequest};

use crate::admission::{Admission, AdmissionPolicy, RequestMeta};
use crate::meter::SharedRegisters;

/// tokio-modbus [`Service`](tokio_modbus::server::Service) answering for one or more slave ids.
///
/// Every id is backed by the register image of a slave meter. Requests addressed to any other id
/// get no response, the bus belongs to other devices.
#[derive(Clone)]
pub struct MeterService {
    images: BTreeMap<SlaveId, SharedRegisters>,
    policy: Arc<dyn AdmissionPolicy>,
}

impl std::fmt::Debug for MeterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterService")
            .field("slaves", &self.slaves())
            .finish_non_exhaustive()
    }
}

impl MeterService {
    pub(crate) fn new(
        slave: SlaveId,
        registers: SharedRegisters,
        policy: Arc<dyn AdmissionPolicy>,
    ) -> Self {
        Self {
            images: BTreeMap::from([(slave, registers)]),
            policy,
        }
    }

    /// Answer for another meter on the same line as well. The admission policy is shared.
    pub fn with_meter(mut self, other: &MeterService) -> Self {
        self.images.extend(
            other
                .images
                .iter()
                .map(|(slave, image)| (*slave, image.clone())),
        );
        self
    }

    pub fn slaves(&self) -> Vec<SlaveId> {
        self.images.keys().copied().collect()
    }

    /// Service a single request. `Ok(None)` means the request is not ours to answer.
    pub fn handle(
        &self,
        slave: SlaveId,
        request: &Request<'_>,
    ) -> Result<Option<Response>, ExceptionCode> {
        let Some(image) = self.images.get(&slave) else {
            tracing::trace!("ignoring request for slave id {slave}");
            return Ok(None);
        };

        let meta = RequestMeta::new(slave, request);
        let admission = self.policy.decide(request.function_code(), &meta);
        if let Admission::Reject(exception) = admission {
            return Err(exception);
        }

        match request {
            Request::ReadHoldingRegisters(addr, cnt) => {
                let registers = image
                    .lock()
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?;
                registers
                    .read(*addr, *cnt)
                    .map(|words| Some(Response::ReadHoldingRegisters(words)))
            }
            _ => {
                tracing::warn!("admitted request cannot be served: {request:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

impl server::Service for MeterService {
    type Request = SlaveRequest<'static>;
    type Response = Option<Response>;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(self.handle(req.slave, &req.request))
    }
}

/// Serve RTU requests on `serial_stream` until it fails.
#[cfg(feature = "serial")]
pub async fn serve_rtu(
    serial_stream: tokio_serial::SerialStream,
    service: MeterService,
) -> std::io::Result<()> {
    tracing::info!("serving slave ids {:?}", service.slaves());
    let server = server::rtu::Server::new(serial_stream);
    server.serve_forever(service).await
}

/// Spawn [`serve_rtu`] on a serial line, logging the error it ends with.
#[cfg(feature = "serial")]
pub fn spawn_rtu_server(
    path: &str,
    baud_rate: u32,
    service: MeterService,
) -> crate::error::Result<tokio::task::JoinHandle<()>> {
    let builder = tokio_serial::new(path, baud_rate);
    let serial_stream = tokio_serial::SerialStream::open(&builder)
        .map_err(|err| crate::error::Error::Io(std::io::Error::other(err)))?;

    Ok(tokio::spawn(async move {
        if let Err(err) = serve_rtu(serial_stream, service).await {
            tracing::error!("RTU server stopped: {err}");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::ReadHoldingOnly;
    use crate::catalog::Catalog;
    use crate::codec::decode_f32;
    use crate::meter::Meter;

    fn service(slave: SlaveId) -> (Meter, MeterService) {
        let meter = Meter::new(Catalog::dtsu666(), slave);
        let service = meter.service(Arc::new(ReadHoldingOnly)).unwrap();
        (meter, service)
    }

    #[test]
    fn test_serves_holding_registers() {
        let (meter, service) = service(1);
        meter.set_register(0x2044, 50.05);

        let response = service
            .handle(1, &Request::ReadHoldingRegisters(0x2044, 2))
            .unwrap();
        match response {
            Some(Response::ReadHoldingRegisters(words)) => {
                assert_eq!(decode_f32(words[0], words[1]), 50.05)
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_rejects_writes_and_unknown_addresses() {
        let (meter, service) = service(1);
        assert_eq!(
            service.handle(1, &Request::WriteSingleRegister(0x0002, 1)),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(meter.raw(0x0002), Some(0));
        assert_eq!(
            service.handle(1, &Request::ReadHoldingRegisters(0x0004, 1)),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn test_other_slave_ids_get_no_response() {
        let (_meter, service) = service(1);
        assert_eq!(
            service.handle(2, &Request::ReadHoldingRegisters(0x2044, 2)),
            Ok(None)
        );
    }

    #[test]
    fn test_with_meter_routes_by_slave_id() {
        let (first, first_service) = service(1);
        let (second, second_service) = service(2);
        first.set_register(0x0000, 1.0);
        second.set_register(0x0000, 2.0);

        let service = first_service.with_meter(&second_service);
        assert_eq!(service.slaves(), vec![1, 2]);
        for (slave, expected) in [(1, 1), (2, 2)] {
            assert_eq!(
                service.handle(slave, &Request::ReadHoldingRegisters(0x0000, 1)),
                Ok(Some(Response::ReadHoldingRegisters(vec![expected])))
            );
        }
    }
}
