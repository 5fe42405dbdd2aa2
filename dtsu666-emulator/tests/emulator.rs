use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_modbus::slave::SlaveId;
use tokio_modbus::{ExceptionCode, Request, Response};

use dtsu666_emulator::admission::ReadHoldingOnly;
use dtsu666_emulator::catalog::Catalog;
use dtsu666_emulator::codec::{Address, Quantity, Word};
use dtsu666_emulator::planner::{plan_section, LIVE_SECTION};
use dtsu666_emulator::server::MeterService;
use dtsu666_emulator::telemetry::{apply_payload, Binding};
use dtsu666_emulator::transport::Transport;
use dtsu666_emulator::{Error, Meter, Result};

/// Master side wired straight to the services of emulated meters.
struct Loopback {
    service: MeterService,
    requests: usize,
}

impl Loopback {
    fn new(service: MeterService) -> Self {
        Self {
            service,
            requests: 0,
        }
    }
}

#[async_trait]
impl Transport for Loopback {
    async fn read_holding_registers(
        &mut self,
        remote: SlaveId,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>> {
        self.requests += 1;
        match self
            .service
            .handle(remote, &Request::ReadHoldingRegisters(addr, cnt))
        {
            Ok(Some(Response::ReadHoldingRegisters(words))) => Ok(words),
            Ok(_) => Err(Error::Timeout),
            Err(exception) => Err(Error::Exception(exception)),
        }
    }
}

/// Fails every request starting at one of `failing` addresses.
struct Flaky {
    inner: Loopback,
    failing: Vec<Address>,
}

#[async_trait]
impl Transport for Flaky {
    async fn read_holding_registers(
        &mut self,
        remote: SlaveId,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>> {
        if self.failing.contains(&addr) {
            return Err(Error::Exception(ExceptionCode::ServerDeviceBusy));
        }
        self.inner.read_holding_registers(remote, addr, cnt).await
    }
}

fn slave(id: SlaveId) -> (Meter, MeterService) {
    let meter = Meter::new(Catalog::dtsu666(), id);
    let service = meter.service(Arc::new(ReadHoldingOnly)).unwrap();
    (meter, service)
}

fn pv_payload() -> serde_json::Value {
    json!({
        "GridFrequency": 50.0,
        "L1ThreePhaseGridVoltage": 230.5,
        "L2ThreePhaseGridVoltage": 231.0,
        "L3ThreePhaseGridVoltage": 229.5,
        "L1ThreePhaseGridOutputCurrent": 2.5,
        "OutputPower": 1725.5,
        "Status": "running",
    })
}

#[tokio::test]
async fn test_master_refreshes_image_from_emulated_meter() {
    let (remote, service) = slave(4);
    apply_payload(&remote, &pv_payload(), &Binding::pv_defaults());
    remote.set_register(0x0007, 40.0);

    let master = Meter::new(Catalog::dtsu666(), 0);
    let mut transport = Loopback::new(service);
    let read = master.read_meter_data(&mut transport, 4, true).await;

    assert_eq!(read, 11 + 44);
    assert_eq!(transport.requests, 10);
    for descriptor in Catalog::dtsu666().iter() {
        if descriptor.address < 0x1000 || descriptor.address >= 0x2000 {
            assert_eq!(
                master.value(descriptor.address),
                remote.value(descriptor.address),
                "register 0x{:04x}",
                descriptor.address
            );
        }
    }
    assert_eq!(master.value(0x2044), Some(5000.0));
    assert_eq!(master.value(0x2012), Some(17255.0));
    assert_eq!(master.value(0x0007), Some(40.0));
}

#[tokio::test]
async fn test_failed_blocks_are_not_counted() {
    let (remote, service) = slave(1);
    remote.set_register(0x2000, 400.0);
    remote.set_register(0x2044, 5001.0);

    let master = Meter::new(Catalog::dtsu666(), 0);
    let mut transport = Flaky {
        inner: Loopback::new(service),
        failing: vec![0x2000, 0x202A],
    };
    let read = master.read_meter_data(&mut transport, 1, false).await;

    assert_eq!(read, 16 + 2 + 2);
    assert_eq!(master.value(0x2000), Some(0.0));
    assert_eq!(master.value(0x2044), Some(5001.0));
    assert!(!master.is_busy());
}

#[tokio::test]
async fn test_unknown_remote_reads_nothing() {
    let (_remote, service) = slave(1);
    let master = Meter::new(Catalog::dtsu666(), 0);
    let mut transport = Loopback::new(service);

    let read = master.read_meter_data(&mut transport, 9, false).await;
    assert_eq!(read, 0);
    assert_eq!(transport.requests, plan_section(&Catalog::dtsu666(), LIVE_SECTION).len());
}

#[test]
fn test_fan_out_serves_identical_images() {
    let (primary, primary_service) = slave(1);
    let (mirror, mirror_service) = slave(2);
    apply_payload(&primary, &pv_payload(), &Binding::pv_defaults());
    primary.copy_to(&mirror);

    let service = primary_service.with_meter(&mirror_service);
    let read = |id| service.handle(id, &Request::ReadHoldingRegisters(0x2000, 16));
    assert_eq!(read(1), read(2));
    assert!(matches!(read(1), Ok(Some(Response::ReadHoldingRegisters(words))) if words.len() == 16));
    assert_eq!(mirror.value(0x2006), Some(2305.0));
    assert_eq!(
        service.handle(2, &Request::WriteSingleRegister(0x2006, 0)),
        Err(ExceptionCode::IllegalFunction)
    );
}
