use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::Catalog;
use crate::codec::Address;
use crate::error::{Error, Result};
use crate::meter::Meter;

/// Address of the combined active power, logged on every update.
const OUTPUT_POWER: Address = 0x2012;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Route a named telemetry field, scaled by `multiplier`, into the register at `address`.
pub struct Binding {
    pub key: String,
    pub multiplier: i32,
    pub address: Address,
}

impl Binding {
    pub fn new(key: impl Into<String>, multiplier: i32, address: Address) -> Self {
        Self {
            key: key.into(),
            multiplier,
            address,
        }
    }

    /// Fields published by a three-phase PV inverter, mapped onto the DTSU666 live section.
    pub fn pv_defaults() -> Vec<Binding> {
        vec![
            Binding::new("GridFrequency", 100, 0x2044),
            Binding::new("L1ThreePhaseGridVoltage", 10, 0x2006),
            Binding::new("L2ThreePhaseGridVoltage", 10, 0x2008),
            Binding::new("L3ThreePhaseGridVoltage", 10, 0x200A),
            Binding::new("L1ThreePhaseGridOutputCurrent", 1000, 0x200C),
            Binding::new("L2ThreePhaseGridOutputCurrent", 1000, 0x200E),
            Binding::new("L3ThreePhaseGridOutputCurrent", 1000, 0x2010),
            Binding::new("OutputPower", 10, OUTPUT_POWER),
            Binding::new("L1ThreePhaseGridOutputPower", 10, 0x2014),
            Binding::new("L2ThreePhaseGridOutputPower", 10, 0x2016),
            Binding::new("L3ThreePhaseGridOutputPower", 10, 0x2018),
        ]
    }
}

/// Check that every binding targets a register of `catalog`.
pub fn validate_bindings(catalog: &Catalog, bindings: &[Binding]) -> Result<()> {
    match bindings.iter().find(|b| catalog.find(b.address).is_none()) {
        Some(binding) => Err(Error::Config(format!(
            "binding `{}` targets unknown register 0x{:04x}",
            binding.key, binding.address
        ))),
        None => Ok(()),
    }
}

pub fn parse_payload(payload: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(payload)?)
}

fn field_value(value: &Value) -> Option<f32> {
    match value {
        Value::Number(number) => number.as_f64().map(|v| v as f32),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Write every bound field of `payload` into `meter`. Returns the number of registers written.
///
/// Payloads that are not objects with at least two fields are ignored. Missing or non-numeric
/// fields are skipped without affecting the others.
pub fn apply_payload(meter: &Meter, payload: &Value, bindings: &[Binding]) -> usize {
    let Some(fields) = payload.as_object().filter(|fields| fields.len() > 1) else {
        tracing::debug!("ignoring telemetry message without data fields");
        return 0;
    };

    let mut applied = 0;
    for binding in bindings {
        let Some(value) = fields.get(&binding.key).and_then(field_value) else {
            tracing::debug!("no numeric `{}` in telemetry message", binding.key);
            continue;
        };
        let value = value * binding.multiplier as f32;
        if binding.address == OUTPUT_POWER {
            tracing::info!("{} = {value:.1}", binding.key);
        }
        meter.set_register(binding.address, value);
        applied += 1;
    }
    applied
}
