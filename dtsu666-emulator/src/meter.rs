use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_modbus::slave::SlaveId;

use crate::catalog::{Catalog, RegisterDescriptor, RegisterKind};
use crate::codec::{Address, Quantity, Word};
use crate::planner::{plan_section, Section, CONFIG_SECTION, ENERGY_SECTION, LIVE_SECTION};
use crate::registers::Registers;
use crate::transport::Transport;
#[cfg(feature = "server")]
use crate::{
    admission::AdmissionPolicy,
    error::{Error, Result},
    server::MeterService,
};

/// Register image shared between a [`Meter`] and the services answering for it.
pub type SharedRegisters = Arc<Mutex<Registers>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Bus role of a meter, fixed at construction.
pub enum Role {
    /// Bus client pulling data from a real meter.
    Master,
    /// Emulated meter answering as device `id`.
    Slave(SlaveId),
}

/// Emulated three-phase power meter.
///
/// Holds the live register image built from a [`Catalog`]. The image is refreshed either locally
/// with [`Meter::set_register`] or, in master role, by reading a real meter with
/// [`Meter::read_meter_data`].
#[derive(Debug)]
pub struct Meter {
    catalog: Arc<Catalog>,
    registers: SharedRegisters,
    role: Role,
    busy: AtomicBool,
}

impl Meter {
    /// Build the register image with catalog defaults. Slave id `0` makes a master.
    pub fn new(catalog: Arc<Catalog>, slave_id: SlaveId) -> Self {
        let registers = Registers::allocate(&catalog);
        let role = match slave_id {
            0 => {
                tracing::info!("meter is a master");
                Role::Master
            }
            id => {
                tracing::info!("meter is a slave with id {id}");
                Role::Slave(id)
            }
        };

        Self {
            catalog,
            registers: Arc::new(Mutex::new(registers)),
            role,
            busy: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn registers(&self) -> MutexGuard<'_, Registers> {
        self.registers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `value` in the catalog register at `address`.
    ///
    /// Word registers keep the truncated integer part. Addresses outside the catalog are ignored.
    pub fn set_register(&self, address: Address, value: f32) {
        match self.catalog.find(address) {
            Some(descriptor) => self.registers().store(descriptor, value),
            None => tracing::trace!("ignoring write to unknown register 0x{address:04x}"),
        }
    }

    /// Current value of the catalog register at `address`.
    pub fn value(&self, address: Address) -> Option<f32> {
        let descriptor = self.catalog.find(address)?;
        let words = self.registers().words(descriptor)?;
        descriptor.kind.decode(&words)
    }

    /// Raw word at `address`, including the low word of a float.
    pub fn raw(&self, address: Address) -> Option<Word> {
        self.registers().get(address)
    }

    /// Whether a master transaction is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Read `count` consecutive registers from device `remote` into the image.
    ///
    /// Returns the number of registers read, `0` on failure. Failures are not retried.
    pub async fn read_block<T>(
        &self,
        transport: &mut T,
        remote: SlaveId,
        start: Address,
        count: Quantity,
    ) -> usize
    where
        T: Transport + ?Sized,
    {
        tracing::debug!("pulling {count} registers from {remote} at 0x{start:04x}");
        let result = {
            let _busy = BusyGuard::set(&self.busy);
            transport.read_holding_registers(remote, start, count).await
        };

        let words = match result {
            Ok(words) => words,
            Err(err) => {
                tracing::warn!(
                    "reading {count} registers from {remote} at 0x{start:04x} failed: {err}"
                );
                return 0;
            }
        };
        if words.len() != count as usize {
            tracing::warn!(
                "expected {count} registers from {remote} at 0x{start:04x}, got {}",
                words.len()
            );
            return 0;
        }
        match self.registers().write(start, &words) {
            Ok(()) => words.len(),
            Err(exception) => {
                tracing::warn!("block at 0x{start:04x} does not fit the image: {exception:?}");
                0
            }
        }
    }

    /// Read every planned block of `section`, yielding to the scheduler between blocks.
    pub async fn read_section<T>(
        &self,
        transport: &mut T,
        remote: SlaveId,
        section: Section,
    ) -> usize
    where
        T: Transport + ?Sized,
    {
        let mut read = 0;
        for block in plan_section(&self.catalog, section) {
            read += self
                .read_block(transport, remote, block.start, block.count)
                .await;
            tokio::task::yield_now().await;
        }
        read
    }

    /// Refresh the image from the meter at `remote`. Returns the number of registers read.
    ///
    /// The configuration section is only read when `include_config` is set.
    pub async fn read_meter_data<T>(
        &self,
        transport: &mut T,
        remote: SlaveId,
        include_config: bool,
    ) -> usize
    where
        T: Transport + ?Sized,
    {
        let mut read = 0;
        if include_config {
            read += self.read_section(transport, remote, CONFIG_SECTION).await;
        }
        read += self.read_section(transport, remote, ENERGY_SECTION).await;
        read += self.read_section(transport, remote, LIVE_SECTION).await;
        read
    }

    /// Report `count` catalog registers starting at the first one at or above `start`.
    ///
    /// A float counts as one register.
    pub fn dump(&self, start: Address, count: usize) -> Dump {
        let registers = self.registers();
        let rows = self
            .catalog
            .iter()
            .skip(self.catalog.position_from(start))
            .take(count)
            .map(|descriptor| {
                let value = registers
                    .words(descriptor)
                    .and_then(|words| descriptor.kind.decode(&words))
                    .unwrap_or_default();
                (*descriptor, value)
            })
            .collect();
        Dump(rows)
    }

    /// Copy every catalog register into `other`, keeping float halves together per register.
    ///
    /// Both images are locked for the duration of the copy, in `self`, `other` order.
    /// `a.copy_to(&b)` and `b.copy_to(&a)` must not run concurrently on different threads, they
    /// would deadlock.
    pub fn copy_to(&self, other: &Meter) {
        if Arc::ptr_eq(&self.registers, &other.registers) {
            return;
        }
        let source = self.registers();
        let mut destination = other.registers();
        for descriptor in self.catalog.iter() {
            for offset in 0..descriptor.kind.word_size() {
                let address = descriptor.address + offset;
                if let Some(word) = source.get(address) {
                    destination.set(address, word);
                }
            }
        }
    }

    /// Modbus service answering for this meter. Only slave meters can serve.
    #[cfg(feature = "server")]
    pub fn service(&self, policy: Arc<dyn AdmissionPolicy>) -> Result<MeterService> {
        match self.role {
            Role::Slave(id) => Ok(MeterService::new(id, self.registers.clone(), policy)),
            Role::Master => Err(Error::NotSlave),
        }
    }
}

/// Raises the busy flag until dropped, so a cancelled read does not leave the meter busy.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Human readable listing of registers, one per line.
#[derive(Debug, Clone, PartialEq)]
pub struct Dump(Vec<(RegisterDescriptor, f32)>);

impl Dump {
    pub fn rows(&self) -> &[(RegisterDescriptor, f32)] {
        &self.0
    }
}

impl fmt::Display for Dump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (descriptor, value) in &self.0 {
            write!(
                f,
                "0x{:04x} ({:>6}\t{:>40}) = ",
                descriptor.address, descriptor.code, descriptor.name
            )?;
            match descriptor.kind {
                RegisterKind::Float => writeln!(f, "{value:.1}")?,
                RegisterKind::Word => writeln!(f, "{}", *value as Word)?,
            }
        }
        Ok(())
    }
}
