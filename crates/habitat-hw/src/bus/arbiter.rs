//! Per-bus exclusive ownership of I2C transports.

use crate::{Error, Result, MUX_CHANNELS};
use embedded_hal::i2c::{ErrorKind, I2c};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// A boxed blocking I2C transport.
///
/// Transports report failures as [`ErrorKind`] so that hardware and
/// simulated buses can share one arbiter.
pub type Transport = Box<dyn I2c<Error = ErrorKind> + Send>;

/// Serialization point for every physical I2C bus.
///
/// Each bus id owns one long-lived mutex. All devices sharing a bus,
/// across all peripherals, must go through [`BusArbiter::acquire`].
pub struct BusArbiter {
    buses: HashMap<u8, Mutex<Transport>>,
}

impl BusArbiter {
    /// Creates an arbiter with no buses attached.
    pub fn new() -> Self {
        Self {
            buses: HashMap::new(),
        }
    }

    /// Attaches a transport for a bus id, replacing any previous one.
    pub fn attach<T>(&mut self, bus: u8, transport: T)
    where
        T: I2c<Error = ErrorKind> + Send + 'static,
    {
        self.attach_transport(bus, Box::new(transport));
    }

    /// Attaches an already boxed transport for a bus id.
    pub fn attach_transport(&mut self, bus: u8, transport: Transport) {
        debug!("Attaching transport for I2C bus {}", bus);
        self.buses.insert(bus, Mutex::new(transport));
    }

    /// Returns true if a transport is attached for the bus.
    pub fn is_attached(&self, bus: u8) -> bool {
        self.buses.contains_key(&bus)
    }

    /// Lists attached bus ids in ascending order.
    pub fn bus_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.buses.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Takes exclusive ownership of a bus until the guard is dropped.
    pub fn acquire(&self, bus: u8) -> Result<BusGuard<'_>> {
        let lock = self.buses.get(&bus).ok_or(Error::BusNotAttached(bus))?;
        let transport = lock.lock().map_err(|_| Error::BusPoisoned(bus))?;
        trace!("Acquired I2C bus {}", bus);
        Ok(BusGuard { bus, transport })
    }
}

impl Default for BusArbiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one bus.
pub struct BusGuard<'a> {
    bus: u8,
    transport: MutexGuard<'a, Transport>,
}

impl BusGuard<'_> {
    /// Returns the bus id this guard holds.
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// Routes the bus to one downstream mux channel.
    pub fn select_channel(&mut self, mux_address: u8, channel: u8) -> Result<()> {
        if channel >= MUX_CHANNELS {
            return Err(Error::InvalidMuxChannel(channel));
        }
        trace!(
            "Selecting mux 0x{:02X} channel {} on bus {}",
            mux_address,
            channel,
            self.bus
        );
        self.write(mux_address, &[1 << channel])
    }

    /// Writes bytes to a device on this bus.
    pub fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        let bus = self.bus;
        self.transport
            .write(address, bytes)
            .map_err(|kind| Error::Bus { bus, address, kind })
    }

    /// Reads bytes from a device on this bus.
    pub fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        let bus = self.bus;
        self.transport
            .read(address, buffer)
            .map_err(|kind| Error::Bus { bus, address, kind })
    }
}
