//! In-memory I2C transport used when running without hardware.

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Debug, Default)]
struct SimState {
    absent: HashSet<u8>,
    failing: HashSet<u8>,
    writes: Vec<(u8, Vec<u8>)>,
}

/// Simulated I2C bus.
///
/// Clones share the same state, so a test can keep one handle while the
/// arbiter owns another. Every device acknowledges unless marked absent.
#[derive(Debug, Clone, Default)]
pub struct SimulatedI2c {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedI2c {
    /// Creates a bus on which every address acknowledges.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes an address NACK every transaction.
    pub fn absent(&self, address: u8) {
        self.lock().absent.insert(address);
    }

    /// Makes every later write to an address fail.
    pub fn fail_writes(&self, address: u8) {
        self.lock().failing.insert(address);
    }

    /// Clears injected failures for an address.
    pub fn restore(&self, address: u8) {
        let mut state = self.lock();
        state.absent.remove(&address);
        state.failing.remove(&address);
    }

    /// Returns every successful write as `(address, bytes)`.
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.lock().writes.clone()
    }

    /// Returns the successful writes to one address.
    pub fn writes_to(&self, address: u8) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }
}

impl ErrorType for SimulatedI2c {
    type Error = ErrorKind;
}

impl I2c for SimulatedI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.lock();
        if state.absent.contains(&address) {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        for operation in operations {
            match operation {
                Operation::Write(bytes) => {
                    if state.failing.contains(&address) {
                        return Err(ErrorKind::Other);
                    }
                    trace!("Simulated write to 0x{:02X}: {:02X?}", address, bytes);
                    state.writes.push((address, bytes.to_vec()));
                }
                Operation::Read(buffer) => buffer.fill(0),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_writes() {
        let mut bus = SimulatedI2c::new();
        bus.write(0x47, &[0x30, 0xFF, 0x00]).unwrap();
        bus.write(0x48, &[0x31, 0x00, 0x00]).unwrap();

        assert_eq!(bus.writes().len(), 2);
        assert_eq!(bus.writes_to(0x47), vec![vec![0x30, 0xFF, 0x00]]);
    }

    #[test]
    fn test_injected_failures() {
        let mut bus = SimulatedI2c::new();
        bus.absent(0x10);
        bus.fail_writes(0x11);

        assert_eq!(
            bus.write(0x10, &[0]),
            Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
        );
        assert_eq!(bus.write(0x11, &[0]), Err(ErrorKind::Other));

        let mut buffer = [0xFFu8; 2];
        bus.read(0x11, &mut buffer).unwrap();
        assert_eq!(buffer, [0, 0]);

        bus.restore(0x11);
        bus.write(0x11, &[1]).unwrap();
        assert_eq!(bus.writes(), vec![(0x11, vec![1])]);
    }
}
