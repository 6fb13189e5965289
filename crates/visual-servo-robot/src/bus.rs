//! Hardware seams: the two-wire bus, the PWM channel and the session that
//! hands them out.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::HardwareError;

/// A request/response bus (I2C-style, 7-bit addressing).
pub trait Bus: Send {
    /// Write `request` to `address`, then read `response.len()` bytes.
    ///
    /// `Ok(false)` means the transaction completed but the peripheral did
    /// not acknowledge it; `response` is left as the bus found it.
    fn write_read(
        &mut self,
        address: u8,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<bool, HardwareError>;
}

/// Single PWM output pin.
pub trait PwmOutput: Send {
    fn set_duty_cycle(&mut self, duty: f32) -> Result<(), HardwareError>;
}

/// A live connection to the robot board.
///
/// The control loop opens its handles from the session once and keeps
/// cycling while [`is_connected`](Self::is_connected) holds.
pub trait HardwareSession: Send {
    fn open_bus(&mut self, rate_hz: u32) -> Result<Box<dyn Bus>, HardwareError>;
    fn open_pwm(&mut self, pin: u8, frequency_hz: u32) -> Result<Box<dyn PwmOutput>, HardwareError>;
    fn is_connected(&mut self) -> bool;
}

/// Bus handle shared by sensing and actuation.
///
/// The bus cannot interleave two transactions; the lock is held for
/// exactly one [`transact`](Self::transact) call and released on every
/// exit path.
#[derive(Clone)]
pub struct SharedBus {
    inner: Arc<Mutex<Box<dyn Bus>>>,
}

impl SharedBus {
    pub fn new(bus: Box<dyn Bus>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bus)),
        }
    }

    pub fn transact(
        &self,
        address: u8,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<bool, HardwareError> {
        let mut bus = self.inner.lock();
        bus.write_read(address, request, response)
    }
}

impl std::fmt::Debug for SharedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBus")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;
    use std::thread;

    #[test]
    fn concurrent_transactions_never_overlap() {
        let sim = SimBus::new().with_transaction_delay(std::time::Duration::from_micros(200));
        let shared = SharedBus::new(Box::new(sim.clone()));

        let workers: Vec<_> = (0..4u8)
            .map(|i| {
                let bus = shared.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let mut resp = [0u8; 8];
                        bus.transact(0x69, &[0x10 + i], &mut resp).expect("sim bus");
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("worker");
        }

        assert_eq!(sim.transactions().len(), 100);
        assert_eq!(sim.overlapping_transactions(), 0);
    }

    #[test]
    fn lock_is_released_after_a_failed_transaction() {
        let sim = SimBus::new();
        sim.fail_next(HardwareError::ConnectionLost);
        let shared = SharedBus::new(Box::new(sim.clone()));

        let mut resp = [0u8; 1];
        assert_eq!(
            shared.transact(0x69, &[0x1C, 1], &mut resp),
            Err(HardwareError::ConnectionLost)
        );
        assert_eq!(shared.transact(0x69, &[0x1C, 1], &mut resp), Ok(true));
    }
}
