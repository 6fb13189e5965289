//! In-process stand-in for the robot board: scripted sensor bytes,
//! injected transient faults and a record of every bus transaction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::bus::{Bus, HardwareSession, PwmOutput};
use crate::error::HardwareError;
use crate::protocol::{OP_GET_SENSORS, SENSOR_FRAME_LEN};

/// One completed bus transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimTransaction {
    pub address: u8,
    pub request: Vec<u8>,
    pub response_len: usize,
}

#[derive(Debug)]
struct SimBusState {
    sensor_frame: [u8; SENSOR_FRAME_LEN],
    acknowledge: bool,
    fail_every: Option<u64>,
    pending_faults: VecDeque<HardwareError>,
    attempts: u64,
    transactions: Vec<SimTransaction>,
    overlaps: usize,
    delay: Duration,
}

/// Simulated bus. Clones share state, so a test can keep a handle while
/// the robot owns another.
#[derive(Clone, Debug)]
pub struct SimBus {
    state: Arc<Mutex<SimBusState>>,
    in_flight: Arc<AtomicBool>,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimBusState {
                sensor_frame: [0; SENSOR_FRAME_LEN],
                acknowledge: true,
                fail_every: None,
                pending_faults: VecDeque::new(),
                attempts: 0,
                transactions: Vec::new(),
                overlaps: 0,
                delay: Duration::ZERO,
            })),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hold every transaction open for `delay`.
    pub fn with_transaction_delay(self, delay: Duration) -> Self {
        self.state.lock().delay = delay;
        self
    }

    /// Primary status byte returned by sensor reads.
    pub fn set_status(&self, status: u8) {
        self.state.lock().sensor_frame[0] = status;
    }

    pub fn set_sensor_frame(&self, frame: [u8; SENSOR_FRAME_LEN]) {
        self.state.lock().sensor_frame = frame;
    }

    /// When false, transactions complete unacknowledged and leave the
    /// response buffer untouched.
    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.state.lock().acknowledge = acknowledge;
    }

    /// Fail every `n`-th transaction attempt with a lost connection.
    pub fn fail_every(&self, n: u64) {
        self.state.lock().fail_every = (n > 0).then_some(n);
    }

    /// Fail the next attempt with `err`.
    pub fn fail_next(&self, err: HardwareError) {
        self.state.lock().pending_faults.push_back(err);
    }

    pub fn transactions(&self) -> Vec<SimTransaction> {
        self.state.lock().transactions.clone()
    }

    /// Transaction attempts, failed ones included.
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }

    /// Number of transactions that started while another was in flight.
    pub fn overlapping_transactions(&self) -> usize {
        self.state.lock().overlaps
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimBus {
    fn write_read(
        &mut self,
        address: u8,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<bool, HardwareError> {
        let overlapped = self.in_flight.swap(true, Ordering::SeqCst);
        let delay = self.state.lock().delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut st = self.state.lock();
        if overlapped {
            st.overlaps += 1;
        }
        st.attempts += 1;

        let fault = st.pending_faults.pop_front().or_else(|| {
            st.fail_every
                .filter(|n| st.attempts % n == 0)
                .map(|_| HardwareError::ConnectionLost)
        });
        let result = match fault {
            Some(err) => Err(err),
            None => {
                st.transactions.push(SimTransaction {
                    address,
                    request: request.to_vec(),
                    response_len: response.len(),
                });
                if st.acknowledge && request.first() == Some(&OP_GET_SENSORS) {
                    let n = response.len().min(SENSOR_FRAME_LEN);
                    response[..n].copy_from_slice(&st.sensor_frame[..n]);
                }
                Ok(st.acknowledge)
            }
        };
        drop(st);

        if !overlapped {
            self.in_flight.store(false, Ordering::SeqCst);
        }
        result
    }
}

/// Simulated PWM pin recording every duty cycle it accepted.
#[derive(Clone, Debug, Default)]
pub struct SimPwm {
    duties: Arc<Mutex<Vec<f32>>>,
    pending_faults: Arc<Mutex<VecDeque<HardwareError>>>,
}

impl SimPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next duty-cycle write with `err`.
    pub fn fail_next(&self, err: HardwareError) {
        self.pending_faults.lock().push_back(err);
    }

    pub fn duty_history(&self) -> Vec<f32> {
        self.duties.lock().clone()
    }

    pub fn last_duty(&self) -> Option<f32> {
        self.duties.lock().last().copied()
    }
}

impl PwmOutput for SimPwm {
    fn set_duty_cycle(&mut self, duty: f32) -> Result<(), HardwareError> {
        if let Some(err) = self.pending_faults.lock().pop_front() {
            return Err(err);
        }
        self.duties.lock().push(duty);
        Ok(())
    }
}

/// Simulated board connection that stays up for a fixed number of loop
/// cycles (or forever).
#[derive(Clone, Debug)]
pub struct SimSession {
    bus: SimBus,
    pwm: SimPwm,
    remaining_cycles: Option<u64>,
    opened_bus_rate: Option<u32>,
    opened_pwm: Option<(u8, u32)>,
}

impl SimSession {
    pub fn new(bus: SimBus, pwm: SimPwm) -> Self {
        Self {
            bus,
            pwm,
            remaining_cycles: None,
            opened_bus_rate: None,
            opened_pwm: None,
        }
    }

    /// Disconnect after `cycles` loop iterations.
    pub fn with_cycles(mut self, cycles: u64) -> Self {
        self.remaining_cycles = Some(cycles);
        self
    }

    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    pub fn pwm(&self) -> &SimPwm {
        &self.pwm
    }

    pub fn opened_bus_rate(&self) -> Option<u32> {
        self.opened_bus_rate
    }

    pub fn opened_pwm(&self) -> Option<(u8, u32)> {
        self.opened_pwm
    }
}

impl HardwareSession for SimSession {
    fn open_bus(&mut self, rate_hz: u32) -> Result<Box<dyn Bus>, HardwareError> {
        self.opened_bus_rate = Some(rate_hz);
        Ok(Box::new(self.bus.clone()))
    }

    fn open_pwm(&mut self, pin: u8, frequency_hz: u32) -> Result<Box<dyn PwmOutput>, HardwareError> {
        self.opened_pwm = Some((pin, frequency_hz));
        Ok(Box::new(self.pwm.clone()))
    }

    fn is_connected(&mut self) -> bool {
        match self.remaining_cycles.as_mut() {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}
