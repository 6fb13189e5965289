use serde::{Deserialize, Serialize};

/// Wiring of the robot board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// 7-bit bus address of the motion controller.
    pub address: u8,
    pub bus_rate_hz: u32,
    pub servo_pin: u8,
    pub servo_frequency_hz: u32,
    /// Grabber duty cycle with the jaws open.
    pub neutral_duty: f32,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            address: 0x69,
            bus_rate_hz: 100_000,
            servo_pin: 10,
            servo_frequency_hz: 50,
            neutral_duty: crate::protocol::GRAB_OPEN_DUTY,
        }
    }
}

/// Control loop cadence and monitoring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Sleep before and after every loop body.
    pub cycle_sleep_ms: u64,
    /// Capacity of the monitoring channel; notifications beyond it are dropped.
    pub monitor_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            cycle_sleep_ms: 100,
            monitor_capacity: 16,
        }
    }
}
