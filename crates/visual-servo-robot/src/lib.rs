//! Robot side of the visual servo: motion commands over a shared two-wire
//! bus, the grabber servo and the periodic control loop.
//!
//! The decision layer plugs in as a [`Behavior`]; [`ControlLoop`] owns the
//! hardware handles, calls the behavior once per cycle, polls the sensors
//! and posts the status to a monitoring thread without ever blocking on it.
//! Transient link failures ([`HardwareError`]) are absorbed per call or per
//! cycle and never end the loop; the loop only stops when the
//! [`HardwareSession`] disconnects.
//!
//! [`sim`] provides an in-process board for tests and dry runs.

mod bus;
mod config;
mod error;
mod protocol;
mod scheduler;
pub mod sim;

pub use bus::{Bus, HardwareSession, PwmOutput, SharedBus};
pub use config::{LoopConfig, RobotConfig};
pub use error::{HardwareError, RobotError};
pub use protocol::{
    grab_duty_cycle, Robot, RobotPosition, SensorFrame, GRAB_DUTY_PER_PERCENT, GRAB_OPEN_DUTY,
    OP_GET_SENSORS, OP_MOVE, OP_ROTATE, SENSOR_FRAME_LEN, SENSOR_READ_FAILED,
};
pub use scheduler::{
    monitor_channel, spawn_monitor, Behavior, ControlLoop, LoopReport, LoopState,
    StatusNotification,
};
