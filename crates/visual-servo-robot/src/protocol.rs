//! Motion command protocol spoken with the robot's motion controller.
//!
//! Every command is one synchronous bus transaction against the fixed
//! peripheral address:
//!
//! | command     | request          | response |
//! |-------------|------------------|----------|
//! | get sensors | `[0x10]`         | 8 bytes, byte 0 is the status |
//! | move        | `[0x1C, cm]`     | 1 byte, ignored |
//! | rotate      | `[0x1D, degree]` | none |
//!
//! Payloads are single signed bytes. The grabber is not on the bus; it is a
//! servo driven directly by a PWM pin.
//!
//! Lost connections and interrupted waits are logged and absorbed here:
//! sensor reads return [`SENSOR_READ_FAILED`], motion commands return
//! without effect. Exactly one attempt is made per call.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use visual_servo_core::TraceLog;

use crate::bus::{PwmOutput, SharedBus};
use crate::error::{HardwareError, RobotError};

#[cfg(feature = "tracing")]
use tracing::instrument;

pub const OP_GET_SENSORS: u8 = 0x10;
pub const OP_MOVE: u8 = 0x1C;
pub const OP_ROTATE: u8 = 0x1D;

pub const SENSOR_FRAME_LEN: usize = 8;
const MOVE_RESPONSE_LEN: usize = 1;

/// Status reported when a sensor read failed.
pub const SENSOR_READ_FAILED: i16 = -1;

/// Grabber duty cycle with the jaws fully open.
pub const GRAB_OPEN_DUTY: f32 = 0.0528;
/// Duty cycle added per percent of closing.
pub const GRAB_DUTY_PER_PERCENT: f32 = 0.0005;

/// Duty cycle that closes the grabber to `percent`.
pub fn grab_duty_cycle(percent: u32) -> f32 {
    GRAB_OPEN_DUTY + percent as f32 * GRAB_DUTY_PER_PERCENT
}

/// Relative motion command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RobotPosition {
    pub distance_cm: i32,
    pub angle_deg: i32,
}

impl fmt::Display for RobotPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RobotPosition({} cm, {} deg)", self.distance_cm, self.angle_deg)
    }
}

/// Raw response of a sensor read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorFrame {
    pub bytes: [u8; SENSOR_FRAME_LEN],
    /// Whether the peripheral acknowledged the read. An unacknowledged
    /// frame holds whatever the buffer contained, zeros here.
    pub acknowledged: bool,
}

impl SensorFrame {
    pub fn status(&self) -> u8 {
        self.bytes[0]
    }
}

fn wire_byte(value: i32, what: &str) -> u8 {
    if i8::try_from(value).is_err() {
        log::warn!("{what} {value} does not fit one signed byte, sending {}", value as i8);
    }
    value as i8 as u8
}

/// Hardware context handed to the behavior layer: the shared bus, the
/// grabber servo and the trace log.
pub struct Robot {
    bus: SharedBus,
    servo: Mutex<Box<dyn PwmOutput>>,
    address: u8,
    trace: Arc<TraceLog>,
}

impl Robot {
    pub fn new(bus: SharedBus, servo: Box<dyn PwmOutput>, address: u8, trace: Arc<TraceLog>) -> Self {
        Self {
            bus,
            servo: Mutex::new(servo),
            address,
            trace,
        }
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn trace(&self) -> &Arc<TraceLog> {
        &self.trace
    }

    /// One sensor transaction, errors passed through.
    pub fn read_sensor_frame(&self) -> Result<SensorFrame, HardwareError> {
        let mut bytes = [0u8; SENSOR_FRAME_LEN];
        let acknowledged = self.bus.transact(self.address, &[OP_GET_SENSORS], &mut bytes)?;
        if acknowledged {
            self.trace.write(format_args!("read sensor values: {}", bytes[0]));
        } else {
            self.trace.write("sensor read not acknowledged");
        }
        Ok(SensorFrame {
            bytes,
            acknowledged,
        })
    }

    /// Primary status byte (`0..=255`), or [`SENSOR_READ_FAILED`].
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn read_sensors(&self) -> i16 {
        match self.read_sensor_frame() {
            Ok(frame) => i16::from(frame.status()),
            Err(err) => {
                self.trace.write(format_args!("sensor read failed: {err}"));
                log::warn!("sensor read failed: {err}");
                SENSOR_READ_FAILED
            }
        }
    }

    /// Drive `cm` centimeters forward (negative: backward).
    ///
    /// Returns whether the controller acknowledged the command; transient
    /// errors are logged and reported as `false`.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn move_by(&self, cm: i32) -> bool {
        let offset = RobotPosition {
            distance_cm: cm,
            ..RobotPosition::default()
        };
        self.trace.write(format_args!("move {offset}"));
        let request = [OP_MOVE, wire_byte(offset.distance_cm, "distance")];
        let mut response = [0u8; MOVE_RESPONSE_LEN];
        self.command(&request, &mut response, "move")
    }

    /// Turn by `degree` degrees.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn rotate_by(&self, degree: i32) -> bool {
        let offset = RobotPosition {
            angle_deg: degree,
            ..RobotPosition::default()
        };
        self.trace.write(format_args!("rotate {offset}"));
        let request = [OP_ROTATE, wire_byte(offset.angle_deg, "angle")];
        self.command(&request, &mut [], "rotate")
    }

    fn command(&self, request: &[u8], response: &mut [u8], name: &str) -> bool {
        match self.bus.transact(self.address, request, response) {
            Ok(ack) => {
                log::debug!("{name} {request:02x?}: ack={ack}");
                self.trace.write(format_args!("{name} finished, ack={ack}"));
                ack
            }
            Err(err) => {
                log::warn!("{name} failed: {err}");
                self.trace.write(format_args!("{name} failed: {err}"));
                false
            }
        }
    }

    /// Close the grabber to `percent` (0 open, 100 closed).
    pub fn grab(&self, percent: u32) -> Result<(), RobotError> {
        if percent > 100 {
            return Err(RobotError::InvalidGrabPercent(percent));
        }
        self.trace.write(format_args!("grab {percent}%"));
        if let Err(err) = self.set_servo_duty(grab_duty_cycle(percent)) {
            log::warn!("grab failed: {err}");
            self.trace.write(format_args!("grab failed: {err}"));
        }
        Ok(())
    }

    pub(crate) fn set_servo_duty(&self, duty: f32) -> Result<(), HardwareError> {
        self.servo.lock().set_duty_cycle(duty)
    }

    /// No hardware state to reset; logged for the trace.
    pub fn reset(&self) {
        self.trace.write("reset (nothing to do)");
    }
}

impl fmt::Debug for Robot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Robot")
            .field("address", &format_args!("{:#04x}", self.address))
            .field("bus", &self.bus)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimPwm};
    use approx::assert_relative_eq;

    fn robot() -> (Robot, SimBus, SimPwm) {
        let bus = SimBus::new();
        let pwm = SimPwm::new();
        let robot = Robot::new(
            SharedBus::new(Box::new(bus.clone())),
            Box::new(pwm.clone()),
            0x69,
            Arc::new(TraceLog::disabled()),
        );
        (robot, bus, pwm)
    }

    #[test]
    fn grab_duty_cycle_spans_open_to_closed() {
        assert_relative_eq!(grab_duty_cycle(0), 0.0528, epsilon = 1e-6);
        assert_relative_eq!(grab_duty_cycle(100), 0.1028, epsilon = 1e-6);

        let (robot, _, pwm) = robot();
        robot.grab(0).expect("valid");
        robot.grab(100).expect("valid");
        let duties = pwm.duty_history();
        assert_relative_eq!(duties[0], 0.0528, epsilon = 1e-6);
        assert_relative_eq!(duties[1], 0.1028, epsilon = 1e-6);
    }

    #[test]
    fn grab_rejects_over_100_percent() {
        let (robot, _, pwm) = robot();
        assert_eq!(robot.grab(101), Err(RobotError::InvalidGrabPercent(101)));
        assert!(pwm.duty_history().is_empty());
    }

    #[test]
    fn sensor_read_returns_status_byte() {
        let (robot, bus, _) = robot();
        bus.set_status(200);
        assert_eq!(robot.read_sensors(), 200);

        let tx = bus.transactions();
        assert_eq!(tx[0].address, 0x69);
        assert_eq!(tx[0].request, vec![OP_GET_SENSORS]);
        assert_eq!(tx[0].response_len, 8);
    }

    #[test]
    fn lost_connection_reads_as_sentinel() {
        let (robot, bus, _) = robot();
        bus.set_status(3);
        bus.fail_next(HardwareError::ConnectionLost);
        assert_eq!(robot.read_sensors(), SENSOR_READ_FAILED);
        bus.fail_next(HardwareError::Interrupted);
        assert_eq!(robot.read_sensors(), SENSOR_READ_FAILED);
        assert_eq!(robot.read_sensors(), 3);
        assert_eq!(bus.attempts(), 3);
    }

    #[test]
    fn unacknowledged_read_still_reports_first_byte() {
        let (robot, bus, _) = robot();
        bus.set_status(9);
        bus.set_acknowledge(false);
        let frame = robot.read_sensor_frame().expect("transaction");
        assert!(!frame.acknowledged);
        assert_eq!(robot.read_sensors(), 0);
    }

    #[test]
    fn motion_commands_encode_opcode_and_byte() {
        let (robot, bus, _) = robot();
        assert!(robot.move_by(-20));
        assert!(robot.rotate_by(90));

        let tx = bus.transactions();
        assert_eq!(tx[0].request, vec![OP_MOVE, (-20i8) as u8]);
        assert_eq!(tx[0].response_len, 1);
        assert_eq!(tx[1].request, vec![OP_ROTATE, 90]);
        assert_eq!(tx[1].response_len, 0);
    }

    #[test]
    fn out_of_range_motion_wraps_to_one_byte() {
        let (robot, bus, _) = robot();
        robot.move_by(200);
        robot.rotate_by(-129);
        let tx = bus.transactions();
        assert_eq!(tx[0].request[1], 200u8);
        assert_eq!(tx[1].request[1], 127u8);
    }

    #[test]
    fn failed_motion_is_absorbed() {
        let (robot, bus, _) = robot();
        bus.fail_next(HardwareError::ConnectionLost);
        assert!(!robot.move_by(10));
        assert!(robot.rotate_by(10));
        assert_eq!(bus.transactions().len(), 1);
        robot.reset();
    }

    #[test]
    fn commands_are_traced_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("robot.txt");
        let robot = Robot::new(
            SharedBus::new(Box::new(SimBus::new())),
            Box::new(SimPwm::new()),
            0x69,
            Arc::new(TraceLog::to_file(&path)),
        );
        robot.move_by(3);
        robot.reset();

        let text = std::fs::read_to_string(&path).expect("trace");
        assert!(text.contains("move RobotPosition(3 cm, 0 deg)"));
        assert!(text.contains("reset (nothing to do)"));
        assert!(text.lines().all(|l| l.contains(" by #ThreadId(")));
    }

    #[test]
    fn position_display() {
        let p = RobotPosition {
            distance_cm: 5,
            angle_deg: -3,
        };
        assert_eq!(p.to_string(), "RobotPosition(5 cm, -3 deg)");
    }
}
