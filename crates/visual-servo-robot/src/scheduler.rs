//! Periodic control loop and its monitoring channel.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use visual_servo_core::TraceLog;

use crate::bus::{HardwareSession, SharedBus};
use crate::config::{LoopConfig, RobotConfig};
use crate::error::HardwareError;
use crate::protocol::{Robot, SENSOR_READ_FAILED};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Decision layer driven by the control loop.
///
/// Both hooks may fail with a transient [`HardwareError`]; the loop logs it
/// and carries on.
pub trait Behavior: Send {
    /// Called once, after the hardware handles are open.
    fn setup(&mut self, robot: &Robot) -> Result<(), HardwareError>;
    /// Called once per cycle, before the sensor poll.
    fn step(&mut self, robot: &Robot) -> Result<(), HardwareError>;
}

/// One-way status message for the monitoring consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusNotification {
    /// Sensor status byte, or [`SENSOR_READ_FAILED`].
    pub status: i16,
}

impl StatusNotification {
    pub fn is_failure(&self) -> bool {
        self.status == SENSOR_READ_FAILED
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Finished,
}

/// Counters of a finished (or running) loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopReport {
    /// Cycles that ran to the end.
    pub cycles: u64,
    /// Cycles abandoned because of a transient error.
    pub interrupted_cycles: u64,
    /// Cycles whose sensor read fell back to the sentinel.
    pub failed_reads: u64,
    /// Notifications dropped because the monitor was full or gone.
    pub dropped_notifications: u64,
}

/// Bounded channel for [`StatusNotification`]s.
pub fn monitor_channel(capacity: usize) -> (Sender<StatusNotification>, Receiver<StatusNotification>) {
    crossbeam_channel::bounded(capacity)
}

/// Run `handler` for every notification on a dedicated thread. The thread
/// ends once every sender is dropped.
pub fn spawn_monitor<F>(rx: Receiver<StatusNotification>, mut handler: F) -> io::Result<JoinHandle<()>>
where
    F: FnMut(StatusNotification) + Send + 'static,
{
    thread::Builder::new()
        .name("robot-monitor".into())
        .spawn(move || {
            for msg in rx.iter() {
                handler(msg);
            }
            log::debug!("monitor channel closed");
        })
}

/// Drives a [`Behavior`] against a hardware session.
///
/// `Idle -> Running -> Finished`: setup runs once when the session is
/// available, then cycles repeat while it stays connected. Each cycle
/// sleeps, steps the behavior, polls the sensors, notifies the monitor and
/// sleeps again. Transient hardware errors end the current cycle only.
pub struct ControlLoop<B> {
    behavior: B,
    robot_config: RobotConfig,
    config: LoopConfig,
    trace: Arc<TraceLog>,
    monitor: Option<Sender<StatusNotification>>,
    robot: Option<Robot>,
    state: LoopState,
    report: LoopReport,
}

impl<B: Behavior> ControlLoop<B> {
    pub fn new(behavior: B, robot_config: RobotConfig, config: LoopConfig, trace: Arc<TraceLog>) -> Self {
        trace.write("control loop created");
        Self {
            behavior,
            robot_config,
            config,
            trace,
            monitor: None,
            robot: None,
            state: LoopState::Idle,
            report: LoopReport::default(),
        }
    }

    /// Send a notification per cycle to `monitor`.
    pub fn with_monitor(mut self, monitor: Sender<StatusNotification>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn report(&self) -> LoopReport {
        self.report
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn robot(&self) -> Option<&Robot> {
        self.robot.as_ref()
    }

    /// Open the bus and the grabber servo, park the grabber at its neutral
    /// duty cycle and run the behavior's setup hook.
    ///
    /// Only a failure to open the handles is returned; a failed duty write
    /// or a failing behavior setup is logged.
    pub fn setup(&mut self, session: &mut dyn HardwareSession) -> Result<(), HardwareError> {
        self.trace.write("setup");
        let cfg = &self.robot_config;

        self.trace.write("opening bus");
        let bus = session.open_bus(cfg.bus_rate_hz)?;
        self.trace.write("opening PWM output and setting duty cycle");
        let servo = session.open_pwm(cfg.servo_pin, cfg.servo_frequency_hz)?;

        let robot = Robot::new(SharedBus::new(bus), servo, cfg.address, Arc::clone(&self.trace));
        if let Err(err) = robot.set_servo_duty(cfg.neutral_duty) {
            log::warn!("parking grabber failed: {err}");
            self.trace.write(format_args!("{err} caught while parking grabber"));
        }

        self.trace.write("calling behavior setup");
        if let Err(err) = self.behavior.setup(&robot) {
            log::warn!("behavior setup failed: {err}");
            self.trace.write(format_args!("{err} caught in setup"));
        }
        self.robot = Some(robot);
        log::info!("control loop set up at {:#04x}", cfg.address);
        Ok(())
    }

    /// Run one cycle and return the polled status, or `None` if the cycle
    /// was cut short by a transient error (or setup never succeeded).
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn cycle(&mut self) -> Option<i16> {
        let Some(robot) = self.robot.as_ref() else {
            log::warn!("cycle requested before setup");
            return None;
        };
        let sleep = Duration::from_millis(self.config.cycle_sleep_ms);

        self.trace.write("in loop");
        thread::sleep(sleep);
        if let Err(err) = self.behavior.step(robot) {
            log::warn!("cycle interrupted: {err}");
            self.trace.write(format_args!("{err} caught in loop"));
            self.report.interrupted_cycles += 1;
            return None;
        }

        let status = robot.read_sensors();
        if status == SENSOR_READ_FAILED {
            self.report.failed_reads += 1;
        }
        self.trace.write(format_args!("sending status {status} to monitor"));
        self.notify(StatusNotification { status });
        thread::sleep(sleep);

        self.report.cycles += 1;
        Some(status)
    }

    fn notify(&mut self, msg: StatusNotification) {
        let Some(tx) = self.monitor.as_ref() else {
            return;
        };
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.report.dropped_notifications += 1;
                log::debug!("monitor busy, status {} dropped", msg.status);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.report.dropped_notifications += 1;
                log::warn!("monitor gone, notifications disabled");
                self.monitor = None;
            }
        }
    }

    /// Set up once the session is connected, then cycle until it
    /// disconnects. A session that is never connected skips setup.
    pub fn run(&mut self, session: &mut dyn HardwareSession) -> LoopReport {
        self.state = LoopState::Running;
        if !session.is_connected() {
            log::info!("hardware session not available, skipping setup");
            self.trace.write("session not available");
        } else {
            match self.setup(session) {
                Ok(()) => loop {
                    self.cycle();
                    if !session.is_connected() {
                        break;
                    }
                },
                Err(err) => {
                    log::error!("hardware setup failed: {err}");
                    self.trace.write(format_args!("{err} caught in setup"));
                }
            }
        }
        self.state = LoopState::Finished;
        self.trace.write("session ended");
        log::info!("control loop finished: {:?}", self.report);
        self.report
    }
}

impl<B: Behavior + 'static> ControlLoop<B> {
    /// Run the loop on its own named thread. The handle yields the loop
    /// back once the session ends.
    pub fn spawn<S>(mut self, mut session: S) -> io::Result<JoinHandle<(Self, S)>>
    where
        S: HardwareSession + 'static,
    {
        thread::Builder::new()
            .name("robot-control-loop".into())
            .spawn(move || {
                self.run(&mut session);
                (self, session)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, PwmOutput};
    use crate::sim::{SimBus, SimPwm, SimSession};
    use approx::assert_relative_eq;

    #[derive(Default)]
    struct Scripted {
        setups: u32,
        steps: u32,
        fail_setup: bool,
        fail_steps: Vec<u32>,
    }

    impl Behavior for Scripted {
        fn setup(&mut self, robot: &Robot) -> Result<(), HardwareError> {
            self.setups += 1;
            robot.reset();
            if self.fail_setup {
                return Err(HardwareError::ConnectionLost);
            }
            Ok(())
        }

        fn step(&mut self, robot: &Robot) -> Result<(), HardwareError> {
            self.steps += 1;
            if self.fail_steps.contains(&self.steps) {
                return Err(HardwareError::Interrupted);
            }
            robot.move_by(5);
            Ok(())
        }
    }

    fn control_loop(behavior: Scripted) -> ControlLoop<Scripted> {
        let config = LoopConfig {
            cycle_sleep_ms: 0,
            monitor_capacity: 64,
        };
        ControlLoop::new(
            behavior,
            RobotConfig::default(),
            config,
            Arc::new(TraceLog::disabled()),
        )
    }

    fn session(cycles: u64) -> SimSession {
        SimSession::new(SimBus::new(), SimPwm::new()).with_cycles(cycles)
    }

    /// Board whose handles can never be opened.
    struct UnreachableBoard;

    impl HardwareSession for UnreachableBoard {
        fn open_bus(&mut self, _rate_hz: u32) -> Result<Box<dyn Bus>, HardwareError> {
            Err(HardwareError::ConnectionLost)
        }

        fn open_pwm(&mut self, _pin: u8, _frequency_hz: u32) -> Result<Box<dyn PwmOutput>, HardwareError> {
            Err(HardwareError::ConnectionLost)
        }

        fn is_connected(&mut self) -> bool {
            true
        }
    }

    #[test]
    fn setup_opens_handles_and_parks_grabber() {
        let mut sess = session(1);
        let mut lp = control_loop(Scripted::default());
        assert_eq!(lp.state(), LoopState::Idle);

        let report = lp.run(&mut sess);
        assert_eq!(lp.state(), LoopState::Finished);
        assert_eq!(report.cycles, 1);
        assert_eq!(lp.behavior().setups, 1);
        assert_eq!(sess.opened_bus_rate(), Some(100_000));
        assert_eq!(sess.opened_pwm(), Some((10, 50)));
        assert_relative_eq!(sess.pwm().last_duty().unwrap_or(0.0), 0.0528, epsilon = 1e-6);
    }

    #[test]
    fn disconnected_session_skips_setup() {
        let mut sess = session(0);
        let mut lp = control_loop(Scripted::default());
        let report = lp.run(&mut sess);

        assert_eq!(report, LoopReport::default());
        assert_eq!(lp.behavior().setups, 0);
        assert_eq!(lp.state(), LoopState::Finished);
        assert!(lp.robot().is_none());
        assert_eq!(sess.opened_bus_rate(), None);
    }

    #[test]
    fn failed_grabber_parking_does_not_end_the_session() {
        let mut sess = session(3);
        sess.pwm().fail_next(HardwareError::ConnectionLost);
        let mut lp = control_loop(Scripted::default());
        let report = lp.run(&mut sess);

        assert_eq!(report.cycles, 3);
        assert_eq!(lp.behavior().setups, 1);
        assert!(sess.pwm().duty_history().is_empty());
        assert_eq!(sess.bus().transactions().len(), 6);
    }

    #[test]
    fn failing_behavior_setup_still_cycles() {
        let mut sess = session(3);
        let mut lp = control_loop(Scripted {
            fail_setup: true,
            ..Scripted::default()
        });
        let report = lp.run(&mut sess);

        assert_eq!(lp.behavior().setups, 1);
        assert_eq!(report.cycles, 3);
        assert_eq!(lp.behavior().steps, 3);
    }

    #[test]
    fn unopenable_session_finishes_without_cycling() {
        let mut lp = control_loop(Scripted::default());
        let report = lp.run(&mut UnreachableBoard);

        assert_eq!(report.cycles, 0);
        assert_eq!(lp.state(), LoopState::Finished);
        assert_eq!(lp.behavior().setups, 0);
        assert!(lp.robot().is_none());
    }

    #[test]
    fn vanished_monitor_is_counted_once_and_detached() {
        let mut sess = session(4);
        let (tx, rx) = monitor_channel(16);
        drop(rx);
        let mut lp = control_loop(Scripted::default()).with_monitor(tx);
        let report = lp.run(&mut sess);

        assert_eq!(report.cycles, 4);
        assert_eq!(report.dropped_notifications, 1);
    }

    #[test]
    fn lost_connection_yields_sentinel_and_loop_continues() {
        let mut sess = session(4);
        sess.bus().set_status(7);
        // each cycle is a move then a read: attempts 4 and 8 are reads
        sess.bus().fail_every(4);
        let (tx, rx) = monitor_channel(16);
        let mut lp = control_loop(Scripted::default()).with_monitor(tx);

        let report = lp.run(&mut sess);
        let statuses: Vec<i16> = rx.try_iter().map(|n| n.status).collect();

        assert_eq!(statuses, vec![7, -1, 7, -1]);
        assert_eq!(report.cycles, 4);
        assert_eq!(report.failed_reads, 2);
        assert_eq!(lp.state(), LoopState::Finished);
    }

    #[test]
    fn interrupted_step_skips_only_that_cycle() {
        let mut sess = session(5);
        sess.bus().set_status(1);
        let (tx, rx) = monitor_channel(16);
        let mut lp = control_loop(Scripted {
            fail_steps: vec![2, 4],
            ..Scripted::default()
        })
        .with_monitor(tx);
        let report = lp.run(&mut sess);

        assert_eq!(lp.behavior().steps, 5);
        assert_eq!(report.cycles, 3);
        assert_eq!(report.interrupted_cycles, 2);
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn full_monitor_never_blocks_the_loop() {
        let mut sess = session(10);
        let (tx, rx) = monitor_channel(2);
        let mut lp = control_loop(Scripted::default()).with_monitor(tx);
        let report = lp.run(&mut sess);

        assert_eq!(report.cycles, 10);
        assert_eq!(report.dropped_notifications, 8);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn spawned_loop_feeds_monitor_thread() {
        let sess = session(5);
        sess.bus().set_status(42);
        let (tx, rx) = monitor_channel(16);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let monitor = spawn_monitor(rx, move |n| sink.lock().push(n)).expect("monitor thread");

        let handle = control_loop(Scripted::default())
            .with_monitor(tx)
            .spawn(sess)
            .expect("loop thread");
        let (lp, sess) = handle.join().expect("loop");
        drop(lp);
        monitor.join().expect("monitor");

        let seen = seen.lock();
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|n| n.status == 42 && !n.is_failure()));
        assert_eq!(sess.bus().transactions().len(), 10);
    }

    #[test]
    fn cycle_before_setup_is_a_no_op() {
        let mut lp = control_loop(Scripted::default());
        assert_eq!(lp.cycle(), None);
        assert_eq!(lp.behavior().steps, 0);
    }
}
