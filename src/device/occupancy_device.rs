//! The per-room device task and its handle.
//!
//! The task owns the fusion engine exclusively. Everything that mutates
//! engine state arrives through one mpsc channel or one of the task's own
//! clocks (the staleness sweep interval and the confirmation-timer
//! deadline), so no two evaluations for the same room ever interleave.
//! The only await inside an evaluation is the capability publish.

use crate::capabilities::{BooleanCapability, CapabilityPublisher};
use crate::error::{BridgeError, Result};
use crate::fusion::{EngineConfig, EngineEffects, OccupancyEngine};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Command sent to a device task. Processed strictly in arrival order.
#[derive(Debug, Clone)]
pub enum DeviceCommand {
    /// A boolean observation for one sensor.
    Observation { sensor_id: String, value: bool },
    /// Suspend evaluation and pin the published occupancy.
    Pause { initial: bool },
    /// Resume evaluation from the current sensor snapshot.
    Resume,
    /// Stop the task.
    Shutdown,
}

/// Handle to a running room device.
///
/// Cheap to clone; all operations enqueue onto the device task's channel
/// and return once the command is accepted (not once it is evaluated).
#[derive(Clone)]
pub struct OccupancyDevice {
    room: String,
    tx: mpsc::Sender<DeviceCommand>,
    occupancy: Arc<BooleanCapability>,
    sensors_stale: Arc<BooleanCapability>,
}

impl OccupancyDevice {
    /// Build a device without starting it.
    ///
    /// Returns the handle and the not-yet-running task, so the caller can
    /// wire the handle up (e.g. register the capability cells with its
    /// publisher) before the task's startup publish runs.
    pub fn new(
        config: EngineConfig,
        sweep_interval: Duration,
        publisher: Arc<dyn CapabilityPublisher>,
        cancel: CancellationToken,
    ) -> (Self, DeviceTask) {
        let room = config.room.clone();
        let (tx, rx) = mpsc::channel(64);
        let occupancy = Arc::new(BooleanCapability::new(false));
        let sensors_stale = Arc::new(BooleanCapability::new(false));

        let runner = DeviceRunner {
            engine: OccupancyEngine::new(config, Instant::now()),
            rx,
            sweep_interval,
            publisher,
            occupancy: occupancy.clone(),
            sensors_stale: sensors_stale.clone(),
            cancel,
        };

        (
            Self {
                room,
                tx,
                occupancy,
                sensors_stale,
            },
            DeviceTask { runner },
        )
    }

    /// Build and immediately start the device task for one room.
    ///
    /// The task is registered on `tracker` and stops on `cancel`, on a
    /// [`DeviceCommand::Shutdown`], or when every handle is dropped.
    pub fn spawn(
        config: EngineConfig,
        sweep_interval: Duration,
        publisher: Arc<dyn CapabilityPublisher>,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        let (device, task) = Self::new(config, sweep_interval, publisher, cancel);
        task.start(tracker);
        device
    }

    /// Room name this device serves.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Last published occupancy value.
    pub fn occupancy(&self) -> &Arc<BooleanCapability> {
        &self.occupancy
    }

    /// Last published data-quality value (`true` = degraded).
    pub fn sensors_stale(&self) -> &Arc<BooleanCapability> {
        &self.sensors_stale
    }

    /// Push one boolean observation for a sensor.
    pub async fn observe(&self, sensor_id: impl Into<String>, value: bool) -> Result<()> {
        self.send(DeviceCommand::Observation {
            sensor_id: sensor_id.into(),
            value,
        })
        .await
    }

    /// Suspend evaluation, publishing `initial` immediately.
    pub async fn pause(&self, initial: bool) -> Result<()> {
        self.send(DeviceCommand::Pause { initial }).await
    }

    /// Resume evaluation from the current sensor snapshot.
    pub async fn resume(&self) -> Result<()> {
        self.send(DeviceCommand::Resume).await
    }

    /// Ask the device task to stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(DeviceCommand::Shutdown).await
    }

    async fn send(&self, command: DeviceCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| BridgeError::DeviceUnavailable(self.room.clone()))
    }
}

/// A built but not yet running device task.
pub struct DeviceTask {
    runner: DeviceRunner,
}

impl DeviceTask {
    /// Start the task on the given tracker.
    pub fn start(self, tracker: &TaskTracker) {
        tracker.spawn(self.runner.run());
    }
}

/// State moved into the device task.
struct DeviceRunner {
    engine: OccupancyEngine,
    rx: mpsc::Receiver<DeviceCommand>,
    sweep_interval: Duration,
    publisher: Arc<dyn CapabilityPublisher>,
    occupancy: Arc<BooleanCapability>,
    sensors_stale: Arc<BooleanCapability>,
    cancel: CancellationToken,
}

impl DeviceRunner {
    async fn run(self) {
        let DeviceRunner {
            mut engine,
            mut rx,
            sweep_interval,
            publisher,
            occupancy,
            sensors_stale,
            cancel,
        } = self;

        let effects = engine.startup();
        apply(&engine, effects, &publisher, &occupancy, &sensors_stale).await;

        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval is immediate; consume it so
        // the first real sweep happens one full interval from now.
        sweep.tick().await;

        loop {
            let deadline = engine.next_deadline();
            let effects = tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    None | Some(DeviceCommand::Shutdown) => break,
                    Some(command) => dispatch(&mut engine, command),
                },
                _ = sweep.tick() => engine.handle_sweep(Instant::now()),
                _ = sleep_until_std(deadline), if deadline.is_some() => {
                    engine.handle_timer_due(Instant::now())
                }
            };
            apply(&engine, effects, &publisher, &occupancy, &sensors_stale).await;
        }

        engine.shutdown();
    }
}

fn dispatch(engine: &mut OccupancyEngine, command: DeviceCommand) -> EngineEffects {
    match command {
        DeviceCommand::Observation { sensor_id, value } => {
            engine.handle_observation(&sensor_id, value, Instant::now())
        }
        DeviceCommand::Pause { initial } => engine.pause(initial),
        DeviceCommand::Resume => engine.resume(Instant::now()),
        DeviceCommand::Shutdown => EngineEffects::default(),
    }
}

/// Apply engine effects: update the cells and push the writes out.
///
/// Publish failures are logged and not retried here; the next real
/// transition publishes again.
async fn apply(
    engine: &OccupancyEngine,
    effects: EngineEffects,
    publisher: &Arc<dyn CapabilityPublisher>,
    occupancy: &Arc<BooleanCapability>,
    sensors_stale: &Arc<BooleanCapability>,
) {
    if effects.is_empty() {
        return;
    }
    let room = engine.room();
    let changed_at: DateTime<Utc> = Utc::now();
    debug!("[Device] {}: applying {:?} at {}", room, effects, changed_at);

    if let Some(occupied) = effects.occupancy {
        occupancy.set(occupied);
        if let Err(e) = publisher.publish_occupancy(room, occupied).await {
            warn!("[Device] {}: occupancy publish failed: {}", room, e);
        }
    }
    if let Some(stale) = effects.sensors_stale {
        sensors_stale.set(stale);
        if let Err(e) = publisher.publish_data_quality(room, stale).await {
            warn!("[Device] {}: data-quality publish failed: {}", room, e);
        }
    }
    info!(
        "[Device] {}: occupancy={} sensors_stale={}",
        room,
        occupancy.get(),
        sensors_stale.get()
    );
}

async fn sleep_until_std(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        // Guarded out by the select arm condition; sleep forever if polled.
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{SensorDescriptor, SensorRole};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every publish for assertions.
    struct RecordingPublisher {
        calls: Mutex<Vec<(String, String, bool)>>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }

        fn occupancy_calls(&self) -> Vec<bool> {
            self.calls
                .lock()
                .iter()
                .filter(|(kind, _, _)| kind == "occupancy")
                .map(|(_, _, v)| *v)
                .collect()
        }
    }

    #[async_trait]
    impl CapabilityPublisher for RecordingPublisher {
        async fn publish_occupancy(&self, room: &str, occupied: bool) -> Result<()> {
            self.calls
                .lock()
                .push(("occupancy".into(), room.into(), occupied));
            Ok(())
        }

        async fn publish_data_quality(&self, room: &str, stale: bool) -> Result<()> {
            self.calls.lock().push(("stale".into(), room.into(), stale));
            Ok(())
        }
    }

    fn test_config(enter_delay: Duration, timeout: Duration) -> EngineConfig {
        EngineConfig {
            room: "test-room".into(),
            triggers: vec![SensorDescriptor::new("m1", "occupancy", SensorRole::Trigger)],
            resets: vec![SensorDescriptor::new("d1", "contact", SensorRole::Reset)],
            sensor_timeout: timeout,
            enter_delay,
            clear_delay: None,
            warm_start_occupied: None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_observation_publishes_occupied() {
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let device = OccupancyDevice::spawn(
            test_config(Duration::from_secs(30), Duration::from_secs(3600)),
            Duration::from_secs(60),
            publisher.clone(),
            &tracker,
            cancel.clone(),
        );
        settle().await;

        device.observe("m1", true).await.unwrap();
        settle().await;

        assert!(device.occupancy().get());
        assert_eq!(publisher.occupancy_calls(), vec![false, true]);

        device.shutdown().await.unwrap();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_exit_confirmation_fires_via_timer() {
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let device = OccupancyDevice::spawn(
            test_config(Duration::from_millis(50), Duration::from_secs(3600)),
            Duration::from_secs(60),
            publisher.clone(),
            &tracker,
            cancel.clone(),
        );
        settle().await;

        device.observe("m1", true).await.unwrap();
        device.observe("m1", false).await.unwrap();
        device.observe("d1", true).await.unwrap();
        // Exit confirmation (50 ms) elapses with no further motion.
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!device.occupancy().get());
        assert_eq!(publisher.occupancy_calls(), vec![false, true, false]);

        cancel.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_sweep_drives_failsafe() {
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let device = OccupancyDevice::spawn(
            test_config(Duration::from_secs(30), Duration::from_millis(150)),
            Duration::from_millis(25),
            publisher.clone(),
            &tracker,
            cancel.clone(),
        );
        settle().await;

        device.observe("m1", true).await.unwrap();
        settle().await;
        assert!(device.occupancy().get());

        // No further observations: both sensors stale out and the
        // fail-safe drops the published occupancy.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!device.occupancy().get());
        assert!(device.sensors_stale().get());

        cancel.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_pause_resume_round_trip() {
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let device = OccupancyDevice::spawn(
            test_config(Duration::from_secs(30), Duration::from_secs(3600)),
            Duration::from_secs(60),
            publisher.clone(),
            &tracker,
            cancel.clone(),
        );
        settle().await;

        device.observe("m1", true).await.unwrap();
        device.pause(true).await.unwrap();
        device.observe("m1", true).await.unwrap();
        device.resume().await.unwrap();
        settle().await;

        // One transition to true, nothing else: the pause round trip with
        // an unchanged sensor picture is silent.
        assert_eq!(publisher.occupancy_calls(), vec![false, true]);
        assert!(device.occupancy().get());

        device.shutdown().await.unwrap();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_handle_fails_after_shutdown() {
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let device = OccupancyDevice::spawn(
            test_config(Duration::from_secs(30), Duration::from_secs(3600)),
            Duration::from_secs(60),
            publisher,
            &tracker,
            cancel,
        );
        device.shutdown().await.unwrap();
        tracker.close();
        tracker.wait().await;

        assert!(matches!(
            device.observe("m1", true).await,
            Err(BridgeError::DeviceUnavailable(_))
        ));
    }
}
