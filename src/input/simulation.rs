//! Sensor simulation for development and testing.
//!
//! Drives one room with synthetic motion and door events so the whole
//! pipeline (aggregation, staleness, state machine, publishing) can be
//! exercised without a broker or physical sensors.

use crate::device::OccupancyDevice;
use log::{info, warn};
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Spawn a task that periodically injects sensor events into a device.
///
/// Alternates between "someone walks in" (motion rising) and "someone
/// leaves" (motion falling, then the door opens), with a little jitter on
/// the cadence. Also watches the device's published occupancy and logs
/// every transition, which makes the end-to-end effect of each injected
/// event visible in the log.
///
/// # Returns
///
/// A `JoinHandle` that can be used to abort the simulation task.
pub fn run_sensor_simulation(
    device: OccupancyDevice,
    motion_sensor: String,
    door_sensor: Option<String>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut occupancy_watch = device.occupancy().subscribe();
        let mut ticker = interval(period);
        let mut entering = true;

        info!(
            "[Sim] Driving room '{}' via '{}' every {:?}",
            device.room(),
            motion_sensor,
            period
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Jitter so the log doesn't look like a metronome.
                    let jitter = rand::thread_rng().gen_range(0..500);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;

                    let result = if entering {
                        info!("[Sim] Motion detected on '{}'", motion_sensor);
                        device.observe(&motion_sensor, true).await
                    } else {
                        info!("[Sim] Motion cleared on '{}'", motion_sensor);
                        let result = device.observe(&motion_sensor, false).await;
                        if let (Ok(()), Some(door)) = (&result, &door_sensor) {
                            info!("[Sim] Door opened on '{}'", door);
                            let _ = device.observe(door, true).await;
                            let _ = device.observe(door, false).await;
                        }
                        result
                    };
                    if let Err(e) = result {
                        warn!("[Sim] Device gone, stopping simulation: {}", e);
                        break;
                    }
                    entering = !entering;
                }
                changed = occupancy_watch.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    info!(
                        "[Sim] Published occupancy for '{}' -> {}",
                        device.room(),
                        *occupancy_watch.borrow_and_update()
                    );
                }
            }
        }
    })
}
