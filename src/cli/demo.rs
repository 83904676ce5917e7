//! Demo command: a scheduled distance sensor steering a motor agent.
//!
//! The scheduler polls the sensor unit every period. Each reading goes to
//! the agent's producer, which turns it into a drive command on the bus
//! queue; the consumer hands commands to the motor processor, urgent turns
//! first. When the last poll fires, the sensor closes and the agent drains.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use robobus::agent::{CommandProcessor, GenericAgent, QueueConsumer, QueueProducer};
use robobus::bus::{Command, TransferBusQueue};
use robobus::config::Config;
use robobus::error::{Result as BusResult, RoboError};
use robobus::scheduler::{DefaultScheduler, ScheduleContext, Scheduler};
use robobus::unit::{RoboReference, RoboUnit};

/// Readings below this distance (cm) make the robot turn away.
const OBSTACLE_DISTANCE_CM: u32 = 30;

const TURN_PRIORITY: i32 = 1;
const FORWARD_PRIORITY: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Drive {
    Forward,
    Turn,
}

type DriveCommand = Command<Drive, u32>;

/// Scheduler message asking the sensor for a reading.
#[derive(Debug, Clone, Copy)]
struct Poll;

// ============================================================================
// Sensor unit
// ============================================================================

struct DistanceSensor {
    polls: AtomicU32,
    readings: Mutex<Option<UnboundedSender<u32>>>,
}

impl DistanceSensor {
    fn new(readings: UnboundedSender<u32>) -> Self {
        Self {
            polls: AtomicU32::new(0),
            readings: Mutex::new(Some(readings)),
        }
    }

    /// Simulated distance in cm, swinging between 10 and 120.
    fn measure(&self) -> u32 {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        10 + (poll * 37) % 111
    }

    fn close(&self) {
        if let Ok(mut readings) = self.readings.lock() {
            readings.take();
        }
    }
}

impl RoboReference<Poll> for DistanceSensor {
    fn id(&self) -> &str {
        "distance-sensor"
    }

    fn send_message(&self, message: Poll) -> BusResult<()> {
        self.on_message(message);
        Ok(())
    }

    fn as_unit(&self) -> Option<&dyn RoboUnit<Poll>> {
        Some(self as &dyn RoboUnit<Poll>)
    }
}

impl RoboUnit<Poll> for DistanceSensor {
    fn on_message(&self, _message: Poll) {
        let distance = self.measure();
        let readings = match self.readings.lock() {
            Ok(readings) => readings,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = readings.as_ref() {
            debug!(distance, "sensor reading");
            // The producer is gone once the agent stopped.
            let _ = sender.send(distance);
        }
    }
}

// ============================================================================
// Motor processor
// ============================================================================

#[derive(Default)]
struct Motors {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CommandProcessor<DriveCommand> for Motors {
    async fn process(&self, command: DriveCommand) -> BusResult<bool> {
        let line = match command.kind() {
            Drive::Forward => format!("forward, clear for {} cm", command.payload()),
            Drive::Turn => format!("turn, obstacle at {} cm", command.payload()),
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        info!(command = %line, "motors");
        self.log
            .lock()
            .map_err(|_| RoboError::Worker("motor log poisoned".to_string()))?
            .push(line);
        Ok(true)
    }
}

fn drive_command(distance: u32) -> DriveCommand {
    if distance < OBSTACLE_DISTANCE_CM {
        Command::new(Drive::Turn, distance).with_priority(TURN_PRIORITY)
    } else {
        Command::new(Drive::Forward, distance).with_priority(FORWARD_PRIORITY)
    }
}

/// Runs on a blocking thread, so it waits on the channel with `blocking_recv`.
fn produce(
    queue: &TransferBusQueue<DriveCommand>,
    readings: &mut UnboundedReceiver<u32>,
) -> BusResult<()> {
    while let Some(distance) = readings.blocking_recv() {
        queue.transfer(drive_command(distance));
    }
    queue.deactivate();
    Ok(())
}

// ============================================================================
// Command
// ============================================================================

pub(crate) fn cmd_demo(config: &Config, ticks: u32, period_ms: u64) -> Result<()> {
    let executor = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.agent.worker_threads)
        .thread_name("robobus-agents")
        .enable_all()
        .build()
        .with_context(|| "Failed to start agent executor")?;
    let scheduler =
        DefaultScheduler::from_config(&config.scheduler).with_context(|| "Failed to start scheduler")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sensor = Arc::new(DistanceSensor::new(tx));

    let queue = Arc::new(TransferBusQueue::from_config(&config.bus));
    let producer = QueueProducer::new("sensor-feed", queue, move |queue| produce(queue, &mut rx));
    let motors = Motors::default();
    let motor_log = Arc::clone(&motors.log);
    let consumer = QueueConsumer::from_config("motors", motors, &config.agent);

    let agent = GenericAgent::builder()
        .name("drive")
        .config(&config.agent)
        .executor(executor.handle().clone())
        .producer(producer)
        .consumer(consumer)
        .build()?;
    let status = agent.activate()?;
    println!("Agent '{}' {} at {}", status.name, status.state, status.timestamp);

    let closing = Arc::clone(&sensor);
    let target: Arc<dyn RoboReference<Poll>> = sensor;
    let schedule = scheduler.schedule(
        target,
        Poll,
        Duration::ZERO,
        Duration::from_millis(period_ms.max(1)),
        ticks.max(1),
        Some(Box::new(move |ctx: &ScheduleContext| {
            info!(schedule_id = ctx.schedule_id(), fired = ctx.fired(), "sensor schedule finished");
            closing.close();
        })),
    )?;

    executor.block_on(agent.join())?;
    scheduler.shutdown();

    println!("Schedule {} {:?}", schedule.id(), schedule.state());
    println!();
    println!("Motor commands:");
    for line in motor_log.lock().map_err(|_| anyhow::anyhow!("motor log poisoned"))?.iter() {
        println!("  {}", line);
    }
    println!();
    println!("Agent activity: {}", agent.activity().join(" -> "));
    println!("Agent lifecycle: {}", agent.state().lifecycle());
    Ok(())
}
