//! Integration tests for RoboBus
//!
//! These tests drive the public API end to end: queue ordering and handoff,
//! the activity log, the scheduler's counting and cancellation, and agents
//! fed by scheduled units.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use robobus::{
    agent::{ActivityLog, AgentState, CommandProcessor, GenericAgent, QueueConsumer, QueueProducer},
    bus::{Command, TransferBusQueue},
    config::Config,
    error::{Result, RoboError},
    scheduler::{DefaultScheduler, ScheduleContext, ScheduleState, Scheduler},
    unit::{LifecycleState, RoboReference, RoboUnit},
};
use tempfile::tempdir;

type Cmd = Command<char, u32>;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Small deterministic generator for priority sequences.
fn priorities(seed: u64, len: usize) -> Vec<i32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) % 7) as i32 - 3
        })
        .collect()
}

// ============================================================================
// Transfer queue
// ============================================================================

#[test]
fn test_scenario_overflow_drained_by_priority() {
    let queue = TransferBusQueue::new();
    queue.transfer(Command::new('A', 0).with_priority(5));
    queue.transfer(Command::new('B', 0).with_priority(1));
    queue.transfer(Command::new('C', 0).with_priority(1));

    let taken: Vec<char> = (0..3).map(|_| *queue.take().unwrap().kind()).collect();
    assert_eq!(taken, vec!['B', 'C', 'A']);
    assert!(queue.is_empty());
}

#[test]
fn test_priority_order_and_fifo_within_priority() {
    for seed in 1..=20 {
        let queue = TransferBusQueue::new();
        let sequence = priorities(seed, 40);
        for (index, priority) in sequence.iter().enumerate() {
            queue.transfer(Command::new('x', index as u32).with_priority(*priority));
        }

        let mut previous: Option<(i32, u32)> = None;
        for _ in 0..sequence.len() {
            let cmd: Cmd = queue.take().unwrap();
            let current = (sequence[*cmd.payload() as usize], *cmd.payload());
            if let Some((priority, index)) = previous {
                assert!(priority <= current.0, "seed {}: priority went down", seed);
                if priority == current.0 {
                    assert!(index < current.1, "seed {}: FIFO broken", seed);
                }
            }
            previous = Some(current);
        }
    }
}

#[test]
fn test_size_tracks_transfers_minus_takes() {
    let queue = TransferBusQueue::new();
    for i in 0..10 {
        queue.transfer(Command::new('s', i));
    }
    for _ in 0..4 {
        queue.take();
    }
    assert_eq!(queue.size(), 6);

    let _ = queue.try_transfer(Command::new('s', 99));
    assert_eq!(queue.size(), 6);
    assert!(!queue.try_transfer_timeout(Command::new('s', 100), ms(1)));
    assert_eq!(queue.size(), 7);
}

#[test]
fn test_handoff_to_blocked_consumer_is_exactly_once() {
    let queue: Arc<TransferBusQueue<Cmd>> = Arc::new(TransferBusQueue::new());
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut received = Vec::new();
            while let Some(cmd) = queue.take() {
                received.push(*cmd.payload());
            }
            received
        })
    };

    for i in 0..200 {
        while !queue.has_waiting_consumer() && i % 20 == 0 {
            thread::yield_now();
        }
        queue.transfer(Command::new('h', i));
    }
    while !queue.is_empty() {
        thread::sleep(ms(1));
    }
    queue.deactivate();

    let mut received = consumer.join().unwrap();
    received.sort_unstable();
    assert_eq!(received, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_try_transfer_hands_item_to_waiting_consumer() {
    let queue: Arc<TransferBusQueue<Cmd>> = Arc::new(TransferBusQueue::new());
    let rejected = queue.try_transfer(Command::new('t', 1)).unwrap_err();
    assert_eq!(*rejected.payload(), 1);

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.take())
    };
    while !queue.has_waiting_consumer() {
        thread::sleep(ms(1));
    }
    queue.try_transfer(Command::new('t', 2)).unwrap();
    assert_eq!(*consumer.join().unwrap().unwrap().payload(), 2);
}

#[test]
fn test_deactivate_releases_blocked_take_and_peek() {
    let queue: Arc<TransferBusQueue<Cmd>> = Arc::new(TransferBusQueue::with_await_timeout(ms(50)));
    let taker = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.take())
    };
    let peeker = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.peek())
    };
    while !queue.has_waiting_consumer() {
        thread::sleep(ms(1));
    }

    let started = Instant::now();
    queue.deactivate();
    assert!(taker.join().unwrap().is_none());
    assert!(peeker.join().unwrap().is_none());
    assert!(started.elapsed() < ms(500));
    assert_eq!(queue.waiting_consumer_count(), 0);
}

// ============================================================================
// Activity log
// ============================================================================

#[test]
fn test_activity_log_keeps_most_recent() {
    for k in 1..5 {
        let mut log = ActivityLog::with_capacity(4);
        for record in 0..4 + k {
            log.push(record);
        }
        assert_eq!(log.len(), 4);
        assert_eq!(log.snapshot(), (k..4 + k).collect::<Vec<_>>());
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Default)]
struct Recorder {
    deliveries: AtomicUsize,
}

impl RoboReference<&'static str> for Recorder {
    fn id(&self) -> &str {
        "recorder"
    }

    fn send_message(&self, _message: &'static str) -> Result<()> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_schedule_count_exhaustion() {
    let scheduler = DefaultScheduler::new(2).unwrap();
    let recorder = Arc::new(Recorder::default());
    let target: Arc<dyn RoboReference<&'static str>> = recorder.clone();
    let listener_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&listener_calls);

    let handle = scheduler
        .schedule(
            target,
            "ping",
            Duration::ZERO,
            ms(10),
            3,
            Some(Box::new(move |ctx: &ScheduleContext| {
                assert_eq!(ctx.invocations(), Some(3));
                calls.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

    thread::sleep(ms(100));
    assert_eq!(recorder.deliveries.load(Ordering::SeqCst), 3);
    assert_eq!(listener_calls.load(Ordering::SeqCst), 1);

    thread::sleep(ms(100));
    assert_eq!(recorder.deliveries.load(Ordering::SeqCst), 3);
    assert_eq!(handle.state(), ScheduleState::Completed);
    scheduler.shutdown();
}

#[test]
fn test_unbounded_schedule_cancel() {
    let scheduler = DefaultScheduler::new(2).unwrap();
    let recorder = Arc::new(Recorder::default());
    let target: Arc<dyn RoboReference<&'static str>> = recorder.clone();
    let handle = scheduler
        .schedule_unbounded(target, "ping", Duration::ZERO, ms(10))
        .unwrap();

    thread::sleep(ms(35));
    handle.cancel();
    let at_cancel = recorder.deliveries.load(Ordering::SeqCst);
    assert!((2..=4).contains(&at_cancel), "deliveries: {}", at_cancel);

    thread::sleep(ms(100));
    assert_eq!(recorder.deliveries.load(Ordering::SeqCst), at_cancel);
    scheduler.shutdown();
}

// ============================================================================
// Agents
// ============================================================================

/// A unit that turns scheduler pings into commands on an agent queue.
struct Feeder {
    queue: Arc<TransferBusQueue<Cmd>>,
    sent: AtomicUsize,
}

impl RoboReference<char> for Feeder {
    fn id(&self) -> &str {
        "feeder"
    }

    fn send_message(&self, message: char) -> Result<()> {
        self.on_message(message);
        Ok(())
    }

    fn as_unit(&self) -> Option<&dyn RoboUnit<char>> {
        Some(self as &dyn RoboUnit<char>)
    }
}

impl RoboUnit<char> for Feeder {
    fn on_message(&self, message: char) {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) as u32;
        self.queue.transfer(Command::new(message, n));
    }
}

struct Collector {
    seen: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl CommandProcessor<Cmd> for Collector {
    async fn process(&self, command: Cmd) -> Result<bool> {
        if *command.kind() == '?' {
            return Err(RoboError::UnknownCommand("?".to_string()));
        }
        self.seen.lock().unwrap().push(*command.payload());
        Ok(true)
    }
}

fn agent(
    executor: &tokio::runtime::Runtime,
    queue: Arc<TransferBusQueue<Cmd>>,
) -> (GenericAgent<Cmd>, Arc<Mutex<Vec<u32>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let agent = GenericAgent::builder()
        .name("collector")
        .executor(executor.handle().clone())
        .producer(QueueProducer::new("idle", queue, |_| Ok(())))
        .consumer(QueueConsumer::new("collector", Collector { seen: Arc::clone(&seen) }))
        .build()
        .unwrap();
    (agent, seen)
}

fn executor() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn test_scheduled_unit_feeds_agent() {
    let executor = executor();
    let scheduler = DefaultScheduler::new(2).unwrap();
    let queue = Arc::new(TransferBusQueue::with_await_timeout(ms(20)));
    let (agent, seen) = agent(&executor, Arc::clone(&queue));
    agent.activate().unwrap();

    let feeder: Arc<dyn RoboReference<char>> = Arc::new(Feeder {
        queue: Arc::clone(&queue),
        sent: AtomicUsize::new(0),
    });
    let stop_queue = Arc::clone(&queue);
    scheduler
        .schedule(
            feeder,
            'f',
            Duration::ZERO,
            ms(5),
            5,
            Some(Box::new(move |_: &ScheduleContext| stop_queue.deactivate())),
        )
        .unwrap();

    executor.block_on(agent.join()).unwrap();
    scheduler.shutdown();

    assert_eq!(seen.lock().unwrap().as_slice(), [0, 1, 2, 3, 4]);
    assert_eq!(agent.state(), AgentState::Active);
    agent.deactivate();
    assert_eq!(agent.state().lifecycle(), LifecycleState::Stopped);
}

#[test]
fn test_unknown_command_fails_agent_without_crashing() {
    let executor = executor();
    let queue = Arc::new(TransferBusQueue::with_await_timeout(ms(20)));
    let (agent, seen) = agent(&executor, Arc::clone(&queue));
    agent.activate().unwrap();

    queue.transfer(Command::new('k', 1));
    queue.transfer(Command::new('?', 2));
    executor.block_on(agent.join()).unwrap();

    assert_eq!(agent.state(), AgentState::Failed);
    assert_eq!(agent.activity(), vec!["ACTIVE", "FAILED"]);
    assert_eq!(seen.lock().unwrap().as_slice(), [1]);
    assert!(!queue.is_active());
}

fn agent_producing<F>(
    executor: &tokio::runtime::Runtime,
    produce: F,
) -> (GenericAgent<Cmd>, Arc<Mutex<Vec<u32>>>)
where
    F: FnMut(&TransferBusQueue<Cmd>) -> Result<()> + Send + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::new(TransferBusQueue::with_await_timeout(ms(20)));
    let agent = GenericAgent::builder()
        .name("sensor-agent")
        .executor(executor.handle().clone())
        .producer(QueueProducer::new("sensor", queue, produce))
        .consumer(QueueConsumer::new("collector", Collector { seen: Arc::clone(&seen) }))
        .build()
        .unwrap();
    (agent, seen)
}

#[test]
fn test_failing_producer_releases_consumer() {
    let executor = executor();
    let (agent, seen) = agent_producing(&executor, |queue| {
        queue.transfer(Command::new('k', 7));
        Err(RoboError::Worker("sensor died".to_string()))
    });
    agent.activate().unwrap();

    let joined = executor.block_on(async { tokio::time::timeout(Duration::from_secs(2), agent.join()).await });
    assert!(joined.is_ok(), "agent did not shut down");
    joined.unwrap().unwrap();

    assert_eq!(agent.state(), AgentState::Failed);
    assert!(agent.is_finished());
    assert!(!agent.queue().is_active());
    // Buffered commands are still drained.
    assert_eq!(seen.lock().unwrap().as_slice(), [7]);
}

#[test]
fn test_panicking_producer_fails_agent() {
    let executor = executor();
    let (agent, seen) = agent_producing(&executor, |_queue| -> Result<()> {
        panic!("sensor bus fault")
    });
    agent.activate().unwrap();

    let joined = executor.block_on(async { tokio::time::timeout(Duration::from_secs(2), agent.join()).await });
    assert!(joined.is_ok(), "agent did not shut down");

    assert_eq!(agent.state(), AgentState::Failed);
    assert_eq!(agent.activity(), vec!["ACTIVE", "FAILED"]);
    assert!(!agent.queue().is_active());
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_consumer_failure_stops_continuous_producer() {
    let executor = executor();
    let (agent, seen) = agent_producing(&executor, |queue| {
        queue.transfer(Command::new('?', 0));
        let mut n = 1;
        while queue.is_active() {
            queue.transfer(Command::new('k', n));
            n += 1;
            thread::sleep(ms(1));
        }
        Ok(())
    });
    agent.activate().unwrap();

    let joined = executor.block_on(async { tokio::time::timeout(Duration::from_secs(2), agent.join()).await });
    assert!(joined.is_ok(), "producer kept running");

    assert_eq!(agent.state(), AgentState::Failed);
    assert!(!agent.queue().is_active());
    assert!(seen.lock().unwrap().is_empty());

    let size = agent.queue().size();
    thread::sleep(ms(50));
    assert_eq!(agent.queue().size(), size);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_drives_components() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.json");
    std::fs::write(
        &path,
        r#"{ "bus": { "await_timeout_ms": 25 }, "scheduler": { "threads": 1 } }"#,
    )
    .unwrap();

    let config = Config::load_from_path(&path).unwrap();
    let queue: TransferBusQueue<Cmd> = TransferBusQueue::from_config(&config.bus);
    queue.deactivate();
    let started = Instant::now();
    assert!(queue.take().is_none());
    assert!(started.elapsed() < ms(200));

    let scheduler = DefaultScheduler::from_config(&config.scheduler).unwrap();
    assert_eq!(scheduler.submit(|| "ran").unwrap().wait().unwrap(), "ran");
    scheduler.shutdown();
}
