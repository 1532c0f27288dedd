//! Integration tests for the command dispatcher
//!
//! These tests drive the dispatcher actor against simulated controllers:
//! - FIFO completion with concurrent callers
//! - At most one serial port open at any instant
//! - Timeouts, open failures and late replies
//! - Scans, rescans and the clock sync that follows them
//! - Event emission for observers

use std::sync::Arc;
use std::time::Duration;

use relay_detect::{DiscoveredDevice, SerialPortInfo};
use relay_dispatch::{DispatchConfig, DispatchEvent, Dispatcher, JobOutcome, JobState};
use relay_protocol::{DeviceCommand, DeviceId, DeviceStatus};
use relay_sim::{SimBackend, VirtualDevice};
use tokio::sync::broadcast;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Dispatcher config without the post-scan clock sync
    pub fn no_clock_sync() -> DispatchConfig {
        DispatchConfig {
            clock_sync: false,
            ..Default::default()
        }
    }

    /// A bench with two relays, the flysim, a dead port and a locked port
    pub fn bench() -> Arc<SimBackend> {
        Arc::new(
            SimBackend::new()
                .with_device("COM3", VirtualDevice::power_relay("1", 4))
                .with_device("COM4", VirtualDevice::power_relay("7", 2))
                .with_device("COM5", VirtualDevice::cableflysim())
                .with_silent_port("COM6")
                .with_unopenable_port("COM7"),
        )
    }

    /// Spawn a dispatcher on `backend` and run an initial scan
    pub async fn scanned(backend: &Arc<SimBackend>, config: DispatchConfig) -> Dispatcher {
        let (dispatcher, _actor) = Dispatcher::spawn(backend.clone(), config);
        dispatcher.scan().await.unwrap();
        dispatcher
    }

    /// Collect every event currently buffered
    pub fn drain(rx: &mut broadcast::Receiver<DispatchEvent>) -> Vec<DispatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}

use helpers::*;

// ============================================================================
// Ordering and exclusivity
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_complete_in_order() {
    let backend = bench();
    let dispatcher = scanned(&backend, no_clock_sync()).await;

    // join! polls in order, so the status job is enqueued first
    let (status, on) = tokio::join!(
        dispatcher.submit("POWER_RELAY_1", DeviceCommand::Status),
        dispatcher.submit("POWER_RELAY_1", DeviceCommand::RelaysOn),
    );

    // The status ran first, so it saw the relays still off
    assert_eq!(
        status.unwrap(),
        JobOutcome::Ok(r#"{"state":[0,0,0,0]}"#.to_string())
    );
    assert_eq!(on.unwrap(), JobOutcome::Ok("OK".to_string()));
    assert_eq!(backend.device_status("COM3").unwrap().state, vec![1, 1, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_port_open() {
    let backend = bench();
    let dispatcher = scanned(&backend, DispatchConfig::default()).await;

    let mut handles = Vec::new();
    for i in 0..12 {
        let d = dispatcher.clone();
        let device = match i % 4 {
            0 => "POWER_RELAY_1",
            1 => "POWER_RELAY_7",
            2 => "CABLEFLYSIM",
            _ => "POWER_RELAY_2",
        };
        handles.push(tokio::spawn(async move {
            d.submit(device, DeviceCommand::Status).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(backend.max_concurrent_opens(), 1);
    assert_eq!(backend.currently_open(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_job_ids_complete_in_enqueue_order() {
    let backend = bench();
    let dispatcher = scanned(&backend, no_clock_sync()).await;
    let mut events = dispatcher.subscribe();

    let mut ids = Vec::new();
    for command in [DeviceCommand::Status, DeviceCommand::RelaysOn, DeviceCommand::RelaysOff] {
        ids.push(dispatcher.submit_detached("POWER_RELAY_7", command).await.unwrap());
    }
    // Queued behind the detached jobs
    dispatcher
        .submit("POWER_RELAY_7", DeviceCommand::Status)
        .await
        .unwrap();

    let completed: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            DispatchEvent::JobCompleted { id, .. } => Some(id),
            _ => None,
        })
        .collect();

    assert_eq!(&completed[..3], &ids[..]);
    assert!(completed.windows(2).all(|w| w[0] < w[1]));
}

// ============================================================================
// Outcomes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unknown_ids_never_open_a_port() {
    let backend = bench();
    let dispatcher = scanned(&backend, no_clock_sync()).await;
    let opens = backend.open_count();

    for device in ["POWER_RELAY_99", "POWER_RELAY_", "SOMETHING_ELSE", ""] {
        let outcome = dispatcher.submit(device, DeviceCommand::Status).await.unwrap();
        assert_eq!(outcome, JobOutcome::UnrecognizedDevice);
    }

    assert_eq!(backend.open_count(), opens);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out_after_window() {
    let backend = bench();
    let dispatcher = scanned(&backend, no_clock_sync()).await;
    backend.set_silent("COM4", true);

    let start = tokio::time::Instant::now();
    let outcome = dispatcher
        .submit("POWER_RELAY_7", DeviceCommand::Status)
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Timeout);
    assert_eq!(start.elapsed(), Duration::from_millis(3000));
    assert_eq!(backend.currently_open(), 0);

    // The queue moves on
    backend.set_silent("COM4", false);
    let outcome = dispatcher
        .submit("POWER_RELAY_7", DeviceCommand::Status)
        .await
        .unwrap();
    assert!(outcome.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_hung_open_times_out_and_queue_moves_on() {
    let backend = Arc::new(
        SimBackend::new()
            .with_device("COM3", VirtualDevice::power_relay("1", 2))
            .with_hanging_port("COM8"),
    );
    let dispatcher = scanned(&backend, no_clock_sync()).await;

    // The relay's driver wedged after discovery
    dispatcher
        .registry()
        .replace(&[
            DiscoveredDevice {
                id: DeviceId::power_relay("1"),
                port: "COM3".into(),
            },
            DiscoveredDevice {
                id: DeviceId::power_relay("2"),
                port: "COM8".into(),
            },
        ])
        .await;

    let start = tokio::time::Instant::now();
    let (stuck, next) = tokio::join!(
        dispatcher.submit("POWER_RELAY_2", DeviceCommand::Status),
        dispatcher.submit("POWER_RELAY_1", DeviceCommand::Status),
    );

    assert_eq!(stuck.unwrap(), JobOutcome::Timeout);
    assert_eq!(
        next.unwrap(),
        JobOutcome::Ok(r#"{"state":[0,0]}"#.to_string())
    );
    assert!(start.elapsed() >= Duration::from_millis(1000));
    assert!(start.elapsed() < Duration::from_millis(3000));
    assert_eq!(backend.currently_open(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reply_is_trimmed_and_never_times_out_late() {
    let backend = bench();
    let dispatcher = scanned(&backend, no_clock_sync()).await;
    let mut events = dispatcher.subscribe();

    let outcome = dispatcher
        .submit("CABLEFLYSIM", DeviceCommand::Raw("status +waypoints".into()))
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Ok("OK status +waypoints".to_string()));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let timeouts = drain(&mut events)
        .iter()
        .filter(|e| {
            matches!(
                e,
                DispatchEvent::JobCompleted {
                    outcome: JobOutcome::Timeout,
                    ..
                }
            )
        })
        .count();
    assert_eq!(timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_never_reaches_next_job() {
    let backend = bench();
    let dispatcher = scanned(&backend, no_clock_sync()).await;
    backend.set_reply_delay("COM3", Duration::from_millis(3500));

    let on = dispatcher
        .submit("POWER_RELAY_1", DeviceCommand::RelaysOn)
        .await
        .unwrap();
    assert_eq!(on, JobOutcome::Timeout);

    backend.set_reply_delay("COM3", Duration::ZERO);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = dispatcher
        .submit("POWER_RELAY_1", DeviceCommand::Status)
        .await
        .unwrap();

    // The relay acted on the late command, but its "OK" went nowhere
    assert_eq!(
        status,
        JobOutcome::Ok(r#"{"state":[1,1,1,1]}"#.to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_unopenable_port_reports_error() {
    let backend = bench();
    let (dispatcher, _actor) = Dispatcher::spawn(backend, no_clock_sync());

    // The relay moved and the port it was registered on is now locked
    dispatcher
        .registry()
        .replace(&[DiscoveredDevice {
            id: DeviceId::power_relay("1"),
            port: "COM7".into(),
        }])
        .await;

    let outcome = dispatcher
        .submit("POWER_RELAY_1", DeviceCommand::Status)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Error("failed to open COM7: Access is denied.".to_string())
    );
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scan_builds_registry() {
    let backend = bench();
    let (dispatcher, _actor) = Dispatcher::spawn(backend.clone(), no_clock_sync());

    let report = dispatcher.scan().await.unwrap();

    assert_eq!(report.tried, 5);
    assert_eq!(report.recognized, 3);

    let registry = dispatcher.registry().snapshot().await;
    assert_eq!(registry.get(&DeviceId::power_relay("1")).map(String::as_str), Some("COM3"));
    assert_eq!(registry.get(&DeviceId::power_relay("7")).map(String::as_str), Some("COM4"));
    assert_eq!(registry.get(&DeviceId::CableFlysim).map(String::as_str), Some("COM5"));
    assert_eq!(backend.max_concurrent_opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rescan_is_idempotent() {
    let backend = bench();
    let dispatcher = scanned(&backend, DispatchConfig::default()).await;
    let first = dispatcher.registry().snapshot().await;

    let report = dispatcher.scan().await.unwrap();

    assert_eq!(dispatcher.registry().snapshot().await, first);
    assert_eq!(report.recognized, first.len());
}

#[tokio::test(start_paused = true)]
async fn test_clock_sync_follows_scan_behind_waiting_commands() {
    let backend = bench();
    let (dispatcher, _actor) = Dispatcher::spawn(backend.clone(), DispatchConfig::default());
    let mut events = dispatcher.subscribe();

    // The relay command arrives while the scan is running
    let (report, on) = tokio::join!(
        dispatcher.scan(),
        dispatcher.submit_detached("POWER_RELAY_1", DeviceCommand::RelaysOn),
    );
    report.unwrap();
    let on = on.unwrap();

    // Last in the queue, so everything before it has finished
    dispatcher
        .submit("CABLEFLYSIM", DeviceCommand::Status)
        .await
        .unwrap();

    let order: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            DispatchEvent::JobCompleted { id, outcome } => Some((id, outcome)),
            _ => None,
        })
        .collect();

    // The relay command completed first, against the fresh registry
    assert_eq!(order[0], (on, JobOutcome::Ok("OK".to_string())));
    assert_eq!(order.len(), 1 + 3 + 1);
    for port in ["COM3", "COM4", "COM5"] {
        assert!(backend.device_clock(port).is_some(), "{port} not synced");
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_selected_ports() {
    let backend = bench();
    let (dispatcher, _actor) = Dispatcher::spawn(backend.clone(), no_clock_sync());

    let report = dispatcher
        .scan_ports(vec![SerialPortInfo::named("COM5"), SerialPortInfo::named("COM6")])
        .await
        .unwrap();

    assert_eq!(report.tried, 2);
    assert_eq!(dispatcher.registry().ids().await, vec![DeviceId::CableFlysim]);
    assert_eq!(backend.commands_handled("COM3"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scan_events() {
    let backend = bench();
    let (dispatcher, _actor) = Dispatcher::spawn(backend, no_clock_sync());
    let mut events = dispatcher.subscribe();

    dispatcher.scan().await.unwrap();

    let scan_events: Vec<_> = drain(&mut events).into_iter().filter(|e| e.is_scan()).collect();
    assert!(matches!(scan_events[0], DispatchEvent::ScanStarted { ports: 5 }));
    match &scan_events[1] {
        DispatchEvent::ScanCompleted { report } => assert_eq!(report.recognized, 3),
        other => panic!("Expected ScanCompleted, got {:?}", other),
    }
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_job_state_sequence() {
    let backend = bench();
    let dispatcher = scanned(&backend, no_clock_sync()).await;
    let mut events = dispatcher.subscribe();

    dispatcher
        .submit("POWER_RELAY_1", DeviceCommand::Status)
        .await
        .unwrap();
    dispatcher
        .submit("POWER_RELAY_404", DeviceCommand::Status)
        .await
        .unwrap();

    let events = drain(&mut events);
    let states = |job: u64| -> Vec<JobState> {
        events
            .iter()
            .filter_map(|e| match e {
                DispatchEvent::JobStateChanged { id, state } if id.0 == job => Some(*state),
                _ => None,
            })
            .collect()
    };
    let first = events[0].job_id().unwrap().0;

    assert_eq!(
        states(first),
        vec![
            JobState::Queued,
            JobState::Opening,
            JobState::AwaitingResponse,
            JobState::Closing(relay_detect::Closing::Ok),
            JobState::Done,
        ]
    );
    assert_eq!(states(first + 1), vec![JobState::Queued, JobState::Done]);
}

#[tokio::test(start_paused = true)]
async fn test_status_reply_parses() {
    let backend = bench();
    let dispatcher = scanned(&backend, DispatchConfig::default()).await;

    let outcome = dispatcher
        .submit("POWER_RELAY_7", DeviceCommand::Status)
        .await
        .unwrap();

    let status = DeviceStatus::parse(outcome.response()).unwrap();
    assert_eq!(status.state, vec![0, 0]);
    assert!(status.time.is_some());
}
