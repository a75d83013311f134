//! Integration tests for ScannerService
//!
//! The mock scanner types on a paused clock, so keystroke gaps, scan
//! timeouts and reconnect intervals are exact and elapse instantly.

use std::time::Duration;

use parkpos_core::{
    DeviceEventBus, DeviceStatus, EventPayload, EventSubscription, HardwareEvent, ScanQuality,
    ScanSource, ScannerConfig, ScannerMode,
};
use parkpos_scanner::mock::{MockScanner, MockScannerHandle};
use parkpos_scanner::{ManualInput, ScanError, ScanResult, ScannerService};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

fn start(config: ScannerConfig) -> (ScannerService, MockScannerHandle, EventSubscription) {
    let (scanner, handle) = MockScanner::new();
    let bus = DeviceEventBus::new();
    let events = bus.subscribe();
    let service = ScannerService::start(config, scanner, bus);
    (service, handle, events)
}

async fn wait_for_mode(service: &ScannerService, mode: ScannerMode) {
    let mut watch = service.mode_watch();
    timeout(Duration::from_secs(300), watch.wait_for(|m| *m == mode))
        .await
        .expect("mode within timeout")
        .expect("service running");
}

async fn wait_for_status(service: &ScannerService, status: DeviceStatus) {
    let mut watch = service.status_watch();
    timeout(Duration::from_secs(300), watch.wait_for(|s| *s == status))
        .await
        .expect("status within timeout")
        .expect("service running");
}

/// Arm a scan on a background task and wait until the service is scanning.
async fn spawn_scan(
    service: &ScannerService,
    wait: Duration,
) -> JoinHandle<parkpos_scanner::Result<ScanResult>> {
    let task = tokio::spawn({
        let service = service.clone();
        async move { service.await_code(wait).await }
    });
    wait_for_mode(service, ScannerMode::Scanning).await;
    task
}

async fn spawn_manual(service: &ScannerService) -> JoinHandle<parkpos_scanner::Result<ScanResult>> {
    let task = tokio::spawn({
        let service = service.clone();
        async move { service.start_manual_entry().await }
    });
    wait_for_mode(service, ScannerMode::ManualEntry).await;
    task
}

async fn type_manually(service: &ScannerService, text: &str) {
    for input in ManualInput::typed(text) {
        service.manual_input(input).await.unwrap();
    }
}

fn captured(events: &[HardwareEvent]) -> Vec<&HardwareEvent> {
    events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::CodeCaptured { .. }))
        .collect()
}

/// Eight characters 5 ms apart form one candidate once the line goes quiet.
#[tokio::test(start_paused = true)]
async fn test_fast_burst_is_one_scan() {
    let (service, handle, mut events) = start(ScannerConfig::default());
    wait_for_status(&service, DeviceStatus::Ready).await;

    let scan = spawn_scan(&service, Duration::from_secs(5)).await;
    handle.send_burst("ABC12345", Duration::from_millis(5)).await;

    let result = scan.await.unwrap().unwrap();
    assert_eq!(result.source, ScanSource::AutomaticScan);
    assert_eq!(result.raw, "ABC12345");
    assert_eq!(result.code(), Some("ABC12345"));
    assert_eq!(result.quality, ScanQuality::Excellent { mean_gap_ms: 5 });

    let seen = events.drain();
    let codes = captured(&seen);
    assert_eq!(codes.len(), 1);
    assert!(matches!(
        &codes[0].payload,
        EventPayload::CodeCaptured { source: ScanSource::AutomaticScan, valid: true, code, .. }
            if code == "ABC12345"
    ));
    assert_eq!(service.get_status(), DeviceStatus::Ready);

    service.shutdown().await.unwrap();
}

/// Keys 200 ms apart are a person typing and never become a scan.
#[tokio::test(start_paused = true)]
async fn test_slow_typing_is_never_a_scan() {
    let (service, handle, mut events) = start(ScannerConfig::default());

    let scan = spawn_scan(&service, Duration::from_secs(5)).await;
    handle.send_burst("ABC12345", Duration::from_millis(200)).await;

    let err = scan.await.unwrap().unwrap_err();
    assert_eq!(err, ScanError::Timeout { waited_ms: 5000 });

    let seen = events.drain();
    assert!(captured(&seen).is_empty());
    let discarded = seen
        .iter()
        .filter(|e| {
            matches!(&e.payload, EventPayload::CaptureDiscarded { reason, length: 1 } if reason == "too_short")
        })
        .count();
    assert_eq!(discarded, 8);

    service.shutdown().await.unwrap();
}

/// A failed read times out on schedule and manual entry takes over.
#[tokio::test(start_paused = true)]
async fn test_timeout_then_manual_entry() {
    let (service, _handle, mut events) = start(ScannerConfig::default());
    wait_for_status(&service, DeviceStatus::Ready).await;

    let started = Instant::now();
    let err = service.await_code(Duration::from_millis(1000)).await.unwrap_err();
    let waited = started.elapsed();

    assert_eq!(err, ScanError::Timeout { waited_ms: 1000 });
    assert!(err.suggests_manual_entry());
    assert!(waited >= Duration::from_millis(1000));
    assert!(waited < Duration::from_millis(1100));
    assert_eq!(service.mode(), ScannerMode::Idle);

    let manual = spawn_manual(&service).await;
    type_manually(&service, "TEST123").await;

    let result = manual.await.unwrap().unwrap();
    assert_eq!(result.source, ScanSource::ManualEntry);
    assert_eq!(result.raw, "TEST123");
    assert_eq!(result.code(), Some("TEST123"));
    assert!(matches!(result.quality, ScanQuality::Manual { .. }));

    let seen = events.drain();
    assert!(seen.iter().any(|e| matches!(
        e.payload,
        EventPayload::ScanTimeout { waited_ms: 1000 }
    )));
    assert_eq!(captured(&seen).len(), 1);

    service.shutdown().await.unwrap();
}

/// Manual entry preempts a pending scan and scanner keys are dropped while
/// the operator types.
#[tokio::test(start_paused = true)]
async fn test_manual_entry_preempts_scan() {
    let (service, handle, mut events) = start(ScannerConfig::default());

    let scan = spawn_scan(&service, Duration::from_secs(10)).await;
    handle.send_burst("AB", Duration::from_millis(5)).await;

    let manual = spawn_manual(&service).await;
    assert_eq!(scan.await.unwrap().unwrap_err(), ScanError::Preempted);

    handle.send_burst("ZZZZ9999\r", Duration::from_millis(5)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.mode(), ScannerMode::ManualEntry);

    type_manually(&service, "MAN001").await;
    let result = manual.await.unwrap().unwrap();
    assert_eq!(result.source, ScanSource::ManualEntry);
    assert_eq!(result.raw, "MAN001");

    let seen = events.drain();
    let codes = captured(&seen);
    assert_eq!(codes.len(), 1);
    assert!(matches!(
        codes[0].payload,
        EventPayload::CodeCaptured { source: ScanSource::ManualEntry, .. }
    ));

    service.shutdown().await.unwrap();
}

/// Only one caller can wait for input at a time.
#[tokio::test(start_paused = true)]
async fn test_busy_while_manual_entry_runs() {
    let (service, _handle, _events) = start(ScannerConfig::default());

    let manual = spawn_manual(&service).await;
    assert_eq!(
        service.await_code(Duration::from_secs(1)).await.unwrap_err(),
        ScanError::Busy
    );
    assert_eq!(service.start_manual_entry().await.unwrap_err(), ScanError::Busy);
    assert_eq!(service.get_status(), DeviceStatus::Busy);

    service.cancel().await;
    assert_eq!(manual.await.unwrap().unwrap_err(), ScanError::Cancelled);

    service.shutdown().await.unwrap();
}

/// Cancel works from every mode and repeating it changes nothing.
#[tokio::test(start_paused = true)]
async fn test_cancel_is_idempotent() {
    let (service, _handle, mut events) = start(ScannerConfig::default());
    wait_for_status(&service, DeviceStatus::Ready).await;

    service.cancel().await;
    service.cancel().await;
    assert_eq!(service.mode(), ScannerMode::Idle);

    let scan = spawn_scan(&service, Duration::from_secs(10)).await;
    service.cancel().await;
    service.cancel().await;
    assert_eq!(scan.await.unwrap().unwrap_err(), ScanError::Cancelled);

    let manual = spawn_manual(&service).await;
    service.manual_input(ManualInput::Char('X')).await.unwrap();
    service.cancel().await;
    service.cancel().await;
    assert_eq!(manual.await.unwrap().unwrap_err(), ScanError::Cancelled);

    assert_eq!(service.mode(), ScannerMode::Idle);
    assert_eq!(service.get_status(), DeviceStatus::Ready);

    let seen = events.drain();
    let ended = seen
        .iter()
        .filter(|e| matches!(&e.payload, EventPayload::ManualEntryEnded { outcome } if outcome == "cancelled"))
        .count();
    assert_eq!(ended, 1);
    assert!(captured(&seen).is_empty());

    service.shutdown().await.unwrap();
}

/// An idle operator does not hold the scanner forever.
#[tokio::test(start_paused = true)]
async fn test_manual_entry_times_out() {
    let config = ScannerConfig {
        manual_entry_timeout_ms: 30_000,
        ..ScannerConfig::default()
    };
    let (service, _handle, mut events) = start(config);

    let started = Instant::now();
    let manual = spawn_manual(&service).await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    service.manual_input(ManualInput::Char('A')).await.unwrap();

    let err = manual.await.unwrap().unwrap_err();
    assert_eq!(err, ScanError::ManualEntryTimeout { idle_ms: 30_000 });
    assert!(started.elapsed() >= Duration::from_secs(50));
    assert_eq!(service.mode(), ScannerMode::Idle);

    assert!(events.drain().iter().any(|e| matches!(
        &e.payload,
        EventPayload::ManualEntryEnded { outcome } if outcome == "timed_out"
    )));

    service.shutdown().await.unwrap();
}

/// With auto fallback enabled the service opens manual entry itself and a
/// later caller picks up the session.
#[tokio::test(start_paused = true)]
async fn test_auto_manual_entry_after_timeout() {
    let config = ScannerConfig {
        auto_manual_on_timeout: true,
        ..ScannerConfig::default()
    };
    let (service, _handle, _events) = start(config);

    let err = service.await_code(Duration::from_secs(2)).await.unwrap_err();
    assert_eq!(err, ScanError::Timeout { waited_ms: 2000 });
    assert_eq!(service.mode(), ScannerMode::ManualEntry);

    let manual = tokio::spawn({
        let service = service.clone();
        async move { service.start_manual_entry().await }
    });
    // Let the request attach before typing
    tokio::time::sleep(Duration::from_millis(10)).await;
    type_manually(&service, "TEST123").await;

    let result = manual.await.unwrap().unwrap();
    assert_eq!(result.source, ScanSource::ManualEntry);
    assert_eq!(result.code(), Some("TEST123"));

    service.shutdown().await.unwrap();
}

/// A code that fails validation is still returned, with the reason.
#[tokio::test(start_paused = true)]
async fn test_invalid_code_is_reported() {
    let (service, handle, mut events) = start(ScannerConfig::default());

    let scan = spawn_scan(&service, Duration::from_secs(5)).await;
    handle.send_burst("AB#12\r", Duration::from_millis(5)).await;

    let result = scan.await.unwrap().unwrap();
    assert!(!result.is_valid());
    assert_eq!(result.raw, "AB#12");
    assert_eq!(result.error().map(|e| e.code()), Some("INVALID_CHARACTERS"));

    let seen = events.drain();
    assert!(matches!(
        &captured(&seen)[0].payload,
        EventPayload::CodeCaptured { valid: false, reason: Some(_), .. }
    ));

    service.shutdown().await.unwrap();
}

/// Unplugging the scanner is reported and the service reopens it once it
/// comes back.
#[tokio::test(start_paused = true)]
async fn test_unplugged_scanner_reconnects() {
    let (service, handle, mut events) = start(ScannerConfig::default());
    wait_for_status(&service, DeviceStatus::Ready).await;

    handle.unplug();
    wait_for_status(&service, DeviceStatus::Disconnected).await;

    // Manual entry does not depend on the scanner
    let manual = spawn_manual(&service).await;
    type_manually(&service, "TEST123").await;
    assert_eq!(manual.await.unwrap().unwrap().raw, "TEST123");

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(service.get_status(), DeviceStatus::Disconnected);

    handle.set_online(true);
    wait_for_status(&service, DeviceStatus::Ready).await;
    assert!(handle.is_open());
    assert!(handle.open_attempts() >= 3);

    let scan = spawn_scan(&service, Duration::from_secs(5)).await;
    handle.send_burst("T-00099\n", Duration::from_millis(5)).await;
    assert_eq!(scan.await.unwrap().unwrap().code(), Some("T-00099"));

    let seen = events.drain();
    assert!(seen.iter().any(|e| matches!(
        e.payload,
        EventPayload::StatusChanged { to: DeviceStatus::Disconnected, .. }
    )));

    service.shutdown().await.unwrap();
}

/// Characters from one burst are never split across two scans.
#[tokio::test(start_paused = true)]
async fn test_back_to_back_scans() {
    let (service, handle, _events) = start(ScannerConfig::default());

    for code in ["T-00001", "T-00002", "T-00003"] {
        let scan = spawn_scan(&service, Duration::from_secs(5)).await;
        handle.send_burst(&format!("{code}\r"), Duration::from_millis(3)).await;
        assert_eq!(scan.await.unwrap().unwrap().code(), Some(code));
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    service.shutdown().await.unwrap();
}
