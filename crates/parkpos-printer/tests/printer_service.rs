//! Integration tests for PrinterService
//!
//! These drive the full service (queue, connection, renderer) against the
//! mock printer on a paused clock, so reconnect intervals and backoff
//! delays elapse instantly.

use std::io;
use std::time::Duration;

use parkpos_core::{
    DeviceEventBus, DeviceStatus, EventPayload, EventSubscription, HardwareEvent, PrinterConfig,
};
use parkpos_printer::mock::{MockPrinterHandle, MockTransport};
use parkpos_printer::{DocumentKind, JobState, PrinterService, ReceiptFields};
use tokio::time::timeout;

fn entry_fields(code: &str) -> ReceiptFields {
    ReceiptFields::new()
        .with("plate", "ABC-123")
        .with("code", code)
}

fn payment_fields(code: &str) -> ReceiptFields {
    ReceiptFields::new()
        .with("code", code)
        .with("amount", "4,50 €")
}

fn start(config: PrinterConfig) -> (PrinterService, MockPrinterHandle, EventSubscription) {
    let (transport, printer) = MockTransport::new();
    let bus = DeviceEventBus::new();
    let events = bus.subscribe();
    let service = PrinterService::start(config, transport, bus);
    (service, printer, events)
}

fn start_offline() -> (PrinterService, MockPrinterHandle, EventSubscription) {
    let (transport, printer) = MockTransport::new();
    printer.set_online(false);
    let bus = DeviceEventBus::new();
    let events = bus.subscribe();
    let service = PrinterService::start(PrinterConfig::default(), transport, bus);
    (service, printer, events)
}

/// Receive events until one matches, returning everything seen.
async fn events_until(
    events: &mut EventSubscription,
    done: impl Fn(&HardwareEvent) -> bool,
) -> Vec<HardwareEvent> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(300), events.recv())
            .await
            .expect("event within timeout")
            .expect("bus open");
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

async fn wait_for_status(service: &PrinterService, status: DeviceStatus) {
    let mut watch = service.status_watch();
    timeout(Duration::from_secs(300), watch.wait_for(|s| *s == status))
        .await
        .expect("status within timeout")
        .expect("service running");
}

fn is_completed(event: &HardwareEvent) -> bool {
    matches!(event.payload, EventPayload::JobCompleted { .. })
}

#[tokio::test(start_paused = true)]
async fn test_print_while_disconnected_completes_after_reconnect() {
    let (service, printer, mut events) = start_offline();

    // Initial handshake fails
    events_until(&mut events, |e| {
        e.payload
            == EventPayload::StatusChanged {
                from: DeviceStatus::Connecting,
                to: DeviceStatus::Disconnected,
            }
    })
    .await;

    let job = service
        .print(DocumentKind::EntryTicket, &entry_fields("T-00099"))
        .unwrap();
    let pending = service.pending_jobs();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, job.id);
    assert_eq!(pending[0].state, JobState::Pending);

    printer.set_online(true);
    let seen = events_until(&mut events, is_completed).await;

    let reconnected = seen
        .iter()
        .position(|e| {
            e.payload
                == EventPayload::StatusChanged {
                    from: DeviceStatus::Disconnected,
                    to: DeviceStatus::Ready,
                }
        })
        .expect("DISCONNECTED -> READY event");
    let completed = seen.len() - 1;
    assert!(reconnected < completed);

    match &seen[completed].payload {
        EventPayload::JobCompleted {
            job_id,
            document,
            attempts,
        } => {
            assert_eq!(*job_id, job.id);
            assert_eq!(document, "ENTRY_TICKET");
            assert_eq!(*attempts, 1);
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // Nothing else completes afterwards
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!events.drain().iter().any(is_completed));
    assert_eq!(printer.jobs(), vec![job.payload.to_vec()]);
    assert_eq!(service.queue_status().pending, 0);

    service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_queue_survives_disconnect_in_order() {
    let (service, printer, _events) = start_offline();

    let first = service
        .print(DocumentKind::EntryTicket, &entry_fields("T-00001"))
        .unwrap();
    let payment = service
        .print(DocumentKind::PaymentReceipt, &payment_fields("T-00002"))
        .unwrap();
    let second = service
        .print(DocumentKind::EntryTicket, &entry_fields("T-00003"))
        .unwrap();

    // Several reconnect polls fail; nothing is lost meanwhile
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(service.queue_status().pending, 3);
    assert!(printer.connect_attempts() >= 4);

    printer.set_online(true);
    timeout(Duration::from_secs(60), printer.wait_for_jobs(3))
        .await
        .unwrap();

    assert_eq!(
        printer.jobs(),
        vec![
            payment.payload.to_vec(),
            first.payload.to_vec(),
            second.payload.to_vec()
        ]
    );
    service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retry_ceiling_then_abandon_once() {
    let (service, printer, mut events) = start(PrinterConfig::default());
    wait_for_status(&service, DeviceStatus::Ready).await;

    printer.fail_next_writes(3, io::ErrorKind::Other);
    let job = service
        .print(DocumentKind::PaymentReceipt, &payment_fields("T-00099"))
        .unwrap();

    let seen = events_until(&mut events, |e| {
        matches!(e.payload, EventPayload::JobAbandoned { .. })
    })
    .await;

    let retries: Vec<(u32, u64)> = seen
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::JobRetryScheduled {
                job_id,
                attempts,
                retry_in_ms,
                ..
            } if *job_id == job.id => Some((*attempts, *retry_in_ms)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(1, 1000), (2, 2000)]);

    let abandoned = seen.last().unwrap();
    assert!(abandoned.is_error());
    assert!(matches!(
        &abandoned.payload,
        EventPayload::JobAbandoned { job_id, attempts: 3, .. } if *job_id == job.id
    ));

    // Never tried a fourth time
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(printer.write_attempts(), 3);
    assert_eq!(printer.job_count(), 0);
    assert!(
        !events
            .drain()
            .iter()
            .any(|e| matches!(e.payload, EventPayload::JobAbandoned { .. }))
    );

    let abandoned = service.abandoned_jobs();
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].state, JobState::Abandoned);

    // A human re-print is the way forward
    let copy = service.reprint(job.id).unwrap();
    assert_ne!(copy.id, job.id);
    timeout(Duration::from_secs(60), printer.wait_for_jobs(1))
        .await
        .unwrap();
    assert_eq!(printer.jobs(), vec![job.payload.to_vec()]);

    service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_mid_send_reconnects_and_retries() {
    let (service, printer, mut events) = start(PrinterConfig::default());
    wait_for_status(&service, DeviceStatus::Ready).await;

    printer.fail_next_writes(1, io::ErrorKind::BrokenPipe);
    let job = service
        .print(DocumentKind::EntryTicket, &entry_fields("T-00099"))
        .unwrap();

    let seen = events_until(&mut events, is_completed).await;
    assert!(seen.iter().any(|e| e.payload
        == EventPayload::StatusChanged {
            from: DeviceStatus::Busy,
            to: DeviceStatus::Disconnected,
        }));
    assert!(matches!(
        &seen.last().unwrap().payload,
        EventPayload::JobCompleted { attempts: 2, job_id, .. } if *job_id == job.id
    ));
    assert_eq!(printer.connect_attempts(), 2);

    service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_backoff_does_not_block_worker() {
    let (service, printer, mut events) = start(PrinterConfig {
        backoff_base_ms: 30_000,
        backoff_cap_ms: 30_000,
        ..PrinterConfig::default()
    });
    wait_for_status(&service, DeviceStatus::Ready).await;

    printer.fail_next_writes(1, io::ErrorKind::Other);
    let ticket = service
        .print(DocumentKind::EntryTicket, &entry_fields("T-00001"))
        .unwrap();
    events_until(&mut events, |e| {
        matches!(e.payload, EventPayload::JobRetryScheduled { .. })
    })
    .await;

    // Commands are answered during the 30 s backoff
    let report = timeout(Duration::from_secs(1), service.test_connection())
        .await
        .expect("answered during backoff")
        .unwrap();
    assert_eq!(report.connected.target, "mock://printer");

    // A HIGH job goes out ahead of the waiting ticket
    let payment = service
        .print(DocumentKind::PaymentReceipt, &payment_fields("T-00002"))
        .unwrap();
    timeout(Duration::from_secs(1), printer.wait_for_jobs(1))
        .await
        .expect("printed during backoff");
    assert_eq!(printer.jobs(), vec![payment.payload.to_vec()]);
    assert_eq!(service.pending_jobs()[0].id, ticket.id);
    assert_eq!(service.pending_jobs()[0].attempts, 1);

    timeout(Duration::from_secs(60), printer.wait_for_jobs(2))
        .await
        .unwrap();
    assert_eq!(
        printer.jobs(),
        vec![payment.payload.to_vec(), ticket.payload.to_vec()]
    );
    service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_paper_out_pauses_without_spending_attempts() {
    let (transport, printer) = MockTransport::new();
    printer.set_paper_out(true);
    let service = PrinterService::start(PrinterConfig::default(), transport, DeviceEventBus::new());
    wait_for_status(&service, DeviceStatus::OutOfConsumable).await;

    let job = service
        .print(DocumentKind::PaymentReceipt, &payment_fields("T-00099"))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(service.get_status(), DeviceStatus::OutOfConsumable);
    assert_eq!(printer.job_count(), 0);
    assert_eq!(service.pending_jobs()[0].attempts, 0);

    printer.set_paper_out(false);
    timeout(Duration::from_secs(60), printer.wait_for_jobs(1))
        .await
        .unwrap();
    assert_eq!(printer.jobs(), vec![job.payload.to_vec()]);
    assert!(service.abandoned_jobs().is_empty());

    service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_paper_running_out_mid_queue() {
    let (service, printer, _events) = start(PrinterConfig::default());
    wait_for_status(&service, DeviceStatus::Ready).await;

    printer.set_paper_out(true);
    service
        .print(DocumentKind::EntryTicket, &entry_fields("T-00001"))
        .unwrap();
    wait_for_status(&service, DeviceStatus::OutOfConsumable).await;

    let pending = service.pending_jobs();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 0);

    printer.set_paper_out(false);
    timeout(Duration::from_secs(60), printer.wait_for_jobs(1))
        .await
        .unwrap();
    service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fault_reports_error_and_recovers() {
    let (transport, printer) = MockTransport::new();
    printer.set_fault(true);
    let bus = DeviceEventBus::new();
    let mut events = bus.subscribe();
    let service = PrinterService::start(PrinterConfig::default(), transport, bus);

    let seen = events_until(&mut events, |e| {
        matches!(e.payload, EventPayload::DeviceError { .. })
    })
    .await;
    assert_eq!(seen.last().unwrap().device_kind, parkpos_core::DeviceKind::Printer);
    wait_for_status(&service, DeviceStatus::Error).await;

    printer.set_fault(false);
    wait_for_status(&service, DeviceStatus::Ready).await;
    service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unplugged_while_idle_is_detected() {
    let (service, printer, _events) = start(PrinterConfig::default());
    wait_for_status(&service, DeviceStatus::Ready).await;

    printer.set_online(false);
    wait_for_status(&service, DeviceStatus::Disconnected).await;

    printer.set_online(true);
    wait_for_status(&service, DeviceStatus::Ready).await;
    service.shutdown().await.unwrap();
}
