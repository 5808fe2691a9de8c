//! End-to-end tests over real TCP sockets.
//!
//! Each test starts a supervisor with an in-memory store, binds a device to
//! an ephemeral port on 127.0.0.1 and plays the instrument side.

use labgate_core::{DeviceRecord, SessionStatus};
use labgate_network::{ChannelNotifier, NoopNotifier, SessionSettings, Supervisor};
use labgate_protocol::{OutboundFrame, ParamPair};
use labgate_storage::MemoryLabStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const DEVICE: &str = "Analyzer";

fn device(verify_checksum: bool) -> DeviceRecord {
    let mut record = DeviceRecord::new(DEVICE, "0", "127.0.0.1");
    record.machine_id = Some("M1".to_string());
    record.verify_checksum = Some(verify_checksum);
    record
}

fn store(record: DeviceRecord) -> Arc<MemoryLabStore> {
    Arc::new(
        MemoryLabStore::new().with_device(record).with_params(
            "M1",
            vec![
                ParamPair::new("WBC", "WBC_LIS"),
                ParamPair::new("HGB", "HGB_LIS"),
            ],
        ),
    )
}

async fn running(store: Arc<MemoryLabStore>) -> (Supervisor<MemoryLabStore>, TcpStream) {
    let supervisor = Supervisor::new(
        store,
        Arc::new(NoopNotifier),
        SessionSettings::default()
            .read_timeout(Duration::from_millis(150))
            .stop_timeout(Duration::from_secs(2)),
    );
    supervisor.reload().await.unwrap();

    let outcome = supervisor.start(DEVICE).await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.state, SessionStatus::Running);

    let addr = supervisor.local_addr(DEVICE).expect("listener address");
    let client = TcpStream::connect(addr).await.unwrap();
    (supervisor, client)
}

async fn read_byte(client: &mut TcpStream) -> u8 {
    let mut byte = [0u8; 1];
    timeout(Duration::from_secs(5), client.read_exact(&mut byte))
        .await
        .expect("reply timeout")
        .unwrap();
    byte[0]
}

async fn wait_for_results(store: &MemoryLabStore, count: usize) {
    timeout(Duration::from_secs(5), async {
        while store.write_count() < count {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("results were not stored in time");
}

#[tokio::test]
async fn test_framed_transmission_is_acked_and_stored() {
    let store = store(device(false));
    let (supervisor, mut client) = running(Arc::clone(&store)).await;

    client.write_all(&[0x05]).await.unwrap();
    assert_eq!(read_byte(&mut client).await, 0x06);

    let records = [
        "H|\\^&|||ANALYZER|||||||P|1",
        "P|1",
        "O|1|778||^^^CBC|R",
        "R|1|^^^WBC^^conc|5.6|10*3/uL||N||F",
        "R|2|^^^HGB|13.1|g/dL||N||F",
        "L|1|N",
    ];
    for (i, record) in records.iter().enumerate() {
        let frame = OutboundFrame::new(((i + 1) % 8) as u8, &format!("{record}\r"));
        client.write_all(frame.as_bytes()).await.unwrap();
        assert_eq!(read_byte(&mut client).await, 0x06, "frame {i}");
    }
    client.write_all(&[0x04]).await.unwrap();

    wait_for_results(&store, 2).await;
    assert_eq!(
        store.result("778", "WBC_LIS").unwrap().result.as_deref(),
        Some("5.6")
    );
    assert_eq!(
        store.result("778", "HGB_LIS").unwrap().machine_id.as_deref(),
        Some("M1")
    );

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_hl7_block_gets_accept_message() {
    let store = store(device(false));
    let (supervisor, mut client) = running(Arc::clone(&store)).await;

    client
        .write_all(
            b"\x0bMSH|^~\\&|DEV|LAB|LIS|HOSP|20240101120000||ORU^R01|CTRL9|P|2.3\r\
              PID|||778||\r\
              OBX|1|NM|WBC^White Cell Count||5.6|\r\x1c\r",
        )
        .await
        .unwrap();

    let mut reply = Vec::new();
    timeout(Duration::from_secs(5), async {
        while !reply.ends_with(b"\x1c\r") {
            reply.push(read_byte(&mut client).await);
        }
    })
    .await
    .expect("no accept message");

    let reply = String::from_utf8(reply).unwrap();
    assert!(reply.starts_with("MSH|^~\\&|LIS|HOSPITAL|DEVICE|HIS|"));
    assert!(reply.contains("|ACK^R01|CTRL9|P|2.3\rMSA|AA|CTRL9\x1c\r"));

    wait_for_results(&store, 1).await;
    assert!(store.result("778", "WBC_LIS").is_some());

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_plain_text_flushed_after_quiet_period() {
    let store = store(device(false));
    let (supervisor, mut client) = running(Arc::clone(&store)).await;

    client
        .write_all(b"DATE: 2024-01-01\nSAMPLEID: 778\nWBC 5.6\n")
        .await
        .unwrap();

    wait_for_results(&store, 1).await;
    assert_eq!(
        store.result("778", "WBC_LIS").unwrap().result.as_deref(),
        Some("5.6")
    );

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_strict_checksum_naks_corrupt_frame() {
    let store = store(device(true));
    let (supervisor, mut client) = running(Arc::clone(&store)).await;

    let mut corrupt = OutboundFrame::new(1, "H|\\^&\r").as_bytes().to_vec();
    let n = corrupt.len();
    corrupt[n - 4] = if corrupt[n - 4] == b'0' { b'1' } else { b'0' };
    client.write_all(&corrupt).await.unwrap();
    assert_eq!(read_byte(&mut client).await, 0x15);

    let good = OutboundFrame::new(1, "H|\\^&\r");
    client.write_all(good.as_bytes()).await.unwrap();
    assert_eq!(read_byte(&mut client).await, 0x06);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_connections_are_served_in_sequence() {
    let store = store(device(false));
    let (supervisor, first) = running(Arc::clone(&store)).await;
    drop(first);

    let addr = supervisor.local_addr(DEVICE).unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    second.write_all(&[0x05]).await.unwrap();
    assert_eq!(read_byte(&mut second).await, 0x06);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_stop_with_client_attached() {
    let store = store(device(false));
    let (supervisor, _client) = running(store).await;

    let outcome = timeout(Duration::from_secs(5), supervisor.stop(DEVICE))
        .await
        .expect("stop took too long");
    assert!(outcome.success);
    assert_eq!(supervisor.status(DEVICE), SessionStatus::Stopped);
    assert!(!supervisor.is_running(DEVICE));
}

#[tokio::test]
async fn test_port_in_use_fails_start_and_alerts() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut record = DeviceRecord::new(DEVICE, port.to_string(), "127.0.0.1");
    record.machine_id = Some("M1".to_string());
    let (notifier, mut alerts) = ChannelNotifier::new(4);
    let supervisor = Supervisor::new(
        store(record),
        Arc::new(notifier),
        SessionSettings::default(),
    );
    supervisor.reload().await.unwrap();

    let outcome = supervisor.start(DEVICE).await;
    assert!(!outcome.success);
    assert_eq!(outcome.state, SessionStatus::Stopped);
    assert_eq!(supervisor.active_count(), 0);

    let alert = alerts.recv().await.unwrap();
    assert_eq!(alert.machine_id, "M1");
}
