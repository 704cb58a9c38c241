use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use vantage_infusion::{CommandSession, Event, EventReceiver, InfusionError, SessionOptions};

struct FakeController {
    lines: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeController {
    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(2), self.lines.read_line(&mut line))
            .await
            .expect("timed out waiting for a command")
            .expect("read failed");
        line
    }

    async fn write(&mut self, bytes: &str) {
        self.writer.write_all(bytes.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }
}

fn session_with(options: SessionOptions) -> (CommandSession, FakeController) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let session = CommandSession::from_stream(client, options).expect("session");
    let (read, writer) = tokio::io::split(server);
    (
        session,
        FakeController {
            lines: BufReader::new(read),
            writer,
        },
    )
}

/// Session whose status preamble has already been consumed
async fn started_session(options: SessionOptions) -> (CommandSession, FakeController) {
    let (session, mut controller) = session_with(options);
    assert_eq!(controller.read_line().await, "STATUS LOAD\n");
    assert_eq!(controller.read_line().await, "STATUS BTN\n");
    (session, controller)
}

async fn next_event(events: &mut EventReceiver) -> Event {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

#[tokio::test]
async fn connect_enables_status_pushes() {
    let (_session, mut controller) = session_with(SessionOptions::default());
    assert_eq!(controller.read_line().await, "STATUS LOAD\n");
    assert_eq!(controller.read_line().await, "STATUS BTN\n");
}

#[tokio::test]
async fn load_push_survives_any_fragmentation() {
    let line = "S:LOAD 54 95\r\n";

    for split in 1..line.len() {
        let (session, mut controller) = started_session(SessionOptions::default()).await;
        let mut events = session.subscribe();

        let (head, tail) = line.split_at(split);
        controller.write(head).await;
        tokio::task::yield_now().await;
        controller.write(tail).await;

        assert_eq!(
            next_event(&mut events).await,
            Event::LoadStatus { vid: 54, level: 95 },
            "split at byte {split}"
        );
    }
}

#[tokio::test]
async fn several_lines_in_one_chunk() {
    let (session, mut controller) = started_session(SessionOptions::default()).await;
    let mut events = session.subscribe();

    controller
        .write("S:BTN 58 PRESS\nGARBAGE LINE\nEL: 99 301 Thermostat.SetIndoorTemperatureSW 21250\nS:LOAD 7 ")
        .await;

    assert_eq!(
        next_event(&mut events).await,
        Event::ButtonStatus {
            vid: 58,
            action: "PRESS".to_string()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        Event::IndoorTemperature {
            vid: 301,
            celsius: 21.25
        }
    );

    controller.write("100\n").await;
    assert_eq!(next_event(&mut events).await, Event::LoadStatus { vid: 7, level: 100 });
}

#[tokio::test]
async fn probe_resolves_only_on_matching_reply() {
    let (session, mut controller) = started_session(SessionOptions::default()).await;
    let session = std::sync::Arc::new(session);
    let mut events = session.subscribe();

    let probe = {
        let session = session.clone();
        tokio::spawn(async move { session.probe_interface_support(2774, 32).await })
    };

    assert_eq!(controller.read_line().await, "INVOKE 2774 Object.IsInterfaceSupported 32\n");

    controller.write("R:INVOKE 2775 1 Object.IsInterfaceSupported 32\n").await;
    controller.write("R:INVOKE 2774 1 Object.IsInterfaceSupported 33\n").await;
    next_event(&mut events).await;
    next_event(&mut events).await;
    assert!(!probe.is_finished(), "probe resolved by a reply for another key");
    assert_eq!(session.pending_probes().await, 1);

    controller.write("R:INVOKE 2774 1 Object.IsInterfaceSupported 32\n").await;
    assert!(probe.await.unwrap().unwrap());
    assert_eq!(session.pending_probes().await, 0);
}

#[tokio::test]
async fn probe_reports_unsupported_flag() {
    let (session, mut controller) = started_session(SessionOptions::default()).await;

    let (result, _) = tokio::join!(session.probe_interface_support(12, 5), async {
        controller.read_line().await;
        controller.write("R:INVOKE 12 0 Object.IsInterfaceSupported 5\n").await;
    });
    assert!(!result.unwrap());
}

#[tokio::test]
async fn probe_times_out_and_is_forgotten() {
    let options = SessionOptions {
        probe_timeout: Some(Duration::from_millis(50)),
        ..SessionOptions::default()
    };
    let (session, mut controller) = started_session(options).await;

    let err = session.probe_interface_support(1, 2).await.unwrap_err();
    assert!(matches!(err, InfusionError::Timeout), "got {err:?}");
    assert_eq!(session.pending_probes().await, 0);
    assert_eq!(controller.read_line().await, "INVOKE 1 Object.IsInterfaceSupported 2\n");
}

#[tokio::test]
async fn set_level_zero_uses_relay_policy() {
    let (session, mut controller) = started_session(SessionOptions::default()).await;

    session.set_load_level(237, 0).unwrap();
    assert_eq!(controller.read_line().await, "INVOKE 237 Load.SetLevel 0\n");

    session.set_load_level(999, 0).unwrap();
    assert_eq!(controller.read_line().await, "INVOKE 999 Load.Ramp 6 1 0\n");

    session.set_load_level(237, 60).unwrap();
    assert_eq!(controller.read_line().await, "INVOKE 237 Load.Ramp 6 1 60\n");

    session.ramp_load_level(12, 30, 4).unwrap();
    assert_eq!(controller.read_line().await, "INVOKE 12 Load.Ramp 6 4 30\n");
}

#[tokio::test]
async fn other_commands_render_on_the_wire() {
    let (session, mut controller) = started_session(SessionOptions::default()).await;

    session.get_load_status(54).unwrap();
    session.get_outdoor_temperature(301).unwrap();
    session.dissolve_hsl(88, 240.0, 75.0, 0.5, 500).unwrap();

    assert_eq!(controller.read_line().await, "GETLOAD 54\n");
    assert_eq!(controller.read_line().await, "INVOKE 301 Thermostat.GetOutdoorTemperature\n");
    assert_eq!(controller.read_line().await, "INVOKE 88 RGBLoad.DissolveHSL 240 75 500 500\n");
}

#[tokio::test]
async fn disconnect_fails_pending_probes() {
    let (session, controller) = started_session(SessionOptions {
        probe_timeout: None,
        ..SessionOptions::default()
    })
    .await;
    let session = std::sync::Arc::new(session);
    let mut events = session.subscribe();

    let probe = {
        let session = session.clone();
        tokio::spawn(async move { session.probe_interface_support(3, 4).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    drop(controller);

    assert_eq!(next_event(&mut events).await, Event::Disconnected);
    assert!(!session.is_connected());
    let err = probe.await.unwrap().unwrap_err();
    assert!(matches!(err, InfusionError::ConnectionClosed), "got {err:?}");

    let err = session.probe_interface_support(3, 4).await.unwrap_err();
    assert!(matches!(err, InfusionError::ConnectionClosed), "got {err:?}");
}

#[tokio::test]
async fn queued_interface_checks_are_timed_from_their_write() {
    const CHECKS: u32 = 100;
    let options = SessionOptions {
        probe_timeout: Some(Duration::from_millis(200)),
        ..SessionOptions::default()
    };
    let (session, mut controller) = started_session(options).await;
    let session = std::sync::Arc::new(session);

    let responder = tokio::spawn(async move {
        for _ in 0..CHECKS {
            let line = controller.read_line().await;
            let fields: Vec<&str> = line.split_whitespace().collect();
            let reply = format!("R:INVOKE {} 1 Object.IsInterfaceSupported {}\n", fields[1], fields[3]);
            controller.write(&reply).await;
        }
        controller
    });

    // Queued together, the last line goes out well after 200ms of pacing
    let checks: Vec<_> = (0..CHECKS)
        .map(|vid| {
            let session = session.clone();
            tokio::spawn(async move { session.probe_interface_support(vid, 7).await })
        })
        .collect();

    let mut supported = 0;
    for check in checks {
        match check.await.unwrap() {
            Ok(true) => supported += 1,
            other => panic!("unexpected result {other:?}"),
        }
    }
    assert_eq!(supported, CHECKS);
    assert_eq!(session.pending_probes().await, 0);
    responder.await.unwrap();
}

#[tokio::test]
async fn state_commands_are_spaced_by_command_pacing() {
    let options = SessionOptions {
        command_pacing: Duration::from_millis(50),
        ..SessionOptions::default()
    };
    let (session, mut controller) = started_session(options).await;

    let start = tokio::time::Instant::now();
    session.set_load_level(10, 40).unwrap();
    session.set_load_level(11, 60).unwrap();

    assert_eq!(controller.read_line().await, "INVOKE 10 Load.Ramp 6 1 40\n");
    assert_eq!(controller.read_line().await, "INVOKE 11 Load.Ramp 6 1 60\n");
    assert!(start.elapsed() >= Duration::from_millis(50), "second command after {:?}", start.elapsed());
}

#[tokio::test]
async fn interface_checks_pause_before_writing() {
    let options = SessionOptions {
        probe_pacing: Duration::from_millis(50),
        probe_timeout: Some(Duration::from_millis(100)),
        ..SessionOptions::default()
    };
    let (session, mut controller) = started_session(options).await;

    let start = tokio::time::Instant::now();
    let (result, (line, elapsed)) = tokio::join!(session.probe_interface_support(5, 6), async {
        let line = controller.read_line().await;
        let elapsed = start.elapsed();
        controller.write("R:INVOKE 5 0 Object.IsInterfaceSupported 6\n").await;
        (line, elapsed)
    });

    assert!(!result.unwrap());
    assert_eq!(line, "INVOKE 5 Object.IsInterfaceSupported 6\n");
    assert!(elapsed >= Duration::from_millis(50), "interface check written after {elapsed:?}");
}
