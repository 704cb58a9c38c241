use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use vantage_infusion::{ConfigSession, InfusionError, GET_BACKUP_REQUEST, GET_INTERFACES_REQUEST};

const INTERFACES: &str = "\u{feff}<IIntrospection><GetInterfaces><return>\
    <Interface><Name>Load</Name><IID>12</IID></Interface>\
    <Interface><Name>RGBLoad</Name><IID>34</IID></Interface>\
    <Interface><Name>Thermostat</Name><IID>56</IID></Interface>\
    </return></GetInterfaces></IIntrospection>\n";

const PROJECT: &str = "<Project><Objects><Object><Load VID=\"101\"><Name>Kitchen</Name>\
    <LoadType>Incandescent</LoadType></Load></Object></Objects></Project>";

fn backup_response(project: &str) -> String {
    format!(
        "<IBackup><GetFile><return><?File Encode=\"Base64\" /{}?></return></GetFile></IBackup>\n",
        general_purpose::STANDARD.encode(project)
    )
}

async fn read_request(reader: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a request")
        .unwrap();
    line
}

/// Serves the interface catalog in `chunks` pieces, then the backup if asked
async fn serve(server: DuplexStream, chunks: usize) -> Vec<String> {
    let (read, mut write) = tokio::io::split(server);
    let mut reader = BufReader::new(read);
    let mut requests = vec![read_request(&mut reader).await];

    let step = INTERFACES.len().div_ceil(chunks);
    let bytes = INTERFACES.as_bytes();
    for piece in bytes.chunks(step) {
        write.write_all(piece).await.unwrap();
        write.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let next = read_request(&mut reader).await;
    if next == GET_BACKUP_REQUEST {
        let response = backup_response(PROJECT);
        let (a, b) = response.split_at(response.len() / 2);
        write.write_all(a.as_bytes()).await.unwrap();
        write.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        write.write_all(b.as_bytes()).await.unwrap();
        write.flush().await.unwrap();
    }
    requests.push(next);

    // Wait for the client to hang up
    let mut rest = Vec::new();
    let _ = reader.read_to_end(&mut rest).await;
    requests
}

#[tokio::test]
async fn downloads_project_and_caches_it() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("vantage.dc");
    let dump = dir.path().join("interfaces.json");

    let (client, server) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(serve(server, 1));

    let outcome = ConfigSession::new(false, &cache)
        .with_interface_dump(&dump)
        .run_over(client)
        .await
        .unwrap();

    assert!(!outcome.from_cache);
    assert_eq!(outcome.project_xml, PROJECT);
    assert_eq!(outcome.interfaces.get("Thermostat"), Some(56));
    assert_eq!(std::fs::read_to_string(&cache).unwrap(), PROJECT);

    let dumped: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&dump).unwrap()).unwrap();
    assert_eq!(dumped["Load"], 12);

    let requests = server.await.unwrap();
    assert_eq!(requests, vec![GET_INTERFACES_REQUEST.to_string(), GET_BACKUP_REQUEST.to_string()]);
}

#[tokio::test]
async fn chunked_catalog_matches_single_chunk() {
    let dir = tempfile::tempdir().unwrap();

    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(serve(server, 1));
    let whole = ConfigSession::new(false, dir.path().join("a.dc"))
        .run_over(client)
        .await
        .unwrap();

    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(serve(server, 3));
    let chunked = ConfigSession::new(false, dir.path().join("b.dc"))
        .run_over(client)
        .await
        .unwrap();

    assert_eq!(whole.interfaces, chunked.interfaces);
    assert_eq!(chunked.interfaces.len(), 3);
    assert_eq!(whole.project_xml, chunked.project_xml);
}

#[tokio::test]
async fn cached_project_skips_backup_request() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("vantage.dc");
    std::fs::write(&cache, PROJECT).unwrap();

    let (client, server) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(serve(server, 2));

    let outcome = ConfigSession::new(true, &cache).run_over(client).await.unwrap();
    assert!(outcome.from_cache);
    assert_eq!(outcome.project_xml, PROJECT);
    assert_eq!(outcome.interfaces.get("Load"), Some(12));

    let requests = server.await.unwrap();
    assert_eq!(requests[0], GET_INTERFACES_REQUEST);
    assert!(requests[1].is_empty(), "unexpected request {:?}", requests[1]);
}

#[tokio::test]
async fn cache_is_ignored_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("vantage.dc");
    std::fs::write(&cache, "<Project><Objects/></Project>").unwrap();

    let (client, server) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(serve(server, 1));

    let outcome = ConfigSession::new(false, &cache).run_over(client).await.unwrap();
    assert!(!outcome.from_cache);
    assert_eq!(outcome.project_xml, PROJECT);
    assert_eq!(server.await.unwrap()[1], GET_BACKUP_REQUEST);
}

#[tokio::test]
async fn truncated_response_is_connection_closed() {
    let dir = tempfile::tempdir().unwrap();
    let (client, server) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server);
        let mut reader = BufReader::new(read);
        read_request(&mut reader).await;
        write.write_all(&INTERFACES.as_bytes()[..50]).await.unwrap();
        write.flush().await.unwrap();
    });

    let err = ConfigSession::new(false, dir.path().join("x.dc"))
        .run_over(client)
        .await
        .unwrap_err();
    assert!(matches!(err, InfusionError::ConnectionClosed), "got {err:?}");
}
