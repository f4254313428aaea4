mod common;

use smb_client::client::{OpenOptions, SMBClient, SMBClientConfig};
use smb_client::protocol::body::change_notify::SMBCompletionFilter;
use smb_client::protocol::body::create::{CreateRequestContext, SMBCreateDisposition, SMBLeaseState};
use smb_client::protocol::body::{SMBBody, SMBDialect};
use smb_client::protocol::header::SMBCommandCode;

use common::{init_logging, pattern, MemoryConnector, MemoryServer, StaticAuth, TREE_ID};

async fn connect(server: &MemoryServer, config: SMBClientConfig) -> SMBClient<MemoryConnector, StaticAuth> {
    init_logging();
    SMBClient::connect(server.connector(), StaticAuth, config).await.unwrap()
}

fn open_if(path: &str) -> OpenOptions {
    OpenOptions {
        path: path.into(),
        disposition: SMBCreateDisposition::OpenIf,
        ..Default::default()
    }
}

#[tokio::test]
async fn smb311_session_round_trip() {
    let server = MemoryServer::new(SMBDialect::V3_1_1).with_file("hello.txt", b"hello world".to_vec());
    let client = connect(&server, SMBClientConfig::default()).await;
    let negotiated = client.negotiated().unwrap();
    assert_eq!(negotiated.dialect, SMBDialect::V3_1_1);
    assert_eq!(negotiated.preauth_hash.len(), 64);
    assert!(negotiated.compression.is_empty());
    assert_ne!(client.session_id(), 0);

    let share = client.tree_connect("Data").await.unwrap();
    assert_eq!(share.id(), Some(TREE_ID));
    let again = client.tree_connect("data").await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&share, &again));

    let file = client.open(&share, OpenOptions { path: "hello.txt".into(), ..Default::default() }).await.unwrap();
    assert_eq!(client.read(file, 0, 5).await.unwrap(), b"hello");
    assert_eq!(client.read(file, 6, 100).await.unwrap(), b"world");
    assert!(client.read(file, 11, 10).await.unwrap().is_empty());
    client.echo().await.unwrap();
    client.close(file).await.unwrap();
    assert!(client.read(file, 0, 1).await.is_err());
    client.disconnect().await.unwrap();

    let commands: Vec<SMBCommandCode> = server.seen().iter().map(|s| s.command).collect();
    assert_eq!(commands.first(), Some(&SMBCommandCode::Negotiate));
    assert_eq!(commands.last(), Some(&SMBCommandCode::LogOff));
}

#[tokio::test]
async fn missing_file_reports_its_errno() {
    let server = MemoryServer::new(SMBDialect::V2_1_0);
    let client = connect(&server, SMBClientConfig::default()).await;
    assert_eq!(client.negotiated().unwrap().dialect, SMBDialect::V2_1_0);
    let share = client.tree_connect("data").await.unwrap();
    let error = client.open(&share, OpenOptions { path: "absent".into(), ..Default::default() }).await.unwrap_err();
    assert_eq!(error.errno(), 2);
}

/// An open the client cannot accept is handed back to the server rather than leaked.
#[tokio::test]
async fn open_with_a_foreign_lease_key_is_closed() {
    let server = MemoryServer::new(SMBDialect::V3_1_1).with_file("leased.txt", b"data".to_vec());
    server.grant_foreign_lease_keys();
    let client = connect(&server, SMBClientConfig::default()).await;
    let share = client.tree_connect("data").await.unwrap();
    let options = OpenOptions { path: "leased.txt".into(), lease: Some(SMBLeaseState::full()), ..Default::default() };
    assert!(client.open(&share, options).await.is_err());

    let seen = server.seen();
    let created = seen.iter().filter(|s| s.command == SMBCommandCode::Create).count();
    assert_eq!(created, 1);
    let close = seen.iter().find(|s| s.command == SMBCommandCode::Close).unwrap();
    let SMBBody::CloseRequest(close) = &close.body else { panic!("expected a close") };
    assert_eq!(close.file_id.persistent, 1);
    assert_eq!(server.open_count(), 0);
}

#[tokio::test]
async fn ten_megabyte_write_lands_intact() {
    let server = MemoryServer::new(SMBDialect::V3_1_1);
    let config = SMBClientConfig { signing_disabled: true, ..SMBClientConfig::default() };
    let client = connect(&server, config).await;
    let share = client.tree_connect("data").await.unwrap();
    let file = client.open(&share, open_if("big.bin")).await.unwrap();

    let data = pattern(10 * 1024 * 1024);
    let written = client.write(file, 0, data.clone()).await.unwrap();
    assert_eq!(written, data.len() as u64);
    client.flush(file).await.unwrap();
    assert_eq!(server.file("big.bin").unwrap(), data);

    let back = client.read(file, 0, data.len() as u64).await.unwrap();
    assert_eq!(back.len(), data.len());
    assert!(back == data);
    let writes = server.seen().iter().filter(|s| s.command == SMBCommandCode::Write).count();
    assert!(writes >= 10);
}

#[tokio::test]
async fn short_reads_are_completed_from_the_tail() {
    let contents = pattern(200 * 1024);
    let server = MemoryServer::new(SMBDialect::V3_1_1).with_file("short.bin", contents.clone());
    server.short_reads();
    let client = connect(&server, SMBClientConfig::default()).await;
    let share = client.tree_connect("data").await.unwrap();
    let file = client.open(&share, OpenOptions { path: "short.bin".into(), ..Default::default() }).await.unwrap();

    let back = client.read(file, 0, 300 * 1024).await.unwrap();
    assert_eq!(back.len(), contents.len());
    assert!(back == contents);
    let tail_requests = server.seen().iter().filter(|s| match &s.body {
        SMBBody::ReadRequest(read) => read.read_offset % (64 * 1024) != 0,
        _ => false,
    }).count();
    assert!(tail_requests > 0);
}

/// A write in flight on an alternate channel that dies is resent on a
/// surviving channel, flagged as a replay under a new channel sequence, and
/// the lost alternate is then bound again on a new connection.
#[tokio::test]
async fn writes_on_a_dropped_channel_are_replayed() {
    let server = MemoryServer::new(SMBDialect::V3_1_1);
    let client = connect(&server, SMBClientConfig::default()).await;
    client.add_channel().await.unwrap();
    assert_eq!(client.channel_count(), 2);
    let share = client.tree_connect("data").await.unwrap();
    let file = client.open(&share, open_if("multi.bin")).await.unwrap();

    server.drop_on(2, SMBCommandCode::Write);
    let data = pattern(4 * 1024 * 1024);
    assert_eq!(client.write(file, 0, data.clone()).await.unwrap(), data.len() as u64);
    assert!(server.file("multi.bin").unwrap() == data);

    let rebound = async {
        while client.channel_count() < 2 {
            tokio::task::yield_now().await;
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), rebound).await.unwrap();
    assert_eq!(server.connections(), 3);

    let seen = server.seen();
    let binds: Vec<_> = seen.iter().filter(|s| s.connection > 1 && s.command == SMBCommandCode::SessionSetup).collect();
    assert_eq!(binds.iter().map(|s| s.connection).collect::<Vec<_>>(), vec![2, 3]);
    assert!(binds.iter().all(|s| s.session_id == client.session_id()));
    let replays: Vec<_> = seen.iter().filter(|s| s.command == SMBCommandCode::Write && s.is_replay()).collect();
    assert!(!replays.is_empty());
    assert!(replays.iter().all(|s| s.connection != 2 && s.channel_sequence >= 1));

    // The rebound channel carries I/O.
    client.write(file, 0, pattern(4 * 1024 * 1024)).await.unwrap();
    assert!(server.seen().iter().any(|s| s.connection == 3 && s.command == SMBCommandCode::Write));
}

/// A read lost with its connection is simply read again after the durable open
/// was reclaimed on a new connection.
#[tokio::test]
async fn lost_read_is_reissued_after_reconnect() {
    let contents = pattern(100 * 1024);
    let server = MemoryServer::new(SMBDialect::V3_1_1).with_file("durable.bin", contents.clone());
    let client = connect(&server, SMBClientConfig::default()).await;
    let first_session = client.session_id();
    let share = client.tree_connect("data").await.unwrap();
    let options = OpenOptions { path: "durable.bin".into(), durable: true, ..Default::default() };
    let file = client.open(&share, options).await.unwrap();

    server.drop_on(1, SMBCommandCode::Read);
    let back = client.read(file, 0, contents.len() as u64).await.unwrap();
    assert!(back == contents);
    assert_eq!(server.connections(), 2);
    assert_ne!(client.session_id(), first_session);

    let seen = server.seen();
    let setup = seen.iter().find(|s| s.connection == 2 && s.command == SMBCommandCode::SessionSetup).unwrap();
    let SMBBody::SessionSetupRequest(setup) = &setup.body else { panic!("expected a session setup") };
    assert_eq!(setup.previous_session_id, first_session);
    let reclaim = seen.iter().find(|s| s.connection == 2 && s.command == SMBCommandCode::Create).unwrap();
    let SMBBody::CreateRequest(reclaim) = &reclaim.body else { panic!("expected a create") };
    assert!(reclaim.contexts.iter().any(|c| matches!(c, CreateRequestContext::DurableHandleReconnectV2(_))));
    let reads: Vec<_> = seen.iter().filter(|s| s.command == SMBCommandCode::Read).collect();
    assert_eq!(reads.len(), 2);
    assert!(reads.iter().all(|s| !s.is_replay()));

    // The handle keeps working on the new connection.
    assert_eq!(client.read(file, 0, 4).await.unwrap(), contents[..4]);
}

#[tokio::test]
async fn unsubscribe_cancels_the_pending_notification() {
    let server = MemoryServer::new(SMBDialect::V3_1_1).with_file("dir", Vec::new());
    let client = connect(&server, SMBClientConfig::default()).await;
    let share = client.tree_connect("data").await.unwrap();
    let dir = client.open(&share, OpenOptions { path: "dir".into(), ..Default::default() }).await.unwrap();

    let subscription = client.subscribe(dir, SMBCompletionFilter::FILE_NAME, true).unwrap();
    while !server.seen().iter().any(|s| s.command == SMBCommandCode::ChangeNotify) {
        tokio::task::yield_now().await;
    }
    client.unsubscribe(subscription).await;

    let seen = server.seen();
    assert!(seen.iter().any(|s| s.command == SMBCommandCode::Cancel));
    client.close(dir).await.unwrap();
}

#[tokio::test]
async fn cluster_dialect_refusal_steps_down() {
    let server = MemoryServer::new(SMBDialect::V3_1_1);
    server.refuse_dialect(SMBDialect::V3_1_1);
    let client = connect(&server, SMBClientConfig::default()).await;
    assert_eq!(client.negotiated().unwrap().dialect, SMBDialect::V3_0_2);
    assert_eq!(server.connections(), 2);

    let seen = server.seen();
    let retry = seen.iter().find(|s| s.connection == 2 && s.command == SMBCommandCode::Negotiate).unwrap();
    let SMBBody::NegotiateRequest(retry) = &retry.body else { panic!("expected a negotiate") };
    assert!(!retry.dialects.contains(&SMBDialect::V3_1_1));
}
