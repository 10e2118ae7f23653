//! Socket-level tests for the manager client against a scripted peer.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use amimon_ami_core::{ChannelState, Error, ManagerClient, ManagerConfig};

const BANNER: &str = "Asterisk Call Manager/5.0.2\r\n";
const LOGIN_OK: &str = "Response: Success\r\nMessage: Authentication accepted\r\n\r\n";

async fn read_action(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Option<String> {
    let mut name = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            return name;
        }
        if let Some(value) = trimmed.strip_prefix("Action:") {
            name = Some(value.trim().to_string());
        }
    }
}

fn test_config(port: u16) -> ManagerConfig {
    ManagerConfig::new("127.0.0.1", port, "reporting", "secret")
        .with_response_timeout(Duration::from_millis(500))
        .with_query_deadline(Duration::from_millis(500))
}

#[tokio::test]
async fn login_and_channel_query() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(BANNER.as_bytes()).await.unwrap();

        assert_eq!(read_action(&mut reader).await.as_deref(), Some("Login"));
        write.write_all(LOGIN_OK.as_bytes()).await.unwrap();

        assert_eq!(
            read_action(&mut reader).await.as_deref(),
            Some("CoreShowChannels")
        );
        write
            .write_all(
                b"Response: Success\r\nEventList: start\r\n\r\n\
                  Event: CoreShowChannel\r\nChannel: PJSIP/101-0001\r\n\
                  ChannelStateDesc: Up\r\nDuration: 00:00:10\r\nContext: from-internal\r\n\r\n\
                  Event: CoreShowChannel\r\nChannel: PJSIP/westtrunk-0002\r\n\
                  ChannelStateDesc: Ringing\r\nDuration: 00:00:11\r\nContext: from-pstn\r\n\r\n\
                  Event: CoreShowChannelsComplete\r\nListItems: 2\r\n\r\n",
            )
            .await
            .unwrap();
    });

    let mut client = ManagerClient::new(test_config(port));
    client.connect().await.unwrap();
    client.login().await.unwrap();
    assert!(client.is_logged_in());

    let channels = client.channels().await;
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].channel, "PJSIP/101-0001");
    assert_eq!(channels[0].state, ChannelState::Up);
    assert_eq!(channels[1].duration, 11);

    server.await.unwrap();
}

#[tokio::test]
async fn rejected_login_is_an_auth_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(BANNER.as_bytes()).await.unwrap();
        read_action(&mut reader).await;
        write
            .write_all(b"Response: Error\r\nMessage: Authentication failed\r\n\r\n")
            .await
            .unwrap();
    });

    let mut client = ManagerClient::new(test_config(port));
    client.connect().await.unwrap();
    match client.login().await {
        Err(Error::Auth(message)) => assert_eq!(message, "Authentication failed"),
        other => panic!("expected auth error, got {other:?}"),
    }
    assert!(!client.is_logged_in());
}

#[tokio::test]
async fn silent_peer_yields_empty_partial_result() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(BANNER.as_bytes()).await.unwrap();
        read_action(&mut reader).await;
        write.write_all(LOGIN_OK.as_bytes()).await.unwrap();
        // Swallow the channel query and say nothing until the client
        // gives up.
        read_action(&mut reader).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = ManagerClient::new(test_config(port));
    client.connect().await.unwrap();
    client.login().await.unwrap();

    let channels = client.channels().await;
    assert!(channels.is_empty());
    // A timeout is a partial result, not a connection failure.
    assert!(client.is_logged_in());
}

#[tokio::test]
async fn missing_sentinel_returns_partial_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(BANNER.as_bytes()).await.unwrap();
        read_action(&mut reader).await;
        write.write_all(LOGIN_OK.as_bytes()).await.unwrap();
        read_action(&mut reader).await;
        write
            .write_all(
                b"Event: CoreShowChannel\r\nChannel: PJSIP/101-0001\r\n\
                  ChannelStateDesc: Up\r\nDuration: 5\r\n\r\n",
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = ManagerClient::new(test_config(port));
    client.connect().await.unwrap();
    client.login().await.unwrap();

    let channels = client.channels().await;
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].duration, 5);
}

#[tokio::test]
async fn closed_connection_forces_relogin() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(BANNER.as_bytes()).await.unwrap();
        read_action(&mut reader).await;
        write.write_all(LOGIN_OK.as_bytes()).await.unwrap();
        read_action(&mut reader).await;
        // Hang up mid-query.
        drop(write);
        drop(reader);
    });

    let mut client = ManagerClient::new(test_config(port));
    client.connect().await.unwrap();
    client.login().await.unwrap();

    let channels = client.channels().await;
    assert!(channels.is_empty());
    assert!(!client.is_logged_in());
}

#[tokio::test]
async fn connect_refused_is_a_connection_error() {
    // Bind-then-drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut client = ManagerClient::new(test_config(port));
    match client.connect().await {
        Err(Error::Connection(_)) | Err(Error::Timeout(_)) => {}
        other => panic!("expected connection failure, got {other:?}"),
    }
}

#[tokio::test]
async fn presence_dump_parses_command_output() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(BANNER.as_bytes()).await.unwrap();
        read_action(&mut reader).await;
        write.write_all(LOGIN_OK.as_bytes()).await.unwrap();
        assert_eq!(read_action(&mut reader).await.as_deref(), Some("Command"));
        write
            .write_all(
                b"Response: Success\r\nMessage: Command output follows\r\n\
                  Output: /CustomPresence/101              : available\r\n\
                  Output: /CustomPresence/102              : lunch\r\n\
                  Output: 2 results found.\r\n\r\n",
            )
            .await
            .unwrap();
    });

    let mut client = ManagerClient::new(test_config(port));
    client.connect().await.unwrap();
    client.login().await.unwrap();

    let dump = client.presence_dump().await;
    assert_eq!(dump.len(), 2);
    assert_eq!(dump[0].extension, "101");
    assert_eq!(dump[1].label, "lunch");
}

#[tokio::test]
async fn event_listener_receives_presence_updates() {
    use amimon_ami_core::EventListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(BANNER.as_bytes()).await.unwrap();
        assert_eq!(read_action(&mut reader).await.as_deref(), Some("Login"));
        write.write_all(LOGIN_OK.as_bytes()).await.unwrap();
        assert_eq!(read_action(&mut reader).await.as_deref(), Some("Events"));
        write
            .write_all(b"Response: Success\r\nEvents: On\r\n\r\n")
            .await
            .unwrap();
        // An unrelated event first, then the presence change.
        write
            .write_all(
                b"Event: Newchannel\r\nChannel: PJSIP/101-0003\r\n\r\n\
                  Event: UserEvent\r\nUserEvent: CustomPresence\r\n\
                  Key: CustomPresence/102\r\nValue: break\r\n\r\n",
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut events = EventListener::new(test_config(port), Duration::from_secs(2));
    events.connect().await.unwrap();
    assert!(events.is_connected());

    let update = events.next_event().await.unwrap().unwrap();
    assert_eq!(update.extension, "102");
    assert_eq!(update.label, "break");
}
