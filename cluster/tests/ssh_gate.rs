use std::time::Duration;

use cluster::{LaunchError, SshGate};
use tokio::{net::TcpListener, time::Instant};
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_millis(100);

/// Every loopback address shares the port the first listener got.
async fn listeners(hosts: &[&str]) -> (Vec<TcpListener>, u16) {
    let first = TcpListener::bind((hosts[0], 0)).await.unwrap();
    let port = first.local_addr().unwrap().port();

    let mut all = vec![first];
    for host in &hosts[1..] {
        all.push(TcpListener::bind((*host, port)).await.unwrap());
    }
    (all, port)
}

fn gate(port: u16, timeout: Duration) -> SshGate {
    SshGate::default()
        .with_port(port)
        .with_interval(INTERVAL)
        .with_timeout(timeout)
}

#[tokio::test]
async fn returns_once_all_hosts_accept() {
    let hosts = ["127.0.0.1", "127.0.0.2", "127.0.0.3"];
    let (_listeners, port) = listeners(&hosts).await;

    let start = Instant::now();
    let res = gate(port, Duration::from_secs(5))
        .wait(hosts, &CancellationToken::new())
        .await;
    tokio_test::assert_ok!(res);
    assert!(start.elapsed() < 2 * INTERVAL);
}

#[tokio::test]
async fn waits_for_late_host() {
    let (_listeners, port) = listeners(&["127.0.0.1"]).await;

    let server = tokio::spawn(async move {
        tokio::time::sleep(INTERVAL).await;
        let list = TcpListener::bind(("127.0.0.2", port)).await.unwrap();
        // Keep accepting until the test is done.
        loop {
            let _ = list.accept().await;
        }
    });

    let res = gate(port, Duration::from_secs(5))
        .wait(["127.0.0.1", "127.0.0.2"], &CancellationToken::new())
        .await;
    server.abort();
    tokio_test::assert_ok!(res);
}

#[tokio::test]
async fn unreachable_host_times_out_within_window() {
    let (_listeners, port) = listeners(&["127.0.0.1"]).await;
    let timeout = Duration::from_millis(500);

    let start = Instant::now();
    let err = gate(port, timeout)
        .wait(["127.0.0.1", "127.0.0.9"], &CancellationToken::new())
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    match err {
        LaunchError::SshTimeout { pending, timeout: t } => {
            assert_eq!(pending, ["127.0.0.9"]);
            assert_eq!(t, timeout);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(elapsed >= timeout);
    assert!(elapsed <= timeout + INTERVAL + Duration::from_millis(250));
}

#[tokio::test]
async fn ipv6_literals_use_the_gate_port() {
    // Hosts without an ipv6 loopback can't run this.
    let Ok(list) = TcpListener::bind("[::1]:0").await else {
        return;
    };
    let port = list.local_addr().unwrap().port();

    let res = gate(port, Duration::from_secs(5))
        .wait(["::1"], &CancellationToken::new())
        .await;
    tokio_test::assert_ok!(res);
}

#[tokio::test]
async fn cancellation_interrupts_the_wait() {
    let (_listeners, port) = listeners(&["127.0.0.1"]).await;
    let token = CancellationToken::new();

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(INTERVAL).await;
        trigger.cancel();
    });

    let err = gate(port, Duration::from_secs(30))
        .wait(["127.0.0.9"], &token)
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::Interrupted));
}

#[tokio::test]
async fn empty_host_list_passes() {
    let gate = SshGate::default();
    let hosts: [&str; 0] = [];
    tokio_test::assert_ok!(gate.wait(hosts, &CancellationToken::new()).await);
}
