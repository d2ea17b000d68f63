use std::sync::Arc;
use std::time::Duration;

use melsec_tags::{ClientError, ConnectOptions, ConnectionRegistry, ConnectionState, RegistryConfig};
use melsec_tags_mock::MockPlc;
use tokio::task::JoinSet;
use tokio::time::Instant;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test(start_paused = true)]
async fn concurrent_acquires_share_one_attempt() {
    init_logger();
    let plc = MockPlc::new();
    plc.set_open_delay(Duration::from_millis(100));
    let reg = ConnectionRegistry::new(plc.factory());

    let mut set = JoinSet::new();
    for _ in 0..8 {
        let reg = reg.clone();
        set.spawn(async move { reg.acquire("192.168.8.106", 1281, &ConnectOptions::default()).await });
    }
    let mut conns = Vec::new();
    while let Some(joined) = set.join_next().await {
        conns.push(joined.expect("join").expect("acquire"));
    }

    assert_eq!(plc.engines_created(), 1);
    assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
    assert_eq!(
        reg.get_state("192.168.8.106", 1281).await,
        ConnectionState::Connected
    );
}

#[tokio::test(start_paused = true)]
async fn waiters_share_the_failure() {
    init_logger();
    let plc = MockPlc::new();
    plc.set_open_delay(Duration::from_millis(100));
    plc.refuse_connections("ECONNREFUSED");
    let reg = ConnectionRegistry::new(plc.factory());

    let mut set = JoinSet::new();
    for _ in 0..3 {
        let reg = reg.clone();
        set.spawn(async move { reg.acquire("plc", 1281, &ConnectOptions::default()).await });
    }
    while let Some(joined) = set.join_next().await {
        let err = joined.expect("join").expect_err("refused");
        assert!(
            matches!(err, ClientError::ConnectionError { ref message, .. } if message == "ECONNREFUSED"),
            "{err}"
        );
    }
    assert_eq!(plc.engines_created(), 1);
    assert_eq!(reg.get_state("plc", 1281).await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn failure_then_fresh_attempt() {
    init_logger();
    let plc = MockPlc::new();
    plc.refuse_connections("ECONNREFUSED");
    let reg = ConnectionRegistry::new(plc.factory());

    let err = reg
        .acquire("plc", 1281, &ConnectOptions::default())
        .await
        .expect_err("refused");
    assert!(err.is_connection_failure());
    assert_eq!(reg.get_state("plc", 1281).await, ConnectionState::Disconnected);

    plc.clear_faults();
    let conn = reg
        .acquire("plc", 1281, &ConnectOptions::default())
        .await
        .expect("second attempt");
    assert!(conn.is_connected());
    assert_eq!(plc.engines_created(), 2);
}

#[tokio::test]
async fn synchronous_open_error_frees_endpoint() {
    let plc = MockPlc::new();
    plc.reject_open("no route to host");
    let reg = ConnectionRegistry::new(plc.factory());
    let err = reg
        .acquire("plc", 1281, &ConnectOptions::default())
        .await
        .expect_err("open rejected");
    assert!(err.to_string().contains("no route to host"), "{err}");
    assert_eq!(reg.get_state("plc", 1281).await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn release_then_reacquire_is_a_new_connection() {
    init_logger();
    let plc = MockPlc::new();
    let reg = ConnectionRegistry::new(plc.factory());

    let first = reg
        .acquire("PLC.local", 5000, &ConnectOptions::default())
        .await
        .expect("acquire");
    // ids are case-insensitive on host
    let again = reg
        .acquire("plc.local", 5000, &ConnectOptions::default())
        .await
        .expect("reuse");
    assert!(Arc::ptr_eq(&first, &again));

    reg.release("plc.local", 5000).await;
    assert_eq!(reg.get_state("plc.local", 5000).await, ConnectionState::Disconnected);
    assert!(!first.is_connected());
    assert_eq!(plc.live_connections(), 0);

    let second = reg
        .acquire("plc.local", 5000, &ConnectOptions::default())
        .await
        .expect("reacquire");
    assert_ne!(first.generation(), second.generation());
    assert_eq!(plc.engines_created(), 2);
}

#[tokio::test(start_paused = true)]
async fn release_forces_cleanup_without_close_event() {
    init_logger();
    let plc = MockPlc::new();
    plc.silence_close();
    let reg = ConnectionRegistry::with_config(
        plc.factory(),
        RegistryConfig {
            close_timeout: Duration::from_secs(5),
            ..RegistryConfig::default()
        },
    );
    reg.acquire("plc", 1281, &ConnectOptions::default())
        .await
        .expect("acquire");

    let started = Instant::now();
    reg.release("plc", 1281).await;
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(reg.get_state("plc", 1281).await, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn release_ignores_endpoint_still_connecting() {
    let plc = MockPlc::new();
    plc.stall_connections();
    let reg = ConnectionRegistry::new(plc.factory());
    let opts = ConnectOptions {
        connect_timeout: Some(Duration::from_secs(1)),
        ..ConnectOptions::default()
    };

    let pending = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.acquire("plc", 1281, &opts).await })
    };
    while reg.get_state("plc", 1281).await != ConnectionState::Connecting {
        tokio::task::yield_now().await;
    }
    reg.release("plc", 1281).await;
    assert_eq!(reg.get_state("plc", 1281).await, ConnectionState::Connecting);

    let err = pending.await.expect("join").expect_err("stalled");
    assert!(matches!(err, ClientError::ConnectionTimeout { .. }), "{err}");
    assert_eq!(reg.get_state("plc", 1281).await, ConnectionState::Disconnected);

    // unknown endpoints are a no-op too
    reg.release("other", 1).await;
}

#[tokio::test]
async fn peer_close_is_followed_by_a_fresh_attempt() {
    let plc = MockPlc::new();
    let reg = ConnectionRegistry::new(plc.factory());
    let first = reg
        .acquire("plc", 1281, &ConnectOptions::default())
        .await
        .expect("acquire");
    plc.close_from_peer();
    while reg.get_state("plc", 1281).await != ConnectionState::Disconnected {
        tokio::task::yield_now().await;
    }
    let second = reg
        .acquire("plc", 1281, &ConnectOptions::default())
        .await
        .expect("reacquire");
    assert!(!first.is_connected());
    assert!(second.is_connected());
    assert_eq!(plc.engines_created(), 2);
}

#[tokio::test]
async fn endpoints_snapshot_lists_tracked_connections() {
    let plc = MockPlc::new();
    let reg = ConnectionRegistry::new(plc.factory());
    for port in [5001, 5000] {
        reg.acquire("plc", port, &ConnectOptions::default())
            .await
            .expect("acquire");
    }
    let snapshot = reg.endpoints().await;
    let ids: Vec<_> = snapshot.iter().map(|(id, _)| id.to_string()).collect();
    assert_eq!(ids, ["mcprotocol:plc:5000", "mcprotocol:plc:5001"]);
    assert!(snapshot
        .iter()
        .all(|(_, state)| *state == ConnectionState::Connected));
}

#[tokio::test(start_paused = true)]
async fn joiner_gives_up_after_wait_budget() {
    init_logger();
    let plc = MockPlc::new();
    plc.stall_connections();
    let wait_timeout = Duration::from_secs(2);
    let reg = ConnectionRegistry::with_config(
        plc.factory(),
        RegistryConfig {
            wait_timeout,
            ..RegistryConfig::default()
        },
    );
    let first_opts = ConnectOptions {
        connect_timeout: Some(Duration::from_secs(10)),
        ..ConnectOptions::default()
    };

    let first = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.acquire("plc", 1281, &first_opts).await })
    };
    while reg.get_state("plc", 1281).await != ConnectionState::Connecting {
        tokio::task::yield_now().await;
    }

    let err = reg
        .acquire("plc", 1281, &ConnectOptions::default())
        .await
        .expect_err("joiner times out");
    assert!(
        matches!(err, ClientError::ConnectionTimeout { timeout, .. } if timeout == wait_timeout),
        "{err}"
    );
    assert_eq!(reg.get_state("plc", 1281).await, ConnectionState::Connecting);
    assert_eq!(plc.engines_created(), 1);

    let err = first.await.expect("join").expect_err("first attempt stalls");
    assert!(
        matches!(err, ClientError::ConnectionTimeout { timeout, .. } if timeout == Duration::from_secs(10)),
        "{err}"
    );
}
