//! Integration tests for the console client against a live socket
//!
//! Every test binds a mock console endpoint on a loopback port and drives
//! the registry over real TCP.

use console::mock::MockConsole;
use console::{BusyPolicy, ConnectionRegistry, ConsoleConfig, ConsoleError, Credential};
use protocol::PacketType;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_console(console: MockConsole) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(console.listen(listener));
    addr
}

async fn connect(registry: &ConnectionRegistry, instance: &str, addr: SocketAddr) {
    registry
        .connect(instance, "127.0.0.1", addr.port(), Credential::new("secret"))
        .await
        .unwrap();
}

/// History entry as an HTTP client sees it
#[derive(Deserialize)]
struct HistoryView {
    command: String,
    response: String,
    failed: bool,
    timestamp: u64,
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn connect_execute_disconnect() {
        let console = MockConsole::new("secret").respond("saveworld", "World Saved");
        let addr = spawn_console(console.clone()).await;
        let registry = ConnectionRegistry::new(ConsoleConfig::default());

        connect(&registry, "island", addr).await;
        assert!(registry.is_connected("island").await);

        let response = registry.execute("island", "saveworld").await.unwrap();
        assert_eq!(response, "World Saved");

        assert!(registry.disconnect("island").await);
        assert!(!registry.is_connected("island").await);
        assert_eq!(console.commands().await, vec!["saveworld"]);

        let history = registry.history().get("island").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].response, "World Saved");
    }

    #[tokio::test]
    async fn rejected_password_is_distinct_from_unreachable() {
        let addr = spawn_console(MockConsole::new("secret")).await;
        let registry = ConnectionRegistry::new(ConsoleConfig::default());

        let rejected = registry
            .connect("island", "127.0.0.1", addr.port(), Credential::new("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(rejected, ConsoleError::Authentication { .. }));

        // Bind then drop to get a port nobody listens on
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = closed.local_addr().unwrap().port();
        drop(closed);

        let unreachable = registry
            .connect("ragnarok", "127.0.0.1", dead_port, Credential::new("secret"))
            .await
            .unwrap_err();
        assert!(matches!(unreachable, ConsoleError::Connection { .. }));
        assert!(rejected.to_string().contains("rejected"));
        assert!(unreachable.to_string().contains("cannot reach"));
        assert!(registry.connected_instances().await.is_empty());
    }

    #[tokio::test]
    async fn silent_listener_times_out_connect() {
        // Accepts the TCP connection but never answers the login
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let config = ConsoleConfig::default().with_connect_timeout(Duration::from_millis(200));
        let registry = ConnectionRegistry::new(config);

        let err = registry
            .connect("island", "127.0.0.1", port, Credential::new("secret"))
            .await
            .unwrap_err();

        assert!(matches!(err, ConsoleError::ConnectTimeout { .. }));
        assert!(err.to_string().contains("did not answer"));
        assert!(!registry.is_connected("island").await);
    }

    #[tokio::test]
    async fn disconnect_never_connected_instance() {
        let registry = ConnectionRegistry::new(ConsoleConfig::default());

        assert!(!registry.is_connected("ghost").await);
        assert!(!registry.disconnect("ghost").await);
        assert!(!registry.is_connected("ghost").await);
    }

    #[tokio::test]
    async fn broken_session_recovers_after_reconnect() {
        let console = MockConsole::new("secret").silent("cheat slomo 0");
        let addr = spawn_console(console).await;
        let config = ConsoleConfig::default().with_command_timeout(Duration::from_millis(200));
        let registry = ConnectionRegistry::new(config);
        connect(&registry, "island", addr).await;

        let err = registry.execute("island", "cheat slomo 0").await.unwrap_err();
        assert!(matches!(err, ConsoleError::ExecutionTimeout { .. }));
        let err = registry.execute("island", "saveworld").await.unwrap_err();
        assert!(matches!(err, ConsoleError::SessionBroken { .. }));

        connect(&registry, "island", addr).await;
        assert!(registry.execute("island", "saveworld").await.is_ok());
    }

    #[tokio::test]
    async fn history_serializes_for_api_clients() {
        let console = MockConsole::new("secret")
            .respond("listplayers", "No Players Connected\n")
            .hang_up_on("doexit");
        let addr = spawn_console(console).await;
        let registry = ConnectionRegistry::new(ConsoleConfig::default());
        connect(&registry, "island", addr).await;

        registry.execute("island", "listplayers").await.unwrap();
        registry.execute("island", "doexit").await.unwrap_err();

        let json = serde_json::to_string(&registry.history().get("island").await).unwrap();
        let views: Vec<HistoryView> = serde_json::from_str(&json).unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].command, "listplayers");
        assert_eq!(views[0].response, "No Players Connected\n");
        assert!(!views[0].failed);
        assert!(views[1].failed);
        assert!(views[1].timestamp >= views[0].timestamp);
    }
}

/// RESPONSE REASSEMBLY TESTS
mod reassembly_tests {
    use super::*;

    #[tokio::test]
    async fn fragmented_response_is_reassembled() {
        let dinos: String = (0..400)
            .map(|n| format!("{}. Dodo, Lvl {}\n", n, n % 150))
            .collect();
        let console = MockConsole::new("secret")
            .respond("listdinos", &dinos)
            .fragment_size(500);
        let addr = spawn_console(console).await;
        let registry = ConnectionRegistry::new(ConsoleConfig::default());
        connect(&registry, "island", addr).await;

        let response = registry.execute("island", "listdinos").await.unwrap();

        assert_eq!(response, dinos);
    }

    #[tokio::test]
    async fn characters_cut_between_fragments_survive() {
        let chat: String = (0..300)
            .map(|n| format!("Überlebender {}: café ☕ bien reçu\n", n))
            .collect();
        let console = MockConsole::new("secret")
            .respond("getchat", &chat)
            .fragment_size(333)
            .split_mid_char();
        let addr = spawn_console(console).await;
        let registry = ConnectionRegistry::new(ConsoleConfig::default());
        connect(&registry, "island", addr).await;

        let response = registry.execute("island", "getchat").await.unwrap();

        assert_eq!(response, chat);
        assert!(!response.contains('\u{fffd}'));
    }

    #[tokio::test]
    async fn trickled_bytes_are_buffered_into_frames() {
        let console = MockConsole::new("secret")
            .respond("getchat", "Rex: hello there\nDodo: hi\n")
            .trickle(3);
        let addr = spawn_console(console).await;
        let registry = ConnectionRegistry::new(ConsoleConfig::default());
        connect(&registry, "island", addr).await;

        let response = registry.execute("island", "getchat").await.unwrap();

        assert_eq!(response, "Rex: hello there\nDodo: hi\n");
    }

    #[tokio::test]
    async fn full_size_fragments_followed_by_tail() {
        let body = "z".repeat(protocol::MAX_FRAGMENT_BODY * 2 + 17);
        let console = MockConsole::new("secret").respond("listplayers", &body);
        let addr = spawn_console(console).await;
        let registry = ConnectionRegistry::new(ConsoleConfig::default());
        connect(&registry, "island", addr).await;

        let response = registry.execute("island", "listplayers").await.unwrap();
        assert_eq!(response.len(), body.len());
    }
}

/// CONCURRENCY TESTS
mod concurrency_tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_commands_never_interleave_on_the_wire() {
        let mut console = MockConsole::new("secret").trickle(7);
        for n in 0..16 {
            console = console.respond(&format!("broadcast {}", n), &format!("sent {}", n));
        }
        let addr = spawn_console(console.clone()).await;
        let config = ConsoleConfig::default().with_busy_policy(BusyPolicy::Queue);
        let registry = Arc::new(ConnectionRegistry::new(config));
        connect(&registry, "island", addr).await;

        let mut handles = Vec::new();
        for n in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let response = registry
                    .execute("island", &format!("broadcast {}", n))
                    .await
                    .unwrap();
                assert_eq!(response, format!("sent {}", n));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Each complete command frame is directly followed by its own probe
        let requests = console.received().await;
        assert_eq!(requests[0].kind, PacketType::Auth);
        let exchanges = &requests[1..];
        assert_eq!(exchanges.len(), 32);
        for pair in exchanges.chunks(2) {
            assert!(pair[0].body.starts_with("broadcast "));
            assert!(pair[1].body.is_empty());
            assert_eq!(pair[1].id, pair[0].id + 1);
        }

        let history = registry.history().get("island").await;
        assert_eq!(history.len(), 16);
        let issued: Vec<&str> = exchanges
            .chunks(2)
            .map(|pair| pair[0].body.as_str())
            .collect();
        let recorded: Vec<&str> = history.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(issued, recorded);
    }

    #[tokio::test]
    async fn instances_run_independently() {
        let slow = MockConsole::new("secret").slow("saveworld", Duration::from_millis(300));
        let fast = MockConsole::new("secret");
        let slow_addr = spawn_console(slow).await;
        let fast_addr = spawn_console(fast).await;

        let registry = Arc::new(ConnectionRegistry::new(ConsoleConfig::default()));
        connect(&registry, "island", slow_addr).await;
        connect(&registry, "ragnarok", fast_addr).await;

        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.execute("island", "saveworld").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        registry.execute("ragnarok", "listplayers").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));

        assert!(pending.await.unwrap().is_ok());
        assert_eq!(
            registry.connected_instances().await,
            vec!["island", "ragnarok"]
        );
    }
}

/// STATUS AND PORT TOOLING TESTS
mod tooling_tests {
    use instances::{
        parse_player_list, parse_status, suggest_assignment, validate_all, LifecycleState,
        PortAssignment,
    };
    use serde::Deserialize;

    /// Status payload as the dashboard reads it
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct StatusView {
        status: String,
        pid: Option<u32>,
        online_players: u32,
        max_players: u32,
        server_name: Option<String>,
    }

    #[test]
    fn status_text_drives_lifecycle_state() {
        let running = " Server running:   Yes\n Server PID:   1200\n Server listening:   Yes\nServer Name: Island - (v358.24)\nSteam Players: 3 / 70\n";
        let status = parse_status(running, 10);
        assert_eq!(status.state, LifecycleState::Running);
        assert_eq!((status.online_players, status.max_players), (3, 70));

        let stopped = " Server running:   No\nSteam Players: 3 / 70\n";
        assert_eq!(parse_status(stopped, 10).state, LifecycleState::Stopped);
    }

    #[test]
    fn status_json_shape() {
        let running = " Server running:   Yes\n Server PID:   1200\n Server listening:   Yes\nServer Name: Island - (v358.24)\nSteam Players: 3 / 70\n";
        let json = serde_json::to_string(&parse_status(running, 10)).unwrap();
        let view: StatusView = serde_json::from_str(&json).unwrap();

        assert_eq!(view.status, "running");
        assert_eq!(view.pid, Some(1200));
        assert_eq!((view.online_players, view.max_players), (3, 70));
        assert!(view.server_name.is_some());

        let json = serde_json::to_string(&parse_status(" Server running:   No\n", 70)).unwrap();
        assert!(!json.contains("pid"));
        let view: StatusView = serde_json::from_str(&json).unwrap();
        assert_eq!(view.status, "stopped");
        assert_eq!(view.pid, None);
    }

    #[test]
    fn players_from_console_output() {
        let players = parse_player_list("0. Rex, 76561198000000001\n1. Dodo, 76561198000000002\n");
        let names: Vec<&str> = players.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Rex", "Dodo"]);
    }

    #[test]
    fn suggested_ports_pass_validation() {
        let mut fleet: Vec<PortAssignment> = vec![
            "island:7778:27015:32330".parse().unwrap(),
            "ragnarok:7779:27016:32331".parse().unwrap(),
        ];

        let mut suggestion = suggest_assignment(&fleet).unwrap();
        suggestion.instance = "scorched".to_string();
        fleet.push(suggestion);

        assert!(validate_all(&fleet).valid);
    }
}
