//! Integration tests for the matchgate broker
//!
//! These tests drive the matchmaker the way the socket handlers do:
//! - Playlist selection and team formation for live session sockets
//! - Assignment results and the join/lock-out sequence
//! - Direct deployments that point tickets at persisted records
//! - Administrative record operations and the cleanup reaper

mod fixtures;

use chrono::Duration;
use fixtures::{ticket, TestSystem};
use matchgate::admin::{CreateSessionRequest, SessionAdmin};
use matchgate::cleanup::SessionReaper;
use matchgate::config::{CleanupSettings, MatchmakingSettings};
use matchgate::gateway::session_socket;
use matchgate::protocol::AssignResult;
use matchgate::session::SessionState;
use matchgate::store::SessionStore;
use matchgate::types::SelectionOutcome;
use matchgate::utils::current_timestamp;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_empty_region_selects_queued_playlist() {
    let system = TestSystem::new();
    system.persist("s1", "NAE", "").await;
    let mut server = system.connect_session("s1", "NAE");
    let mut parties = vec![
        system.queue_party(&["a"], "NAE", "solo"),
        system.queue_party(&["b"], "NAE", "solo"),
        system.queue_party(&["c"], "NAE", "solo"),
    ];

    let outcome = assert_ok!(system.matchmaker.try_admit("s1").await);
    assert_eq!(outcome, Some(SelectionOutcome::selected("solo")));

    let messages = server.drain();
    let names: Vec<&str> = messages
        .iter()
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Registered", "AssignMatch"]);
    let teams = messages[1]["payload"]["teams"].as_array().unwrap();
    assert_eq!(teams.len(), 3);

    for party in parties.iter_mut() {
        assert_eq!(party.drain_names(), vec!["StatusUpdate:SessionAssignment"]);
    }

    let record = system.store.get_session("s1").await.unwrap().unwrap();
    assert_eq!(record.playlist, "solo");
    assert!(system.store.find_player("s1", "b").await.unwrap().is_some());

    let handle = system.matchmaker.sessions().get("s1").unwrap().unwrap();
    assert_eq!(handle.state, SessionState::Assigning);

    println!("✅ Empty region selection test passed");
}

#[tokio::test]
async fn test_served_playlist_below_capacity_waits() {
    let system = TestSystem::new();
    system.persist("s1", "NAE", "").await;
    system.persist("s2", "NAE", "duos").await;
    let _server = system.connect_session("s1", "NAE");

    let accounts: Vec<String> = (0..48).map(|i| format!("player{}", i)).collect();
    let _parties: Vec<_> = accounts
        .iter()
        .map(|id| system.queue_party(&[id.as_str()], "NAE", "duos"))
        .collect();

    let outcome = assert_ok!(system.matchmaker.try_admit("s1").await);
    assert_eq!(outcome, Some(SelectionOutcome::waiting()));

    let handle = system.matchmaker.sessions().get("s1").unwrap().unwrap();
    assert_eq!(handle.state, SessionState::Idle);
    assert!(handle.teams.is_empty());
}

#[tokio::test]
async fn test_failed_assignment_is_retried_without_reconnecting() {
    let system = TestSystem::new();
    system.persist("s1", "NAE", "").await;
    let mut server = system.connect_session("s1", "NAE");
    let _a = system.queue_party(&["a"], "NAE", "solo");
    let _b = system.queue_party(&["b"], "NAE", "solo");

    let first = system.matchmaker.try_admit("s1").await.unwrap();
    assert_eq!(first, Some(SelectionOutcome::selected("solo")));

    assert_ok!(session_socket::handle_text(
        &system.matchmaker,
        "s1",
        &server.connection,
        r#"{"name":"AssignMatchResult","payload":{"result":"failed"}}"#,
    ));

    let handle = system.matchmaker.sessions().get("s1").unwrap().unwrap();
    assert_eq!(handle.state, SessionState::Idle);
    assert!(handle.teams.is_empty());
    server.drain();

    let second = system.matchmaker.try_admit("s1").await.unwrap();
    assert_eq!(second, Some(SelectionOutcome::selected("solo")));
    let names: Vec<String> = server
        .drain()
        .iter()
        .filter_map(|m| m["name"].as_str().map(str::to_string))
        .collect();
    assert_eq!(names, vec!["AssignMatch"]);

    // The retry does not record the same players twice
    let players = system.store.players_in_session("s1").await.unwrap();
    assert_eq!(players.len(), 2);
}

#[tokio::test]
async fn test_ready_assignment_plays_tickets_and_locks_session() {
    let system = TestSystem::new();
    system.persist("s1", "NAE", "").await;
    let _server = system.connect_session("s1", "NAE");
    let mut a = system.queue_party(&["a"], "NAE", "solo");
    let mut b = system.queue_party(&["b", "c"], "NAE", "solo");
    let mut other = system.queue_party(&["z"], "NAE", "duos");

    system.matchmaker.try_admit("s1").await.unwrap();
    a.drain();
    b.drain();

    let task = system
        .matchmaker
        .on_assign_result("s1", AssignResult::Ready)
        .unwrap()
        .expect("ready spawns the join task");
    let notified = task.await.unwrap().unwrap();
    assert_eq!(notified, 2);

    for peer in [&mut a, &mut b] {
        let messages = peer.drain();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["name"], "Play");
        assert_eq!(messages[0]["payload"]["sessionId"], "s1");
    }
    assert!(other.drain().is_empty());

    let handle = system.matchmaker.sessions().get("s1").unwrap().unwrap();
    assert_eq!(handle.state, SessionState::Locked);
    assert!(!handle.is_sending);

    // A locked session is never admitted again
    assert_eq!(system.matchmaker.try_admit("s1").await.unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_ticks_admit_once() {
    let system = TestSystem::with_settings(MatchmakingSettings {
        assign_settle_ms: 100,
        ..MatchmakingSettings::without_delays()
    });
    system.persist("s1", "NAE", "").await;
    let mut server = system.connect_session("s1", "NAE");
    let _a = system.queue_party(&["a"], "NAE", "solo");
    let _b = system.queue_party(&["b"], "NAE", "solo");

    let first = system.matchmaker.clone();
    let second = system.matchmaker.clone();
    let (left, right) = tokio::join!(first.try_admit("s1"), second.try_admit("s1"));
    let outcomes = [left.unwrap(), right.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);
    let assignments = server
        .drain()
        .iter()
        .filter(|m| m["name"] == "AssignMatch")
        .count();
    assert_eq!(assignments, 1);
    assert_eq!(system.matchmaker.stats().unwrap().admissions_skipped, 1);
}

#[tokio::test]
async fn test_replacing_a_session_connection_closes_the_old_one() {
    let system = TestSystem::new();
    let old = system.connect_session("s1", "NAE");
    let _new = system.connect_session("s1", "NAE");

    assert!(old.connection.is_closed());
    assert_eq!(system.matchmaker.sessions().len().unwrap(), 1);
}

#[tokio::test]
async fn test_direct_mode_points_ticket_at_open_record() {
    let system = TestSystem::direct();
    let mut record = system.persist("s1", "NAE", "solo").await;
    record.accessible = true;
    record.available = true;
    system.store.save_session(record).await.unwrap();

    let (handle, mut peer) = ticket(&["a", "b"], "NAE", "solo");
    let position = assert_ok!(system.matchmaker.queue().join(&handle).await);
    assert_eq!(position.last_sent, 1);

    assert_eq!(
        peer.drain_names(),
        vec![
            "StatusUpdate:Connecting",
            "StatusUpdate:Waiting",
            "StatusUpdate:Queued",
            "StatusUpdate:SessionAssignment",
            "Play",
        ]
    );
    let player = system.store.find_player("s1", "a").await.unwrap().unwrap();
    assert_eq!(player.team, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_admin_record_lifecycle() {
    let system = TestSystem::new();
    let admin = SessionAdmin::new(system.matchmaker.clone());

    let record = assert_ok!(
        admin
            .create_session(CreateSessionRequest {
                playlist: "solo".to_string(),
                region: "NAE".to_string(),
                version: "1.0".to_string(),
                server_addr: "10.0.0.1".to_string(),
                server_port: 7777,
                ..CreateSessionRequest::default()
            })
            .await
    );
    assert!(record.accessible);
    assert!(!record.available);

    let mut a = system.queue_party(&["a"], "NAE", "solo");
    let mut b = system.queue_party(&["b"], "NAE", "solo");

    let playlist = assert_ok!(admin.playlist(&record.session_id).await);
    assert_eq!(playlist.status, "OK");
    assert_eq!(a.drain_names(), vec!["StatusUpdate:SessionAssignment"]);
    b.drain();

    let assignment = assert_ok!(admin.player_in_session(&record.session_id, "a").await);
    assert_eq!(assignment.session_id, record.session_id);

    let started = assert_ok!(admin.start_session(&record.session_id).await);
    assert_eq!(started, 2);
    assert_eq!(a.drain_names(), vec!["Play"]);

    let closed = assert_ok!(admin.close_session(&record.session_id).await);
    assert_eq!(closed, 2);
    assert_eq!(b.drain_names(), vec!["Play", "StatusUpdate:Queued"]);

    assert_ok!(admin.delete_session(&record.session_id).await);
    assert!(admin.start_session(&record.session_id).await.is_err());
}

#[tokio::test]
async fn test_reaper_retires_abandoned_records() {
    let system = TestSystem::new();
    system.persist("fresh", "NAE", "solo").await;
    let mut stale = system.persist("stale", "NAE", "solo").await;
    stale.last_updated = current_timestamp() - Duration::hours(2);
    system.store.save_session(stale).await.unwrap();

    let reaper = SessionReaper::new(
        system.store.clone(),
        system.matchmaker.sessions().clone(),
        CleanupSettings::default(),
    );

    // Occupied and live, so the empty rule does not apply
    let _server = system.connect_session("fresh", "NAE");
    let mut fresh = system.store.get_session("fresh").await.unwrap().unwrap();
    fresh.public_players = vec!["a".to_string()];
    system.store.save_session(fresh).await.unwrap();

    let report = assert_ok!(reaper.sweep().await);
    assert_eq!(report.examined, 2);
    assert_eq!(report.stale, 1);
    assert_eq!(report.removed(), 1);

    assert!(system.store.get_session("stale").await.unwrap().is_none());
    assert!(system.store.get_session("fresh").await.unwrap().is_some());
}

#[tokio::test]
async fn test_ticket_leave_updates_queue_size() {
    let system = TestSystem::new();
    let (first, mut first_peer) = ticket(&["a"], "NAE", "solo");
    let (second, _second_peer) = ticket(&["b"], "NAE", "solo");
    let queue = system.matchmaker.queue();

    let mut position = queue.join(&first).await.unwrap();
    queue.join(&second).await.unwrap();
    first_peer.drain();

    assert!(queue.poll(&first, &mut position).await.unwrap());
    assert_eq!(position.last_sent, 2);

    assert!(queue.leave(second.connection_id()).unwrap());
    assert!(!queue.leave(second.connection_id()).unwrap());
    assert!(queue.poll(&first, &mut position).await.unwrap());
    assert_eq!(position.last_sent, 1);

    let sizes: Vec<u64> = first_peer
        .drain()
        .iter()
        .filter_map(|m| m["payload"]["queuedPlayers"].as_u64())
        .collect();
    assert_eq!(sizes, vec![2, 1]);
}
