mod common;

use std::sync::Arc;
use std::time::Duration;

use anonafrica_client_core::config::ClientConfig;
use anonafrica_client_core::error::MediaError;
use anonafrica_client_core::media::retry::TERMINAL_BANNER;
use anonafrica_client_core::scheduler::ManualScheduler;
use anonafrica_client_core::session::state::{
    PARTNER_DISCONNECTED_TEXT, PARTNER_SKIPPED_TEXT, TRANSPORT_ERROR_TEXT,
};
use anonafrica_client_core::session::video::PEER_SETUP_TEXT;
use anonafrica_client_core::session::{MatchState, SessionDescriptor, VideoChat, VideoChatHandle};
use anonafrica_client_core::transport::mock::{
    MockConnection, MockDialer, MockMediaDevices, MockPeerFactory, PeerCall,
};
use anonafrica_client_core::transport::signaling::{LinkState, SignalingMessage};
use anonafrica_client_core::transport::webrtc::{
    IceCandidate, MediaKind, PeerEvent, RemoteTrack, SessionDescription,
};
use common::{descriptor, eventually, mock_context, nth_connection, settle};

struct Harness {
    dialer: MockDialer,
    scheduler: ManualScheduler,
    media: MockMediaDevices,
    peers: MockPeerFactory,
    handle: VideoChatHandle,
}

impl Harness {
    fn mount(media: MockMediaDevices) -> Self {
        Self::mount_with(media, descriptor(Some("ET"), "RW"))
    }

    fn mount_with(media: MockMediaDevices, descriptor: SessionDescriptor) -> Self {
        Self::mount_parts(media, MockPeerFactory::new(), descriptor)
    }

    fn mount_parts(
        media: MockMediaDevices,
        peers: MockPeerFactory,
        descriptor: SessionDescriptor,
    ) -> Self {
        let dialer = MockDialer::new();
        let scheduler = ManualScheduler::new();
        let ctx = mock_context(ClientConfig::default(), descriptor, &dialer, &scheduler);
        let handle = VideoChat::start(ctx, Arc::new(media.clone()), Arc::new(peers.clone()));
        Self {
            dialer,
            scheduler,
            media,
            peers,
            handle,
        }
    }

    /// Mount, wait for signaling and complete the handshake.
    async fn open(&self, index: usize) -> MockConnection {
        let connection = nth_connection(&self.dialer, index).await;
        connection.open();
        settle().await;
        connection
    }

    async fn matched(&self, connection: &MockConnection, initiator: bool) {
        connection.deliver_message(&SignalingMessage::Matched { initiator });
        eventually(
            || self.handle.snapshot().state == MatchState::Matched,
            "matched",
        )
        .await;
    }
}

#[test_timeout::tokio_timeout_test]
async fn answers_an_offer_through_the_peer_session() {
    let h = Harness::mount(MockMediaDevices::new());
    let connection = h.open(0).await;
    h.matched(&connection, false).await;
    assert_eq!(h.handle.snapshot().status, "Connected to a stranger.");
    assert!(h.handle.snapshot().local_media);

    connection.deliver(r#"{"type":"offer","sdp":"remote-offer"}"#);
    eventually(|| !connection.sent().is_empty(), "answer sent").await;

    let peer = h.peers.peer(0);
    assert_eq!(peer.media_label(), "mock-media-1");
    assert_eq!(
        peer.calls(),
        vec![
            PeerCall::SetRemote(SessionDescription::offer("remote-offer")),
            PeerCall::CreateAnswer,
            PeerCall::SetLocal(SessionDescription::answer("mock-answer-1")),
        ]
    );
    assert_eq!(
        connection.sent_messages(),
        vec![SignalingMessage::Answer {
            sdp: "mock-answer-1".into()
        }]
    );
    // Only the initiator schedules an offer.
    assert_eq!(h.scheduler.pending(), 0);
}

#[test_timeout::tokio_timeout_test]
async fn initiator_offers_after_the_delay() {
    let h = Harness::mount(MockMediaDevices::new());
    let connection = h.open(0).await;
    h.matched(&connection, true).await;
    assert_eq!(h.scheduler.pending_delays(), vec![Duration::from_secs(2)]);

    h.scheduler.advance(Duration::from_millis(1999));
    settle().await;
    assert!(connection.sent().is_empty());

    h.scheduler.advance(Duration::from_millis(1));
    eventually(|| !connection.sent().is_empty(), "offer sent").await;
    assert_eq!(
        connection.sent_messages(),
        vec![SignalingMessage::Offer {
            sdp: "mock-offer-1".into()
        }]
    );

    connection.deliver(r#"{"type":"answer","sdp":"remote-answer"}"#);
    let peer = h.peers.peer(0);
    eventually(|| peer.calls().len() == 3, "answer applied").await;
    assert_eq!(
        peer.calls(),
        vec![
            PeerCall::CreateOffer,
            PeerCall::SetLocal(SessionDescription::offer("mock-offer-1")),
            PeerCall::SetRemote(SessionDescription::answer("remote-answer")),
        ]
    );
}

#[test_timeout::tokio_timeout_test]
async fn early_candidates_are_applied_after_the_offer() {
    let h = Harness::mount(MockMediaDevices::new());
    let connection = h.open(0).await;
    h.matched(&connection, false).await;

    connection.deliver(
        r#"{"type":"candidate","candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.9 4000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#,
    );
    settle().await;
    let peer = h.peers.peer(0);
    assert!(peer.calls().is_empty());

    connection.deliver(r#"{"type":"offer","sdp":"remote-offer"}"#);
    eventually(|| !connection.sent().is_empty(), "answer sent").await;

    let early = IceCandidate {
        candidate: "candidate:1 1 udp 1 10.0.0.9 4000 typ host".into(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    };
    assert_eq!(
        peer.calls(),
        vec![
            PeerCall::SetRemote(SessionDescription::offer("remote-offer")),
            PeerCall::AddCandidate(early),
            PeerCall::CreateAnswer,
            PeerCall::SetLocal(SessionDescription::answer("mock-answer-1")),
        ]
    );

    connection.deliver(r#"{"type":"candidate","candidate":"candidate:2"}"#);
    eventually(|| peer.calls().len() == 5, "late candidate applied").await;
    assert_eq!(
        peer.calls()[4],
        PeerCall::AddCandidate(IceCandidate::new("candidate:2"))
    );
}

#[test_timeout::tokio_timeout_test]
async fn local_candidates_go_out_once_signaling_is_open() {
    let h = Harness::mount(MockMediaDevices::new());
    let connection = nth_connection(&h.dialer, 0).await;
    let peer = h.peers.peer(0);

    assert!(peer.emit(PeerEvent::LocalCandidate(IceCandidate::new("candidate:early"))));
    settle().await;
    assert!(connection.sent().is_empty());

    connection.open();
    settle().await;
    assert!(peer.emit(PeerEvent::LocalCandidate(IceCandidate::new("candidate:late"))));
    eventually(|| !connection.sent().is_empty(), "candidate sent").await;
    assert_eq!(
        connection.sent_messages(),
        vec![SignalingMessage::Candidate {
            candidate: IceCandidate::new("candidate:late")
        }]
    );
}

#[test_timeout::tokio_timeout_test]
async fn remote_stream_is_set_from_the_first_track() {
    let h = Harness::mount(MockMediaDevices::new());
    let connection = h.open(0).await;
    h.matched(&connection, false).await;
    let peer = h.peers.peer(0);
    let track = |id: &str, kind| {
        PeerEvent::RemoteTrack(RemoteTrack {
            stream_id: "partner".into(),
            track_id: id.into(),
            kind,
            handle: None,
        })
    };

    peer.emit(track("v", MediaKind::Video));
    peer.emit(track("a", MediaKind::Audio));
    peer.emit(track("a", MediaKind::Audio));
    eventually(
        || {
            h.handle
                .snapshot()
                .remote
                .is_some_and(|remote| remote.tracks.len() == 2)
        },
        "remote stream attached",
    )
    .await;
    settle().await;
    let remote = h.handle.snapshot().remote.unwrap();
    assert_eq!(remote.stream_id, "partner");
    assert!(remote.has(MediaKind::Audio) && remote.has(MediaKind::Video));
}

#[test_timeout::tokio_timeout_test]
async fn media_failures_retry_then_give_up() {
    let media = MockMediaDevices::new();
    media.fail_always(MediaError::PermissionDenied("camera blocked".into()));
    let h = Harness::mount(media);

    let mut banners = Vec::new();
    eventually(|| h.handle.snapshot().banner.is_some(), "first banner").await;
    banners.push(h.handle.snapshot().banner.unwrap());
    for _ in 0..3 {
        let previous = banners.last().cloned();
        h.scheduler.advance(Duration::from_secs(1));
        eventually(
            || h.handle.snapshot().banner != previous,
            "banner after retry",
        )
        .await;
        banners.push(h.handle.snapshot().banner.unwrap());
    }

    assert_eq!(
        banners,
        vec![
            "We had an error. Retrying... (attempt 2 of 3)",
            "We had an error. Retrying... (attempt 3 of 3)",
            "We had an error. Retrying... (attempt 4 of 3)",
            TERMINAL_BANNER,
        ]
    );
    assert_eq!(h.media.attempts(), 4);
    assert_eq!(h.scheduler.pending(), 0);

    h.scheduler.advance(Duration::from_secs(10));
    settle().await;
    assert_eq!(h.media.attempts(), 4);
    assert_eq!(h.dialer.dial_count(), 0);
    assert_eq!(h.peers.created(), 0);
}

#[test_timeout::tokio_timeout_test]
async fn transient_media_failure_recovers() {
    let media = MockMediaDevices::new();
    media.fail_next(2, MediaError::Unavailable("device busy".into()));
    let h = Harness::mount(media);

    eventually(|| h.handle.snapshot().banner.is_some(), "first banner").await;
    h.scheduler.advance(Duration::from_secs(1));
    eventually(
        || {
            h.handle.snapshot().banner.as_deref()
                == Some("We had an error. Retrying... (attempt 3 of 3)")
        },
        "second banner",
    )
    .await;
    h.scheduler.advance(Duration::from_secs(1));
    nth_connection(&h.dialer, 0).await;
    settle().await;

    assert_eq!(h.media.attempts(), 3);
    assert_eq!(h.media.held(), 1);
    assert_eq!(h.handle.snapshot().banner, None);
    assert_eq!(h.peers.peer(0).media_label(), "mock-media-3");
}

#[test_timeout::tokio_timeout_test]
async fn skip_tears_down_and_reopens_after_the_delay() {
    let h = Harness::mount(MockMediaDevices::new());
    let first = h.open(0).await;
    h.matched(&first, true).await;
    h.peers.peer(0).emit(PeerEvent::RemoteTrack(RemoteTrack {
        stream_id: "partner".into(),
        track_id: "v".into(),
        kind: MediaKind::Video,
        handle: None,
    }));
    eventually(|| h.handle.snapshot().remote.is_some(), "remote attached").await;
    assert_eq!(h.media.held(), 1);

    h.handle.skip();
    eventually(|| first.is_closed(), "first link closed").await;
    let snapshot = h.handle.snapshot();
    assert!(h.peers.peer(0).is_closed());
    assert_eq!(h.media.held(), 0);
    assert_eq!(snapshot.state, MatchState::Searching);
    assert_eq!(snapshot.remote, None);
    assert!(!snapshot.local_media);
    assert_eq!(snapshot.status, "Finding someone from 🇷🇼 Rwanda...");
    // The pending initiator offer is gone; only the reopen timer remains.
    assert_eq!(h.scheduler.pending_delays(), vec![Duration::from_secs(1)]);

    h.scheduler.advance(Duration::from_millis(999));
    settle().await;
    assert_eq!(h.dialer.dial_count(), 1);

    h.scheduler.advance(Duration::from_millis(1));
    let second = nth_connection(&h.dialer, 1).await;
    assert_eq!(second.url(), first.url());
    assert_eq!(h.peers.created(), 2);
    assert_eq!(h.media.held(), 1);
    assert_eq!(h.media.attempts(), 2);
    assert_eq!(first.closed_events(), 1);
    assert!(h.peers.peer(0).calls().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn partner_leaving_restarts_the_cycle() {
    let h = Harness::mount(MockMediaDevices::new());
    let first = h.open(0).await;

    // Not matched yet: nothing to tear down.
    first.deliver(r#"{"type":"partner_disconnected"}"#);
    settle().await;
    assert!(!first.is_closed());

    h.matched(&first, false).await;
    first.deliver(r#"{"type":"partner_disconnected"}"#);
    eventually(
        || h.handle.snapshot().state == MatchState::PartnerLeft,
        "partner left",
    )
    .await;
    assert_eq!(h.handle.snapshot().status, PARTNER_DISCONNECTED_TEXT);
    assert!(first.is_closed());
    assert!(h.peers.peer(0).is_closed());
    assert_eq!(h.media.held(), 0);

    h.scheduler.advance(Duration::from_secs(1));
    let second = h.open(1).await;
    assert_eq!(h.handle.snapshot().state, MatchState::Searching);

    h.matched(&second, false).await;
    second.deliver(r#"{"type":"partner_skipped"}"#);
    eventually(
        || h.handle.snapshot().status == PARTNER_SKIPPED_TEXT,
        "partner skipped",
    )
    .await;
    assert_eq!(h.media.held(), 0);
}

#[test_timeout::tokio_timeout_test]
async fn unclassifiable_frames_are_dropped() {
    let h = Harness::mount(MockMediaDevices::new());
    let connection = h.open(0).await;

    connection.deliver("Matched with a stranger!");
    connection.deliver(r#"{"type":"chat","text":"hello"}"#);
    connection.deliver(r#"{"type":"teleport"}"#);
    settle().await;
    assert_eq!(h.handle.snapshot().state, MatchState::Searching);
    assert!(!connection.is_closed());

    h.matched(&connection, false).await;
}

#[test_timeout::tokio_timeout_test]
async fn negotiation_errors_leave_the_session_running() {
    let h = Harness::mount(MockMediaDevices::new());
    let connection = h.open(0).await;
    h.matched(&connection, false).await;
    h.peers.peer(0).reject_remote_descriptions();

    connection.deliver(r#"{"type":"offer","sdp":"bad"}"#);
    settle().await;
    assert!(connection.sent().is_empty());
    assert_eq!(h.handle.snapshot().state, MatchState::Matched);
    assert_eq!(h.handle.snapshot().banner, None);

    h.handle.skip();
    eventually(|| h.scheduler.pending() == 1, "reopen scheduled").await;
    h.scheduler.advance(Duration::from_secs(1));
    nth_connection(&h.dialer, 1).await;
}

#[test_timeout::tokio_timeout_test]
async fn transport_errors_show_a_banner_without_redialing() {
    let h = Harness::mount(MockMediaDevices::new());
    let connection = nth_connection(&h.dialer, 0).await;
    connection.fail("connection refused");
    eventually(
        || h.handle.snapshot().banner.as_deref() == Some(TRANSPORT_ERROR_TEXT),
        "transport banner",
    )
    .await;

    h.scheduler.advance(Duration::from_secs(30));
    settle().await;
    assert_eq!(h.dialer.dial_count(), 1);
    assert_eq!(connection.state(), LinkState::Closed);
    // Media stays held until the user skips or stops.
    assert_eq!(h.media.held(), 1);
}

#[test_timeout::tokio_timeout_test]
async fn server_hang_up_shows_the_banner_until_skip() {
    let h = Harness::mount(MockMediaDevices::new());
    let first = h.open(0).await;
    h.matched(&first, false).await;

    first.hang_up();
    eventually(
        || h.handle.snapshot().banner.as_deref() == Some(TRANSPORT_ERROR_TEXT),
        "hang-up banner",
    )
    .await;
    assert_eq!(first.closed_events(), 1);
    h.scheduler.advance(Duration::from_secs(30));
    settle().await;
    assert_eq!(h.dialer.dial_count(), 1);
    assert_eq!(h.media.held(), 1);

    h.handle.skip();
    eventually(|| h.scheduler.pending() == 1, "reopen scheduled").await;
    assert_eq!(h.media.held(), 0);
    assert!(h.peers.peer(0).is_closed());
    assert_eq!(h.handle.snapshot().banner, None);

    h.scheduler.advance(Duration::from_secs(1));
    let second = nth_connection(&h.dialer, 1).await;
    assert_eq!(second.url(), first.url());
    eventually(|| h.media.held() == 1, "media reacquired").await;
}

#[test_timeout::tokio_timeout_test]
async fn peer_setup_failure_releases_media_and_waits_for_skip() {
    let peers = MockPeerFactory::new();
    peers.fail_next(1);
    let h = Harness::mount_parts(MockMediaDevices::new(), peers, descriptor(Some("ET"), "RW"));
    eventually(
        || h.handle.snapshot().banner.as_deref() == Some(PEER_SETUP_TEXT),
        "peer setup banner",
    )
    .await;
    settle().await;
    assert_eq!(h.media.attempts(), 1);
    assert_eq!(h.media.held(), 0);
    assert_eq!(h.peers.created(), 0);
    assert_eq!(h.dialer.dial_count(), 0);
    assert!(!h.handle.snapshot().local_media);

    h.handle.skip();
    eventually(|| h.scheduler.pending() == 1, "reopen scheduled").await;
    h.scheduler.advance(Duration::from_secs(1));
    nth_connection(&h.dialer, 0).await;
    assert_eq!(h.peers.created(), 1);
    assert_eq!(h.media.held(), 1);
    assert_eq!(h.handle.snapshot().banner, None);
}

#[test_timeout::tokio_timeout_test]
async fn stop_releases_everything() {
    let mut h = Harness::mount(MockMediaDevices::new());
    let connection = h.open(0).await;
    h.matched(&connection, true).await;

    h.handle.stop();
    h.handle.wait().await;

    let snapshot = h.handle.snapshot();
    assert!(snapshot.stopped);
    assert!(h.handle.is_finished());
    assert!(connection.is_closed());
    assert!(h.peers.peer(0).is_closed());
    assert_eq!(h.media.held(), 0);
    assert_eq!(h.scheduler.pending(), 0);

    h.handle.skip();
    h.scheduler.advance(Duration::from_secs(5));
    settle().await;
    assert_eq!(h.dialer.dial_count(), 1);
}

#[test_timeout::tokio_timeout_test]
async fn unmount_releases_everything() {
    let h = Harness::mount(MockMediaDevices::new());
    let connection = h.open(0).await;
    let Harness {
        handle,
        media,
        peers,
        scheduler,
        ..
    } = h;

    handle.unmount().await;
    assert!(connection.is_closed());
    assert_eq!(connection.closed_events(), 1);
    assert!(peers.peer(0).is_closed());
    assert_eq!(media.held(), 0);
    assert_eq!(scheduler.pending(), 0);
}

#[test_timeout::tokio_timeout_test]
async fn skip_during_acquisition_releases_the_stale_attempt() {
    let media = MockMediaDevices::new();
    media.pause();
    let h = Harness::mount(media);
    eventually(|| h.media.attempts() == 1, "first acquisition started").await;

    h.handle.skip();
    eventually(|| h.scheduler.pending() == 1, "reopen scheduled").await;
    h.scheduler.advance(Duration::from_secs(1));
    eventually(|| h.media.attempts() == 2, "second acquisition started").await;

    h.media.resume();
    nth_connection(&h.dialer, 0).await;
    settle().await;
    assert_eq!(h.media.held(), 1);
    assert_eq!(h.peers.created(), 1);
    assert_eq!(h.peers.peer(0).media_label(), "mock-media-2");
}

#[test_timeout::tokio_timeout_test]
async fn diaspora_sessions_send_their_own_country() {
    let h = Harness::mount_with(MockMediaDevices::new(), descriptor(Some("ke"), "globe"));
    let connection = nth_connection(&h.dialer, 0).await;
    assert_eq!(
        connection.url().as_str(),
        "wss://anonafrica.fly.dev/ws/video/globe?myCountry=KE&clientId=client-test"
    );
    assert_eq!(
        h.handle.snapshot().status,
        "Finding someone from 🌐 the diaspora..."
    );
}
