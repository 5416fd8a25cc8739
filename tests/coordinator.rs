mod support;

use std::time::Duration;

use duocall::error::{CallError, MediaErrorKind};
use duocall::peer::coordinator::Wake;
use duocall::peer::types::{
    CallFlags, ConnectionState, LinkEvent, LinkPhase, Orientation, SessionDescription, TrackKind,
};
use duocall::session::Participant;
use duocall::signaling::OutboundSignal;
use support::{candidate, harness, MockDevices};

#[tokio::test]
async fn duplicate_answer_is_applied_once() {
    let mut h = harness(Participant::Alyona, MockDevices::granting());
    h.call.acquire_local_media().await;
    h.call.handle_call_started(true).await;
    assert_eq!(h.sink.count("webrtc_offer"), 1);

    let answer = SessionDescription::answer("kolia-answer-1");
    h.call.handle_remote_answer(answer.clone()).await;
    h.call.handle_remote_answer(answer.clone()).await;

    let log = h.factory.log();
    let log = log.lock().unwrap();
    assert_eq!(log.remote_sets, 1);
    assert_eq!(log.remote, Some(answer));
}

#[tokio::test]
async fn repeated_ensure_creates_one_link_with_tracks_once() {
    let mut h = harness(Participant::Kolia, MockDevices::granting());
    h.call.acquire_local_media().await;
    for _ in 0..5 {
        h.call.ensure_peer_link().await.unwrap();
    }
    assert_eq!(h.factory.link_count(), 1);
    assert_eq!(h.call.phase(), LinkPhase::Linking);

    let log = h.factory.log();
    let tracks = log.lock().unwrap().tracks.clone();
    assert_eq!(tracks.len(), 2);
    assert_ne!(tracks[0], tracks[1]);
}

#[tokio::test]
async fn media_arriving_after_link_is_attached_once() {
    let mut h = harness(Participant::Kolia, MockDevices::granting());
    h.call.ensure_peer_link().await.unwrap();
    assert!(h.factory.log().lock().unwrap().tracks.is_empty());

    h.call.acquire_local_media().await;
    h.call.ensure_peer_link().await.unwrap();
    h.call.acquire_local_media().await;

    assert_eq!(h.factory.log().lock().unwrap().tracks.len(), 2);
    assert_eq!(h.call.local_media().map(|m| m.tracks().len()), Some(2));
}

#[tokio::test]
async fn toggling_video_twice_restores_it_without_renegotiating() {
    let mut h = harness(Participant::Alyona, MockDevices::granting());
    h.call.acquire_local_media().await;
    h.call.ensure_peer_link().await.unwrap();

    let mut flags = h.call.subscribe();
    flags.mark_unchanged();
    let original = h.call.flags().local_video_enabled;
    assert!(!original);
    let video = h.call.local_media().unwrap().video_track().unwrap().clone();
    assert!(!video.is_enabled());

    assert_eq!(h.call.toggle_local_video(), Some(!original));
    assert!(flags.has_changed().unwrap());
    assert!(video.is_enabled());
    flags.mark_unchanged();

    assert_eq!(h.call.toggle_local_video(), Some(original));
    assert!(flags.has_changed().unwrap());
    assert_eq!(h.call.flags().local_video_enabled, original);
    assert!(!video.is_enabled());

    assert_eq!(h.sink.count("webrtc_offer"), 0);
    assert_eq!(h.factory.log().lock().unwrap().offers_created, 0);
}

#[tokio::test]
async fn toggles_need_tracks() {
    let mut h = harness(Participant::Alyona, MockDevices::denying());
    assert_eq!(h.call.toggle_local_video(), None);
    h.call.acquire_local_media().await;
    assert_eq!(h.call.toggle_local_audio(), None);
    assert!(h.call.flags().local_audio_enabled);
}

#[tokio::test]
async fn candidates_after_teardown_are_ignored() {
    let mut h = harness(Participant::Kolia, MockDevices::granting());
    h.call.ensure_peer_link().await.unwrap();
    h.call.teardown().await;

    h.call.handle_remote_ice_candidate(candidate(1)).await;
    h.call.handle_remote_answer(SessionDescription::answer("late")).await;

    let log = h.factory.log();
    let log = log.lock().unwrap();
    assert!(log.detached);
    assert!(log.closed);
    assert!(log.candidates.is_empty());
    assert_eq!(log.remote_sets, 0);
    assert!(!h.call.has_link());
    assert_eq!(h.call.phase(), LinkPhase::Closed);
}

#[tokio::test]
async fn closed_coordinator_refuses_new_links() {
    let mut h = harness(Participant::Kolia, MockDevices::granting());
    h.call.teardown().await;
    assert!(matches!(
        h.call.ensure_peer_link().await,
        Err(CallError::LinkClosed)
    ));
    h.call.handle_call_started(true).await;
    assert_eq!(h.factory.link_count(), 0);
    assert!(h.sink.sent().is_empty());
    assert!(h.call.next_wake().await.is_none());
}

#[tokio::test]
async fn teardown_is_idempotent_and_resets_flags() {
    let mut h = harness(Participant::Alyona, MockDevices::granting());
    h.call.acquire_local_media().await;
    h.call.ensure_peer_link().await.unwrap();
    h.call.toggle_local_video();
    let video = h.call.local_media().unwrap().video_track().unwrap().clone();

    h.call.teardown().await;
    h.call.teardown().await;

    assert!(video.is_stopped());
    assert!(h.call.local_media().is_none());
    assert!(h.call.remote().is_empty());
    assert_eq!(h.call.flags(), CallFlags::default());
}

#[tokio::test]
async fn remote_video_mute_unmute_and_orientation() {
    let mut h = harness(Participant::Kolia, MockDevices::granting());
    h.call.ensure_peer_link().await.unwrap();

    h.deliver(LinkEvent::TrackAdded {
        track_id: "v1".into(),
        kind: TrackKind::Video,
        muted: true,
    })
    .await;
    let flags = h.call.flags();
    assert!(flags.remote_video_present);
    assert!(!flags.remote_video_enabled);
    assert_eq!(h.call.phase(), LinkPhase::Connected);

    h.deliver(LinkEvent::TrackUnmuted {
        track_id: "v1".into(),
    })
    .await;
    assert!(h.call.flags().remote_video_enabled);

    h.deliver(LinkEvent::VideoGeometry {
        track_id: "v1".into(),
        width: 480,
        height: 640,
    })
    .await;
    assert_eq!(h.call.flags().remote_orientation, Orientation::Portrait);

    h.deliver(LinkEvent::TrackMuted {
        track_id: "v1".into(),
    })
    .await;
    assert!(!h.call.flags().remote_video_enabled);

    h.deliver(LinkEvent::VideoGeometry {
        track_id: "v1".into(),
        width: 1280,
        height: 720,
    })
    .await;
    h.deliver(LinkEvent::TrackUnmuted {
        track_id: "v1".into(),
    })
    .await;
    let flags = h.call.flags();
    assert!(flags.remote_video_enabled);
    assert_eq!(flags.remote_orientation, Orientation::Landscape);

    h.deliver(LinkEvent::TrackEnded {
        track_id: "v1".into(),
    })
    .await;
    let flags = h.call.flags();
    assert!(!flags.remote_video_present);
    assert!(!flags.remote_video_enabled);
}

#[tokio::test]
async fn remote_tracks_are_aggregated_once() {
    let mut h = harness(Participant::Kolia, MockDevices::granting());
    h.call.ensure_peer_link().await.unwrap();
    for _ in 0..2 {
        h.deliver(LinkEvent::TrackAdded {
            track_id: "a1".into(),
            kind: TrackKind::Audio,
            muted: false,
        })
        .await;
    }
    assert_eq!(h.call.remote().tracks().len(), 1);
    assert!(!h.call.flags().remote_video_present);
}

#[tokio::test]
async fn permission_denied_leaves_no_link_and_no_tracks() {
    let mut h = harness(Participant::Alyona, MockDevices::denying());
    h.call.acquire_local_media().await;

    assert_eq!(
        h.call.flags().media_error,
        Some(MediaErrorKind::PermissionDenied)
    );
    assert!(h.call.local_media().is_none());
    assert!(!h.call.has_link());
    assert_eq!(h.factory.link_count(), 0);
}

#[tokio::test]
async fn call_still_negotiates_receive_only_after_media_failure() {
    let mut h = harness(Participant::Alyona, MockDevices::denying());
    h.call.acquire_local_media().await;
    h.call.handle_call_started(true).await;

    assert_eq!(h.factory.link_count(), 1);
    assert!(h.factory.log().lock().unwrap().tracks.is_empty());
    assert_eq!(h.sink.count("webrtc_offer"), 1);
}

#[tokio::test]
async fn initiator_offer_waits_for_media() {
    let mut h = harness(Participant::Alyona, MockDevices::granting());
    h.call.start_local_media();
    h.call.handle_call_started(true).await;

    assert_eq!(h.factory.link_count(), 1);
    assert_eq!(h.sink.count("webrtc_offer"), 0);

    let wake = h.call.next_wake().await.unwrap();
    assert!(matches!(wake, Wake::Media(Ok(_))));
    h.call.handle_wake(wake).await;

    assert_eq!(h.sink.count("webrtc_offer"), 1);
    let log = h.factory.log();
    let log = log.lock().unwrap();
    assert_eq!(log.tracks.len(), 2);
    assert_eq!(log.offers_created, 1);
}

#[tokio::test]
async fn non_initiator_never_offers() {
    let mut h = harness(Participant::Kolia, MockDevices::granting());
    h.call.acquire_local_media().await;
    h.call.handle_call_waiting(false);
    h.call.handle_call_started(false).await;
    assert!(!h.call.is_initiator());
    assert!(h.call.has_link());
    assert_eq!(h.sink.count("webrtc_offer"), 0);
}

#[tokio::test]
async fn early_candidates_are_queued_until_the_offer() {
    let mut h = harness(Participant::Kolia, MockDevices::granting());
    h.call.ensure_peer_link().await.unwrap();
    h.call.handle_remote_ice_candidate(candidate(1)).await;
    h.call.handle_remote_ice_candidate(candidate(2)).await;
    assert!(h.factory.log().lock().unwrap().candidates.is_empty());

    h.call
        .handle_remote_offer(SessionDescription::offer("alyona-offer-1"))
        .await;

    let log = h.factory.log();
    assert_eq!(log.lock().unwrap().candidates, vec![candidate(1), candidate(2)]);

    let sent = h.sink.sent();
    assert_eq!(sent.len(), 1);
    let OutboundSignal::Answer {
        username,
        answer,
        room_id,
    } = &sent[0]
    else {
        panic!("expected an answer, got {:?}", sent[0]);
    };
    assert_eq!(username, "kolia");
    assert_eq!(room_id, "call_room");
    assert_eq!(answer.sdp, "kolia-answer-1");
}

#[tokio::test]
async fn local_candidates_are_relayed() {
    let mut h = harness(Participant::Alyona, MockDevices::granting());
    h.call.ensure_peer_link().await.unwrap();
    h.deliver(LinkEvent::LocalCandidate(candidate(7))).await;

    assert_eq!(
        h.sink.sent(),
        vec![OutboundSignal::IceCandidate {
            username: "alyona".into(),
            candidate: candidate(7),
            room_id: "call_room".into(),
        }]
    );
}

#[tokio::test]
async fn failed_transport_clears_remote_video_and_closes() {
    let mut h = harness(Participant::Kolia, MockDevices::granting());
    h.call.ensure_peer_link().await.unwrap();
    h.deliver(LinkEvent::TrackAdded {
        track_id: "v1".into(),
        kind: TrackKind::Video,
        muted: false,
    })
    .await;
    h.deliver(LinkEvent::StateChanged(ConnectionState::Disconnected))
        .await;
    assert!(!h.call.flags().remote_video_present);
    assert_eq!(h.call.phase(), LinkPhase::Connected);

    h.deliver(LinkEvent::StateChanged(ConnectionState::Failed))
        .await;
    assert_eq!(h.call.phase(), LinkPhase::Closed);
    h.call
        .handle_remote_offer(SessionDescription::offer("too late"))
        .await;
    assert_eq!(h.factory.log().lock().unwrap().remote_sets, 0);
}

#[tokio::test]
async fn repeated_call_start_keeps_the_running_call() {
    let mut h = harness(Participant::Alyona, MockDevices::granting());
    h.call.acquire_local_media().await;
    h.call.handle_call_started(true).await;
    h.call
        .handle_remote_answer(SessionDescription::answer("kolia-answer-1"))
        .await;
    h.deliver(LinkEvent::TrackAdded {
        track_id: "v1".into(),
        kind: TrackKind::Video,
        muted: false,
    })
    .await;

    h.call.handle_call_started(true).await;

    assert_eq!(h.sink.count("webrtc_offer"), 1);
    assert_eq!(h.factory.log().lock().unwrap().offers_created, 1);
    let flags = h.call.flags();
    assert!(flags.remote_video_present);
    assert!(flags.remote_video_enabled);
}

#[tokio::test]
async fn answer_waits_for_media_and_carries_tracks() {
    let mut h = harness(Participant::Kolia, MockDevices::slow(Duration::from_millis(50)));
    h.call.start_local_media();
    h.call.handle_call_started(false).await;
    h.call
        .handle_remote_offer(SessionDescription::offer("alyona-offer-1"))
        .await;
    h.call.handle_remote_ice_candidate(candidate(1)).await;

    assert_eq!(h.sink.count("webrtc_answer"), 0);
    assert_eq!(h.call.phase(), LinkPhase::Negotiating);

    let wake = h.call.next_wake().await.unwrap();
    assert!(matches!(wake, Wake::Media(Ok(_))));
    h.call.handle_wake(wake).await;

    assert_eq!(h.sink.count("webrtc_answer"), 1);
    assert_eq!(h.sink.count("webrtc_offer"), 0);
    let log = h.factory.log();
    let log = log.lock().unwrap();
    assert_eq!(log.tracks_at_answer, Some(2));
    assert_eq!(log.remote, Some(SessionDescription::offer("alyona-offer-1")));
    assert_eq!(log.candidates, vec![candidate(1)]);
}

#[tokio::test]
async fn failed_transport_releases_link_and_media() {
    let mut h = harness(Participant::Alyona, MockDevices::granting());
    h.call.acquire_local_media().await;
    h.call.ensure_peer_link().await.unwrap();
    h.call.toggle_local_video();
    let video = h.call.local_media().unwrap().video_track().unwrap().clone();

    h.deliver(LinkEvent::StateChanged(ConnectionState::Failed))
        .await;

    let log = h.factory.log();
    assert!(log.lock().unwrap().detached);
    assert!(log.lock().unwrap().closed);
    assert!(video.is_stopped());
    assert!(!h.call.has_link());
    assert!(h.call.next_wake().await.is_none());
    // Local controls keep their state until the call is left
    assert!(h.call.flags().local_video_enabled);
}
