//! Wire-level relay behaviour, observed from bare protocol endpoints.

use std::time::Duration;

use zone_shared::{
    math::{Quat, Vec3},
    net::{ClientMsg, Identity, Join, Move, PeerAnnounce, PeerId, ServerMsg},
};
use zone_tests::{init_tracing, spawn_relay, RawPeer, SETTLE};

const QUIET: Duration = Duration::from_millis(200);

fn join(id: u64, name: &str) -> ClientMsg {
    ClientMsg::Join(Join {
        id: PeerId(id),
        name: Some(name.to_string()),
        model: Some("fox".to_string()),
    })
}

async fn peers(cfg: &zone_shared::config::ZoneConfig, n: usize) -> anyhow::Result<Vec<RawPeer>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(RawPeer::connect(cfg).await?);
    }
    tokio::time::sleep(SETTLE).await;
    Ok(out)
}

#[tokio::test]
async fn join_is_announced_to_others_only() -> anyhow::Result<()> {
    init_tracing();
    let relay = spawn_relay(false).await?;
    let mut p = peers(&relay.cfg, 3).await?;

    p[0].send(&join(1, "Owl")).await?;

    let expected = ServerMsg::OtherJoin(PeerAnnounce {
        id: PeerId(1),
        name: Some("Owl".into()),
        model: Some("fox".into()),
    });
    assert_eq!(p[1].recv().await?, expected);
    assert_eq!(p[2].recv().await?, expected);
    assert!(p[0].recv_within(QUIET).await?.is_none());

    relay.stop().await
}

#[tokio::test]
async fn move_is_never_echoed() -> anyhow::Result<()> {
    init_tracing();
    let relay = spawn_relay(false).await?;
    let mut p = peers(&relay.cfg, 2).await?;

    let mv = Move {
        id: PeerId(5),
        pos: Vec3::new(1.5, -2.0, 3.25),
        rot: Quat::new(0.0, 0.7071, 0.0, 0.7071),
    };
    p[0].send(&ClientMsg::Move(mv.clone())).await?;

    assert_eq!(p[1].recv().await?, ServerMsg::OtherMove(mv));
    assert!(p[0].recv_within(QUIET).await?.is_none());

    relay.stop().await
}

#[tokio::test]
async fn targeted_identity_is_unicast() -> anyhow::Result<()> {
    init_tracing();
    let relay = spawn_relay(false).await?;
    let mut p = peers(&relay.cfg, 3).await?;

    for (i, name) in ["A", "B", "C"].iter().enumerate() {
        p[i].send(&join(i as u64 + 1, name)).await?;
    }
    // Drain the announces.
    for (i, peer) in p.iter_mut().enumerate() {
        for _ in 0..2 {
            assert!(matches!(peer.recv().await?, ServerMsg::OtherJoin(_)), "peer {i}");
        }
    }

    p[1].send(&ClientMsg::Identity(Identity {
        id: PeerId(2),
        name: "B".into(),
        model: None,
        target: Some(PeerId(1)),
    }))
    .await?;

    match p[0].recv().await? {
        ServerMsg::OtherIdentity(identity) => {
            assert_eq!(identity.id, PeerId(2));
            assert_eq!(identity.name, "B");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(p[1].recv_within(QUIET).await?.is_none());
    assert!(p[2].recv_within(QUIET).await?.is_none());

    relay.stop().await
}

#[tokio::test]
async fn hostile_display_name_is_sanitized_before_relay() -> anyhow::Result<()> {
    init_tracing();
    let relay = spawn_relay(false).await?;
    let mut p = peers(&relay.cfg, 2).await?;

    let raw = format!("<script>x</script>{}", "y".repeat(30));
    p[0].send(&ClientMsg::Identity(Identity {
        id: PeerId(7),
        name: raw,
        model: None,
        target: None,
    }))
    .await?;

    match p[1].recv().await? {
        ServerMsg::OtherIdentity(identity) => {
            assert!(identity.name.chars().count() <= 20);
            assert!(!identity.name.contains('<'));
            assert!(!identity.name.contains("script"));
        }
        other => panic!("unexpected {other:?}"),
    }

    relay.stop().await
}

#[tokio::test]
async fn departure_only_after_join() -> anyhow::Result<()> {
    init_tracing();
    let relay = spawn_relay(false).await?;
    let mut p = peers(&relay.cfg, 3).await?;

    // Never joined: closing it must not produce a depart.
    let anonymous = p.pop().expect("three peers");
    drop(anonymous);
    assert!(p[1].recv_within(QUIET).await?.is_none());

    p[0].send(&join(9, "Frog")).await?;
    assert!(matches!(p[1].recv().await?, ServerMsg::OtherJoin(_)));

    let joined = p.remove(0);
    drop(joined);
    assert_eq!(p[0].recv().await?, ServerMsg::OtherDisconnect(PeerId(9)));

    relay.stop().await
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_connection() -> anyhow::Result<()> {
    init_tracing();
    let relay = spawn_relay(false).await?;
    let mut p = peers(&relay.cfg, 2).await?;

    p[0].send_raw(b"definitely not json").await?;
    p[0].send_raw(br#"{"event":"move","data":{"id":1}}"#).await?;
    p[0].send_raw(br#"{"event":"join","data":{"id":0}}"#).await?;
    assert!(p[1].recv_within(QUIET).await?.is_none());

    p[0].send(&join(3, "Bear")).await?;
    assert!(matches!(p[1].recv().await?, ServerMsg::OtherJoin(a) if a.id == PeerId(3)));

    relay.stop().await
}

#[tokio::test]
async fn nameless_join_is_assigned_an_identity() -> anyhow::Result<()> {
    init_tracing();
    let relay = spawn_relay(true).await?;
    let mut p = peers(&relay.cfg, 2).await?;

    p[0].send(&ClientMsg::Join(Join {
        id: PeerId(4),
        name: None,
        model: None,
    }))
    .await?;

    let assigned = match p[0].recv().await? {
        ServerMsg::SelfIdentity(assigned) => assigned,
        other => panic!("unexpected {other:?}"),
    };
    assert!(!assigned.name.is_empty());
    assert_eq!(
        p[1].recv().await?,
        ServerMsg::OtherJoin(PeerAnnounce {
            id: PeerId(4),
            name: Some(assigned.name),
            model: Some(assigned.model),
        })
    );

    relay.stop().await
}
