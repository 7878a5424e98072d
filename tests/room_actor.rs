use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crossline_server::game::room::{AttachError, Room, RoomSettings};
use crossline_server::game::transport::close_code;
use crossline_server::game::{RoomHandle, Tuning};
use crossline_server::util::time::SystemClock;
use crossline_server::ws::protocol::{decode_server_frame, encode_command, ClientCommand, ServerFrame};
use crossline_server::ws::transport::{ChannelTransport, OutboundReceiver};

const WAIT: Duration = Duration::from_secs(2);

fn spawn_room(max_players: usize) -> RoomHandle {
    let clock = Arc::new(SystemClock::new());
    let room = Room::new(
        RoomSettings {
            id: "actor-room".into(),
            name: "Actor Room".into(),
            max_players,
            persistent: false,
            seed: Some(11),
        },
        Arc::new(Tuning::default()),
        clock.clone(),
    );
    RoomHandle::spawn(room, clock)
}

async fn next_frame(outbound: &mut OutboundReceiver) -> ServerFrame {
    let frame = timeout(WAIT, outbound.frames.recv())
        .await
        .expect("frame before timeout")
        .expect("transport open");
    assert!(frame.is_binary);
    decode_server_frame(&frame.payload).expect("valid server frame")
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_attach_receives_init_then_world_then_self() {
    let room = spawn_room(4);
    let (transport, mut outbound) = ChannelTransport::new(64);
    let id = room.attach(transport.clone(), "Alpha".into()).await.unwrap();

    match next_frame(&mut outbound).await {
        ServerFrame::Init { player_id, .. } => assert_eq!(player_id, id),
        other => panic!("expected INIT, got {other:?}"),
    }
    match next_frame(&mut outbound).await {
        ServerFrame::StateUpdate(delta) => assert!(delta.players.is_empty()),
        other => panic!("expected world snapshot, got {other:?}"),
    }
    match next_frame(&mut outbound).await {
        ServerFrame::StateUpdate(delta) => {
            let me = delta.players.iter().find(|r| r.id == id).unwrap();
            assert!(me.full_sync);
            assert_eq!(me.name.as_deref(), Some("Alpha"));
        }
        other => panic!("expected own full sync, got {other:?}"),
    }

    wait_until(|| room.player_count() == 1).await;
    room.shutdown().await;
}

#[tokio::test]
async fn test_commands_flow_through_the_actor() {
    let room = spawn_room(4);
    let (transport, mut outbound) = ChannelTransport::new(64);
    let id = room.attach(transport.clone(), "Mover".into()).await.unwrap();
    for _ in 0..3 {
        next_frame(&mut outbound).await;
    }

    let frame = encode_command(&ClientCommand::Move {
        x: 300.0,
        y: 200.0,
        angle: Some(1.25),
    });
    assert!(room.handle_message(&id, frame));

    let record = loop {
        if let ServerFrame::StateUpdate(delta) = next_frame(&mut outbound).await {
            if let Some(record) = delta.players.into_iter().find(|r| r.position.is_some()) {
                break record;
            }
        }
    };
    assert_eq!(record.id, id);
    assert_eq!(record.position, Some((300.0, 200.0)));
    assert_eq!(record.angle, Some(1.25));
    assert!(!record.full_sync);

    room.shutdown().await;
}

#[tokio::test]
async fn test_full_room_rejects_attach() {
    let room = spawn_room(1);
    let (first, _first_rx) = ChannelTransport::new(64);
    room.attach(first, "Alpha".into()).await.unwrap();
    wait_until(|| room.is_full()).await;

    let (second, _second_rx) = ChannelTransport::new(64);
    assert_eq!(
        room.attach(second, "Bravo".into()).await,
        Err(AttachError::RoomFull)
    );
    room.shutdown().await;
}

#[tokio::test]
async fn test_detach_frees_the_seat() {
    let room = spawn_room(1);
    let (transport, _rx) = ChannelTransport::new(64);
    let id = room.attach(transport, "Alpha".into()).await.unwrap();
    wait_until(|| room.is_full()).await;

    room.detach(id).await;
    wait_until(|| room.player_count() == 0).await;
    assert!(!room.is_full());
    room.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_transports() {
    let room = spawn_room(4);
    let (transport, mut outbound) = ChannelTransport::new(64);
    room.attach(transport.clone(), "Alpha".into()).await.unwrap();

    room.shutdown().await;
    let request = timeout(WAIT, outbound.close.wait_for(Option::is_some))
        .await
        .expect("close before timeout")
        .expect("close channel open")
        .clone();
    let request = request.unwrap();
    assert_eq!(request.code, close_code::GOING_AWAY);
    assert_eq!(request.reason, "room-closed");
    assert!(transport.is_closed());

    wait_until(|| room.is_closed()).await;
    let (late, _late_rx) = ChannelTransport::new(64);
    assert_eq!(
        room.attach(late, "Late".into()).await,
        Err(AttachError::RoomClosed)
    );
}
