use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use huddle::client::fakes::LocalTokenAuth;
use huddle::client::session::AuthFetcher;
use huddle::client::socket::{InProcessSocket, SignalingSocket};
use huddle::config::Config;
use huddle::identity::AuthUser;
use huddle::ids::RoomId;
use huddle::protocol::{ClientRequest, ServerEvent, VideoQuality};
use huddle::SignalingCore;

fn core_with_secret() -> (Arc<SignalingCore>, Vec<u8>) {
    let config = Arc::new(Config::for_tests());
    let secret = config.token_secret.clone();
    (SignalingCore::new(config), secret)
}

async fn join_one(
    core: &Arc<SignalingCore>,
    secret: &[u8],
    room_id: &RoomId,
    idx: usize,
    is_host: bool,
) -> Arc<InProcessSocket> {
    let auth = LocalTokenAuth::new(
        secret,
        AuthUser {
            id: Some(format!("bench-user-{idx}")),
            email: None,
            name: Some(format!("Bench {idx}")),
            guest: false,
        },
        "bench",
        is_host,
    );
    let session_id = format!("bench-sess-{idx}");
    let token = auth.fetch_token(room_id, &session_id).await.unwrap();
    let socket = InProcessSocket::connect(core);
    if let Some(mut events) = socket.take_events().await {
        tokio::spawn(async move { while events.recv().await.is_some() {} });
    }
    socket
        .request(ClientRequest::JoinRoom {
            room_id: room_id.clone(),
            session_id,
            token,
            display_name: None,
            ghost: false,
            webinar_invite_code: None,
            meeting_invite_code: None,
        })
        .await
        .unwrap();
    socket
}

// 1. Benchmark the full join round-trip into a busy room.
fn bench_join_room(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (core, secret) = core_with_secret();
    let room_id = RoomId::from("bench-join");

    rt.block_on(async {
        for idx in 0..24 {
            join_one(&core, &secret, &room_id, idx, idx == 0).await;
        }
    });

    let mut group = c.benchmark_group("signaling");
    let mut next_idx = 1000usize;
    group.bench_function("join_then_leave", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    next_idx += 1;
                    let socket = join_one(&core, &secret, &room_id, next_idx, false).await;
                    let _ = socket.request(ClientRequest::LeaveRoom).await;
                }
                start.elapsed()
            })
        })
    });
    group.finish();
}

// 2. Benchmark room fan-out through the handler path (hand-raise toggles
// broadcast to every joined session).
fn bench_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (core, secret) = core_with_secret();
    let room_id = RoomId::from("bench-fanout");

    let sockets = rt.block_on(async {
        let mut sockets = Vec::new();
        for idx in 0..50 {
            sockets.push(join_one(&core, &secret, &room_id, idx, idx == 0).await);
        }
        sockets
    });

    let mut group = c.benchmark_group("signaling");
    let mut flip = false;
    group.bench_function("hand_raise_fan_out_50", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    flip = !flip;
                    sockets[0]
                        .request(ClientRequest::HandRaised { raised: flip })
                        .await
                        .unwrap();
                }
                start.elapsed()
            })
        })
    });
    group.finish();
}

// 3. Benchmark event encoding (every fan-out serializes once per receiver).
fn bench_event_encode(c: &mut Criterion) {
    let event = ServerEvent::SetVideoQuality {
        room_id: RoomId::from("bench-encode"),
        quality: VideoQuality::Low,
    };
    c.bench_function("encode_room_event", |b| {
        b.iter(|| {
            let _ = serde_json::to_string(&event).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_join_room,
    bench_fan_out,
    bench_event_encode
);
criterion_main!(benches);
