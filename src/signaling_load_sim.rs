use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;

use huddle::client::fakes::LocalTokenAuth;
use huddle::client::socket::{InProcessSocket, SignalingSocket};
use huddle::config::Config;
use huddle::identity::AuthUser;
use huddle::ids::RoomId;
use huddle::protocol::{ClientRequest, ProducerAppData, ReactionKind};
use huddle::sfu::{MediaKind, ProducerSource, RtpParameters};
use huddle::SignalingCore;

const ROOMS: usize = 20;
const USERS_PER_ROOM: usize = 25;
const RUN_SECS: u64 = 30;

fn main() {
    // We use a custom runtime to ensure we control the threads
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        println!("🔥 Starting Signaling Load Simulator...");
        println!("   - {} rooms x {} participants", ROOMS, USERS_PER_ROOM);

        let config = Arc::new(Config::for_tests());
        let secret = config.token_secret.clone();
        let core = SignalingCore::new(config);

        let join_start = Instant::now();
        let mut sockets = Vec::new();
        for room_idx in 0..ROOMS {
            let room_id = RoomId::from(format!("load-{room_idx}"));
            for user_idx in 0..USERS_PER_ROOM {
                let auth = LocalTokenAuth::new(
                    &secret,
                    AuthUser {
                        id: Some(format!("user-{room_idx}-{user_idx}")),
                        email: None,
                        name: Some(format!("User {user_idx}")),
                        guest: false,
                    },
                    "loadtest",
                    user_idx == 0, // first in is the host
                );
                let session_id = format!("sess-{room_idx}-{user_idx}");
                let token = huddle::client::session::AuthFetcher::fetch_token(
                    auth.as_ref(),
                    &room_id,
                    &session_id,
                )
                .await
                .expect("token");

                let socket = InProcessSocket::connect(&core);
                // drain room events so outboxes never back up
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
                    .expect("join");

                // one audio producer per participant
                let transport: huddle::sfu::TransportParams = serde_json::from_value(
                    socket
                        .request(ClientRequest::CreateProducerTransport)
                        .await
                        .expect("transport"),
                )
                .expect("transport params");
                socket
                    .request(ClientRequest::ConnectProducerTransport {
                        transport_id: transport.id.clone(),
                        dtls_parameters: transport.dtls_parameters.clone(),
                    })
                    .await
                    .expect("connect");
                socket
                    .request(ClientRequest::Produce {
                        transport_id: transport.id,
                        kind: MediaKind::Audio,
                        rtp_parameters: RtpParameters::default(),
                        app_data: ProducerAppData {
                            source: ProducerSource::Webcam,
                            paused: false,
                        },
                    })
                    .await
                    .expect("produce");

                sockets.push(socket);
            }
        }
        println!(
            "   - {} sessions joined and producing in {:.2}s",
            sockets.len(),
            join_start.elapsed().as_secs_f64()
        );

        println!("   - Starting signaling churn loop ({} seconds)...", RUN_SECS);
        let start = Instant::now();
        let mut count: u64 = 0;
        let mut loop_start = Instant::now();

        // Hot path: hand-raise toggles and reactions fan out to the room
        while start.elapsed() < Duration::from_secs(RUN_SECS) {
            let socket = &sockets[(count as usize) % sockets.len()];
            let _ = socket
                .request(ClientRequest::HandRaised {
                    raised: count % 2 == 0,
                })
                .await;
            let _ = socket
                .request(ClientRequest::SendReaction {
                    kind: ReactionKind::Emoji,
                    value: "👍".to_string(),
                    label: None,
                })
                .await;
            count += 2;

            if count % 1000 == 0 {
                let elapsed = loop_start.elapsed().as_secs_f64();
                if elapsed > 1.0 {
                    println!(
                        "   ⚡ Status: {:.0} requests/sec ({:.0} fan-outs/sec)",
                        count as f64 / elapsed,
                        count as f64 * (USERS_PER_ROOM as f64 - 1.0) / elapsed
                    );
                    count = 0;
                    loop_start = Instant::now();
                }
            }
        }

        println!("✅ Simulation Complete.");
    });
}
