use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dashmap::DashMap;
use huddle::ids::{ChannelId, RoomId, UserId, UserKey};

fn bench_clone_string(c: &mut Criterion) {
    let s = "some-long-user-key-string-1234567890#session-42".to_string();
    c.bench_function("clone_string", |b| {
        b.iter(|| {
            let _ = black_box(s.clone());
        })
    });
}

fn bench_clone_strong_id(c: &mut Criterion) {
    let id = UserId::from("some-long-user-key-string-1234567890#session-42");
    c.bench_function("clone_strong_id", |b| {
        b.iter(|| {
            let _ = black_box(id.clone());
        })
    });
}

fn bench_compose_user_id(c: &mut Criterion) {
    let key = UserKey::from("some-long-user-key-string-1234567890");
    c.bench_function("compose_user_id", |b| {
        b.iter(|| {
            let _ = black_box(UserId::compose(&key, "session-42"));
        })
    });
}

fn bench_split_user_key(c: &mut Criterion) {
    let id = UserId::from("some-long-user-key-string-1234567890#session-42");
    c.bench_function("split_user_key", |b| {
        b.iter(|| {
            let _ = black_box(id.user_key());
        })
    });
}

fn bench_compose_channel_id(c: &mut Criterion) {
    let room = RoomId::from("weekly-standup-room");
    c.bench_function("compose_channel_id", |b| {
        b.iter(|| {
            let _ = black_box(ChannelId::compose("tenant-acme", &room));
        })
    });
}

fn bench_dashmap_insert_strong_id(c: &mut Criterion) {
    let map = DashMap::new();
    let key = UserId::from("some-long-user-key-string-1234567890#session-42");

    c.bench_function("dashmap_insert_strong_id", |b| {
        b.iter(|| {
            map.insert(key.clone(), 1);
        })
    });
}

criterion_group!(
    benches,
    bench_clone_string,
    bench_clone_strong_id,
    bench_compose_user_id,
    bench_split_user_key,
    bench_compose_channel_id,
    bench_dashmap_insert_strong_id
);
criterion_main!(benches);
