use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};

use peermesh::signaling::{PeerId, Request, Response, RoomId};

const JOINED_PUSH: &str = r#"{"event":"joined","data":{"you":"b7","data":{"topic":"x"},"peers":["a1","c3","d4"]}}"#;

const SIGNAL_PUSH: &str = r#"{"event":"signal","data":{"peer":"a1","data":{"type":"offer","sdp":"v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"}}}"#;

/// request encoding benchmark
fn bench_requests(c: &mut Criterion) {
    let offer = json!({"type": "offer", "sdp": "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n"});

    let mut group = c.benchmark_group("Request");
    group.throughput(Throughput::Elements(1));

    group.bench_function("join", |b| {
        b.iter(|| {
            let req = Request::<Value>::Join {
                room: RoomId::from(black_box("r42")),
            };
            black_box(serde_json::to_string(&req).unwrap())
        })
    });

    group.bench_function("signal", |b| {
        b.iter(|| {
            let req = Request::<Value>::Signal {
                peer: PeerId::from("a1"),
                data: black_box(&offer).clone(),
            };
            black_box(serde_json::to_string(&req).unwrap())
        })
    });

    group.finish();
}

/// push decoding benchmark
fn bench_responses(c: &mut Criterion) {
    let mut group = c.benchmark_group("Response");
    group.throughput(Throughput::Elements(1));

    group.bench_function("joined", |b| {
        b.iter(|| {
            let res: Response<Value> = serde_json::from_str(black_box(JOINED_PUSH)).unwrap();
            black_box(res)
        })
    });

    group.bench_function("signal", |b| {
        b.iter(|| {
            let res: Response<Value> = serde_json::from_str(black_box(SIGNAL_PUSH)).unwrap();
            black_box(res)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_requests, bench_responses);
criterion_main!(benches);
