use control_server::{parse_request, RequestLimits};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn config_post(body_len: usize) -> Vec<u8> {
    let body = format!("{{\"device\":{{\"name\":\"{}\"}}}}", "n".repeat(body_len));
    format!(
        "POST /config HTTP/1.1\r\nHost: 192.168.1.40:8080\r\nContent-Type: application/json\r\nOrigin: http://192.168.1.40\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

fn bench_parse_request(c: &mut Criterion) {
    let limits = RequestLimits::default();
    let status = b"GET /status HTTP/1.1\r\nHost: unit\r\nAccept: application/json\r\n\r\n".to_vec();
    let small_post = config_post(16);
    let large_post = config_post(3500);

    let mut group = c.benchmark_group("parse_request");
    group.bench_function("get_status", |b| {
        b.iter(|| parse_request(black_box(&status), &limits))
    });
    group.bench_function("post_config_small", |b| {
        b.iter(|| parse_request(black_box(&small_post), &limits))
    });
    group.bench_function("post_config_near_cap", |b| {
        b.iter(|| parse_request(black_box(&large_post), &limits))
    });
    group.bench_function("incomplete_head", |b| {
        let partial = &status[..20];
        b.iter(|| parse_request(black_box(partial), &limits))
    });
    group.finish();
}

criterion_group!(benches, bench_parse_request);
criterion_main!(benches);
