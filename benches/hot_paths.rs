use criterion::{black_box, criterion_group, criterion_main, Criterion};
use telemetryd::aggregator::window::AverageWindowBuffer;
use telemetryd::aggregator::{AggregatorSettings, AggregatorState};
use telemetryd::producer::synth::SineSensor;
use telemetryd::telemetry::{SensorSample, TelemetryFrame, UptimeSample};

fn full_window() -> AverageWindowBuffer {
    let mut window = AverageWindowBuffer::new(20);
    for i in 0..20i64 {
        window.push(SensorSample {
            timestamp_ms: i * 50,
            value: (i * 5) as i32,
        });
    }
    window
}

fn bench_window(c: &mut Criterion) {
    let window = full_window();

    c.bench_function("window/average_full_ring", |b| {
        b.iter(|| window.average(black_box(1_000), black_box(200)))
    });

    let mut window = full_window();
    let mut ts = 1_000i64;
    c.bench_function("window/push_overwrite", |b| {
        b.iter(|| {
            ts += 50;
            window.push(black_box(SensorSample {
                timestamp_ms: ts,
                value: 50,
            }));
        })
    });
}

fn bench_build_frame(c: &mut Criterion) {
    let mut state = AggregatorState::new(AggregatorSettings::default(), 0);
    state.hold_uptime(UptimeSample {
        timestamp_ms: 0,
        uptime_secs: 0,
    });
    let mut now = 0i64;

    c.bench_function("aggregator/build_frame", |b| {
        b.iter(|| {
            now += 200;
            let sample = SensorSample {
                timestamp_ms: now - 10,
                value: 42,
            };
            state.ingest_sensor(sample);
            let check = state.check_deadline(now);
            black_box(state.build_frame(now, check.met, Some(sample)))
        })
    });
}

fn bench_format(c: &mut Criterion) {
    let frame = TelemetryFrame {
        frame_id: 12_345,
        timestamp_ms: 2_469_000,
        uptime_secs: 2_469,
        latest_sensor_value: 73,
        windowed_average: 71,
        degraded: false,
    };

    c.bench_function("frame/format_text", |b| {
        b.iter(|| black_box(&frame).to_string())
    });
    c.bench_function("frame/format_json", |b| {
        b.iter(|| serde_json::to_string(black_box(&frame)).expect("serialize"))
    });
}

fn bench_sensor(c: &mut Criterion) {
    let mut sensor = SineSensor::with_seed(7);

    c.bench_function("producer/sine_sensor_next", |b| {
        b.iter(|| black_box(sensor.next_value()))
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_window(c);
    bench_build_frame(c);
    bench_format(c);
    bench_sensor(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
