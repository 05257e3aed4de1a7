use std::alloc::System;
use std::hint::black_box;

use serial_test::serial;
use stats_alloc::{Region, StatsAlloc, INSTRUMENTED_SYSTEM};
use telemetryd::aggregator::window::AverageWindowBuffer;
use telemetryd::aggregator::{AggregatorSettings, AggregatorState};
use telemetryd::producer::synth::SineSensor;
use telemetryd::telemetry::{SensorSample, UptimeSample};

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

fn measure_alloc_counts<T>(f: impl FnOnce() -> T) -> (T, usize, usize) {
    // Calibrate for ambient allocator activity in the test harness process.
    let idle_region = Region::new(&GLOBAL);
    black_box(());
    let idle = idle_region.change();

    let region = Region::new(&GLOBAL);
    let output = f();
    let used = region.change();

    let allocations = used.allocations.saturating_sub(idle.allocations);
    let deallocations = used.deallocations.saturating_sub(idle.deallocations);
    (output, allocations, deallocations)
}

fn full_window() -> AverageWindowBuffer {
    let mut window = AverageWindowBuffer::new(20);
    for i in 0..40i64 {
        window.push(SensorSample {
            timestamp_ms: i * 50,
            value: (i % 100) as i32,
        });
    }
    window
}

#[test]
#[serial]
fn window_push_and_average_allocation_budget() {
    let mut window = full_window();

    let (_avg, allocations, deallocations) = measure_alloc_counts(|| {
        let mut acc = 0u64;
        for i in 40..1_040i64 {
            window.push(SensorSample {
                timestamp_ms: i * 50,
                value: (i % 100) as i32,
            });
            acc += u64::from(window.average(i * 50, 200));
        }
        black_box(acc)
    });

    assert!(
        allocations <= 2,
        "window hot path allocation budget exceeded: {}",
        allocations
    );
    assert!(
        deallocations <= 2,
        "window hot path deallocation budget exceeded: {}",
        deallocations
    );
}

#[test]
#[serial]
fn build_frame_allocation_budget() {
    let mut state = AggregatorState::new(AggregatorSettings::default(), 0);
    state.hold_uptime(UptimeSample {
        timestamp_ms: 0,
        uptime_secs: 0,
    });

    let (_ids, allocations, deallocations) = measure_alloc_counts(|| {
        let mut last = 0u32;
        for n in 1..=500i64 {
            let now = n * 200;
            let sample = SensorSample {
                timestamp_ms: now - 10,
                value: 50,
            };
            state.ingest_sensor(sample);
            let check = state.check_deadline(now);
            last = state.build_frame(now, check.met, Some(sample)).frame.frame_id;
        }
        black_box(last)
    });

    assert!(
        allocations <= 2,
        "frame build allocation budget exceeded: {}",
        allocations
    );
    assert!(
        deallocations <= 2,
        "frame build deallocation budget exceeded: {}",
        deallocations
    );
}

#[test]
#[serial]
fn sensor_synthesis_allocation_budget() {
    let mut sensor = SineSensor::with_seed(3);

    let (_sum, allocations, _deallocations) = measure_alloc_counts(|| {
        let mut sum = 0i64;
        for _ in 0..1_000 {
            sum += i64::from(sensor.next_value());
        }
        black_box(sum)
    });

    assert!(
        allocations <= 2,
        "sensor synthesis allocation budget exceeded: {}",
        allocations
    );
}
