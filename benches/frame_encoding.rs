//! Benchmarks for frame encoding and dispatch
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::path::PathBuf;
use std::time::Duration;
use taslink_rs::backend::{DeviceLink, LatchCounts, SerialLink};
use taslink_rs::session::{FrameEncoder, RunConfig, RunId, RunSession};
use taslink_rs::types::StreamMask;
use taslink_rs::{ControllerType, ControllerWidth, EventWindow};

/// Link that discards writes, so long benchmarks do not accumulate output
struct NullLink;

impl SerialLink for NullLink {
    fn write_all(&mut self, data: &[u8]) -> taslink_rs::Result<()> {
        black_box(data);
        Ok(())
    }

    fn read_available(&mut self, _buf: &mut Vec<u8>) -> taslink_rs::Result<usize> {
        Ok(0)
    }

    fn try_clone_link(&self) -> taslink_rs::Result<Box<dyn SerialLink>> {
        Ok(Box::new(NullLink))
    }

    fn name(&self) -> String {
        "null".to_string()
    }
}

fn config(file: &str, ports: Vec<u8>, controller_type: ControllerType, width: ControllerWidth) -> RunConfig {
    RunConfig {
        ports,
        controller_type,
        width,
        overread: false,
        window: EventWindow::NONE,
        input_file: PathBuf::from(file),
        dpcm_fix: false,
        dummy_frames: 0,
        blank_frames: Vec::new(),
        header: None,
        transitions: Vec::new(),
    }
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    // Roughly an hour of input at 60 frames per second
    let frames = 216_000usize;
    let cases = [
        ("r08_two_normal", config("run.r08", vec![1, 2], ControllerType::Normal, ControllerWidth::Bits8), 2),
        ("r16m_two_multitap", config("run.r16m", vec![1, 2], ControllerType::Multitap, ControllerWidth::Bits16), 16),
    ];

    for (name, cfg, record_len) in cases.iter() {
        let capture: Vec<u8> = (0..frames * record_len).map(|i| i as u8).collect();
        let encoder = FrameEncoder::new(cfg).unwrap();

        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(BenchmarkId::new("encode_bytes", name), &capture, |b, capture| {
            b.iter(|| black_box(encoder.encode_bytes(capture).unwrap()));
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    let cfg = config("run.r08", vec![1], ControllerType::Normal, ControllerWidth::Bits8);
    let capture = vec![0u8; 2 * 100_000];
    let mask = StreamMask::from_index(0).unwrap();
    let buffer = FrameEncoder::new(&cfg)
        .unwrap()
        .with_selector(mask.letter())
        .encode_bytes(&capture)
        .unwrap();

    for latches in [1usize, 4, 16].iter() {
        group.throughput(Throughput::Elements(*latches as u64));
        group.bench_with_input(BenchmarkId::new("latches", latches), latches, |b, &latches| {
            let mut link = DeviceLink::new(Box::new(NullLink));
            let mut run = RunSession::new(RunId(1), cfg.clone(), buffer.clone(), mask);
            b.iter(|| {
                if run.remaining() < latches {
                    run.rewind(&mut link).unwrap();
                }
                black_box(run.dispatch(&mut link, latches, 0, Duration::ZERO).unwrap())
            });
        });
    }

    group.bench_function("count_latches", |b| {
        let bytes = b"ffffgggghhhhiiii".repeat(4);
        b.iter(|| black_box(LatchCounts::from_bytes(&bytes)));
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_dispatch);

criterion_main!(benches);
