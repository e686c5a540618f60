//! Mel Analysis Benchmarks
//!
//! Fixed-hop spectrogram throughput, stretched note analysis and base pitch generation.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rf_pitch::{BasePitchCurve, CenteredSpectralEngine, MelConfig, NoteSegment, SpectralEngine};

const DURATIONS_SEC: &[f32] = &[1.0, 5.0, 30.0];

fn generate_voice(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / 44100.0;
            let f = 220.0 + 5.0 * (2.0 * std::f32::consts::PI * 5.5 * t).sin();
            0.5 * (2.0 * std::f32::consts::PI * f * t).sin()
        })
        .collect()
}

fn bench_mel_spectrogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("mel_spectrogram");
    let engine = SpectralEngine::new(MelConfig::default()).unwrap();

    for &secs in DURATIONS_SEC {
        let len = (secs * 44100.0) as usize;
        let audio = generate_voice(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(secs), &audio, |b, audio| {
            b.iter(|| black_box(engine.compute(black_box(audio)).unwrap()))
        });
    }

    group.finish();
}

fn bench_time_stretched(c: &mut Criterion) {
    let mut group = c.benchmark_group("centered_time_stretch");
    let engine = CenteredSpectralEngine::new(MelConfig::default()).unwrap();
    let audio = generate_voice(44100 * 5);

    for &ratio in &[0.5f32, 1.0, 2.0] {
        let new_len = (100.0 * ratio) as usize;
        group.bench_with_input(BenchmarkId::from_parameter(ratio), &new_len, |b, &n| {
            b.iter(|| black_box(engine.compute_time_stretched(&audio, 100, 200, n).unwrap()))
        });
    }

    group.finish();
}

fn bench_base_pitch(c: &mut Criterion) {
    let notes: Vec<NoteSegment> = (0..200)
        .map(|i| NoteSegment {
            start_frame: i * 30,
            end_frame: i * 30 + 25,
            midi_note: 55.0 + (i % 12) as f32,
        })
        .collect();

    c.bench_function("base_pitch_200_notes", |b| {
        b.iter(|| black_box(BasePitchCurve::generate_for_notes(black_box(&notes), 6000)))
    });
}

criterion_group!(benches, bench_mel_spectrogram, bench_time_stretched, bench_base_pitch);
criterion_main!(benches);
