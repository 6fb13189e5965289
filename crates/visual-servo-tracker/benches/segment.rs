use criterion::{black_box, criterion_group, criterion_main, Criterion};
use visual_servo_core::{ColorImage, PixelRect};
use visual_servo_tracker::{find_external_contours, ColorRange, ColorSegmenter, ColorTracker, TrackerParams};

fn synthetic_frame() -> ColorImage {
    let mut frame = ColorImage::filled(640, 480, &[120, 30, 40]);
    for i in 0..12 {
        let x = 20 + (i % 4) * 150;
        let y = 20 + (i / 4) * 150;
        frame.fill_rect(PixelRect::new(x, y, 30 + i * 6, 40 + i * 4), &[60, 200, 200]);
    }
    frame
}

fn bench_segment(c: &mut Criterion) {
    let frame = synthetic_frame();
    let range = ColorRange::around([60.0, 200.0, 200.0]);

    c.bench_function("segment_640x480", |b| {
        let mut seg = ColorSegmenter::default();
        b.iter(|| {
            seg.segment(&frame.view(), black_box(&range)).count_nonzero();
        })
    });

    let mask = ColorSegmenter::default().segment(&frame.view(), &range).clone();
    c.bench_function("contours_640x480", |b| {
        b.iter(|| find_external_contours(black_box(&mask)).len())
    });

    c.bench_function("ground_contacts_640x480", |b| {
        let mut tracker = ColorTracker::new(TrackerParams {
            color: range,
            ..TrackerParams::default()
        });
        b.iter(|| tracker.ground_contacts(&frame.view(), black_box(3)))
    });
}

criterion_group!(benches, bench_segment);
criterion_main!(benches);
