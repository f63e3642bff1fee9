use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_gpu_sync::backend::dummy::DummyContext;
use redlilium_gpu_sync::{
    BufferDescriptor, BufferUsage, CommandBufferResource, ImageDescriptor, ImageLayout,
    ImageResource, LayoutMap, ResidencyPattern, SubresourceRange, TextureFormat, TextureUsage,
    WriteScheduler,
};

// ---------------------------------------------------------------------------
// Layout map
// ---------------------------------------------------------------------------

fn bench_layout_map_assign_per_layer(c: &mut Criterion) {
    c.bench_function("layout_map_assign_64_layers", |b| {
        b.iter(|| {
            let mut map = LayoutMap::new(64 * 10, ImageLayout::Undefined);
            for layer in 0..64u32 {
                let layout = if layer % 2 == 0 {
                    ImageLayout::ShaderReadOnly
                } else {
                    ImageLayout::TransferDst
                };
                map.assign(layer * 10..layer * 10 + 10, layout);
            }
            black_box(map.interval_count())
        });
    });
}

fn bench_layout_map_query(c: &mut Criterion) {
    let mut map = LayoutMap::new(1024, ImageLayout::Undefined);
    for i in (0..1024u32).step_by(8) {
        map.assign(i..i + 4, ImageLayout::General);
    }
    c.bench_function("layout_map_query_fragmented", |b| {
        b.iter(|| black_box(map.query(black_box(100..900))));
    });
}

// ---------------------------------------------------------------------------
// Layout transitions
// ---------------------------------------------------------------------------

fn bench_full_range_transition(c: &mut Criterion) {
    let context = DummyContext::new();
    let mut image = ImageResource::new(
        context.clone(),
        ImageDescriptor::new_2d(
            1024,
            1024,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        )
        .with_array_layers(6)
        .with_mip_levels(11),
    )
    .unwrap();
    let full = SubresourceRange::full(6, 11);
    let mut cmd = CommandBufferResource::new(context.clone(), None, None).unwrap();

    c.bench_function("transition_full_range_6x11", |b| {
        b.iter(|| {
            cmd.prepare_for_recording().unwrap();
            cmd.begin().unwrap();
            image
                .transition_layout(&mut cmd, &full, ImageLayout::TransferDst)
                .unwrap();
            image
                .transition_layout(&mut cmd, &full, ImageLayout::ShaderReadOnly)
                .unwrap();
            cmd.end().unwrap();
            cmd.submit().unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Write commits
// ---------------------------------------------------------------------------

fn bench_commit(c: &mut Criterion, name: &str, allow_direct: bool) {
    let context = DummyContext::new();
    let mut scheduler = WriteScheduler::new(
        context.clone(),
        BufferDescriptor::new(BufferUsage::UNIFORM, ResidencyPattern::Dynamic),
        allow_direct,
    );
    let mut cmd = CommandBufferResource::new(context.clone(), None, None).unwrap();
    let data = vec![7u8; 256];

    c.bench_function(name, |b| {
        b.iter(|| {
            cmd.prepare_for_recording().unwrap();
            cmd.begin().unwrap();
            for i in 0..16u64 {
                scheduler
                    .add_write_segment(data.clone(), i * 256)
                    .unwrap();
            }
            black_box(scheduler.commit(&mut cmd).unwrap());
            cmd.end().unwrap();
            cmd.submit().unwrap();
        });
    });
}

fn bench_commit_direct(c: &mut Criterion) {
    bench_commit(c, "commit_16_segments_direct", true);
}

fn bench_commit_staged(c: &mut Criterion) {
    bench_commit(c, "commit_16_segments_staged", false);
}

criterion_group!(
    benches,
    bench_layout_map_assign_per_layer,
    bench_layout_map_query,
    bench_full_range_transition,
    bench_commit_direct,
    bench_commit_staged,
);
criterion_main!(benches);
