use criterion::{Criterion, black_box, criterion_group, criterion_main};

use glam::IVec3;
use plotcraft::compile::compile;
use plotcraft::core::{BuildLimits, SandboxConfig};
use plotcraft::script::Sandbox;
use plotcraft::structure::StructureDocument;
use plotcraft::voxel::{BlockSpec, FillMode, VoxelCanvas, geometry};

const CASTLE: &str = r#"
build.fill(-20, 0, -20, 20, 0, 20, "stone_bricks")
for corner in [(-20, -20), (-20, 20), (20, -20), (20, 20)]:
    x, z = corner
    build.cylinder(x, 1, z, 4, 16, "cobblestone", hollow=True)
    build.dome(x, 17, z, 4, "dark_oak_planks")
build.wall(-20, 1, -20, 20, 10, -20, "stone_bricks")
build.wall(-20, 1, 20, 20, 10, 20, "stone_bricks")
build.sphere(0, 12, 0, 8, "glass", hollow=True)
"#;

fn castle_canvas() -> VoxelCanvas {
    let mut canvas = VoxelCanvas::new(BuildLimits::default());
    let stone = BlockSpec::parse("stone_bricks").unwrap();
    let glass = BlockSpec::parse("glass").unwrap();
    canvas
        .fill_box(IVec3::new(-20, 0, -20), IVec3::new(20, 12, 20), &stone, FillMode::Hollow)
        .unwrap();
    geometry::sphere(&mut canvas, IVec3::new(0, 20, 0), 12, &glass, true).unwrap();
    canvas
}

fn bench_compile_castle(c: &mut Criterion) {
    let canvas = castle_canvas();
    c.bench_function("compile_castle", |b| b.iter(|| compile(black_box(&canvas))));
}

fn bench_compile_solid_sphere(c: &mut Criterion) {
    let mut canvas = VoxelCanvas::new(BuildLimits::default());
    let stone = BlockSpec::parse("stone").unwrap();
    geometry::sphere(&mut canvas, IVec3::ZERO, 40, &stone, false).unwrap();

    c.bench_function("compile_solid_sphere_40", |b| b.iter(|| compile(black_box(&canvas))));
}

fn bench_encode_structure(c: &mut Criterion) {
    let canvas = castle_canvas();
    c.bench_function("encode_castle", |b| {
        b.iter(|| {
            StructureDocument::from_canvas(black_box(&canvas))
                .and_then(|doc| doc.encode())
                .unwrap()
        })
    });
}

fn bench_run_script(c: &mut Criterion) {
    let sandbox = Sandbox::new(SandboxConfig::default());
    c.bench_function("run_castle_script", |b| {
        b.iter(|| sandbox.run(black_box(CASTLE)).unwrap().block_count)
    });
}

criterion_group!(
    benches,
    bench_compile_castle,
    bench_compile_solid_sphere,
    bench_encode_structure,
    bench_run_script,
);
criterion_main!(benches);
