mod common;

use common::*;
use quadscene::{
    AtlasMode, ExportConfig, ExportError, ExportPhase, InMemoryBitmaps, Quad, QuadSink,
    SceneExporter, SecondaryUv,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

fn config(dir: &Path) -> ExportConfig {
    ExportConfig::new(dir, "scene")
        .with_atlas_size(64)
        .with_worker_threads(2)
        .with_page_records(16)
}

fn export_stone(config: ExportConfig) -> quadscene::ExportReport {
    let exporter = SceneExporter::new(config).unwrap();
    exporter
        .add_quad(floor_quad("stone", "stone_top", 0.0, 0.0, 0.0))
        .unwrap();
    exporter
        .add_quad(floor_quad("stone", "stone_top", 2.0, 0.0, 0.0))
        .unwrap();
    exporter.write(&stone_bitmaps()).unwrap()
}

#[test]
fn stone_scene_with_individual_textures() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path()).with_atlas_mode(AtlasMode::Individual);
    let staging = config.staging_dir();
    let report = export_stone(config);

    assert_eq!(report.materials, 1);
    assert_eq!(report.vertices, 8);
    assert_eq!(report.indices, 12);
    assert_eq!(report.quads.accepted, 2);
    assert!(report.missing_bitmaps.is_empty());
    assert!(!staging.exists());

    let doc = read_document(&report.document);
    assert_eq!(doc["asset"]["version"], "2.0");
    assert_eq!(array_len(&doc, "nodes"), 1);
    assert_eq!(array_len(&doc, "meshes"), 1);
    assert_eq!(array_len(&doc, "materials"), 1);
    assert_eq!(doc["nodes"][0]["name"], "stone");
    assert_eq!(doc["meshes"][0]["name"], "stone");
    assert_eq!(doc["materials"][0]["name"], "stone");
    assert_eq!(doc["images"][0]["uri"], "textures/stone_top.png");

    let position = attribute(&doc, 0, "POSITION");
    assert_eq!(doc["accessors"][position]["count"], 8);
    assert_eq!(doc["accessors"][indices(&doc, 0)]["count"], 12);

    let texture = image::open(dir.path().join("textures/stone_top.png"))
        .unwrap()
        .to_rgba8();
    assert_eq!(texture, checkerboard(16));

    // UVs pass through untouched without an atlas
    let uv = accessor_f32(&doc, dir.path(), attribute(&doc, 0, "TEXCOORD_0"));
    assert_eq!(uv.len(), 16);
    assert!(uv.iter().all(|v| *v == 0.0 || *v == 1.0));
}

#[test]
fn stone_scene_with_atlas() {
    let dir = tempfile::tempdir().unwrap();
    let report = export_stone(config(dir.path()));

    assert_eq!(report.vertices, 8);
    assert_eq!(report.textures, vec![dir.path().join("atlas/atlas_1001.png")]);

    let doc = read_document(&report.document);
    assert_eq!(doc["images"][0]["uri"], "atlas/atlas_1001.png");
    assert_eq!(doc["materials"][0]["pbrMetallicRoughness"]["baseColorTexture"]["index"], 0);

    let page = image::open(dir.path().join("atlas/atlas_1001.png"))
        .unwrap()
        .to_rgba8();
    assert_eq!(page.dimensions(), (64, 64));

    // a 16px sprite on a 64px page spans a quarter of the tile
    let uv = accessor_f32(&doc, dir.path(), attribute(&doc, 0, "TEXCOORD_0"));
    let us: Vec<f32> = uv.iter().step_by(2).copied().collect();
    let vs: Vec<f32> = uv.iter().skip(1).step_by(2).copied().collect();
    let (u_min, u_max) = extent(&us);
    let (v_min, v_max) = extent(&vs);
    assert_eq!(u_max - u_min, 0.25);
    assert_eq!(v_max - v_min, 0.25);
    assert!(u_min >= 0.0 && u_max <= 1.0);
    assert!(v_min >= 0.0 && v_max <= 1.0);

    // the sprite's pixels were copied into the page at its placement
    let x = (u_min * 64.0) as u32;
    let y = (v_min * 64.0) as u32;
    for dy in 0..16 {
        for dx in 0..16 {
            assert_eq!(
                page.get_pixel(x + dx, y + dy),
                checkerboard(16).get_pixel(dx, dy)
            );
        }
    }
}

fn extent(values: &[f32]) -> (f32, f32) {
    values
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

#[test]
fn seeded_scene_across_fifty_materials() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut bitmaps = InMemoryBitmaps::new();
    for s in 0..5 {
        bitmaps.insert(format!("sprite_{}", s), solid(16, [40 * s as u8, 90, 200, 255]));
    }
    let tints = [0xFF_FF_FF, 0x7F_B2_38, 0x3F_76_E4];

    let exporter = SceneExporter::new(config(dir.path()).with_atlas_size(256)).unwrap();
    let mut used = BTreeSet::new();
    for i in 0..1000 {
        let material = format!("material_{:02}", rng.gen_range(0..50));
        let sprite = format!("sprite_{}", rng.gen_range(0..5));
        let x = (i % 40) as f32 * 2.0;
        let z = (i / 40) as f32 * 2.0;
        let mut quad = floor_quad(&material, &sprite, x, 0.0, z)
            .with_tint(tints[rng.gen_range(0..tints.len())]);
        // producers do not wind corners consistently
        let rotate = rng.gen_range(0..4);
        quad.positions.rotate_left(rotate * 3);
        quad.uv0.rotate_left(rotate * 2);
        used.insert(material);
        exporter.add_quad(quad).unwrap();
    }
    let report = exporter.write(&bitmaps).unwrap();

    assert_eq!(report.quads.stored, 1000);
    assert_eq!(report.quads.accepted, 1000);
    assert_eq!(report.quads.duplicates, 0);
    assert_eq!(report.vertices, 4000);
    assert_eq!(report.indices, 6000);
    assert_eq!(report.materials, used.len());
    assert_eq!(report.unplaced_quads, 0);

    let doc = read_document(&report.document);
    let names: BTreeSet<String> = doc["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, used);
    assert_eq!(array_len(&doc, "accessors"), used.len() * 5);
    assert_eq!(array_len(&doc, "bufferViews"), used.len() * 5);

    // every mesh uses only its own accessors and indexes only its own vertices
    for mesh in 0..used.len() {
        let own = mesh * 5..mesh * 5 + 5;
        for semantic in ["POSITION", "TEXCOORD_0", "TEXCOORD_1", "COLOR_0"] {
            assert!(own.contains(&attribute(&doc, mesh, semantic)));
        }
        assert!(own.contains(&indices(&doc, mesh)));
        assert_eq!(doc["meshes"][mesh]["primitives"][0]["material"], mesh);

        let count = doc["accessors"][attribute(&doc, mesh, "POSITION")]["count"]
            .as_u64()
            .unwrap() as u32;
        let idx = accessor_u32(&doc, dir.path(), indices(&doc, mesh));
        assert_eq!(idx.len() as u32 * 2, count * 3);
        assert!(idx.iter().all(|i| *i < count));
    }
}

#[test]
fn upward_faces_wind_counter_clockwise() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path())).unwrap();
    let mut quad = floor_quad("grass", "stone_top", 0.0, 0.0, 0.0);
    quad.positions.rotate_left(6);
    exporter.add_quad(quad).unwrap();
    let report = exporter.write(&stone_bitmaps()).unwrap();

    let doc = read_document(&report.document);
    let p = accessor_f32(&doc, dir.path(), attribute(&doc, 0, "POSITION"));
    let idx = accessor_u32(&doc, dir.path(), indices(&doc, 0));
    for tri in idx.chunks_exact(3) {
        let v = |i: u32| {
            let i = i as usize * 3;
            [p[i], p[i + 1], p[i + 2]]
        };
        let (a, b, c) = (v(tri[0]), v(tri[1]), v(tri[2]));
        let e1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
        let e2 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
        let ny = e1[2] * e2[0] - e1[0] * e2[2];
        assert!(ny > 0.0, "triangle {:?} faces down", tri);
    }
}

#[test]
fn buffers_roll_over_at_the_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path()).with_max_buffer_bytes(700)).unwrap();
    for i in 0..10 {
        exporter
            .add_quad(floor_quad("stone", "stone_top", i as f32 * 2.0, 0.0, 0.0))
            .unwrap();
    }
    let report = exporter.write(&stone_bitmaps()).unwrap();

    assert!(report.buffers.len() > 1);
    let doc = read_document(&report.document);
    assert_eq!(array_len(&doc, "buffers"), report.buffers.len());
    assert_eq!(doc["buffers"][0]["uri"], "scene.bin");
    assert_eq!(doc["buffers"][1]["uri"], "scene_1.bin");
    for (i, path) in report.buffers.iter().enumerate() {
        let size = std::fs::metadata(path).unwrap().len();
        assert!(size <= 700);
        assert_eq!(doc["buffers"][i]["byteLength"].as_u64().unwrap(), size);
    }
    let idx = accessor_u32(&doc, dir.path(), indices(&doc, 0));
    assert_eq!(idx.len(), 60);
}

#[test]
fn array_larger_than_ceiling_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path()).with_max_buffer_bytes(64)).unwrap();
    for i in 0..4 {
        exporter
            .add_quad(floor_quad("stone", "stone_top", i as f32 * 2.0, 0.0, 0.0))
            .unwrap();
    }
    let err = exporter.write(&stone_bitmaps()).unwrap_err();
    assert!(matches!(err, ExportError::Configuration(_)));
}

#[test]
fn empty_session_has_no_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path())).unwrap();
    let err = exporter.write(&stone_bitmaps()).unwrap_err();
    assert!(matches!(err, ExportError::NoGeometry));
    assert!(!dir.path().join("scene.gltf").exists());
}

#[test]
fn all_degenerate_quads_have_no_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path())).unwrap();
    exporter
        .add_quad(Quad::new("stone", "stone_top", [1.0; 12], UNIT_UV))
        .unwrap();
    let err = exporter.write(&stone_bitmaps()).unwrap_err();
    assert!(matches!(err, ExportError::NoGeometry));
}

#[test]
fn quads_without_keys_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path())).unwrap();
    exporter.add_quad(floor_quad("", "stone_top", 0.0, 0.0, 0.0)).unwrap();
    exporter.add_quad(floor_quad("stone", "", 0.0, 0.0, 0.0)).unwrap();
    exporter
        .add_quad(floor_quad("stone", "stone_top", 0.0, 0.0, 0.0))
        .unwrap();
    let report = exporter.write(&stone_bitmaps()).unwrap();
    assert_eq!(report.quads.submitted, 3);
    assert_eq!(report.quads.ignored, 2);
    assert_eq!(report.quads.stored, 1);
}

#[test]
fn repeated_quads_collapse_to_one() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path())).unwrap();
    for rotate in 0..3 {
        let mut quad = floor_quad("stone", "stone_top", 0.0, 0.0, 0.0);
        quad.positions.rotate_left(rotate * 3);
        quad.uv0.rotate_left(rotate * 2);
        exporter.add_quad(quad).unwrap();
    }
    let report = exporter.write(&stone_bitmaps()).unwrap();
    assert_eq!(report.quads.accepted, 1);
    assert_eq!(report.quads.duplicates, 2);
    assert_eq!(report.vertices, 4);
    assert_eq!(report.indices, 6);
}

#[test]
fn oversize_bitmap_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path())).unwrap();
    exporter
        .add_quad(floor_quad("stone", "huge", 0.0, 0.0, 0.0))
        .unwrap();
    let bitmaps = InMemoryBitmaps::new().with("huge", solid(128, [1, 2, 3, 255]));
    match exporter.write(&bitmaps) {
        Err(ExportError::Configuration(message)) => assert!(message.contains("huge")),
        other => panic!("expected a configuration error, got {:?}", other.map(|r| r.document)),
    }
    // staging survives a failed export
    assert!(exporter.config().staging_dir().exists());
}

#[test]
fn missing_bitmap_uses_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path())).unwrap();
    exporter
        .add_quad(floor_quad("dirt", "dirt", 0.0, 0.0, 0.0))
        .unwrap();
    let report = exporter.write(&InMemoryBitmaps::new()).unwrap();
    assert_eq!(report.missing_bitmaps.len(), 1);
    assert_eq!(report.missing_bitmaps[0].as_str(), "dirt");
    assert_eq!(report.materials, 1);
    assert!(report.to_json().unwrap().contains("\"missing_bitmaps\""));
}

#[test]
fn tinted_variants_get_their_own_placement() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path())).unwrap();
    exporter
        .add_quad(floor_quad("leaves", "white", 0.0, 0.0, 0.0))
        .unwrap();
    exporter
        .add_quad(floor_quad("leaves", "white", 2.0, 0.0, 0.0).with_tint(0x00_FF_00))
        .unwrap();
    let bitmaps = InMemoryBitmaps::new().with("white", solid(8, [255, 255, 255, 255]));
    let report = exporter.write(&bitmaps).unwrap();
    assert_eq!(report.vertices, 8);

    let page = image::open(&report.textures[0]).unwrap().to_rgba8();
    let pixels: BTreeSet<[u8; 4]> = page.pixels().map(|p| p.0).collect();
    assert!(pixels.contains(&[255, 255, 255, 255]));
    assert!(pixels.contains(&[0, 255, 0, 255]));
}

#[test]
fn sprite_space_overlay_is_packed() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(
        config(dir.path()).with_secondary_uv(SecondaryUv::SpriteSpace),
    )
    .unwrap();
    exporter
        .add_quad(
            floor_quad("grass", "stone_top", 0.0, 0.0, 0.0)
                .with_overlay("grass_overlay")
                .with_uv1(UNIT_UV),
        )
        .unwrap();
    let bitmaps = stone_bitmaps().with("grass_overlay", solid(16, [0, 200, 0, 128]));
    let report = exporter.write(&bitmaps).unwrap();

    let doc = read_document(&report.document);
    let uv0 = accessor_f32(&doc, dir.path(), attribute(&doc, 0, "TEXCOORD_0"));
    let uv1 = accessor_f32(&doc, dir.path(), attribute(&doc, 0, "TEXCOORD_1"));
    assert!(uv1.iter().all(|v| *v >= 0.0 && *v <= 0.5));
    assert_ne!(uv0, uv1);

    let overlay = exporter.sprite_index().id("grass_overlay").unwrap();
    let usage = exporter.sprite_index().usage(overlay).unwrap();
    assert_eq!(usage.quad_count, 0);
    assert!(usage.tints.contains(&0xFF_FF_FF));
}

#[test]
fn lookup_overlay_does_not_add_a_white_variant() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path())).unwrap();
    exporter
        .add_quad(
            floor_quad("grass", "grass", 0.0, 0.0, 0.0)
                .with_tint(0x00_FF_00)
                .with_overlay("grass"),
        )
        .unwrap();
    let bitmaps = InMemoryBitmaps::new().with("grass", solid(8, [255, 255, 255, 255]));
    let report = exporter.write(&bitmaps).unwrap();

    let grass = exporter.sprite_index().id("grass").unwrap();
    let usage = exporter.sprite_index().usage(grass).unwrap();
    assert_eq!(usage.quad_count, 1);
    assert_eq!(usage.tints.into_iter().collect::<Vec<_>>(), vec![0x00_FF_00]);

    let page = image::open(&report.textures[0]).unwrap().to_rgba8();
    assert!(page.pixels().any(|p| p.0 == [0, 255, 0, 255]));
    assert!(page.pixels().all(|p| p.0 != [255, 255, 255, 255]));
}

#[test]
fn individual_texture_uses_first_tint() {
    let dir = tempfile::tempdir().unwrap();
    let exporter =
        SceneExporter::new(config(dir.path()).with_atlas_mode(AtlasMode::Individual)).unwrap();
    exporter
        .add_quad(floor_quad("leaves", "white", 0.0, 0.0, 0.0).with_tint(0x00_FF_00))
        .unwrap();
    exporter
        .add_quad(floor_quad("leaves", "white", 2.0, 0.0, 0.0))
        .unwrap();
    let bitmaps = InMemoryBitmaps::new().with("white", solid(8, [255, 255, 255, 255]));
    let report = exporter.write(&bitmaps).unwrap();

    assert_eq!(report.textures, vec![dir.path().join("textures/white.png")]);
    let texture = image::open(&report.textures[0]).unwrap().to_rgba8();
    assert!(texture.pixels().all(|p| p.0 == [0, 255, 0, 255]));
}

#[test]
fn concurrent_producers_share_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = Arc::new(
        SceneExporter::new(config(dir.path()).with_intake_capacity(8)).unwrap(),
    );
    std::thread::scope(|scope| {
        for t in 0..8 {
            let sink: Arc<dyn QuadSink> = exporter.clone();
            scope.spawn(move || {
                for i in 0..125 {
                    let quad = floor_quad(
                        &format!("m{}", t % 3),
                        "stone_top",
                        i as f32 * 2.0,
                        t as f32 * 2.0,
                        0.0,
                    );
                    sink.add_quad(quad).unwrap();
                }
            });
        }
    });
    let report = exporter.write(&stone_bitmaps()).unwrap();
    assert_eq!(report.quads.stored, 1000);
    assert_eq!(report.quads.accepted, 1000);
    assert_eq!(report.materials, 3);
    assert_eq!(report.vertices, 4000);
}

#[test]
fn quads_racing_write_are_stored_or_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = SceneExporter::new(config(dir.path()).with_intake_capacity(4)).unwrap();
    let acknowledged = AtomicU64::new(0);
    let (report, rejection) = std::thread::scope(|scope| {
        let producer = scope.spawn(|| {
            let mut i = 0u32;
            loop {
                let quad = floor_quad("stone", "stone_top", i as f32 * 2.0, 0.0, 0.0);
                if let Err(e) = exporter.add_quad(quad) {
                    return e;
                }
                acknowledged.fetch_add(1, Ordering::SeqCst);
                i += 1;
            }
        });
        while acknowledged.load(Ordering::SeqCst) < 100 {
            std::thread::yield_now();
        }
        let report = exporter.write(&stone_bitmaps()).unwrap();
        (report, producer.join().unwrap())
    });

    assert!(matches!(rejection, ExportError::IntakeClosed));
    let acknowledged = acknowledged.load(Ordering::SeqCst);
    assert!(acknowledged >= 100);
    assert_eq!(report.quads.submitted, acknowledged);
    assert_eq!(report.quads.stored, acknowledged);
    assert_eq!(report.quads.accepted, acknowledged);
}

#[test]
fn session_reports_phases_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let exporter = SceneExporter::new(config(dir.path()))
        .unwrap()
        .with_progress(move |p| {
            let mut phases = sink.lock().unwrap();
            if phases.last() != Some(&p.phase) {
                phases.push(p.phase);
            }
        });
    exporter
        .add_quad(floor_quad("stone", "stone_top", 0.0, 0.0, 0.0))
        .unwrap();
    let report = exporter.write(&stone_bitmaps()).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ExportPhase::FinalizeStore,
            ExportPhase::Atlas,
            ExportPhase::Remap,
            ExportPhase::Assemble,
            ExportPhase::FinalizeDocument,
            ExportPhase::Complete,
        ]
    );
    assert_eq!(report.phases.len(), 6);
    assert!(matches!(
        exporter.add_quad(floor_quad("stone", "stone_top", 0.0, 0.0, 0.0)),
        Err(ExportError::IntakeClosed)
    ));
}
