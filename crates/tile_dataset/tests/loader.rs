use burn::backend::NdArray;
use ndarray::{Array2, Array3};
use scene_cube::{GeoTransform, Grid, Layer, Scene};
use std::collections::BTreeMap;
use std::path::Path;
use tile_dataset::{
    build_pool, DataSources, DatasetError, DatasetSpec, TileLoader, VisualizationSpec,
};

type B = NdArray<f32>;

/// 4x4 planet scene with a slump in the top-left 2x2 tile only.
fn write_cube(dir: &Path, id: &str, offset: f32) {
    let grid = Grid {
        crs: Some("EPSG:32606".into()),
        width: 4,
        height: 4,
        transform: GeoTransform {
            origin_x: 0.0,
            origin_y: 12.0,
            pixel_width: 3.0,
            pixel_height: -3.0,
        },
    };
    let mut scene = Scene::new(id, grid, None);
    let planet = Array3::from_shape_fn((4, 4, 4), |(b, r, c)| offset + (b * 16 + r * 4 + c) as f32);
    scene
        .push_layer(Layer::new(
            "planet",
            ["blue", "green", "red", "nir"].map(String::from).to_vec(),
            planet,
        ))
        .unwrap();
    let mut mask = Array2::<u8>::zeros((4, 4));
    mask[[0, 0]] = 1;
    mask[[3, 3]] = 255;
    scene.set_mask(mask).unwrap();
    scene.save(dir, "nc").unwrap();
}

fn fixture() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let cubes = tmp.path().join("planet_cubes");
    write_cube(&cubes, "scene_a", 0.0);
    write_cube(&cubes, "scene_b", 10_000.0);
    tmp
}

#[test]
fn tiles_are_batched_in_row_major_order() {
    let tmp = fixture();
    let sources = DataSources::parse(&["planet"]).unwrap();
    let spec = DatasetSpec {
        tile_size: 2,
        ..DatasetSpec::default()
    };
    let loader = TileLoader::from_spec(tmp.path(), &spec, &sources, 3, build_pool(2).unwrap()).unwrap();
    assert_eq!(loader.len(), 8);
    assert_eq!(loader.num_batches(), 3);

    let device = Default::default();
    let batches: Vec<_> = loader.iter::<B>(&device).collect();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].images.dims(), [3, 4, 2, 2]);
    assert_eq!(batches[0].targets.dims(), [3, 2, 2]);
    assert_eq!(batches[2].len(), 2);
    assert_eq!(batches[0].names, vec!["scene_a_0", "scene_a_1", "scene_a_2"]);
    assert_eq!(batches[1].names[1], "scene_b_0");
    assert_eq!(&batches[0].labels[..4], &[1, 0, 0, 0]);

    let first: Vec<f32> = batches[0].images.clone().into_data().to_vec().unwrap();
    // scene_a tile 0, blue band, pixel (0, 1): 1 / 10000
    assert!((first[1] - 0.0001).abs() < 1e-7);
}

#[test]
fn shuffle_changes_between_passes_but_is_seeded() {
    let tmp = fixture();
    let sources = DataSources::parse(&["planet", "ndvi"]).unwrap();
    let spec = DatasetSpec {
        tile_size: 2,
        shuffle: true,
        seed: 7,
        ..DatasetSpec::default()
    };
    let names = |loader: &TileLoader| -> Vec<String> {
        loader.raw_batches().flat_map(|b| b.names).collect()
    };
    let a = TileLoader::from_spec(tmp.path(), &spec, &sources, 8, build_pool(1).unwrap()).unwrap();
    let b = TileLoader::from_spec(tmp.path(), &spec, &sources, 8, build_pool(1).unwrap()).unwrap();
    let a_passes: Vec<_> = (0..4).map(|_| names(&a)).collect();
    let b_passes: Vec<_> = (0..4).map(|_| names(&b)).collect();
    assert_eq!(a_passes, b_passes);
    assert!(a_passes.windows(2).any(|w| w[0] != w[1]));
    let mut sorted = a_passes[0].clone();
    sorted.sort();
    assert_eq!(sorted.len(), 8);
    assert_eq!(a.dataset().channels, 5);
}

#[test]
fn slump_filter_and_scene_allow_list() {
    let tmp = fixture();
    let sources = DataSources::parse(&["planet"]).unwrap();
    let spec = DatasetSpec {
        tile_size: 2,
        scenes: Some(vec!["scene_b".into()]),
        ..DatasetSpec::default()
    };
    let pool = build_pool(1).unwrap();
    let dataset = tile_dataset::TileDataset::load(tmp.path(), &spec, &sources, &pool).unwrap();
    assert_eq!(dataset.len(), 4);
    let slumps = dataset.slumps_only();
    assert_eq!(slumps.len(), 1);
    assert_eq!(slumps.tiles[0].name, "scene_b_0");
}

#[test]
fn drop_last_skips_the_partial_batch() {
    let tmp = fixture();
    let sources = DataSources::parse(&["planet"]).unwrap();
    let spec = DatasetSpec {
        tile_size: 2,
        drop_last: true,
        batch_size: Some(3),
        augment: true,
        ..DatasetSpec::default()
    };
    let loader = TileLoader::from_spec(tmp.path(), &spec, &sources, 100, build_pool(2).unwrap()).unwrap();
    let sizes: Vec<usize> = loader.raw_batches().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![3, 3]);
}

#[test]
fn visualization_tiles_are_picked_by_index() {
    let tmp = fixture();
    let sources = DataSources::parse(&["planet"]).unwrap();
    let mut tiles = BTreeMap::new();
    tiles.insert("scene_a".to_string(), vec![3, 0]);
    let spec = VisualizationSpec {
        cube_dir: "planet_cubes".into(),
        tile_size: 2,
        tiles,
    };
    let pool = build_pool(1).unwrap();
    let dataset = spec.load(tmp.path(), &sources, &pool).unwrap();
    let names: Vec<_> = dataset.tiles.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["scene_a_3", "scene_a_0"]);
    assert_eq!(dataset.tiles[0].target[3], 255);

    let mut bad = spec.clone();
    bad.tiles.insert("scene_a".into(), vec![9]);
    assert!(bad.load(tmp.path(), &sources, &pool).is_err());
}

#[test]
fn visualization_scene_without_cube_is_an_error() {
    let tmp = fixture();
    let sources = DataSources::parse(&["planet"]).unwrap();
    let spec = VisualizationSpec {
        cube_dir: "planet_cubes".into(),
        tile_size: 2,
        tiles: BTreeMap::from([
            ("scene_a".to_string(), vec![0]),
            ("scene_c".to_string(), vec![0]),
        ]),
    };
    let pool = build_pool(1).unwrap();
    match spec.load(tmp.path(), &sources, &pool) {
        Err(DatasetError::MissingScene { scene, .. }) => assert_eq!(scene, "scene_c"),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn loader_slump_view_keeps_options_and_valid_pixel_check() {
    let tmp = fixture();
    let sources = DataSources::parse(&["planet"]).unwrap();
    let spec = DatasetSpec {
        tile_size: 2,
        ..DatasetSpec::default()
    };
    let loader = TileLoader::from_spec(tmp.path(), &spec, &sources, 4, build_pool(1).unwrap())
        .unwrap()
        .slumps_only();
    assert_eq!(loader.len(), 2);
    assert_eq!(loader.options().batch_size, 4);

    let device = Default::default();
    let batches: Vec<_> = loader.iter::<B>(&device).collect();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].names, vec!["scene_a_0", "scene_b_0"]);
    assert!(batches[0].has_valid_pixels());
}
