mod common;

use common::write_cube;
use std::collections::BTreeMap;
use std::sync::Arc;
use tile_dataset::{DataSources, DatasetSpec};
use training::{LoaderCache, LoaderContext, TrainError};

fn cache(root: &std::path::Path) -> LoaderCache {
    let spec = DatasetSpec {
        tile_size: 2,
        ..DatasetSpec::default()
    };
    LoaderCache::new(
        LoaderContext {
            data_root: root.to_path_buf(),
            sources: DataSources::parse(&["planet"]).unwrap(),
            batch_size: 3,
            data_threads: 2,
        },
        BTreeMap::from([("train".to_string(), spec)]),
    )
}

#[test]
fn same_name_returns_the_same_loader() {
    let tmp = tempfile::tempdir().unwrap();
    write_cube(&tmp.path().join("planet_cubes"), "scene_a");
    let mut loaders = cache(tmp.path());
    let first = loaders.get("train").unwrap();
    let second = loaders.get("train").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(loaders.len(), 1);
    assert_eq!(first.options().batch_size, 3);
    assert_eq!(first.len(), 4);
}

#[test]
fn slump_tiles_filters_and_is_cached_separately() {
    let tmp = tempfile::tempdir().unwrap();
    write_cube(&tmp.path().join("planet_cubes"), "scene_a");
    let mut loaders = cache(tmp.path());
    let slumps = loaders.get("slump_tiles(train)").unwrap();
    assert_eq!(slumps.len(), 1);
    assert_eq!(slumps.dataset().tiles[0].name, "scene_a_0");
    let all = loaders.get("train").unwrap();
    assert!(!Arc::ptr_eq(&slumps, &all));
    assert_eq!(loaders.len(), 2);
}

#[test]
fn unresolvable_names_do_not_populate_the_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let mut loaders = cache(tmp.path());
    assert!(matches!(
        loaders.get("slump_tiles(test)"),
        Err(TrainError::UnresolvableLoader(_))
    ));
    assert!(loaders.is_empty());
}
