use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::{Rgb, RgbImage};
use rstest::*;
use tempfile::TempDir;
use visearch::embedding::ThumbnailEmbedder;
use visearch::index::AddOutcome;
use visearch::metadata::{KEY_HASH, KEY_ID};
use visearch::{Error, IndexBuilder, VectorIndex};

const DIM: usize = 128;

fn write_image(path: &Path, f: impl Fn(u32, u32) -> u8) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_fn(64, 48, |x, y| {
        let v = f(x, y);
        Rgb([v, v, 255 - v])
    })
    .save(path)
    .unwrap();
}

/// root/cats/{a,b}.png, root/dogs/{c,dup}.png 以及无法解码的 root/dogs/bad.jpg
#[fixture]
fn dataset() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_image(&root.join("cats/a.png"), |x, _| (x * 4) as u8);
    write_image(&root.join("cats/b.png"), |_, y| (y * 5) as u8);
    write_image(&root.join("dogs/c.png"), |x, y| if (x / 8 + y / 8) % 2 == 0 { 0 } else { 255 });
    fs::copy(root.join("cats/a.png"), root.join("dogs/dup.png")).unwrap();
    fs::write(root.join("dogs/bad.jpg"), b"definitely not a jpeg").unwrap();
    fs::write(root.join("dogs/notes.txt"), b"ignored").unwrap();
    dir
}

#[fixture]
fn builder() -> IndexBuilder {
    IndexBuilder::new(Arc::new(ThumbnailEmbedder::new(DIM).unwrap()))
}

fn open(dir: &TempDir) -> VectorIndex {
    VectorIndex::new(DIM, dir.path().join("vectors.bin"), dir.path().join("metadata.json"))
}

#[rstest]
fn scan_filters_by_suffix(dataset: TempDir, builder: IndexBuilder) {
    let files = builder.scan(dataset.path());
    assert_eq!(files.len(), 5);
    assert!(files.iter().all(|p| p.extension().unwrap() != "txt"));

    let only_jpg = builder.suffix("JPG").scan(dataset.path());
    assert_eq!(only_jpg.len(), 1);
}

#[rstest]
fn build_skips_bad_items(dataset: TempDir, builder: IndexBuilder) {
    let out = TempDir::new().unwrap();
    let index = open(&out);

    let summary = builder.build(dataset.path(), &index).unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.skipped(), 1);
    assert!(summary.failures[0].path.ends_with("dogs/bad.jpg"));

    assert_eq!(index.counts(), (4, 4));
    assert!(index.vector_path().exists());
    let classes = index.class_counts();
    assert_eq!(classes.get("cats"), Some(&2));
    assert_eq!(classes.get("dogs"), Some(&2));

    let (_, first) = index.get(0).unwrap();
    assert_eq!(first.filename(), Some("a.png"));
    assert_eq!(first.class(), Some("cats"));
}

#[rstest]
fn identical_files_keep_their_own_class(dataset: TempDir, builder: IndexBuilder) {
    let out = TempDir::new().unwrap();
    let index = open(&out);
    builder.build(dataset.path(), &index).unwrap();

    let (_, original) = index.find_by_key("filename", "a.png").unwrap();
    let (_, copy) = index.find_by_key("filename", "dup.png").unwrap();
    assert_eq!(original.class(), Some("cats"));
    assert_eq!(copy.class(), Some("dogs"));
    assert_eq!(original.get_str(KEY_HASH), copy.get_str(KEY_HASH));
    assert_ne!(original.get_str(KEY_ID), copy.get_str(KEY_ID));

    let copy_id = copy.get_str(KEY_ID).unwrap();
    assert_eq!(index.find_by_key(KEY_ID, copy_id).unwrap().1, copy);
}

#[rstest]
fn built_image_finds_itself(dataset: TempDir, builder: IndexBuilder) {
    let out = TempDir::new().unwrap();
    let index = open(&out);
    builder.build(dataset.path(), &index).unwrap();

    let (feature, _) = builder.embed_file(&dataset.path().join("dogs/c.png")).unwrap();
    let hits = index.search(&feature, 3).unwrap();
    assert_eq!(hits[0].metadata.filename(), Some("c.png"));
    assert_eq!(hits[0].distance, 0.);
    assert!(hits[1].distance > 0.);
}

#[rstest]
fn nothing_processed_keeps_index(builder: IndexBuilder) {
    let dataset = TempDir::new().unwrap();
    fs::create_dir_all(dataset.path().join("x")).unwrap();
    fs::write(dataset.path().join("x/broken.png"), b"???").unwrap();

    let out = TempDir::new().unwrap();
    let index = open(&out);
    let err = builder.build(dataset.path(), &index).unwrap_err();
    assert!(matches!(err, Error::NoItemsProcessed { skipped: 1 }));
    assert!(index.is_empty());
    assert!(!index.vector_path().exists());
}

#[rstest]
fn add_detects_duplicates(dataset: TempDir, builder: IndexBuilder) {
    let out = TempDir::new().unwrap();
    let index = open(&out);
    builder.build(dataset.path(), &index).unwrap();

    let dup = dataset.path().join("dogs/dup.png");
    assert_eq!(builder.add_image(&index, &dup, false).unwrap(), AddOutcome::Duplicate(0));
    assert!(!index.is_dirty());

    assert_eq!(builder.add_image(&index, &dup, true).unwrap(), AddOutcome::Added(4));
    assert!(index.is_dirty());
}

#[rstest]
fn add_unreadable_file(builder: IndexBuilder) {
    let out = TempDir::new().unwrap();
    let index = open(&out);
    let err = builder.add_image(&index, &out.path().join("missing.png"), false).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
    assert!(index.is_empty());
}

#[rstest]
fn embedder_dimension_must_match(dataset: TempDir, builder: IndexBuilder) {
    let out = TempDir::new().unwrap();
    let index = VectorIndex::new(64, out.path().join("v.bin"), out.path().join("m.json"));
    let err = builder.build(dataset.path(), &index).unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 64, actual: DIM }));
}
