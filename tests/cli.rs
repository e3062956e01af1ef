use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

fn write_image(path: &Path, f: impl Fn(u32, u32) -> u8) -> Result<()> {
    fs::create_dir_all(path.parent().unwrap())?;
    RgbImage::from_fn(48, 48, |x, y| {
        let v = f(x, y);
        Rgb([v, 255 - v, v / 2])
    })
    .save(path)?;
    Ok(())
}

#[fixture]
fn dataset() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("part1/ramp.png"), |x, _| (x * 5) as u8).unwrap();
    write_image(&dir.path().join("part1/bars.png"), |_, y| if y % 8 < 4 { 0 } else { 255 }).unwrap();
    write_image(&dir.path().join("part2/dots.png"), |x, y| ((x * y) % 255) as u8).unwrap();
    dir
}

#[rstest]
fn build_then_search(dataset: TempDir) -> Result<()> {
    let conf_dir = TempDir::new()?;
    let query = dataset.path().join("part1/bars.png");

    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "build", dataset.path())
        .success()
        .stdout(predicate::str::contains("[OK] indexed 3 images"));

    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "search", "-k", "1", &query)
        .success()
        .stdout(predicate::str::contains(query.to_str().unwrap()));

    Ok(())
}

#[rstest]
fn search_json_output(dataset: TempDir) -> Result<()> {
    let conf_dir = TempDir::new()?;
    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "build", dataset.path()).success();

    let output = Command::cargo_bin("visearch")?
        .args(["-d", "64", "search", "--output-format", "json"])
        .arg("-c")
        .arg(conf_dir.path())
        .arg(dataset.path().join("part2/dots.png"))
        .output()?;
    assert!(output.status.success());

    let results: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["score"], 0.0);
    assert_eq!(results[0]["metadata"]["class"], "part2");
    assert_eq!(results[0]["metadata"]["filename"], "dots.png");
    Ok(())
}

#[rstest]
fn add_then_info(dataset: TempDir) -> Result<()> {
    let conf_dir = TempDir::new()?;

    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "add", dataset.path().join("part1"))
        .success()
        .stdout(predicate::str::contains("[OK] Add").count(2));

    // 第二次添加同样的图片会被跳过
    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "add", dataset.path())
        .success()
        .stdout(predicate::str::contains("[SKIP]").count(2))
        .stdout(predicate::str::contains("[OK] Add").count(1));

    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "info")
        .success()
        .stdout(predicate::str::contains("items     : 3"))
        .stdout(predicate::str::contains("part1\t2"));

    Ok(())
}

#[rstest]
fn build_without_images_fails() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = TempDir::new()?;
    fs::create_dir_all(dataset.path().join("x"))?;
    fs::write(dataset.path().join("x/broken.jpg"), b"nope")?;

    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "build", dataset.path()).failure();
    assert!(!conf_dir.path().join("vector_index.bin").exists());
    Ok(())
}

#[rstest]
fn explain_writes_heatmap(dataset: TempDir) -> Result<()> {
    let conf_dir = TempDir::new()?;
    let image = dataset.path().join("part1/ramp.png");
    let output = conf_dir.path().join("heatmap.png");

    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "build", dataset.path()).success();
    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "explain", &image, "-o", &output)
        .success();

    let heatmap = image::open(&output)?;
    assert_eq!((heatmap.width(), heatmap.height()), (224, 224));

    cargo_run!("visearch", "-c", conf_dir.path(), "-d", "64", "explain", "missing").failure();
    Ok(())
}

#[rstest]
#[case::not_multiple_of_32("100")]
#[case::zero("0")]
fn rejects_bad_dimension(#[case] dimension: &str) -> Result<()> {
    cargo_run!("visearch", "-d", dimension, "info").failure();
    Ok(())
}
