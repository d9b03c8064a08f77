#![cfg(feature = "cli")]

mod common;

use std::process::Command;

use common::{Segments, build_compressed, build_single, cover, make_new};

fn oxipatch() -> Command {
    Command::new(env!("CARGO_BIN_EXE_oxipatch"))
}

#[test]
fn cli_patch_applies_compressed_diff() {
    let dir = tempfile::tempdir().unwrap();
    let old: Vec<u8> = (0..=200u8).collect();
    let covers = [cover(10, 0, 50), cover(120, 55, 40)];
    let new = make_new(&old, &covers, b"helloworld", 100);
    let diff = build_compressed(&old, &new, &covers, Segments::Stored);

    let old_path = dir.path().join("old.bin");
    let diff_path = dir.path().join("patch.hdiff");
    let new_path = dir.path().join("new.bin");
    std::fs::write(&old_path, &old).unwrap();
    std::fs::write(&diff_path, &diff).unwrap();

    let status = oxipatch()
        .args(["patch"])
        .arg(&old_path)
        .arg(&diff_path)
        .arg(&new_path)
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(std::fs::read(&new_path).unwrap(), new);

    // existing output is refused without -f
    let status = oxipatch()
        .args(["patch"])
        .arg(&old_path)
        .arg(&diff_path)
        .arg(&new_path)
        .status()
        .unwrap();
    assert!(!status.success());

    let status = oxipatch()
        .args(["patch", "-f", "--budget", "1M"])
        .arg(&old_path)
        .arg(&diff_path)
        .arg(&new_path)
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(std::fs::read(&new_path).unwrap(), new);
}

#[test]
fn cli_patch_rejects_garbage_diff() {
    let dir = tempfile::tempdir().unwrap();
    let old_path = dir.path().join("old.bin");
    let diff_path = dir.path().join("patch.hdiff");
    std::fs::write(&old_path, b"old data").unwrap();
    std::fs::write(&diff_path, b"not a diff at all").unwrap();

    let out = oxipatch()
        .args(["patch"])
        .arg(&old_path)
        .arg(&diff_path)
        .arg(dir.path().join("new.bin"))
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("patch error"));
}

#[test]
fn cli_info_reports_both_formats() {
    let dir = tempfile::tempdir().unwrap();
    let old = b"ABCDEFGH";
    let covers = [cover(2, 0, 4)];
    let new = make_new(old, &covers, b"XY", 6);

    let diffz = dir.path().join("z.hdiff");
    std::fs::write(&diffz, build_compressed(old, &new, &covers, Segments::Stored)).unwrap();
    let out = oxipatch().arg("info").arg(&diffz).output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout).to_string();
    assert!(text.contains("HDIFF13"));
    assert!(text.contains("new data size: 6"));

    let diffs = dir.path().join("s.hdiff");
    std::fs::write(&diffs, build_single(old, &new, &covers)).unwrap();
    let out = oxipatch().arg("info").arg(&diffs).output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout).to_string();
    assert!(text.contains("HDIFFSF20"));
    assert!(text.contains("cover count:   1"));
}

#[test]
fn cli_info_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let old = b"ABCDEFGH";
    let covers = [cover(2, 0, 4)];
    let new = make_new(old, &covers, b"XY", 6);
    let diff_path = dir.path().join("z.hdiff");
    std::fs::write(&diff_path, build_compressed(old, &new, &covers, Segments::Stored)).unwrap();

    let out = oxipatch()
        .args(["info", "--json"])
        .arg(&diff_path)
        .output()
        .unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(text.contains("\"format\""));
    assert!(text.contains("\"new_data_size\": 6"));
}
