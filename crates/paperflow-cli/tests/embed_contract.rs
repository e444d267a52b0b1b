use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::Path;

fn write_shard(root: &Path, name: &str, lines: &[&str]) {
    let dir = root.join("works");
    fs::create_dir_all(&dir).unwrap();
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    for l in lines {
        enc.write_all(l.as_bytes()).unwrap();
        enc.write_all(b"\n").unwrap();
    }
    fs::write(dir.join(name), enc.finish().unwrap()).unwrap();
}

const EMBEDDABLE: &str = r#"{"id":"W1","type":"article","doi":"10.1/x","abstract_inverted_index":{"hello":[0],"world":[1]},"open_access":{"is_oa":true}}"#;
const NO_DOI: &str = r#"{"id":"W2","type":"article","abstract_inverted_index":{"orphan":[0]},"open_access":{"is_oa":true}}"#;
const REJECTED_WITH_DOI: &str = r#"{"id":"W3","type":"dataset","doi":"10.1/ghost","abstract_inverted_index":{"lost":[0]},"open_access":{"is_oa":true}}"#;

fn run_embed(root: &Path, extra: &[&str]) -> serde_json::Value {
    let bin = assert_cmd::cargo::cargo_bin!("paperflow");
    let out = std::process::Command::new(bin)
        .args(["embed", "--root"])
        .arg(root)
        .args(["--encoder", "hash", "--dimension", "16"])
        .args(extra)
        .output()
        .expect("run paperflow embed");
    assert!(
        out.status.success(),
        "embed failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("parse embed json")
}

#[test]
fn embed_writes_parquet_and_marker_then_converges() {
    let tmp = tempfile::tempdir().unwrap();
    write_shard(tmp.path(), "s0.json.gz", &[EMBEDDABLE, NO_DOI, REJECTED_WITH_DOI]);

    let v = run_embed(tmp.path(), &[]);
    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("embed"));
    assert_eq!(v["stats"]["shards_processed"].as_u64(), Some(1));
    assert_eq!(v["stats"]["records_embedded"].as_u64(), Some(1));
    assert!(tmp.path().join("embeddings/s0.parquet").is_file());
    assert!(tmp.path().join("markers/s0.done").is_file());

    // Second pass finds nothing left to do.
    let v = run_embed(tmp.path(), &[]);
    assert_eq!(v["stats"]["shards_processed"].as_u64(), Some(0));
    assert_eq!(fs::read_dir(tmp.path().join("markers")).unwrap().count(), 1);
    assert_eq!(
        fs::read_dir(tmp.path().join("embeddings")).unwrap().count(),
        1
    );
}

#[test]
fn embed_window_env_vars_bound_the_work() {
    let tmp = tempfile::tempdir().unwrap();
    write_shard(tmp.path(), "s0.json.gz", &[EMBEDDABLE]);
    write_shard(tmp.path(), "s1.json.gz", &[EMBEDDABLE]);
    write_shard(tmp.path(), "s2.json.gz", &[EMBEDDABLE]);

    let bin = assert_cmd::cargo::cargo_bin!("paperflow");
    let out = std::process::Command::new(bin)
        .args(["embed", "--root"])
        .arg(tmp.path())
        .args(["--encoder", "hash", "--dimension", "16"])
        .env("PAPERFLOW_SHARD_OFFSET", "1")
        .env("PAPERFLOW_SHARDS_PER_JOB", "1")
        .output()
        .expect("run paperflow embed");
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["offset"].as_u64(), Some(1));
    assert_eq!(v["stats"]["shards_processed"].as_u64(), Some(1));

    // Listing order is lexicographic, so offset 1 is s1.
    assert!(tmp.path().join("markers/s1.done").is_file());
    assert!(!tmp.path().join("markers/s0.done").exists());
    assert!(!tmp.path().join("markers/s2.done").exists());
}

#[test]
fn embed_marks_empty_shards_without_data_files() {
    let tmp = tempfile::tempdir().unwrap();
    write_shard(tmp.path(), "s0.json.gz", &[NO_DOI]);

    let v = run_embed(tmp.path(), &[]);
    assert_eq!(v["stats"]["shards_processed"].as_u64(), Some(1));
    assert_eq!(v["stats"]["shards_empty"].as_u64(), Some(1));
    assert!(tmp.path().join("markers/s0.done").is_file());
    assert!(!tmp.path().join("embeddings").exists());
}
