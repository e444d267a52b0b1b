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

const ACCEPTED: &str = r#"{"id":"W1","type":"article","doi":"10.1/x","title":"T","abstract_inverted_index":{"hello":[0],"world":[1]},"open_access":{"is_oa":true},"authorships":[{"author":{"display_name":"Jane","id":"A1"}}]}"#;
const WRONG_TYPE: &str = r#"{"id":"W2","type":"dataset","abstract_inverted_index":{"x":[0]},"open_access":{"is_oa":true}}"#;
const CLOSED: &str = r#"{"id":"W3","type":"article","abstract_inverted_index":{"x":[0]},"open_access":{"is_oa":false}}"#;

#[test]
fn transform_reports_stats_and_writes_table_parts() {
    let tmp = tempfile::tempdir().unwrap();
    write_shard(
        tmp.path(),
        "s0.json.gz",
        &[ACCEPTED, WRONG_TYPE, CLOSED, "{not json"],
    );

    let bin = assert_cmd::cargo::cargo_bin!("paperflow");
    let out = std::process::Command::new(bin)
        .args(["transform", "--root"])
        .arg(tmp.path())
        .output()
        .expect("run paperflow transform");

    assert!(
        out.status.success(),
        "transform failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("parse transform json");
    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("transform"));
    assert_eq!(v["ok"].as_bool(), Some(true));
    assert_eq!(v["stats"]["shards"].as_u64(), Some(1));
    assert_eq!(v["stats"]["records_in"].as_u64(), Some(4));
    assert_eq!(v["stats"]["accepted"].as_u64(), Some(1));
    assert_eq!(v["stats"]["rejected"]["unsupported_type"].as_u64(), Some(1));
    assert_eq!(v["stats"]["rejected"]["not_open_access"].as_u64(), Some(1));
    assert_eq!(v["stats"]["rejected"]["malformed_json"].as_u64(), Some(1));

    let parts: Vec<_> = fs::read_dir(tmp.path().join("papers"))
        .expect("papers dir exists")
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(parts.len(), 1);
    assert!(parts[0].ends_with(".parquet"), "unexpected part: {parts:?}");
}

#[test]
fn transform_rerun_appends_a_second_part() {
    let tmp = tempfile::tempdir().unwrap();
    write_shard(tmp.path(), "s0.json.gz", &[ACCEPTED]);

    let bin = assert_cmd::cargo::cargo_bin!("paperflow");
    for _ in 0..2 {
        let out = std::process::Command::new(&bin)
            .args(["transform", "--root"])
            .arg(tmp.path())
            .output()
            .expect("run paperflow transform");
        assert!(out.status.success());
    }

    let parts = fs::read_dir(tmp.path().join("papers")).unwrap().count();
    assert_eq!(parts, 2);
}
