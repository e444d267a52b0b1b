#[test]
fn paperflow_version_contract() {
    let bin = assert_cmd::cargo::cargo_bin!("paperflow");
    let out = std::process::Command::new(bin)
        .args(["version"])
        .output()
        .expect("run paperflow version");

    assert!(out.status.success(), "paperflow version failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse version json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("version"));
    assert_eq!(v["name"].as_str(), Some("paperflow"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
}

#[test]
fn paperflow_version_text_output() {
    let bin = assert_cmd::cargo::cargo_bin!("paperflow");
    let out = std::process::Command::new(bin)
        .args(["version", "--output", "text"])
        .output()
        .expect("run paperflow version");

    assert!(out.status.success());
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(s.starts_with("paperflow "), "unexpected text output: {s}");
}
