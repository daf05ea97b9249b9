use assert_cmd::Command;
use tempfile::tempdir;

#[test]
fn runner_prints_summary_and_writes_outputs() {
    let output_dir = tempdir().unwrap();
    let output = Command::cargo_bin("epigrad")
        .unwrap()
        .args([
            "--config",
            "tests/data/parameters.json",
            "--world",
            "tests/data/world.json",
            "--random-seed",
            "3",
            "--output-dir",
        ])
        .arg(output_dir.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let summary: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(summary["steps"], 14);
    assert!(summary["final_cases"].as_f64().unwrap() >= 2.0);
    for venue_type in ["household", "school", "company", "leisure"] {
        assert!(summary["log_beta_gradients"][venue_type].is_number());
    }

    let cases = std::fs::read_to_string(output_dir.path().join("cases.csv")).unwrap();
    let mut lines = cases.lines();
    assert_eq!(
        lines.next(),
        Some("time,step,active_venue_types,new_infections,total_infected")
    );
    assert_eq!(lines.count(), 14);
    assert!(output_dir.path().join("summary.json").exists());
}

#[test]
fn runner_fails_on_bad_parameters() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("parameters.json");
    std::fs::write(&config, r#"{"log_beta": {"stadium": 0.0}}"#).unwrap();

    Command::cargo_bin("epigrad")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["--world", "tests/data/world.json"])
        .assert()
        .failure();
}

#[test]
fn runner_requires_a_world() {
    Command::cargo_bin("epigrad")
        .unwrap()
        .args(["--config", "tests/data/parameters.json"])
        .assert()
        .failure();
}
