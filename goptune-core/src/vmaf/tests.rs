use std::path::PathBuf;

use super::{mean, parse_vmaf_log, Vmaf, VmafOptions};

#[test]
fn parses_libvmaf_json_log() {
    let raw = r#"{
        "version": "2.3.1",
        "fps": 25.0,
        "frames": [
            {"frameNum": 0, "metrics": {"integer_motion": 0.0, "vmaf": 97.2}},
            {"frameNum": 1, "metrics": {"integer_motion": 1.4, "vmaf": 95.0}},
            {"frameNum": 2, "metrics": {"vmaf": 96.4}}
        ],
        "pooled_metrics": {"vmaf": {"mean": 96.2}}
    }"#;
    let scores = parse_vmaf_log(raw).unwrap();
    assert_eq!(scores, vec![97.2, 95.0, 96.4]);
    assert!((mean(&scores) - 96.2).abs() < 1e-9);
}

#[test]
fn rejects_malformed_log() {
    assert!(parse_vmaf_log("not json").is_err());
    assert!(parse_vmaf_log(r#"{"frames": [{"metrics": {}}]}"#).is_err());
}

#[test]
fn filter_spec_names_log_and_model() {
    let scorer = Vmaf::new(VmafOptions {
        model:     Some(PathBuf::from("/usr/share/model/vmaf_v0.6.1.json")),
        log_path:  PathBuf::from("/tmp/vmaf.json"),
        threads:   4,
        subsample: 1,
        fps:       25,
    });
    let spec = scorer.filter_spec().unwrap();
    assert!(spec.starts_with("[distorted][ref]libvmaf=log_fmt=json:log_path="));
    assert!(spec.contains("model=path="));
    assert!(spec.contains("vmaf_v0.6.1.json"));
    assert!(spec.ends_with(":n_threads=4:n_subsample=1"));
}
