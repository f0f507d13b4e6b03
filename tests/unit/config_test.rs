//! Unit tests for configuration loading

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use klpgen::config::{Config, Layout};
use klpgen::Workspace;

use super::helpers::{setup_livepatch, BSC};

#[test]
fn default_config_has_expected_values() {
    let config = Config::default();
    assert_eq!(config.extraction.backend, "ccp");
    assert_eq!(config.extraction.workers, 4);
    assert_eq!(config.extraction.reference_arch, "x86_64");
    assert_eq!(config.tools.compiler, "gcc");
    assert!(config.paths.work_dir.is_none());
}

#[test]
fn missing_config_file_yields_defaults() {
    let temp = TempDir::new().unwrap();
    let config = Config::load_from(&temp.path().join("config.toml")).unwrap();
    assert_eq!(config.extraction.workers, 4);
}

#[test]
fn config_save_and_load_roundtrip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("klpgen").join("config.toml");

    let mut config = Config::default();
    config.paths.work_dir = Some("/srv/klp/work".to_string());
    config.tools.compiler = "gcc-13".to_string();
    config.extraction.backend = "ce".to_string();
    config.extraction.workers = 8;
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.paths.work_dir.as_deref(), Some("/srv/klp/work"));
    assert_eq!(loaded.tools.compiler, "gcc-13");
    assert_eq!(loaded.extraction.backend, "ce");
    assert_eq!(loaded.extraction.workers, 8);
}

#[test]
fn partial_config_fills_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "[paths]\ndata_dir = \"/srv/klp/data\"\n").unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.paths.data_dir.as_deref(), Some("/srv/klp/data"));
    assert_eq!(config.extraction.backend, "ccp");
    assert_eq!(config.tools.compiler, "gcc");
}

#[test]
fn invalid_backend_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "[extraction]\nbackend = \"kpatch\"\n").unwrap();

    let err = Config::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("Invalid config"));
}

#[test]
fn zero_workers_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "[extraction]\nworkers = 0\n").unwrap();

    assert!(Config::load_from(&path).is_err());
}

#[test]
fn work_dir_flag_must_be_a_directory() {
    let temp = TempDir::new().unwrap();
    let config = Config::default();

    let dir = config.work_dir(Some(temp.path())).unwrap();
    assert_eq!(dir, temp.path());

    assert!(config.work_dir(Some(&temp.path().join("missing"))).is_err());
}

#[test]
fn data_dir_flag_wins() {
    let mut config = Config::default();
    config.paths.data_dir = Some("/from/config".to_string());
    assert_eq!(
        config.data_dir(Some(Path::new("/from/flag"))).unwrap(),
        Path::new("/from/flag")
    );
}

#[test]
fn workspace_takes_data_dir_from_conf_json() {
    let lp = setup_livepatch(&[("15.4u10", &["kernel/fork.c"])]);
    let conf = lp.bsc_path().join("conf.json");
    fs::write(&conf, r#"{"mod":"vmlinux","data":"/srv/klp/data"}"#).unwrap();

    let ws = Workspace::open(&lp.work, BSC, None, "x86_64").unwrap();
    assert_eq!(ws.layout.data_dir(), Path::new("/srv/klp/data"));
    assert_eq!(ws.conf.archs, vec!["x86_64", "ppc64le", "s390x"]);
}

#[test]
fn workspace_requires_existing_livepatch_dir() {
    let temp = TempDir::new().unwrap();
    let err = Workspace::open(temp.path(), "404", Some(Path::new("/data")), "x86_64").unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("bsc404"));
}

#[test]
fn layout_paths_follow_reference_arch() {
    let layout = Layout::new(Path::new("/work"), "1", Path::new("/data"), "ppc64le");
    assert_eq!(
        layout.tool_dir("15.4u10", "ccp"),
        Path::new("/work/bsc1/c/15.4u10/ppc64le/ccp")
    );
    assert_eq!(layout.groups_path("ce"), Path::new("/work/bsc1/ce/groups"));
    assert_eq!(layout.missing_syms_path(), Path::new("/work/bsc1/missing_syms"));
    assert_eq!(
        layout.ipa_clones_dir("15.4u10", "ppc64le"),
        Path::new("/data/15.4u10/ppc64le/ipa-clones")
    );
}
