//! End-to-end tests of the klpgen command line

use std::fs;

use predicates::prelude::*;

use super::helpers::CliEnv;

const TUN: &str = "drivers/net/tun.c";

#[test]
fn help_lists_subcommands() {
    let env = CliEnv::new();
    env.cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("groups"))
        .stdout(predicate::str::contains("check-syms"));
}

#[test]
fn unknown_backend_is_rejected_by_parser() {
    let env = CliEnv::new();
    env.cmd()
        .args(["extract", "--bsc", "1", "--backend", "kpatch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("kpatch"));
}

#[test]
fn extract_without_livepatch_dir_fails() {
    let env = CliEnv::new();
    env.cmd()
        .args(["extract", "--bsc", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn groups_without_codestreams_fails() {
    let env = CliEnv::new();
    fs::create_dir_all(env.bsc_path()).unwrap();
    fs::write(env.bsc_path().join("conf.json"), r#"{"mod":"vmlinux"}"#).unwrap();

    env.cmd()
        .args(["groups", "--bsc", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("codestreams.json file not found"));
}

#[test]
fn groups_from_existing_output() {
    let env = CliEnv::new();
    env.livepatch(&["15.4u10", "15.4u11", "15.5u1"], &[TUN]);
    env.ccp_output("15.4u10", TUN, "int klpp_tun_chr_open(void);\n");
    env.ccp_output("15.4u11", TUN, "int klpp_tun_chr_open(void);\n");
    env.ccp_output("15.5u1", TUN, "long klpp_tun_chr_open(void);\n");

    env.cmd()
        .args(["groups", "--bsc", "1", "--backend", "ccp"])
        .assert()
        .success()
        .stdout("15.4u10-u11\n15.5u1\n");

    let groups = fs::read_to_string(env.bsc_path().join("ccp").join("groups")).unwrap();
    assert_eq!(groups, "15.4u10-u11\n15.5u1");
}

#[test]
fn groups_with_filter() {
    let env = CliEnv::new();
    env.livepatch(&["15.4u10", "15.5u1", "15.5u2"], &[TUN]);
    env.ccp_output("15.5u1", TUN, "int x;\n");
    env.ccp_output("15.5u2", TUN, "int x;\n");

    env.cmd()
        .args(["groups", "--bsc", "1", "--filter", "^15\\.5"])
        .assert()
        .success()
        .stdout("15.5u1-u2\n");
}

#[test]
fn invalid_filter_is_reported() {
    let env = CliEnv::new();
    env.livepatch(&["15.4u10"], &[TUN]);

    env.cmd()
        .args(["groups", "--bsc", "1", "--filter", "15.("])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid codestream filter"));
}

#[test]
fn diff_shows_changed_lines() {
    let env = CliEnv::new();
    env.livepatch(&["15.4u10", "15.5u1"], &[TUN]);
    env.ccp_output("15.4u10", TUN, "int klpp_tun_chr_open(void);\n");
    env.ccp_output("15.5u1", TUN, "long klpp_tun_chr_open(void);\n");

    env.cmd()
        .args(["diff", "--bsc", "1", "15.4u10", "15.5u1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-int klpp_tun_chr_open(void);"))
        .stdout(predicate::str::contains("+long klpp_tun_chr_open(void);"));
}

#[test]
fn diff_of_equal_outputs() {
    let env = CliEnv::new();
    env.livepatch(&["15.4u10", "15.4u11"], &[TUN]);
    env.ccp_output("15.4u10", TUN, "int x;\n");
    env.ccp_output("15.4u11", TUN, "int x;\n");

    env.cmd()
        .args(["diff", "--bsc", "1", "15.4u10", "15.4u11"])
        .assert()
        .success()
        .stdout(predicate::str::contains("have the same output"));
}

#[test]
fn check_syms_without_externalized_symbols() {
    let env = CliEnv::new();
    env.livepatch(&["15.4u10"], &[TUN]);
    // report left behind by an earlier run
    fs::write(env.bsc_path().join("missing_syms"), "{}").unwrap();

    env.cmd()
        .args(["check-syms", "--bsc", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All externalized symbols found"));
    assert!(!env.bsc_path().join("missing_syms").exists());
}

#[test]
fn check_syms_reports_missing_objects() {
    let env = CliEnv::new();
    env.livepatch_with_ext(&["15.4u10"], &[TUN], r#"{"vmlinux":["tun_get_socket"]}"#);

    // no vmlinux in the data dir, every symbol counts as missing
    env.cmd()
        .args(["check-syms", "--bsc", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 symbol(s) missing"));

    let report = fs::read_to_string(env.bsc_path().join("missing_syms")).unwrap();
    assert!(report.contains("tun_get_socket"));
}

#[test]
fn config_init_then_show() {
    let env = CliEnv::new();
    env.cmd().args(["config", "init"]).assert().success();
    assert!(env
        .temp
        .path()
        .join(".config")
        .join("klpgen")
        .join("config.toml")
        .is_file());

    env.cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[extraction]"))
        .stdout(predicate::str::contains("workers = 4"));
}

#[test]
fn completions_for_bash() {
    let env = CliEnv::new();
    env.cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("klpgen"));
}
