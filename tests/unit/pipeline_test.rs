//! Unit tests for the extraction pipeline driver

use std::fs;

use regex::Regex;

use klpgen::extractor::{ExtractError, PipelineDriver, PipelineOptions};
use klpgen::templates::PlainTemplates;
use klpgen::Workspace;

use super::helpers::{
    ext_symbols, setup_livepatch, FakeSymbols, MockBackend, MockCommands, RecordingPatches,
    TestLivepatch, BSC,
};

const QFQ: &str = "net/sched/sch_qfq.c";
const API: &str = "net/sched/sch_api.c";

fn open(lp: &TestLivepatch) -> Workspace {
    Workspace::open(&lp.work, BSC, Some(lp.data.as_path()), "x86_64").unwrap()
}

fn templates(ws: &Workspace) -> PlainTemplates {
    PlainTemplates::new(ws.layout.clone(), ws.conf.clone(), "mock")
}

/// x86_64 has every symbol, s390x lacks `qfq_policy`.
fn symbols() -> FakeSymbols {
    FakeSymbols::new(&[
        ("x86_64", "ffffffff81000000 T qfq_policy\nffffffff81000010 T qfq_enqueue\n"),
        ("s390x", "0000000000a1b2c3 T qfq_enqueue\n"),
    ])
}

#[test]
#[cfg_attr(miri, ignore)]
fn run_groups_equal_outputs_and_reports_missing_symbols() {
    let lp = setup_livepatch(&[
        ("15.4u10", &[QFQ]),
        ("15.4u11", &[QFQ]),
        ("15.5u1", &[QFQ]),
    ]);
    let mut ws = open(&lp);

    // .lineno differs between 15.4 updates but is normalized away
    let backend = MockBackend::new(ext_symbols(&[("vmlinux", &["qfq_policy"])]))
        .with_output("15.4u10", QFQ, "int klpp_qfq;\nstatic struct x = { .lineno = 12, };\n")
        .with_output("15.4u11", QFQ, "int klpp_qfq;\nstatic struct x = { .lineno = 40, };\n")
        .with_output("15.5u1", QFQ, "long klpp_qfq;\n");
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();

    let driver = PipelineDriver::new(
        &backend,
        &commands,
        &templates,
        &symbols,
        PipelineOptions::default(),
    );
    let summary = driver.run(&mut ws).unwrap();

    assert_eq!(summary.items, 3);
    assert_eq!(summary.groups, vec!["15.4u10-u11", "15.5u1"]);
    let groups = fs::read_to_string(lp.bsc_path().join("mock").join("groups")).unwrap();
    assert_eq!(groups, "15.4u10-u11\n15.5u1");

    assert_eq!(
        summary.missing.get("s390x", "vmlinux", "15.4u10"),
        Some(&["qfq_policy".to_string()][..])
    );
    assert!(summary.missing.get("x86_64", "vmlinux", "15.4u10").is_none());
    assert_eq!(summary.missing.count(), 3);
    assert!(lp.bsc_path().join("missing_syms").is_file());
}

#[test]
#[cfg_attr(miri, ignore)]
fn run_persists_externalized_symbols() {
    let lp = setup_livepatch(&[("15.4u10", &[QFQ, API])]);
    let mut ws = open(&lp);

    let backend = MockBackend::new(ext_symbols(&[
        ("vmlinux", &["qfq_policy"]),
        ("sch_qfq", &["qfq_enqueue"]),
    ]));
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();

    PipelineDriver::new(&backend, &commands, &templates, &symbols, PipelineOptions::default())
        .run(&mut ws)
        .unwrap();

    let reopened = open(&lp);
    let file = reopened
        .codestreams
        .get("15.4u10")
        .and_then(|cs| cs.files.get(API))
        .unwrap();
    assert_eq!(file.ext_symbols.get("vmlinux").unwrap(), &vec!["qfq_policy".to_string()]);
    assert_eq!(file.ext_symbols.get("sch_qfq").unwrap(), &vec!["qfq_enqueue".to_string()]);

    // file order survives the rewrite
    let files: Vec<&str> = reopened.codestreams.get("15.4u10").unwrap().files.keys().collect();
    assert_eq!(files, vec![QFQ, API]);
}

#[test]
#[cfg_attr(miri, ignore)]
fn run_renders_livepatch_files() {
    let lp = setup_livepatch(&[("15.4u10", &[QFQ])]);
    let mut ws = open(&lp);

    let backend = MockBackend::new(ext_symbols(&[])).with_output("15.4u10", QFQ, "int klpp_qfq;\n");
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();

    PipelineDriver::new(&backend, &commands, &templates, &symbols, PipelineOptions::default())
        .run(&mut ws)
        .unwrap();

    let lp_dir = ws.layout.lp_dir("15.4u10");
    assert_eq!(
        fs::read_to_string(lp_dir.join("livepatch_bsc1.c")).unwrap(),
        "int klpp_qfq;\n"
    );
    assert!(lp_dir.join("patched_funcs.csv").is_file());
    assert!(lp_dir.join("Kbuild.inc").is_file());
    assert!(lp.bsc_path().join("commit.msg").is_file());
    assert!(ws
        .layout
        .work_dir("15.4u10", QFQ, "mock")
        .join("Makefile")
        .is_file());
    // nothing missing, no report
    assert!(!lp.bsc_path().join("missing_syms").exists());
}

#[test]
#[cfg_attr(miri, ignore)]
fn run_serializes_compiler_command_preparation() {
    let files = ["a.c", "b.c", "c.c", "d.c", "e.c", "f.c"];
    let lp = setup_livepatch(&[("15.4u10", &files), ("15.4u11", &files)]);
    let mut ws = open(&lp);

    let backend = MockBackend::new(ext_symbols(&[]));
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();

    let summary = PipelineDriver::new(
        &backend,
        &commands,
        &templates,
        &symbols,
        PipelineOptions::default().workers(4),
    )
    .run(&mut ws)
    .unwrap();

    assert_eq!(summary.items, 12);
    assert_eq!(commands.calls(), 12);
    assert_eq!(commands.peak(), 1);
    assert_eq!(backend.runs().len(), 12);
}

#[test]
#[cfg_attr(miri, ignore)]
fn tool_failure_aborts_before_grouping() {
    let lp = setup_livepatch(&[("15.4u10", &[QFQ]), ("15.4u11", &[QFQ])]);
    let mut ws = open(&lp);

    let backend = MockBackend::new(ext_symbols(&[("vmlinux", &["qfq_policy"])]))
        .failing_on("15.4u11", QFQ);
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();
    let patches = RecordingPatches::default();

    let err = PipelineDriver::new(&backend, &commands, &templates, &symbols, PipelineOptions::default())
        .with_patches(&patches)
        .run(&mut ws)
        .unwrap_err();

    match err {
        ExtractError::ToolFailed { cs, file, code, log, .. } => {
            assert_eq!(cs, "15.4u11");
            assert_eq!(file, QFQ);
            assert_eq!(code, Some(1));
            assert!(log.ends_with("work_sch_qfq.c/mock.out.txt"));
        }
        other => panic!("Expected ToolFailed, got {:?}", other),
    }

    assert!(!lp.bsc_path().join("mock").join("groups").exists());
    let reopened = open(&lp);
    assert!(reopened
        .codestreams
        .get("15.4u10")
        .and_then(|cs| cs.files.get(QFQ))
        .unwrap()
        .ext_symbols
        .is_empty());

    let events = patches.events();
    assert!(events.contains(&"remove 15.4u10".to_string()));
    assert!(events.contains(&"remove 15.4u11".to_string()));
}

#[test]
#[cfg_attr(miri, ignore)]
fn apply_failure_restores_already_patched_codestreams() {
    let lp = setup_livepatch(&[("15.4u10", &[QFQ]), ("15.4u11", &[QFQ]), ("15.5u1", &[QFQ])]);
    let mut ws = open(&lp);

    let backend = MockBackend::new(ext_symbols(&[]));
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();
    let patches = RecordingPatches::default().failing_apply_on("15.4u11");

    let err = PipelineDriver::new(&backend, &commands, &templates, &symbols, PipelineOptions::default())
        .with_patches(&patches)
        .run(&mut ws)
        .unwrap_err();

    assert!(matches!(err, ExtractError::ToolFailed { ref cs, .. } if cs == "15.4u11"));
    assert_eq!(patches.events(), vec!["apply 15.4u10", "remove 15.4u10"]);
    assert!(backend.runs().is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn failure_after_extraction_restores_patches() {
    let lp = setup_livepatch(&[("15.4u10", &[QFQ]), ("15.4u11", &[QFQ])]);
    let mut ws = open(&lp);
    // the groups file cannot be written over a directory
    fs::create_dir_all(lp.bsc_path().join("mock").join("groups")).unwrap();

    let backend = MockBackend::new(ext_symbols(&[]));
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();
    let patches = RecordingPatches::default();

    let err = PipelineDriver::new(&backend, &commands, &templates, &symbols, PipelineOptions::default())
        .with_patches(&patches)
        .run(&mut ws)
        .unwrap_err();

    assert!(matches!(err, ExtractError::Io { .. }));
    assert_eq!(
        patches.events(),
        vec!["apply 15.4u10", "apply 15.4u11", "remove 15.4u10", "remove 15.4u11"]
    );
}

#[test]
#[cfg_attr(miri, ignore)]
fn failed_removal_still_restores_remaining_codestreams() {
    let lp = setup_livepatch(&[("15.4u10", &[QFQ]), ("15.4u11", &[QFQ]), ("15.5u1", &[QFQ])]);
    let mut ws = open(&lp);

    let backend = MockBackend::new(ext_symbols(&[]));
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();
    let patches = RecordingPatches::default().failing_remove_on("15.4u10");

    let err = PipelineDriver::new(&backend, &commands, &templates, &symbols, PipelineOptions::default())
        .with_patches(&patches)
        .run(&mut ws)
        .unwrap_err();

    assert!(matches!(err, ExtractError::ToolFailed { ref cs, .. } if cs == "15.4u10"));
    let events = patches.events();
    assert!(events.contains(&"remove 15.4u11".to_string()));
    assert!(events.contains(&"remove 15.5u1".to_string()));
    assert!(!events.contains(&"remove 15.4u10".to_string()));
}

#[test]
#[cfg_attr(miri, ignore)]
fn clean_rerun_drops_stale_missing_symbols_report() {
    let lp = setup_livepatch(&[("15.4u10", &[QFQ])]);
    let mut ws = open(&lp);
    fs::write(lp.bsc_path().join("missing_syms"), "{}").unwrap();

    let backend = MockBackend::new(ext_symbols(&[]));
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();

    let summary = PipelineDriver::new(&backend, &commands, &templates, &symbols, PipelineOptions::default())
        .run(&mut ws)
        .unwrap();

    assert!(summary.missing.is_empty());
    assert!(!lp.bsc_path().join("missing_syms").exists());
}

#[test]
#[cfg_attr(miri, ignore)]
fn filter_limits_processed_codestreams() {
    let lp = setup_livepatch(&[
        ("15.4u10", &[QFQ]),
        ("15.5u1", &[QFQ]),
        ("15.5u2", &[QFQ]),
    ]);
    let mut ws = open(&lp);

    let backend = MockBackend::new(ext_symbols(&[]));
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();
    let patches = RecordingPatches::default();

    let summary = PipelineDriver::new(
        &backend,
        &commands,
        &templates,
        &symbols,
        PipelineOptions::default().filter(Some(Regex::new(r"^15\.5").unwrap())),
    )
    .with_patches(&patches)
    .run(&mut ws)
    .unwrap();

    assert_eq!(summary.items, 2);
    assert_eq!(summary.groups, vec!["15.5u1-u2"]);
    assert!(backend.runs().iter().all(|(cs, _)| cs.starts_with("15.5")));
    assert_eq!(
        patches.events(),
        vec!["apply 15.5u1", "apply 15.5u2", "remove 15.5u1", "remove 15.5u2"]
    );
}

#[test]
fn filter_matching_nothing_is_config_error() {
    let lp = setup_livepatch(&[("15.4u10", &[QFQ])]);
    let mut ws = open(&lp);

    let backend = MockBackend::new(ext_symbols(&[]));
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();

    let err = PipelineDriver::new(
        &backend,
        &commands,
        &templates,
        &symbols,
        PipelineOptions::default().filter(Some(Regex::new("^12").unwrap())),
    )
    .run(&mut ws)
    .unwrap_err();

    assert!(err.is_config());
    assert!(backend.runs().is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn rerun_wipes_previous_output() {
    let lp = setup_livepatch(&[("15.4u10", &[QFQ])]);
    let mut ws = open(&lp);

    let stale = ws.layout.tool_dir("15.4u10", "mock").join("work_old.c");
    fs::create_dir_all(&stale).unwrap();

    let backend = MockBackend::new(ext_symbols(&[]));
    let commands = MockCommands::default();
    let templates = templates(&ws);
    let symbols = symbols();

    PipelineDriver::new(&backend, &commands, &templates, &symbols, PipelineOptions::default())
        .run(&mut ws)
        .unwrap();

    assert!(!stale.exists());
}
