//! Full decide → build → commit cycles against a real on-disk cache.

mod common;

use std::collections::BTreeSet;
use std::fs;

use common::{Project, RecordingTool};
use freshcheck::decision::strategy::{BuildDecision, BuildType};
use freshcheck::executor::BuildPlan;

fn modules(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(ToString::to_string).collect()
}

#[test]
fn platform_project_walkthrough() {
    let project = Project::new();
    project.write("A/mod.bsl", "Процедура Старт() КонецПроцедуры");
    project.write("A/modTest.bsl", "Процедура ТестСтарт() КонецПроцедуры");
    project.write("B/config.xml", "<Configuration/>");
    let orch = project.open();

    // First run: nothing fingerprinted yet, core files present.
    assert_eq!(
        orch.determine_build_strategy(project.root()).unwrap(),
        BuildDecision::FullBuild
    );
    let tool = RecordingTool::ok();
    let result = orch.run_build(&tool).unwrap();
    assert!(result.success);
    assert_eq!(result.build_type, BuildType::Full);
    assert_eq!(tool.calls(), vec![BuildPlan::Full]);
    assert_eq!(orch.store().len().unwrap(), 3);
    assert!(orch.get_last_build_time(project.root()).unwrap().is_some());

    // Nothing changed since.
    assert_eq!(
        orch.determine_build_strategy(project.root()).unwrap(),
        BuildDecision::NoBuildNeeded
    );

    // Configuration manifest edited.
    project.modify("B/config.xml", "<Configuration version=\"2\"/>");
    assert_eq!(
        orch.determine_build_strategy(project.root()).unwrap(),
        BuildDecision::FullBuild
    );
    assert!(orch.run_build(&RecordingTool::ok()).unwrap().success);

    // Only the test module edited.
    project.modify("A/modTest.bsl", "Процедура ТестСтарт() Возврат; КонецПроцедуры");
    assert_eq!(
        orch.determine_build_strategy(project.root()).unwrap(),
        BuildDecision::IncrementalTestsOnly
    );
    let tests_tool = RecordingTool::ok();
    let result = orch.run_build(&tests_tool).unwrap();
    assert!(result.success);
    assert_eq!(tests_tool.calls(), vec![BuildPlan::TestsOnly]);

    // Test runs never refresh fingerprints, so the change is still pending.
    assert_eq!(
        orch.determine_build_strategy(project.root()).unwrap(),
        BuildDecision::IncrementalTestsOnly
    );
}

#[test]
fn incremental_build_commits_only_its_modules() {
    let project = Project::new();
    project.write("Sales/Form.xml", "v1");
    project.write("Stock/Form.xml", "v1");
    let orch = project.open();
    orch.run_build(&RecordingTool::ok()).unwrap();

    project.modify("Sales/Form.xml", "v2");
    let tool = RecordingTool::ok();
    let result = orch.run_build(&tool).unwrap();
    assert_eq!(result.build_type, BuildType::Incremental);
    assert_eq!(tool.calls(), vec![BuildPlan::Incremental(modules(&["Sales"]))]);

    assert_eq!(
        orch.determine_build_strategy(project.root()).unwrap(),
        BuildDecision::NoBuildNeeded
    );
}

#[test]
fn failed_incremental_build_is_retried_as_full() {
    let project = Project::new();
    project.write("Sales/Form.xml", "v1");
    let orch = project.open();
    orch.run_build(&RecordingTool::ok()).unwrap();

    project.modify("Sales/Form.xml", "v2");
    let tool = RecordingTool::failing_incremental();
    let result = orch.run_build(&tool).unwrap();
    assert!(result.success);
    assert_eq!(result.build_type, BuildType::Full);
    assert_eq!(
        tool.calls(),
        vec![BuildPlan::Incremental(modules(&["Sales"])), BuildPlan::Full]
    );
}

#[test]
fn failed_full_build_leaves_changes_pending() {
    let project = Project::new();
    project.write("A/mod.bsl", "v1");
    let orch = project.open();
    orch.run_build(&RecordingTool::ok()).unwrap();
    let built_at = orch.get_last_build_time(project.root()).unwrap();
    let before = orch.store().get_all_hashes().unwrap();

    let path = project.modify("A/mod.bsl", "v2");
    let result = orch.run_build(&RecordingTool::failing_full()).unwrap();
    assert!(!result.success);
    assert_eq!(result.build_type, BuildType::Full);
    assert_eq!(result.error.as_deref(), Some("compiler exited with status 1"));
    assert_eq!(result.clone().into_result().unwrap_err().code(), "FC-3101");

    assert_eq!(orch.store().get_all_hashes().unwrap(), before);
    assert_eq!(orch.get_last_build_time(project.root()).unwrap(), built_at);
    let pending = orch.check_changes(project.root()).unwrap().changes;
    assert!(pending.contains_key(&path));
}

#[test]
fn fingerprints_survive_reopen() {
    let project = Project::new();
    project.write("A/mod.bsl", "a");
    project.write("B/Form.xml", "b");
    {
        let orch = project.open();
        orch.run_build(&RecordingTool::ok()).unwrap();
        orch.close().unwrap();
    }

    let orch = project.open();
    assert_eq!(orch.store().len().unwrap(), 2);
    assert_eq!(
        orch.determine_build_strategy(project.root()).unwrap(),
        BuildDecision::NoBuildNeeded
    );
}

#[test]
fn cache_lives_under_the_hidden_project_directory() {
    let project = Project::new();
    project.write("A/mod.bsl", "a");
    let orch = project.open();
    orch.run_build(&RecordingTool::ok()).unwrap();
    orch.close().unwrap();

    let cache = project.path(".freshcheck");
    assert!(cache.join("fingerprints.sqlite3").is_file());
    assert!(cache.join("last_build_time").is_file());
    let activity = fs::read_to_string(cache.join("activity.jsonl")).unwrap();
    for event in ["store_open", "scan_complete", "build_decided", "cache_commit", "build_complete", "store_close"] {
        assert!(activity.contains(&format!("\"{event}\"")), "missing {event}");
    }
}

#[test]
fn project_config_file_is_honoured() {
    let project = Project::new();
    project.write(
        ".freshcheck/config.toml",
        "[decision]\nmodule_threshold = 1\n",
    );
    project.write("Sales/Form.xml", "x");
    project.write("Stock/Form.xml", "x");

    let orch = freshcheck::orchestrator::BuildOrchestrator::open_project(project.root()).unwrap();
    assert_eq!(orch.config().decision.module_threshold, 1);
    assert_eq!(
        orch.determine_build_strategy(project.root()).unwrap(),
        BuildDecision::FullBuild
    );
}
