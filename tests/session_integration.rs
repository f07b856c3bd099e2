//! ---
//! nest_section: "15-testing-qa-runbook"
//! nest_subsection: "integration-tests"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "End-to-end flight sessions against the simulated backend."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use nest_common::config::{ConfigError, ConnectionMode, Settings, SettingsRequest};
use nest_core::{read_settings_snapshot, RunOutcome, SessionRunner, SETTINGS_SNAPSHOT_FILE};
use nest_sim::{SimFactory, WaypointRecord, WAYPOINTS_FILE};
use tempfile::tempdir;

fn resolve(root: &Path, request: SettingsRequest, extra: &[(&str, &str)]) -> Settings {
    try_resolve(root, request, extra).expect("settings resolve")
}

fn try_resolve(
    root: &Path,
    request: SettingsRequest,
    extra: &[(&str, &str)],
) -> Result<Settings, ConfigError> {
    let mut env: HashMap<String, String> = HashMap::from([
        ("NEST_PROJECT_ROOT".to_owned(), root.display().to_string()),
        ("RADIO_CHANNEL_7".to_owned(), "radio://0/70/2M/E7E7E7E707".to_owned()),
        ("RADIO_CHANNEL_8".to_owned(), "radio://0/80/2M/E7E7E7E708".to_owned()),
        ("CF_URI_UDP".to_owned(), "udp://192.168.43.42:2390".to_owned()),
    ]);
    for (key, value) in extra {
        env.insert((*key).to_owned(), (*value).to_owned());
    }
    Settings::resolve(request, |key| env.get(key).cloned())
}

fn sim(settings: &Settings, script: &str) -> SessionRunner<SimFactory> {
    let factory = SimFactory::new(settings.run.data_dir.clone())
        .with_script(script)
        .with_frame_interval(Duration::from_millis(1))
        .with_seed(42);
    SessionRunner::new(factory).with_join_timeout(Duration::from_secs(1))
}

#[test]
fn dry_run_only_writes_snapshot() {
    let temp = tempdir().unwrap();
    let request = SettingsRequest {
        dry_run: true,
        channels: Some(vec!["7".into(), "8".into(), "9".into()]),
        vision: true,
        ..SettingsRequest::new(ConnectionMode::Swarm)
    };
    let settings = resolve(temp.path(), request, &[]);

    let outcome = sim(&settings, "takeoff\nwaypoint\n").run(&settings).unwrap();

    assert_eq!(outcome, RunOutcome::DryRun);
    assert_eq!(outcome.exit_code(), 0);
    let snapshot = settings.run.logs_dir.join(SETTINGS_SNAPSHOT_FILE);
    assert_eq!(read_settings_snapshot(&snapshot).unwrap(), settings);
    assert!(!settings.run.data_dir.join(WAYPOINTS_FILE).exists());
}

#[test]
fn scripted_radio_session_records_waypoints() {
    let temp = tempdir().unwrap();
    let request = SettingsRequest {
        channel: Some("8".into()),
        waypoints: true,
        ..SettingsRequest::new(ConnectionMode::Radio)
    };
    let settings = resolve(temp.path(), request, &[]);
    assert_eq!(settings.uri.as_deref(), Some("radio://0/80/2M/E7E7E7E708"));

    let outcome = sim(&settings, "takeoff 0.6\nwaypoint\ngoto 1 1 0.6\nwaypoint\nland\nquit\n")
        .run(&settings)
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    let contents = fs::read_to_string(settings.run.data_dir.join(WAYPOINTS_FILE)).unwrap();
    let records: Vec<WaypointRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].source, "radio://0/80/2M/E7E7E7E708");
    assert!((records[1].position_m[1] - 1.0).abs() < 0.1);
}

#[test]
fn swarm_session_with_vision_completes() {
    let temp = tempdir().unwrap();
    let request = SettingsRequest {
        channels: Some(vec!["7".into(), "8".into(), "9".into()]),
        vision: true,
        control: true,
        ..SettingsRequest::new(ConnectionMode::Swarm)
    };
    let settings = resolve(temp.path(), request, &[]);

    let outcome = sim(&settings, "takeoff\nstatus\nmarkers\ngo-marker 3\nland\n")
        .run(&settings)
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
}

#[test]
fn swarm_waypoints_follow_broadcast_commands() {
    let temp = tempdir().unwrap();
    let request = SettingsRequest {
        channels: Some(vec!["7".into(), "8".into()]),
        waypoints: true,
        ..SettingsRequest::new(ConnectionMode::Swarm)
    };
    let settings = resolve(temp.path(), request, &[]);

    let outcome = sim(&settings, "takeoff 1.0\ngoto 1 1 1.0\nstatus\nwaypoint\nquit\n")
        .run(&settings)
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    let contents = fs::read_to_string(settings.run.data_dir.join(WAYPOINTS_FILE)).unwrap();
    let records: Vec<WaypointRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 1);
    assert!((records[0].position_m[0] - 1.0).abs() < 0.1);
    assert!((records[0].position_m[2] - 1.0).abs() < 0.1);
}

#[test]
fn detector_construction_failure_exits_with_one() {
    let temp = tempdir().unwrap();
    let request = SettingsRequest {
        channels: Some(vec!["7".into(), "8".into(), "9".into()]),
        vision: true,
        ..SettingsRequest::new(ConnectionMode::Swarm)
    };
    let settings = resolve(temp.path(), request, &[("NEST_ARUCO_DICT", "DICT_9X9_50")]);

    let outcome = sim(&settings, "quit\n").run(&settings).unwrap();

    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(outcome.exit_code(), 1);
}

#[test]
fn mismatched_udp_uri_fails_connection() {
    let temp = tempdir().unwrap();
    let settings = resolve(
        temp.path(),
        SettingsRequest::new(ConnectionMode::Udp),
        &[("CF_URI_UDP", "radio://0/80/2M")],
    );

    let outcome = sim(&settings, "quit\n").run(&settings).unwrap();

    assert_eq!(outcome, RunOutcome::Failed);
    assert!(settings.run.logs_dir.join(SETTINGS_SNAPSHOT_FILE).is_file());
}

#[test]
fn unconfigured_radio_channel_is_a_config_error() {
    let temp = tempdir().unwrap();
    let request = SettingsRequest {
        channel: Some("9".into()),
        ..SettingsRequest::new(ConnectionMode::Radio)
    };
    let err = try_resolve(temp.path(), request, &[]).unwrap_err();
    assert_eq!(
        err,
        ConfigError::MissingRadioUri {
            channel: "9".into()
        }
    );
}
