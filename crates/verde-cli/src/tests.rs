use std::path::PathBuf;

use clap::Parser;
use tempfile::tempdir;
use verde_core::feed::{FeedOptions, FeedState};
use verde_core::models::{
    Category, FeedRecord, PendingSubmission, RejectedSubmission, RemoteReport, ReportId,
    Subcategory, WriteState,
};
use verde_core::sync::{DrainReport, DrainSummary, ItemOutcome, SyncOutcome};
use verde_core::{ClientConfig, ClientKey, ReportPayload};

use crate::cli::{Cli, Commands, LocationArg};
use crate::commands::categories::format_category_lines;
use crate::commands::common::{
    format_pending_lines, format_relative_time, format_report_line, format_timestamp,
    open_service, pending_to_list_item, preview, rejected_to_list_item, resolve_db_path,
    resolve_rejected_key, short_key, CliContext, ConnectivityMode,
};
use crate::commands::drain::format_drain_report;
use crate::commands::submit::{build_payload, SubmitArgs};
use crate::commands::watch::format_feed_update;
use crate::error::CliError;

fn rejected(description: &str) -> RejectedSubmission {
    RejectedSubmission {
        submission: PendingSubmission::new(ReportPayload::new("Otros").with_description(description)),
        reason: "invalid category".to_string(),
        rejected_at: 1_700_000_000_000,
    }
}

fn report(id: &str, created_at: i64, description: &str) -> RemoteReport {
    RemoteReport {
        id: ReportId::new(id),
        payload: ReportPayload::new("Baches").with_description(description),
        created_at,
        write_state: WriteState::Confirmed,
    }
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
    assert_eq!(format_relative_time(now - 14 * 24 * 60 * 60_000, now), "2w ago");
}

#[test]
fn format_timestamp_returns_utc_label() {
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn preview_truncates_with_ellipsis() {
    assert_eq!(
        preview("This is a very long sentence that should be shortened", 20),
        "This is a very lo..."
    );
    assert_eq!(preview("Poste\n  caído", 20), "Poste caído");
}

#[test]
fn location_arg_parses_lat_lon() {
    let location = " 4.65 , -74.05 ".parse::<LocationArg>().unwrap();
    assert_eq!(
        location,
        LocationArg {
            latitude: 4.65,
            longitude: -74.05
        }
    );
    assert!("4.65".parse::<LocationArg>().is_err());
    assert!("91,0".parse::<LocationArg>().is_err());
    assert!("0,181".parse::<LocationArg>().is_err());
    assert!("north,east".parse::<LocationArg>().is_err());
}

#[test]
fn submit_command_collects_repeated_media() {
    let cli = Cli::try_parse_from([
        "verde",
        "submit",
        "Alumbrado",
        "--subcategory",
        "Poste caído",
        "--photo",
        "https://cdn.example.com/a.jpg",
        "--photo",
        "https://cdn.example.com/b.jpg",
        "--location",
        "4.6,-74.1",
        "--offline",
    ])
    .unwrap();

    assert!(cli.offline);
    let Commands::Submit {
        category,
        subcategory,
        photos,
        location,
        ..
    } = cli.command
    else {
        panic!("expected submit command");
    };
    assert_eq!(category, "Alumbrado");
    assert_eq!(subcategory.as_deref(), Some("Poste caído"));
    assert_eq!(photos.len(), 2);
    assert!(location.is_some());
}

#[test]
fn build_payload_maps_every_field() {
    let payload = build_payload(SubmitArgs {
        category: "Vías".to_string(),
        subcategory: Some("Baches".to_string()),
        description: None,
        address: Some("Calle 10 #5-20".to_string()),
        location: Some(LocationArg {
            latitude: 4.6,
            longitude: -74.1,
        }),
        photos: vec!["https://cdn.example.com/a.jpg".to_string()],
        videos: Vec::new(),
    });

    assert_eq!(payload.category, "Vías");
    assert_eq!(payload.subcategory, "Baches");
    assert_eq!(payload.address, "Calle 10 #5-20");
    assert_eq!(payload.photo_urls.len(), 1);
    assert!(payload.location.is_some());
    assert_eq!(
        payload.normalized().unwrap().description,
        "Vías - Baches"
    );
}

#[test]
fn resolve_rejected_key_accepts_full_key_and_unique_prefix() {
    let items = vec![rejected("a"), rejected("b")];
    let key = items[0].submission.client_key;

    assert_eq!(resolve_rejected_key(&key.to_string(), &items).unwrap(), key);

    let full = key.to_string();
    let other = items[1].submission.client_key.to_string();
    let unique_len = full
        .chars()
        .zip(other.chars())
        .take_while(|(a, b)| a == b)
        .count()
        + 1;
    assert_eq!(
        resolve_rejected_key(&full[..unique_len], &items).unwrap(),
        key
    );
}

#[test]
fn resolve_rejected_key_reports_missing_and_ambiguous() {
    let items = vec![rejected("a"), rejected("b")];

    assert!(matches!(
        resolve_rejected_key("   ", &items),
        Err(CliError::EmptyKey)
    ));
    assert!(matches!(
        resolve_rejected_key("zzzz", &items),
        Err(CliError::KeyNotFound(_))
    ));
    // UUID v7 keys created together share their timestamp prefix
    let shared = items[0].submission.client_key.to_string()[..4].to_string();
    assert!(matches!(
        resolve_rejected_key(&shared, &items),
        Err(CliError::AmbiguousKey(_))
    ));
}

#[test]
fn resolve_rejected_key_ignores_keys_that_are_not_rejected() {
    let items = vec![rejected("a")];
    let stranger = ClientKey::new();
    assert!(matches!(
        resolve_rejected_key(&stranger.to_string(), &items),
        Err(CliError::KeyNotFound(_))
    ));
}

#[test]
fn pending_lines_include_short_key_and_preview() {
    let submission = PendingSubmission::new(ReportPayload::new("Baches").with_description("Hueco"));
    let lines = format_pending_lines(std::slice::from_ref(&submission), submission.enqueued_at);

    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with(&short_key(&submission.client_key)));
    assert!(lines[0].contains("just now"));
    assert!(lines[0].contains("Hueco"));
}

#[test]
fn rejected_list_item_flattens_submission_fields() {
    let item = rejected_to_list_item(&rejected("spam"), 1_700_000_000_000);
    let json = serde_json::to_value(&item).unwrap();

    assert_eq!(json["description"], "spam");
    assert_eq!(json["reason"], "invalid category");
    assert_eq!(json["rejected_at_iso"], "2023-11-14 22:13:20 UTC");
    assert!(json["client_key"].is_string());
}

#[test]
fn pending_list_item_carries_iso_timestamp() {
    let mut submission = PendingSubmission::new(ReportPayload::new("Baches"));
    submission.enqueued_at = 0;
    let item = pending_to_list_item(&submission, 30_000);
    assert_eq!(item.enqueued_at_iso, "1970-01-01 00:00:00 UTC");
    assert_eq!(item.relative_time, "just now");
}

#[test]
fn report_line_marks_unconfirmed_reports() {
    let mut pending = report("r1", 0, "Hueco");
    assert!(format_report_line(&pending, 0).starts_with("  r1"));
    pending.write_state = WriteState::Pending;
    assert!(format_report_line(&pending, 0).starts_with("~ r1"));
}

#[test]
fn feed_update_lines_list_baseline_then_only_arrivals() {
    let mut state = FeedState::new(FeedOptions::default());
    let first = state.apply(vec![FeedRecord::confirmed(report("r1", 1_000, "Primero"))]);
    let baseline = format_feed_update(&first, true, &[], 1_000);
    assert_eq!(baseline.len(), 1);
    assert!(baseline[0].contains("Primero"));

    let second = state.apply(vec![
        FeedRecord::confirmed(report("r1", 1_000, "Primero")),
        FeedRecord::confirmed(report("r2", 2_000, "Segundo")),
    ]);
    let lines = format_feed_update(&second, false, &[], 2_000);
    assert_eq!(lines[0], "-- 1 new report --");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains("Segundo"));

    let unchanged = state.apply(second.snapshot.reports().iter().cloned().map(FeedRecord::confirmed).collect());
    assert!(format_feed_update(&unchanged, false, &[], 2_000).is_empty());
}

#[test]
fn baseline_lists_queued_submissions_first() {
    let mut state = FeedState::new(FeedOptions::default());
    let update = state.apply(vec![FeedRecord::confirmed(report("r1", 1_000, "Remoto"))]);
    let mut queued = PendingSubmission::new(ReportPayload::new("Baches").with_description("En cola"));
    queued.enqueued_at = 1_000;

    let lines = format_feed_update(&update, true, std::slice::from_ref(&queued), 1_000);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("+ queued"));
    assert!(lines[0].contains("En cola"));
    assert!(lines[1].contains("Remoto"));

    let mut empty = FeedState::new(FeedOptions::default());
    let lines = format_feed_update(&empty.apply(Vec::new()), true, &[queued], 1_000);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("En cola"));
}

#[test]
fn empty_baseline_says_so() {
    let mut state = FeedState::new(FeedOptions::default());
    let update = state.apply(Vec::new());
    assert_eq!(format_feed_update(&update, true, &[], 0), vec!["No reports yet"]);
}

#[test]
fn drain_report_summaries() {
    assert_eq!(
        format_drain_report(&DrainReport::Skipped),
        "A drain is already running"
    );
    assert_eq!(
        format_drain_report(&DrainReport::Completed(DrainSummary::default())),
        "Nothing to send"
    );

    let summary = DrainSummary {
        items: vec![
            ItemOutcome {
                client_key: ClientKey::new(),
                outcome: SyncOutcome::Committed(ReportId::new("r1")),
                quarantined: false,
            },
            ItemOutcome {
                client_key: ClientKey::new(),
                outcome: SyncOutcome::Failed(verde_core::remote::RemoteError::Unreachable(
                    "down".to_string(),
                )),
                quarantined: false,
            },
            ItemOutcome {
                client_key: ClientKey::new(),
                outcome: SyncOutcome::Failed(verde_core::remote::RemoteError::Rejected(
                    "bad".to_string(),
                )),
                quarantined: true,
            },
        ],
    };
    assert_eq!(
        format_drain_report(&DrainReport::Completed(summary)),
        "Sent 1, 1 left queued, 1 rejected"
    );
}

#[test]
fn category_lines_indent_subcategories() {
    let categories = vec![Category {
        id: "vias".to_string(),
        name: "Vías".to_string(),
        subcategories: vec![Subcategory {
            id: "baches".to_string(),
            name: "Baches".to_string(),
        }],
    }];
    assert_eq!(
        format_category_lines(&categories),
        vec!["Vías (vias)", "  - Baches (baches)"]
    );
}

#[test]
fn resolve_db_path_prefers_flag_then_config() {
    let mut config = ClientConfig::default();
    config.queue_db_path = Some(PathBuf::from("/tmp/config-queue.db"));

    assert_eq!(
        resolve_db_path(Some(PathBuf::from("/tmp/flag.db")), &config).unwrap(),
        PathBuf::from("/tmp/flag.db")
    );
    assert_eq!(
        resolve_db_path(None, &config).unwrap(),
        PathBuf::from("/tmp/config-queue.db")
    );
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "multi_thread")]
async fn offline_submit_is_queued_and_listed() {
    let tmp = tempdir().unwrap();
    let ctx = CliContext {
        config: ClientConfig::default(),
        config_path: tmp.path().join("config.json"),
        db_path: tmp.path().join("state").join("queue.db"),
        offline: true,
    };

    {
        let service = open_service(&ctx, ConnectivityMode::Snapshot).await.unwrap();
        let outcome = service
            .submit(build_payload(SubmitArgs {
                category: "Baches".to_string(),
                subcategory: None,
                description: Some("Hueco en la vía".to_string()),
                address: None,
                location: None,
                photos: Vec::new(),
                videos: Vec::new(),
            }))
            .await
            .unwrap();
        assert!(outcome.is_queued());
    }

    let service = open_service(&ctx, ConnectivityMode::Snapshot).await.unwrap();
    let pending = service.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload.description, "Hueco en la vía");
    assert!(!service.monitor().is_online());
    assert!(ctx.db_path.exists());
}

#[test]
fn commands_requiring_an_api_fail_without_one() {
    let ctx = CliContext {
        config: ClientConfig::default(),
        config_path: PathBuf::from("/nonexistent/config.json"),
        db_path: PathBuf::from("/nonexistent/queue.db"),
        offline: false,
    };
    assert!(matches!(
        ctx.require_http_client(),
        Err(CliError::ApiNotConfigured)
    ));
}
