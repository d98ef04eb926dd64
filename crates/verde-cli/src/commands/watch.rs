use verde_core::feed::{FeedScope, FeedUpdate};
use verde_core::models::PendingSubmission;

use crate::commands::common::{
    format_entry_line, format_report_line, now_ms, open_service, CliContext, ConnectivityMode,
};
use crate::error::CliError;

/// Reports shown when the feed first loads.
const BASELINE_LIMIT: usize = 20;

pub async fn run_watch(mine: bool, ctx: &CliContext) -> Result<(), CliError> {
    if ctx.config.api_base_url.is_none() {
        return Err(CliError::ApiNotConfigured);
    }

    let service = open_service(ctx, ConnectivityMode::Watch).await?;
    let scope = if mine {
        service.my_scope()
    } else {
        FeedScope::All
    };
    if mine && scope == FeedScope::All {
        eprintln!("No user configured; showing all reports");
    }

    // Queued submissions go out whenever the API becomes reachable again
    let _auto_drain = service.start_auto_drain();

    let queued = service.pending().await;
    let mut baseline = true;
    let mut subscription = service.watch(
        scope,
        move |update| {
            for line in format_feed_update(update, baseline, &queued, now_ms()) {
                println!("{line}");
            }
            baseline = false;
        },
        |error| eprintln!("Feed error: {error}"),
    );

    println!("Watching for new reports. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    subscription.unsubscribe();

    let pending = service.pending().await.len();
    if pending > 0 {
        println!("{pending} submission(s) still queued");
    }
    Ok(())
}

/// Lines printed for one feed update.
///
/// The first update lists queued submissions and the newest reports; later
/// ones list only arrivals.
pub fn format_feed_update(
    update: &FeedUpdate,
    baseline: bool,
    queued: &[PendingSubmission],
    now_ms: i64,
) -> Vec<String> {
    let reports = update.snapshot.reports();
    if baseline {
        let entries = update.snapshot.entries_with_queued(queued);
        if entries.is_empty() {
            return vec!["No reports yet".to_string()];
        }
        return entries
            .iter()
            .take(BASELINE_LIMIT)
            .map(|entry| format_entry_line(entry, now_ms))
            .collect();
    }

    let Some(notice) = update.notice else {
        return Vec::new();
    };
    let mut lines = vec![format!("-- {notice} --")];
    lines.extend(
        reports
            .iter()
            .filter(|report| update.arrivals.contains(&report.id))
            .map(|report| format_report_line(report, now_ms)),
    );
    lines
}
