use verde_core::sync::DrainReport;

use crate::commands::common::{open_service, CliContext, ConnectivityMode};
use crate::error::CliError;

pub async fn run_drain(ctx: &CliContext) -> Result<(), CliError> {
    if ctx.config.api_base_url.is_none() {
        return Err(CliError::ApiNotConfigured);
    }

    let service = open_service(ctx, ConnectivityMode::Snapshot).await?;
    if !service.monitor().is_online() {
        let pending = service.pending().await.len();
        println!("Offline; {pending} submission(s) still queued");
        return Ok(());
    }

    println!("{}", format_drain_report(&service.drain().await));
    Ok(())
}

pub fn format_drain_report(report: &DrainReport) -> String {
    let Some(summary) = report.summary() else {
        return "A drain is already running".to_string();
    };
    if summary.items.is_empty() {
        return "Nothing to send".to_string();
    }

    let mut parts = vec![format!("Sent {}", summary.committed())];
    if summary.retained() > 0 {
        parts.push(format!("{} left queued", summary.retained()));
    }
    if summary.quarantined() > 0 {
        parts.push(format!("{} rejected", summary.quarantined()));
    }
    parts.join(", ")
}
