use crate::commands::common::{
    format_pending_lines, format_rejected_lines, now_ms, open_service, pending_to_list_item,
    rejected_to_list_item, resolve_rejected_key, short_key, CliContext, ConnectivityMode,
    PendingListItem, RejectedListItem,
};
use crate::error::CliError;

pub async fn run_pending(as_json: bool, ctx: &CliContext) -> Result<(), CliError> {
    let service = open_service(ctx, ConnectivityMode::Snapshot).await?;
    let pending = service.pending().await;
    let now_ms = now_ms();

    if as_json {
        let items = pending
            .iter()
            .map(|submission| pending_to_list_item(submission, now_ms))
            .collect::<Vec<PendingListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if pending.is_empty() {
        println!("Nothing waiting to be sent");
    } else {
        for line in format_pending_lines(&pending, now_ms) {
            println!("{line}");
        }
        println!("State: {}", service.sync_state().await.label());
    }

    Ok(())
}

pub async fn run_rejected(as_json: bool, ctx: &CliContext) -> Result<(), CliError> {
    let service = open_service(ctx, ConnectivityMode::Snapshot).await?;
    let rejected = service.rejected().await;
    let now_ms = now_ms();

    if as_json {
        let items = rejected
            .iter()
            .map(|item| rejected_to_list_item(item, now_ms))
            .collect::<Vec<RejectedListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if rejected.is_empty() {
        println!("No rejected submissions");
    } else {
        for line in format_rejected_lines(&rejected, now_ms) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_requeue(key_query: &str, ctx: &CliContext) -> Result<(), CliError> {
    let service = open_service(ctx, ConnectivityMode::Snapshot).await?;
    let rejected = service.rejected().await;
    let key = resolve_rejected_key(key_query, &rejected)?;

    let submission = service.requeue(&key).await?;
    println!("Requeued {}", short_key(&submission.client_key));
    Ok(())
}
