use verde_core::{ReportPayload, SubmitOutcome};

use crate::cli::LocationArg;
use crate::commands::common::{open_service, short_key, CliContext, ConnectivityMode};
use crate::error::CliError;

pub struct SubmitArgs {
    pub category: String,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub location: Option<LocationArg>,
    pub photos: Vec<String>,
    pub videos: Vec<String>,
}

pub fn build_payload(args: SubmitArgs) -> ReportPayload {
    let mut payload = ReportPayload::new(args.category);
    if let Some(subcategory) = args.subcategory {
        payload = payload.with_subcategory(subcategory);
    }
    if let Some(description) = args.description {
        payload = payload.with_description(description);
    }
    if let Some(address) = args.address {
        payload = payload.with_address(address);
    }
    if let Some(location) = args.location {
        payload = payload.with_location(location.latitude, location.longitude);
    }
    payload.photo_urls = args.photos;
    payload.video_urls = args.videos;
    payload
}

pub async fn run_submit(args: SubmitArgs, ctx: &CliContext) -> Result<(), CliError> {
    let service = open_service(ctx, ConnectivityMode::Snapshot).await?;
    let outcome = service.submit(build_payload(args)).await?;

    match &outcome {
        SubmitOutcome::Sent(id) => println!("{outcome} ({id})"),
        SubmitOutcome::Queued(key) => println!("{outcome} ({})", short_key(key)),
    }
    Ok(())
}
