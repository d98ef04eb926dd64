use verde_core::models::Category;

use crate::commands::common::CliContext;
use crate::error::CliError;

pub async fn run_categories(as_json: bool, refresh: bool, ctx: &CliContext) -> Result<(), CliError> {
    let client = ctx.require_http_client()?;
    if refresh {
        client.refresh_categories().await;
    }
    let categories = client.categories().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
    } else {
        for line in format_category_lines(&categories) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_category_lines(categories: &[Category]) -> Vec<String> {
    let mut lines = Vec::new();
    for category in categories {
        lines.push(format!("{} ({})", category.name, category.id));
        for subcategory in &category.subcategories {
            lines.push(format!("  - {} ({})", subcategory.name, subcategory.id));
        }
    }
    lines
}
