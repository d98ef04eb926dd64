use crate::cli::ConfigCommands;
use crate::commands::common::CliContext;
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, ctx: &CliContext) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&ctx.config)?);
            println!("Queue database: {}", ctx.db_path.display());
        }
        ConfigCommands::Path => println!("{}", ctx.config_path.display()),
    }
    Ok(())
}
