use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "verde")]
#[command(about = "Report city incidents from the command line, online or not")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local queue database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Treat the network as unreachable and queue everything
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit an incident report (queued when offline)
    #[command(alias = "report")]
    Submit {
        /// Incident category
        category: String,
        /// Optional subcategory
        #[arg(long)]
        subcategory: Option<String>,
        /// Free-form description (derived from the category when omitted)
        #[arg(short, long)]
        description: Option<String>,
        /// Street address of the incident
        #[arg(long)]
        address: Option<String>,
        /// Coordinates as LAT,LON
        #[arg(long, value_name = "LAT,LON")]
        location: Option<LocationArg>,
        /// Already-uploaded photo URL (repeatable)
        #[arg(long = "photo", value_name = "URL")]
        photos: Vec<String>,
        /// Already-uploaded video URL (repeatable)
        #[arg(long = "video", value_name = "URL")]
        videos: Vec<String>,
    },
    /// List submissions waiting to be sent
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List submissions the server rejected
    Rejected {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a rejected submission back into the queue
    Requeue {
        /// Client key or unique key prefix
        key: String,
    },
    /// Send queued submissions now
    Drain,
    /// Follow the live incident feed
    Watch {
        /// Only reports submitted by the configured user
        #[arg(long)]
        mine: bool,
    },
    /// List incident categories
    Categories {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Bypass the cached catalog
        #[arg(long)]
        refresh: bool,
    },
    /// Inspect client configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}

/// `--location` argument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocationArg {
    pub latitude: f64,
    pub longitude: f64,
}

impl FromStr for LocationArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (latitude, longitude) = value
            .split_once(',')
            .ok_or_else(|| "expected LAT,LON".to_string())?;
        let latitude = latitude
            .trim()
            .parse::<f64>()
            .map_err(|error| format!("invalid latitude: {error}"))?;
        let longitude = longitude
            .trim()
            .parse::<f64>()
            .map_err(|error| format!("invalid longitude: {error}"))?;

        if !(-90.0..=90.0).contains(&latitude) {
            return Err("latitude must be between -90 and 90".to_string());
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err("longitude must be between -180 and 180".to_string());
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}
