//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

/// Churn scoring CLI: trains a gradient-boosted model on customer data and
/// scores individual customers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "data/customer_churn_dataset-testing-master.csv")]
    pub input: PathBuf,

    /// Optional TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Score a single customer by identifier
    #[arg(short = 'u', long)]
    pub customer: Option<String>,

    /// Write the customer summary to this text file
    #[arg(short, long, requires = "customer")]
    pub export: Option<PathBuf>,

    /// Churn thresholds as "medium,high", e.g. "0.4,0.7"
    #[arg(long)]
    pub churn_thresholds: Option<String>,

    /// Persona used to phrase template nudges
    #[arg(long)]
    pub persona: Option<String>,

    /// Generate nudges with the hosted text generator
    #[arg(long)]
    pub hosted_nudge: bool,

    /// Append view events to this file instead of the configured path
    #[arg(long)]
    pub usage_log: Option<PathBuf>,

    /// Only assign A/B experiment groups to the input file and exit
    #[arg(long)]
    pub assign_variants: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse churn thresholds from the thresholds string
    /// Expected format: "medium,high"
    pub fn parse_churn_thresholds(&self) -> crate::Result<Option<(f64, f64)>> {
        if let Some(ref thresholds) = self.churn_thresholds {
            let parts: Vec<&str> = thresholds.split(',').collect();
            if parts.len() != 2 {
                anyhow::bail!("Churn thresholds must be in format 'medium,high'");
            }

            let medium: f64 = parts[0]
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid medium threshold: {}", parts[0]))?;
            let high: f64 = parts[1]
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid high threshold: {}", parts[1]))?;

            Ok(Some((medium, high)))
        } else {
            Ok(None)
        }
    }

    /// Fold command-line overrides into the loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) -> crate::Result<()> {
        if let Some((medium, high)) = self.parse_churn_thresholds()? {
            config.risk.churn_medium = medium;
            config.risk.churn_high = high;
        }
        if let Some(persona) = &self.persona {
            config.nudge.persona = persona.clone();
        }
        if self.hosted_nudge {
            config.nudge.hosted = true;
        }
        if let Some(path) = &self.usage_log {
            config.usage_log.path = path.clone();
        }
        config.validate()?;
        Ok(())
    }
}
