//! EngageTrack: churn scoring CLI
//!
//! This is the main entrypoint that orchestrates data loading, model
//! training, single-customer scoring and nudge generation.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use engagetrack::{data, logging, risk::Band, scoring, Args, Config, DataLoader, Session};
use tracing::warn;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    if let Err(e) = logging::init(args.verbose) {
        eprintln!("{e}");
    }

    let mut config = Config::load(args.config.as_deref())?;
    args.apply_overrides(&mut config)?;

    if args.assign_variants {
        return run_assign_variants(&args, &config);
    }

    let loader = DataLoader::new(&args.input, config.schema.clone(), config.experiment.clone());
    if let Some(customer) = &args.customer {
        run_customer_mode(&args, &loader, config, customer)
    } else {
        run_full_pipeline(&args, &loader, config)
    }
}

/// Add experiment groups to the input file when missing
fn run_assign_variants(args: &Args, config: &Config) -> Result<()> {
    let mut table = data::read_csv(&args.input)?;
    let groups = &config.experiment.groups;
    let assigned = data::assign_variants(
        &mut table,
        &config.experiment.column,
        groups,
        &mut rand::thread_rng(),
    )?;

    if assigned {
        data::write_csv(&table, &args.input)?;
        println!(
            "✓ Assigned {}/{} groups to {} rows in {}",
            groups[0],
            groups[1],
            table.len(),
            args.input.display()
        );
    } else {
        println!(
            "Column '{}' already present; assignments unchanged",
            config.experiment.column
        );
    }
    Ok(())
}

/// Train once and show everything known about one customer
fn run_customer_mode(args: &Args, loader: &DataLoader, config: Config, customer: &str) -> Result<()> {
    println!("=== Customer View ===");
    let start_time = Instant::now();

    let session = Session::start(loader, config).context("Failed to train churn model")?;
    let view = session.view(customer)?;

    for warning in &view.warnings {
        println!("⚠ {warning}");
    }

    match &view.summary {
        Ok(summary) => {
            println!("\n{summary}");
            if let Some(path) = &args.export {
                scoring::export_summary(path, summary)?;
                println!("\nSummary saved to: {}", path.display());
            }
        }
        Err(e) => {
            warn!(customer, error = %e, "Scoring failed");
            println!("\n✗ Could not score customer {}: {}", view.id, e);
        }
    }

    println!("\n💡 Nudge:\n{}", view.nudge);
    if args.verbose {
        println!("\nProcessing time: {:.2}s", start_time.elapsed().as_secs_f64());
    }
    Ok(())
}

/// Train the model and report band distribution across all customers
fn run_full_pipeline(args: &Args, loader: &DataLoader, config: Config) -> Result<()> {
    println!("=== Churn Scoring Pipeline ===\n");
    let start_time = Instant::now();

    let session = Session::start(loader, config).context("Failed to train churn model")?;
    let pipeline = session.pipeline();

    println!("✓ Model trained on {} customers", pipeline.training_rows());
    if !pipeline.exclusions().is_empty() {
        println!("  Excluded rows: {}", pipeline.exclusions().count());
        for (column, count) in pipeline.exclusions().by_column() {
            println!("    {column}: {count}");
        }
    }

    if args.verbose {
        println!("\n=== Feature Importance ===");
        let names = pipeline.feature_names();
        let importances = pipeline.model().feature_importances();
        for (name, importance) in names.iter().zip(importances) {
            println!("{name}: {:.3}", importance);
        }
    }

    let report = session.score_all();
    println!("\n=== Churn Risk Bands ===");
    for band in [Band::Low, Band::Medium, Band::High] {
        let count = report.bands.get(&band).copied().unwrap_or(0);
        let percentage = if report.scored > 0 {
            count as f64 / report.scored as f64 * 100.0
        } else {
            0.0
        };
        println!("{band}: {count} customers ({percentage:.1}%)");
    }
    if !report.failures.is_empty() {
        println!("\nCould not score {} customers:", report.failures.len());
        for (id, reason) in report.failures.iter().take(10) {
            println!("  {id}: {reason}");
        }
    }

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}
