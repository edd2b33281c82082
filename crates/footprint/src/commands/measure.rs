//! Measure command

use std::time::Duration;

use anyhow::{anyhow, ensure, Result};
use camino::Utf8Path;
use footprint_core::{
    fuzzy_kilobytes, Error, ExecutionMode, MeasureConfig, MeasureContext, MeasureOptions,
    MeasurementReport, MeasurementService, Selection,
};
use serde_json::{json, Value};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::debug;

use crate::cli::MeasureArgs;
use crate::output;

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    key: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Encrypted")]
    encrypted: &'static str,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Status")]
    status: String,
}

pub async fn run(args: MeasureArgs, config_path: Option<&Utf8Path>, quiet: bool) -> Result<()> {
    let config = MeasureConfig::load(config_path)?;
    let options = build_options(&args, &config)?;
    let service = MeasurementService::new(config.bootstrap_registry()?);

    let profile_dir = std::path::absolute(args.profile_dir.as_std_path())?;
    ensure!(
        profile_dir.is_dir(),
        "Profile directory not found: {}",
        profile_dir.display()
    );
    let ctx = MeasureContext::new(&profile_dir);
    debug!("Measuring profile at {} with {:?}", profile_dir.display(), options);

    if !args.json && !quiet {
        output::header("Backup Footprint");
        output::kv("Profile", &profile_dir.display().to_string());
        output::kv("Mode", &format!("{:?}", options.mode).to_lowercase());
        if let Some(timeout) = options.per_resource_timeout {
            output::kv("Timeout", &format!("{} ms", timeout.as_millis()));
        }
        println!();
    }

    let spinner = output::spinner("Measuring resources...", quiet || args.json);
    let outcome = service.measure_all(&ctx, &options).await;
    spinner.finish_and_clear();

    match outcome {
        Ok(report) => {
            print_report(&report, &args, quiet)?;
            Ok(())
        }
        Err(Error::Aborted(aggregate)) => {
            print_report(&aggregate.partial, &args, quiet)?;
            Err(anyhow!(aggregate))
        }
        Err(e) => Err(e.into()),
    }
}

/// Merge CLI flags over the configuration file
fn build_options(args: &MeasureArgs, config: &MeasureConfig) -> Result<MeasureOptions> {
    let mut options = config.to_options()?;

    if !args.include.is_empty() {
        options.include = Selection::only(&args.include)?;
    }
    if let Some(ms) = args.timeout_ms {
        ensure!(ms > 0, "Timeout must be greater than zero");
        options.per_resource_timeout = Some(Duration::from_millis(ms));
    }
    if args.fail_fast {
        options.continue_on_error = false;
    }
    if args.sequential {
        options.mode = ExecutionMode::Sequential;
    }

    Ok(options)
}

fn print_report(report: &MeasurementReport, args: &MeasureArgs, quiet: bool) -> Result<()> {
    if args.json {
        println!("{}", report_json(report, args.fuzzy)?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!("{}", render_table(report, args.fuzzy));
    println!();
    output::kv("Total", &format_size(report.total_bytes, args.fuzzy));
    output::kv(
        "Requires encryption",
        &format_size(report.encrypted_bytes(), args.fuzzy),
    );
    output::kv("Duration", &format!("{} ms", report.duration_ms));
    println!();

    if report.is_complete() {
        output::success(&format!("Measured {} resources", report.results.len()));
    } else {
        let failed: Vec<&str> = report.failed_keys.iter().map(|k| k.as_str()).collect();
        output::warning(&format!(
            "{} resources failed to measure: {}",
            failed.len(),
            failed.join(", ")
        ));
    }
    Ok(())
}

fn render_table(report: &MeasurementReport, fuzzy: bool) -> String {
    let rows = report.results.iter().map(|result| ResultRow {
        key: result.key.to_string(),
        size: result
            .bytes()
            .map(|bytes| format_size(bytes, fuzzy))
            .unwrap_or_else(|| "-".to_string()),
        encrypted: if result.requires_encryption { "yes" } else { "no" },
        time: format!("{} ms", result.elapsed_ms),
        status: match result.failure() {
            Some(failure) => failure.message.clone(),
            None => "ok".to_string(),
        },
    });

    Table::new(rows).with(Style::rounded()).to_string()
}

fn format_size(bytes: u64, fuzzy: bool) -> String {
    if fuzzy {
        format!("~{} KB", fuzzy_kilobytes(bytes))
    } else {
        output::format_bytes(bytes)
    }
}

fn report_json(report: &MeasurementReport, fuzzy: bool) -> Result<String> {
    let mut value = serde_json::to_value(report)?;

    if fuzzy {
        if let Some(results) = value.get_mut("results").and_then(Value::as_array_mut) {
            for result in results {
                if let Some(bytes) = result.pointer("/outcome/bytes").and_then(Value::as_u64) {
                    result["fuzzy_kb"] = json!(fuzzy_kilobytes(bytes));
                }
            }
        }
        value["fuzzy_total_kb"] = json!(fuzzy_kilobytes(report.total_bytes));
    }

    Ok(serde_json::to_string_pretty(&value)?)
}
