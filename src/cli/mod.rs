//! Gazolive CLI Module
//!
//! Command-line interface for running pipelines, inspecting exported models
//! and checking the training hardware.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::device::DeviceCapabilities;
use crate::export::{OnnxRuntime, OnnxSummary};
use crate::pipeline::{PipelineConfig, PipelineReport, PipelineRunner, Preset};
use crate::training::TaskKind;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) {
    println!("  {:<18} {}", muted(key), val.white());
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string())
}

fn fmt_bytes(bytes: u64) -> String {
    format!("{:.1} GB", bytes as f64 / 1024.0 / 1024.0 / 1024.0)
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "gazolive")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Gradient-boosted tree training and ONNX export for biogas plant models")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline described by a JSON config file
    Train {
        /// Pipeline config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Override the ONNX output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the run report (JSON) here
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Run one of the built-in pipelines
    Preset {
        /// biogas, optimal-parameter, anomaly or xgboost-regression
        preset: Preset,

        /// Input CSV
        #[arg(short, long)]
        data: PathBuf,

        /// Target column (required by some presets)
        #[arg(short, long)]
        target: Option<String>,

        /// Override the ONNX output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the number of search trials
        #[arg(long)]
        trials: Option<usize>,

        /// Write the run report (JSON) here
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Save the resolved config instead of running it
        #[arg(long)]
        save_config: Option<PathBuf>,
    },

    /// Show the structure of an exported ONNX model
    Inspect {
        /// ONNX model file
        #[arg(short, long)]
        model: PathBuf,
    },

    /// Show detected hardware
    Device,
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(config_path: &Path, output: Option<&Path>, report: Option<&Path>) -> anyhow::Result<()> {
    section("Train");

    step_run(&format!("Loading config {}", config_path.display()));
    let mut config = PipelineConfig::load(config_path)?;
    step_done(&format!("{} {}", config.task.name(), config.model.family()));

    if let Some(path) = output {
        config = config.with_output(path);
    }
    if let Some(path) = report {
        config = config.with_report(path);
    }

    run(config)
}

pub fn cmd_preset(
    preset: Preset,
    data: &Path,
    target: Option<&str>,
    output: Option<&Path>,
    trials: Option<usize>,
    report: Option<&Path>,
    save_config: Option<&Path>,
) -> anyhow::Result<()> {
    section(&format!("Preset {}", preset.name().cyan()));

    let mut config = PipelineConfig::preset(preset, data, target)?;
    if let Some(path) = output {
        config = config.with_output(path);
    }
    if let Some(n) = trials {
        config.search.n_trials = n;
    }
    if let Some(path) = report {
        config = config.with_report(path);
    }

    if let Some(path) = save_config {
        config.validate()?;
        config.save(path)?;
        println!("  {} config saved to {}", ok("✓"), path.display());
        println!();
        return Ok(());
    }

    run(config)
}

fn run(config: PipelineConfig) -> anyhow::Result<()> {
    kv("Data", &config.data.path.display().to_string());
    kv("Target", &config.data.target_column);
    kv("Model", config.model.family());
    if config.search.enabled() {
        kv("Search", &format!("{} trials ({:?})", config.search.n_trials, config.search.sampler));
    }
    println!();

    step_run("Running pipeline");
    let start = Instant::now();
    let run = PipelineRunner::new(config).run()?;
    step_done(&format!("{:.2?}", start.elapsed()));

    print_report(&run.report);
    Ok(())
}

fn print_report(report: &PipelineReport) {
    section("Data");
    kv("Rows", &format!("{} ({} train / {} test)", report.n_samples, report.n_train, report.n_test));
    kv("Features", &report.feature_names.len().to_string());

    if let Some(search) = &report.search {
        section("Search");
        kv("Trials", &format!("{} ({} failed)", search.n_trials, search.n_failed));
        kv("Best trial", &format!("#{} score {:.4}", search.best_trial, search.best_score));
        for (name, value) in &search.best_params {
            kv(&format!("  {}", name), &value.to_string());
        }
    }

    section("Model");
    kv("Family", report.model.family());
    kv("Trees", &report.n_trees.to_string());
    if let Some(best) = report.best_iteration {
        kv("Best iteration", &best.to_string());
    }
    let m = &report.metrics;
    match report.task {
        TaskKind::Regression => {
            kv("RMSE", &fmt_opt(m.rmse));
            kv("MAE", &fmt_opt(m.mae));
            kv("R²", &fmt_opt(m.r2));
        }
        TaskKind::Classification => {
            kv("Accuracy", &fmt_opt(m.accuracy));
            kv("Precision", &fmt_opt(m.precision));
            kv("Recall", &fmt_opt(m.recall));
            kv("F1", &fmt_opt(m.f1_score));
            kv("Log loss", &fmt_opt(m.log_loss));
        }
    }

    println!();
    println!("  {}", muted("Top features"));
    for (name, importance) in report.feature_importances.iter().take(10) {
        println!("  {:<28} {:>8.4}", name, importance);
    }

    if report.model_path.is_some() || report.feature_map_path.is_some() {
        section("Artifacts");
        if let Some(path) = &report.model_path {
            kv("Model", &path.display().to_string());
        }
        if let Some(path) = &report.feature_map_path {
            kv("Feature map", &path.display().to_string());
        }
        if let Some(v) = &report.verification {
            println!(
                "  {} verified: {} {:.4} native vs {:.4} exported",
                ok("✓"),
                v.metric,
                v.native,
                v.exported
            );
        }
    }
    println!();
}

pub fn cmd_inspect(model_path: &Path) -> anyhow::Result<()> {
    section("Inspect");

    let runtime = OnnxRuntime::load(model_path)?;
    let OnnxSummary {
        graph_name,
        producer,
        ir_version,
        opsets,
        op_type,
        n_features,
        n_trees,
        n_nodes,
        n_leaves,
        inputs,
        outputs,
        ..
    } = runtime.summary();

    kv("File", &model_path.display().to_string());
    kv("Graph", &graph_name);
    kv("Producer", &producer);
    kv("IR version", &ir_version.to_string());
    for (domain, version) in opsets {
        let domain = if domain.is_empty() { "ai.onnx" } else { domain.as_str() };
        kv(&format!("Opset {}", domain), &version.to_string());
    }
    kv("Operator", &op_type);
    kv("Features", &n_features.to_string());
    kv("Trees", &n_trees.to_string());
    kv("Nodes", &format!("{} ({} leaves)", n_nodes, n_leaves));
    kv("Inputs", &inputs.join(", "));
    kv("Outputs", &outputs.join(", "));
    println!();
    Ok(())
}

pub fn cmd_device() -> anyhow::Result<()> {
    section("Device");

    let caps = DeviceCapabilities::detect();
    kv("Environment", &caps.environment);
    kv("CPU", &caps.cpu.brand);
    kv("Cores", &format!("{} ({} threads)", caps.cpu.cores, caps.cpu.threads));
    kv("Frequency", &format!("{} MHz", caps.cpu.frequency_mhz));
    let mut features = Vec::new();
    if caps.cpu.has_avx2 {
        features.push("avx2");
    }
    if caps.cpu.has_neon {
        features.push("neon");
    }
    if !features.is_empty() {
        kv("SIMD", &features.join(", "));
    }
    kv(
        "Memory",
        &format!("{} / {}", fmt_bytes(caps.memory.available_bytes), fmt_bytes(caps.memory.total_bytes)),
    );
    match &caps.gpu {
        Some(gpu) => {
            let count = gpu.count.map(|c| format!("{} × ", c)).unwrap_or_default();
            kv("GPU", &format!("{}CUDA (driver {})", count, gpu.driver_version));
        }
        None => kv("GPU", &"none".yellow().to_string()),
    }
    println!();
    Ok(())
}
