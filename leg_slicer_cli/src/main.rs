use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use leg_slicer::ingest::{format_timestamp, load_path};
use leg_slicer::normalize::NormalizedSeries;
use leg_slicer::{
    segment, ArcTanFunction, Params, Period, ResidualPolicy, Segmentation, Series, SliceFitter,
    ZoneKind,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Every n-th normalized bearing shown in a diagnostic preview.
const PREVIEW_STRIDE: usize = 12;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bearing track leg segmentation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split one or more bearing logs into legs and write them as CSV/JSON
    Zones(ZonesArgs),
    /// Summarize bearing logs and their whole-track fit
    Diagnose(DiagnoseArgs),
}

#[derive(Parser, Debug)]
struct ZonesArgs {
    /// Bearing logs to segment
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "zones.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Write the full segmentation as JSON instead of CSV
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Optional parameter JSON; flags below override it
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Highest normalized RMS score a leg may have
    #[arg(long)]
    fit_tolerance: Option<f64>,

    /// Shortest leg to report (minutes)
    #[arg(long)]
    min_leg_mins: Option<f64>,

    /// Solver iteration bound per fit
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Report unsliceable stretches as residual zones
    #[arg(long, action = ArgAction::SetTrue)]
    emit_residual: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct DiagnoseArgs {
    /// Bearing logs to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "bearing_diagnostics.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Serialize)]
struct FileSegmentation<'a> {
    file: String,
    #[serde(flatten)]
    segmentation: &'a Segmentation,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Zones(args) => args.verbose,
        Command::Diagnose(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Zones(args) => handle_zones(args),
        Command::Diagnose(args) => handle_diagnose(args),
    }
}

fn build_params(args: &ZonesArgs) -> Result<Params> {
    let mut params = match args.config.as_ref() {
        Some(path) => load_params(path)?,
        None => Params::default(),
    };
    if let Some(tolerance) = args.fit_tolerance {
        params.fit_tolerance = tolerance;
    }
    if let Some(minutes) = args.min_leg_mins {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(anyhow!("--min-leg-mins must be a non-negative number"));
        }
        params.min_leg_ms = (minutes * 60_000.0).round() as i64;
    }
    if let Some(iterations) = args.max_iterations {
        params.max_iterations = iterations;
    }
    if args.emit_residual {
        params.residual_policy = ResidualPolicy::EmitBestEffort;
    }
    params.validate()?;
    Ok(params)
}

fn load_params(path: &Path) -> Result<Params> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Load every input in parallel, keeping the order they were given in.
fn load_inputs(inputs: &[PathBuf]) -> Result<Vec<(PathBuf, Series)>> {
    let indexed: Vec<(usize, PathBuf)> = inputs.iter().cloned().enumerate().collect();
    let mut loaded = indexed
        .par_iter()
        .map(|(id, path)| -> Result<(usize, PathBuf, Series)> {
            let series =
                load_path(path).with_context(|| format!("failed to load {}", path.display()))?;
            Ok((*id, path.clone(), series))
        })
        .collect::<Result<Vec<_>>>()?;
    loaded.sort_by_key(|(id, _, _)| *id);
    Ok(loaded
        .into_iter()
        .map(|(_, path, series)| (path, series))
        .collect())
}

fn handle_zones(args: ZonesArgs) -> Result<()> {
    let params = build_params(&args)?;

    let t_load = Instant::now();
    let inputs = load_inputs(&args.inputs)?;
    if args.profile || args.verbose {
        info!(
            "Load stage: {:.1} ms ({} files)",
            t_load.elapsed().as_secs_f64() * 1000.0,
            inputs.len()
        );
    }

    let t_segment = Instant::now();
    let results = inputs
        .par_iter()
        .map(|(path, series)| -> Result<(String, Segmentation)> {
            let segmentation = segment(series, &ArcTanFunction, &params)
                .with_context(|| format!("failed to segment {}", path.display()))?;
            Ok((path.display().to_string(), segmentation))
        })
        .collect::<Result<Vec<_>>>()?;
    if args.profile || args.verbose {
        info!(
            "Segment stage: {:.1} ms",
            t_segment.elapsed().as_secs_f64() * 1000.0
        );
    }

    for (file, segmentation) in &results {
        let stats = &segmentation.stats;
        info!(
            "{}: {} zones ({} fits, {} unsliceable, {} discarded)",
            file, stats.zones, stats.fits, stats.unsliceable_periods, stats.discarded_ranges
        );
        if stats.solver_failures > 0 {
            warn!("{}: {} solver failures", file, stats.solver_failures);
        }
    }

    let to_stdout = args.output.as_os_str() == "-";
    let handle: Box<dyn Write> = if to_stdout {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(&args.output)
                .with_context(|| format!("failed to create {}", args.output.display()))?,
        )
    };

    if args.json {
        let files: Vec<FileSegmentation<'_>> = results
            .iter()
            .map(|(file, segmentation)| FileSegmentation {
                file: file.clone(),
                segmentation,
            })
            .collect();
        let mut handle = handle;
        serde_json::to_writer_pretty(&mut handle, &files)?;
        writeln!(handle)?;
    } else {
        let mut writer = csv::Writer::from_writer(handle);
        write_zone_rows(&results, &mut writer)?;
    }

    if !to_stdout {
        info!("Wrote zones: {}", args.output.display());
    }
    Ok(())
}

fn write_zone_rows<W: Write>(
    results: &[(String, Segmentation)],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "file",
        "start_ms",
        "end_ms",
        "start_utc",
        "end_utc",
        "start_index",
        "end_index",
        "score",
        "start_bearing_deg",
        "end_bearing_deg",
        "kind",
    ])?;

    for (file, segmentation) in results {
        for zone in &segmentation.zones {
            let kind = match zone.kind {
                ZoneKind::Fitted => "fitted",
                ZoneKind::Residual => "residual",
            };
            writer.write_record([
                file.clone(),
                zone.start.to_string(),
                zone.end.to_string(),
                format_timestamp(zone.start).unwrap_or_default(),
                format_timestamp(zone.end).unwrap_or_default(),
                zone.start_index.to_string(),
                zone.end_index.to_string(),
                zone.score.map_or(String::new(), |s| format!("{:.3e}", s)),
                format!("{:.3}", zone.start_bearing_deg),
                format!("{:.3}", zone.end_bearing_deg),
                kind.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn handle_diagnose(args: DiagnoseArgs) -> Result<()> {
    let inputs = load_inputs(&args.inputs)?;
    let params = Params::default();

    let mut report = String::new();
    for (path, series) in &inputs {
        report.push_str(&diagnose_series(&path.display().to_string(), series, &params));
        report.push('\n');
    }

    if args.output.as_os_str() == "-" {
        io::stdout().lock().write_all(report.as_bytes())?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Diagnostic report written: {}", args.output.display());
    }
    Ok(())
}

fn diagnose_series(name: &str, series: &Series, params: &Params) -> String {
    let mut report = String::new();
    report.push_str(&format!("FILE: {}\n", name));
    report.push_str(&format!("  samples: {}\n", series.len()));
    report.push_str(&format!(
        "  timespan_s: {:.1}\n",
        series.duration_ms() as f64 / 1000.0
    ));
    let (min, max) = series
        .bearings()
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &b| {
            (lo.min(b), hi.max(b))
        });
    report.push_str(&format!("  bearing_deg: min={:.3} max={:.3}\n", min, max));

    let normalized = NormalizedSeries::from_series(series);
    report.push_str("  normalized_bearings:\n");
    for (index, bearing) in normalized
        .bearings()
        .iter()
        .enumerate()
        .step_by(PREVIEW_STRIDE)
    {
        report.push_str(&format!("    - [{}] {:.6}\n", index, bearing));
    }

    match Period::try_new(0, series.len() - 1) {
        Some(whole) => {
            let fitter = SliceFitter::new(&normalized, &ArcTanFunction, params.solver());
            let fit = fitter.score_slice(whole, &params.initial_parameters);
            if fit.is_scored() {
                report.push_str(&format!("  overall_score: {:.6e}\n", fit.rms_error));
                report.push_str(&format!(
                    "  overall_coefficients: {}\n",
                    fit.coefficients
                        .iter()
                        .map(|c| format!("{:.6}", c))
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            } else {
                report.push_str(&format!("  overall_score: n/a ({:?})\n", fit.status));
            }
        }
        None => report.push_str("  overall_score: n/a (single sample)\n"),
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use leg_slicer::synthetic::{LegSpec, Track};

    fn zones_args(extra: &[&str]) -> ZonesArgs {
        let mut argv = vec!["leg-slicer", "zones", "track.csv"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Zones(args) => args,
            Command::Diagnose(_) => unreachable!(),
        }
    }

    #[test]
    fn flags_override_defaults() {
        let args = zones_args(&["--fit-tolerance", "0.01", "--min-leg-mins", "2", "--emit-residual"]);
        let params = build_params(&args).unwrap();
        assert_eq!(params.fit_tolerance, 0.01);
        assert_eq!(params.min_leg_ms, 120_000);
        assert_eq!(params.residual_policy, ResidualPolicy::EmitBestEffort);
        assert_eq!(params.max_iterations, Params::default().max_iterations);
    }

    #[test]
    fn invalid_flags_are_rejected() {
        assert!(build_params(&zones_args(&["--fit-tolerance=-1"])).is_err());
        assert!(build_params(&zones_args(&["--max-iterations", "0"])).is_err());
    }

    #[test]
    fn csv_has_one_row_per_zone() {
        let series = Track {
            legs: vec![LegSpec::new(60, 0.8, -0.3)],
            ..Track::default()
        }
        .generate()
        .unwrap();
        let segmentation = segment(&series, &ArcTanFunction, &Params::default()).unwrap();
        let results = vec![("track.csv".to_string(), segmentation)];

        let mut writer = csv::Writer::from_writer(Vec::new());
        write_zone_rows(&results, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + results[0].1.zones.len());
        assert!(lines[0].starts_with("file,start_ms,end_ms,start_utc"));
        assert!(lines[1].starts_with("track.csv,"));
        assert!(lines[1].ends_with(",fitted"));
    }

    #[test]
    fn diagnose_previews_every_twelfth_bearing() {
        let series = Track {
            legs: vec![LegSpec::new(30, 0.5, 0.1)],
            ..Track::default()
        }
        .generate()
        .unwrap();
        let report = diagnose_series("track.csv", &series, &Params::default());
        assert!(report.contains("samples: 30"));
        assert!(report.contains("[0] "));
        assert!(report.contains("[12] "));
        assert!(report.contains("[24] "));
        assert!(!report.contains("[1] "));
        assert!(report.contains("overall_score: "));
    }
}
