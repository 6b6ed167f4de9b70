use std::io::{self, Write};

use serde::Serialize;

use crate::app::{LocateReport, PipelineReport, StageReport};
use crate::store::StoreStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Writes stage reports to stdout, as JSON or as a short summary.
pub struct ReportOutput {
    mode: OutputMode,
}

impl ReportOutput {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn print_pipeline(&self, report: &PipelineReport) -> io::Result<()> {
        if self.mode == OutputMode::Json {
            return print_json(report);
        }
        let mut lines = vec![locate_line(&report.locate)];
        lines.extend(report.stages.iter().map(stage_line));
        print_lines(&lines)
    }

    pub fn print_locate(&self, report: &LocateReport) -> io::Result<()> {
        match self.mode {
            OutputMode::Json => print_json(report),
            OutputMode::Human => print_lines(&[locate_line(report)]),
        }
    }

    pub fn print_stage(&self, report: &StageReport) -> io::Result<()> {
        match self.mode {
            OutputMode::Json => print_json(report),
            OutputMode::Human => print_lines(&[stage_line(report)]),
        }
    }

    pub fn print_status(&self, status: &StoreStatus) -> io::Result<()> {
        if self.mode == OutputMode::Json {
            return print_json(status);
        }
        let mut lines = vec![format!("census {}", status.census_version)];
        for entry in &status.entries {
            let mark = if entry.present { "present" } else { "missing" };
            lines.push(format!("  {:<13} {mark:<8} {}", entry.name, entry.path));
        }
        lines.push(format!("  annotations   {}", status.annotation_outputs));
        lines.push(format!("  downloads     {}", status.dataset_files));
        print_lines(&lines)
    }
}

fn locate_line(report: &LocateReport) -> String {
    format!(
        "locate     census {}: {} datasets from {} observations{}",
        report.census_version,
        report.datasets,
        report.observations,
        if report.cached { " (cached)" } else { "" }
    )
}

fn stage_line(report: &StageReport) -> String {
    if report.cached && report.items == report.skipped {
        return format!("{:<10} {} cached", report.stage, report.outputs);
    }
    format!(
        "{:<10} {} items: {} ok, {} skipped, {} failed; {} outputs",
        report.stage, report.items, report.succeeded, report.skipped, report.failed, report.outputs
    )
}

fn print_lines(lines: &[String]) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    for line in lines {
        writeln!(stdout, "{line}")?;
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    let mut stdout = io::stdout();
    stdout.write_all(json.as_bytes())?;
    stdout.write_all(b"\n")?;
    Ok(())
}
