use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use wheeltally_engine::numbers::{expected_percent, percent};
use wheeltally_engine::{Axis, Cell, Color, Outcome, TallyView};

/// Outcome of one offline batch run, ready for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ticks: u32,
    pub seed: Option<u64>,
    pub artifact: Option<PathBuf>,
    pub export_failures: u32,
    pub elapsed_ms: u64,
    pub tally: TallyView,
}

impl RunReport {
    #[must_use]
    pub fn new(
        ticks: u32,
        seed: Option<u64>,
        artifact: Option<PathBuf>,
        export_failures: u32,
        elapsed: Duration,
        tally: TallyView,
    ) -> Self {
        Self {
            ticks,
            seed,
            artifact,
            export_failures,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            tally,
        }
    }
}

fn axis_cells(axis: Axis) -> impl Iterator<Item = Cell> {
    Cell::ALL.into_iter().filter(move |cell| cell.axis() == axis)
}

fn axis_title(axis: Axis) -> &'static str {
    match axis {
        Axis::Parity => "Parity",
        Axis::Color => "Color",
        Axis::Range => "Half",
        Axis::Third => "Dozen",
        Axis::Column => "Column group",
    }
}

/// Pockets that hit most often, ties broken by the lower number.
fn hottest(view: &TallyView, limit: usize) -> Vec<(Outcome, u64)> {
    let mut counts: Vec<(Outcome, u64)> = Outcome::all()
        .map(|outcome| (outcome, view.straight(outcome)))
        .filter(|(_, hits)| *hits > 0)
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.number().cmp(&b.0.number())));
    counts.truncate(limit);
    counts
}

pub fn generate_console_report<W: Write + ?Sized>(out: &mut W, report: &RunReport) -> Result<()> {
    let view = &report.tally;
    writeln!(out)?;
    writeln!(out, "{}", "📊 Sampling Summary".bright_cyan().bold())?;
    writeln!(out, "{}", "===================".cyan())?;
    writeln!(out, "Spins: {}", view.total().to_string().bold())?;
    if let Some(seed) = report.seed {
        writeln!(out, "Seed: {seed}")?;
    }
    if let Some(path) = &report.artifact {
        writeln!(out, "Workbook: {}", path.display())?;
    }
    if report.export_failures > 0 {
        writeln!(
            out,
            "Export failures: {}",
            report.export_failures.to_string().red()
        )?;
    }
    writeln!(out, "Elapsed: {}ms", report.elapsed_ms)?;
    writeln!(out)?;

    for axis in Axis::ALL {
        writeln!(out, "{}", axis_title(axis).bright_yellow().bold())?;
        for cell in axis_cells(axis) {
            let count = view.count(cell);
            let share = percent(count, view.total());
            let label = match cell {
                Cell::Color(Color::Red) => cell.label().red(),
                Cell::Color(Color::Black) => cell.label().bright_black(),
                Cell::Color(Color::Green) => cell.label().green(),
                _ => cell.label().normal(),
            };
            writeln!(out, "   {label}: {count} ({share:.1}%)")?;
        }
    }

    writeln!(out)?;
    writeln!(
        out,
        "{} (expected {:.2}% each)",
        "🔥 Hottest pockets".bright_yellow().bold(),
        expected_percent(1)
    )?;
    for (outcome, hits) in hottest(view, 5) {
        writeln!(
            out,
            "   {:>2}: {hits:>6}  ({:5.2}%)",
            outcome.number(),
            percent(hits, view.total())
        )?;
    }
    Ok(())
}

pub fn generate_json_report<W: Write + ?Sized>(out: &mut W, report: &RunReport) -> Result<()> {
    let json_output = serde_json::to_string_pretty(report)?;
    writeln!(out, "{json_output}")?;
    Ok(())
}

pub fn generate_markdown_report<W: Write + ?Sized>(out: &mut W, report: &RunReport) -> Result<()> {
    let view = &report.tally;
    writeln!(out, "# Wheel Sampling Results\n")?;
    writeln!(out, "## Summary\n")?;
    writeln!(out, "- **Spins**: {}", view.total())?;
    writeln!(out, "- **Zeros**: {}", view.zeros())?;
    if let Some(seed) = report.seed {
        writeln!(out, "- **Seed**: {seed}")?;
    }
    if let Some(path) = &report.artifact {
        writeln!(out, "- **Workbook**: `{}`", path.display())?;
    }
    writeln!(out, "- **Export failures**: {}\n", report.export_failures)?;

    writeln!(out, "## Axis Counts\n")?;
    writeln!(out, "| Axis | Value | Count | Share |")?;
    writeln!(out, "|------|-------|------:|------:|")?;
    for axis in Axis::ALL {
        for cell in axis_cells(axis) {
            let count = view.count(cell);
            writeln!(
                out,
                "| {} | {} | {count} | {:.1}% |",
                axis_title(axis),
                cell.label(),
                percent(count, view.total())
            )?;
        }
    }

    let hot = hottest(view, 5);
    if !hot.is_empty() {
        writeln!(out, "\n## Hottest Pockets\n")?;
        for (outcome, hits) in hot {
            writeln!(out, "- **{}**: {hits}", outcome.number())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wheeltally_engine::{Tally, classify};

    fn sample_report() -> RunReport {
        let mut tally = Tally::new();
        for n in [17, 17, 0, 32, 5] {
            let outcome = Outcome::new(n).unwrap();
            tally.record(outcome, &classify(outcome));
        }
        RunReport::new(
            5,
            Some(7),
            Some(PathBuf::from("out/run.xlsx")),
            0,
            Duration::from_millis(12),
            tally.snapshot(),
        )
    }

    #[test]
    fn hottest_orders_by_hits_then_number() {
        let report = sample_report();
        let hot = hottest(&report.tally, 2);
        assert_eq!(hot[0], (Outcome::new(17).unwrap(), 2));
        assert_eq!(hot[1], (Outcome::ZERO, 1));
    }

    #[test]
    fn console_report_lists_every_axis() {
        colored::control::set_override(false);
        let mut buf = Vec::new();
        generate_console_report(&mut buf, &sample_report()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Spins: 5"));
        for title in ["Parity", "Color", "Half", "Dozen", "Column group"] {
            assert!(text.contains(title), "missing {title}");
        }
        assert!(text.contains("Seed: 7"));
    }

    #[test]
    fn console_report_states_single_pocket_share() {
        colored::control::set_override(false);
        let mut buf = Vec::new();
        generate_console_report(&mut buf, &sample_report()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(
            text.contains("Hottest pockets (expected 2.70% each)"),
            "{text}"
        );
        assert!(text.contains("   17:      2  (40.00%)"));
    }

    #[test]
    fn json_report_serializes_tally() {
        let mut buf = Vec::new();
        generate_json_report(&mut buf, &sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["ticks"], 5);
        assert_eq!(value["tally"]["total"], 5);
        assert_eq!(value["tally"]["history"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn markdown_report_has_table_rows() {
        let mut buf = Vec::new();
        generate_markdown_report(&mut buf, &sample_report()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("# Wheel Sampling Results"));
        assert!(text.contains("| Color | black | 2 | 40.0% |"));
        assert!(text.contains("- **17**: 2"));
    }
}
