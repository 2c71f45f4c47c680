use std::path::Path;
use std::time::Duration;

use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ColumnConstraint, ContentArrangement, Table, Width,
};

use geoval_core::BatchReport;
use geoval_model::{Finding, Severity, StageKind, StageResult, StageStatus, ValidationResult};

/// Findings beyond this many rows are counted but not printed.
pub const MAX_FINDING_ROWS: usize = 200;

pub fn print_summary(report: &BatchReport) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Target"),
        header_cell("Stage"),
        header_cell("Status"),
        header_cell("Units"),
        header_cell("Errors"),
        header_cell("Warnings"),
        header_cell("Time"),
    ]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 3, CellAlignment::Right);
    align_column(&mut table, 4, CellAlignment::Right);
    align_column(&mut table, 5, CellAlignment::Right);
    align_column(&mut table, 6, CellAlignment::Right);

    let mut total_errors = 0usize;
    let mut total_warnings = 0usize;
    for result in &report.results {
        let name = target_name(&result.target_file);
        for (position, stage) in result.stages.iter().enumerate() {
            let errors = stage.error_count();
            let warnings = stage.warning_count();
            total_errors += errors;
            total_warnings += warnings;
            let target_cell = if position == 0 {
                Cell::new(&name)
                    .fg(Color::Blue)
                    .add_attribute(Attribute::Bold)
            } else {
                dim_cell("")
            };
            table.add_row(vec![
                target_cell,
                Cell::new(stage.stage.display_name()),
                status_cell(stage.status),
                units_cell(stage),
                count_cell(errors, Color::Red),
                count_cell(warnings, Color::Yellow),
                dim_cell(format_duration(stage.elapsed)),
            ]);
        }
    }
    table.add_row(vec![
        Cell::new("TOTAL")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        Cell::new(format!("{} target(s)", report.results.len()))
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        overall_cell(report),
        dim_cell("-"),
        count_cell(total_errors, Color::Red).add_attribute(Attribute::Bold),
        count_cell(total_warnings, Color::Yellow).add_attribute(Attribute::Bold),
        dim_cell(format_duration(
            report.results.iter().map(|result| result.processing_time).sum(),
        )),
    ]);
    println!("{table}");
    print_finding_table(&report.results);
    if !report.failures.is_empty() {
        eprintln!("Failed targets:");
        for failure in &report.failures {
            eprintln!("- {}: {}", failure.target.display(), failure.error);
        }
    }
}

fn print_finding_table(results: &[ValidationResult]) {
    let findings = ordered_findings(results);
    if findings.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Target"),
        header_cell("Severity"),
        header_cell("Stage"),
        header_cell("Rule"),
        header_cell("Table"),
        header_cell("Features"),
        header_cell("Message"),
    ]);
    apply_finding_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Center);
    align_column(&mut table, 2, CellAlignment::Center);
    for (target, finding) in findings.iter().take(MAX_FINDING_ROWS) {
        table.add_row(vec![
            Cell::new(target),
            severity_cell(finding.severity),
            Cell::new(finding.stage.number()),
            Cell::new(&finding.rule),
            Cell::new(&finding.table),
            features_cell(&finding.feature_ids),
            Cell::new(&finding.message),
        ]);
    }
    println!();
    println!("Findings:");
    println!("{table}");
    if findings.len() > MAX_FINDING_ROWS {
        println!(
            "... {} more finding(s), see the JSON report",
            findings.len() - MAX_FINDING_ROWS
        );
    }
}

pub fn print_stage_catalog() {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("#"),
        header_cell("Id"),
        header_cell("Stage"),
    ]);
    apply_table_style(&mut table);
    for stage in StageKind::ALL {
        table.add_row(vec![
            Cell::new(stage.number()),
            Cell::new(stage.id()),
            Cell::new(stage.display_name()),
        ]);
    }
    println!("{table}");
}

/// Errors first, then target order, stage order and rule name.
pub fn ordered_findings(results: &[ValidationResult]) -> Vec<(String, Finding)> {
    let mut findings: Vec<(usize, String, Finding)> = results
        .iter()
        .enumerate()
        .flat_map(|(index, result)| {
            let name = target_name(&result.target_file);
            result
                .findings()
                .map(move |issue| (index, name.clone(), Finding::from(issue)))
        })
        .collect();
    findings.sort_by(|a, b| {
        a.2.severity
            .cmp(&b.2.severity)
            .then(a.0.cmp(&b.0))
            .then(a.2.stage.cmp(&b.2.stage))
            .then_with(|| a.2.rule.cmp(&b.2.rule))
    });
    findings
        .into_iter()
        .map(|(_, name, finding)| (name, finding))
        .collect()
}

pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total >= 3600 {
        format!("{}h{:02}m{:02}s", total / 3600, total % 3600 / 60, total % 60)
    } else if total >= 60 {
        format!("{}m{:02}s", total / 60, total % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

fn target_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(80);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(140);
    if table.column_count() >= 7 {
        table.set_constraints(vec![
            ColumnConstraint::UpperBoundary(Width::Percentage(30)),
            ColumnConstraint::LowerBoundary(Width::Fixed(16)),
            ColumnConstraint::LowerBoundary(Width::Fixed(10)),
            ColumnConstraint::LowerBoundary(Width::Fixed(9)),
            ColumnConstraint::LowerBoundary(Width::Fixed(7)),
            ColumnConstraint::LowerBoundary(Width::Fixed(9)),
            ColumnConstraint::LowerBoundary(Width::Fixed(7)),
        ]);
    }
}

fn apply_finding_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(200);
    if table.column_count() >= 7 {
        table.set_constraints(vec![
            ColumnConstraint::UpperBoundary(Width::Fixed(20)),
            ColumnConstraint::UpperBoundary(Width::Fixed(9)),
            ColumnConstraint::UpperBoundary(Width::Fixed(7)),
            ColumnConstraint::UpperBoundary(Width::Fixed(24)),
            ColumnConstraint::UpperBoundary(Width::Fixed(16)),
            ColumnConstraint::UpperBoundary(Width::Percentage(20)),
            ColumnConstraint::UpperBoundary(Width::Percentage(45)),
        ]);
    }
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn status_cell(status: StageStatus) -> Cell {
    let cell = Cell::new(status.label());
    match status {
        StageStatus::Completed => cell.fg(Color::Green),
        StageStatus::CompletedWithWarnings => cell.fg(Color::Yellow),
        StageStatus::Failed => cell.fg(Color::Red).add_attribute(Attribute::Bold),
        StageStatus::Active => cell.fg(Color::Magenta),
        StageStatus::NotStarted | StageStatus::Pending | StageStatus::Skipped => {
            cell.fg(Color::DarkGrey)
        }
    }
}

fn overall_cell(report: &BatchReport) -> Cell {
    if report.cancelled {
        Cell::new("Cancelled")
            .fg(Color::Yellow)
            .add_attribute(Attribute::Bold)
    } else if report.is_valid() {
        Cell::new("Valid")
            .fg(Color::Green)
            .add_attribute(Attribute::Bold)
    } else {
        Cell::new("Invalid")
            .fg(Color::Red)
            .add_attribute(Attribute::Bold)
    }
}

fn units_cell(stage: &StageResult) -> Cell {
    if stage.total_units == 0 {
        dim_cell("-")
    } else {
        Cell::new(format!("{}/{}", stage.processed_units, stage.total_units))
    }
}

fn count_cell(count: usize, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(count)
    }
}

fn severity_cell(severity: Severity) -> Cell {
    match severity {
        Severity::Error => Cell::new("ERROR").fg(Color::Red),
        Severity::Warning => Cell::new("WARN").fg(Color::Yellow),
    }
}

fn features_cell(ids: &[String]) -> Cell {
    if ids.is_empty() {
        dim_cell("-")
    } else {
        Cell::new(ids.join(", "))
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
