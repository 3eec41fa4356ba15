//! Rendering run reports for stdout.

use std::fmt::Write as _;

use opp_common::OutputFormat;

use crate::engine::RunReport;

/// Render `report` in `format`. Always ends with a newline.
pub fn render_report(report: &RunReport, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(report)?;
            out.push('\n');
            Ok(out)
        }
        OutputFormat::Jsonl => {
            let mut out = String::new();
            for opp in &report.opportunities {
                out.push_str(&serde_json::to_string(opp)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Md => Ok(render_markdown(report)),
        OutputFormat::Summary => Ok(format!("{}\n", summary_line(report))),
    }
}

/// One line: counts by priority plus run health.
pub fn summary_line(report: &RunReport) -> String {
    use crate::scorer::Priority;

    let count = |p: Priority| {
        report
            .opportunities
            .iter()
            .filter(|o| o.priority == p)
            .count()
    };
    let mut line = format!(
        "{} opportunities (high {}, medium {}, low {}) from {} evaluations; {} declined, {} skipped, {} deduplicated",
        report.opportunities.len(),
        count(Priority::High),
        count(Priority::Medium),
        count(Priority::Low),
        report.evaluated,
        report.declined_total(),
        report.skipped_total(),
        report.deduplicated,
    );
    if report.cancelled {
        let _ = write!(
            line,
            "; cancelled after {}/{} batches",
            report.batches_completed, report.batches_total
        );
    }
    line
}

fn render_markdown(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Opportunities {} to {}\n",
        report.period.start, report.period.end
    );
    let _ = writeln!(out, "{}\n", summary_line(report));

    if report.opportunities.is_empty() {
        out.push_str("_No opportunities detected._\n");
        return out;
    }

    out.push_str("| Priority | Entity | Rule | Category | Urgency | Impact | Confidence |\n");
    out.push_str("|---|---|---|---|---:|---:|---:|\n");
    for opp in &report.opportunities {
        let _ = writeln!(
            out,
            "| {} | {} ({}) | {} | {} | {:.1} | {:.1} | {:.2} |",
            opp.priority,
            escape(opp.entity_id.as_str()),
            opp.entity_type,
            escape(opp.rule_id.as_str()),
            escape(&opp.category),
            opp.urgency_score,
            opp.potential_impact_score,
            opp.confidence_score,
        );
    }

    let with_actions: Vec<_> = report
        .opportunities
        .iter()
        .filter(|o| !o.recommended_actions.is_empty())
        .collect();
    if !with_actions.is_empty() {
        out.push_str("\n## Recommended actions\n");
        for opp in with_actions {
            let _ = writeln!(out, "\n**{}** on `{}`", opp.title, opp.entity_id);
            for action in &opp.recommended_actions {
                let _ = writeln!(out, "- {}", action);
            }
        }
    }
    out
}

fn escape(cell: &str) -> String {
    cell.replace('|', "\\|")
}
