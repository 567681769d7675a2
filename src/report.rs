use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mapper;
use crate::models::{ClassInsight, ClassRecord, ParsedAnalysis, ParsedStudent, Student};

/// Students the analysis flagged, most urgent first: by priority (unranked
/// last), then by lowest percentage.
pub fn students_needing_attention(analysis: &ParsedAnalysis) -> Vec<&ParsedStudent> {
    let mut flagged: Vec<&ParsedStudent> = analysis
        .students
        .iter()
        .filter(|s| s.priority.is_some() || matches!(s.percentage, Some(p) if p < 70))
        .collect();
    flagged.sort_by_key(|s| (s.priority.unwrap_or(u32::MAX), s.percentage.unwrap_or(u32::MAX)));
    flagged
}

pub fn build_report(
    class: &ClassRecord,
    analysis: &ParsedAnalysis,
    students: &[Student],
    insights: &[ClassInsight],
    generated_at: DateTime<Utc>,
) -> String {
    let summary = mapper::analysis_summary(analysis);
    let mut output = String::new();

    let _ = writeln!(output, "# Class Performance Report");
    let _ = writeln!(
        output,
        "Generated for {} on {}",
        class.name,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(title) = &analysis.title {
        let _ = writeln!(output);
        let _ = writeln!(output, "**{}**", title);
    }
    if let Some(description) = &analysis.description {
        let _ = writeln!(output);
        let _ = writeln!(output, "{}", description);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Students analyzed: {}", summary.total_analyzed);
    let _ = writeln!(
        output,
        "- Priority tiers: {} high, {} medium, {} low",
        summary.high_priority, summary.medium_priority, summary.low_priority
    );
    let _ = writeln!(output, "- Average score: {}%", summary.avg_score);
    let _ = writeln!(output, "- Struggling students: {}", summary.struggling_count);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");
    let flagged = students_needing_attention(analysis);
    if flagged.is_empty() {
        let _ = writeln!(output, "No students flagged in this analysis.");
    } else {
        for student in flagged {
            let priority = student
                .priority
                .map(|p| format!("priority {p}"))
                .unwrap_or_else(|| "unranked".to_string());
            let score = if student.score.is_empty() {
                "no score"
            } else {
                student.score.as_str()
            };
            let _ = writeln!(output, "### {} ({}, {})", student.name, priority, score);
            for area in &student.weak_areas {
                let _ = writeln!(output, "- Weak area: {}", area);
            }
            for item in &student.evidence {
                let _ = writeln!(output, "- Evidence: {}", item);
            }
            for pattern in &student.patterns {
                let _ = writeln!(output, "- Pattern: {}", pattern);
            }
        }
    }

    let mut ranked = insights.to_vec();
    ranked.sort_by_key(|insight| insight.avg_mastery);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Class Insights");
    if ranked.is_empty() {
        let _ = writeln!(output, "No topic-level insights for this analysis.");
    } else {
        for insight in &ranked {
            let _ = writeln!(
                output,
                "- {} → {} → {}: {}% mastery, {}/{} students affected",
                insight.subject,
                insight.unit,
                insight.topic,
                insight.avg_mastery,
                insight.students_affected,
                insight.total_students
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Roster");
    if students.is_empty() {
        let _ = writeln!(output, "No students enrolled in this class.");
    } else {
        for student in students {
            let _ = writeln!(
                output,
                "- {} ({}): {}% overall, {} risk, trend {}",
                student.name,
                student.email,
                student.overall_score,
                student.risk_level.as_str(),
                student.trend.as_str()
            );
        }
    }

    output
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    name: &'a str,
    email: &'a str,
    risk_level: &'a str,
    trend: &'a str,
    overall_score: u32,
    priority: Option<u32>,
    percentage: Option<u32>,
    score: &'a str,
    weak_areas: String,
    last_analyzed_at: Option<String>,
}

/// One CSV row per roster student, joined with the analysis block of the same
/// name when there is one.
pub fn write_students_csv<W: std::io::Write>(
    writer: W,
    students: &[Student],
    analysis: &ParsedAnalysis,
) -> anyhow::Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut written = 0usize;

    for student in students {
        let key = student.name.to_lowercase();
        let parsed = analysis
            .students
            .iter()
            .rev()
            .find(|p| p.name.to_lowercase() == key);

        csv_writer.serialize(ExportRow {
            name: &student.name,
            email: &student.email,
            risk_level: student.risk_level.as_str(),
            trend: student.trend.as_str(),
            overall_score: student.overall_score,
            priority: parsed.and_then(|p| p.priority),
            percentage: parsed.and_then(|p| p.percentage),
            score: parsed.map(|p| p.score.as_str()).unwrap_or(""),
            weak_areas: parsed.map(|p| p.weak_areas.join("; ")).unwrap_or_default(),
            last_analyzed_at: student.last_analyzed_at.map(|at| at.to_rfc3339()),
        })?;
        written += 1;
    }

    csv_writer.flush()?;
    Ok(written)
}
