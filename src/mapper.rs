use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{
    AnalysisSummary, ClassInsight, ParsedAnalysis, ParsedStudent, RiskLevel, Student, Trend,
};

/// Assumed mastery for a student whose score could not be read.
pub(crate) const DEFAULT_MASTERY: u32 = 50;

pub fn risk_level(percentage: Option<u32>, priority: Option<u32>) -> RiskLevel {
    match (percentage, priority) {
        (Some(0..=49), _) => RiskLevel::High,
        (Some(50..=69), _) => RiskLevel::Medium,
        (Some(_), _) => RiskLevel::Low,
        (None, Some(1)) => RiskLevel::High,
        (None, Some(2)) => RiskLevel::Medium,
        (None, _) => RiskLevel::Low,
    }
}

pub fn trend(percentage: Option<u32>) -> Trend {
    match percentage {
        Some(0..=59) => Trend::Down,
        Some(80..) => Trend::Up,
        _ => Trend::Stable,
    }
}

/// Overwrite risk, trend and score on roster entries named in the analysis.
///
/// Names match case-insensitively; when the analysis repeats a name the last
/// block wins. Unmatched students come back untouched.
pub fn map_analysis_to_students(
    analysis: &ParsedAnalysis,
    students: &[Student],
    analyzed_at: DateTime<Utc>,
) -> Vec<Student> {
    if analysis.students.is_empty() {
        return students.to_vec();
    }

    let by_name: HashMap<String, &ParsedStudent> = analysis
        .students
        .iter()
        .map(|parsed| (parsed.name.to_lowercase(), parsed))
        .collect();

    students
        .iter()
        .map(|student| match by_name.get(&student.name.to_lowercase()) {
            Some(parsed) => Student {
                risk_level: risk_level(parsed.percentage, parsed.priority),
                overall_score: parsed.percentage.unwrap_or(student.overall_score),
                trend: trend(parsed.percentage),
                last_analyzed_at: Some(analyzed_at),
                ..student.clone()
            },
            None => student.clone(),
        })
        .collect()
}

struct TopicGroup<'a> {
    subject: String,
    unit: String,
    topic: String,
    students: Vec<&'a ParsedStudent>,
}

/// Split `subject → unit → topic` into its parts. A two-part path uses the
/// topic as its unit; a path without an arrow has no hierarchy.
pub(crate) fn split_topic_path(area: &str) -> Option<(&str, &str, &str)> {
    let parts: Vec<&str> = area.split('→').map(str::trim).collect();
    if parts.len() < 2 {
        return None;
    }
    let subject = parts[0];
    let topic = parts[parts.len() - 1];
    let unit = if parts.len() > 2 { parts[1] } else { topic };
    Some((subject, unit, topic))
}

/// A percentage counts at most 100 toward any mean.
pub(crate) fn capped(percentage: u32) -> u64 {
    u64::from(percentage.min(100))
}

fn mean_mastery(students: &[&ParsedStudent]) -> u32 {
    if students.is_empty() {
        return 0;
    }
    let total: u64 = students
        .iter()
        .map(|student| capped(student.percentage.unwrap_or(DEFAULT_MASTERY)))
        .sum();
    (total as f64 / students.len() as f64).round() as u32
}

/// Group weak areas by `subject → unit → topic` into class-wide insights.
pub fn map_analysis_to_class_insights(
    analysis: &ParsedAnalysis,
    total_students: usize,
) -> Vec<ClassInsight> {
    let mut groups: Vec<TopicGroup<'_>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for student in &analysis.students {
        for area in &student.weak_areas {
            let Some((subject, unit, topic)) = split_topic_path(area) else {
                continue;
            };

            let key = format!("{subject}::{unit}::{topic}");
            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(TopicGroup {
                    subject: subject.to_string(),
                    unit: unit.to_string(),
                    topic: topic.to_string(),
                    students: Vec::new(),
                });
                groups.len() - 1
            });

            let group = &mut groups[slot];
            if !group.students.iter().any(|s| s.name == student.name) {
                group.students.push(student);
            }
        }
    }

    let mut insights: Vec<ClassInsight> = groups
        .into_iter()
        .map(|group| ClassInsight {
            avg_mastery: mean_mastery(&group.students),
            students_affected: group.students.len(),
            topic: group.topic,
            unit: group.unit,
            subject: group.subject,
            total_students,
        })
        .collect();

    if insights.is_empty() {
        let low_scoring: Vec<&ParsedStudent> = analysis
            .students
            .iter()
            .filter(|student| matches!(student.percentage, Some(p) if p < 70))
            .collect();

        if !low_scoring.is_empty() {
            insights.push(ClassInsight {
                topic: "Overall Performance".to_string(),
                unit: "General".to_string(),
                subject: "All Subjects".to_string(),
                avg_mastery: mean_mastery(&low_scoring),
                students_affected: low_scoring.len(),
                total_students,
            });
        }
    }

    insights
}

pub fn analysis_summary(analysis: &ParsedAnalysis) -> AnalysisSummary {
    let students = &analysis.students;
    let mut summary = AnalysisSummary {
        total_analyzed: students.len(),
        ..AnalysisSummary::default()
    };

    let mut score_total = 0u64;
    for student in students {
        match student.priority {
            Some(1) => summary.high_priority += 1,
            Some(2) => summary.medium_priority += 1,
            _ => summary.low_priority += 1,
        }
        score_total += capped(student.percentage.unwrap_or(0));

        let low_score = matches!(student.percentage, Some(p) if p < 70);
        if low_score || student.priority.is_some() {
            summary.struggling_count += 1;
        }
    }

    if !students.is_empty() {
        summary.avg_score = (score_total as f64 / students.len() as f64).round() as u32;
    }

    summary
}
