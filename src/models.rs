use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    /// Unknown values read back from storage are treated as low risk.
    pub fn from_db(value: &str) -> Self {
        match value {
            "high" => RiskLevel::High,
            "medium" => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "up" => Trend::Up,
            "down" => Trend::Down,
            _ => Trend::Stable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub risk_level: RiskLevel,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub last_submission: Option<DateTime<Utc>>,
    pub overall_score: u32,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub id: Uuid,
    pub name: String,
    pub grade: String,
    pub subject: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub class_id: Uuid,
    pub kind: String,
    pub category: String,
    pub file_name: String,
    pub file_size_bytes: i64,
    pub status: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub class_id: Uuid,
    pub prompt: String,
    pub raw_result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One student's block recovered from analysis prose.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedStudent {
    pub name: String,
    pub priority: Option<u32>,
    pub score: String,
    pub score_value: Option<u32>,
    pub score_total: Option<u32>,
    pub percentage: Option<u32>,
    pub weak_areas: Vec<String>,
    pub evidence: Vec<String>,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedAnalysis {
    pub title: Option<String>,
    pub description: Option<String>,
    pub students: Vec<ParsedStudent>,
    pub raw_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInsight {
    pub topic: String,
    pub unit: String,
    pub subject: String,
    pub avg_mastery: u32,
    pub students_affected: usize,
    pub total_students: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub total_analyzed: usize,
    pub high_priority: usize,
    pub medium_priority: usize,
    pub low_priority: usize,
    pub avg_score: u32,
    pub struggling_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Material,
    StudentWork,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Material => "material",
            UploadKind::StudentWork => "student_work",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UploadCategory {
    Textbook,
    LessonPlan,
    LectureNotes,
    Homework,
    Quiz,
    Test,
    Classwork,
    StudyGuide,
    PracticeWorksheet,
    WrongAnswers,
}

impl UploadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadCategory::Textbook => "textbook",
            UploadCategory::LessonPlan => "lesson_plan",
            UploadCategory::LectureNotes => "lecture_notes",
            UploadCategory::Homework => "homework",
            UploadCategory::Quiz => "quiz",
            UploadCategory::Test => "test",
            UploadCategory::Classwork => "classwork",
            UploadCategory::StudyGuide => "study_guide",
            UploadCategory::PracticeWorksheet => "practice_worksheet",
            UploadCategory::WrongAnswers => "wrong_answers",
        }
    }

    pub fn kind(&self) -> UploadKind {
        match self {
            UploadCategory::Textbook
            | UploadCategory::LessonPlan
            | UploadCategory::LectureNotes => UploadKind::Material,
            _ => UploadKind::StudentWork,
        }
    }
}
