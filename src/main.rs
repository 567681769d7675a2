use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

mod config;
mod db;
mod format;
mod inference;
mod mapper;
mod models;
mod parser;
mod report;
mod study_plan;
mod telemetry;

use crate::inference::{AnalyzeRequest, InferenceClient, TutorContext, TutorRequest};
use crate::models::{ClassInsight, ParsedAnalysis, Student, UploadCategory};
use crate::study_plan::{
    Pace, PlanUpload, StudentProfile, StudyPlan, StudyPlanRequest, StudyPlanSettings,
    StudyPriority, UpcomingAssessment,
};

#[derive(Parser)]
#[command(name = "classroom-insights")]
#[command(about = "AI-assisted class performance analysis for teachers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo classes and students
    Seed,
    /// Import students from a CSV roster (class_name,full_name,email[,grade,subject])
    ImportRoster {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Register a class material or piece of student work
    Upload {
        #[arg(long)]
        class: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_enum)]
        category: UploadCategory,
        #[arg(long, default_value = "teacher")]
        uploaded_by: String,
    },
    /// List uploads registered for a class
    Uploads {
        #[arg(long)]
        class: String,
    },
    /// Run an AI analysis for a class and update the roster
    Analyze {
        #[arg(long)]
        class: String,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Show per-student and per-topic insights from the latest analysis
    Insights {
        #[arg(long)]
        class: String,
    },
    /// Generate a markdown report from the latest analysis
    Report {
        #[arg(long)]
        class: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export roster and analysis fields as CSV
    Export {
        #[arg(long)]
        class: String,
        #[arg(long, default_value = "students.csv")]
        out: PathBuf,
    },
    /// Parse a saved analysis result (JSON or plain text) without a database
    Parse {
        #[arg(long)]
        file: PathBuf,
    },
    /// Ask the AI tutor a question
    Tutor {
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "")]
        topic: String,
        #[arg(long, default_value = "")]
        topic_path: String,
        #[arg(long, default_value = "")]
        student_name: String,
        #[arg(long, default_value = "")]
        grade: String,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long)]
        bilingual: bool,
    },
    /// Generate an AI study plan for a student from the latest class analysis
    StudyPlan {
        #[arg(long)]
        class: String,
        #[arg(long)]
        student: String,
        #[arg(long, default_value_t = 30)]
        minutes_per_day: u32,
        #[arg(long, default_value_t = 5)]
        days_per_week: u32,
        #[arg(long, value_enum, default_value_t = StudyPriority::Mastery)]
        priority: StudyPriority,
        #[arg(long, value_enum, default_value_t = Pace::Normal)]
        pace: Pace,
        #[arg(long)]
        target_date: Option<String>,
        #[arg(long = "goal")]
        goals: Vec<String>,
        /// Upcoming assessment as `name|date|topic, topic`; repeatable
        #[arg(long = "assessment")]
        assessments: Vec<UpcomingAssessment>,
        #[arg(long, default_value = "study-plan.json")]
        out: PathBuf,
    },
    /// Mark a task in a saved study plan as completed
    CompleteTask {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        task: String,
        #[arg(long)]
        reflection: Option<String>,
    },
}

/// Everything derived from one raw analysis result.
struct ClassAnalysis {
    parsed: ParsedAnalysis,
    students: Vec<Student>,
    insights: Vec<ClassInsight>,
}

impl ClassAnalysis {
    fn derive(raw: &Value, roster: &[Student], analyzed_at: DateTime<Utc>) -> Self {
        let text = format::format_analysis_result(raw);
        let parsed = parser::parse_analysis_text(&text);
        let students = mapper::map_analysis_to_students(&parsed, roster, analyzed_at);
        let insights = mapper::map_analysis_to_class_insights(&parsed, roster.len());
        Self {
            parsed,
            students,
            insights,
        }
    }
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = config::database_url()?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn latest_analysis(
    pool: &PgPool,
    class_name: &str,
) -> anyhow::Result<(models::ClassRecord, ClassAnalysis)> {
    let class = db::fetch_class(pool, class_name).await?;
    let roster = db::fetch_students(pool, class.id).await?;
    let run = db::latest_analysis_run(pool, class.id)
        .await?
        .with_context(|| format!("no analysis has been run for {class_name:?} yet"))?;
    info!(
        run_id = %run.id,
        class_id = %run.class_id,
        prompt = %run.prompt,
        created_at = %run.created_at,
        "loaded latest analysis run"
    );

    let analysis = ClassAnalysis::derive(&run.raw_result, &roster, run.created_at);
    Ok((class, analysis))
}

fn print_insights(analysis: &ClassAnalysis) {
    let summary = mapper::analysis_summary(&analysis.parsed);
    println!(
        "Analyzed {} students: {} high, {} medium, {} low priority; average score {}%; {} struggling.",
        summary.total_analyzed,
        summary.high_priority,
        summary.medium_priority,
        summary.low_priority,
        summary.avg_score,
        summary.struggling_count
    );

    if analysis.insights.is_empty() {
        println!("No class insights in this analysis.");
    } else {
        println!("Class insights:");
        for insight in &analysis.insights {
            println!(
                "- {} → {} → {}: {}% mastery ({}/{} students)",
                insight.subject,
                insight.unit,
                insight.topic,
                insight.avg_mastery,
                insight.students_affected,
                insight.total_students
            );
        }
    }

    println!("Students:");
    for student in &analysis.students {
        println!(
            "- {} ({}) {}% risk {} trend {}",
            student.name,
            student.email,
            student.overall_score,
            student.risk_level.as_str(),
            student.trend.as_str()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportRoster { csv } => {
            let pool = connect().await?;
            let imported = db::import_roster(&pool, &csv).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
        Commands::Upload {
            class,
            file,
            category,
            uploaded_by,
        } => {
            let pool = connect().await?;
            let class = db::fetch_class(&pool, &class).await?;
            let metadata = std::fs::metadata(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .with_context(|| format!("{} is not a file", file.display()))?;
            let size = i64::try_from(metadata.len()).unwrap_or(i64::MAX);

            let id =
                db::record_upload(&pool, class.id, category, &file_name, size, &uploaded_by)
                    .await?;
            println!(
                "Registered {} ({}, {}) as upload {id}.",
                file_name,
                category.kind().as_str(),
                category.as_str()
            );
        }
        Commands::Uploads { class } => {
            let pool = connect().await?;
            let class = db::fetch_class(&pool, &class).await?;
            let uploads = db::list_uploads(&pool, class.id).await?;

            if uploads.is_empty() {
                println!("No uploads for {}.", class.name);
                return Ok(());
            }
            for upload in uploads {
                println!(
                    "- {} [{} / {}] {} bytes, {} on {} by {}",
                    upload.file_name,
                    upload.kind,
                    upload.category,
                    upload.file_size_bytes,
                    upload.status,
                    upload.uploaded_at.format("%Y-%m-%d"),
                    upload.uploaded_by
                );
            }
        }
        Commands::Analyze {
            class,
            prompt,
            user_id,
        } => {
            let settings = config::InferenceSettings::from_env()?;
            let endpoint = settings.analyze_endpoint()?;
            let client = InferenceClient::new(settings.timeout)?;

            let pool = connect().await?;
            let class = db::fetch_class(&pool, &class).await?;
            let roster = db::fetch_students(&pool, class.id).await?;
            let uploads = db::list_uploads(&pool, class.id).await?;

            let request = AnalyzeRequest {
                prompt: prompt.clone(),
                user_id,
                class_id: class.id,
                student_ids: roster.iter().map(|s| s.id).collect(),
                upload_refs: uploads.iter().map(|u| u.file_name.clone()).collect(),
            };
            let raw = client
                .analyze(&endpoint, &request)
                .await
                .context("analysis request failed")?;

            let run_id =
                db::save_analysis_run(&pool, class.id, prompt.as_deref().unwrap_or(""), &raw)
                    .await?;
            let upload_ids: Vec<_> = uploads.iter().map(|u| u.id).collect();
            db::mark_uploads_analyzed(&pool, &upload_ids).await?;

            let analyzed_at = Utc::now();
            let analysis = ClassAnalysis::derive(&raw, &roster, analyzed_at);
            let changed: Vec<Student> = analysis
                .students
                .iter()
                .filter(|s| s.last_analyzed_at == Some(analyzed_at))
                .cloned()
                .collect();
            let updated = db::apply_student_updates(&pool, &changed).await?;
            info!(%run_id, parsed = analysis.parsed.students.len(), updated, "analysis applied");

            println!("Analysis {run_id} stored; {updated} students updated.");
            print_insights(&analysis);
        }
        Commands::Insights { class } => {
            let pool = connect().await?;
            let (_, analysis) = latest_analysis(&pool, &class).await?;
            print_insights(&analysis);
        }
        Commands::Report { class, out } => {
            let pool = connect().await?;
            let (class, analysis) = latest_analysis(&pool, &class).await?;
            let report = report::build_report(
                &class,
                &analysis.parsed,
                &analysis.students,
                &analysis.insights,
                Utc::now(),
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { class, out } => {
            let pool = connect().await?;
            let (_, analysis) = latest_analysis(&pool, &class).await?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("cannot create {}", out.display()))?;
            let written = report::write_students_csv(file, &analysis.students, &analysis.parsed)?;
            println!("Exported {written} students to {}.", out.display());
        }
        Commands::Parse { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let raw = serde_json::from_str::<Value>(&contents).unwrap_or(Value::String(contents));
            let text = format::format_analysis_result(&raw);
            let parsed = parser::parse_analysis_text(&text);
            let insights = mapper::map_analysis_to_class_insights(&parsed, parsed.students.len());
            let output = json!({
                "summary": mapper::analysis_summary(&parsed),
                "insights": insights,
                "analysis": parsed,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Tutor {
            message,
            topic,
            topic_path,
            student_name,
            grade,
            language,
            bilingual,
        } => {
            let settings = config::InferenceSettings::from_env()?;
            let endpoint = settings.tutor_endpoint()?;
            let client = InferenceClient::new(settings.timeout)?;

            let request = TutorRequest {
                message,
                conversation_history: Vec::new(),
                context: TutorContext {
                    topic,
                    topic_path,
                    student_name,
                    grade,
                    language,
                    bilingual_mode: bilingual,
                    ..TutorContext::default()
                },
            };
            let reply = client
                .tutor(&endpoint, &request)
                .await
                .context("tutor request failed")?;

            println!("{}", reply.content);
            if let Some(question) = &reply.practice_question {
                println!();
                println!("Practice: {}", question.question);
                if let Some(options) = &question.options {
                    for option in options {
                        println!("  - {option}");
                    }
                }
            }
            if let Some(replies) = &reply.quick_replies {
                println!();
                println!("Suggested replies: {}", replies.join(" | "));
            }
        }
        Commands::StudyPlan {
            class,
            student,
            minutes_per_day,
            days_per_week,
            priority,
            pace,
            target_date,
            goals,
            assessments,
            out,
        } => {
            let settings = config::InferenceSettings::from_env()?;
            let target = settings.study_plan_endpoint()?;
            let client = InferenceClient::new(settings.timeout)?;

            let pool = connect().await?;
            let (class, analysis) = latest_analysis(&pool, &class).await?;
            let key = student.to_lowercase();
            let parsed = analysis
                .parsed
                .students
                .iter()
                .rev()
                .find(|s| s.name.to_lowercase() == key)
                .with_context(|| {
                    format!("{student:?} is not in the latest analysis for {}", class.name)
                })?;
            let student_id = analysis
                .students
                .iter()
                .find(|s| s.name.to_lowercase() == key)
                .map(|s| s.id.to_string())
                .unwrap_or_default();
            let uploads = db::list_uploads(&pool, class.id).await?;

            let gaps = study_plan::gaps_for_student(parsed);
            if gaps.is_empty() {
                warn!(student = %parsed.name, "no weak areas recorded; the plan will be generic");
            }
            let request = StudyPlanRequest {
                gaps,
                settings: StudyPlanSettings {
                    minutes_per_day,
                    days_per_week,
                    target_date,
                    priority,
                    difficulty: pace,
                },
                profile: StudentProfile {
                    name: parsed.name.clone(),
                    grade: class.grade.clone(),
                    goals,
                },
                uploads: uploads.iter().map(PlanUpload::from).collect(),
                assessments,
            };
            let plan = client
                .study_plan(&target, &request, &student_id, Utc::now())
                .await
                .context("study plan request failed")?;

            std::fs::write(&out, serde_json::to_string_pretty(&plan)?)
                .with_context(|| format!("cannot write {}", out.display()))?;
            let (_, tasks) = plan.progress();
            println!(
                "Study plan {} for {}: {} weeks, {tasks} tasks, written to {}.",
                plan.id,
                parsed.name,
                plan.weeks.len(),
                out.display()
            );
        }
        Commands::CompleteTask {
            plan,
            task,
            reflection,
        } => {
            let contents = std::fs::read_to_string(&plan)
                .with_context(|| format!("cannot read {}", plan.display()))?;
            let mut saved: StudyPlan = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a study plan", plan.display()))?;
            if !saved.complete_task(&task, reflection, Utc::now()) {
                anyhow::bail!("no task {task:?} in {}", plan.display());
            }
            std::fs::write(&plan, serde_json::to_string_pretty(&saved)?)
                .with_context(|| format!("cannot write {}", plan.display()))?;

            let (completed, total) = saved.progress();
            println!("Task {task} completed; {completed}/{total} tasks done.");
        }
    }

    Ok(())
}
