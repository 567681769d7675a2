use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AnalysisRun, ClassRecord, RiskLevel, Student, Trend, UploadCategory, UploadRecord,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_class(
    pool: &PgPool,
    name: &str,
    grade: &str,
    subject: &str,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO classroom_insights.classes AS c (id, name, grade, subject)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE
        SET grade = CASE WHEN EXCLUDED.grade = '' THEN c.grade ELSE EXCLUDED.grade END,
            subject = CASE WHEN EXCLUDED.subject = '' THEN c.subject ELSE EXCLUDED.subject END
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(grade)
    .bind(subject)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(id)
}

async fn upsert_student(
    pool: &PgPool,
    class_id: Uuid,
    full_name: &str,
    email: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO classroom_insights.students (id, class_id, full_name, email)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name, class_id = EXCLUDED.class_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(class_id)
    .bind(full_name)
    .bind(email)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let classes = [
        ("Period 2 – 7th Grade Math", "7th", "Math"),
        ("Period 3 – 7th Grade Math", "7th", "Math"),
        ("Period 5 – 8th Grade Math", "8th", "Math"),
    ];

    let mut first_class = None;
    for (name, grade, subject) in classes {
        let id = upsert_class(pool, name, grade, subject).await?;
        first_class.get_or_insert(id);
    }
    let class_id = first_class.context("no seed classes defined")?;

    let students = [
        ("Emma Thompson", "emma.t@school.edu", "low", 92, "up", (2026, 1, 14)),
        ("James Wilson", "james.w@school.edu", "medium", 74, "down", (2026, 1, 13)),
        ("Sofia Garcia", "sofia.g@school.edu", "low", 88, "stable", (2026, 1, 14)),
        ("Liam Chen", "liam.c@school.edu", "high", 58, "down", (2026, 1, 10)),
        ("Olivia Brown", "olivia.b@school.edu", "low", 95, "up", (2026, 1, 14)),
        ("Noah Martinez", "noah.m@school.edu", "medium", 71, "stable", (2026, 1, 12)),
        ("Ava Johnson", "ava.j@school.edu", "high", 52, "down", (2026, 1, 8)),
        ("Ethan Davis", "ethan.d@school.edu", "low", 85, "up", (2026, 1, 14)),
    ];

    for (name, email, risk, score, trend, (y, m, d)) in students {
        let last_submission = Utc
            .with_ymd_and_hms(y, m, d, 15, 0, 0)
            .single()
            .context("invalid date")?;

        sqlx::query(
            r#"
            INSERT INTO classroom_insights.students
            (id, class_id, full_name, email, risk_level, overall_score, trend, last_submission)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, class_id = EXCLUDED.class_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(class_id)
        .bind(name)
        .bind(email)
        .bind(risk)
        .bind(score)
        .bind(trend)
        .bind(last_submission)
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RosterRow {
    pub class_name: String,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

pub fn read_roster(csv_path: &Path) -> anyhow::Result<Vec<RosterRow>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut rows = Vec::new();

    for (line, result) in reader.deserialize::<RosterRow>().enumerate() {
        let row = result.with_context(|| format!("invalid roster row {}", line + 1))?;
        if row.full_name.trim().is_empty() || row.email.trim().is_empty() {
            anyhow::bail!("roster row {} is missing a name or email", line + 1);
        }
        rows.push(RosterRow {
            class_name: row.class_name.trim().to_string(),
            full_name: row.full_name.trim().to_string(),
            email: row.email.trim().to_lowercase(),
            grade: row.grade,
            subject: row.subject,
        });
    }

    Ok(rows)
}

pub async fn import_roster(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let rows = read_roster(csv_path)?;
    let mut imported = 0usize;

    for row in rows {
        let class_id = upsert_class(
            pool,
            &row.class_name,
            row.grade.as_deref().unwrap_or(""),
            row.subject.as_deref().unwrap_or(""),
        )
        .await?;

        if upsert_student(pool, class_id, &row.full_name, &row.email).await? {
            imported += 1;
        }
    }

    Ok(imported)
}

pub async fn fetch_class(pool: &PgPool, name: &str) -> anyhow::Result<ClassRecord> {
    let row = sqlx::query(
        "SELECT id, name, grade, subject FROM classroom_insights.classes WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("class {name:?} not found; run seed or import-roster first"))?;

    Ok(ClassRecord {
        id: row.get("id"),
        name: row.get("name"),
        grade: row.get("grade"),
        subject: row.get("subject"),
    })
}

pub async fn fetch_students(pool: &PgPool, class_id: Uuid) -> anyhow::Result<Vec<Student>> {
    let rows = sqlx::query(
        r#"
        SELECT id, full_name, email, risk_level, overall_score, trend,
               last_analyzed_at, last_submission
        FROM classroom_insights.students
        WHERE class_id = $1
        ORDER BY full_name
        "#,
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;

    let mut students = Vec::new();
    for row in rows {
        let risk: String = row.get("risk_level");
        let trend: String = row.get("trend");
        let score: i32 = row.get("overall_score");
        students.push(Student {
            id: row.get("id"),
            name: row.get("full_name"),
            email: row.get("email"),
            risk_level: RiskLevel::from_db(&risk),
            last_analyzed_at: row.get("last_analyzed_at"),
            last_submission: row.get("last_submission"),
            overall_score: u32::try_from(score).unwrap_or(0),
            trend: Trend::from_db(&trend),
        });
    }

    Ok(students)
}

/// Persist the analysis-derived fields of the given students.
pub async fn apply_student_updates(pool: &PgPool, students: &[Student]) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;
    let mut updated = 0usize;

    for student in students {
        let result = sqlx::query(
            r#"
            UPDATE classroom_insights.students
            SET risk_level = $2, overall_score = $3, trend = $4, last_analyzed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(student.id)
        .bind(student.risk_level.as_str())
        .bind(i32::try_from(student.overall_score).unwrap_or(i32::MAX))
        .bind(student.trend.as_str())
        .bind(student.last_analyzed_at)
        .execute(&mut *tx)
        .await?;
        updated += result.rows_affected() as usize;
    }

    tx.commit().await?;
    Ok(updated)
}

pub async fn record_upload(
    pool: &PgPool,
    class_id: Uuid,
    category: UploadCategory,
    file_name: &str,
    file_size_bytes: i64,
    uploaded_by: &str,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO classroom_insights.uploads
        (id, class_id, kind, category, file_name, file_size_bytes, status, uploaded_by)
        VALUES ($1, $2, $3, $4, $5, $6, 'uploaded', $7)
        "#,
    )
    .bind(id)
    .bind(class_id)
    .bind(category.kind().as_str())
    .bind(category.as_str())
    .bind(file_name)
    .bind(file_size_bytes)
    .bind(uploaded_by)
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn list_uploads(pool: &PgPool, class_id: Uuid) -> anyhow::Result<Vec<UploadRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, class_id, kind, category, file_name, file_size_bytes, status,
               uploaded_at, uploaded_by
        FROM classroom_insights.uploads
        WHERE class_id = $1
        ORDER BY uploaded_at DESC
        "#,
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| UploadRecord {
            id: row.get("id"),
            class_id: row.get("class_id"),
            kind: row.get("kind"),
            category: row.get("category"),
            file_name: row.get("file_name"),
            file_size_bytes: row.get("file_size_bytes"),
            status: row.get("status"),
            uploaded_at: row.get("uploaded_at"),
            uploaded_by: row.get("uploaded_by"),
        })
        .collect())
}

pub async fn mark_uploads_analyzed(pool: &PgPool, upload_ids: &[Uuid]) -> anyhow::Result<()> {
    if upload_ids.is_empty() {
        return Ok(());
    }
    sqlx::query("UPDATE classroom_insights.uploads SET status = 'analyzed' WHERE id = ANY($1)")
        .bind(upload_ids)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn save_analysis_run(
    pool: &PgPool,
    class_id: Uuid,
    prompt: &str,
    raw_result: &serde_json::Value,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO classroom_insights.analysis_runs (id, class_id, prompt, raw_result)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(id)
    .bind(class_id)
    .bind(prompt)
    .bind(raw_result)
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn latest_analysis_run(
    pool: &PgPool,
    class_id: Uuid,
) -> anyhow::Result<Option<AnalysisRun>> {
    let row = sqlx::query(
        r#"
        SELECT id, class_id, prompt, raw_result, created_at
        FROM classroom_insights.analysis_runs
        WHERE class_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(class_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let created_at: DateTime<Utc> = row.get("created_at");
        AnalysisRun {
            id: row.get("id"),
            class_id: row.get("class_id"),
            prompt: row.get("prompt"),
            raw_result: row.get("raw_result"),
            created_at,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn roster_rows_are_trimmed_and_normalised() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "class_name,full_name,email,grade,subject").unwrap();
        writeln!(file, "Period 2, Liam Chen ,Liam.C@School.edu,7th,Math").unwrap();
        writeln!(file, "Period 2,Ava Johnson,ava.j@school.edu,,").unwrap();
        file.flush().unwrap();

        let rows = read_roster(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].class_name, "Period 2");
        assert_eq!(rows[0].full_name, "Liam Chen");
        assert_eq!(rows[0].email, "liam.c@school.edu");
        assert_eq!(rows[0].grade.as_deref(), Some("7th"));
        assert_eq!(rows[1].full_name, "Ava Johnson");
    }

    #[test]
    fn roster_without_optional_columns_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "class_name,full_name,email").unwrap();
        writeln!(file, "Period 3,Noah Martinez,noah.m@school.edu").unwrap();
        file.flush().unwrap();

        let rows = read_roster(file.path()).unwrap();
        assert_eq!(rows[0].grade, None);
        assert_eq!(rows[0].subject, None);
    }

    #[test]
    fn roster_rejects_missing_email() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "class_name,full_name,email").unwrap();
        writeln!(file, "Period 3,Noah Martinez,").unwrap();
        file.flush().unwrap();

        assert!(read_roster(file.path()).is_err());
    }
}
