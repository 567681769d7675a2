use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mapper::{self, capped, split_topic_path, DEFAULT_MASTERY};
use crate::models::{ParsedStudent, RiskLevel, UploadRecord};

static RE_JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("static regex"));

const PLAN_WEEKS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StudyPriority {
    Grades,
    Mastery,
    UpcomingTest,
}

impl StudyPriority {
    fn goal(&self) -> &'static str {
        match self {
            StudyPriority::Grades => "Improve grades quickly",
            StudyPriority::Mastery => "Deep understanding",
            StudyPriority::UpcomingTest => "Prepare for upcoming test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Gentle,
    Normal,
    Intensive,
}

impl Pace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pace::Gentle => "gentle",
            Pace::Normal => "normal",
            Pace::Intensive => "intensive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlanSettings {
    pub minutes_per_day: u32,
    pub days_per_week: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    pub priority: StudyPriority,
    pub difficulty: Pace,
}

/// One weak topic a plan should work on.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyGap {
    pub subject: String,
    pub unit: String,
    pub topic: String,
    pub topic_path: String,
    pub mastery_estimate: u32,
    pub risk_level: RiskLevel,
    pub common_misconceptions: Vec<String>,
    pub recommended_next_steps: Vec<String>,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentProfile {
    pub name: String,
    pub grade: String,
    pub goals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanUpload {
    pub file_name: String,
    pub category: String,
    pub analyzed: bool,
}

impl From<&UploadRecord> for PlanUpload {
    fn from(upload: &UploadRecord) -> Self {
        Self {
            file_name: upload.file_name.clone(),
            category: upload.category.clone(),
            analyzed: upload.status == "analyzed",
        }
    }
}

/// An upcoming assessment, written on the command line as
/// `name|date|topic, topic`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpcomingAssessment {
    pub name: String,
    pub date: String,
    pub topics: Vec<String>,
}

impl FromStr for UpcomingAssessment {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut fields = raw.splitn(3, '|').map(str::trim);
        let name = fields.next().unwrap_or_default();
        let date = fields.next().unwrap_or_default();
        if name.is_empty() || date.is_empty() {
            return Err(format!("expected `name|date|topics`, got {raw:?}"));
        }
        let topics = fields
            .next()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            name: name.to_string(),
            date: date.to_string(),
            topics,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StudyPlanRequest {
    pub gaps: Vec<StudyGap>,
    pub settings: StudyPlanSettings,
    pub profile: StudentProfile,
    pub uploads: Vec<PlanUpload>,
    pub assessments: Vec<UpcomingAssessment>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub estimated_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanQuestion {
    #[serde(default)]
    pub id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyTask {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub topic_path: String,
    #[serde(default)]
    pub micro_goal: String,
    #[serde(default)]
    pub estimated_minutes: u32,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub practice_questions: Vec<PlanQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
}

impl StudyTask {
    fn is_done(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyDay {
    pub date: String,
    #[serde(default)]
    pub day_of_week: String,
    #[serde(default)]
    pub total_minutes: u32,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub tasks: Vec<StudyTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyWeek {
    pub week_number: u32,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub focus_topics: Vec<String>,
    #[serde(default)]
    pub days: Vec<StudyDay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlan {
    pub id: String,
    pub student_id: String,
    pub generated_at: DateTime<Utc>,
    pub settings: StudyPlanSettings,
    pub weeks: Vec<StudyWeek>,
    pub status: PlanStatus,
    pub share_with_teacher: bool,
}

impl StudyPlan {
    pub fn new(
        student_id: &str,
        settings: StudyPlanSettings,
        weeks: Vec<StudyWeek>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("plan-{}", generated_at.timestamp_millis()),
            student_id: student_id.to_string(),
            generated_at,
            settings,
            weeks,
            status: PlanStatus::Active,
            share_with_teacher: false,
        }
    }

    fn tasks(&self) -> impl Iterator<Item = &StudyTask> {
        self.weeks
            .iter()
            .flat_map(|week| &week.days)
            .flat_map(|day| &day.tasks)
    }

    /// `(completed, total)` task counts.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.tasks().count();
        let completed = self
            .tasks()
            .filter(|task| task.status == TaskStatus::Completed)
            .count();
        (completed, total)
    }

    /// Mark a task completed. Its day completes once every task in it is
    /// completed or skipped, and the plan completes once every day does.
    /// Returns false when no task has that id.
    pub fn complete_task(
        &mut self,
        task_id: &str,
        reflection: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        let mut found = false;
        for day in self.weeks.iter_mut().flat_map(|week| week.days.iter_mut()) {
            let Some(task) = day.tasks.iter_mut().find(|task| task.id == task_id) else {
                continue;
            };
            task.status = TaskStatus::Completed;
            task.completed_at = Some(at);
            if reflection.is_some() {
                task.reflection = reflection.clone();
            }
            day.is_completed = day.tasks.iter().all(StudyTask::is_done);
            found = true;
            break;
        }

        if found && self.weeks.iter().flat_map(|w| &w.days).all(|d| d.is_completed) {
            self.status = PlanStatus::Completed;
        }
        found
    }
}

/// One gap per weak area recorded for the student in an analysis.
pub fn gaps_for_student(student: &ParsedStudent) -> Vec<StudyGap> {
    let mastery = capped(student.percentage.unwrap_or(DEFAULT_MASTERY)) as u32;
    let risk_level = mapper::risk_level(student.percentage, student.priority);

    student
        .weak_areas
        .iter()
        .map(|area| {
            let (subject, unit, topic) =
                split_topic_path(area).unwrap_or(("All Subjects", "General", area.as_str()));
            StudyGap {
                subject: subject.to_string(),
                unit: unit.to_string(),
                topic: topic.to_string(),
                topic_path: area.clone(),
                mastery_estimate: mastery,
                risk_level,
                common_misconceptions: student.patterns.clone(),
                recommended_next_steps: Vec::new(),
                evidence: student.evidence.clone(),
            }
        })
        .collect()
}

fn upload_label(category: &str) -> &str {
    match category {
        "lecture_notes" => "Lecture Notes",
        "study_guide" => "Study Guide",
        "practice_worksheet" => "Practice Worksheet",
        "wrong_answers" => "Questions Student Got Wrong",
        other => other,
    }
}

fn system_prompt() -> &'static str {
    "You are a tutor who writes personalized study plans for middle school students. \
Plans are encouraging and realistic, split hard topics into small steps, and fix \
misconceptions before moving on. When uploaded files are listed, use them to find the \
problem areas, tailor practice questions to them, and put questions the student got \
wrong first."
}

fn user_prompt(request: &StudyPlanRequest) -> String {
    let profile = &request.profile;
    let settings = &request.settings;
    let mut prompt = format!(
        "Create a personalized study plan for {}, a {} grade student.\n\nGoals: {}\n\n\
LEARNING GAPS:\n",
        profile.name,
        profile.grade,
        profile.goals.join(", ")
    );

    for gap in &request.gaps {
        prompt.push_str(&format!(
            "- Topic: {} ({})\n  Mastery: {}%\n  Risk level: {}\n  Evidence: {}\n  \
Misconceptions: {}\n  Next steps: {}\n",
            gap.topic,
            gap.topic_path,
            gap.mastery_estimate,
            gap.risk_level.as_str(),
            gap.evidence.join("; "),
            gap.common_misconceptions.join(", "),
            gap.recommended_next_steps.join(", ")
        ));
    }

    if !request.uploads.is_empty() {
        prompt.push_str("\nUPLOADED FILES:\n");
        for upload in &request.uploads {
            let state = if upload.analyzed { "Analyzed" } else { "Processing" };
            prompt.push_str(&format!(
                "- {} ({}) - {}\n",
                upload.file_name,
                upload_label(&upload.category),
                state
            ));
        }
    }

    if !request.assessments.is_empty() {
        prompt.push_str("\nUPCOMING ASSESSMENTS:\n");
        for assessment in &request.assessments {
            prompt.push_str(&format!(
                "- {} on {}: Topics - {}\n",
                assessment.name,
                assessment.date,
                assessment.topics.join(", ")
            ));
        }
    }

    prompt.push_str(&format!(
        "\nSETTINGS:\n- Time available: {} minutes per day\n- Days per week: {}\n\
- Priority: {}\n- Pace: {}\n",
        settings.minutes_per_day,
        settings.days_per_week,
        settings.priority.goal(),
        settings.difficulty.as_str()
    ));
    if let Some(target) = &settings.target_date {
        prompt.push_str(&format!("- Target date: {target}\n"));
    }

    if request
        .uploads
        .iter()
        .any(|upload| upload.category == "wrong_answers")
    {
        prompt.push_str(
            "\nThe student uploaded questions they got wrong. Address those problem areas first.\n",
        );
    }

    prompt.push_str(&format!(
        "\nCreate a {PLAN_WEEKS}-week plan with daily tasks that fit the daily limit. Each task \
has a micro-goal, an estimated time, suggested resources and 2-3 practice questions with \
hints and explanations.\n\nAnswer with one JSON object shaped like:\n{}",
        plan_shape()
    ));
    prompt
}

fn plan_shape() -> String {
    let shape = json!({
        "weeks": [{
            "weekNumber": 1,
            "startDate": "YYYY-MM-DD",
            "endDate": "YYYY-MM-DD",
            "focusTopics": ["Topic"],
            "days": [{
                "date": "YYYY-MM-DD",
                "dayOfWeek": "Monday",
                "totalMinutes": 30,
                "isCompleted": false,
                "tasks": [{
                    "id": "task-1",
                    "topic": "Topic",
                    "topicPath": "Subject → Unit → Topic",
                    "microGoal": "Specific learning objective",
                    "estimatedMinutes": 15,
                    "status": "pending",
                    "resources": [
                        { "id": "r1", "title": "Resource", "type": "video", "estimatedMinutes": 5 }
                    ],
                    "practiceQuestions": [{
                        "id": "q1",
                        "question": "Question?",
                        "hint": "Hint",
                        "answer": "Answer",
                        "explanation": "Why it is correct"
                    }]
                }]
            }]
        }]
    });
    serde_json::to_string_pretty(&shape).unwrap_or_default()
}

/// Chat messages for a study plan completion.
pub fn messages(request: &StudyPlanRequest) -> Value {
    json!([
        { "role": "system", "content": system_prompt() },
        { "role": "user", "content": user_prompt(request) },
    ])
}

/// The JSON inside the first ``` fence, or the whole reply when there is no
/// fence.
pub fn extract_plan_json(content: &str) -> &str {
    RE_JSON_FENCE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map_or(content.trim(), |body| body.as_str())
}

#[derive(Deserialize)]
struct PlanBody {
    #[serde(default)]
    weeks: Vec<StudyWeek>,
}

pub fn parse_plan_weeks(content: &str) -> Result<Vec<StudyWeek>, serde_json::Error> {
    let body: PlanBody = serde_json::from_str(extract_plan_json(content))?;
    Ok(body.weeks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> StudyPlanSettings {
        StudyPlanSettings {
            minutes_per_day: 30,
            days_per_week: 5,
            target_date: None,
            priority: StudyPriority::UpcomingTest,
            difficulty: Pace::Gentle,
        }
    }

    fn task(id: &str, status: TaskStatus) -> StudyTask {
        StudyTask {
            id: id.to_string(),
            topic: "Dividing Fractions".to_string(),
            topic_path: "Math → Fractions → Dividing Fractions".to_string(),
            micro_goal: "Divide a fraction by a whole number".to_string(),
            estimated_minutes: 15,
            status,
            resources: Vec::new(),
            practice_questions: Vec::new(),
            completed_at: None,
            reflection: None,
        }
    }

    fn day(date: &str, tasks: Vec<StudyTask>) -> StudyDay {
        StudyDay {
            date: date.to_string(),
            day_of_week: String::new(),
            total_minutes: 30,
            is_completed: false,
            tasks,
        }
    }

    fn plan(days: Vec<StudyDay>) -> StudyPlan {
        let week = StudyWeek {
            week_number: 1,
            start_date: "2026-10-19".to_string(),
            end_date: "2026-10-23".to_string(),
            focus_topics: vec!["Dividing Fractions".to_string()],
            days,
        };
        StudyPlan::new("student-1", settings(), vec![week], now())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
    }

    #[test]
    fn fenced_reply_is_unwrapped() {
        let reply = "Here is the plan:\n```json\n{\"weeks\": []}\n```\nGood luck!";
        assert_eq!(extract_plan_json(reply), "{\"weeks\": []}");
        assert_eq!(extract_plan_json("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_plan_json("  {\"weeks\": []}\n"), "{\"weeks\": []}");
    }

    #[test]
    fn plan_weeks_parse_with_defaults() {
        let reply = r#"```json
{"weeks": [{"weekNumber": 1, "days": [{"date": "2026-10-19", "tasks": [
  {"id": "task-1", "topic": "Ratios", "resources": [{"title": "Ratio video", "type": "video"}],
   "practiceQuestions": [{"question": "2:4 simplified?", "answer": "1:2"}]}
]}]}]}
```"#;
        let weeks = parse_plan_weeks(reply).unwrap();
        let task = &weeks[0].days[0].tasks[0];
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.resources[0].kind, "video");
        assert_eq!(task.practice_questions[0].hint, None);
        assert!(!weeks[0].days[0].is_completed);

        assert!(parse_plan_weeks("{}").unwrap().is_empty());
        assert!(parse_plan_weeks("not json").is_err());
    }

    #[test]
    fn gaps_come_from_weak_areas() {
        let student = ParsedStudent {
            name: "Liam Chen".to_string(),
            priority: Some(1),
            percentage: Some(25),
            weak_areas: vec![
                "Math → Fractions → Multiplying Fractions".to_string(),
                "Decimals".to_string(),
            ],
            evidence: vec!["Q3: wrote 1/2 × 1/3 = 2/5".to_string()],
            patterns: vec!["Adds numerators when multiplying".to_string()],
            ..ParsedStudent::default()
        };
        let gaps = gaps_for_student(&student);

        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].subject, "Math");
        assert_eq!(gaps[0].unit, "Fractions");
        assert_eq!(gaps[0].topic, "Multiplying Fractions");
        assert_eq!(gaps[0].mastery_estimate, 25);
        assert_eq!(gaps[0].risk_level, RiskLevel::High);
        assert_eq!(gaps[0].common_misconceptions, student.patterns);
        assert_eq!(gaps[1].subject, "All Subjects");
        assert_eq!(gaps[1].topic, "Decimals");
        assert_eq!(gaps[1].topic_path, "Decimals");
    }

    #[test]
    fn prompt_carries_settings_uploads_and_assessments() {
        let request = StudyPlanRequest {
            gaps: Vec::new(),
            settings: settings(),
            profile: StudentProfile {
                name: "Ava Johnson".to_string(),
                grade: "7th".to_string(),
                goals: vec!["Pass the unit test".to_string()],
            },
            uploads: vec![PlanUpload {
                file_name: "quiz3-misses.pdf".to_string(),
                category: "wrong_answers".to_string(),
                analyzed: true,
            }],
            assessments: vec!["Unit 4 Test|2026-10-30|Ratios, Rates".parse().unwrap()],
        };
        let messages = messages(&request);
        let user = messages[1]["content"].as_str().unwrap();

        assert_eq!(messages[0]["role"], "system");
        assert!(user.contains("Ava Johnson, a 7th grade student"));
        assert!(user.contains("- quiz3-misses.pdf (Questions Student Got Wrong) - Analyzed"));
        assert!(user.contains("- Unit 4 Test on 2026-10-30: Topics - Ratios, Rates"));
        assert!(user.contains("- Time available: 30 minutes per day"));
        assert!(user.contains("- Priority: Prepare for upcoming test"));
        assert!(user.contains("- Pace: gentle"));
        assert!(user.contains("got wrong. Address those problem areas first."));
    }

    #[test]
    fn assessment_needs_name_and_date() {
        let parsed: UpcomingAssessment = "Quiz 5 | 2026-11-02".parse().unwrap();
        assert_eq!(parsed.name, "Quiz 5");
        assert!(parsed.topics.is_empty());
        assert!("Quiz 5".parse::<UpcomingAssessment>().is_err());
    }

    #[test]
    fn completing_tasks_closes_day_then_plan() {
        let mut plan = plan(vec![day(
            "2026-10-19",
            vec![task("task-1", TaskStatus::Pending), task("task-2", TaskStatus::Skipped)],
        )]);
        assert_eq!(plan.id, format!("plan-{}", now().timestamp_millis()));

        assert!(!plan.complete_task("task-9", None, now()));
        assert_eq!(plan.status, PlanStatus::Active);

        assert!(plan.complete_task("task-1", Some("Got it".to_string()), now()));
        let monday = &plan.weeks[0].days[0];
        assert_eq!(monday.tasks[0].status, TaskStatus::Completed);
        assert_eq!(monday.tasks[0].completed_at, Some(now()));
        assert_eq!(monday.tasks[0].reflection.as_deref(), Some("Got it"));
        assert!(monday.is_completed);
        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(plan.progress(), (1, 2));
    }

    #[test]
    fn open_day_keeps_plan_active() {
        let mut plan = plan(vec![
            day("2026-10-19", vec![task("task-1", TaskStatus::Pending)]),
            day("2026-10-20", vec![task("task-2", TaskStatus::Pending)]),
        ]);
        assert!(plan.complete_task("task-1", None, now()));
        assert!(plan.weeks[0].days[0].is_completed);
        assert!(!plan.weeks[0].days[1].is_completed);
        assert_eq!(plan.status, PlanStatus::Active);
    }
}
