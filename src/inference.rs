use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::format::{is_truthy, stringify};
use crate::study_plan::{self, StudyPlan, StudyPlanRequest};

const DEFAULT_PROMPT: &str = "Analyze student performance";
const PREVIEW_CHARS: usize = 200;
const STUDY_PLAN_TEMPERATURE: f64 = 0.7;
const STUDY_PLAN_MAX_TOKENS: u32 = 8000;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate limit exceeded, try again later")]
    RateLimited,
    #[error("AI credits exhausted, add credits to continue")]
    CreditsExhausted,
    #[error("inference service returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("inference service returned a non-JSON response: {preview}")]
    NotJson { preview: String },
    #[error("invalid inference JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("completion response had no content")]
    EmptyCompletion,
    #[error("could not parse study plan: {0}")]
    InvalidPlan(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: String,
    pub api_key: Option<String>,
}

/// A chat-completions endpoint and the model to ask.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEndpoint {
    pub endpoint: Endpoint,
    pub model: String,
}

/// Plain flow input: the query goes into the flow's first input slot.
#[derive(Debug, Clone, Default)]
pub struct AnalysisQuery {
    pub query: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub prompt: Option<String>,
    pub user_id: Option<String>,
    pub class_id: Uuid,
    pub student_ids: Vec<Uuid>,
    pub upload_refs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Tutor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct GapSummary {
    pub topic: String,
    pub mastery_estimate: u32,
    pub common_misconceptions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TutorContext {
    pub topic: String,
    pub topic_path: String,
    pub student_name: String,
    pub grade: String,
    pub language: String,
    pub bilingual_mode: bool,
    pub misconceptions: Vec<String>,
    pub gaps: Vec<GapSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct TutorRequest {
    pub message: String,
    pub conversation_history: Vec<ChatMessage>,
    pub context: TutorContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    pub answer: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorReply {
    pub content: String,
    pub quick_replies: Option<Vec<String>>,
    pub practice_question: Option<PracticeQuestion>,
    pub phase: String,
}

#[derive(Clone)]
pub struct InferenceClient {
    http: Client,
}

impl InferenceClient {
    pub fn new(timeout: Duration) -> Result<Self, InferenceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Send a query to a flow and hand back whatever JSON it answered with.
    pub async fn query(
        &self,
        endpoint: &Endpoint,
        query: &AnalysisQuery,
    ) -> Result<Value, InferenceError> {
        let payload = json!({
            "in-0": query.query,
            "user_id": query.user_id.clone().unwrap_or_default(),
        });
        self.run_flow(endpoint, &payload).await
    }

    pub async fn analyze(
        &self,
        endpoint: &Endpoint,
        request: &AnalyzeRequest,
    ) -> Result<Value, InferenceError> {
        info!(
            class_id = %request.class_id,
            students = request.student_ids.len(),
            uploads = request.upload_refs.len(),
            "requesting class analysis"
        );
        let query = AnalysisQuery {
            query: analyze_input(request)?,
            user_id: request.user_id.clone(),
        };
        self.query(endpoint, &query).await
    }

    pub async fn tutor(
        &self,
        endpoint: &Endpoint,
        request: &TutorRequest,
    ) -> Result<TutorReply, InferenceError> {
        info!(
            topic = %request.context.topic,
            history = request.conversation_history.len(),
            "sending tutor message"
        );
        let data = self.run_flow(endpoint, &tutor_payload(request)).await?;
        Ok(tutor_reply(&data))
    }

    /// Ask a chat-completions model for a study plan and wrap its weeks in a
    /// new active plan.
    pub async fn study_plan(
        &self,
        target: &CompletionEndpoint,
        request: &StudyPlanRequest,
        student_id: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<StudyPlan, InferenceError> {
        info!(
            student = %request.profile.name,
            gaps = request.gaps.len(),
            uploads = request.uploads.len(),
            assessments = request.assessments.len(),
            "requesting study plan"
        );
        let payload = json!({
            "model": target.model,
            "messages": study_plan::messages(request),
            "temperature": STUDY_PLAN_TEMPERATURE,
            "max_tokens": STUDY_PLAN_MAX_TOKENS,
        });
        let data = self.post_json(&target.endpoint, &payload).await?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .filter(|content| !content.trim().is_empty())
            .ok_or(InferenceError::EmptyCompletion)?;
        let weeks = study_plan::parse_plan_weeks(content).map_err(|err| {
            warn!(content = %preview(content), "study plan reply is not valid JSON");
            InferenceError::InvalidPlan(err)
        })?;

        Ok(StudyPlan::new(
            student_id,
            request.settings.clone(),
            weeks,
            generated_at,
        ))
    }

    async fn run_flow(
        &self,
        endpoint: &Endpoint,
        payload: &Value,
    ) -> Result<Value, InferenceError> {
        debug!(url = %endpoint.url, "calling inference flow");
        self.post_json(endpoint, payload).await
    }

    async fn post_json(
        &self,
        endpoint: &Endpoint,
        payload: &Value,
    ) -> Result<Value, InferenceError> {
        let mut builder = self.http.post(&endpoint.url).json(payload);
        if let Some(key) = &endpoint.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(%status, body = %preview(&body), "inference service returned an error");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => InferenceError::RateLimited,
                StatusCode::PAYMENT_REQUIRED => InferenceError::CreditsExhausted,
                _ => InferenceError::Status { status, body },
            });
        }

        if body.trim_start().starts_with('<') {
            warn!(body = %preview(&body), "inference service returned HTML");
            return Err(InferenceError::NotJson {
                preview: preview(&body),
            });
        }

        let data = serde_json::from_str(&body)?;
        info!("inference response received");
        Ok(data)
    }
}

fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_CHARS).collect()
}

fn analyze_input(request: &AnalyzeRequest) -> Result<String, serde_json::Error> {
    let prompt = request
        .prompt
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
        .unwrap_or(DEFAULT_PROMPT);

    serde_json::to_string(&json!({
        "prompt": prompt,
        "user_id": request.user_id,
        "class_id": request.class_id,
        "student_ids": request.student_ids,
        "upload_refs": request.upload_refs,
    }))
}

fn tutor_payload(request: &TutorRequest) -> Value {
    let context = &request.context;
    let history = request
        .conversation_history
        .iter()
        .map(|message| {
            let role = match message.role {
                ChatRole::User => "user",
                ChatRole::Tutor => "tutor",
            };
            format!("{role}: {}", message.content)
        })
        .collect::<Vec<_>>()
        .join("\n");
    let gaps = context
        .gaps
        .iter()
        .map(|gap| {
            format!(
                "{} ({}% mastery): {}",
                gap.topic,
                gap.mastery_estimate,
                gap.common_misconceptions.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    json!({
        "in-0": request.message,
        "conversation_history": history,
        "topic": context.topic,
        "topic_path": context.topic_path,
        "student_name": context.student_name,
        "grade": context.grade,
        "language": context.language,
        "bilingual_mode": context.bilingual_mode,
        "misconceptions": context.misconceptions.join(", "),
        "learning_gaps": gaps,
    })
}

/// Pull the tutor's answer out of a flow response. Flows that answer with a
/// JSON document in their text slot may also carry quick replies, a practice
/// question and a conversation phase.
pub fn tutor_reply(data: &Value) -> TutorReply {
    let content = ["out-0", "output", "response", "message"]
        .iter()
        .find_map(|field| data.get(*field).filter(|value| is_truthy(value)))
        .map(stringify)
        .unwrap_or_else(|| data.to_string());

    let mut reply = TutorReply {
        content,
        quick_replies: None,
        practice_question: None,
        phase: "conversation".to_string(),
    };

    if !reply.content.starts_with('{') {
        return reply;
    }
    let Ok(Value::Object(structured)) = serde_json::from_str::<Value>(&reply.content) else {
        return reply;
    };

    let pick = |camel: &str, snake: &str| {
        structured
            .get(camel)
            .or_else(|| structured.get(snake))
            .filter(|value| is_truthy(value))
            .cloned()
    };

    reply.quick_replies = pick("quickReplies", "quick_replies")
        .and_then(|value| serde_json::from_value(value).ok());
    reply.practice_question = pick("practiceQuestion", "practice_question")
        .and_then(|value| serde_json::from_value(value).ok());
    if let Some(Value::String(phase)) = pick("phase", "phase") {
        reply.phase = phase;
    }
    if let Some(Value::String(text)) = pick("message", "content") {
        reply.content = text;
    }

    reply
}
