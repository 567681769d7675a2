use std::time::Duration;

use anyhow::{bail, Context};

use crate::inference::{CompletionEndpoint, Endpoint};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_STUDY_PLAN_BASE_URL: &str = "https://ai.gateway.lovable.dev/v1";
const DEFAULT_STUDY_PLAN_MODEL: &str = "google/gemini-3-flash-preview";

/// Inference settings, read from `STACKAI_*` and `STUDY_PLAN_*` environment
/// variables.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub analyze_flow_id: Option<String>,
    pub tutor_flow_url: Option<String>,
    pub study_plan_api_key: Option<String>,
    pub study_plan_base_url: String,
    pub study_plan_model: String,
    pub timeout: Duration,
}

impl InferenceSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let timeout_secs = match read("STACKAI_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().with_context(|| {
                format!("STACKAI_TIMEOUT_SECS must be a whole number, got {raw:?}")
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            api_key: read("STACKAI_API_KEY"),
            base_url: read("STACKAI_BASE_URL"),
            analyze_flow_id: read("STACKAI_ANALYZE_FLOW_ID"),
            tutor_flow_url: read("STACKAI_TUTOR_FLOW_URL"),
            study_plan_api_key: read("STUDY_PLAN_API_KEY"),
            study_plan_base_url: read("STUDY_PLAN_BASE_URL")
                .unwrap_or_else(|| DEFAULT_STUDY_PLAN_BASE_URL.to_string()),
            study_plan_model: read("STUDY_PLAN_MODEL")
                .unwrap_or_else(|| DEFAULT_STUDY_PLAN_MODEL.to_string()),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }

    pub fn analyze_endpoint(&self) -> anyhow::Result<Endpoint> {
        let (Some(api_key), Some(base_url), Some(flow_id)) =
            (&self.api_key, &self.base_url, &self.analyze_flow_id)
        else {
            bail!("STACKAI_API_KEY, STACKAI_BASE_URL and STACKAI_ANALYZE_FLOW_ID must be set to run an analysis");
        };

        Ok(Endpoint {
            url: format!("{}/{}", base_url.trim_end_matches('/'), flow_id),
            api_key: Some(api_key.clone()),
        })
    }

    /// The tutor flow may be public, so the key is optional here.
    pub fn tutor_endpoint(&self) -> anyhow::Result<Endpoint> {
        let url = self
            .tutor_flow_url
            .clone()
            .context("STACKAI_TUTOR_FLOW_URL must be set to use the tutor")?;

        Ok(Endpoint {
            url,
            api_key: self.api_key.clone(),
        })
    }

    pub fn study_plan_endpoint(&self) -> anyhow::Result<CompletionEndpoint> {
        let api_key = self
            .study_plan_api_key
            .clone()
            .context("STUDY_PLAN_API_KEY must be set to generate study plans")?;

        Ok(CompletionEndpoint {
            endpoint: Endpoint {
                url: format!(
                    "{}/chat/completions",
                    self.study_plan_base_url.trim_end_matches('/')
                ),
                api_key: Some(api_key),
            },
            model: self.study_plan_model.clone(),
        })
    }
}

pub fn database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL").context("DATABASE_URL must be set to a Postgres instance")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> anyhow::Result<InferenceSettings> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InferenceSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn analyze_endpoint_joins_base_and_flow() {
        let cfg = settings(&[
            ("STACKAI_API_KEY", "secret"),
            ("STACKAI_BASE_URL", "https://api.example.com/inference/v0/run/org/"),
            ("STACKAI_ANALYZE_FLOW_ID", "flow-1"),
        ])
        .unwrap();
        let endpoint = cfg.analyze_endpoint().unwrap();
        assert_eq!(endpoint.url, "https://api.example.com/inference/v0/run/org/flow-1");
        assert_eq!(endpoint.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn analyze_endpoint_requires_all_three_settings() {
        let cfg = settings(&[("STACKAI_API_KEY", "secret"), ("STACKAI_BASE_URL", " ")]).unwrap();
        assert!(cfg.base_url.is_none());
        assert!(cfg.analyze_endpoint().is_err());
    }

    #[test]
    fn tutor_endpoint_allows_missing_key() {
        let cfg =
            settings(&[("STACKAI_TUTOR_FLOW_URL", "https://flows.example.com/tutor")]).unwrap();
        let endpoint = cfg.tutor_endpoint().unwrap();
        assert_eq!(endpoint.api_key, None);
        assert!(settings(&[]).unwrap().tutor_endpoint().is_err());
    }

    #[test]
    fn study_plan_endpoint_defaults_gateway_and_model() {
        assert!(settings(&[]).unwrap().study_plan_endpoint().is_err());

        let target = settings(&[("STUDY_PLAN_API_KEY", "plan-key")])
            .unwrap()
            .study_plan_endpoint()
            .unwrap();
        assert_eq!(target.endpoint.url, "https://ai.gateway.lovable.dev/v1/chat/completions");
        assert_eq!(target.endpoint.api_key.as_deref(), Some("plan-key"));
        assert_eq!(target.model, DEFAULT_STUDY_PLAN_MODEL);

        let custom = settings(&[
            ("STUDY_PLAN_API_KEY", "plan-key"),
            ("STUDY_PLAN_BASE_URL", "http://localhost:8080/v1/"),
            ("STUDY_PLAN_MODEL", "local-model"),
        ])
        .unwrap()
        .study_plan_endpoint()
        .unwrap();
        assert_eq!(custom.endpoint.url, "http://localhost:8080/v1/chat/completions");
        assert_eq!(custom.model, "local-model");
    }

    #[test]
    fn timeout_must_be_numeric() {
        assert!(settings(&[("STACKAI_TIMEOUT_SECS", "soon")]).is_err());
        let cfg = settings(&[("STACKAI_TIMEOUT_SECS", "15")]).unwrap();
        assert_eq!(cfg.timeout, Duration::from_secs(15));
    }
}
