//! Runtime configuration from environment variables.

use std::time::Duration;

use steward_approval::TimeoutAction;

/// Server-level configuration with typed defaults. Engine-level knobs stay
/// on each engine's own config struct.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: u16,
    pub agent_id: String,
    pub company_id: String,
    pub company_goal: String,
    pub worker_concurrency: usize,
    pub session_ceiling_dollars: f64,
    pub hourly_cap_dollars: f64,
    pub base_task_cap_dollars: f64,
    pub max_iterations: u32,
    pub approval_timeout: Duration,
    pub approval_timeout_action: TimeoutAction,
    pub training_url: Option<String>,
    pub database_url: Option<String>,
    pub master_key: Option<String>,
    /// JSON file with boot policy (constraints, triggers, confidence map)
    pub policy_path: Option<String>,
    pub provider_base_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub provider_model: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            agent_id: "agent-1".into(),
            company_id: "company-1".into(),
            company_goal: String::new(),
            worker_concurrency: 1,
            session_ceiling_dollars: 50.0,
            hourly_cap_dollars: 20.0,
            base_task_cap_dollars: 1.0,
            max_iterations: 25,
            approval_timeout: Duration::from_secs(4 * 3600),
            approval_timeout_action: TimeoutAction::Reject,
            training_url: None,
            database_url: None,
            master_key: None,
            policy_path: None,
            provider_base_url: None,
            provider_api_key: None,
            provider_model: "claude-sonnet-4-5".into(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl RuntimeConfig {
    /// Load from `STEWARD_*` environment variables, falling back to the
    /// defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parse_env("STEWARD_PORT", defaults.port),
            agent_id: env_var("STEWARD_AGENT_ID").unwrap_or(defaults.agent_id),
            company_id: env_var("STEWARD_COMPANY_ID").unwrap_or(defaults.company_id),
            company_goal: env_var("STEWARD_COMPANY_GOAL").unwrap_or(defaults.company_goal),
            worker_concurrency: parse_env(
                "STEWARD_WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            ),
            session_ceiling_dollars: parse_env(
                "STEWARD_SESSION_CEILING_USD",
                defaults.session_ceiling_dollars,
            ),
            hourly_cap_dollars: parse_env("STEWARD_HOURLY_CAP_USD", defaults.hourly_cap_dollars),
            base_task_cap_dollars: parse_env(
                "STEWARD_TASK_CAP_USD",
                defaults.base_task_cap_dollars,
            ),
            max_iterations: parse_env("STEWARD_MAX_ITERATIONS", defaults.max_iterations),
            approval_timeout: Duration::from_millis(parse_env(
                "STEWARD_APPROVAL_TIMEOUT_MS",
                defaults.approval_timeout.as_millis() as u64,
            )),
            approval_timeout_action: match env_var("STEWARD_APPROVAL_TIMEOUT_ACTION").as_deref() {
                Some("auto_approve_low_risk") => TimeoutAction::AutoApproveLowRisk,
                _ => TimeoutAction::Reject,
            },
            training_url: env_var("STEWARD_TRAINING_URL"),
            database_url: env_var("STEWARD_DATABASE_URL"),
            master_key: env_var("STEWARD_MASTER_KEY"),
            policy_path: env_var("STEWARD_POLICY_PATH"),
            provider_base_url: env_var("STEWARD_PROVIDER_URL"),
            provider_api_key: env_var("STEWARD_PROVIDER_KEY"),
            provider_model: env_var("STEWARD_MODEL").unwrap_or(defaults.provider_model),
        }
    }
}
