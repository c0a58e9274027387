//! Engagement nudge text: rule-based templates and a hosted text generator
//!
//! Nudges are best-effort. [`nudge_or_fallback`] turns any failure into a
//! generic message so scoring and display never depend on them.

use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::NudgeConfig;
use crate::data::Record;

/// Message shown when no source can produce a nudge
pub const FALLBACK_NUDGE: &str = "Thanks for being with us! Check out our latest features today.";

/// Why a nudge source could not produce text
#[derive(Debug, thiserror::Error)]
pub enum NudgeError {
    #[error("Environment variable {0} holding the API token is not set")]
    MissingCredential(String),
    #[error("Text generation request failed: {0}")]
    Http(String),
    #[error("Unexpected text generation response: {0}")]
    Malformed(String),
    #[error("Text generation returned no text")]
    Empty,
}

/// Customer attributes a nudge is written for. Values are kept as the raw
/// record text; sources decide how to interpret them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NudgeProfile {
    pub user_id: String,
    pub usage_frequency: Option<String>,
    pub support_calls: Option<String>,
    pub payment_delay: Option<String>,
    pub contract_length: Option<String>,
    pub tech_support: Option<String>,
    pub monthly_charges: Option<String>,
    pub paperless_billing: Option<String>,
    pub variant: Option<String>,
}

impl NudgeProfile {
    /// Pick the nudge-relevant fields out of a customer record using the
    /// configured column names. Unconfigured optional columns stay `None`.
    pub fn from_record(record: &Record, id_column: &str, variant_column: &str, config: &NudgeConfig) -> Self {
        let field = |column: &str| record.get(column).map(str::to_string);
        let optional = |column: &Option<String>| column.as_deref().and_then(field);
        Self {
            user_id: record.get(id_column).unwrap_or_default().to_string(),
            usage_frequency: field(&config.usage_column),
            support_calls: field(&config.support_calls_column),
            payment_delay: field(&config.payment_delay_column),
            contract_length: field(&config.contract_column),
            tech_support: optional(&config.tech_support_column),
            monthly_charges: optional(&config.monthly_charges_column),
            paperless_billing: optional(&config.paperless_billing_column),
            variant: field(variant_column),
        }
    }

    /// Prompt for a hosted text generator. Optional fields appear only
    /// when the record has them.
    pub fn prompt(&self) -> String {
        let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "unknown".to_string());
        let mut prompt = format!(
            "User {} profile:\n\
             - Usage frequency: {}\n\
             - Support calls: {}\n\
             - Payment delay (days): {}\n\
             - Contract: {}\n",
            self.user_id,
            show(&self.usage_frequency),
            show(&self.support_calls),
            show(&self.payment_delay),
            show(&self.contract_length),
        );
        let extras = [
            ("Tech support", &self.tech_support, ""),
            ("Monthly charges", &self.monthly_charges, "$"),
            ("Paperless billing", &self.paperless_billing, ""),
        ];
        for (label, value, prefix) in extras {
            if let Some(value) = value {
                prompt.push_str(&format!("- {label}: {prefix}{value}\n"));
            }
        }
        prompt.push_str(&format!(
            "- Variant: {}\n\n\
             Write a concise, friendly suggestion to help this user increase engagement and reduce churn.",
            show(&self.variant)
        ));
        prompt
    }
}

/// A fallible, replaceable producer of nudge text
pub trait NudgeSource {
    fn nudge(&self, profile: &NudgeProfile) -> Result<String, NudgeError>;
}

/// What a rule-based nudge addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeCategory {
    Engagement,
    Support,
    Payment,
    Contract,
    Generic,
}

impl fmt::Display for NudgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NudgeCategory::Engagement => "engagement",
            NudgeCategory::Support => "support",
            NudgeCategory::Payment => "payment",
            NudgeCategory::Contract => "contract",
            NudgeCategory::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// One rule-based suggestion
#[derive(Debug, Clone, PartialEq)]
pub struct Nudge {
    pub category: NudgeCategory,
    pub message: String,
}

/// Tone applied to template messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Formal,
    Friendly,
    Helpful,
    Neutral,
}

impl Tone {
    /// Tone for a persona name; unknown personas are neutral.
    pub fn for_persona(persona: &str) -> Self {
        match persona {
            "Senior" => Tone::Formal,
            "Young Professional" => Tone::Friendly,
            "Techie" => Tone::Helpful,
            _ => Tone::Neutral,
        }
    }

    pub fn wrap(&self, message: &str) -> String {
        match self {
            Tone::Formal => format!("We recommend: {message}"),
            Tone::Friendly => format!("Hey there! {message}"),
            Tone::Helpful => format!("Quick tip: {message}"),
            Tone::Neutral => message.to_string(),
        }
    }
}

const LOW_USAGE: f64 = 10.0;
const MANY_SUPPORT_CALLS: f64 = 5.0;
const LONG_PAYMENT_DELAY: f64 = 15.0;

/// Static templates keyed on usage, support, payment and contract signals
#[derive(Debug, Clone, Copy)]
pub struct RuleBasedNudges {
    tone: Tone,
}

impl RuleBasedNudges {
    /// Templates rendered in the tone of `persona`.
    pub fn new(persona: &str) -> Self {
        Self {
            tone: Tone::for_persona(persona),
        }
    }

    /// Every nudge that applies to `profile`, in category order. Metrics that
    /// are missing or not numeric are skipped.
    pub fn nudges(&self, profile: &NudgeProfile) -> Vec<Nudge> {
        let metric = |value: &Option<String>| value.as_deref().and_then(|v| v.trim().parse::<f64>().ok());
        let mut nudges = Vec::new();
        let mut add = |category, messages: [&str; 2]| {
            for message in messages {
                nudges.push(Nudge {
                    category,
                    message: self.tone.wrap(message),
                });
            }
        };

        if metric(&profile.usage_frequency).is_some_and(|v| v < LOW_USAGE) {
            add(
                NudgeCategory::Engagement,
                [
                    "Explore our weekly tools to build a habit.",
                    "Set reminders to revisit your favorite features.",
                ],
            );
        }
        if metric(&profile.support_calls).is_some_and(|v| v > MANY_SUPPORT_CALLS) {
            add(
                NudgeCategory::Support,
                [
                    "You've reached out a few times, so try our Help Center anytime.",
                    "Book a quick success call to improve your experience.",
                ],
            );
        }
        if metric(&profile.payment_delay).is_some_and(|v| v > LONG_PAYMENT_DELAY) {
            add(
                NudgeCategory::Payment,
                [
                    "Enable auto-pay to avoid billing issues.",
                    "Check our billing FAQ if you're running into problems.",
                ],
            );
        }
        let contract = profile
            .contract_length
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .unwrap_or_default();
        if contract == "month-to-month" || contract == "monthly" {
            add(
                NudgeCategory::Contract,
                [
                    "Upgrade to annual billing and enjoy up to 20% savings.",
                    "Annual plans come with premium support benefits.",
                ],
            );
        }

        if nudges.is_empty() {
            nudges.push(Nudge {
                category: NudgeCategory::Generic,
                message: self.tone.wrap(FALLBACK_NUDGE),
            });
        }
        nudges
    }
}

impl NudgeSource for RuleBasedNudges {
    fn nudge(&self, profile: &NudgeProfile) -> Result<String, NudgeError> {
        let lines: Vec<String> = self
            .nudges(profile)
            .into_iter()
            .map(|n| format!("[{}] {}", n.category, n.message))
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Client for a hosted text generation endpoint
#[derive(Debug, Clone)]
pub struct HostedNudgeClient {
    agent: ureq::Agent,
    url: String,
    token: String,
    max_new_tokens: u32,
    temperature: f32,
}

impl HostedNudgeClient {
    /// Build a client, reading the bearer token from the configured
    /// environment variable.
    pub fn from_config(config: &NudgeConfig) -> Result<Self, NudgeError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| NudgeError::MissingCredential(config.token_env.clone()))?;
        Ok(Self::new(config, token))
    }

    /// Client for `config.endpoint`/`config.model` authenticated with `token`.
    pub fn new(config: &NudgeConfig, token: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            agent,
            url: format!("{}/{}", config.endpoint.trim_end_matches('/'), config.model),
            token,
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl NudgeSource for HostedNudgeClient {
    fn nudge(&self, profile: &NudgeProfile) -> Result<String, NudgeError> {
        let body = json!({
            "inputs": profile.prompt(),
            "parameters": {
                "max_new_tokens": self.max_new_tokens,
                "temperature": self.temperature,
                "return_full_text": false,
            }
        });
        debug!(url = %self.url, user = %profile.user_id, "Requesting hosted nudge");
        let response: Value = self
            .agent
            .post(&self.url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .send_json(body)
            .map_err(|e| NudgeError::Http(e.to_string()))?
            .into_json()
            .map_err(|e| NudgeError::Malformed(e.to_string()))?;
        extract_generated_text(&response)
    }
}

/// Pull the generated text out of `[{"generated_text": ..}]` or
/// `{"generated_text": ..}`.
pub fn extract_generated_text(response: &Value) -> Result<String, NudgeError> {
    let entry = match response {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    if let Some(error) = entry.and_then(|e| e.get("error")).and_then(Value::as_str) {
        return Err(NudgeError::Http(error.to_string()));
    }
    let text = entry
        .and_then(|e| e.get("generated_text"))
        .and_then(Value::as_str)
        .ok_or_else(|| NudgeError::Malformed(response.to_string()))?
        .trim();
    if text.is_empty() {
        return Err(NudgeError::Empty);
    }
    Ok(text.to_string())
}

/// Nudge text from `source`, or [`FALLBACK_NUDGE`] when it fails
pub fn nudge_or_fallback(source: &dyn NudgeSource, profile: &NudgeProfile) -> String {
    match source.nudge(profile) {
        Ok(text) => text,
        Err(e) => {
            warn!(user = %profile.user_id, error = %e, "Nudge generation failed; using fallback");
            FALLBACK_NUDGE.to_string()
        }
    }
}
