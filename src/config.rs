use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::asr::AsrConfig;
use crate::audio::CaptureConfig;
use crate::chat::CompletionConfig;
use crate::error::PipelineError;
use crate::resilience::BackoffPolicy;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub asr: AsrSection,
    #[serde(default)]
    pub completion: CompletionSection,
    #[serde(default)]
    pub audio: AudioSection,
    #[serde(default)]
    pub resilience: ResilienceSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AsrSection {
    pub url: String,
    pub uid: String,
    pub model: String,
    pub connect_timeout_secs: u64,
    pub debounce_ms: u64,
}

impl Default for AsrSection {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765/asr".to_string(),
            uid: format!("voicepipe-{}", uuid::Uuid::new_v4()),
            model: "streaming".to_string(),
            connect_timeout_secs: 7,
            debounce_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CompletionSection {
    pub base_url: String,
    /// Set here or via the VOICEPIPE_API_KEY environment variable.
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_turns: usize,
    pub request_timeout_secs: u64,
}

impl Default for CompletionSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are a helpful voice assistant. Keep answers brief."
                .to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            max_turns: 20,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    /// Target sample rate after downmix/resample (the ASR contract).
    pub sample_rate: u32,
    /// Command line for the system-audio helper process, if installed.
    pub subprocess_command: Option<String>,
    /// Preferred input device name; the default device otherwise.
    pub mic_device: Option<String>,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            subprocess_command: None,
            mic_device: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ResilienceSection {
    pub max_attempts: u32,
    pub cooldown_secs: u64,
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            cooldown_secs: 60,
            base_delay_ms: 500,
            cap_delay_ms: 30_000,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VOICEPIPE").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn asr_config(&self) -> AsrConfig {
        AsrConfig {
            url: self.asr.url.clone(),
            uid: self.asr.uid.clone(),
            sample_rate: self.audio.sample_rate,
            model: self.asr.model.clone(),
            connect_timeout: Duration::from_secs(self.asr.connect_timeout_secs),
            debounce: Duration::from_millis(self.asr.debounce_ms),
        }
    }

    pub fn completion_config(&self) -> Result<CompletionConfig, PipelineError> {
        let api_key = match &self.completion.api_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => std::env::var("VOICEPIPE_API_KEY").map_err(|_| {
                PipelineError::ConfigMissing(
                    "completion api key (completion.api_key or VOICEPIPE_API_KEY)"
                        .to_string(),
                )
            })?,
        };
        Ok(CompletionConfig {
            base_url: self.completion.base_url.clone(),
            api_key,
            model: self.completion.model.clone(),
            system_prompt: self.completion.system_prompt.clone(),
            temperature: self.completion.temperature,
            max_tokens: self.completion.max_tokens,
            max_turns: self.completion.max_turns,
            request_timeout: Duration::from_secs(self.completion.request_timeout_secs),
        })
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_sample_rate: self.audio.sample_rate,
            subprocess_command: self.audio.subprocess_command.clone(),
            mic_device: self.audio.mic_device.clone(),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.resilience.max_attempts,
            cooldown: Duration::from_secs(self.resilience.cooldown_secs),
            base_delay: Duration::from_millis(self.resilience.base_delay_ms),
            cap_delay: Duration::from_millis(self.resilience.cap_delay_ms),
        }
    }
}
