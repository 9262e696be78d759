// src/config.rs
use crate::services::llm_service::{RetryPolicy, timeout_from_ms};
use anyhow::{Context, Result, bail};
use std::time::Duration;

pub const PROVIDER_IDS: [&str; 2] = ["openai", "doubao"];

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CHAT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_IMAGES_TIMEOUT_MS: u64 = 120_000;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENAI_CHAT_MODEL: &str = "gpt-4o";
const OPENAI_IMAGE_MODEL: &str = "gpt-image-1";
const DOUBAO_BASE_URL: &str = "https://ark.cn-beijing.volces.com";
const DOUBAO_IMAGE_MODEL: &str = "doubao-seedream-4-5-251128";

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: Option<String>,
    pub image_model: String,
    pub chat_timeout: Duration,
    pub images_timeout: Duration,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub default_provider: String,
    pub openai: Option<ProviderSettings>,
    pub doubao: Option<ProviderSettings>,
    pub retry: RetryPolicy,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("failed to read .env");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let default_provider = get("COLLAGE_PROVIDER")
            .unwrap_or_else(|| "openai".to_string())
            .to_lowercase();
        if !PROVIDER_IDS.contains(&default_provider.as_str()) {
            bail!(
                "Invalid COLLAGE_PROVIDER: {}. Supported: {}",
                default_provider,
                PROVIDER_IDS.join(", ")
            );
        }

        let retries = parse_u64(&get, "AI_IMAGES_RETRIES")?.unwrap_or(3);
        let retry_base = parse_u64(&get, "AI_IMAGES_RETRY_BASE_MS")?.unwrap_or(600);

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            default_provider,
            openai: provider_settings(&get, "OPENAI", Some("OPENAI"), OPENAI_BASE_URL, Some(OPENAI_CHAT_MODEL), OPENAI_IMAGE_MODEL)?,
            doubao: provider_settings(&get, "DOUBAO", None, DOUBAO_BASE_URL, None, DOUBAO_IMAGE_MODEL)?,
            retry: RetryPolicy::new(u32::try_from(retries).unwrap_or(u32::MAX), retry_base),
        })
    }
}

fn parse_u64<G>(get: &G, key: &str) -> Result<Option<u64>>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|v| v.parse::<u64>().with_context(|| format!("Invalid {}: {}", key, v)))
        .transpose()
}

/// `AI_<P>_*` keys win over the legacy `<legacy>_*` spelling.
fn provider_settings<G>(
    get: &G,
    provider: &str,
    legacy: Option<&str>,
    default_base_url: &str,
    default_chat_model: Option<&str>,
    default_image_model: &str,
) -> Result<Option<ProviderSettings>>
where
    G: Fn(&str) -> Option<String>,
{
    let key = |suffix: &str| {
        get(&format!("AI_{}_{}", provider, suffix))
            .or_else(|| legacy.and_then(|l| get(&format!("{}_{}", l, suffix))))
    };

    let Some(api_key) = key("API_KEY") else {
        return Ok(None);
    };

    let timeout = |suffix: &str, default: u64| -> Result<Duration> {
        let ms = match key(suffix) {
            Some(v) => v
                .parse::<u64>()
                .with_context(|| format!("Invalid AI_{}_{}: {}", provider, suffix, v))?,
            None => default,
        };
        Ok(timeout_from_ms(ms))
    };

    let proxy = key("PROXY").or_else(|| {
        ["AI_PROXY", "HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"]
            .into_iter()
            .find_map(|k| get(k))
    });

    Ok(Some(ProviderSettings {
        api_key,
        base_url: key("BASE_URL")
            .unwrap_or_else(|| default_base_url.to_string())
            .trim_end_matches('/')
            .to_string(),
        chat_model: key("CHAT_MODEL").or_else(|| default_chat_model.map(String::from)),
        image_model: key("IMAGE_MODEL").unwrap_or_else(|| default_image_model.to_string()),
        chat_timeout: timeout("CHAT_TIMEOUT_MS", DEFAULT_CHAT_TIMEOUT_MS)?,
        images_timeout: timeout("IMAGES_TIMEOUT_MS", DEFAULT_IMAGES_TIMEOUT_MS)?,
        proxy,
    }))
}
