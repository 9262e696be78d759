// src/services/doubao.rs
//! Ark Seedream adapter. There is no chat planning behind it: the plan is
//! assembled locally and always leaves the layout to the fallback.

use crate::config::ProviderSettings;
use crate::errors::CollageError;
use crate::services::llm_service::{
    CollageProvider, ImageRequest, PlanContext, RetryPolicy, build_client, network_error,
    parse_size, retry_with_backoff, with_timeout,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde_json::{Value, json};

/// Seedream rejects anything smaller.
pub const MIN_IMAGE_PIXELS: u64 = 3_686_400;

pub struct DoubaoProvider {
    client: Client,
    settings: ProviderSettings,
    retry: RetryPolicy,
}

impl DoubaoProvider {
    pub fn new(settings: ProviderSettings, retry: RetryPolicy) -> Result<Self, CollageError> {
        Ok(Self {
            client: build_client(settings.proxy.as_deref())?,
            settings,
            retry,
        })
    }

    async fn post_images(&self, body: &Value) -> Result<Value, CollageError> {
        let label = "Doubao images";
        let response = self
            .client
            .post(format!("{}/api/v3/images/generations", self.settings.base_url))
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| network_error(label, e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| network_error(label, e))?;
        if !status.is_success() {
            return Err(upstream_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|_| {
            CollageError::upstream(format!("{}: invalid JSON response", label), None, Some(&text))
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, CollageError> {
        let label = "Doubao images download";
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(label, e))?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| network_error(label, e))?;
        if !status.is_success() {
            return Err(CollageError::upstream(
                format!("{} error: {}", label, status),
                Some(status.as_u16()),
                Some(&String::from_utf8_lossy(&bytes)),
            ));
        }
        Ok(bytes.to_vec())
    }
}

/// Ark errors look like `{"error": {"code": ..., "message": ...}}` or the
/// same fields at the top level; surface the message when there is one.
pub fn upstream_error(status: u16, body: &str) -> CollageError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v["error"]["message"]
            .as_str()
            .or_else(|| v["message"].as_str())
            .map(String::from)
    });

    CollageError::upstream(
        message.unwrap_or_else(|| format!("Doubao images error: {}", status)),
        Some(status),
        Some(body),
    )
}

/// Scale a `WxH` request up to the model's minimum area, keeping the aspect
/// ratio. Strings that are not sizes pass through untouched.
pub fn legalize_size(size: &str) -> String {
    let raw = size.trim();
    if raw.eq_ignore_ascii_case("2k") {
        return "1920x1920".to_string();
    }
    let Some((w, h)) = parse_size(raw) else {
        return raw.to_string();
    };

    let pixels = u64::from(w) * u64::from(h);
    if pixels >= MIN_IMAGE_PIXELS {
        return format!("{}x{}", w, h);
    }

    let scale = (MIN_IMAGE_PIXELS as f64 / pixels as f64).sqrt();
    let w = (f64::from(w) * scale).ceil() as u64;
    let h = (f64::from(h) * scale).ceil() as u64;
    format!("{}x{}", w, h)
}

/// Plan produced without a model call. No `layout`, so the caller's
/// fallback layout is used.
pub fn local_plan(ctx: &PlanContext) -> Value {
    json!({
        "style": ctx.style,
        "palette": [],
        "backgroundPrompt": ctx.prompt,
        "elements": [
            { "id": "st-1", "kind": "sticker", "prompt": "small cute doodle sticker, minimal" },
            { "id": "st-2", "kind": "decoration", "prompt": "washi tape strip, paper texture" }
        ],
        "notes": "Plan generated locally (fallback)."
    })
}

#[async_trait]
impl CollageProvider for DoubaoProvider {
    fn id(&self) -> &str {
        "doubao"
    }

    async fn plan_layout(
        &self,
        ctx: &PlanContext,
        _reference_images: &[Vec<u8>],
    ) -> Result<Value, CollageError> {
        log::info!("Doubao has no planner, building plan locally");
        Ok(local_plan(ctx))
    }

    async fn generate_image(&self, req: &ImageRequest) -> Result<Vec<u8>, CollageError> {
        let size = legalize_size(&req.size);
        // Seedream ignores transparency; stickers come back on a solid fill.
        let body = json!({
            "model": self.settings.image_model,
            "prompt": req.prompt,
            "size": size,
            "watermark": false,
            "n": 1,
        });
        log::debug!("Doubao images request: model={}, size={}", self.settings.image_model, size);

        let result = retry_with_backoff(&self.retry, "Doubao images", |_| {
            with_timeout(self.post_images(&body), self.settings.images_timeout, "Doubao images")
        })
        .await?;

        let first = &result["data"][0];
        if let Some(b64) = first["b64_json"].as_str().filter(|s| !s.is_empty()) {
            return general_purpose::STANDARD.decode(b64).map_err(|e| {
                CollageError::upstream(format!("Doubao images: bad base64 payload: {}", e), None, None)
            });
        }

        match first["url"].as_str() {
            Some(url) if url.starts_with("http") => {
                with_timeout(self.download(url), self.settings.images_timeout, "Doubao images download").await
            }
            _ => Err(CollageError::upstream(
                "Doubao images: empty b64_json (and no url fallback)",
                None,
                Some(&result.to_string()),
            )),
        }
    }
}
