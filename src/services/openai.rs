// src/services/openai.rs
use crate::config::ProviderSettings;
use crate::errors::CollageError;
use crate::services::llm_service::{
    CollageProvider, ImageRequest, PlanContext, RetryPolicy, build_client, network_error,
    parse_size, read_json, retry_with_backoff, with_timeout,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde_json::{Value, json};

const PLANNER_SYSTEM_PROMPT: &str = "You design scrapbook / journal style collage layouts: paper background, \
instant-photo frames, decorative stickers, a title and body text, arranged like a magazine page. \
Reply with one strict JSON object whose fields are all present and usable.\n\
Hard rules: every coordinate and size in layout is a fraction between 0 and 1; photos[].sourceIndex \
must be within [0, imageCount-1]; texts[].kind is one of date/title/body; elements has 2 to 8 entries; \
output nothing but the JSON object.\n\
Preferences: generous whitespace, clean look, light shadows, tape and sticker accents. Never put \
readable text into the background or stickers; all text is rendered from layout.texts.";

pub struct OpenAiProvider {
    client: Client,
    settings: ProviderSettings,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    pub fn new(settings: ProviderSettings, retry: RetryPolicy) -> Result<Self, CollageError> {
        Ok(Self {
            client: build_client(settings.proxy.as_deref())?,
            settings,
            retry,
        })
    }

    fn chat_model(&self) -> &str {
        self.settings.chat_model.as_deref().unwrap_or("gpt-4o")
    }

    async fn post_chat(&self, body: &Value) -> Result<Value, CollageError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.settings.base_url))
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| network_error("OpenAI chat", e))?;

        read_json(response, "OpenAI chat").await
    }

    async fn post_images(&self, body: &Value) -> Result<Value, CollageError> {
        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.settings.base_url))
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| network_error("OpenAI images", e))?;

        read_json(response, "OpenAI images").await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, CollageError> {
        let label = "OpenAI images download";
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

fn is_dalle(model: &str) -> bool {
    let model = model.to_lowercase();
    model.contains("dall-e") || model.contains("dalle")
}

/// Snap a requested size to one the images endpoint accepts: square,
/// landscape or portrait, chosen by aspect ratio.
pub fn snap_image_size(size: &str, model: &str) -> &'static str {
    let Some((w, h)) = parse_size(size) else {
        return "1024x1024";
    };
    let ratio = f64::from(w) / f64::from(h);
    let dalle = is_dalle(model);

    if ratio > 0.85 && ratio < 1.18 {
        "1024x1024"
    } else if ratio >= 1.18 {
        if dalle { "1792x1024" } else { "1536x1024" }
    } else if dalle {
        "1024x1792"
    } else {
        "1024x1536"
    }
}

pub fn build_plan_request(model: &str, ctx: &PlanContext, reference_images: &[Vec<u8>]) -> Value {
    let brief = json!({
        "prompt": ctx.prompt,
        "style": ctx.style,
        "templateId": ctx.template_id,
        "imageCount": ctx.photo_count,
        "canvas": { "width": ctx.canvas.width, "height": ctx.canvas.height },
        "example_layout_hint": {
            "top": "date + big title",
            "middle": "1 big photo + 1-2 small photos",
            "decorations": "2-4 stickers around photos"
        },
        "output_schema": {
            "style": "string",
            "palette": ["string"],
            "backgroundPrompt": "string",
            "elements": [{ "id": "string", "kind": "sticker|frame|decoration", "prompt": "string" }],
            "layout": {
                "canvas": { "width": "number", "height": "number" },
                "backgroundStyle": "paper|stationery|minimal|poster",
                "photos": [{
                    "id": "string", "sourceIndex": "number",
                    "x": "0~1", "y": "0~1", "w": "0~1", "h": "0~1",
                    "rotate": "number", "style": "polaroid|tape|clean",
                    "cornerRadius": "number", "shadow": "boolean"
                }],
                "texts": [{
                    "id": "string", "kind": "date|title|body", "text": "string",
                    "x": "0~1", "y": "0~1", "w": "0~1", "h": "0~1",
                    "align": "left|center|right", "fontSize": "number", "color": "string",
                    "fontFamily": "sans|serif", "rotate": "number"
                }],
                "stickers": [{ "elementId": "string", "x": "0~1", "y": "0~1", "w": "0~1", "h": "0~1", "rotate": "number" }]
            },
            "notes": "string"
        }
    });

    let mut content = vec![json!({ "type": "text", "text": brief.to_string() })];
    content.extend(reference_images.iter().map(|png| {
        json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(png))
            }
        })
    }));

    json!({
        "model": model,
        "temperature": 0.4,
        "response_format": { "type": "json_object" },
        "messages": [
            { "role": "system", "content": PLANNER_SYSTEM_PROMPT },
            { "role": "user", "content": content }
        ]
    })
}

/// Pull the JSON object out of a chat completion.
pub fn parse_plan_response(result: &Value) -> Result<Value, CollageError> {
    let content = result["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| CollageError::upstream("OpenAI chat: empty response", None, None))?;

    serde_json::from_str(content).map_err(|_| {
        CollageError::upstream(
            "OpenAI chat: model did not return a valid JSON object",
            None,
            Some(content),
        )
    })
}

pub fn build_image_request(model: &str, req: &ImageRequest) -> Value {
    let mut body = json!({
        "model": model,
        "prompt": req.prompt,
        "size": snap_image_size(&req.size, model),
        "n": 1,
    });
    if is_dalle(model) {
        body["response_format"] = json!("b64_json");
    } else if req.transparent && model.starts_with("gpt-image") {
        body["background"] = json!("transparent");
    }
    body
}

enum ImagePayload {
    Inline(Vec<u8>),
    Remote(String),
}

fn parse_image_response(result: &Value) -> Result<ImagePayload, CollageError> {
    let first = &result["data"][0];

    if let Some(b64) = first["b64_json"].as_str().filter(|s| !s.is_empty()) {
        let bytes = general_purpose::STANDARD.decode(b64).map_err(|e| {
            CollageError::upstream(format!("OpenAI images: bad base64 payload: {}", e), None, None)
        })?;
        return Ok(ImagePayload::Inline(bytes));
    }

    match first["url"].as_str() {
        Some(url) if url.starts_with("http") => Ok(ImagePayload::Remote(url.to_string())),
        _ => Err(CollageError::upstream(
            "OpenAI images: empty b64_json (and no url fallback)",
            None,
            None,
        )),
    }
}

#[async_trait]
impl CollageProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    async fn plan_layout(
        &self,
        ctx: &PlanContext,
        reference_images: &[Vec<u8>],
    ) -> Result<Value, CollageError> {
        let body = build_plan_request(self.chat_model(), ctx, reference_images);
        log::info!(
            "Requesting layout plan from OpenAI ({}, {} reference images)",
            self.chat_model(),
            reference_images.len()
        );

        let result = with_timeout(self.post_chat(&body), self.settings.chat_timeout, "OpenAI chat").await?;
        parse_plan_response(&result)
    }

    async fn generate_image(&self, req: &ImageRequest) -> Result<Vec<u8>, CollageError> {
        let model = self.settings.image_model.as_str();
        let body = build_image_request(model, req);
        log::debug!("OpenAI images request: model={}, size={}", model, body["size"]);

        let result = retry_with_backoff(&self.retry, "OpenAI images", |_| {
            with_timeout(self.post_images(&body), self.settings.images_timeout, "OpenAI images")
        })
        .await?;

        match parse_image_response(&result)? {
            ImagePayload::Inline(bytes) => Ok(bytes),
            ImagePayload::Remote(url) => {
                with_timeout(self.download(&url), self.settings.images_timeout, "OpenAI images download").await
            }
        }
    }
}
