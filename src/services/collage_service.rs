// src/services/collage_service.rs
//! Generation pipeline and the provider registry in front of it.
//!
//! `init -> prepare_images -> plan -> background -> stickers -> compose -> done`,
//! with `failed` reported in place of the remaining stages on error.

use crate::config::Config;
use crate::errors::CollageError;
use crate::models::{
    AssetKind, CanvasSpec, CollagePlan, DEFAULT_CANVAS_HEIGHT, DEFAULT_CANVAS_WIDTH,
    GenerateRequest, GeneratedAsset, GenerationResult, MAX_PLAN_ELEMENTS, MAX_UPLOADS,
    PlanElement, ProgressEvent, RawPlan,
};
use crate::services::compositor;
use crate::services::doubao::DoubaoProvider;
use crate::services::image_processor::{canonicalize, encode_png};
use crate::services::layout::{self, DefaultTexts};
use crate::services::llm_service::{CollageProvider, ImageRequest, PlanContext};
use crate::services::openai::OpenAiProvider;
use futures_util::future::try_join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

const STICKER_SIZE: &str = "1024x1024";

/// Fire-and-forget progress reporting. A failing sink never aborts the run.
pub struct Reporter {
    sink: Option<ProgressSink>,
    last_percent: AtomicU32,
}

impl Reporter {
    pub fn new(sink: Option<ProgressSink>) -> Self {
        Self {
            sink,
            last_percent: AtomicU32::new(0f32.to_bits()),
        }
    }

    pub fn report(&self, stage: &str, percent: f32, message: Option<String>) {
        self.last_percent.store(percent.to_bits(), Ordering::Relaxed);
        let Some(sink) = &self.sink else {
            return;
        };

        let event = ProgressEvent {
            stage: stage.to_string(),
            percent,
            message,
        };
        if catch_unwind(AssertUnwindSafe(|| sink(event))).is_err() {
            log::warn!("Progress sink panicked at stage {}, ignoring", stage);
        }
    }

    fn last_percent(&self) -> f32 {
        f32::from_bits(self.last_percent.load(Ordering::Relaxed))
    }
}

/// Explicit style wins, then the template table, then the house default.
pub fn resolve_style(style: Option<&str>, template_id: Option<&str>) -> String {
    if let Some(style) = style.map(str::trim).filter(|s| !s.is_empty()) {
        return style.to_string();
    }
    match template_id.map(str::trim) {
        Some("vintage-journal") => "vintage journal scrapbook, paper texture, washi tape, film grain",
        Some("cyberpunk") => "cyberpunk neon collage, glitch, hologram stickers, dark city",
        Some("healing-illustration") => "healing pastel illustration collage, warm light, cute doodles",
        Some("minimal-paper") => "minimal paper collage, clean grid, whitespace, editorial",
        Some("polaroid-wall") => "polaroid photo wall collage, tape, pin board, soft shadow",
        _ => "vintage journal scrapbook, paper texture, unified collage style",
    }
    .to_string()
}

fn parse_element(raw: &Value) -> Option<PlanElement> {
    let obj = raw.as_object()?;
    let kind = match obj.get("kind").and_then(Value::as_str) {
        Some("sticker") => AssetKind::Sticker,
        Some("frame") => AssetKind::Frame,
        _ => AssetKind::Decoration,
    };
    Some(PlanElement {
        id: obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from),
        kind,
        prompt: obj
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Split the planner's answer into its free-text parts. Only a payload that
/// is not a JSON object is rejected; everything else is read leniently.
pub fn parse_raw_plan(raw: Value) -> Result<RawPlan, CollageError> {
    if !raw.is_object() {
        return Err(CollageError::upstream(
            "Planner returned a non-object plan",
            None,
            Some(&raw.to_string()),
        ));
    }

    let text = |key: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    Ok(RawPlan {
        style: text("style"),
        palette: raw
            .get("palette")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default(),
        background_prompt: text("backgroundPrompt"),
        elements: raw
            .get("elements")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(parse_element).collect())
            .unwrap_or_default(),
        notes: text("notes"),
        raw,
    })
}

pub fn build_background_prompt(theme: &str, style: &str, plan: &RawPlan) -> String {
    let mut lines = vec![
        "A clean journal scrapbook paper background for a collage layout. Soft paper texture, subtle grain, gentle vignette, lots of whitespace.".to_string(),
        format!("Theme: {}", theme),
        format!("Style: {}", plan.style.as_deref().unwrap_or(style)),
    ];
    if !plan.palette.is_empty() {
        lines.push(format!("Palette: {}", plan.palette.join(", ")));
    }
    lines.push(format!(
        "Background design: {}",
        plan.background_prompt.as_deref().unwrap_or_default()
    ));
    lines.push(
        "Must NOT contain readable text, watermark, logo, or photo-like subjects. Background only."
            .to_string(),
    );
    lines.join("\n")
}

pub fn build_sticker_prompt(element: &PlanElement, style: &str, plan: &RawPlan) -> String {
    let mut lines = vec![
        "A single decorative sticker, isolated, centered, high quality, PNG, transparent background. Use simple illustration style, like scrapbook stickers.".to_string(),
        format!("Kind: {}", element.kind.as_str()),
        format!("Style: {}", plan.style.as_deref().unwrap_or(style)),
    ];
    if !plan.palette.is_empty() {
        lines.push(format!("Palette: {}", plan.palette.join(", ")));
    }
    lines.push(format!("Element: {}", element.prompt));
    lines.push("No readable text, no watermark, no logo.".to_string());
    lines.join("\n")
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Canonical RGBA for compositing plus PNG bytes for the planner, in upload order.
async fn prepare_images(
    req: &GenerateRequest,
) -> Result<(Vec<image::RgbaImage>, Vec<Vec<u8>>), CollageError> {
    if req.files.len() > MAX_UPLOADS {
        return Err(CollageError::InvalidUpload(format!(
            "At most {} images are allowed, got {}",
            MAX_UPLOADS,
            req.files.len()
        )));
    }

    let jobs = req.files.iter().map(|file| {
        log::debug!(
            "Preparing upload {} ({}, {} bytes)",
            file.filename,
            file.content_type,
            file.data.len()
        );
        let data = file.data.clone();
        let name = file.filename.clone();
        async move {
            tokio::task::spawn_blocking(move || {
                let img = canonicalize(&data).map_err(|e| match e {
                    CollageError::InvalidUpload(msg) => {
                        CollageError::InvalidUpload(format!("{}: {}", name, msg))
                    }
                    other => other,
                })?;
                let png = encode_png(&img)?;
                Ok::<_, CollageError>((img, png))
            })
            .await?
        }
    });

    Ok(try_join_all(jobs).await?.into_iter().unzip())
}

async fn generate_stickers(
    provider: &dyn CollageProvider,
    plan: &RawPlan,
    style: &str,
) -> Result<Vec<GeneratedAsset>, CollageError> {
    let jobs = plan
        .elements
        .iter()
        .take(MAX_PLAN_ELEMENTS)
        .map(|element| async move {
            let request = ImageRequest {
                prompt: build_sticker_prompt(element, style, plan),
                size: STICKER_SIZE.to_string(),
                transparent: true,
            };
            let image_bytes = provider.generate_image(&request).await?;
            Ok::<_, CollageError>(GeneratedAsset {
                id: element
                    .id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                kind: element.kind,
                image_bytes,
                source_prompt: element.prompt.clone(),
            })
        });

    try_join_all(jobs).await
}

/// Run one generation against `provider`.
pub async fn run_pipeline(
    provider: &dyn CollageProvider,
    req: GenerateRequest,
    reporter: &Reporter,
) -> Result<GenerationResult, CollageError> {
    reporter.report("init", 0.02, Some("Starting".into()));
    let canvas = CanvasSpec::new(
        req.width.unwrap_or(DEFAULT_CANVAS_WIDTH),
        req.height.unwrap_or(DEFAULT_CANVAS_HEIGHT),
    );
    log::info!(
        "Generating collage with {} on {}x{} canvas, {} photos",
        provider.id(),
        canvas.width,
        canvas.height,
        req.files.len()
    );

    reporter.report("prepare_images", 0.08, Some("Reading uploaded photos".into()));
    let (photos, reference_pngs) = prepare_images(&req).await?;
    let photo_count = photos.len();

    let style = resolve_style(req.style.as_deref(), req.template_id.as_deref());
    let default_texts = DefaultTexts::from_request(
        &req.prompt,
        req.date_text.as_deref(),
        req.title_text.as_deref(),
        req.body_text.as_deref(),
        &today(),
    );
    let fallback = layout::fallback_layout(canvas, photo_count, &default_texts);

    reporter.report("plan", 0.2, Some("Planning layout".into()));
    let ctx = PlanContext {
        prompt: req.prompt.clone(),
        style: style.clone(),
        template_id: req.template_id.clone(),
        photo_count,
        canvas,
    };
    let plan = parse_raw_plan(provider.plan_layout(&ctx, &reference_pngs).await?)?;
    let layout = layout::normalize(&plan.raw, canvas, photo_count, &fallback);
    log::debug!(
        "Layout: {} photos, {} texts, {} stickers, {} elements",
        layout.photos.len(),
        layout.texts.len(),
        layout.stickers.len(),
        plan.elements.len()
    );

    reporter.report("background", 0.42, Some("Generating background".into()));
    let background_prompt = build_background_prompt(&req.prompt, &style, &plan);
    let background = provider
        .generate_image(&ImageRequest {
            prompt: background_prompt.clone(),
            size: canvas.size_hint(),
            transparent: false,
        })
        .await?;

    reporter.report("stickers", 0.62, Some("Generating sticker assets".into()));
    let assets = generate_stickers(provider, &plan, &style).await?;

    reporter.report("compose", 0.82, Some("Compositing".into()));
    let (final_image, background, layout, assets) = tokio::task::spawn_blocking(move || {
        let out = compositor::compose(&background, &layout, &photos, &assets);
        (out, background, layout, assets)
    })
    .await?;
    let final_image = final_image?;

    reporter.report("done", 1.0, Some("Done".into()));

    let RawPlan {
        style: plan_style,
        palette,
        background_prompt: planned_background,
        elements,
        notes,
        ..
    } = plan;

    Ok(GenerationResult {
        final_image,
        background_image: background,
        assets,
        plan: CollagePlan {
            style: plan_style.unwrap_or_else(|| style.clone()),
            palette,
            background_prompt: planned_background.unwrap_or(background_prompt),
            elements,
            layout,
            notes,
        },
        resolved_style_prompt: style,
    })
}

/// Providers keyed by lower-case id, plus the configured default.
pub struct CollageService {
    providers: HashMap<String, Arc<dyn CollageProvider>>,
    default_provider: String,
}

impl CollageService {
    pub fn new(default_provider: &str) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.to_lowercase(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, CollageError> {
        let mut service = Self::new(&config.default_provider);

        match &config.openai {
            Some(settings) => service.register(Arc::new(OpenAiProvider::new(
                settings.clone(),
                config.retry.clone(),
            )?)),
            None => log::warn!("AI_OPENAI_API_KEY not set, openai provider disabled"),
        }
        match &config.doubao {
            Some(settings) => service.register(Arc::new(DoubaoProvider::new(
                settings.clone(),
                config.retry.clone(),
            )?)),
            None => log::warn!("AI_DOUBAO_API_KEY not set, doubao provider disabled"),
        }

        if !service.providers.contains_key(&service.default_provider) {
            log::warn!(
                "Default provider {} is not configured; requests must name a provider",
                service.default_provider
            );
        }
        Ok(service)
    }

    pub fn register(&mut self, provider: Arc<dyn CollageProvider>) {
        self.providers.insert(provider.id().to_lowercase(), provider);
    }

    pub fn supported(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn provider(&self, requested: Option<&str>) -> Result<Arc<dyn CollageProvider>, CollageError> {
        let id = requested
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.default_provider.clone());

        self.providers
            .get(&id)
            .cloned()
            .ok_or_else(|| CollageError::UnsupportedProvider {
                requested: id,
                supported: self.supported(),
            })
    }

    pub async fn generate(
        &self,
        req: GenerateRequest,
        sink: Option<ProgressSink>,
    ) -> Result<GenerationResult, CollageError> {
        let provider = self.provider(req.provider.as_deref())?;
        let reporter = Reporter::new(sink);

        match run_pipeline(provider.as_ref(), req, &reporter).await {
            Ok(result) => Ok(result),
            Err(e) => {
                log::warn!("Collage generation failed ({}): {}", e.code(), e);
                reporter.report("failed", reporter.last_percent(), Some(e.to_string()));
                Err(e)
            }
        }
    }
}
