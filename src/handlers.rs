// src/handlers.rs
use crate::{AppState, errors::CollageError, models::*};
use actix_multipart::Multipart;
use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use actix_web::{HttpResponse, web};
use bytes::Bytes;
use futures_util::TryStreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

const MIN_SIDE: u32 = 256;
const MAX_SIDE: u32 = 2048;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/compose", web::post().to(compose))
            .route("/compose/stream", web::post().to(compose_stream)),
    );
}

fn parse_side(name: &str, value: &str) -> Result<u32, CollageError> {
    let side: u32 = value
        .trim()
        .parse()
        .map_err(|_| CollageError::Validation(format!("{} must be an integer", name)))?;
    if !(MIN_SIDE..=MAX_SIDE).contains(&side) {
        return Err(CollageError::Validation(format!(
            "{} must be between {} and {}",
            name, MIN_SIDE, MAX_SIDE
        )));
    }
    Ok(side)
}

/// Read the multipart form into a `GenerateRequest`.
pub async fn parse_compose_form(mut payload: Multipart) -> Result<GenerateRequest, CollageError> {
    let bad_form = |e: actix_multipart::MultipartError| {
        CollageError::Validation(format!("Malformed multipart body: {}", e))
    };

    let mut req = GenerateRequest::default();
    let mut prompt = None;

    while let Some(mut field) = payload.try_next().await.map_err(bad_form)? {
        let content_disposition = field.content_disposition();
        let name = content_disposition.get_name().unwrap_or_default().to_string();
        let filename = content_disposition.get_filename().map(String::from);

        let content_type = field
            .content_type()
            .map(|ct| ct.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(bad_form)? {
            data.extend_from_slice(&chunk);
        }

        if name == "files" {
            if req.files.len() >= MAX_UPLOADS {
                return Err(CollageError::Validation(format!(
                    "At most {} files are allowed",
                    MAX_UPLOADS
                )));
            }
            req.files.push(UploadedFile {
                filename: filename.unwrap_or_else(|| format!("upload-{}", req.files.len())),
                content_type,
                data: Bytes::from(data),
            });
            continue;
        }

        let value = String::from_utf8(data)
            .map_err(|_| CollageError::Validation(format!("{} must be UTF-8 text", name)))?;
        let optional = || Some(value.clone()).filter(|v| !v.trim().is_empty());

        match name.as_str() {
            "prompt" => prompt = Some(value),
            "provider" => req.provider = optional(),
            "style" => req.style = optional(),
            "templateId" => req.template_id = optional(),
            "dateText" => req.date_text = optional(),
            "titleText" => req.title_text = optional(),
            "bodyText" => req.body_text = optional(),
            "width" => req.width = Some(parse_side("width", &value)?),
            "height" => req.height = Some(parse_side("height", &value)?),
            // Accepted for client compatibility; both modes run the same pipeline.
            "mode" => {
                if !matches!(value.trim(), "compose" | "generate") {
                    return Err(CollageError::Validation(
                        "mode must be one of: compose, generate".to_string(),
                    ));
                }
            }
            other => log::debug!("Ignoring unknown form field {}", other),
        }
    }

    req.prompt = prompt.ok_or_else(|| CollageError::Validation("prompt is required".to_string()))?;
    Ok(req)
}

pub async fn compose(
    payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, CollageError> {
    let req = parse_compose_form(payload).await?;

    let result = data.collage.generate(req, None).await.inspect_err(|e| {
        log::error!("Compose request failed: {} ({})", e, e.code());
    })?;

    Ok(HttpResponse::Ok().json(GenerateResponse::from(result)))
}

pub fn sse_event<T: Serialize>(event: &str, data: &T) -> Bytes {
    let payload = serde_json::to_string(data).unwrap_or_else(|_| "null".to_string());
    Bytes::from(format!("event: {}\ndata: {}\n\n", event, payload))
}

pub async fn compose_stream(
    payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, CollageError> {
    let req = parse_compose_form(payload).await?;

    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, Infallible>>();
    let _ = tx.send(Ok(sse_event(
        "progress",
        &ProgressEvent {
            stage: "accepted".to_string(),
            percent: 0.0,
            message: Some("Request accepted".to_string()),
        },
    )));

    let collage = data.collage.clone();
    actix_web::rt::spawn(async move {
        let progress_tx = tx.clone();
        // A closed channel means the client left; the run continues silently.
        let sink: crate::services::ProgressSink = Arc::new(move |event: ProgressEvent| {
            let _ = progress_tx.send(Ok(sse_event("progress", &event)));
        });

        let frame = match collage.generate(req, Some(sink)).await {
            Ok(result) => sse_event("done", &GenerateResponse::from(result)),
            Err(e) => {
                log::error!("Streamed compose failed: {} ({})", e, e.code());
                sse_event("error", &e.to_json())
            }
        };
        let _ = tx.send(Ok(frame));
    });

    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(UnboundedReceiverStream::new(rx)))
}
