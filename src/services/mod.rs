// src/services/mod.rs
pub mod collage_service;
pub mod compositor;
pub mod doubao;
pub mod frame;
pub mod geometry;
pub mod image_processor;
pub mod layout;
pub mod llm_service;
pub mod openai;
pub mod text_overlay;

pub use collage_service::{CollageService, ProgressSink};
