//! Attachment processing: download, auto-rotate, resize, WebP re-encode,
//! upload.
//!
//! The pipeline is stateless. Object keys are content-addressed
//! (`YYYY/MM/{sha256(webp)[..16]}.webp`, year and month from the source
//! message timestamp), so re-processing an unchanged attachment lands on
//! the same key and the rewritten HTML stays byte-stable across runs.

use crate::config::ImageConfig;
use crate::error::MediaError;
use crate::media::object_store::{ObjectStore, Upload};
use crate::platform::SourceAttachment;

use chrono::{DateTime, Datelike as _, Utc};
use futures::StreamExt as _;
use image::DynamicImage;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Extensions accepted for processing. Checked after the query string is
/// stripped.
const ALLOWED_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"];

/// One year; processed blobs are immutable.
const CACHE_CONTROL: &str = "max-age=31536000";

const WEBP_QUALITY: f32 = 85.0;

/// Result of processing one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// Download → transform → upload pipeline.
pub struct MediaPipeline {
    http: reqwest::Client,
    store: Arc<dyn ObjectStore>,
    limits: ImageConfig,
}

impl MediaPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, limits: ImageConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            limits,
        }
    }

    /// Process every attachment of a message. A failing attachment is
    /// logged and skipped; the caller persists the post without it.
    pub async fn process_attachments(
        &self,
        attachments: &[SourceAttachment],
        observed_at: DateTime<Utc>,
    ) -> Vec<ProcessedImage> {
        let mut processed = Vec::new();
        for attachment in attachments {
            match self.process_one(attachment, observed_at).await {
                Ok(image) => processed.push(image),
                Err(error) => {
                    tracing::warn!(%error, url = %attachment.url, "attachment skipped");
                }
            }
        }
        processed
    }

    async fn process_one(
        &self,
        attachment: &SourceAttachment,
        observed_at: DateTime<Utc>,
    ) -> Result<ProcessedImage, MediaError> {
        if extension(&attachment.url).is_none() {
            return Err(MediaError::UnsupportedExtension(attachment.url.clone()));
        }

        let bytes = self.download(&attachment.url).await?;
        let (webp, width, height) =
            transform(&bytes, self.limits.max_width, self.limits.max_height)?;

        let key = object_key(&webp, observed_at);
        let size_bytes = webp.len() as u64;

        let mut metadata = HashMap::new();
        metadata.insert("original-filename".to_string(), attachment.filename.clone());
        metadata.insert(
            "processed-at".to_string(),
            crate::store::cursor::format_iso_millis(Utc::now()),
        );

        let url = self
            .store
            .put(Upload {
                key,
                bytes: webp,
                content_type: "image/webp".into(),
                cache_control: CACHE_CONTROL.into(),
                metadata,
            })
            .await?;

        tracing::debug!(url = %url, width, height, size_bytes, "attachment processed");
        Ok(ProcessedImage {
            url,
            width,
            height,
            size_bytes,
        })
    }

    /// Streaming download bounded by the configured size cap.
    async fn download(&self, url: &str) -> Result<Vec<u8>, MediaError> {
        let limit = self.limits.max_bytes();

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| MediaError::Download(error.to_string()))?
            .error_for_status()
            .map_err(|error| MediaError::Download(error.to_string()))?;

        if response.content_length().is_some_and(|length| length > limit) {
            return Err(MediaError::TooLarge { limit_bytes: limit });
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| MediaError::Download(error.to_string()))?;
            if bytes.len() as u64 + chunk.len() as u64 > limit {
                return Err(MediaError::TooLarge { limit_bytes: limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }
}

/// The lowercase extension of a URL with the query string stripped, when
/// it is in the processing allowlist.
pub fn extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Content-addressed object key: `YYYY/MM/{sha256(content)[..16]}.webp`.
pub fn object_key(webp: &[u8], observed_at: DateTime<Utc>) -> String {
    let digest = Sha256::digest(webp);
    format!(
        "{:04}/{:02}/{}.webp",
        observed_at.year(),
        observed_at.month(),
        &hex::encode(digest)[..16]
    )
}

/// Decode, auto-rotate by EXIF orientation, strip metadata (implicit in
/// re-encoding), resize to fit inside the bounding box without
/// enlargement, and re-encode as lossy WebP.
pub fn transform(bytes: &[u8], max_w: u32, max_h: u32) -> Result<(Vec<u8>, u32, u32), MediaError> {
    let orientation = exif_orientation(bytes);

    let mut img =
        image::load_from_memory(bytes).map_err(|error| MediaError::Decode(error.to_string()))?;
    img = apply_orientation(img, orientation);

    if img.width() > max_w || img.height() > max_h {
        img = img.resize(max_w, max_h, image::imageops::FilterType::Lanczos3);
    }

    let (width, height) = (img.width(), img.height());
    let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
    let encoder = webp::Encoder::from_image(&rgba)
        .map_err(|error| MediaError::Encode(error.to_string()))?;
    let webp_bytes = encoder.encode(WEBP_QUALITY).to_vec();

    Ok((webp_bytes, width, height))
}

/// EXIF orientation value (1-8), defaulting to 1 when absent or
/// unreadable.
fn exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = std::io::Cursor::new(bytes);
    exif::Reader::new()
        .read_from_container(&mut cursor)
        .ok()
        .and_then(|data| {
            data.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
