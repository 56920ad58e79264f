//! Media request adaptation: multipart video-generation requests mapped onto
//! a long-running third-party provider operation.
//!
//! The inbound shape (a structured brief plus uploaded product images) is
//! validated and composed into a single generation prompt; the provider side
//! is a start-then-poll operation with a hard deadline. Client mistakes are
//! `InvalidRequest`, provider trouble is `Provider`, and the two never mix.

mod provider;

pub use provider::{HttpVideoProvider, VideoProvider};

use crate::trace::TraceRecorder;
use crate::{RelayError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Output aspect ratios the provider accepts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
        }
    }
}

/// Provider ceiling on clip length, seconds
const MAX_DURATION_SECONDS: u32 = 8;

/// The structured part of a video-generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRequest {
    pub business_type: String,
    pub product_description: String,
    pub aspect_ratio: AspectRatio,
    pub duration_seconds: u32,
    /// Reference imagery by URL, folded into the prompt text
    #[serde(default)]
    pub product_image_urls: Vec<String>,
    #[serde(default)]
    pub creative_direction: Option<String>,
    #[serde(default)]
    pub extra_instructions: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
}

impl VideoRequest {
    /// Reject malformed briefs before any provider traffic
    pub fn validate(&self) -> Result<()> {
        if self.business_type.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "business_type must be non-empty".into(),
            ));
        }
        if self.product_description.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "product_description must be non-empty".into(),
            ));
        }
        if self.duration_seconds == 0 || self.duration_seconds > MAX_DURATION_SECONDS {
            return Err(RelayError::InvalidRequest(format!(
                "duration_seconds must be between 1 and {}",
                MAX_DURATION_SECONDS
            )));
        }
        Ok(())
    }
}

/// One uploaded image part, as received from the transport
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

/// An image validated and encoded for the provider payload
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub mime_type: String,
    pub data_base64: String,
}

/// Validate and encode an uploaded image. Empty content and unrecognizable
/// types are client errors.
pub fn prepare_image(image: &UploadedImage) -> Result<PreparedImage> {
    if image.content.is_empty() {
        return Err(RelayError::InvalidRequest(format!(
            "Uploaded image '{}' is empty",
            image.filename
        )));
    }
    let mime_type = image
        .content_type
        .clone()
        .filter(|t| t.starts_with("image/"))
        .or_else(|| guess_mime_type(&image.filename).map(|s| s.to_string()))
        .ok_or_else(|| {
            RelayError::InvalidRequest(format!(
                "Could not determine image type for '{}'",
                image.filename
            ))
        })?;
    Ok(PreparedImage {
        mime_type,
        data_base64: base64::engine::general_purpose::STANDARD.encode(&image.content),
    })
}

pub fn guess_mime_type(filename: &str) -> Option<&'static str> {
    let lower = filename.to_ascii_lowercase();
    let ext = lower.rsplit('.').next()?;
    match ext {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Compose the generation prompt from the brief. The provider receives one
/// flat text prompt; structure from the brief is folded in as labeled lines.
pub fn compose_prompt(request: &VideoRequest) -> String {
    let mut prompt = format!(
        "Create a short promotional video for a {} business. Product: {}. \
         The clip should feel polished and commercial, with clean lighting \
         and smooth camera motion.",
        request.business_type.trim(),
        request.product_description.trim()
    );
    if let Some(direction) = request
        .creative_direction
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        prompt.push_str(&format!(" Creative direction: {}.", direction.trim()));
    }
    if let Some(extra) = request
        .extra_instructions
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        prompt.push_str(&format!(" Additional instructions: {}.", extra.trim()));
    }
    if !request.product_image_urls.is_empty() {
        prompt.push_str(&format!(
            " Reference imagery: {}.",
            request.product_image_urls.join(", ")
        ));
    }
    prompt
}

/// Everything the provider needs to start a generation
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub duration_seconds: u32,
    pub negative_prompt: Option<String>,
    pub image: Option<PreparedImage>,
}

/// Snapshot of a long-running provider operation
#[derive(Debug, Clone)]
pub struct VideoOperation {
    pub id: String,
    pub done: bool,
    pub video_uri: Option<String>,
    pub error: Option<String>,
}

/// Outcome of a completed generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoResult {
    pub operation_id: String,
    pub video_uri: String,
    /// The composed prompt the provider was given
    pub prompt: String,
}

/// Drives a video generation end to end: validate, compose, start, poll.
pub struct VideoService {
    provider: Arc<dyn VideoProvider>,
    recorder: TraceRecorder,
    poll_timeout: Duration,
    poll_interval: Duration,
}

impl VideoService {
    pub fn new(
        provider: Arc<dyn VideoProvider>,
        recorder: TraceRecorder,
        poll_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provider,
            recorder,
            poll_timeout,
            poll_interval,
        }
    }

    /// Generate a video for the given brief and images.
    /// Contract:
    /// - the brief and every image are validated before provider traffic;
    ///   at least one image is required
    /// - only the first image seeds the generation; extras are ignored
    /// - polling stops at the deadline; an unfinished operation is a
    ///   Provider error, as is a finished one with no video
    pub async fn generate(
        &self,
        request: &VideoRequest,
        images: &[UploadedImage],
    ) -> Result<VideoResult> {
        request.validate()?;
        if images.is_empty() {
            return Err(RelayError::InvalidRequest(
                "At least one product image is required".into(),
            ));
        }
        let prepared: Vec<PreparedImage> =
            images.iter().map(prepare_image).collect::<Result<_>>()?;
        if prepared.len() > 1 {
            debug!(target = "media", extra = prepared.len() - 1, "Ignoring extra seed images");
        }

        let prompt = compose_prompt(request);
        let job = VideoJob {
            prompt: prompt.clone(),
            aspect_ratio: request.aspect_ratio,
            duration_seconds: request.duration_seconds,
            negative_prompt: request.negative_prompt.clone(),
            image: prepared.into_iter().next(),
        };

        let mut span = self.recorder.start_span(
            "video_generation",
            json!({
                "business_type": request.business_type,
                "aspect_ratio": request.aspect_ratio.as_str(),
                "duration_seconds": request.duration_seconds,
            }),
        );

        let result = self.run(job, prompt).await;
        match &result {
            Ok(r) => {
                span.annotate("operation_id", json!(r.operation_id));
                span.end_ok(json!({"video_uri": r.video_uri}));
            }
            Err(e) => span.end_err(&e.to_string()),
        }
        result
    }

    async fn run(&self, job: VideoJob, prompt: String) -> Result<VideoResult> {
        let mut operation = self.provider.start(&job).await?;
        info!(target = "media", operation = %operation.id, "Video generation started");

        let deadline = Instant::now() + self.poll_timeout;
        while !operation.done {
            if Instant::now() >= deadline {
                warn!(target = "media", operation = %operation.id, "Video generation timed out");
                return Err(RelayError::Provider(format!(
                    "Video generation did not finish within {}s",
                    self.poll_timeout.as_secs()
                )));
            }
            sleep(self.poll_interval).await;
            operation = self.provider.poll(&operation.id).await?;
        }

        if let Some(error) = operation.error {
            return Err(RelayError::Provider(format!(
                "Video generation failed: {}",
                error
            )));
        }
        let video_uri = operation.video_uri.ok_or_else(|| {
            RelayError::Provider("Provider finished without returning a video".into())
        })?;
        Ok(VideoResult {
            operation_id: operation.id,
            video_uri,
            prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> VideoRequest {
        VideoRequest {
            business_type: "coffee shop".into(),
            product_description: "single-origin espresso".into(),
            aspect_ratio: AspectRatio::Portrait,
            duration_seconds: 6,
            product_image_urls: vec![],
            creative_direction: Some("warm morning light".into()),
            extra_instructions: None,
            negative_prompt: Some("text overlays".into()),
        }
    }

    fn seed_image() -> UploadedImage {
        UploadedImage {
            filename: "product.png".into(),
            content: vec![1, 2, 3],
            content_type: Some("image/png".into()),
        }
    }

    /// Provider that reports done after a configurable number of polls
    struct CountingProvider {
        polls_until_done: usize,
        polls: AtomicUsize,
        uri: Option<String>,
    }

    #[async_trait]
    impl VideoProvider for CountingProvider {
        async fn start(&self, _job: &VideoJob) -> Result<VideoOperation> {
            Ok(VideoOperation {
                id: "op-1".into(),
                done: self.polls_until_done == 0,
                video_uri: if self.polls_until_done == 0 {
                    self.uri.clone()
                } else {
                    None
                },
                error: None,
            })
        }

        async fn poll(&self, id: &str) -> Result<VideoOperation> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let done = n >= self.polls_until_done;
            Ok(VideoOperation {
                id: id.to_string(),
                done,
                video_uri: if done { self.uri.clone() } else { None },
                error: None,
            })
        }
    }

    fn service(provider: CountingProvider) -> VideoService {
        VideoService::new(
            Arc::new(provider),
            TraceRecorder::disabled(),
            Duration::from_millis(200),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_generate_polls_until_done() {
        let svc = service(CountingProvider {
            polls_until_done: 2,
            polls: AtomicUsize::new(0),
            uri: Some("https://videos/clip.mp4".into()),
        });

        let result = svc.generate(&request(), &[seed_image()]).await.unwrap();
        assert_eq!(result.video_uri, "https://videos/clip.mp4");
        assert_eq!(result.operation_id, "op-1");
        assert!(result.prompt.contains("coffee shop"));
    }

    #[tokio::test]
    async fn test_generate_times_out() {
        let svc = service(CountingProvider {
            polls_until_done: usize::MAX,
            polls: AtomicUsize::new(0),
            uri: None,
        });

        let err = svc.generate(&request(), &[seed_image()]).await.unwrap_err();
        assert!(matches!(err, RelayError::Provider(_)));
    }

    #[tokio::test]
    async fn test_done_without_video_is_provider_error() {
        let svc = service(CountingProvider {
            polls_until_done: 0,
            polls: AtomicUsize::new(0),
            uri: None,
        });

        let err = svc.generate(&request(), &[seed_image()]).await.unwrap_err();
        assert!(matches!(err, RelayError::Provider(_)));
    }

    #[tokio::test]
    async fn test_empty_image_set_rejected() {
        let svc = service(CountingProvider {
            polls_until_done: 0,
            polls: AtomicUsize::new(0),
            uri: Some("unused".into()),
        });

        let err = svc.generate(&request(), &[]).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_invalid_brief_rejected_before_provider() {
        let svc = service(CountingProvider {
            polls_until_done: 0,
            polls: AtomicUsize::new(0),
            uri: Some("unused".into()),
        });

        let mut bad = request();
        bad.product_description = "  ".into();
        let err = svc.generate(&bad, &[seed_image()]).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));

        let mut bad = request();
        bad.duration_seconds = 0;
        assert!(matches!(
            svc.generate(&bad, &[seed_image()]).await.unwrap_err(),
            RelayError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_validate_duration_ceiling() {
        let mut req = request();
        req.duration_seconds = MAX_DURATION_SECONDS;
        assert!(req.validate().is_ok());
        req.duration_seconds = MAX_DURATION_SECONDS + 1;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_prepare_image_from_content_type() {
        let img = UploadedImage {
            filename: "photo".into(),
            content: vec![1, 2, 3],
            content_type: Some("image/png".into()),
        };
        let prepared = prepare_image(&img).unwrap();
        assert_eq!(prepared.mime_type, "image/png");
        assert_eq!(prepared.data_base64, "AQID");
    }

    #[test]
    fn test_prepare_image_guesses_from_filename() {
        let img = UploadedImage {
            filename: "Photo.JPG".into(),
            content: vec![1],
            content_type: Some("application/octet-stream".into()),
        };
        assert_eq!(prepare_image(&img).unwrap().mime_type, "image/jpeg");
    }

    #[test]
    fn test_prepare_image_rejects_empty_and_unknown() {
        let empty = UploadedImage {
            filename: "a.png".into(),
            content: vec![],
            content_type: None,
        };
        assert!(matches!(
            prepare_image(&empty).unwrap_err(),
            RelayError::InvalidRequest(_)
        ));

        let unknown = UploadedImage {
            filename: "a.pdf".into(),
            content: vec![1],
            content_type: None,
        };
        assert!(matches!(
            prepare_image(&unknown).unwrap_err(),
            RelayError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_compose_prompt_folds_brief() {
        let prompt = compose_prompt(&request());
        assert!(prompt.contains("coffee shop"));
        assert!(prompt.contains("single-origin espresso"));
        assert!(prompt.contains("warm morning light"));
        assert!(!prompt.contains("Additional instructions"));
    }

    #[test]
    fn test_aspect_ratio_serde() {
        let req = request();
        let val = serde_json::to_value(&req).unwrap();
        assert_eq!(val["aspect_ratio"], "9:16");
        let back: VideoRequest = serde_json::from_value(val).unwrap();
        assert_eq!(back.aspect_ratio, AspectRatio::Portrait);
    }
}
