use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a museum exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Object,
    Document,
    Photo,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArtifactKind::Object => "object",
            ArtifactKind::Document => "document",
            ArtifactKind::Photo => "photo",
        };
        f.pad(label)
    }
}

/// A single exhibit in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub name: String,
    /// Display year, free text ("1920", "c. 1890").
    pub year: String,
    pub kind: ArtifactKind,
    /// One-liner for listings and summaries.
    pub short_description: String,
    /// Full text shown in the detail view and sent as recognition context.
    pub description: String,
    /// Narration audio.
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    /// Fallback image; also the video poster.
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Artifact {
    /// Headline media for the detail view: the video when present, else the image.
    pub fn headline_media(&self) -> Option<HeadlineMedia<'_>> {
        match (&self.video_url, &self.image_url) {
            (Some(video), poster) => Some(HeadlineMedia::Video {
                url: video,
                poster: poster.as_deref(),
            }),
            (None, Some(image)) => Some(HeadlineMedia::Image { url: image }),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlineMedia<'a> {
    Video { url: &'a str, poster: Option<&'a str> },
    Image { url: &'a str },
}

/// Outcome of one recognition attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    pub confidence: f32,
}

impl Verdict {
    /// The not-found verdict with zero confidence.
    pub fn not_found() -> Self {
        Self {
            found: false,
            artifact_id: None,
            confidence: 0.0,
        }
    }

    pub fn matched(artifact_id: impl Into<String>, confidence: f32) -> Self {
        Self {
            found: true,
            artifact_id: Some(artifact_id.into()),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Mime type of an encoded still image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Jpeg,
    Png,
    Webp,
}

impl ImageMime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
            ImageMime::Webp => "image/webp",
        }
    }

    /// Parse the subtype of a `data:image/<subtype>` prefix.
    fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "jpeg" | "jpg" => Some(ImageMime::Jpeg),
            "png" => Some(ImageMime::Png),
            "webp" => Some(ImageMime::Webp),
            _ => None,
        }
    }

    /// Guess from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::from_subtype(&ext.to_ascii_lowercase())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unsupported data URL: {0}")]
    UnsupportedDataUrl(String),
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("empty image payload")]
    Empty,
}

/// An encoded still image ready for transmission.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime: ImageMime,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime", &self.mime.as_str())
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl EncodedImage {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            mime: ImageMime::Jpeg,
            bytes,
        }
    }

    /// Decode a `data:image/<fmt>;base64,` URL, or bare base64 (taken as JPEG).
    pub fn from_data_url(text: &str) -> Result<Self, ImageError> {
        let text = text.trim();
        let (mime, payload) = match text.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| ImageError::UnsupportedDataUrl(truncate(text)))?;
                let subtype = header
                    .strip_prefix("image/")
                    .and_then(|h| h.strip_suffix(";base64"))
                    .ok_or_else(|| ImageError::UnsupportedDataUrl(truncate(text)))?;
                let mime = ImageMime::from_subtype(subtype)
                    .ok_or_else(|| ImageError::UnsupportedDataUrl(truncate(text)))?;
                (mime, payload)
            }
            None => (ImageMime::Jpeg, text),
        };

        let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self { mime, bytes })
    }

    /// Raw base64 of the encoded bytes, without any data-URL prefix.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_prefix_is_stripped() {
        let img = EncodedImage::from_data_url("data:image/png;base64,AAEC").unwrap();
        assert_eq!(img.mime, ImageMime::Png);
        assert_eq!(img.bytes, vec![0, 1, 2]);
        assert_eq!(img.to_base64(), "AAEC");
    }

    #[test]
    fn test_bare_base64_is_jpeg() {
        let img = EncodedImage::from_data_url("/9j/").unwrap();
        assert_eq!(img.mime, ImageMime::Jpeg);
        assert_eq!(img.bytes, vec![0xff, 0xd8, 0xff]);
    }

    #[test]
    fn test_unsupported_data_url() {
        assert!(matches!(
            EncodedImage::from_data_url("data:image/gif;base64,AAEC"),
            Err(ImageError::UnsupportedDataUrl(_))
        ));
        assert!(matches!(
            EncodedImage::from_data_url("data:text/plain,hello"),
            Err(ImageError::UnsupportedDataUrl(_))
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(
            EncodedImage::from_data_url("data:image/jpeg;base64,"),
            Err(ImageError::Empty)
        ));
    }

    #[test]
    fn test_verdict_deserializes_null_id() {
        let v: Verdict =
            serde_json::from_str(r#"{"found":false,"artifactId":null,"confidence":0.1}"#).unwrap();
        assert!(!v.found);
        assert_eq!(v.artifact_id, None);
    }

    #[test]
    fn test_headline_prefers_video() {
        let mut artifact = Artifact {
            id: "a".into(),
            name: "A".into(),
            year: "1900".into(),
            kind: ArtifactKind::Photo,
            short_description: String::new(),
            description: String::new(),
            audio_url: None,
            video_url: Some("v.mp4".into()),
            image_url: Some("i.jpg".into()),
        };
        assert_eq!(
            artifact.headline_media(),
            Some(HeadlineMedia::Video {
                url: "v.mp4",
                poster: Some("i.jpg")
            })
        );
        artifact.video_url = None;
        assert_eq!(
            artifact.headline_media(),
            Some(HeadlineMedia::Image { url: "i.jpg" })
        );
        artifact.image_url = None;
        assert_eq!(artifact.headline_media(), None);
    }
}
