use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::{StudioError, StudioResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageAspectRatio {
    #[default]
    Square,
    Landscape,
    Portrait,
    Classic,
    ClassicPortrait,
}

impl ImageAspectRatio {
    pub const ALL: [ImageAspectRatio; 5] = [
        ImageAspectRatio::Square,
        ImageAspectRatio::Landscape,
        ImageAspectRatio::Portrait,
        ImageAspectRatio::Classic,
        ImageAspectRatio::ClassicPortrait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Classic => "4:3",
            Self::ClassicPortrait => "3:4",
        }
    }
}

impl FromStr for ImageAspectRatio {
    type Err = StudioError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim().replace('/', ":");
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == value)
            .ok_or_else(|| {
                StudioError::validation(format!(
                    "Unsupported image aspect ratio '{raw}' (expected one of 1:1, 16:9, 9:16, 4:3, 3:4)."
                ))
            })
    }
}

impl fmt::Display for ImageAspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoAspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl VideoAspectRatio {
    pub const ALL: [VideoAspectRatio; 2] = [VideoAspectRatio::Landscape, VideoAspectRatio::Portrait];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
        }
    }
}

impl FromStr for VideoAspectRatio {
    type Err = StudioError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim().replace('/', ":");
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == value)
            .ok_or_else(|| {
                StudioError::validation(format!(
                    "Unsupported video aspect ratio '{raw}' (expected 16:9 or 9:16)."
                ))
            })
    }
}

impl fmt::Display for VideoAspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local-only reference used to display a user-supplied file.
///
/// Deliberately not `Serialize`: it must never end up in a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewHandle {
    path: PathBuf,
}

impl PreviewHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The `{data, mimeType}` part that travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineData<'a> {
    pub data: &'a str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'a str,
}

/// A user-supplied binary prepared for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    content_base64: String,
    media_type: String,
    preview: Option<PreviewHandle>,
}

impl MediaAsset {
    pub fn from_bytes(bytes: &[u8], media_type: impl Into<String>) -> Self {
        Self {
            content_base64: BASE64.encode(bytes),
            media_type: media_type.into(),
            preview: None,
        }
    }

    pub fn content_base64(&self) -> &str {
        &self.content_base64
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        self.preview.as_ref()
    }

    pub fn inline_data(&self) -> InlineData<'_> {
        InlineData {
            data: &self.content_base64,
            mime_type: &self.media_type,
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.content_base64)
    }
}

/// Reads `path` into a [`MediaAsset`].
///
/// No size or type checks are applied. Read failures propagate; a preview that
/// cannot be resolved is logged and left empty.
pub fn encode_file(path: &Path) -> StudioResult<MediaAsset> {
    let bytes = fs::read(path)?;
    let mut asset = MediaAsset::from_bytes(&bytes, media_type_for_path(path));
    asset.preview = match fs::canonicalize(path) {
        Ok(resolved) => Some(PreviewHandle { path: resolved }),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "preview unavailable");
            None
        }
    };
    Ok(asset)
}

pub fn media_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// File extension for a produced media type, used when writing results.
pub fn extension_for_media_type(media_type: &str) -> &'static str {
    let lowered = media_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("png") {
        return "png";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("webm") {
        return "webm";
    }
    if lowered.contains("quicktime") {
        return "mov";
    }
    if lowered.contains("mp4") || lowered.starts_with("video/") {
        return "mp4";
    }
    "bin"
}

/// Bytes fetched from a produced media location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Location without credentials attached.
    pub source_uri: String,
}

impl ResolvedMedia {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.bytes))
    }

    /// Writes the bytes to `<dir>/<stem>.<ext>` and returns the path.
    pub fn write_to(&self, dir: &Path, stem: &str) -> StudioResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "{stem}.{}",
            extension_for_media_type(&self.mime_type)
        ));
        fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

/// Splits a `data:<type>;base64,<payload>` URL into its media type and bytes.
pub fn decode_data_url(value: &str) -> StudioResult<(String, Vec<u8>)> {
    let rest = value
        .strip_prefix("data:")
        .ok_or_else(|| StudioError::validation("not a data URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| StudioError::validation("data URL missing payload"))?;
    let media_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| StudioError::validation("data URL is not base64 encoded"))?;
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .map_err(|err| StudioError::validation(format!("data URL payload invalid: {err}")))?;
    Ok((media_type.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_file_keeps_bytes_type_and_preview() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("cat.PNG");
        fs::write(&path, [0x89u8, b'P', b'N', b'G'])?;

        let asset = encode_file(&path)?;
        assert_eq!(asset.media_type(), "image/png");
        assert_eq!(asset.content_base64(), BASE64.encode([0x89u8, b'P', b'N', b'G']));
        let preview = asset.preview().map(PreviewHandle::path);
        assert_eq!(preview, Some(fs::canonicalize(&path)?.as_path()));
        Ok(())
    }

    #[test]
    fn encode_file_propagates_read_errors() {
        let err = encode_file(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, StudioError::Io(_)));
    }

    #[test]
    fn inline_data_never_carries_the_preview() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("frame.jpg");
        fs::write(&path, b"jpeg-bytes")?;
        let asset = encode_file(&path)?;

        let wire = serde_json::to_value(asset.inline_data())?;
        let text = wire.to_string();
        assert_eq!(wire["mimeType"], "image/jpeg");
        assert!(!text.contains("frame.jpg"));
        assert_eq!(wire.as_object().map(|obj| obj.len()), Some(2));
        Ok(())
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        assert_eq!(
            media_type_for_path(Path::new("notes.xyz")),
            "application/octet-stream"
        );
        assert_eq!(media_type_for_path(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn aspect_ratios_parse_within_their_domains() {
        assert_eq!("4/3".parse::<ImageAspectRatio>().ok(), Some(ImageAspectRatio::Classic));
        assert_eq!("9:16".parse::<VideoAspectRatio>().ok(), Some(VideoAspectRatio::Portrait));
        assert!("1:1".parse::<VideoAspectRatio>().is_err());
        assert!("21:9".parse::<ImageAspectRatio>().unwrap_err().is_validation());
        assert_eq!(serde_json::to_value(VideoAspectRatio::Landscape).ok(), Some("16:9".into()));
    }

    #[test]
    fn data_url_round_trips_through_decoder() -> anyhow::Result<()> {
        let asset = MediaAsset::from_bytes(b"abc", "image/webp");
        let (media_type, bytes) = decode_data_url(&asset.data_url())?;
        assert_eq!(media_type, "image/webp");
        assert_eq!(bytes, b"abc");
        assert!(decode_data_url("https://example.com/a.png").is_err());
        Ok(())
    }

    #[test]
    fn resolved_media_is_written_with_a_matching_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let media = ResolvedMedia {
            bytes: b"mp4-bytes".to_vec(),
            mime_type: "video/mp4".to_string(),
            source_uri: "https://example.com/files/abc:download".to_string(),
        };
        let path = media.write_to(&temp.path().join("out"), "video-0")?;
        assert_eq!(path.file_name().and_then(|name| name.to_str()), Some("video-0.mp4"));
        assert_eq!(fs::read(&path)?, b"mp4-bytes");
        assert!(media.data_url().starts_with("data:video/mp4;base64,"));
        Ok(())
    }
}
