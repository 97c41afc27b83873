use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::model::Encoding;

/// Effective format for requests that arrive with a corrupted `video/<file>.m3u8` value.
pub const M3U8_MEDIA_TYPE: &str = "video/m3u8";

fn insecure_scheme() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^htt?p:").expect("valid regex"))
}

fn file_extension() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.*)\.[^./]+$").expect("valid regex"))
}

fn malformed_m3u8() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"video/(.*\.m3u8)$").expect("valid regex"))
}

fn last_path_segment() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/[^/]+$").expect("valid regex"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FinishOptions {
    pub allow_insecure: bool,
    pub png_poster: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot derive a poster image from {url}: no file extension")]
pub struct PosterError {
    pub url: String,
}

/// The chosen encoding as handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedEncoding {
    #[serde(flatten)]
    pub encoding: Encoding,
    pub display_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
}

pub fn force_https(url: &str) -> String {
    insecure_scheme().replace(url, "https:").into_owned()
}

pub fn poster_url(url: &str, png: bool) -> Result<String, PosterError> {
    let suffix = if png { "_poster.png" } else { "_poster.jpg" };
    file_extension()
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|stem| format!("{}{suffix}", stem.as_str()))
        .ok_or_else(|| PosterError {
            url: url.to_string(),
        })
}

/// Returns the file name captured from a `video/<file>.m3u8` format value.
pub fn detect_malformed_m3u8(format: &str) -> Option<String> {
    malformed_m3u8()
        .captures(format)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
}

pub fn replace_url_filename(url: &str, filename: &str) -> String {
    last_path_segment()
        .replace(url, regex::NoExpand(&format!("/{filename}")))
        .into_owned()
}

/// URL scheme first, then the poster (derived from the secured URL), then the file name override.
pub fn finish(
    mut encoding: Encoding,
    display_format: String,
    options: &FinishOptions,
    filename_override: Option<&str>,
) -> SelectedEncoding {
    if !options.allow_insecure {
        encoding.url = force_https(&encoding.url);
    }

    let poster_url = match poster_url(&encoding.url, options.png_poster) {
        Ok(url) => Some(url),
        Err(err) => {
            warn!(error = %err, encoding_id = encoding.encoding_id, "poster url unavailable");
            None
        }
    };

    if let Some(filename) = filename_override {
        encoding.url = replace_url_filename(&encoding.url, filename);
    }

    SelectedEncoding {
        encoding,
        display_format,
        poster_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn encoding(url: &str) -> Encoding {
        Encoding {
            encoding_id: 1,
            content_id: 2222,
            version_group_id: Some("KP-12345".into()),
            title_id: None,
            url: url.to_string(),
            media_type: "mp4".to_string(),
            is_mobile: false,
            multirate: false,
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            bitrate: 12345,
            audio_bitrate: 128,
            width: 1920,
            height: 1080,
            duration: 60.0,
            file_size: 1024,
            updated_at: Utc.with_ymd_and_hms(2016, 2, 3, 4, 5, 6).unwrap(),
            aspect_ratio: "16x9".into(),
        }
    }

    #[test]
    fn insecure_schemes_are_upgraded() {
        assert_eq!(
            force_https("http://cdn.example.com/a.mp4"),
            "https://cdn.example.com/a.mp4"
        );
        assert_eq!(force_https("htp://cdn.example.com/a"), "https://cdn.example.com/a");
        assert_eq!(
            force_https("https://cdn.example.com/a"),
            "https://cdn.example.com/a"
        );
        assert_eq!(force_https("rtmp://x/http:"), "rtmp://x/http:");
    }

    #[test]
    fn poster_replaces_extension() {
        assert_eq!(
            poster_url("https://cdn.example.com/v/clip.final.mp4", false).unwrap(),
            "https://cdn.example.com/v/clip.final_poster.jpg"
        );
        assert_eq!(
            poster_url("https://cdn.example.com/v/clip.m3u8", true).unwrap(),
            "https://cdn.example.com/v/clip_poster.png"
        );
        assert!(poster_url("https://cdn.example.com/v/noextension", false).is_err());
    }

    #[test]
    fn malformed_m3u8_detection() {
        assert_eq!(
            detect_malformed_m3u8("video/somefilename.m3u8").as_deref(),
            Some("somefilename.m3u8")
        );
        assert_eq!(detect_malformed_m3u8("video/m3u8"), None);
        assert_eq!(detect_malformed_m3u8("video/mp4"), None);
    }

    #[test]
    fn filename_override_replaces_last_segment() {
        assert_eq!(
            replace_url_filename("https://cdn.example.com/hls/master.m3u8", "some$1.m3u8"),
            "https://cdn.example.com/hls/some$1.m3u8"
        );
    }

    #[test]
    fn finish_applies_steps_in_order() {
        let options = FinishOptions::default();
        let selected = finish(
            encoding("http://cdn.example.com/hls/master.m3u8"),
            M3U8_MEDIA_TYPE.to_string(),
            &options,
            Some("somefilename.m3u8"),
        );
        assert_eq!(
            selected.encoding.url,
            "https://cdn.example.com/hls/somefilename.m3u8"
        );
        assert_eq!(
            selected.poster_url.as_deref(),
            Some("https://cdn.example.com/hls/master_poster.jpg")
        );
        assert_eq!(selected.display_format, M3U8_MEDIA_TYPE);
    }

    #[test]
    fn insecure_urls_kept_when_allowed() {
        let options = FinishOptions {
            allow_insecure: true,
            png_poster: false,
        };
        let selected = finish(
            encoding("http://cdn.example.com/noext"),
            "mp4".into(),
            &options,
            None,
        );
        assert_eq!(selected.encoding.url, "http://cdn.example.com/noext");
        assert_eq!(selected.poster_url, None);
    }

    #[test]
    fn selected_encoding_serializes_flat() {
        let selected = finish(
            encoding("https://cdn.example.com/a.mp4"),
            "video/mp4".into(),
            &FinishOptions::default(),
            None,
        );
        let json = serde_json::to_value(&selected).unwrap();
        assert_eq!(json["display_format"], "video/mp4");
        assert_eq!(json["bitrate"], 12345);
        assert_eq!(json["poster_url"], "https://cdn.example.com/a_poster.jpg");
    }
}
