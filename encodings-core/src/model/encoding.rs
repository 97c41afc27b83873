use chrono::{DateTime, Utc};
use serde::Serialize;

use super::record::{DecodeError, FieldReader, RawRecord};

pub const FIELD_ENCODING_ID: &str = "encoding_id";
pub const FIELD_CONTENT_ID: &str = "content_id";
pub const FIELD_VERSION_GROUP_ID: &str = "version_id";
pub const FIELD_TITLE_ID: &str = "title_id";
pub const FIELD_URL: &str = "url";
pub const FIELD_MEDIA_TYPE: &str = "format";
pub const FIELD_MOBILE: &str = "mobile";
pub const FIELD_MULTIRATE: &str = "multirate";
pub const FIELD_VIDEO_CODEC: &str = "vcodec";
pub const FIELD_AUDIO_CODEC: &str = "acodec";
pub const FIELD_BITRATE: &str = "vbitrate";
pub const FIELD_AUDIO_BITRATE: &str = "abitrate";
pub const FIELD_WIDTH: &str = "frame_width";
pub const FIELD_HEIGHT: &str = "frame_height";
pub const FIELD_DURATION: &str = "duration";
pub const FIELD_FILE_SIZE: &str = "file_size";
pub const FIELD_UPDATED_AT: &str = "lastupdate";
pub const FIELD_ASPECT_RATIO: &str = "aspect";

pub const INDEX_CONTENT_ID: &str = "contentid";

/// One concrete rendition of a title.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encoding {
    pub encoding_id: i64,
    pub content_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_id: Option<i64>,
    pub url: String,
    pub media_type: String,
    pub is_mobile: bool,
    pub multirate: bool,
    pub video_codec: String,
    pub audio_codec: String,
    pub bitrate: i64,
    pub audio_bitrate: i64,
    pub width: i64,
    pub height: i64,
    pub duration: f64,
    pub file_size: i64,
    pub updated_at: DateTime<Utc>,
    pub aspect_ratio: String,
}

impl Encoding {
    /// Codec and bitrate fields default to empty or zero; everything else must be present.
    pub fn from_record(table: &str, record: &RawRecord) -> Result<Self, DecodeError> {
        let mut reader = FieldReader::new(table, record);
        let encoding_id = reader.integer(FIELD_ENCODING_ID);
        let content_id = reader.integer(FIELD_CONTENT_ID);
        let version_group_id = reader.optional_string(FIELD_VERSION_GROUP_ID);
        let title_id = reader.optional_integer(FIELD_TITLE_ID);
        let url = reader.non_empty_string(FIELD_URL);
        let media_type = reader.string(FIELD_MEDIA_TYPE);
        let is_mobile = reader.flag(FIELD_MOBILE);
        let multirate = reader.flag(FIELD_MULTIRATE);
        let video_codec = reader.optional_string(FIELD_VIDEO_CODEC);
        let audio_codec = reader.optional_string(FIELD_AUDIO_CODEC);
        let bitrate = reader.optional_integer(FIELD_BITRATE);
        let audio_bitrate = reader.optional_integer(FIELD_AUDIO_BITRATE);
        let width = reader.integer(FIELD_WIDTH);
        let height = reader.integer(FIELD_HEIGHT);
        let duration = reader.float(FIELD_DURATION);
        let file_size = reader.integer(FIELD_FILE_SIZE);
        let updated_at = reader.timestamp(FIELD_UPDATED_AT);
        let aspect_ratio = reader.string(FIELD_ASPECT_RATIO);
        reader.finish()?;

        Ok(Self {
            encoding_id: encoding_id.unwrap_or_default(),
            content_id: content_id.unwrap_or_default(),
            version_group_id,
            title_id,
            url: url.unwrap_or_default(),
            media_type: media_type.unwrap_or_default(),
            is_mobile: is_mobile.unwrap_or_default(),
            multirate: multirate.unwrap_or_default(),
            video_codec: video_codec.unwrap_or_default(),
            audio_codec: audio_codec.unwrap_or_default(),
            bitrate: bitrate.unwrap_or_default(),
            audio_bitrate: audio_bitrate.unwrap_or_default(),
            width: width.unwrap_or_default(),
            height: height.unwrap_or_default(),
            duration: duration.unwrap_or_default(),
            file_size: file_size.unwrap_or_default(),
            updated_at: updated_at.unwrap_or_default(),
            aspect_ratio: aspect_ratio.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::FieldProblem;
    use serde_json::json;

    fn sample() -> RawRecord {
        json!({
            "encoding_id": 9,
            "content_id": 2222,
            "version_id": "KP-12345",
            "url": "http://cdn.example.com/videos/mygreatvideo.mp4",
            "format": "mp4",
            "mobile": 0,
            "multirate": false,
            "vbitrate": 12345,
            "frame_width": 1920,
            "frame_height": 1080,
            "duration": 62.5,
            "file_size": 1048576,
            "lastupdate": "2016-02-03T04:05:06Z",
            "aspect": "16x9",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn optional_codec_fields_default() {
        let encoding = Encoding::from_record("encodings", &sample()).unwrap();
        assert_eq!(encoding.bitrate, 12345);
        assert_eq!(encoding.audio_bitrate, 0);
        assert_eq!(encoding.video_codec, "");
        assert_eq!(encoding.version_group_id.as_deref(), Some("KP-12345"));
        assert!(!encoding.is_mobile);
        assert_eq!(encoding.title_id, None);
    }

    #[test]
    fn missing_dimensions_are_reported_together() {
        let mut item = sample();
        item.remove(FIELD_WIDTH);
        item.remove(FIELD_HEIGHT);
        item.insert(FIELD_DURATION.to_string(), json!("long"));
        let err = Encoding::from_record("encodings", &item).unwrap_err();
        assert_eq!(err.problems.len(), 3);
        assert_eq!(err.problem(FIELD_WIDTH), Some(&FieldProblem::Missing));
        assert_eq!(err.problem(FIELD_HEIGHT), Some(&FieldProblem::Missing));
        assert_eq!(
            err.problem(FIELD_DURATION),
            Some(&FieldProblem::WrongType { expected: "number" })
        );
    }
}
