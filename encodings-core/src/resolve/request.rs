use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use serde::Serialize;

use super::equivalence::FormatEquivalenceCache;
use super::error::InvalidRequest;
use super::finisher::{detect_malformed_m3u8, FinishOptions, M3U8_MEDIA_TYPE};
use super::selector::{Bounds, SelectionCriteria};

pub const PARAM_FILENAME: &str = "file";
pub const PARAM_TITLE_ID: &str = "titleid";
pub const PARAM_FORMAT: &str = "format";
pub const PARAM_NEED_MOBILE: &str = "need_mobile";
pub const PARAM_MIN_BITRATE: &str = "minbitrate";
pub const PARAM_MAX_BITRATE: &str = "maxbitrate";
pub const PARAM_MIN_WIDTH: &str = "minwidth";
pub const PARAM_MAX_WIDTH: &str = "maxwidth";
pub const PARAM_MIN_HEIGHT: &str = "minheight";
pub const PARAM_MAX_HEIGHT: &str = "maxheight";
pub const PARAM_PNG: &str = "png";
pub const PARAM_ALLOW_INSECURE: &str = "allow_insecure";
pub const PARAM_ALLOW_OLD: &str = "allow_old";
pub const PARAM_POSTER: &str = "poster";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Identifier {
    Filename(String),
    TitleId(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestedFormat {
    pub media_type: String,
    /// Set when the client sent a corrupted `video/<file>.m3u8` format.
    pub filename_override: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveRequest {
    pub identifier: Identifier,
    pub format: Option<RequestedFormat>,
    pub need_mobile: bool,
    pub bitrate: Bounds,
    pub width: Bounds,
    pub height: Bounds,
    pub finish: FinishOptions,
    pub allow_old: bool,
    /// Only the poster URL is wanted; an encoding without one resolves to not-found.
    pub poster: bool,
}

impl ResolveRequest {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            format: None,
            need_mobile: false,
            bitrate: Bounds::default(),
            width: Bounds::default(),
            height: Bounds::default(),
            finish: FinishOptions::default(),
            allow_old: false,
            poster: false,
        }
    }

    /// Parses the query parameters of an incoming request. Validation happens here, before any
    /// store access.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, InvalidRequest> {
        let identifier = parse_identifier(params)?;
        let format = match params.get(PARAM_FORMAT) {
            Some(raw) => parse_format(raw)?,
            None => None,
        };

        let bound = |min: &str, max: &str| {
            Bounds::new(parse_number(params, min), parse_number(params, max))
        };
        Ok(Self {
            identifier,
            format,
            need_mobile: params.get(PARAM_NEED_MOBILE).map(String::as_str) == Some("true"),
            bitrate: bound(PARAM_MIN_BITRATE, PARAM_MAX_BITRATE),
            width: bound(PARAM_MIN_WIDTH, PARAM_MAX_WIDTH),
            height: bound(PARAM_MIN_HEIGHT, PARAM_MAX_HEIGHT),
            finish: FinishOptions {
                allow_insecure: params.contains_key(PARAM_ALLOW_INSECURE),
                png_poster: params.contains_key(PARAM_PNG),
            },
            allow_old: params.contains_key(PARAM_ALLOW_OLD),
            poster: params.contains_key(PARAM_POSTER),
        })
    }

    /// Expands the requested format through the equivalence cache.
    pub fn criteria(&self, equivalents: &FormatEquivalenceCache) -> SelectionCriteria {
        SelectionCriteria {
            formats: self
                .format
                .as_ref()
                .map(|format| equivalents.equivalents_for(&format.media_type))
                .unwrap_or_default(),
            need_mobile: self.need_mobile,
            bitrate: self.bitrate,
            width: self.width,
            height: self.height,
        }
    }

    pub fn filename_override(&self) -> Option<&str> {
        self.format
            .as_ref()
            .and_then(|format| format.filename_override.as_deref())
    }
}

/// The filename wins when both identifiers are supplied.
fn parse_identifier(params: &HashMap<String, String>) -> Result<Identifier, InvalidRequest> {
    if let Some(raw) = params.get(PARAM_FILENAME) {
        let value = query_unescape(raw).ok_or(InvalidRequest::UndecodableParameter {
            name: PARAM_FILENAME,
        })?;
        let value = value.trim();
        if value.is_empty() || value.contains(|c: char| c == ';' || c == '\'') {
            return Err(InvalidRequest::InvalidFilename);
        }
        return Ok(Identifier::Filename(value.to_string()));
    }

    if let Some(raw) = params.get(PARAM_TITLE_ID) {
        let value = query_unescape(raw).ok_or(InvalidRequest::UndecodableParameter {
            name: PARAM_TITLE_ID,
        })?;
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidRequest::InvalidNumericId);
        }
        let id = value
            .parse::<i64>()
            .map_err(|_| InvalidRequest::InvalidNumericId)?;
        return Ok(Identifier::TitleId(id));
    }

    Err(InvalidRequest::NoSearchCriteria)
}

fn parse_format(raw: &str) -> Result<Option<RequestedFormat>, InvalidRequest> {
    if let Some(filename) = detect_malformed_m3u8(raw) {
        return Ok(Some(RequestedFormat {
            media_type: M3U8_MEDIA_TYPE.to_string(),
            filename_override: Some(filename),
        }));
    }
    let media_type = query_unescape(raw).ok_or(InvalidRequest::UndecodableParameter {
        name: PARAM_FORMAT,
    })?;
    let media_type = media_type.trim();
    if media_type.is_empty() {
        return Ok(None);
    }
    Ok(Some(RequestedFormat {
        media_type: media_type.to_string(),
        filename_override: None,
    }))
}

/// Unparsable numbers read as zero, which leaves the bound open.
fn parse_number(params: &HashMap<String, String>, name: &str) -> i64 {
    params
        .get(name)
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

/// Decodes a query-string value: `+` is a space and every `%` must start a two-digit hex escape.
pub fn query_unescape(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let escape = bytes.get(idx + 1..idx + 3)?;
            if !escape.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            idx += 3;
        } else {
            idx += 1;
        }
    }
    let spaced = value.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}
