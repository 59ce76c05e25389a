//! Poster frame timing and the preview URL wire format.
//!
//! The encoded preview URL is consumed verbatim by the image transform
//! service behind `PREVIEW_URL_PREFIX`, so the JSON field order and spacing
//! produced here must not change.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

/// Key prefix poster frames are published under.
pub const POSTER_FRAME_PREFIX: &str = "posterFrames";

pub const PREVIEW_RESIZE_WIDTH: u32 = 600;
pub const PREVIEW_RESIZE_HEIGHT: u32 = 600;

const START_TIMESTAMP: &str = "00:00:00";
const MIN_POSTER_TIMESTAMP: &str = "00:00:03";
const MIN_POSTER_SECS: f64 = 4.0;

#[derive(Serialize)]
struct PreviewRequest<'a> {
    bucket: &'a str,
    key: &'a str,
    edits: Edits,
}

#[derive(Serialize)]
struct Edits {
    resize: Resize,
}

#[derive(Serialize)]
struct Resize {
    width: u32,
    height: u32,
    fit: &'static str,
}

/// Builds `<prefix><base64(json)>` for the given object.
pub fn preview_url(prefix: &str, bucket: &str, key: &str) -> String {
    let request = PreviewRequest {
        bucket,
        key,
        edits: Edits {
            resize: Resize {
                width: PREVIEW_RESIZE_WIDTH,
                height: PREVIEW_RESIZE_HEIGHT,
                fit: "inside",
            },
        },
    };
    // Serializing plain strings and integers cannot fail.
    let json = serde_json::to_string(&request).unwrap_or_default();
    format!("{prefix}{}", STANDARD.encode(json))
}

/// Seek position handed to the frame extractor.
///
/// With a percentage the frame is taken that far into the video, but never
/// earlier than three seconds in when the product lands under four seconds.
pub fn poster_timestamp(duration_secs: Option<f64>, preview_percent: Option<f64>) -> String {
    let (Some(duration), Some(percent)) = (duration_secs, preview_percent) else {
        return START_TIMESTAMP.to_string();
    };
    if percent == 0.0 || !percent.is_finite() || !duration.is_finite() {
        return START_TIMESTAMP.to_string();
    }

    let secs = duration * percent;
    if secs < MIN_POSTER_SECS {
        MIN_POSTER_TIMESTAMP.to_string()
    } else {
        format!("{secs}")
    }
}

/// `clips/a.b.mp4` becomes `posterFrames/clips/a_b.jpeg`.
pub fn poster_frame_key(file_key: &str) -> String {
    format!("{POSTER_FRAME_PREFIX}/{}.jpeg", poster_frame_base(file_key))
}

/// File name of the poster frame inside the local scratch directory.
pub fn poster_frame_file_name(file_key: &str) -> String {
    format!("{}.jpeg", poster_frame_base(file_key).replace('/', "_"))
}

fn poster_frame_base(file_key: &str) -> String {
    let mut parts: Vec<&str> = file_key.split('.').collect();
    if parts.len() > 1 {
        parts.pop();
    }
    parts.join("_")
}
