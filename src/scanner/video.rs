//! Video metadata from ffprobe, plus frame thumbnails via ffmpeg.

use chrono::NaiveDateTime;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use super::dates::parse_loose_date;
use super::metadata::{ExtractJob, Extracted, Extractor, ThumbnailOutcome};
use super::thumbnails::ThumbnailStore;
use crate::db::MetaValue;
use crate::error::{PipelineError, Result};
use crate::tools::{FrameEncoder, MediaProber, ProbeOutput};

/// Frame rate from a rational such as `30000/1001`, rounded to whole frames.
pub fn parse_fps(rate: &str) -> Option<i64> {
    let (num, den) = rate.trim().split_once('/')?;
    let num: i64 = num.trim().parse().ok()?;
    let den: i64 = den.trim().parse().ok()?;
    if den == 0 {
        return None;
    }
    Some((num as f64 / den as f64).round() as i64)
}

/// Vendor tags that ffprobe only reports as free-form key/value text.
///
/// Phones store these under keys such as `com.apple.quicktime.make` or
/// `com.android.manufacturer`. The scan works on JSON (`"key": "value"`)
/// and on plain `key: value` lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorTags {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub location: Option<(f64, f64)>,
    pub creation_time: Option<NaiveDateTime>,
}

struct VendorPatterns {
    manufacturer: Regex,
    model: Regex,
    location: Regex,
    creation: Regex,
}

fn key_value(keys: &str, value: &str) -> Regex {
    Regex::new(&format!(r#"(?mi)"?\b(?:{keys})\b"?\s*[:=]\s*"?{value}"#)).expect("vendor tag pattern")
}

fn vendor_patterns() -> &'static VendorPatterns {
    static PATTERNS: OnceLock<VendorPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| VendorPatterns {
        manufacturer: key_value(
            r"com\.android\.manufacturer|com\.apple\.quicktime\.make|manufacturer|make",
            r#"([^"\r\n,]+)"#,
        ),
        model: key_value(
            r"com\.android\.model|com\.apple\.quicktime\.model|model",
            r#"([^"\r\n,]+)"#,
        ),
        location: key_value(
            r"com\.apple\.quicktime\.location\.ISO6709|location-eng|location",
            r"([+-][0-9]+(?:\.[0-9]+)?)([+-][0-9]+(?:\.[0-9]+)?)",
        ),
        creation: key_value(
            r"com\.apple\.quicktime\.creationdate|creationdate|date",
            r#"([^"\r\n,]+)"#,
        ),
    })
}

impl VendorTags {
    /// Scan raw probe output. Never fails; unknown layouts yield nothing.
    pub fn scrape(raw: &str) -> Self {
        let patterns = vendor_patterns();
        let text = |re: &Regex| {
            re.captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let location = patterns.location.captures(raw).and_then(|c| {
            let latitude: f64 = c.get(1)?.as_str().parse().ok()?;
            let longitude: f64 = c.get(2)?.as_str().parse().ok()?;
            let valid = (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude);
            valid.then_some((latitude, longitude))
        });

        Self {
            manufacturer: text(&patterns.manufacturer),
            model: text(&patterns.model),
            location,
            creation_time: text(&patterns.creation).as_deref().and_then(parse_loose_date),
        }
    }
}

/// Normalize one probe result into stored tags and a content date.
///
/// Fails when the container has no streams at all or no video stream.
pub fn describe_video(probe: &ProbeOutput) -> Result<(Vec<(String, MetaValue)>, Option<NaiveDateTime>)> {
    let data = &probe.data;
    if data.streams.is_empty() {
        return Err(PipelineError::Probe("no readable streams".to_string()));
    }
    let stream = data
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| PipelineError::Probe("no video stream".to_string()))?;
    let format = data.format.as_ref();

    let mut tags = Vec::new();
    let mut text = |key: &str, value: Option<&String>| {
        if let Some(v) = value.map(|v| v.trim()).filter(|v| !v.is_empty()) {
            tags.push((key.to_string(), MetaValue::String(v.to_string())));
        }
    };
    text("language", stream.tags.get("language"));
    text("codec_name", stream.codec_name.as_ref());
    text("codec_long_name", stream.codec_long_name.as_ref());

    if let Some(w) = stream.width {
        tags.push(("width".to_string(), MetaValue::Int(w)));
    }
    if let Some(h) = stream.height {
        tags.push(("height".to_string(), MetaValue::Int(h)));
    }

    let duration = stream
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| format.and_then(|f| f.duration.as_deref()?.parse().ok()));
    if let Some(d) = duration {
        tags.push(("duration".to_string(), MetaValue::Float(d)));
    }

    let bit_rate = stream
        .bit_rate
        .as_deref()
        .and_then(|b| b.parse::<i64>().ok())
        .or_else(|| format.and_then(|f| f.bit_rate.as_deref()?.parse().ok()));
    if let Some(b) = bit_rate {
        tags.push(("bit_rate".to_string(), MetaValue::Int(b)));
    }

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_fps)
        .filter(|f| *f > 0)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(parse_fps));
    if let Some(f) = fps {
        tags.push(("fps".to_string(), MetaValue::Int(f)));
    }

    let vendor = VendorTags::scrape(&probe.raw);
    if let Some(make) = vendor.manufacturer {
        tags.push(("manufacturer".to_string(), MetaValue::String(make)));
    }
    if let Some(model) = vendor.model {
        tags.push(("model".to_string(), MetaValue::String(model)));
    }
    if let Some((latitude, longitude)) = vendor.location {
        tags.push((
            "gps_coordinates".to_string(),
            MetaValue::Location { latitude, longitude },
        ));
    }

    let primary = stream
        .tags
        .get("creation_time")
        .or_else(|| format.and_then(|f| f.tags.get("creation_time")))
        .and_then(|s| parse_loose_date(s));
    let content_date = primary.or(vendor.creation_time);
    if let Some(date) = content_date {
        tags.push(("creation_time".to_string(), MetaValue::DateTime(date)));
    }

    Ok((tags, content_date))
}

pub struct VideoExtractor {
    prober: Arc<dyn MediaProber>,
    encoder: Option<Arc<dyn FrameEncoder>>,
    store: ThumbnailStore,
}

impl VideoExtractor {
    pub fn new(
        prober: Arc<dyn MediaProber>,
        encoder: Option<Arc<dyn FrameEncoder>>,
        store: ThumbnailStore,
    ) -> Self {
        Self {
            prober,
            encoder,
            store,
        }
    }

    /// One frame per configured size. Sizes fail independently.
    fn generate_thumbnails(&self, file_id: &str, source: &Path) -> ThumbnailOutcome {
        let Some(encoder) = &self.encoder else {
            return ThumbnailOutcome::Skipped;
        };

        let mut generated = 0;
        let mut failed = 0;
        for &size in self.store.sizes() {
            let result = self
                .store
                .prepare_path(file_id, size)
                .and_then(|target| encoder.extract_frame(source, &target, size));
            match result {
                Ok(()) => generated += 1,
                Err(e) => {
                    warn!("Thumbnail {} for {} failed: {}", size, source.display(), e);
                    failed += 1;
                }
            }
        }
        ThumbnailOutcome::from_counts(generated, failed)
    }
}

impl Extractor for VideoExtractor {
    fn extract(&self, job: &ExtractJob<'_>) -> Result<Extracted> {
        let probe = self.prober.probe(&job.path)?;
        let (tags, content_date) = describe_video(&probe)?;
        debug!("{}: {} tags", job.file.path, tags.len());

        let thumbnails = self.generate_thumbnails(&job.file.id, &job.path);

        Ok(Extracted {
            tags,
            content_date,
            thumbnails,
        })
    }
}
