use image::imageops::FilterType;
use image::DynamicImage;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, warn};

use super::dates::parse_loose_date;
use super::metadata::{ExtractJob, Extracted, Extractor, ThumbnailOutcome};
use super::thumbnails::ThumbnailStore;
use crate::db::MetaValue;
use crate::error::Result;

/// Still images: EXIF tags plus scaled JPEG thumbnails.
///
/// Everything here is best effort. A file that cannot be decoded or has no
/// EXIF block still counts as extracted; only its thumbnail attempt is
/// recorded as failed.
pub struct ImageExtractor {
    store: ThumbnailStore,
}

impl ImageExtractor {
    pub fn new(store: ThumbnailStore) -> Self {
        Self { store }
    }

    fn generate_thumbnails(&self, file_id: &str, image: Option<&DynamicImage>) -> ThumbnailOutcome {
        let Some(image) = image else {
            return ThumbnailOutcome::from_counts(0, self.store.sizes().len().max(1));
        };

        let mut generated = 0;
        let mut failed = 0;
        for &size in self.store.sizes() {
            match self.write_thumbnail(file_id, image, size) {
                Ok(()) => generated += 1,
                Err(e) => {
                    warn!("Thumbnail {} for {} failed: {}", size, file_id, e);
                    failed += 1;
                }
            }
        }
        ThumbnailOutcome::from_counts(generated, failed)
    }

    fn write_thumbnail(&self, file_id: &str, image: &DynamicImage, width: u32) -> Result<()> {
        let target = self.store.prepare_path(file_id, width)?;
        let height = scaled_height(image.width(), image.height(), width);
        let thumb = image.resize_exact(width, height, FilterType::Triangle);
        thumb
            .to_rgb8()
            .save_with_format(&target, image::ImageFormat::Jpeg)?;
        Ok(())
    }
}

impl Extractor for ImageExtractor {
    fn extract(&self, job: &ExtractJob<'_>) -> Result<Extracted> {
        let info = read_exif(&job.path);

        let decoded = match image::open(&job.path) {
            Ok(img) => Some(img),
            Err(e) => {
                debug!("Cannot decode {}: {}", job.path.display(), e);
                None
            }
        };

        let mut tags = Vec::new();
        let (width, height) = match &decoded {
            Some(img) => (Some(img.width()), Some(img.height())),
            None => (info.width, info.height),
        };
        if let Some(w) = width {
            tags.push(("width".to_string(), MetaValue::Int(w as i64)));
        }
        if let Some(h) = height {
            tags.push(("height".to_string(), MetaValue::Int(h as i64)));
        }
        if let Ok(format) = image::ImageFormat::from_path(&job.path) {
            tags.push(("format".to_string(), MetaValue::String(format!("{:?}", format))));
        }
        if let Some(make) = info.make {
            tags.push(("manufacturer".to_string(), MetaValue::String(make)));
        }
        if let Some(model) = info.model {
            tags.push(("model".to_string(), MetaValue::String(model)));
        }
        if let Some(lens) = info.lens {
            tags.push(("lens".to_string(), MetaValue::String(lens)));
        }
        if let Some(focal) = info.focal_length {
            tags.push(("focal_length".to_string(), MetaValue::Float(focal)));
        }
        if let Some(aperture) = info.aperture {
            tags.push(("aperture".to_string(), MetaValue::Float(aperture)));
        }
        if let Some(iso) = info.iso {
            tags.push(("iso".to_string(), MetaValue::Int(iso)));
        }
        if let Some((latitude, longitude)) = info.gps {
            tags.push((
                "gps_coordinates".to_string(),
                MetaValue::Location { latitude, longitude },
            ));
        }

        let content_date = info.taken_at.as_deref().and_then(parse_loose_date);
        if let Some(date) = content_date {
            tags.push(("creation_time".to_string(), MetaValue::DateTime(date)));
        }

        let thumbnails = self.generate_thumbnails(&job.file.id, decoded.as_ref());

        Ok(Extracted {
            tags,
            content_date,
            thumbnails,
        })
    }
}

/// Height that keeps the aspect ratio at `width`, never below one pixel.
fn scaled_height(src_width: u32, src_height: u32, width: u32) -> u32 {
    if src_width == 0 {
        return width.max(1);
    }
    let height = (src_height as u64 * width as u64 + src_width as u64 / 2) / src_width as u64;
    height.clamp(1, u32::MAX as u64) as u32
}

#[derive(Debug, Default)]
struct ExifInfo {
    width: Option<u32>,
    height: Option<u32>,
    make: Option<String>,
    model: Option<String>,
    lens: Option<String>,
    focal_length: Option<f64>,
    aperture: Option<f64>,
    iso: Option<i64>,
    taken_at: Option<String>,
    gps: Option<(f64, f64)>,
}

fn read_exif(path: &Path) -> ExifInfo {
    let mut info = ExifInfo::default();

    let Ok(file) = File::open(path) else {
        return info;
    };
    let mut reader = BufReader::new(file);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else {
        return info;
    };

    let text = |tag: exif::Tag| {
        exif.get_field(tag, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string().trim_matches('"').trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let rational = |tag: exif::Tag| match exif.get_field(tag, exif::In::PRIMARY).map(|f| &f.value) {
        Some(exif::Value::Rational(v)) => v.first().filter(|r| r.denom != 0).map(|r| r.to_f64()),
        _ => None,
    };
    let uint = |tag: exif::Tag| {
        exif.get_field(tag, exif::In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
    };

    info.make = text(exif::Tag::Make);
    info.model = text(exif::Tag::Model);
    info.lens = text(exif::Tag::LensModel);
    info.taken_at = text(exif::Tag::DateTimeOriginal).or_else(|| text(exif::Tag::DateTime));
    info.focal_length = rational(exif::Tag::FocalLength);
    info.aperture = rational(exif::Tag::FNumber);
    info.iso = uint(exif::Tag::PhotographicSensitivity).map(i64::from);
    info.width = uint(exif::Tag::PixelXDimension);
    info.height = uint(exif::Tag::PixelYDimension);

    if let (Some(lat), Some(lat_ref), Some(lon), Some(lon_ref)) = (
        exif.get_field(exif::Tag::GPSLatitude, exif::In::PRIMARY),
        exif.get_field(exif::Tag::GPSLatitudeRef, exif::In::PRIMARY),
        exif.get_field(exif::Tag::GPSLongitude, exif::In::PRIMARY),
        exif.get_field(exif::Tag::GPSLongitudeRef, exif::In::PRIMARY),
    ) {
        if let (Some(lat_abs), Some(lon_abs)) = (dms_value(&lat.value), dms_value(&lon.value)) {
            let south = lat_ref.display_value().to_string().contains('S');
            let west = lon_ref.display_value().to_string().contains('W');
            info.gps = Some((
                if south { -lat_abs } else { lat_abs },
                if west { -lon_abs } else { lon_abs },
            ));
        }
    }

    info
}

fn dms_value(value: &exif::Value) -> Option<f64> {
    match value {
        exif::Value::Rational(v) if v.len() >= 3 && v.iter().all(|r| r.denom != 0) => {
            Some(dms_to_decimal(v[0].to_f64(), v[1].to_f64(), v[2].to_f64()))
        }
        _ => None,
    }
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, FileRecord, FileStatus};
    use crate::scanner::reconcile::{absolute_path, sync_album};
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    fn only_file(db: &crate::db::Database, album_id: &str) -> FileRecord {
        db.files_in_album(album_id)
            .unwrap()
            .into_iter()
            .find(|f| f.status == FileStatus::Active && !f.is_directory)
            .unwrap()
    }

    #[test]
    fn test_scaled_height_keeps_aspect() {
        assert_eq!(scaled_height(40, 20, 10), 5);
        assert_eq!(scaled_height(1920, 1080, 200), 113);
        assert_eq!(scaled_height(1000, 1, 200), 1);
        assert_eq!(scaled_height(0, 0, 200), 200);
    }

    #[test]
    fn test_dms_to_decimal() {
        let v = dms_to_decimal(37.0, 30.0, 36.0);
        assert!((v - 37.51).abs() < 1e-9);
    }

    #[test]
    fn test_png_gets_dimensions_and_thumbnails() {
        let media = tempdir().unwrap();
        let thumbs = tempdir().unwrap();
        let img = RgbImage::from_pixel(40, 20, Rgb([200, 10, 10]));
        img.save(media.path().join("red.png")).unwrap();

        let db = test_db();
        let album = db.register_album(media.path(), None).unwrap();
        sync_album(&db, &album, &[]).unwrap();
        let file = only_file(&db, &album.id);

        let store = ThumbnailStore::with_sizes(thumbs.path().to_path_buf(), vec![10, 20]);
        let extractor = ImageExtractor::new(store.clone());
        let job = ExtractJob {
            db: &db,
            album: &album,
            file: &file,
            path: absolute_path(&album, &file),
        };

        let extracted = extractor.extract(&job).unwrap();
        assert_eq!(extracted.thumbnails, ThumbnailOutcome::Generated { sizes: 2 });
        assert!(extracted.content_date.is_none());
        assert!(extracted
            .tags
            .iter()
            .any(|(k, v)| k == "width" && *v == MetaValue::Int(40)));

        let small = image::open(store.path_for(&file.id, 10)).unwrap();
        assert_eq!((small.width(), small.height()), (10, 5));
    }

    #[test]
    fn test_undecodable_image_still_extracts() {
        let media = tempdir().unwrap();
        let thumbs = tempdir().unwrap();
        fs::write(media.path().join("broken.jpg"), b"not really a jpeg").unwrap();

        let db = test_db();
        let album = db.register_album(media.path(), None).unwrap();
        sync_album(&db, &album, &[]).unwrap();
        let file = only_file(&db, &album.id);

        let extractor =
            ImageExtractor::new(ThumbnailStore::with_sizes(thumbs.path().to_path_buf(), vec![200]));
        let job = ExtractJob {
            db: &db,
            album: &album,
            file: &file,
            path: absolute_path(&album, &file),
        };

        let extracted = extractor.extract(&job).unwrap();
        assert!(matches!(extracted.thumbnails, ThumbnailOutcome::Failed { generated: 0, .. }));
        assert!(extracted.content_date.is_none());
    }
}
