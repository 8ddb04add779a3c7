use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("{count} images given, at most {max} allowed")]
    TooMany { count: usize, max: usize },
    #[error("image {index} is {bytes} bytes, limit is {max}")]
    TooLarge { index: usize, bytes: usize, max: usize },
    #[error("image {index}: {reason}")]
    Invalid { index: usize, reason: String },
}

impl ImageError {
    pub fn code(&self) -> &'static str {
        match self {
            ImageError::TooMany { .. } => "too_many_images",
            ImageError::TooLarge { .. } => "image_too_large",
            ImageError::Invalid { .. } => "invalid_image",
        }
    }
}

/// Checks count, scheme and decoded size; returns the trimmed list.
pub fn validate_images(
    images: &[String],
    max_images: usize,
    max_bytes: usize,
) -> Result<Vec<String>, ImageError> {
    if images.len() > max_images {
        return Err(ImageError::TooMany {
            count: images.len(),
            max: max_images,
        });
    }
    images
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let image = raw.trim();
            if image.starts_with("https://") || image.starts_with("http://") {
                return Ok(image.to_string());
            }
            if let Some(rest) = image.strip_prefix("data:") {
                let bytes = data_url_size(rest).map_err(|reason| ImageError::Invalid {
                    index,
                    reason: reason.into(),
                })?;
                if bytes > max_bytes {
                    return Err(ImageError::TooLarge {
                        index,
                        bytes,
                        max: max_bytes,
                    });
                }
                return Ok(image.to_string());
            }
            Err(ImageError::Invalid {
                index,
                reason: "expected an http(s) or data: URL".into(),
            })
        })
        .collect()
}

fn data_url_size(rest: &str) -> Result<usize, &'static str> {
    let (header, payload) = rest.split_once(',').ok_or("data URL without payload")?;
    let Some(mime) = header.strip_suffix(";base64") else {
        return Err("data URL must be base64 encoded");
    };
    if !mime.starts_with("image/") {
        return Err("data URL is not an image");
    }
    let decoded = STANDARD
        .decode(payload.trim())
        .map_err(|_| "data URL payload is not valid base64")?;
    if decoded.is_empty() {
        return Err("data URL payload is empty");
    }
    Ok(decoded.len())
}
