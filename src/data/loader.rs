use crate::utils::{gray16_to_plane, Gray16Image, Plane};
use std::path::{Path, PathBuf};

/// A decoded single-channel image together with the file it came from.
///
/// The title is the file name and doubles as the stack slice label.
#[derive(Debug, Clone)]
pub struct ChannelImage {
    pub path: PathBuf,
    pub title: String,
    pub pixels: Gray16Image,
}

impl ChannelImage {
    /// Decode an image file; colour images are reduced to luminance and
    /// 8-bit data is widened to 16 bits.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, image::ImageError> {
        let path = path.as_ref();
        let pixels = image::open(path)?.to_luma16();
        Ok(Self {
            path: path.to_path_buf(),
            title: title_of(path),
            pixels,
        })
    }

    pub fn from_pixels(title: impl Into<String>, pixels: Gray16Image) -> Self {
        let title = title.into();
        Self {
            path: PathBuf::from(&title),
            title,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Normalized intensity plane used by the correspondence providers
    pub fn plane(&self) -> Plane {
        gray16_to_plane(&self.pixels)
    }
}

pub fn title_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
