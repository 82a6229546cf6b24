use crate::data::ChannelImage;
use crate::error::RegistrationError;
use crate::utils::Gray16Image;
use image::{ImageBuffer, Luma};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// TIFF `PageName` tag
const PAGE_NAME_TAG: u16 = 285;

/// One labelled plane of a stack
#[derive(Debug, Clone)]
pub struct StackSlice {
    pub label: String,
    pub pixels: Gray16Image,
}

/// Channel/slice/frame split of the stack's planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HyperstackLayout {
    pub channels: usize,
    pub slices: usize,
    pub frames: usize,
    pub composite: bool,
}

/// Ordered 16-bit planes sharing one canvas.
///
/// The canvas is fixed by the first slice; later slices of a different size are
/// cropped or zero-padded at the bottom and right.
#[derive(Debug, Clone)]
pub struct Stack {
    title: String,
    slices: Vec<StackSlice>,
    canvas: Option<(u32, u32)>,
    layout: Option<HyperstackLayout>,
}

impl Stack {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            slices: Vec::new(),
            canvas: None,
            layout: None,
        }
    }

    /// Append `image` labelled with its title and return its 0-based position.
    pub fn push(&mut self, image: ChannelImage) -> usize {
        let ChannelImage { title, pixels, .. } = image;
        let pixels = match self.canvas {
            None => {
                self.canvas = Some(pixels.dimensions());
                pixels
            }
            Some(canvas) if canvas == pixels.dimensions() => pixels,
            Some(canvas) => {
                tracing::warn!(
                    stack = %self.title,
                    slice = %title,
                    width = pixels.width(),
                    height = pixels.height(),
                    canvas_width = canvas.0,
                    canvas_height = canvas.1,
                    "Slice size differs from the stack canvas, fitting it"
                );
                fit_to_canvas(&pixels, canvas)
            }
        };
        self.slices.push(StackSlice {
            label: title,
            pixels,
        });
        self.slices.len() - 1
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slices(&self) -> &[StackSlice] {
        &self.slices
    }

    pub fn labels(&self) -> Vec<String> {
        self.slices.iter().map(|s| s.label.clone()).collect()
    }

    /// Planes as channels of a single composite image
    pub fn into_composite(mut self) -> Self {
        self.layout = Some(HyperstackLayout {
            channels: self.slices.len(),
            slices: 1,
            frames: 1,
            composite: true,
        });
        self
    }

    /// ImageJ header stored in the first page's `ImageDescription`
    pub fn image_description(&self) -> String {
        let mut description = format!("ImageJ=1.54f\nimages={}\n", self.slices.len());
        match self.layout {
            Some(layout) => {
                description.push_str(&format!(
                    "channels={}\nslices={}\nframes={}\nhyperstack=true\n",
                    layout.channels, layout.slices, layout.frames
                ));
                if layout.composite {
                    description.push_str("mode=composite\n");
                }
            }
            None => description.push_str(&format!("slices={}\n", self.slices.len())),
        }
        description
    }

    /// Write all planes to one multi-page 16-bit grayscale TIFF.
    pub fn write_tiff(&self, path: &Path) -> Result<(), RegistrationError> {
        if self.slices.is_empty() {
            return Err(RegistrationError::export(path, "stack has no slices"));
        }

        let file = File::create(path).map_err(|e| RegistrationError::io(path, e))?;
        let mut encoder =
            TiffEncoder::new(BufWriter::new(file)).map_err(|e| RegistrationError::export(path, e))?;
        let description = self.image_description();

        for (index, slice) in self.slices.iter().enumerate() {
            let (width, height) = slice.pixels.dimensions();
            let mut page = encoder
                .new_image::<colortype::Gray16>(width, height)
                .map_err(|e| RegistrationError::export(path, e))?;
            if index == 0 {
                page.encoder()
                    .write_tag(Tag::ImageDescription, description.as_str())
                    .map_err(|e| RegistrationError::export(path, e))?;
            }
            page.encoder()
                .write_tag(Tag::Unknown(PAGE_NAME_TAG), slice.label.as_str())
                .map_err(|e| RegistrationError::export(path, e))?;
            page.write_data(slice.pixels.as_raw())
                .map_err(|e| RegistrationError::export(path, e))?;
        }

        let (width, height) = self.canvas.unwrap_or_default();
        tracing::info!(
            path = %path.display(),
            stack = %self.title,
            slices = self.slices.len(),
            width = width,
            height = height,
            composite = self.layout.is_some_and(|layout| layout.composite),
            "Stack written"
        );
        Ok(())
    }
}

fn fit_to_canvas(pixels: &Gray16Image, canvas: (u32, u32)) -> Gray16Image {
    ImageBuffer::from_fn(canvas.0, canvas.1, |x, y| {
        if x < pixels.width() && y < pixels.height() {
            *pixels.get_pixel(x, y)
        } else {
            Luma([0])
        }
    })
}
