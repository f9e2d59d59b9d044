//! Image filters.
//!
//! Each [`ImageFilter`] variant maps to a fixed convolution kernel. A kernel is applied per RGB
//! channel as `sum(weight * pixel) / scale + offset`, rounded and clamped to `0..=255`. Pixels
//! closer to the border than the kernel radius are copied through unchanged.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::{ImageError, ImageFormat, ImageReader, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::artifacts::{filtered_name, original_name};
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageFilter {
    #[default]
    #[value(name = "BLUR")]
    Blur,
    #[value(name = "CONTOUR")]
    Contour,
    #[value(name = "DETAIL")]
    Detail,
    #[value(name = "EDGE_ENHANCE")]
    EdgeEnhance,
    #[value(name = "EDGE_ENHANCE_MORE")]
    EdgeEnhanceMore,
    #[value(name = "EMBOSS")]
    Emboss,
    #[value(name = "FIND_EDGES")]
    FindEdges,
    #[value(name = "SMOOTH")]
    Smooth,
    #[value(name = "SMOOTH_MORE")]
    SmoothMore,
    #[value(name = "SHARPEN")]
    Sharpen,
}

/// A square convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kernel {
    /// Side length, 3 or 5
    pub size: usize,
    /// Row-major weights, `size * size` entries
    pub weights: &'static [i32],
    pub scale: i32,
    pub offset: i32,
}

#[rustfmt::skip]
mod kernels {
    use super::Kernel;

    pub const BLUR: Kernel = Kernel {
        size: 5,
        weights: &[
            1, 1, 1, 1, 1,
            1, 0, 0, 0, 1,
            1, 0, 0, 0, 1,
            1, 0, 0, 0, 1,
            1, 1, 1, 1, 1,
        ],
        scale: 16,
        offset: 0,
    };

    pub const CONTOUR: Kernel = Kernel {
        size: 3,
        weights: &[
            -1, -1, -1,
            -1,  8, -1,
            -1, -1, -1,
        ],
        scale: 1,
        offset: 255,
    };

    pub const DETAIL: Kernel = Kernel {
        size: 3,
        weights: &[
             0, -1,  0,
            -1, 10, -1,
             0, -1,  0,
        ],
        scale: 6,
        offset: 0,
    };

    pub const EDGE_ENHANCE: Kernel = Kernel {
        size: 3,
        weights: &[
            -1, -1, -1,
            -1, 10, -1,
            -1, -1, -1,
        ],
        scale: 2,
        offset: 0,
    };

    pub const EDGE_ENHANCE_MORE: Kernel = Kernel {
        size: 3,
        weights: &[
            -1, -1, -1,
            -1,  9, -1,
            -1, -1, -1,
        ],
        scale: 1,
        offset: 0,
    };

    pub const EMBOSS: Kernel = Kernel {
        size: 3,
        weights: &[
            -1, 0, 0,
             0, 1, 0,
             0, 0, 0,
        ],
        scale: 1,
        offset: 128,
    };

    pub const FIND_EDGES: Kernel = Kernel {
        size: 3,
        weights: &[
            -1, -1, -1,
            -1,  8, -1,
            -1, -1, -1,
        ],
        scale: 1,
        offset: 0,
    };

    pub const SMOOTH: Kernel = Kernel {
        size: 3,
        weights: &[
            1, 1, 1,
            1, 5, 1,
            1, 1, 1,
        ],
        scale: 13,
        offset: 0,
    };

    pub const SMOOTH_MORE: Kernel = Kernel {
        size: 5,
        weights: &[
            1, 1,  1, 1, 1,
            1, 5,  5, 5, 1,
            1, 5, 44, 5, 1,
            1, 5,  5, 5, 1,
            1, 1,  1, 1, 1,
        ],
        scale: 100,
        offset: 0,
    };

    pub const SHARPEN: Kernel = Kernel {
        size: 3,
        weights: &[
            -2, -2, -2,
            -2, 32, -2,
            -2, -2, -2,
        ],
        scale: 16,
        offset: 0,
    };
}

impl ImageFilter {
    pub const ALL: [ImageFilter; 10] = [
        ImageFilter::Blur,
        ImageFilter::Contour,
        ImageFilter::Detail,
        ImageFilter::EdgeEnhance,
        ImageFilter::EdgeEnhanceMore,
        ImageFilter::Emboss,
        ImageFilter::FindEdges,
        ImageFilter::Smooth,
        ImageFilter::SmoothMore,
        ImageFilter::Sharpen,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ImageFilter::Blur => "BLUR",
            ImageFilter::Contour => "CONTOUR",
            ImageFilter::Detail => "DETAIL",
            ImageFilter::EdgeEnhance => "EDGE_ENHANCE",
            ImageFilter::EdgeEnhanceMore => "EDGE_ENHANCE_MORE",
            ImageFilter::Emboss => "EMBOSS",
            ImageFilter::FindEdges => "FIND_EDGES",
            ImageFilter::Smooth => "SMOOTH",
            ImageFilter::SmoothMore => "SMOOTH_MORE",
            ImageFilter::Sharpen => "SHARPEN",
        }
    }

    pub fn kernel(self) -> Kernel {
        match self {
            ImageFilter::Blur => kernels::BLUR,
            ImageFilter::Contour => kernels::CONTOUR,
            ImageFilter::Detail => kernels::DETAIL,
            ImageFilter::EdgeEnhance => kernels::EDGE_ENHANCE,
            ImageFilter::EdgeEnhanceMore => kernels::EDGE_ENHANCE_MORE,
            ImageFilter::Emboss => kernels::EMBOSS,
            ImageFilter::FindEdges => kernels::FIND_EDGES,
            ImageFilter::Smooth => kernels::SMOOTH,
            ImageFilter::SmoothMore => kernels::SMOOTH_MORE,
            ImageFilter::Sharpen => kernels::SHARPEN,
        }
    }

    /// Apply this filter to an in-memory image
    pub fn apply(self, img: &RgbImage) -> RgbImage {
        convolve(img, &self.kernel())
    }
}

impl fmt::Display for ImageFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImageFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ImageFilter::ALL
            .into_iter()
            .find(|filter| filter.name() == s)
            .ok_or_else(|| Error::UnknownFilter { name: s.to_string() })
    }
}

fn convolve(img: &RgbImage, kernel: &Kernel) -> RgbImage {
    let (width, height) = img.dimensions();
    let radius = (kernel.size / 2) as u32;
    let mut out = img.clone();

    if width <= 2 * radius || height <= 2 * radius {
        return out;
    }

    for y in radius..height - radius {
        for x in radius..width - radius {
            let mut acc = [0i32; 3];
            for ky in 0..kernel.size {
                for kx in 0..kernel.size {
                    let weight = kernel.weights[ky * kernel.size + kx];
                    if weight == 0 {
                        continue;
                    }
                    // Kernel row 0 weighs the row below the target pixel, columns run left to right
                    let px = img.get_pixel(x + kx as u32 - radius, y + radius - ky as u32);
                    for (sum, channel) in acc.iter_mut().zip(px.0) {
                        *sum += weight * i32::from(channel);
                    }
                }
            }
            out.put_pixel(x, y, Rgb(acc.map(|sum| clamp_channel(sum, kernel))));
        }
    }

    out
}

fn clamp_channel(sum: i32, kernel: &Kernel) -> u8 {
    let value = f64::from(sum) / f64::from(kernel.scale) + f64::from(kernel.offset);
    value.round().clamp(0.0, 255.0) as u8
}

/// Read `src`, apply `filter` and write the result to `dst` as JPEG.
pub fn filter_file(src: &Path, dst: &Path, filter: ImageFilter) -> Result<()> {
    let img = ImageReader::open(src)
        .map_err(|e| Error::io(src, e))?
        .with_guessed_format()
        .map_err(|e| Error::io(src, e))?
        .decode()
        .map_err(|e| match e {
            ImageError::IoError(io) => Error::io(src, io),
            other => Error::Image {
                path: src.to_path_buf(),
                source: other,
            },
        })?;

    let filtered = filter.apply(&img.to_rgb8());
    debug!(width = filtered.width(), height = filtered.height(), %filter, "Applied filter");

    filtered.save_with_format(dst, ImageFormat::Jpeg).map_err(|e| Error::Image {
        path: dst.to_path_buf(),
        source: e,
    })
}

/// Apply `filter` to `<base>_original.jpg` in `dir`, writing `<base>_filtered.jpg`.
///
/// Returns the filtered file name. Fails with an I/O not-found error if the original was never
/// written.
#[instrument(skip(dir), err)]
pub async fn filter_image(dir: &Path, base: &str, filter: ImageFilter) -> Result<String> {
    let name = filtered_name(base);
    let src: PathBuf = dir.join(original_name(base));
    let dst: PathBuf = dir.join(&name);

    tokio::task::spawn_blocking(move || filter_file(&src, &dst, filter))
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("Filter task failed: {e}")))??;

    Ok(name)
}
