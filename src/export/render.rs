//! CPU page renderer producing straight RGBA8 frames for the video worker.
//!
//! Layers are composited in premultiplied space over the page background, which is flattened
//! onto black first, so every output pixel is opaque and straight equals premultiplied.

use crate::export::project::{LayerContent, Project};
use crate::foundation::core::{FrameIndex, Rgba8};
use crate::foundation::error::{ExportError, ExportResult};
use anyhow::Context;
use rayon::prelude::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;
use std::sync::Arc;

type PremulRgba8 = [u8; 4];

/// Layer pixels resized to their on-canvas rectangle.
#[derive(Clone, Debug)]
struct Raster {
    width: u32,
    rgba8_premul: Arc<Vec<u8>>,
}

#[derive(Clone, Debug)]
enum Paint {
    Solid(PremulRgba8),
    Raster(Raster),
}

#[derive(Clone, Debug)]
struct PreparedLayer {
    /// Integer placement: left, top, width, height.
    x: i64,
    y: i64,
    width: u32,
    height: u32,
    paint: Paint,
}

/// Renders the frames of one project. Images are decoded and resized once, up front.
#[derive(Debug)]
pub struct FrameRenderer {
    project: Project,
    width: u32,
    height: u32,
    /// Per page, per layer; `None` for layers with an empty rectangle.
    layers: Vec<Vec<Option<PreparedLayer>>>,
}

impl FrameRenderer {
    /// Prepare every layer of `project`. Image sources resolve against `base_dir`.
    #[tracing::instrument(skip(project), fields(pages = project.pages.len()))]
    pub fn prepare(project: &Project, base_dir: &Path) -> ExportResult<Self> {
        project.validate()?;
        let width = project.settings.width;
        let height = project.settings.height;
        let mut decoded: HashMap<String, image::RgbaImage> = HashMap::new();
        let mut layers = Vec::with_capacity(project.pages.len());

        for page in &project.pages {
            let mut prepared = Vec::with_capacity(page.layers.len());
            for layer in &page.layers {
                let w = layer.width.round() as u32;
                let h = layer.height.round() as u32;
                if w == 0 || h == 0 {
                    prepared.push(None);
                    continue;
                }
                let paint = match &layer.content {
                    LayerContent::Solid { color } => Paint::Solid(premultiply(color.0)),
                    LayerContent::Image { source } => {
                        let img = match decoded.entry(source.clone()) {
                            Entry::Occupied(e) => e.into_mut(),
                            Entry::Vacant(e) => e.insert(load_image(base_dir, source)?),
                        };
                        Paint::Raster(resize_premul(img, w, h))
                    }
                };
                // Anything further out than one layer size is off canvas either way.
                let x = (layer.x.round() as i64).clamp(-i64::from(w), i64::from(width));
                let y = (layer.y.round() as i64).clamp(-i64::from(h), i64::from(height));
                prepared.push(Some(PreparedLayer {
                    x,
                    y,
                    width: w,
                    height: h,
                    paint,
                }));
            }
            layers.push(prepared);
        }
        tracing::debug!(images = decoded.len(), "renderer prepared");

        Ok(Self {
            project: project.clone(),
            width,
            height,
            layers,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Render `frame` as tightly packed RGBA8, `width * height * 4` bytes.
    pub fn render(&self, frame: FrameIndex) -> ExportResult<Vec<u8>> {
        let (page_idx, t) = self
            .project
            .page_at(frame)
            .ok_or_else(|| ExportError::validation("project has no pages"))?;
        let page = &self.project.pages[page_idx];
        let bg = flatten_on_black(page.background);

        let stride = self.width as usize * 4;
        let mut out = vec![0u8; stride * self.height as usize];
        for px in out.chunks_exact_mut(4) {
            px.copy_from_slice(&bg);
        }

        let visible: Vec<(&PreparedLayer, f32)> = self.layers[page_idx]
            .iter()
            .zip(&page.layers)
            .filter_map(|(prepared, layer)| {
                let prepared = prepared.as_ref()?;
                let alpha = layer.opacity_at(t, page.duration) as f32;
                (alpha > 0.0).then_some((prepared, alpha))
            })
            .collect();
        if visible.is_empty() {
            return Ok(out);
        }

        let (width, height) = (i64::from(self.width), i64::from(self.height));
        out.par_chunks_mut(stride).enumerate().for_each(|(row, dst)| {
            let y = row as i64;
            for (layer, alpha) in &visible {
                if y < layer.y || y >= layer.y.saturating_add(i64::from(layer.height)) {
                    continue;
                }
                let x0 = layer.x.max(0);
                let x1 = layer.x.saturating_add(i64::from(layer.width)).min(width);
                if x0 >= x1 || y >= height {
                    continue;
                }
                let ly = (y - layer.y) as usize;
                for x in x0..x1 {
                    let src = match &layer.paint {
                        Paint::Solid(c) => *c,
                        Paint::Raster(r) => {
                            let lx = (x - layer.x) as usize;
                            let i = (ly * r.width as usize + lx) * 4;
                            let p = &r.rgba8_premul[i..i + 4];
                            [p[0], p[1], p[2], p[3]]
                        }
                    };
                    let d = &mut dst[x as usize * 4..x as usize * 4 + 4];
                    let blended = over([d[0], d[1], d[2], d[3]], src, *alpha);
                    d.copy_from_slice(&blended);
                }
            }
        });
        Ok(out)
    }
}

fn load_image(base_dir: &Path, source: &str) -> ExportResult<image::RgbaImage> {
    let raw = source.strip_prefix("file://").unwrap_or(source);
    let path = base_dir.join(raw);
    let img = std::fs::read(&path)
        .with_context(|| format!("read image {}", path.display()))
        .and_then(|bytes| image::load_from_memory(&bytes).context("decode image from memory"))
        .map_err(|e| ExportError::validation(format!("image layer '{source}': {e:#}")))?;
    Ok(img.to_rgba8())
}

fn resize_premul(img: &image::RgbaImage, width: u32, height: u32) -> Raster {
    let resized = if img.dimensions() == (width, height) {
        img.clone()
    } else {
        image::imageops::resize(img, width, height, image::imageops::FilterType::Triangle)
    };
    let mut rgba8_premul = resized.into_raw();
    for px in rgba8_premul.chunks_exact_mut(4) {
        let p = premultiply([px[0], px[1], px[2], px[3]]);
        px.copy_from_slice(&p);
    }
    Raster {
        width,
        rgba8_premul: Arc::new(rgba8_premul),
    }
}

fn premultiply(c: [u8; 4]) -> PremulRgba8 {
    let a = u16::from(c[3]);
    [
        mul_div255(u16::from(c[0]), a),
        mul_div255(u16::from(c[1]), a),
        mul_div255(u16::from(c[2]), a),
        c[3],
    ]
}

fn flatten_on_black(c: Rgba8) -> [u8; 4] {
    let p = premultiply(c.0);
    [p[0], p[1], p[2], 255]
}

/// Premultiplied source-over with an extra opacity factor.
fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }
    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }
    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = sa.saturating_add(mul_div255(u16::from(dst[3]), inv));
    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = sc.saturating_add(dc);
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

#[cfg(test)]
#[path = "../../tests/unit/export/render.rs"]
mod tests;
