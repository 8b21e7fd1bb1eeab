use crate::yunet;
use anyhow::{bail, Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// Side length of the aligned crop the recognizer consumes.
pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference eye positions inside a 112x112 crop.
const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

/// A face found by the detector, in source image pixels.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // eyes, nose tip, mouth corners as x,y pairs
}

impl Detection {
    /// Bounding box as integer `[x1, y1, x2, y2]` corners.
    pub fn corners(&self) -> [i32; 4] {
        let [x, y, w, h] = self.bbox;
        [
            x.round() as i32,
            y.round() as i32,
            (x + w).round() as i32,
            (y + h).round() as i32,
        ]
    }
}

/// L2-normalized face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    /// Normalize `values` to unit length. Returns `None` for empty, zero-norm
    /// or non-finite input, which cannot be compared meaningfully.
    pub fn from_raw(values: Vec<f32>) -> Option<Self> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return None;
        }
        Some(Self {
            vector: values.into_iter().map(|v| v / norm).collect(),
        })
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

/// Cosine similarity of two unit vectors, clamped to [-1, 1].
pub fn match_embedding(a: &Embedding, b: &Embedding) -> f32 {
    if a.dim() != b.dim() {
        log::warn!(
            "comparing embeddings of different size ({} vs {})",
            a.dim(),
            b.dim()
        );
    }
    let dot: f32 = a
        .vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| x * y)
        .sum();
    dot.clamp(-1.0, 1.0)
}

/// Planar `[1, 3, H, W]` tensor from an RGB image. `bgr` swaps the channel
/// planes, `scale` maps each raw byte to the model's input range.
fn planar_tensor(img: &RgbImage, bgr: bool, scale: impl Fn(u8) -> f32) -> Result<Array4<f32>> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    let order: [usize; 3] = if bgr { [2, 1, 0] } else { [0, 1, 2] };
    for (i, px) in img.pixels().enumerate() {
        for (dst, &src) in order.iter().enumerate() {
            data[dst * plane + i] = scale(px[src]);
        }
    }

    Ok(Array4::from_shape_vec(
        (1, 3, height as usize, width as usize),
        data,
    )?)
}

/// Detect faces with YuNet.
///
/// The image is letterboxed onto an `input_size` square canvas so the
/// detector sees undistorted faces; results are mapped back to the source
/// image and filtered with NMS.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    input_size: u32,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        bail!("image has no pixels");
    }

    let scale = input_size as f32 / orig_w.max(orig_h) as f32;
    let fit_w = ((orig_w as f32 * scale) as u32).clamp(1, input_size);
    let fit_h = ((orig_h as f32 * scale) as u32).clamp(1, input_size);
    let pad_x = (input_size - fit_w) / 2;
    let pad_y = (input_size - fit_h) / 2;

    let resized = img.resize_exact(fit_w, fit_h, FilterType::Triangle).to_rgb8();
    let mut canvas = RgbImage::new(input_size, input_size);
    image::imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    // YuNet takes BGR in [0, 255]
    let input = planar_tensor(&canvas, true, |v| v as f32)?;
    let input_tensor = Value::from_array(input)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        owned.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let views: Vec<(&[i64], &[f32])> = owned
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let heads =
        yunet::parse_outputs(&views, input_size as usize).context("parsing YuNet outputs")?;
    let raw = yunet::decode(&heads, score_threshold, input_size as usize);

    // normalized canvas coords -> canvas px -> source px
    let side = input_size as f32;
    let unmap_x = |v: f32| (v * side - pad_x as f32) / scale;
    let unmap_y = |v: f32| (v * side - pad_y as f32) / scale;

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for (i, pair) in d.landmarks.chunks_exact(2).enumerate() {
                landmarks[i * 2] = unmap_x(pair[0]);
                landmarks[i * 2 + 1] = unmap_y(pair[1]);
            }
            Detection {
                bbox: [
                    unmap_x(d.bbox[0]),
                    unmap_y(d.bbox[1]),
                    d.bbox[2] * side / scale,
                    d.bbox[3] * side / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    log::debug!(
        "{} candidate(s) above {:.2} before NMS",
        detections.len(),
        score_threshold
    );

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Rotation + uniform scale + translation taking source pixels to the
/// aligned crop.
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Transform that maps the detected eyes onto the ArcFace reference eyes
    /// scaled to a `size` crop.
    fn from_eyes(left: (f32, f32), right: (f32, f32), size: u32) -> Option<Self> {
        let k = size as f32 / ALIGNED_SIZE as f32;
        let src = (right.0 - left.0, right.1 - left.1);
        let dst = (
            (REF_RIGHT_EYE.0 - REF_LEFT_EYE.0) * k,
            (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1) * k,
        );

        let src_len2 = src.0 * src.0 + src.1 * src.1;
        if src_len2 <= f32::EPSILON {
            return None;
        }

        // Complex division dst / src gives the rotation-scale pair (a, b)
        // with x' = a*x - b*y, y' = b*x + a*y.
        let a = (dst.0 * src.0 + dst.1 * src.1) / src_len2;
        let b = (dst.1 * src.0 - dst.0 * src.1) / src_len2;

        let src_mid = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
        let dst_mid = (
            (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * k,
            (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * k,
        );
        let tx = dst_mid.0 - (a * src_mid.0 - b * src_mid.1);
        let ty = dst_mid.1 - (b * src_mid.0 + a * src_mid.1);

        Some(Self { a, b, tx, ty })
    }

    /// Map a crop pixel back to the source image.
    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let dx = x - self.tx;
        let dy = y - self.ty;
        (
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        )
    }
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<image::Rgb<u8>> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
        return None;
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let corners = [
        (img.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (img.get_pixel(x1, y0), fx * (1.0 - fy)),
        (img.get_pixel(x0, y1), (1.0 - fx) * fy),
        (img.get_pixel(x1, y1), fx * fy),
    ];

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let v: f32 = corners.iter().map(|(p, w)| p[c] as f32 * w).sum();
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    Some(image::Rgb(out))
}

/// Warp the face into a `size` square crop with the eyes at the reference
/// positions. Pixels that fall outside the source stay black.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);
    let transform = Similarity::from_eyes(left_eye, right_eye, size)
        .context("degenerate eye landmarks, cannot align face")?;

    let src = img.to_rgb8();
    let mut out = RgbImage::new(size, size);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let (sx, sy) = transform.invert(x as f32, y as f32);
        if let Some(sample) = sample_bilinear(&src, sx, sy) {
            *px = sample;
        }
    }

    Ok(DynamicImage::ImageRgb8(out))
}

/// Run the ArcFace recognizer on an aligned crop.
///
/// Input is RGB, `(v - 127.5) / 127.5`, shape `[1, 3, 112, 112]`; the output
/// row is L2-normalized before it is returned.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face = face_img
        .resize_exact(ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
        .to_rgb8();
    let input = planar_tensor(&face, false, |v| (v as f32 - 127.5) / 127.5)?;

    let input_tensor = Value::from_array(input)?;
    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let dim = match shape.len() {
        2 => shape[1] as usize,
        _ => data.len(),
    };
    if dim == 0 || dim > data.len() {
        bail!("recognizer returned unexpected shape {:?}", shape);
    }

    Embedding::from_raw(data[..dim].to_vec()).context("recognizer returned a zero embedding")
}
