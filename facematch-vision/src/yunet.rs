//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every cell of the stride-8, 16 and 32 feature maps
//! predicts one candidate face. The exported graph produces twelve tensors,
//! grouped by kind and then by stride:
//!
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32,
//! kps_8, kps_16, kps_32`
//!
//! For a cell at row `r`, column `c` of a map with stride `s`:
//!
//! ```text
//! score = sqrt(clamp(cls) * clamp(obj))
//! cx    = (c + dx) * s        w = exp(dw) * s
//! cy    = (r + dy) * s        h = exp(dh) * s
//! kp_k  = ((c + kx_k) * s, (r + ky_k) * s)
//! ```
//!
//! Coordinates returned here are normalized to the square detector input.

use anyhow::{bail, Result};
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

const KINDS: [(&str, usize); 4] = [("cls", 1), ("obj", 1), ("bbox", 4), ("kps", 10)];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,...,x5,y5 (normalized [0,1])
}

/// Every head output for one stride, one row per grid cell.
#[derive(Debug, Clone)]
pub struct StrideHead {
    pub stride: usize,
    pub cls: Array2<f32>,
    pub obj: Array2<f32>,
    pub bbox: Array2<f32>,
    pub kps: Array2<f32>,
}

impl StrideHead {
    pub fn grid_size(&self, input_size: usize) -> usize {
        input_size / self.stride
    }

    fn score_at(&self, cell: usize) -> f32 {
        let cls = self.cls[[cell, 0]].clamp(0.0, 1.0);
        let obj = self.obj[[cell, 0]].clamp(0.0, 1.0);
        (cls * obj).sqrt()
    }
}

/// Split the raw `(shape, data)` pairs produced by the session into one
/// [`StrideHead`] per stride, checking every shape against the input size.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<StrideHead>> {
    if outputs.len() < KINDS.len() * STRIDES.len() {
        bail!(
            "YuNet produced {} outputs, expected {}",
            outputs.len(),
            KINDS.len() * STRIDES.len()
        );
    }

    let mut heads = Vec::with_capacity(STRIDES.len());
    for (stride_idx, &stride) in STRIDES.iter().enumerate() {
        let cells = (input_size / stride) * (input_size / stride);
        let mut tensors = Vec::with_capacity(KINDS.len());

        for (kind_idx, &(kind, width)) in KINDS.iter().enumerate() {
            let out_idx = kind_idx * STRIDES.len() + stride_idx;
            let (shape, data) = outputs[out_idx];
            let expected = [1, cells as i64, width as i64];
            if shape != &expected[..] {
                bail!(
                    "{}_{} (output {}) has shape {:?}, expected {:?}",
                    kind,
                    stride,
                    out_idx,
                    shape,
                    expected
                );
            }
            tensors.push(Array2::from_shape_vec((cells, width), data.to_vec())?);
        }

        let mut tensors = tensors.into_iter();
        // Four tensors were pushed above, one per entry in KINDS.
        let (Some(cls), Some(obj), Some(bbox), Some(kps)) =
            (tensors.next(), tensors.next(), tensors.next(), tensors.next())
        else {
            bail!("incomplete YuNet head for stride {}", stride);
        };
        heads.push(StrideHead {
            stride,
            cls,
            obj,
            bbox,
            kps,
        });
    }

    Ok(heads)
}

/// Decode every cell whose score clears `score_threshold`.
pub fn decode(heads: &[StrideHead], score_threshold: f32, input_size: usize) -> Vec<RawDetection> {
    let norm = input_size as f32;
    let mut detections = Vec::new();

    for head in heads {
        let grid = head.grid_size(input_size);
        let stride = head.stride as f32;

        for row in 0..grid {
            for col in 0..grid {
                let cell = row * grid + col;
                let score = head.score_at(cell);
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + head.bbox[[cell, 0]]) * stride;
                let cy = (row as f32 + head.bbox[[cell, 1]]) * stride;
                let w = head.bbox[[cell, 2]].exp() * stride;
                let h = head.bbox[[cell, 3]].exp() * stride;

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    landmarks[k * 2] = (col as f32 + head.kps[[cell, k * 2]]) * stride / norm;
                    landmarks[k * 2 + 1] =
                        (row as f32 + head.kps[[cell, k * 2 + 1]]) * stride / norm;
                }

                detections.push(RawDetection {
                    bbox: [
                        (cx - w / 2.0) / norm,
                        (cy - h / 2.0) / norm,
                        w / norm,
                        h / norm,
                    ],
                    score,
                    landmarks,
                });
            }
        }
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_head(stride: usize, input_size: usize) -> StrideHead {
        let cells = (input_size / stride) * (input_size / stride);
        StrideHead {
            stride,
            cls: Array2::zeros((cells, 1)),
            obj: Array2::zeros((cells, 1)),
            bbox: Array2::zeros((cells, 4)),
            kps: Array2::zeros((cells, 10)),
        }
    }

    #[test]
    fn test_decode_single_cell() {
        let input_size = 640;
        let mut heads: Vec<StrideHead> = STRIDES
            .iter()
            .map(|&s| empty_head(s, input_size))
            .collect();

        // One confident face at row 10, col 10 of the stride-32 map.
        let head = &mut heads[2];
        let cell = 10 * 20 + 10;
        head.cls[[cell, 0]] = 0.9;
        head.obj[[cell, 0]] = 0.9;
        head.bbox[[cell, 0]] = 0.5;
        head.bbox[[cell, 1]] = 0.3;
        head.bbox[[cell, 2]] = 4f32.ln();
        head.bbox[[cell, 3]] = 4f32.ln();

        let detections = decode(&heads, 0.5, input_size);
        assert_eq!(detections.len(), 1);
        let det = &detections[0];

        // cx = 10.5 * 32 = 336, cy = 10.3 * 32 = 329.6, w = h = 4 * 32 = 128
        assert!((det.bbox[0] - (336.0 - 64.0) / 640.0).abs() < 1e-5);
        assert!((det.bbox[1] - (329.6 - 64.0) / 640.0).abs() < 1e-5);
        assert!((det.bbox[2] - 0.2).abs() < 1e-5);
        assert!((det.bbox[3] - 0.2).abs() < 1e-5);
        assert!((det.score - 0.9).abs() < 1e-5);

        // Zero keypoint offsets land on the cell origin: 10 * 32 / 640 = 0.5
        assert!((det.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((det.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_decode_skips_low_scores() {
        let input_size = 320;
        let mut heads: Vec<StrideHead> = STRIDES
            .iter()
            .map(|&s| empty_head(s, input_size))
            .collect();
        heads[0].cls[[0, 0]] = 0.9;
        heads[0].obj[[0, 0]] = 0.1;

        // sqrt(0.09) = 0.3
        assert!(decode(&heads, 0.5, input_size).is_empty());
        assert_eq!(decode(&heads, 0.25, input_size).len(), 1);
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        let data = vec![0.0f32; 6400 * 10];
        let good_shapes: Vec<[i64; 3]> = KINDS
            .iter()
            .flat_map(|&(_, width)| {
                STRIDES
                    .iter()
                    .map(move |&s| [1, ((640 / s) * (640 / s)) as i64, width as i64])
            })
            .collect();

        let outputs: Vec<(&[i64], &[f32])> = good_shapes
            .iter()
            .map(|s| {
                let len = (s[1] * s[2]) as usize;
                (&s[..], &data[..len])
            })
            .collect();
        let heads = parse_outputs(&outputs, 640).unwrap();
        assert_eq!(heads.len(), 3);
        assert_eq!(heads[1].stride, 16);
        assert_eq!(heads[1].kps.shape(), &[1600, 10]);

        let bad: [i64; 3] = [1, 100, 1];
        let mut broken = outputs.clone();
        broken[4] = (&bad[..], &data[..100]);
        let err = parse_outputs(&broken, 640).unwrap_err().to_string();
        assert!(err.contains("obj_16"), "{}", err);

        assert!(parse_outputs(&outputs[..5], 640).is_err());
    }
}
