//! Softmax family and the fused cross-entropy kernel.

use crate::error::ArborError;
use crate::ops::arithmetic::broadcast_index;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

fn axis_extents(shape: &Shape, axis: usize) -> (usize, usize, usize) {
    let dims = shape.dims();
    (
        dims[..axis].iter().product(),
        dims[axis],
        dims[axis + 1..].iter().product(),
    )
}

impl Tensor {
    /// Numerically stable softmax along `axis`, optionally masked.
    ///
    /// With a mask, probabilities are `exp(x - m) * mask` renormalized; a
    /// fully masked slice yields all zeros rather than NaN.
    pub fn softmax_axis(&self, axis: usize, mask: Option<&Tensor>) -> Result<Tensor> {
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let mask_data = match mask {
            Some(m) => Some(
                m.as_f32_slice()
                    .ok_or(ArborError::UnsupportedDType(m.dtype()))?,
            ),
            None => None,
        };
        let (outer, n, inner) = axis_extents(self.shape(), axis);
        let mut out = vec![0.0f32; data.len()];

        for o in 0..outer {
            for i in 0..inner {
                let flat = |j: usize| (o * n + j) * inner + i;
                let mask_at = |j: usize| match (mask, mask_data) {
                    (Some(m), Some(md)) => md[broadcast_index(flat(j), self.shape(), m.shape())],
                    _ => 1.0,
                };

                let mut m = f32::NEG_INFINITY;
                for j in 0..n {
                    if mask_at(j) != 0.0 {
                        m = m.max(data[flat(j)]);
                    }
                }
                if m == f32::NEG_INFINITY {
                    continue; // fully masked slice stays zero
                }
                let mut sum = 0.0f32;
                for j in 0..n {
                    let e = (data[flat(j)] - m).exp() * mask_at(j);
                    out[flat(j)] = e;
                    sum += e;
                }
                if sum > 0.0 {
                    for j in 0..n {
                        out[flat(j)] /= sum;
                    }
                }
            }
        }
        Ok(Tensor::from_f32(&out, self.shape().dims()))
    }

    /// Numerically stable log-softmax along `axis`.
    pub fn logsoftmax_axis(&self, axis: usize) -> Result<Tensor> {
        let lse = self.logsumexp_axis(axis)?;
        self.sub(&lse)
    }
}

/// Fused cross-entropy forward: `-logsoftmax(logits)` picked at each label.
///
/// `logits` has shape `[..., classes]`; `labels` is an i32 tensor matching
/// the leading dims. The result drops the class axis. `smoothing` spreads
/// that fraction of the target mass uniformly over all classes.
pub fn cross_entropy(logits: &Tensor, labels: &Tensor, smoothing: f32) -> Result<Tensor> {
    let classes = match logits.shape().dims().last() {
        Some(&c) => c,
        None => {
            return Err(ArborError::AxisOutOfRange {
                axis: -1,
                rank: 0,
            })
        }
    };
    let rows = logits.numel() / classes;
    let lead = &logits.shape().dims()[..logits.ndim() - 1];
    if labels.shape().dims() != lead {
        return Err(ArborError::ShapeMismatch {
            expected: lead.to_vec(),
            got: labels.shape().dims().to_vec(),
        });
    }
    let idx = labels
        .as_i32_slice()
        .ok_or(ArborError::UnsupportedDType(labels.dtype()))?;
    let logp = logits.logsoftmax_axis(logits.ndim() - 1)?;
    let lp = logp.as_f32_slice().ok_or(ArborError::UnsupportedDType(logp.dtype()))?;

    let mut out = vec![0.0f32; rows];
    for r in 0..rows {
        let label = idx[r];
        if label < 0 || label as usize >= classes {
            return Err(ArborError::IndexOutOfBounds {
                index: i64::from(label),
                size: classes,
            });
        }
        let picked = lp[r * classes + label as usize];
        if smoothing == 0.0 {
            out[r] = -picked;
        } else {
            let uniform: f32 = lp[r * classes..(r + 1) * classes].iter().sum::<f32>()
                / classes as f32;
            out[r] = -((1.0 - smoothing) * picked + smoothing * uniform);
        }
    }
    Ok(Tensor::from_f32(&out, lead))
}

/// Cross-entropy backward: `(softmax(logits) - target) * grad` per row,
/// where the target distribution carries the label smoothing.
pub fn cross_entropy_backward(
    logits: &Tensor,
    labels: &Tensor,
    grad: &Tensor,
    smoothing: f32,
) -> Result<Tensor> {
    let classes = *logits
        .shape()
        .dims()
        .last()
        .expect("validated at construction");
    let rows = logits.numel() / classes;
    let idx = labels
        .as_i32_slice()
        .ok_or(ArborError::UnsupportedDType(labels.dtype()))?;
    let g = grad
        .as_f32_slice()
        .ok_or(ArborError::UnsupportedDType(grad.dtype()))?;
    let probs = logits.softmax_axis(logits.ndim() - 1, None)?;
    let p = probs.as_f32_slice().ok_or(ArborError::UnsupportedDType(probs.dtype()))?;

    let uniform = smoothing / classes as f32;
    let mut out = vec![0.0f32; logits.numel()];
    for r in 0..rows {
        let label = idx[r] as usize;
        for c in 0..classes {
            let target = if c == label { 1.0 - smoothing } else { 0.0 } + uniform;
            out[r * classes + c] = (p[r * classes + c] - target) * g[r];
        }
    }
    Ok(Tensor::from_f32(&out, logits.shape().dims()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 1.0, 1.0, 1.0], &[2, 3]);
        let s = t.softmax_axis(1, None).unwrap();
        let data = s.as_f32_slice().unwrap();
        for r in 0..2 {
            let sum: f32 = data[r * 3..(r + 1) * 3].iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
        // uniform logits → uniform probabilities
        assert!((data[3] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_masked() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0], &[1, 3]);
        let mask = Tensor::from_f32(&[1.0, 0.0, 1.0], &[1, 3]);
        let s = t.softmax_axis(1, Some(&mask)).unwrap();
        let data = s.as_f32_slice().unwrap();
        assert_eq!(data[1], 0.0);
        assert!((data[0] + data[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_logsoftmax_matches_softmax() {
        let t = Tensor::from_f32(&[0.5, -1.0, 2.0], &[1, 3]);
        let ls = t.logsoftmax_axis(1).unwrap();
        let s = t.softmax_axis(1, None).unwrap();
        for (l, p) in ls
            .as_f32_slice()
            .unwrap()
            .iter()
            .zip(s.as_f32_slice().unwrap())
        {
            assert!((l.exp() - p).abs() < 1e-6);
        }
    }

    #[test]
    fn test_cross_entropy_uniform() {
        // uniform logits over 4 classes: loss is ln(4) regardless of label
        let logits = Tensor::from_f32(&[0.0; 4], &[1, 4]);
        let labels = Tensor::from_i32(&[2], &[1]);
        let ce = cross_entropy(&logits, &labels, 0.0).unwrap();
        assert!((ce.as_f32_slice().unwrap()[0] - 4.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_bad_label() {
        let logits = Tensor::from_f32(&[0.0; 4], &[1, 4]);
        let labels = Tensor::from_i32(&[7], &[1]);
        assert!(cross_entropy(&logits, &labels, 0.0).is_err());
    }

    #[test]
    fn test_cross_entropy_backward_sums_to_zero() {
        let logits = Tensor::from_f32(&[0.3, -0.2, 1.0], &[1, 3]);
        let labels = Tensor::from_i32(&[0], &[1]);
        let grad = Tensor::from_f32(&[1.0], &[1]);
        let g = cross_entropy_backward(&logits, &labels, &grad, 0.0).unwrap();
        let sum: f32 = g.as_f32_slice().unwrap().iter().sum();
        // softmax minus one-hot sums to zero per row
        assert!(sum.abs() < 1e-6);
    }
}
