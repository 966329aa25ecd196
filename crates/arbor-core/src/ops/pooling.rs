//! 2-D pooling kernels over `[batch, channels, height, width]` inputs.

use crate::error::ArborError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

/// Window geometry shared by the pooling kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool2d {
    pub kernel: (usize, usize),
    pub pad: (usize, usize),
    pub stride: (usize, usize),
}

impl Pool2d {
    /// Output (height, width) for an input plane, or an error if the window
    /// never fits.
    pub fn output_hw(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let (kh, kw) = self.kernel;
        let (ph, pw) = self.pad;
        let (sh, sw) = self.stride;
        if kh == 0 || kw == 0 || sh == 0 || sw == 0 || h + 2 * ph < kh || w + 2 * pw < kw {
            return Err(ArborError::ShapeMismatch {
                expected: vec![kh, kw],
                got: vec![h + 2 * ph, w + 2 * pw],
            });
        }
        Ok(((h + 2 * ph - kh) / sh + 1, (w + 2 * pw - kw) / sw + 1))
    }
}

fn nchw(shape: &Shape) -> Result<(usize, usize, usize, usize)> {
    let dims = shape.dims();
    if dims.len() != 4 {
        return Err(ArborError::ShapeMismatch {
            expected: vec![4],
            got: vec![dims.len()],
        });
    }
    Ok((dims[0], dims[1], dims[2], dims[3]))
}

impl Tensor {
    /// Average pooling. Padded positions count toward the window average
    /// (divide-by-kernel-area semantics).
    pub fn avg_pool2d(&self, spec: Pool2d) -> Result<Tensor> {
        let (n, c, h, w) = nchw(self.shape())?;
        let (ho, wo) = spec.output_hw(h, w)?;
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let area = (spec.kernel.0 * spec.kernel.1) as f32;
        let mut out = vec![0.0f32; n * c * ho * wo];
        for plane in 0..n * c {
            let src = &data[plane * h * w..(plane + 1) * h * w];
            let dst = &mut out[plane * ho * wo..(plane + 1) * ho * wo];
            for oy in 0..ho {
                for ox in 0..wo {
                    let mut sum = 0.0f32;
                    for ky in 0..spec.kernel.0 {
                        for kx in 0..spec.kernel.1 {
                            let y = (oy * spec.stride.0 + ky) as isize - spec.pad.0 as isize;
                            let x = (ox * spec.stride.1 + kx) as isize - spec.pad.1 as isize;
                            if y >= 0 && (y as usize) < h && x >= 0 && (x as usize) < w {
                                sum += src[y as usize * w + x as usize];
                            }
                        }
                    }
                    dst[oy * wo + ox] = sum / area;
                }
            }
        }
        Ok(Tensor::from_f32(&out, &[n, c, ho, wo]))
    }

    /// Adjoint of `avg_pool2d`: each output gradient spreads evenly over its
    /// window.
    pub fn avg_pool2d_backward(&self, input: &Shape, spec: Pool2d) -> Result<Tensor> {
        let (n, c, h, w) = nchw(input)?;
        let (ho, wo) = spec.output_hw(h, w)?;
        let grad = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let area = (spec.kernel.0 * spec.kernel.1) as f32;
        let mut out = vec![0.0f32; input.numel()];
        for plane in 0..n * c {
            let g = &grad[plane * ho * wo..(plane + 1) * ho * wo];
            let dst = &mut out[plane * h * w..(plane + 1) * h * w];
            for oy in 0..ho {
                for ox in 0..wo {
                    let share = g[oy * wo + ox] / area;
                    for ky in 0..spec.kernel.0 {
                        for kx in 0..spec.kernel.1 {
                            let y = (oy * spec.stride.0 + ky) as isize - spec.pad.0 as isize;
                            let x = (ox * spec.stride.1 + kx) as isize - spec.pad.1 as isize;
                            if y >= 0 && (y as usize) < h && x >= 0 && (x as usize) < w {
                                dst[y as usize * w + x as usize] += share;
                            }
                        }
                    }
                }
            }
        }
        Ok(Tensor::from_f32(&out, input.dims()))
    }

    /// Max pooling. Returns the pooled values plus, per output position, the
    /// flat `y * w + x` index of the selected input element (ties toward the
    /// scan-order-first position). Windows that cover only padding yield 0
    /// with index -1.
    pub fn max_pool2d(&self, spec: Pool2d) -> Result<(Tensor, Tensor)> {
        let (n, c, h, w) = nchw(self.shape())?;
        let (ho, wo) = spec.output_hw(h, w)?;
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let mut out = vec![0.0f32; n * c * ho * wo];
        let mut arg = vec![-1i32; n * c * ho * wo];
        for plane in 0..n * c {
            let src = &data[plane * h * w..(plane + 1) * h * w];
            for oy in 0..ho {
                for ox in 0..wo {
                    let mut best = f32::NEG_INFINITY;
                    let mut best_at = -1i32;
                    for ky in 0..spec.kernel.0 {
                        for kx in 0..spec.kernel.1 {
                            let y = (oy * spec.stride.0 + ky) as isize - spec.pad.0 as isize;
                            let x = (ox * spec.stride.1 + kx) as isize - spec.pad.1 as isize;
                            if y >= 0 && (y as usize) < h && x >= 0 && (x as usize) < w {
                                let v = src[y as usize * w + x as usize];
                                if v > best {
                                    best = v;
                                    best_at = (y as usize * w + x as usize) as i32;
                                }
                            }
                        }
                    }
                    let pos = plane * ho * wo + oy * wo + ox;
                    out[pos] = if best_at < 0 { 0.0 } else { best };
                    arg[pos] = best_at;
                }
            }
        }
        Ok((
            Tensor::from_f32(&out, &[n, c, ho, wo]),
            Tensor::from_i32(&arg, &[n, c, ho, wo]),
        ))
    }

    /// Adjoint of `max_pool2d`: the gradient routes to the recorded argmax
    /// position of each window.
    pub fn max_pool2d_backward(&self, input: &Shape, argmax: &Tensor) -> Result<Tensor> {
        let (n, c, h, w) = nchw(input)?;
        let grad = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let arg = argmax
            .as_i32_slice()
            .ok_or(ArborError::UnsupportedDType(argmax.dtype()))?;
        let per_plane = self.numel() / (n * c);
        let mut out = vec![0.0f32; input.numel()];
        for plane in 0..n * c {
            for p in 0..per_plane {
                let at = arg[plane * per_plane + p];
                if at >= 0 {
                    out[plane * h * w + at as usize] += grad[plane * per_plane + p];
                }
            }
        }
        Ok(Tensor::from_f32(&out, input.dims()))
    }
}
