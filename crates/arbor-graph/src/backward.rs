//! Reverse-mode differentiation: the backward traversal and the per-kind
//! gradient rules.

use std::sync::Arc;

use arbor_core::ops::softmax;
use arbor_core::{ArborError, DType, Result, Tensor};

use crate::expr::Expr;
use crate::graph::Graph;
use crate::kind::{Kind, ReduceOp};
use crate::node::Node;

impl Graph {
    /// Propagate gradients back from a scalar-shaped, already-evaluated
    /// target, seeding its gradient with 1.
    pub fn backward(&self, target: &Expr) -> Result<()> {
        self.backward_impl(target, None)
    }

    /// Propagate gradients back from an already-evaluated target using an
    /// explicit seed gradient of matching shape.
    pub fn backward_with(&self, target: &Expr, seed: Tensor) -> Result<()> {
        self.backward_impl(target, Some(seed))
    }

    fn backward_impl(&self, target: &Expr, seed: Option<Tensor>) -> Result<()> {
        self.check_owned(target)?;
        let generation = self.generation();
        let root = &target.node;

        // sequencing errors fail fast: no silent evaluation here
        if root.value_for(generation).is_none() {
            return Err(ArborError::NotEvaluated { id: root.id() });
        }
        if root.dtype() != DType::F32 {
            return Err(ArborError::UnsupportedDType(root.dtype()));
        }
        let seed = match seed {
            Some(s) => {
                if s.shape() != root.shape() {
                    return Err(ArborError::ShapeMismatch {
                        expected: root.shape().dims().to_vec(),
                        got: s.shape().dims().to_vec(),
                    });
                }
                if s.dtype() != root.dtype() {
                    return Err(ArborError::DTypeMismatch {
                        expected: root.dtype(),
                        got: s.dtype(),
                    });
                }
                s
            }
            None => {
                // reductions keep their axis, so "scalar-shaped" means one
                // element, whatever the rank
                if root.shape().numel() != 1 {
                    return Err(ArborError::SeedRequired { id: root.id() });
                }
                Tensor::ones(root.shape())
            }
        };

        let closure = self.closure_of(target.id());

        // Interior gradients are per-pass state; parameter gradients
        // accumulate across passes until zero_grad.
        for &id in &closure {
            let node = self.node(id);
            if !node.is_leaf() {
                if let Some(g) = node.take_grad() {
                    self.reclaim(g);
                }
            }
        }

        // Every trainable leaf in the closure reports a gradient after this
        // pass, even an all-zero one (e.g. behind a comparison).
        for &id in &closure {
            let node = self.node(id);
            if node.is_leaf() && node.trainable() && node.grad().is_none() {
                let zeros = self.zeros_pooled(node.shape(), DType::F32)?;
                self.accumulate_grad(&node, zeros)?;
            }
        }

        self.accumulate_grad(root, seed)?;

        // strictly decreasing creation index over the closure
        for &id in closure.iter().rev() {
            let node = self.node(id);
            if node.is_leaf() {
                continue;
            }
            let Some(grad) = node.grad() else { continue };
            let debug_node = matches!(node.kind(), Kind::Debug { .. });
            if !debug_node && !node.inputs().iter().any(|i| i.needs_grad()) {
                continue;
            }

            // checkpointed buffers may have been released after forward
            self.ensure_value(&node)?;
            for input in node.inputs() {
                self.ensure_value(input)?;
            }

            let grads = rule(&node, &grad, generation)?;
            debug_assert_eq!(grads.len(), node.inputs().len());
            for (input, contribution) in node.inputs().iter().zip(grads) {
                let Some(contribution) = contribution else {
                    continue;
                };
                if input.needs_grad() {
                    self.accumulate_grad(input, contribution)?;
                } else {
                    self.reclaim(contribution);
                }
            }
            tracing::trace!(node = id, kind = node.kind().name(), "backward");
        }
        Ok(())
    }
}

fn value_of(input: &Arc<Node>, generation: u64) -> Result<Tensor> {
    input
        .value_for(generation)
        .ok_or(ArborError::NotEvaluated { id: input.id() })
}

/// Fold a raw gradient back onto input `i`'s shape, summing over any axes
/// the forward broadcast expanded.
fn reduce_for(node: &Node, i: usize, raw: Tensor) -> Result<Option<Tensor>> {
    Ok(Some(raw.reduce_to_shape(node.inputs()[i].shape())?))
}

/// Gradient contributions of one node to each of its inputs.
pub(crate) fn rule(
    node: &Arc<Node>,
    grad: &Tensor,
    generation: u64,
) -> Result<Vec<Option<Tensor>>> {
    let kind = node.kind().clone();
    let val = |i: usize| value_of(&node.inputs()[i], generation);
    let own = || value_of(node, generation);

    match kind {
        Kind::Constant | Kind::Param => Ok(vec![]),

        Kind::Add => Ok(vec![
            reduce_for(node, 0, grad.clone())?,
            reduce_for(node, 1, grad.clone())?,
        ]),
        Kind::Sub => Ok(vec![
            reduce_for(node, 0, grad.clone())?,
            reduce_for(node, 1, grad.neg()?)?,
        ]),
        Kind::Mul => {
            let (a, b) = (val(0)?, val(1)?);
            Ok(vec![
                reduce_for(node, 0, grad.mul(&b)?)?,
                reduce_for(node, 1, grad.mul(&a)?)?,
            ])
        }
        Kind::Div => {
            let (a, b) = (val(0)?, val(1)?);
            let gb_term = a.div(&b.mul(&b)?)?.neg()?;
            Ok(vec![
                reduce_for(node, 0, grad.div(&b)?)?,
                reduce_for(node, 1, grad.mul(&gb_term)?)?,
            ])
        }
        Kind::Maximum => {
            let (a, b) = (val(0)?, val(1)?);
            // first operand wins ties, keeping the subgradient deterministic
            Ok(vec![
                reduce_for(node, 0, grad.mul(&a.ge(&b)?)?)?,
                reduce_for(node, 1, grad.mul(&b.gt(&a)?)?)?,
            ])
        }
        Kind::Minimum => {
            let (a, b) = (val(0)?, val(1)?);
            Ok(vec![
                reduce_for(node, 0, grad.mul(&a.le(&b)?)?)?,
                reduce_for(node, 1, grad.mul(&b.lt(&a)?)?)?,
            ])
        }

        Kind::Neg => Ok(vec![Some(grad.neg()?)]),
        Kind::Abs => Ok(vec![Some(grad.mul(&val(0)?.sign()?)?)]),
        Kind::Exp => Ok(vec![Some(grad.mul(&own()?)?)]),
        Kind::Log => Ok(vec![Some(grad.div(&val(0)?)?)]),
        Kind::Sin => Ok(vec![Some(grad.mul(&val(0)?.cos()?)?)]),
        Kind::Cos => Ok(vec![Some(grad.mul(&val(0)?.sin()?)?.neg()?)]),
        Kind::Tan => {
            let y = own()?;
            Ok(vec![Some(grad.mul(&y.mul(&y)?.add_scalar(1.0)?)?)])
        }
        // forward computed sqrt(x + eps); its derivative is 1 / (2 * output)
        Kind::Sqrt { .. } => Ok(vec![Some(grad.div(&own()?.mul_scalar(2.0)?)?)]),
        Kind::Sigmoid => {
            let y = own()?;
            Ok(vec![Some(grad.mul(&y.map(|v| v * (1.0 - v))?)?)])
        }
        Kind::Tanh => {
            let y = own()?;
            Ok(vec![Some(grad.mul(&y.map(|v| 1.0 - v * v)?)?)])
        }
        Kind::Relu => Ok(vec![Some(
            grad.mul(&val(0)?.map(|v| f32::from(v > 0.0))?)?,
        )]),
        Kind::PRelu { alpha } => Ok(vec![Some(grad.mul(
            &val(0)?.map(move |v| if v > 0.0 { 1.0 } else { alpha })?,
        )?)]),
        Kind::Swish { beta } => {
            let deriv = val(0)?.map(move |v| {
                let s = 1.0 / (1.0 + (-beta * v).exp());
                s + beta * v * s * (1.0 - s)
            })?;
            Ok(vec![Some(grad.mul(&deriv)?)])
        }
        Kind::Clip { c } => Ok(vec![Some(grad.mul(
            &val(0)?.map(move |v| f32::from(v.abs() <= c))?,
        )?)]),

        // forward was identity; the *gradient* is clamped
        Kind::ClipGradient { c } => Ok(vec![Some(grad.clamp(-c, c)?)]),
        // deliberately severs the graph: zero contribution regardless of grad
        Kind::StopGradient => Ok(vec![None]),
        Kind::Debug { message } => {
            tracing::debug!(node = node.id(), "{}: grad {}", message, grad);
            Ok(vec![Some(grad.clone())])
        }
        Kind::Cast => {
            // differentiable only between float representations
            if node.dtype().is_float() && node.inputs()[0].dtype() == DType::F32 {
                Ok(vec![Some(grad.clone())])
            } else {
                Ok(vec![None])
            }
        }

        Kind::Cmp { .. } => Ok(vec![None, None]),

        Kind::Dot {
            trans_a,
            trans_b,
            scale,
        } => {
            let (a, b) = (val(0)?, val(1)?);
            let da = if trans_a {
                b.dot(grad, trans_b, true, scale)?
            } else {
                grad.dot(&b, false, !trans_b, scale)?
            };
            let db = if trans_b {
                grad.dot(&a, true, trans_a, scale)?
            } else {
                a.dot(grad, !trans_a, false, scale)?
            };
            Ok(vec![Some(da), Some(db)])
        }
        Kind::Bdot {
            trans_a,
            trans_b,
            scale,
        } => {
            let (a, b) = (val(0)?, val(1)?);
            let da = if trans_a {
                b.bdot(grad, trans_b, true, scale)?
            } else {
                grad.bdot(&b, false, !trans_b, scale)?
            };
            let db = if trans_b {
                grad.bdot(&a, true, trans_a, scale)?
            } else {
                a.bdot(grad, !trans_a, false, scale)?
            };
            Ok(vec![Some(da), Some(db)])
        }
        Kind::Affine {
            trans_a,
            trans_b,
            scale,
        } => {
            let (a, b) = (val(0)?, val(1)?);
            let da = if trans_a {
                b.dot(grad, trans_b, true, scale)?
            } else {
                grad.dot(&b, false, !trans_b, scale)?
            };
            let db = if trans_b {
                grad.dot(&a, true, trans_a, scale)?
            } else {
                a.dot(grad, !trans_a, false, scale)?
            };
            let dbias = grad.reduce_to_shape(node.inputs()[2].shape())?;
            Ok(vec![Some(da), Some(db), Some(dbias)])
        }

        Kind::Transpose { perm } => {
            let mut inverse = vec![0usize; perm.len()];
            for (i, &p) in perm.iter().enumerate() {
                inverse[p] = i;
            }
            Ok(vec![Some(grad.permute(&inverse)?)])
        }
        Kind::Reshape => Ok(vec![Some(grad.view(node.inputs()[0].shape())?)]),
        Kind::Concat { axis } => {
            let mut grads = Vec::with_capacity(node.inputs().len());
            let mut offset = 0;
            for input in node.inputs() {
                let len = input.shape().dims()[axis];
                grads.push(Some(grad.slice_axis(axis, offset, offset + len)?));
                offset += len;
            }
            Ok(grads)
        }
        Kind::Slice { axis, start, .. } => Ok(vec![Some(grad.embed_axis(
            node.inputs()[0].shape(),
            axis,
            start,
        )?)]),
        Kind::Shift { offsets, .. } => {
            let back: Vec<isize> = offsets.iter().map(|o| -o).collect();
            Ok(vec![Some(grad.shift(&back, 0.0)?)])
        }

        Kind::Gather { axis } => Ok(vec![
            Some(grad.gather_backward(node.inputs()[0].shape(), axis, &val(1)?)?),
            None,
        ]),
        Kind::IndexSelect { axis } => Ok(vec![
            Some(grad.index_select_backward(node.inputs()[0].shape(), axis, &val(1)?)?),
            None,
        ]),

        // gradient flows only to the selected positions
        Kind::TopK { axis, .. } => {
            let indices = node.aux().ok_or(ArborError::NotEvaluated { id: node.id() })?;
            Ok(vec![Some(grad.gather_backward(
                node.inputs()[0].shape(),
                axis,
                &indices,
            )?)])
        }
        Kind::TopKIndices => Ok(vec![None]),

        Kind::Reduce { op, axis } => {
            let x = val(0)?;
            let contribution = match op {
                ReduceOp::Sum => grad.broadcast_to(x.shape())?,
                ReduceOp::Mean => {
                    let n = x.shape().dims()[axis] as f32;
                    grad.broadcast_to(x.shape())?.mul_scalar(1.0 / n)?
                }
                ReduceOp::Max | ReduceOp::Min => {
                    let mask = x.first_match_mask(&own()?, axis)?;
                    mask.mul(grad)?
                }
                ReduceOp::Prod => x.prod_except(axis)?.mul(grad)?,
                ReduceOp::LogSumExp => x.softmax_axis(axis, None)?.mul(grad)?,
            };
            Ok(vec![Some(contribution)])
        }

        Kind::Softmax { axis } => {
            let y = own()?;
            let s = grad.mul(&y)?.sum_axis(axis)?;
            let gx = grad.sub(&s)?.mul(&y)?;
            let mut grads = vec![Some(gx)];
            if node.inputs().len() == 2 {
                grads.push(None); // the 0/1 mask gets no gradient
            }
            Ok(grads)
        }
        Kind::LogSoftmax => {
            let y = own()?;
            let axis = y.ndim() - 1;
            let s = grad.sum_axis(axis)?;
            Ok(vec![Some(grad.sub(&y.exp()?.mul(&s)?)?)])
        }
        Kind::CrossEntropy { smoothing } => Ok(vec![
            Some(softmax::cross_entropy_backward(
                &val(0)?,
                &val(1)?,
                grad,
                smoothing,
            )?),
            None,
        ]),

        Kind::AvgPool(spec) => Ok(vec![Some(
            grad.avg_pool2d_backward(node.inputs()[0].shape(), spec)?,
        )]),
        Kind::MaxPool(_) => {
            let argmax = node.aux().ok_or(ArborError::NotEvaluated { id: node.id() })?;
            Ok(vec![Some(
                grad.max_pool2d_backward(node.inputs()[0].shape(), &argmax)?,
            )])
        }

        Kind::Lambda(rules) => match rules.backward {
            Some(ref backward) => {
                let inputs: Vec<Tensor> = node
                    .inputs()
                    .iter()
                    .map(|i| value_of(i, generation))
                    .collect::<Result<_>>()?;
                let grads = backward(grad, &inputs)?;
                if grads.len() != node.inputs().len() {
                    return Err(ArborError::ShapeMismatch {
                        expected: vec![node.inputs().len()],
                        got: vec![grads.len()],
                    });
                }
                Ok(grads)
            }
            None => Ok(vec![None; node.inputs().len()]),
        },
    }
}
