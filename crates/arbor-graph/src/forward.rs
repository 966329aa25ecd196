//! Forward kernel dispatch: maps a node's kind to the CPU kernel that
//! computes its value from already-evaluated inputs.

use arbor_core::ops::manipulation;
use arbor_core::ops::softmax;
use arbor_core::{ArborError, DType, Result, Tensor};

use crate::kind::{CmpOp, Kind, ReduceOp};
use crate::node::Node;

/// Input values of `node`, all guaranteed evaluated by the traversal order.
fn input_values(node: &Node, generation: u64) -> Result<Vec<Tensor>> {
    node.inputs()
        .iter()
        .map(|i| {
            i.value_for(generation)
                .ok_or(ArborError::NotEvaluated { id: i.id() })
        })
        .collect()
}

/// Cast a value up to the node's promoted dtype when the input carried a
/// narrower type.
fn promoted(t: &Tensor, dtype: DType) -> Result<Tensor> {
    if t.dtype() == dtype {
        Ok(t.clone())
    } else {
        t.cast(dtype)
    }
}

fn preview(t: &Tensor) -> String {
    format!("{t}")
}

/// Compute the forward value of one node.
pub(crate) fn compute(node: &Node, generation: u64) -> Result<Tensor> {
    let kind = node.kind().clone();
    match kind {
        Kind::Constant | Kind::Param => {
            let init = node
                .init()
                .ok_or_else(|| ArborError::Storage("leaf node without initializer".into()))?;
            let graph = node.graph.upgrade().ok_or(ArborError::GraphDropped)?;
            let mut rng = graph.rng.lock();
            init.fill_tensor(node.shape(), node.dtype(), &mut rng)
        }

        Kind::Add | Kind::Sub | Kind::Mul | Kind::Div | Kind::Maximum | Kind::Minimum => {
            let vals = input_values(node, generation)?;
            let a = promoted(&vals[0], node.dtype())?;
            let b = promoted(&vals[1], node.dtype())?;
            match kind {
                Kind::Add => a.add(&b),
                Kind::Sub => a.sub(&b),
                Kind::Mul => a.mul(&b),
                Kind::Div => a.div(&b),
                Kind::Maximum => a.zip(&b, f32::max),
                Kind::Minimum => a.zip(&b, f32::min),
                _ => unreachable!(),
            }
        }

        Kind::Neg => input_values(node, generation)?[0].neg(),
        Kind::Abs => input_values(node, generation)?[0].abs(),
        Kind::Exp => input_values(node, generation)?[0].exp(),
        Kind::Log => input_values(node, generation)?[0].log(),
        Kind::Sin => input_values(node, generation)?[0].sin(),
        Kind::Cos => input_values(node, generation)?[0].cos(),
        Kind::Tan => input_values(node, generation)?[0].tan(),
        Kind::Sqrt { eps } => input_values(node, generation)?[0].map(move |v| (v + eps).sqrt()),
        Kind::Sigmoid => input_values(node, generation)?[0].map(|v| 1.0 / (1.0 + (-v).exp())),
        Kind::Tanh => input_values(node, generation)?[0].map(f32::tanh),
        Kind::Relu => input_values(node, generation)?[0].map(|v| v.max(0.0)),
        Kind::PRelu { alpha } => {
            input_values(node, generation)?[0].map(move |v| if v > 0.0 { v } else { alpha * v })
        }
        Kind::Swish { beta } => input_values(node, generation)?[0]
            .map(move |v| v / (1.0 + (-beta * v).exp())),
        Kind::Clip { c } => input_values(node, generation)?[0].clamp(-c, c),

        // value passes through; only the backward rule differs from identity
        Kind::ClipGradient { .. } | Kind::StopGradient => {
            Ok(input_values(node, generation)?.swap_remove(0))
        }

        Kind::Debug { message } => {
            let value = input_values(node, generation)?.swap_remove(0);
            tracing::debug!(node = node.id(), "{}: {}", message, preview(&value));
            Ok(value)
        }

        Kind::Cast => input_values(node, generation)?[0].cast(node.dtype()),

        Kind::Cmp { op } => {
            let vals = input_values(node, generation)?;
            let a = promoted(&vals[0], node.dtype())?.cast(DType::F32)?;
            let b = promoted(&vals[1], node.dtype())?.cast(DType::F32)?;
            let mask = match op {
                CmpOp::Lt => a.lt(&b),
                CmpOp::Le => a.le(&b),
                CmpOp::Gt => a.gt(&b),
                CmpOp::Ge => a.ge(&b),
                CmpOp::Eq => a.eq(&b),
                CmpOp::Ne => a.ne(&b),
            }?;
            mask.cast(node.dtype())
        }

        Kind::Dot {
            trans_a,
            trans_b,
            scale,
        } => {
            let vals = input_values(node, generation)?;
            vals[0].dot(&vals[1], trans_a, trans_b, scale)
        }
        Kind::Bdot {
            trans_a,
            trans_b,
            scale,
        } => {
            let vals = input_values(node, generation)?;
            vals[0].bdot(&vals[1], trans_a, trans_b, scale)
        }
        Kind::Affine {
            trans_a,
            trans_b,
            scale,
        } => {
            let vals = input_values(node, generation)?;
            let product = vals[0].dot(&vals[1], trans_a, trans_b, scale)?;
            product.add(&vals[2])
        }

        Kind::Transpose { ref perm } => input_values(node, generation)?[0].permute(perm),
        Kind::Reshape => input_values(node, generation)?[0].view(node.shape()),
        Kind::Concat { axis } => {
            let vals = input_values(node, generation)?;
            let refs: Vec<&Tensor> = vals.iter().collect();
            manipulation::concat(&refs, axis)
        }
        Kind::Slice { axis, start, end } => {
            input_values(node, generation)?[0].slice_axis(axis, start, end)
        }
        Kind::Shift { ref offsets, pad } => input_values(node, generation)?[0].shift(offsets, pad),

        Kind::Gather { axis } => {
            let vals = input_values(node, generation)?;
            vals[0].gather(axis, &vals[1])
        }
        Kind::IndexSelect { axis } => {
            let vals = input_values(node, generation)?;
            vals[0].index_select(axis, &vals[1])
        }

        Kind::TopK {
            axis,
            k,
            descending,
        } => {
            let vals = input_values(node, generation)?;
            let (values, indices) = vals[0].topk(axis, k, descending)?;
            node.set_aux(indices);
            Ok(values)
        }
        // the paired indices node reads its sibling's aux buffer
        Kind::TopKIndices => {
            let source = &node.inputs()[0];
            source
                .aux()
                .ok_or(ArborError::NotEvaluated { id: source.id() })
        }

        Kind::Reduce { op, axis } => {
            let vals = input_values(node, generation)?;
            match op {
                ReduceOp::Sum => vals[0].sum_axis(axis),
                ReduceOp::Mean => vals[0].mean_axis(axis),
                ReduceOp::Max => vals[0].max_axis(axis),
                ReduceOp::Min => vals[0].min_axis(axis),
                ReduceOp::Prod => vals[0].prod_axis(axis),
                ReduceOp::LogSumExp => vals[0].logsumexp_axis(axis),
            }
        }

        Kind::Softmax { axis } => {
            let vals = input_values(node, generation)?;
            vals[0].softmax_axis(axis, vals.get(1))
        }
        Kind::LogSoftmax => {
            let value = &input_values(node, generation)?[0];
            value.logsoftmax_axis(value.ndim() - 1)
        }
        Kind::CrossEntropy { smoothing } => {
            let vals = input_values(node, generation)?;
            softmax::cross_entropy(&vals[0], &vals[1], smoothing)
        }

        Kind::AvgPool(spec) => input_values(node, generation)?[0].avg_pool2d(spec),
        Kind::MaxPool(spec) => {
            let vals = input_values(node, generation)?;
            let (values, argmax) = vals[0].max_pool2d(spec)?;
            node.set_aux(argmax);
            Ok(values)
        }

        Kind::Lambda(rules) => {
            let vals = input_values(node, generation)?;
            let value = (rules.forward)(&vals)?;
            if value.shape() != node.shape() {
                return Err(ArborError::ShapeMismatch {
                    expected: node.shape().dims().to_vec(),
                    got: value.shape().dims().to_vec(),
                });
            }
            if value.dtype() != node.dtype() {
                return Err(ArborError::DTypeMismatch {
                    expected: node.dtype(),
                    got: value.dtype(),
                });
            }
            Ok(value)
        }
    }
}
