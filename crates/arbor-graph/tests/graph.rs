//! Graph construction, caching and lifecycle behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arbor_core::{ArborError, DType, Tensor};
use arbor_graph::{inits, ops, Graph, Result};

type NoBackward = fn(&Tensor, &[Tensor]) -> Result<Vec<Option<Tensor>>>;

fn values(expr: &arbor_graph::Expr) -> Vec<f32> {
    expr.val().unwrap().to_f32_vec().unwrap()
}

#[test]
fn test_evaluate_simple_graph() {
    let graph = Graph::with_seed(1);
    let a = graph
        .constant([3], DType::F32, inits::from_vec(vec![1.0, 2.0, 3.0]))
        .unwrap();
    let b = graph
        .constant([3], DType::F32, inits::from_vec(vec![10.0, 20.0, 30.0]))
        .unwrap();
    let c = ops::add(&a, &b).unwrap();

    graph.evaluate(&c).unwrap();
    assert_eq!(values(&c), &[11.0, 22.0, 33.0]);
}

#[test]
fn test_val_before_evaluate_fails() {
    let graph = Graph::with_seed(1);
    let a = graph.constant([2], DType::F32, inits::ones()).unwrap();
    assert!(matches!(a.val(), Err(ArborError::NotEvaluated { .. })));
}

#[test]
fn test_evaluate_is_cached_within_generation() {
    let graph = Graph::with_seed(1);
    let x = graph
        .constant([2], DType::F32, inits::from_vec(vec![1.0, 2.0]))
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let lam = ops::lambda(
        &[x.clone()],
        [2],
        DType::F32,
        move |inputs: &[Tensor]| {
            counter.fetch_add(1, Ordering::SeqCst);
            inputs[0].add_scalar(1.0)
        },
        None::<NoBackward>,
    )
    .unwrap();

    graph.evaluate(&lam).unwrap();
    let first = values(&lam);
    graph.evaluate(&lam).unwrap();
    let second = values(&lam);

    // cached, not recomputed, and bit-identical
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(first, &[2.0, 3.0]);
}

#[test]
fn test_generation_invalidates_interior_buffers() {
    let graph = Graph::with_seed(1);
    let x = graph
        .constant([2], DType::F32, inits::from_vec(vec![1.0, 2.0]))
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let lam = ops::lambda(
        &[x.clone()],
        [2],
        DType::F32,
        move |inputs: &[Tensor]| {
            counter.fetch_add(1, Ordering::SeqCst);
            inputs[0].mul_scalar(2.0)
        },
        None::<NoBackward>,
    )
    .unwrap();

    graph.evaluate(&lam).unwrap();
    graph.next_generation();
    graph.evaluate(&lam).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(values(&lam), &[2.0, 4.0]);
}

#[test]
fn test_leaf_values_persist_across_generations() {
    let graph = Graph::with_seed(99);
    let w = graph.param("w", [4], inits::uniform(-1.0, 1.0)).unwrap();
    let y = ops::mul_value(&w, 1.0).unwrap();

    graph.evaluate(&y).unwrap();
    let before = values(&w);
    graph.next_generation();
    graph.evaluate(&y).unwrap();
    // a stochastic initializer must not run again
    assert_eq!(values(&w), before);
}

#[test]
fn test_scalar_constants_are_cached() {
    let graph = Graph::with_seed(1);
    let x = graph.constant([2], DType::F32, inits::ones()).unwrap();

    let a = ops::add_value(&x, 2.0).unwrap();
    let count_after_first = graph.node_count();
    let b = ops::add_value(&x, 2.0).unwrap();
    // only the new add node: the scalar 2.0 constant is shared
    assert_eq!(graph.node_count(), count_after_first + 1);

    graph.evaluate(&a).unwrap();
    graph.evaluate(&b).unwrap();
    assert_eq!(values(&a), values(&b));
}

#[test]
fn test_dropout_masks_are_cached_per_generation() {
    let graph = Graph::with_seed(7);
    let x = graph.constant([64], DType::F32, inits::ones()).unwrap();

    let d1 = ops::dropout(&x, 0.5).unwrap();
    let count = graph.node_count();
    let d2 = ops::dropout(&x, 0.5).unwrap();
    // second call reuses the cached mask constant
    assert_eq!(graph.node_count(), count + 1);

    graph.evaluate(&d1).unwrap();
    graph.evaluate(&d2).unwrap();
    assert_eq!(values(&d1), values(&d2));
    assert!(values(&d1).iter().all(|&v| v == 0.0 || v == 2.0));
}

#[test]
fn test_dropout_zero_probability_is_identity() {
    let graph = Graph::with_seed(7);
    let x = graph.constant([4], DType::F32, inits::ones()).unwrap();
    let d = ops::dropout(&x, 0.0).unwrap();
    assert_eq!(d.id(), x.id());
}

#[test]
fn test_param_registry() {
    let graph = Graph::with_seed(1);
    let w1 = graph.param("w", [2, 2], inits::zeros()).unwrap();
    let w2 = graph.param("w", [2, 2], inits::ones()).unwrap();
    assert_eq!(w1.id(), w2.id());

    let err = graph.param("w", [3, 3], inits::zeros());
    assert!(matches!(err, Err(ArborError::ParamRedefined { .. })));
}

#[test]
fn test_broadcast_incompatible_is_construction_error() {
    let graph = Graph::with_seed(1);
    let a = graph.constant([2], DType::F32, inits::ones()).unwrap();
    let b = graph.constant([3], DType::F32, inits::ones()).unwrap();

    let count = graph.node_count();
    let err = ops::add(&a, &b);
    assert!(matches!(
        err,
        Err(ArborError::BroadcastIncompatible { .. })
    ));
    // the graph is never left partially mutated
    assert_eq!(graph.node_count(), count);
}

#[test]
fn test_axis_out_of_range_is_construction_error() {
    let graph = Graph::with_seed(1);
    let a = graph.constant([2, 3], DType::F32, inits::ones()).unwrap();
    assert!(matches!(
        ops::sum(&a, 2),
        Err(ArborError::AxisOutOfRange { .. })
    ));
    // negative axes resolve from the end
    assert!(ops::sum(&a, -1).is_ok());
    assert!(matches!(
        ops::sum(&a, -3),
        Err(ArborError::AxisOutOfRange { .. })
    ));
}

#[test]
fn test_no_promotion_between_int_and_float() {
    let graph = Graph::with_seed(1);
    let a = graph.constant([2], DType::F32, inits::ones()).unwrap();
    let i = graph
        .constant([2], DType::I32, inits::from_vec_i32(vec![1, 2]))
        .unwrap();
    assert!(matches!(
        ops::add(&a, &i),
        Err(ArborError::NoPromotion { .. })
    ));
}

#[test]
fn test_cross_graph_mixing_fails() {
    let g1 = Graph::with_seed(1);
    let g2 = Graph::with_seed(2);
    let a = g1.constant([2], DType::F32, inits::ones()).unwrap();
    let b = g2.constant([2], DType::F32, inits::ones()).unwrap();
    assert!(matches!(ops::add(&a, &b), Err(ArborError::GraphMismatch)));
}

#[test]
fn test_constant_init_length_checked() {
    let graph = Graph::with_seed(1);
    let err = graph.constant([4], DType::F32, inits::from_vec(vec![1.0, 2.0]));
    assert!(matches!(err, Err(ArborError::ShapeMismatch { .. })));
}

#[test]
fn test_clear_resets_arena() {
    let graph = Graph::with_seed(1);
    let a = graph.constant([2], DType::F32, inits::ones()).unwrap();
    let _ = ops::add_value(&a, 1.0).unwrap();
    assert!(graph.node_count() > 0);
    graph.clear();
    assert_eq!(graph.node_count(), 0);
}

#[test]
fn test_buffer_pool_recycles_released_buffers() {
    let graph = Graph::with_seed(1);
    let x = graph.param("x", [256], inits::uniform(-1.0, 1.0)).unwrap();
    let y = ops::mul_value(&x, 2.0).unwrap();
    let loss = ops::sum(&y, 0).unwrap();

    graph.evaluate(&loss).unwrap();
    graph.backward(&loss).unwrap();
    graph.next_generation();
    // interior buffers and gradients of the dead generation went back
    assert!(graph.pool_metrics().pooled_bytes > 0);

    graph.evaluate(&loss).unwrap();
    graph.backward(&loss).unwrap();
    // the fresh zero-gradient buffer was served from the pool
    assert!(graph.pool_metrics().hits > 0);
}
