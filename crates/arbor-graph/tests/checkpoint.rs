//! Checkpoint controller behavior: early release, transparent
//! recomputation, and gradient equivalence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arbor_core::{DType, Tensor};
use arbor_graph::{inits, ops, Expr, Graph, Result};

fn grad(expr: &Expr) -> Vec<f32> {
    expr.grad().unwrap().to_f32_vec().unwrap()
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-5, "expected {expected:?}, got {actual:?}");
    }
}

/// Build the same small network twice, once with the hidden activation
/// checkpointed, and compare every gradient.
fn run_network(checkpointed: bool) -> (Vec<f32>, Vec<f32>) {
    let graph = Graph::with_seed(5);
    let w = graph
        .param("w", [2, 2], inits::from_vec(vec![0.5, -0.25, 1.0, 0.75]))
        .unwrap();
    let x = graph
        .constant([2, 2], DType::F32, inits::from_vec(vec![1.0, 2.0, 3.0, 4.0]))
        .unwrap();

    let hidden = ops::tanh(&ops::dot(&w, &x, false, false, 1.0).unwrap()).unwrap();
    let hidden = if checkpointed {
        ops::checkpoint(&hidden)
    } else {
        hidden
    };
    let out = ops::mul(&hidden, &hidden).unwrap();
    let loss = ops::sum(&ops::sum(&out, 0).unwrap(), 1).unwrap();

    graph.evaluate(&loss).unwrap();
    graph.backward(&loss).unwrap();
    (loss.val().unwrap().to_f32_vec().unwrap(), grad(&w))
}

#[test]
fn test_checkpoint_is_transparent_to_gradients() {
    let (loss_plain, grad_plain) = run_network(false);
    let (loss_ckpt, grad_ckpt) = run_network(true);
    assert_close(&loss_plain, &loss_ckpt);
    assert_close(&grad_plain, &grad_ckpt);
}

#[test]
fn test_checkpointed_buffer_is_released_and_recomputed() {
    let graph = Graph::with_seed(1);
    let x = graph
        .param("x", [2], inits::from_vec(vec![1.0, 2.0]))
        .unwrap();
    let y = graph
        .param("y", [2], inits::from_vec(vec![3.0, 4.0]))
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let expensive = ops::lambda(
        &[x.clone()],
        [2],
        DType::F32,
        move |inputs: &[Tensor]| {
            counter.fetch_add(1, Ordering::SeqCst);
            inputs[0].mul_scalar(10.0)
        },
        Some(
            |grad_out: &Tensor, _inputs: &[Tensor]| -> Result<Vec<Option<Tensor>>> {
                Ok(vec![Some(grad_out.mul_scalar(10.0)?)])
            },
        ),
    )
    .unwrap();
    let expensive = ops::checkpoint(&expensive);

    let loss = ops::sum(&ops::mul(&expensive, &y).unwrap(), 0).unwrap();
    graph.evaluate(&loss).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // the buffer was released after its only consumer read it
    assert!(expensive.val().is_err());

    // backward needs the value again: recomputed exactly once, and the
    // recomputation triggers no gradient contributions of its own
    graph.backward(&loss).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_close(&grad(&y), &[10.0, 20.0]);
    assert_close(&grad(&x), &[30.0, 40.0]);
}

#[test]
fn test_checkpoint_waits_for_every_consumer() {
    let graph = Graph::with_seed(1);
    let n = graph
        .param("n", [2], inits::from_vec(vec![1.0, 2.0]))
        .unwrap();
    let shared = ops::checkpoint(&ops::mul_value(&n, 3.0).unwrap());

    // two consumers of the checkpointed node
    let c1 = ops::add_value(&shared, 1.0).unwrap();
    let c2 = ops::mul_value(&shared, 2.0).unwrap();
    let loss = ops::add(&ops::sum(&c1, 0).unwrap(), &ops::sum(&c2, 0).unwrap()).unwrap();

    graph.evaluate(&loss).unwrap();
    graph.backward(&loss).unwrap();

    assert_close(
        &loss.val().unwrap().to_f32_vec().unwrap(),
        &[(3.0 + 1.0) + (6.0 + 1.0) + (6.0 + 12.0)],
    );
    // d loss / dn = 3 * (1 + 2)
    assert_close(&grad(&n), &[9.0, 9.0]);
}

#[test]
fn test_checkpoint_on_leaf_is_a_no_op() {
    let graph = Graph::with_seed(1);
    let x = graph
        .param("x", [2], inits::from_vec(vec![1.0, 2.0]))
        .unwrap();
    let x = ops::checkpoint(&x);
    let loss = ops::sum(&x, 0).unwrap();

    graph.evaluate(&loss).unwrap();
    // leaf buffers are never released
    assert!(x.val().is_ok());
    graph.backward(&loss).unwrap();
    assert_close(&grad(&x), &[1.0, 1.0]);
}

#[test]
fn test_release_skipped_when_value_still_needed() {
    // the checkpointed node is also the evaluation target: nothing consumes
    // it inside the closure, so the buffer must survive
    let graph = Graph::with_seed(1);
    let x = graph
        .param("x", [2], inits::from_vec(vec![1.0, 2.0]))
        .unwrap();
    let y = ops::checkpoint(&ops::mul_value(&x, 2.0).unwrap());

    graph.evaluate(&y).unwrap();
    assert!(y.val().is_ok());
}

#[test]
fn test_recompute_uses_identical_leaf_values() {
    // stochastic leaf + checkpointed consumer: recomputation must reuse the
    // retained leaf buffer, not redraw it
    let graph = Graph::with_seed(123);
    let x = graph.param("x", [8], inits::uniform(-1.0, 1.0)).unwrap();
    let doubled = ops::checkpoint(&ops::mul_value(&x, 2.0).unwrap());
    let loss = ops::sum(&ops::mul(&doubled, &doubled).unwrap(), 0).unwrap();

    graph.evaluate(&loss).unwrap();
    let loss_value = loss.val().unwrap().to_f32_vec().unwrap();
    graph.backward(&loss).unwrap();

    // d/dx sum((2x)^2) = 8x
    let x_vals = x.val().unwrap().to_f32_vec().unwrap();
    let expected: Vec<f32> = x_vals.iter().map(|v| 8.0 * v).collect();
    assert_close(&grad(&x), &expected);

    // and the recomputed forward value matches the original
    graph.evaluate(&loss).unwrap();
    assert_close(&loss.val().unwrap().to_f32_vec().unwrap(), &loss_value);
}
