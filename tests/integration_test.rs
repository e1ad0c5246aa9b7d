//! End-to-end checks across tensors, layers, losses, datasets and training

use std::fs;

use neural::data::{one_hot, synthetic_blobs};
use neural::{
    evaluate, CrossEntropyLoss, Dataset, Error, Layer, Linear, Loss, MeanSquaredErrorLoss,
    MnistDataset, ReLU, Sequential, Sgd, Softmax, Tensor, TrainConfig, Trainer,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn seeded_linear(in_features: usize, out_features: usize, rng: &mut StdRng) -> Linear {
    let w = Tensor::random_uniform_with(vec![in_features, out_features], -0.5, 0.5, rng).unwrap();
    Linear::new(w).unwrap()
}

#[test]
fn test_manual_training_step_reduces_loss() {
    // the loop a caller writes by hand: forward each layer, loss, backward
    // each layer in reverse, then update
    let mut rng = StdRng::seed_from_u64(3);
    let mut first = seeded_linear(4, 32, &mut rng);
    let mut relu = ReLU;
    let mut second = seeded_linear(32, 2, &mut rng);
    let loss = MeanSquaredErrorLoss;

    let x = Tensor::new(vec![1, 4], vec![0.5, -0.2, 0.1, 0.9]).unwrap();
    let y = one_hot(1, 2).unwrap();

    let mut losses = Vec::new();
    for _ in 0..50 {
        let h0 = first.forward(&x).unwrap();
        let h1 = relu.forward(&h0).unwrap();
        let pred = second.forward(&h1).unwrap();
        losses.push(loss.forward(&pred, &y).unwrap());

        let grad = loss.backward(&pred, &y).unwrap();
        let grad = second.backward(&h1, &grad).unwrap();
        let grad = relu.backward(&h0, &grad).unwrap();
        let grad = first.backward(&x, &grad).unwrap();
        assert_eq!(grad.shape(), &[1, 4]);

        second.update_weights(0.1).unwrap();
        first.update_weights(0.1).unwrap();
    }
    assert!(losses[49] < losses[0], "{:?}", losses);
}

#[test]
fn test_softmax_cross_entropy_pipeline() {
    let mut model = Sequential::default()
        .push(Linear::new(Tensor::zeros(vec![3, 3])).unwrap())
        .push(Softmax);
    model.check_loss(&CrossEntropyLoss).unwrap();

    let x = Tensor::new(vec![2, 3], vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
    let y = Tensor::new(vec![2, 3], vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();

    let acts = model.forward(&x).unwrap();
    // zero weights give uniform probabilities
    for p in acts.output.data() {
        assert!((p - 1.0 / 3.0).abs() < 1e-6);
    }
    let grad = CrossEntropyLoss.backward(&acts.output, &y).unwrap();
    let dx = model.backward(&acts, &grad).unwrap();
    assert_eq!(dx.shape(), &[2, 3]);

    let before = CrossEntropyLoss.forward(&acts.output, &y).unwrap();
    Sgd::new(1.0).step(&mut model.parameters_mut()).unwrap();
    let after = CrossEntropyLoss
        .forward(&model.predict(&x).unwrap(), &y)
        .unwrap();
    assert!(after < before);
    assert_eq!(model.predict(&x).unwrap().argmax_rows().unwrap(), vec![0, 2]);
}

#[test]
fn test_trainer_fits_mlp_with_mse() {
    let data = synthetic_blobs(60, 5, 3, 0.1, 11).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let mut model = Sequential::default()
        .push(seeded_linear(5, 16, &mut rng))
        .push(ReLU)
        .push(seeded_linear(16, 3, &mut rng));

    let config = TrainConfig::default()
        .epochs(15)
        .learning_rate(0.1)
        .lr_decay(1.0)
        .log_every(0)
        .eval_every(0);
    let history = Trainer::new(config)
        .fit(&mut model, &MeanSquaredErrorLoss, &data, Some(&data))
        .unwrap();

    assert_eq!(history.len(), 15);
    assert!(history[14].mean_loss < history[0].mean_loss);
    assert_eq!(
        history[14].test_accuracy,
        Some(evaluate(&model, &data).unwrap())
    );
}

#[test]
fn test_mnist_files_on_disk() {
    let dir = std::env::temp_dir().join(format!("neural-mnist-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();

    let mut images = Vec::new();
    for v in [2051u32, 3, 2, 2] {
        images.extend_from_slice(&v.to_be_bytes());
    }
    images.extend_from_slice(&[0, 0, 0, 255, 255, 0, 0, 0, 0, 255, 0, 0]);
    let mut labels = Vec::new();
    for v in [2049u32, 3] {
        labels.extend_from_slice(&v.to_be_bytes());
    }
    labels.extend_from_slice(&[7, 0, 4]);
    fs::write(dir.join("t10k-images-idx3-ubyte"), &images).unwrap();
    fs::write(dir.join("t10k-labels-idx1-ubyte"), &labels).unwrap();

    let test = MnistDataset::load(&dir, false).unwrap();
    assert_eq!(test.len(), 3);
    let (x, y) = test.get(0).unwrap();
    assert_eq!(x.shape(), &[1, 4]);
    assert_eq!(x.data(), &[0.0, 0.0, 0.0, 1.0]);
    assert_eq!(y.shape(), &[1, 10]);
    assert_eq!(y.max_idx(), 7);

    // the training split was never written
    assert!(matches!(MnistDataset::load(&dir, true), Err(Error::Io(_))));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_rejections() {
    let pred = Tensor::zeros(vec![2, 3]);
    let target = Tensor::zeros(vec![2, 4]);
    assert!(matches!(
        CrossEntropyLoss.forward(&pred, &target),
        Err(Error::ShapeMismatch { .. })
    ));
    assert!(matches!(
        Softmax.forward(&Tensor::zeros(vec![1, 2, 3])),
        Err(Error::InvalidRank { .. })
    ));

    let mut linear = Linear::new(Tensor::zeros(vec![3, 2])).unwrap();
    assert!(linear.forward(&Tensor::zeros(vec![1, 4])).is_err());
    assert!(matches!(
        linear.update_weights(0.1),
        Err(Error::MissingGradient { .. })
    ));
}

proptest! {
    #[test]
    fn prop_softmax_rows_are_distributions(
        (rows, cols, data) in (1usize..5, 2usize..8)
            .prop_flat_map(|(r, c)| (Just(r), Just(c), prop::collection::vec(-5.0f32..5.0, r * c)))
    ) {
        let x = Tensor::new(vec![rows, cols], data).unwrap();
        let y = Softmax.forward(&x).unwrap();
        prop_assert_eq!(y.shape(), &[rows, cols][..]);
        for r in 0..rows {
            let row = y.row(r).unwrap();
            let sum: f32 = row.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-5);
            prop_assert!(row.iter().all(|&p| p > 0.0 && p < 1.0));
        }
    }

    #[test]
    fn prop_cross_entropy_gradient_is_residual_over_batch(
        (batch, classes, probs, labels) in (1usize..5, 2usize..6).prop_flat_map(|(b, c)| (
            Just(b),
            Just(c),
            prop::collection::vec(0.01f32..0.99, b * c),
            prop::collection::vec(0usize..c, b),
        ))
    ) {
        let mut target = vec![0.0; batch * classes];
        for (row, &label) in labels.iter().enumerate() {
            target[row * classes + label] = 1.0;
        }
        let pred = Tensor::new(vec![batch, classes], probs.clone()).unwrap();
        let y = Tensor::new(vec![batch, classes], target.clone()).unwrap();
        let grad = CrossEntropyLoss.backward(&pred, &y).unwrap();
        for ((g, p), t) in grad.data().iter().zip(&probs).zip(&target) {
            prop_assert!((g - (p - t) / batch as f32).abs() < 1e-6);
        }
    }

    #[test]
    fn prop_linear_shapes(batch in 1usize..6, in_features in 1usize..6, out_features in 1usize..6, seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut layer = seeded_linear(in_features, out_features, &mut rng);
        let x = Tensor::random_uniform_with(vec![batch, in_features], -1.0, 1.0, &mut rng).unwrap();
        let y = layer.forward(&x).unwrap();
        prop_assert_eq!(y.shape(), &[batch, out_features][..]);

        let dy = Tensor::random_uniform_with(vec![batch, out_features], -1.0, 1.0, &mut rng).unwrap();
        let dx = layer.backward(&x, &dy).unwrap();
        prop_assert_eq!(dx.shape(), &[batch, in_features][..]);
        prop_assert_eq!(layer.weight.grad().unwrap().shape(), &[in_features, out_features][..]);
    }

    #[test]
    fn prop_relu_gates_gradient(
        (x, dy) in (1usize..16).prop_flat_map(|n| (
            prop::collection::vec(-10.0f32..10.0, n),
            prop::collection::vec(-10.0f32..10.0, n),
        ))
    ) {
        let n = x.len();
        let input = Tensor::new(vec![1, n], x.clone()).unwrap();
        let grad = Tensor::new(vec![1, n], dy.clone()).unwrap();
        let dx = ReLU.backward(&input, &grad).unwrap();
        for i in 0..n {
            let expected = if x[i] > 0.0 { dy[i] } else { 0.0 };
            prop_assert_eq!(dx.data()[i], expected);
        }
    }
}
