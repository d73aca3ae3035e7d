//! End-to-end attack scenarios against linear oracles.

use super::{init_tracing, two_class_linear, Call, Recording};
use crate::*;
use cw_core::labels::{argmax_rows, one_hot};
use cw_core::LinearClassifier;
use ndarray::{arr1, arr2, Array2, ArrayD, Axis, IxDyn};

/// Three classes over six features; class 0 wins at [`scenario_a_input`],
/// class 2 is reached by moving `x0` down and the rest up.
fn scenario_a_classifier() -> LinearClassifier {
    LinearClassifier::new(
        arr2(&[
            [2.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 2.0, 0.0, 0.0, 0.0, 0.0],
            [1.0, 1.0, 0.05, 0.05, 0.05, 0.05],
        ]),
        arr1(&[0.0, 0.0, 0.2]),
        vec![6],
        ClipValues::scalar(0.0, 1.0).unwrap(),
    )
    .unwrap()
}

fn scenario_a_input() -> ArrayD<f32> {
    arr2(&[[0.6_f32, 0.2, 0.5, 0.5, 0.5, 0.5]]).into_dyn()
}

fn l2_norm(a: &ArrayD<f32>, b: &ArrayD<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Smallest signed-gradient step (in increments of 0.001) that reaches `target`.
fn gradient_sign_baseline(
    clf: &LinearClassifier,
    x: &ArrayD<f32>,
    source: usize,
    target: usize,
) -> ArrayD<f32> {
    let direction = (&clf.weights().row(target) - &clf.weights().row(source)).mapv(f32::signum);
    for step in 1..=1000 {
        let eps = step as f32 * 0.001;
        let mut candidate = x.clone();
        for (v, d) in candidate.iter_mut().zip(direction.iter()) {
            *v = (*v + eps * d).clamp(0.0, 1.0);
        }
        let pred = argmax_rows(&clf.predict(&candidate, true).unwrap());
        if pred[0] == target {
            return candidate;
        }
    }
    panic!("baseline never reached the target class");
}

#[test]
fn test_targeted_l2_beats_gradient_sign_baseline() {
    init_tracing();
    let clf = scenario_a_classifier();
    let x = scenario_a_input();
    assert_eq!(argmax_rows(&clf.predict(&x, true).unwrap()), vec![0]);

    let attack = CarliniL2::new(CarliniL2Config {
        confidence: 0.0,
        targeted: true,
        learning_rate: 0.01,
        max_iter: 50,
        binary_search_steps: 5,
        initial_const: 0.1,
        ..Default::default()
    })
    .unwrap();
    let y = one_hot(&[2], 3).unwrap();
    let output = attack.generate(&clf, &x, Some(&y)).unwrap();

    let z = clf.predict(&output.adversarial, true).unwrap();
    assert!(z[[0, 2]] > z[[0, 0]] && z[[0, 2]] > z[[0, 1]], "logits {z:?}");
    assert_eq!(output.success_rate, 1.0);
    assert_eq!(output.num_batches, 1);

    let baseline = gradient_sign_baseline(&clf, &x, 0, 2);
    let cw = l2_norm(&output.adversarial, &x);
    let fgsm = l2_norm(&baseline, &x);
    assert!(cw < fgsm, "C&W distortion {cw} not below baseline {fgsm}");
    // The closed-form minimum is 0.1 / |w2 - w0| ≈ 0.0705.
    assert!(cw > 0.07 && cw < 0.09, "distortion {cw}");
    assert!(output.adversarial.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_untargeted_linf_on_misclassified_sample_returns_input() {
    let clf = two_class_linear();
    // Predicted class 0, true label 1: the goal already holds.
    let x = arr2(&[[0.8_f32, 0.3]]).into_dyn();
    let y = one_hot(&[1], 2).unwrap();
    let attack = CarliniLinf::new(CarliniLinfConfig {
        targeted: false,
        eps: 0.05,
        ..Default::default()
    })
    .unwrap();
    let recorder = Recording::new(clf);
    let output = attack.generate(&recorder, &x, Some(&y)).unwrap();

    assert_eq!(output.adversarial, x);
    // One evaluation, no gradients, then the original and adversarial predictions.
    assert!(recorder
        .calls()
        .iter()
        .all(|call| matches!(call, Call::Predict(_))));
}

#[test]
fn test_batches_preserve_sample_order() {
    init_tracing();
    let n = 257;
    let eps = 0.01;
    let x = ArrayD::from_shape_fn(IxDyn(&[n, 2]), |idx| {
        if idx[1] == 0 {
            (idx[0] as f32 + 0.25) / n as f32
        } else {
            0.5
        }
    });
    let y = one_hot(&vec![1; n], 2).unwrap();
    let attack = CarliniLinf::new(CarliniLinfConfig {
        eps,
        batch_size: 128,
        ..Default::default()
    })
    .unwrap();
    let recorder = Recording::new(two_class_linear());
    let output = attack.generate(&recorder, &x, Some(&y)).unwrap();

    assert_eq!(output.num_batches, 3);
    assert_eq!(output.adversarial.shape(), x.shape());
    for (adv, orig) in output
        .adversarial
        .axis_iter(Axis(0))
        .zip(x.axis_iter(Axis(0)))
    {
        for (a, o) in adv.iter().zip(orig.iter()) {
            assert!((a - o).abs() <= eps + 1e-6);
        }
    }
    // Samples with x0 < 0.5 start on the target side.
    assert!(output.success_rate >= 129.0 / n as f32);

    let calls = recorder.calls();
    let batch_starts: Vec<usize> = calls
        .iter()
        .filter_map(|call| match call {
            Call::Predict(size) => Some(*size),
            Call::Gradient(_) => None,
        })
        .filter(|&size| size == 128 || size == 1)
        .collect();
    assert_eq!(batch_starts.first(), Some(&128));
    assert_eq!(batch_starts.last(), Some(&1));
    assert_eq!(calls.last(), Some(&Call::Predict(n)));
    assert!(calls[..calls.len() - 1].iter().all(|call| match call {
        Call::Predict(size) | Call::Gradient(size) => *size <= 128,
    }));
}

#[test]
fn test_targeted_without_labels_fails_before_oracle_calls() {
    let recorder = Recording::new(two_class_linear());
    let x = arr2(&[[0.5_f32, 0.5]]).into_dyn();

    let l2 = CarliniL2::new(CarliniL2Config::default()).unwrap();
    assert!(matches!(
        l2.generate(&recorder, &x, None),
        Err(CwError::MissingTargets)
    ));
    let linf = CarliniLinf::new(CarliniLinfConfig::default()).unwrap();
    assert!(matches!(
        linf.generate(&recorder, &x, None),
        Err(CwError::MissingTargets)
    ));
    assert!(recorder.calls().is_empty());
}

#[test]
fn test_label_shape_is_checked() {
    let clf = two_class_linear();
    let x = arr2(&[[0.5_f32, 0.5], [0.2, 0.1]]).into_dyn();
    let attack = CarliniL2::new(CarliniL2Config::fast()).unwrap();

    let wrong_rows = one_hot(&[1], 2).unwrap();
    assert!(matches!(
        attack.generate(&clf, &x, Some(&wrong_rows)),
        Err(CwError::ShapeMismatch { .. })
    ));
    let wrong_classes = Array2::zeros((2, 3));
    assert!(matches!(
        attack.generate(&clf, &x, Some(&wrong_classes)),
        Err(CwError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_empty_input() {
    let clf = two_class_linear();
    let x = ArrayD::zeros(IxDyn(&[0, 2]));
    let y = Array2::zeros((0, 2));
    let attack = CarliniLinf::new(CarliniLinfConfig::default()).unwrap();
    let output = attack.generate(&clf, &x, Some(&y)).unwrap();
    assert_eq!(output.adversarial.shape(), &[0, 2]);
    assert_eq!(output.num_batches, 0);
    assert_eq!(output.success_rate, 0.0);
}

#[test]
fn test_untargeted_l2_on_multidimensional_samples() {
    init_tracing();
    // Samples of shape [2, 2]; class 2 scores the mean of the second row.
    let clf = LinearClassifier::new(
        arr2(&[
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.5, 0.5],
        ]),
        arr1(&[0.0, 0.0, 0.0]),
        vec![2, 2],
        ClipValues::scalar(0.0, 1.0).unwrap(),
    )
    .unwrap();
    let x = ArrayD::from_shape_vec(
        IxDyn(&[3, 2, 2]),
        vec![
            0.7, 0.3, 0.4, 0.4, //
            0.2, 0.8, 0.5, 0.5, //
            0.1, 0.1, 0.9, 0.9,
        ],
    )
    .unwrap();
    let original = argmax_rows(&clf.predict(&x, true).unwrap());
    assert_eq!(original, vec![0, 1, 2]);

    let attack = CarliniL2::new(CarliniL2Config {
        targeted: false,
        confidence: 0.05,
        ..Default::default()
    })
    .unwrap();
    let output = attack.generate(&clf, &x, None).unwrap();

    assert_eq!(output.adversarial.shape(), &[3, 2, 2]);
    assert_eq!(output.success_rate, 1.0);
    let adv = argmax_rows(&clf.predict(&output.adversarial, true).unwrap());
    for (a, o) in adv.iter().zip(&original) {
        assert_ne!(a, o);
    }
    assert!(output.adversarial.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_output_serializes_to_json() {
    let clf = two_class_linear();
    let x = arr2(&[[0.8_f32, 0.3]]).into_dyn();
    let attack = CarliniLinf::new(CarliniLinfConfig {
        targeted: false,
        ..Default::default()
    })
    .unwrap();
    let output = attack.generate(&clf, &x, None).unwrap();
    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["num_batches"], 1);
    assert!(json["adversarial"].is_object());
}

#[test]
fn test_l2_respects_per_element_clip_values() {
    let clip = ClipValues::per_element(
        ndarray::arr1(&[0.0_f32, 0.4]).into_dyn(),
        ndarray::arr1(&[1.0_f32, 0.6]).into_dyn(),
    )
    .unwrap();
    let clf = LinearClassifier::new(
        arr2(&[[1.0, -1.0], [-1.0, 1.0]]),
        arr1(&[0.0, 0.0]),
        vec![2],
        clip,
    )
    .unwrap();
    let x = arr2(&[[0.7_f32, 0.5], [0.9, 0.45]]).into_dyn();
    let y = one_hot(&[1, 1], 2).unwrap();
    let attack = CarliniL2::new(CarliniL2Config {
        confidence: 0.05,
        ..Default::default()
    })
    .unwrap();
    let output = attack.generate(&clf, &x, Some(&y)).unwrap();

    for row in output.adversarial.axis_iter(Axis(0)) {
        assert!((0.0..=1.0).contains(&row[0]));
        assert!((0.4..=0.6).contains(&row[1]));
    }
    // x1 is capped at 0.6, so x0 has to travel below it.
    assert_eq!(output.success_rate, 1.0);
    assert!(output.adversarial.iter().step_by(2).all(|&x0| x0 < 0.6));
}

#[test]
fn test_l2_stops_optimizing_samples_at_the_constant_upper_bound() {
    init_tracing();
    // Class 2 can never win: max(z0, z1) = |x0 - x1| >= 0 > z2.
    let clf = LinearClassifier::new(
        arr2(&[[1.0, -1.0], [-1.0, 1.0], [0.0, 0.0]]),
        arr1(&[0.0, 0.0, -10.0]),
        vec![2],
        ClipValues::scalar(0.0, 1.0).unwrap(),
    )
    .unwrap();
    let x = arr2(&[[0.9_f32, 0.1], [0.9, 0.1]]).into_dyn();
    let y = one_hot(&[2, 1], 3).unwrap();
    // One failed round doubles the constant of sample 0 past C_UPPER_BOUND.
    let attack = CarliniL2::new(CarliniL2Config {
        initial_const: 6e10,
        binary_search_steps: 3,
        max_iter: 2,
        ..Default::default()
    })
    .unwrap();
    let recorder = Recording::new(clf);
    let output = attack.generate(&recorder, &x, Some(&y)).unwrap();

    assert_eq!(output.adversarial.index_axis(Axis(0), 0), x.index_axis(Axis(0), 0));
    let preds = argmax_rows(&recorder.inner.predict(&output.adversarial, true).unwrap());
    assert_eq!(preds[1], 1);
    assert_eq!(output.success_rate, 0.5);

    // Two gradient calls per iteration: both samples in the first round,
    // only sample 1 in the remaining two.
    let calls = recorder.calls();
    let full = calls.iter().filter(|&&call| call == Call::Gradient(2)).count();
    let single = calls.iter().filter(|&&call| call == Call::Gradient(1)).count();
    assert_eq!(full, 4);
    assert_eq!(single, 8);
    let first_single = calls
        .iter()
        .position(|&call| call == Call::Gradient(1))
        .unwrap();
    assert!(!calls[first_single..].contains(&Call::Gradient(2)));
}
