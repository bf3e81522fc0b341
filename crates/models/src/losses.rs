//! Binary segmentation losses over logits; target value 255 is ignored.

use crate::ModelError;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

pub const IGNORE_INDEX: f32 = 255.0;
const EPS: f32 = 1e-7;
const FOCAL_GAMMA: f32 = 2.0;
/// Hinge error given to ignored pixels so they sort last and clamp to zero.
const LOVASZ_IGNORED_ERROR: f32 = -1.0e4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    Bce,
    SoftBceWithLogits,
    Dice,
    Jaccard,
    Focal,
    Lovasz,
    SoftCrossEntropy,
}

impl LossKind {
    pub const ALL: [LossKind; 7] = [
        LossKind::Bce,
        LossKind::SoftBceWithLogits,
        LossKind::Dice,
        LossKind::Jaccard,
        LossKind::Focal,
        LossKind::Lovasz,
        LossKind::SoftCrossEntropy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LossKind::Bce => "BCELoss",
            LossKind::SoftBceWithLogits => "SoftBCEWithLogitsLoss",
            LossKind::Dice => "DiceLoss",
            LossKind::Jaccard => "JaccardLoss",
            LossKind::Focal => "FocalLoss",
            LossKind::Lovasz => "LovaszLoss",
            LossKind::SoftCrossEntropy => "SoftCrossEntropyLoss",
        }
    }

    /// Case-insensitive exact lookup.
    pub fn from_name(name: &str) -> Result<Self, ModelError> {
        Self::ALL
            .into_iter()
            .find(|l| l.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ModelError::UnknownLoss {
                name: name.to_string(),
                available: Self::ALL.iter().map(|l| l.name()).collect(),
            })
    }

    /// Scalar loss for `[N, 1, H, W]` logits against `[N, H, W]` targets.
    pub fn compute<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 3>) -> Tensor<B, 1> {
        let logits = logits.squeeze::<3>(1);
        let valid = targets.clone().lower_elem(IGNORE_INDEX).float();
        let y = targets * valid.clone();
        match self {
            LossKind::Bce => {
                let p = burn::tensor::activation::sigmoid(logits).clamp(EPS, 1.0 - EPS);
                let ll = y.clone() * p.clone().log() + (y.neg() + 1.0) * (p.neg() + 1.0).log();
                masked_mean(ll.neg(), valid)
            }
            LossKind::SoftBceWithLogits => {
                // Ignored pixels count as zero loss in the mean.
                (bce_with_logits(logits, y) * valid).mean()
            }
            LossKind::Focal => {
                let logpt = bce_with_logits(logits, y);
                let pt = logpt.clone().neg().exp();
                let focal = (pt.neg() + 1.0).powf_scalar(FOCAL_GAMMA) * logpt;
                masked_mean(focal, valid)
            }
            LossKind::Lovasz => lovasz_hinge(logits, y, valid),
            // Two-class cross entropy over a single logit.
            LossKind::SoftCrossEntropy => masked_mean(bce_with_logits(logits, y), valid),
            LossKind::Dice | LossKind::Jaccard => {
                let p = burn::tensor::activation::sigmoid(logits) * valid.clone();
                let y = y * valid;
                let positives = y.clone().sum();
                let intersection = (p.clone() * y.clone()).sum();
                let cardinality = (p + y).sum();
                let score = if *self == LossKind::Dice {
                    (intersection * 2.0) / cardinality.clamp_min(EPS)
                } else {
                    let union = cardinality - intersection.clone();
                    intersection / union.clamp_min(EPS)
                };
                // Batches without positives contribute nothing.
                (score.neg() + 1.0) * positives.greater_elem(0.0).float()
            }
        }
    }
}

/// Element-wise `max(x, 0) - x * y + log(1 + exp(-|x|))`.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 3>, y: Tensor<B, 3>) -> Tensor<B, 3> {
    logits.clone().clamp_min(0.0) - logits.clone() * y + logits.abs().neg().exp().log1p()
}

/// Binary Lovász hinge over the whole batch, flattened.
fn lovasz_hinge<B: Backend>(
    logits: Tensor<B, 3>,
    y: Tensor<B, 3>,
    valid: Tensor<B, 3>,
) -> Tensor<B, 1> {
    let logits = logits.flatten::<1>(0, 2);
    let y = y.flatten::<1>(0, 2);
    let valid = valid.flatten::<1>(0, 2);
    let signs = y.clone() * 2.0 - 1.0;
    let errors = (logits * signs).neg() + 1.0;
    let errors = errors * valid.clone() + (valid.neg() + 1.0) * LOVASZ_IGNORED_ERROR;

    let (_, order) = errors.clone().detach().sort_descending_with_indices(0);
    let errors_sorted = errors.gather(0, order.clone());
    let gt_sorted: Vec<f32> = y.gather(0, order).into_data().iter::<f32>().collect();
    let weights = lovasz_grad(&gt_sorted);
    let weights = Tensor::<B, 1>::from_data(
        TensorData::new(weights, [gt_sorted.len()]),
        &errors_sorted.device(),
    );
    (errors_sorted.clamp_min(0.0) * weights).sum()
}

/// Gradient of the Lovász extension of the Jaccard loss for sorted ground truth.
fn lovasz_grad(gt_sorted: &[f32]) -> Vec<f32> {
    let positives: f32 = gt_sorted.iter().sum();
    let (mut seen_pos, mut seen_neg, mut previous) = (0.0f32, 0.0f32, 0.0f32);
    gt_sorted
        .iter()
        .map(|&g| {
            seen_pos += g;
            seen_neg += 1.0 - g;
            let jaccard = 1.0 - (positives - seen_pos) / (positives + seen_neg).max(EPS);
            let step = jaccard - previous;
            previous = jaccard;
            step
        })
        .collect()
}

fn masked_mean<B: Backend>(values: Tensor<B, 3>, valid: Tensor<B, 3>) -> Tensor<B, 1> {
    let count = valid.clone().sum().clamp_min(1.0);
    (values * valid).sum() / count
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    fn scalar(t: Tensor<B, 1>) -> f32 {
        t.into_scalar()
    }

    fn inputs(logits: [f32; 4], targets: [f32; 4]) -> (Tensor<B, 4>, Tensor<B, 3>) {
        let device = Default::default();
        (
            Tensor::from_data(TensorData::new(logits.to_vec(), [1, 1, 2, 2]), &device),
            Tensor::from_data(TensorData::new(targets.to_vec(), [1, 2, 2]), &device),
        )
    }

    #[test]
    fn lookup_lists_options_on_failure() {
        assert_eq!(LossKind::from_name("diceloss").unwrap(), LossKind::Dice);
        let err = LossKind::from_name("dice").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Wrong loss type `dice`"));
        assert!(msg.contains("FocalLoss"));
    }

    #[test]
    fn ignored_pixels_do_not_change_bce() {
        let (l1, t1) = inputs([2.0, -1.0, 0.5, 3.0], [1.0, 0.0, 1.0, 0.0]);
        let (l2, t2) = inputs([2.0, -1.0, 0.5, -30.0], [1.0, 0.0, 1.0, 255.0]);
        let a = scalar(LossKind::Bce.compute(l1, t1));
        let b = scalar(LossKind::Bce.compute(l2, t2));
        assert!(a > b, "the confident mistake should dominate");
        // Only the first three pixels remain.
        let (l3, t3) = inputs([2.0, -1.0, 0.5, 0.0], [1.0, 0.0, 1.0, 255.0]);
        let c = scalar(LossKind::Bce.compute(l3, t3));
        assert!((b - c).abs() < 1e-5);
    }

    #[test]
    fn perfect_predictions_give_small_losses() {
        for kind in LossKind::ALL {
            let (l, t) = inputs([20.0, -20.0, 20.0, -20.0], [1.0, 0.0, 1.0, 255.0]);
            let v = scalar(kind.compute(l, t));
            assert!(v.abs() < 1e-3, "{} gave {v}", kind.name());
        }
    }

    #[test]
    fn lovasz_and_cross_entropy_resolve_by_name() {
        assert_eq!(LossKind::from_name("lovaszloss").unwrap(), LossKind::Lovasz);
        assert_eq!(
            LossKind::from_name("SoftCrossEntropyLoss").unwrap(),
            LossKind::SoftCrossEntropy
        );
    }

    #[test]
    fn lovasz_grad_telescopes_to_the_final_jaccard() {
        let grad = lovasz_grad(&[1.0, 0.0, 1.0, 0.0]);
        assert_eq!(grad.len(), 4);
        assert!((grad[0] - 0.5).abs() < 1e-6);
        assert!((grad[1] - 1.0 / 6.0).abs() < 1e-6);
        assert!((grad[2] - 1.0 / 3.0).abs() < 1e-6);
        assert!(grad[3].abs() < 1e-6);
        let total: f32 = grad.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn lovasz_ignores_masked_pixels() {
        // Every valid pixel sits on the margin: the loss is the full Jaccard error.
        let (l1, t1) = inputs([0.0, 0.0, 0.0, 0.0], [1.0, 0.0, 1.0, 255.0]);
        let (l2, t2) = inputs([0.0, 0.0, 0.0, 30.0], [1.0, 0.0, 1.0, 255.0]);
        let a = scalar(LossKind::Lovasz.compute(l1, t1));
        let b = scalar(LossKind::Lovasz.compute(l2, t2));
        assert!((a - 1.0).abs() < 1e-5, "{a}");
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn dice_is_zero_without_positives() {
        let (l, t) = inputs([5.0, 5.0, 5.0, 5.0], [0.0, 0.0, 255.0, 0.0]);
        assert_eq!(scalar(LossKind::Dice.compute(l, t)), 0.0);
    }
}
