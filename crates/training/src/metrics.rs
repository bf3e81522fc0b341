//! Per-pass segmentation metrics over thresholded logits.

/// Target value excluded from every metric.
pub const IGNORE: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Accuracy,
    Precision,
    Recall,
    F1,
    IoU,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Accuracy,
        MetricKind::Precision,
        MetricKind::Recall,
        MetricKind::F1,
        MetricKind::IoU,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Accuracy => "Accuracy",
            MetricKind::Precision => "Precision",
            MetricKind::Recall => "Recall",
            MetricKind::F1 => "F1",
            MetricKind::IoU => "IoU",
        }
    }

    pub fn compute(&self, c: &Confusion) -> f64 {
        let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        match self {
            MetricKind::Accuracy => ratio(c.tp + c.tn, c.total()),
            MetricKind::Precision => ratio(c.tp, c.tp + c.fp),
            MetricKind::Recall => ratio(c.tp, c.tp + c.fn_),
            MetricKind::F1 => ratio(2 * c.tp, 2 * c.tp + c.fp + c.fn_),
            MetricKind::IoU => ratio(c.tp, c.tp + c.fp + c.fn_),
        }
    }
}

/// Pixel confusion counts of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub tp: u64,
    pub fp: u64,
    pub fn_: u64,
    pub tn: u64,
}

impl Confusion {
    /// Logit > 0 is a positive prediction; ignored targets are skipped.
    pub fn from_logits(logits: &[f32], targets: &[u8]) -> Self {
        let mut c = Confusion::default();
        for (&logit, &target) in logits.iter().zip(targets) {
            if target == IGNORE {
                continue;
            }
            match (logit > 0.0, target > 0) {
                (true, true) => c.tp += 1,
                (true, false) => c.fp += 1,
                (false, true) => c.fn_ += 1,
                (false, false) => c.tn += 1,
            }
        }
        c
    }

    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.fn_ + self.tn
    }
}

/// Running means of metric values and extra scalars, weighted by batch size.
#[derive(Debug, Clone)]
pub struct Metrics {
    kinds: Vec<MetricKind>,
    sums: Vec<f64>,
    extras: Vec<(String, f64)>,
    weight: f64,
}

impl Metrics {
    pub fn new(kinds: &[MetricKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            sums: vec![0.0; kinds.len()],
            extras: Vec::new(),
            weight: 0.0,
        }
    }

    /// Accumulate one batch. Returns `false` (state untouched) when every pixel is ignored.
    pub fn step(
        &mut self,
        logits: &[f32],
        targets: &[u8],
        batch_size: usize,
        extras: &[(&str, f64)],
    ) -> bool {
        let confusion = Confusion::from_logits(logits, targets);
        if confusion.total() == 0 {
            return false;
        }
        let w = batch_size.max(1) as f64;
        for (sum, kind) in self.sums.iter_mut().zip(&self.kinds) {
            *sum += kind.compute(&confusion) * w;
        }
        for (name, value) in extras {
            match self.extras.iter_mut().find(|(n, _)| n.as_str() == *name) {
                Some((_, sum)) => *sum += value * w,
                None => self.extras.push((name.to_string(), value * w)),
            }
        }
        self.weight += w;
        true
    }

    /// Ordered `(name, mean)` pairs: metric kinds first, then extras in first-seen order.
    pub fn evaluate(&self) -> Vec<(String, f64)> {
        let mean = |sum: f64| {
            if self.weight > 0.0 {
                sum / self.weight
            } else {
                f64::NAN
            }
        };
        self.kinds
            .iter()
            .zip(&self.sums)
            .map(|(kind, &sum)| (kind.name().to_string(), mean(sum)))
            .chain(self.extras.iter().map(|(name, sum)| (name.clone(), mean(*sum))))
            .collect()
    }

    pub fn reset(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = 0.0);
        self.extras.clear();
        self.weight = 0.0;
    }

    pub fn is_empty(&self) -> bool {
        self.weight == 0.0
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(&MetricKind::ALL)
    }
}

/// `key=value` pairs for log lines.
pub fn format_metrics(values: &[(String, f64)]) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{k}={v:.4}"))
        .collect::<Vec<_>>()
        .join(" ")
}
