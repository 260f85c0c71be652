// Accept/reject decision for one probe

/// Fraction of the repetitions a tile must observe to own the line.
/// Used by both the peak test and the uniqueness test.
pub const OWNERSHIP_RATIO: f64 = 0.95;

/// Upper bound on the quietest tile's fraction
pub const FLOOR_LIMIT: f64 = 0.20;

/// Upper bound on the average background fraction
pub const NOISE_LIMIT: f64 = 0.40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    GoodnessGate,
    NoOwner,
    MultipleOwners(usize),
}

impl RejectReason {
    /// Metric label, collapsing the owner count
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::GoodnessGate => "goodness_gate",
            RejectReason::NoOwner => "no_owner",
            RejectReason::MultipleOwners(_) => "multiple_owners",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept(usize),
    Reject(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub max_delta: u64,
    pub min_delta: u64,
    /// Mean of all deltas except the largest, over the tile count
    pub adjusted_avg: f64,
    pub peak_ratio: f64,
    pub floor_ratio: f64,
    pub noise_ratio: f64,
    /// Tiles at or above the ownership threshold
    pub qualifying: usize,
    pub verdict: Verdict,
}

/// Smallest delta that counts as ownership for `repetitions` fills
pub fn ownership_threshold(repetitions: u32) -> u64 {
    (OWNERSHIP_RATIO * f64::from(repetitions)).ceil() as u64
}

/// Decide which tile, if any, owns the probed line
pub fn evaluate(deltas: &[u64], repetitions: u32) -> ProbeOutcome {
    let n = f64::from(repetitions.max(1));
    let (max_tile, max_delta) = deltas
        .iter()
        .copied()
        .enumerate()
        .max_by_key(|&(_, d)| d)
        .unwrap_or((0, 0));
    let min_delta = deltas.iter().copied().min().unwrap_or(0);
    let sum: u64 = deltas.iter().sum();

    let adjusted_avg = if deltas.is_empty() {
        0.0
    } else {
        (sum - max_delta) as f64 / deltas.len() as f64
    };
    let peak_ratio = max_delta as f64 / n;
    let floor_ratio = min_delta as f64 / n;
    let noise_ratio = adjusted_avg / n;

    let threshold = ownership_threshold(repetitions);
    let qualifying = deltas.iter().filter(|&&d| d >= threshold).count();

    let good = !deltas.is_empty()
        && peak_ratio > OWNERSHIP_RATIO
        && floor_ratio < FLOOR_LIMIT
        && noise_ratio < NOISE_LIMIT;

    let verdict = if !good {
        Verdict::Reject(RejectReason::GoodnessGate)
    } else {
        match qualifying {
            0 => Verdict::Reject(RejectReason::NoOwner),
            1 => Verdict::Accept(max_tile),
            n => Verdict::Reject(RejectReason::MultipleOwners(n)),
        }
    };

    ProbeOutcome {
        max_delta,
        min_delta,
        adjusted_avg,
        peak_ratio,
        floor_ratio,
        noise_ratio,
        qualifying,
        verdict,
    }
}
