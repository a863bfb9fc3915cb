//! Weighted random selection among load-balanced children

use rand::Rng;

/// Weight a child gets when it does not declare one
pub const DEFAULT_WEIGHT: u32 = 1;

/// Pick one candidate by weight using the thread-local RNG
///
/// `candidates` pairs each child's index in its group with its weight. The
/// returned value is the chosen child's group index, or `None` when there are
/// no candidates.
pub fn select_weighted(candidates: &[(usize, u32)]) -> Option<usize> {
    select_weighted_with(&mut rand::rng(), candidates)
}

/// Same as [`select_weighted`] with a caller-provided RNG
pub fn select_weighted_with<R: Rng + ?Sized>(
    rng: &mut R,
    candidates: &[(usize, u32)],
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let total_weight: u64 = candidates.iter().map(|(_, weight)| u64::from(*weight)).sum();

    if total_weight == 0 {
        tracing::warn!(
            candidates = candidates.len(),
            "All load-balance targets have zero weight, falling back to uniform selection"
        );
        let (index, _) = candidates[rng.random_range(0..candidates.len())];
        return Some(index);
    }

    // Draw in [0, total) and take the first child whose cumulative weight exceeds it
    let draw = rng.random_range(0..total_weight);
    let mut cumulative: u64 = 0;
    for (index, weight) in candidates {
        cumulative += u64::from(*weight);
        if draw < cumulative {
            tracing::debug!(
                target_index = index,
                weight,
                total_weight,
                "Selected load-balance target"
            );
            return Some(*index);
        }
    }

    // Unreachable while draw < total_weight; keep the last candidate rather than panic
    candidates.last().map(|(index, _)| *index)
}
