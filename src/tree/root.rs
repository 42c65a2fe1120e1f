use rand::seq::IndexedRandom;

use crate::domain::HashId;
use crate::hamming;

const MAX_VIEWPOINTS: usize = 256;
const MAX_SAMPLE: usize = 64;

/// Chooses the vantage point for a (sub)tree from a candidate set, removing
/// the winner from the set. Pluggable so tests can substitute a
/// deterministic picker for reproducible tree shapes.
///
/// Callers must pass a non-empty candidate list.
pub trait RootPicker {
    fn pop_best(&mut self, candidates: &mut Vec<(HashId, u64)>) -> (HashId, u64);
}

/// The default picker: scores a random sample of candidate viewpoints by how
/// evenly they would split a random distance sample, tie-broken by distance
/// spread — larger spread means less overlap between the resulting inner and
/// outer hyperspheres, which prunes search more effectively.
#[derive(Debug, Default)]
pub struct SampledRootPicker;

impl RootPicker for SampledRootPicker {
    fn pop_best(&mut self, candidates: &mut Vec<(HashId, u64)>) -> (HashId, u64) {
        if candidates.len() == 1 {
            return candidates.pop().expect("non-empty candidate set");
        }

        let mut rng = rand::rng();

        let viewpoints: Vec<(HashId, u64)> = if candidates.len() > MAX_VIEWPOINTS {
            candidates
                .choose_multiple(&mut rng, MAX_VIEWPOINTS)
                .copied()
                .collect()
        } else {
            candidates.clone()
        };
        let sample: Vec<(HashId, u64)> = if candidates.len() > MAX_SAMPLE {
            candidates
                .choose_multiple(&mut rng, MAX_SAMPLE)
                .copied()
                .collect()
        } else {
            candidates.clone()
        };

        let mut best: Option<(i64, f64, HashId)> = None;

        for &(viewpoint_id, viewpoint_value) in &viewpoints {
            let mut views: Vec<u32> = sample
                .iter()
                .filter(|&&(sample_id, _)| sample_id != viewpoint_id)
                .map(|&(_, sample_value)| hamming::distance(viewpoint_value, sample_value))
                .collect();
            views.sort_unstable();

            // How evenly would this viewpoint split the sample? Ties at the
            // median go to whichever side is currently smaller, matching the
            // split rule used when the branch is actually built.
            let radius = views[views.len() / 2];
            let mut num_left = views.iter().filter(|&&d| d < radius).count();
            let num_radius = views.iter().filter(|&&d| d == radius).count();
            let mut num_right = views.iter().filter(|&&d| d > radius).count();
            if num_left <= num_right {
                num_left += num_radius;
            } else {
                num_right += num_radius;
            }

            let smaller = num_left.min(num_right) as f64;
            let larger = num_left.max(num_right) as f64;
            let balance = (smaller / larger * (MAX_SAMPLE as f64 / 2.0)) as i64;

            let mean = views.iter().map(|&d| f64::from(d)).sum::<f64>() / views.len() as f64;
            let variance = views
                .iter()
                .map(|&d| (f64::from(d) - mean).powi(2))
                .sum::<f64>()
                / views.len() as f64;
            let spread = variance.sqrt();

            let better = match best {
                None => true,
                Some((best_balance, best_spread, best_id)) => {
                    balance > best_balance
                        || (balance == best_balance && spread > best_spread)
                        || (balance == best_balance
                            && spread == best_spread
                            && viewpoint_id > best_id)
                }
            };
            if better {
                best = Some((balance, spread, viewpoint_id));
            }
        }

        let root_id = best.expect("at least one viewpoint").2;
        let position = candidates
            .iter()
            .position(|&(id, _)| id == root_id)
            .expect("winner was drawn from the candidate set");
        candidates.remove(position)
    }
}
