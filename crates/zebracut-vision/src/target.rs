//! Choosing the cutting target from an embryo locator's keypoints.

use crate::params::{EmbryoStrategy, TunableParameters};
use crate::types::{Keypoint, LocatorError};

/// Pick the keypoint the tool should be driven to.
///
/// The classical strategy always ends its list with the biased target,
/// so the last keypoint is used. The learned strategy emits one keypoint
/// per somite from the bottom up and the operator picks the
/// `learned.target_somite`-th (1-based).
///
/// # Errors
///
/// Returns [`LocatorError::TargetOutOfRange`] when the list is too short
/// (including empty) for the requested ordinal.
pub fn select_target(
    keypoints: &[Keypoint],
    params: &TunableParameters,
) -> Result<Keypoint, LocatorError> {
    let index = match params.embryo_strategy {
        EmbryoStrategy::Classical => keypoints.len().max(1),
        EmbryoStrategy::Learned => params.learned.target_somite,
    };
    index
        .checked_sub(1)
        .and_then(|i| keypoints.get(i))
        .copied()
        .ok_or(LocatorError::TargetOutOfRange {
            index,
            available: keypoints.len(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::params::LearnedParams;
    use crate::types::KeypointTag;

    fn kps(n: i32) -> Vec<Keypoint> {
        (0..n)
            .map(|i| Keypoint::new(i, 100 - i, KeypointTag::Target))
            .collect()
    }

    fn learned(target_somite: usize) -> TunableParameters {
        TunableParameters {
            embryo_strategy: EmbryoStrategy::Learned,
            learned: LearnedParams {
                target_somite,
                ..LearnedParams::default()
            },
            ..TunableParameters::default()
        }
    }

    #[test]
    fn classical_uses_last_keypoint() {
        let target = select_target(&kps(4), &TunableParameters::default()).unwrap();
        assert_eq!(target.x, 3);
    }

    #[test]
    fn learned_uses_one_based_ordinal() {
        assert_eq!(select_target(&kps(6), &learned(5)).unwrap().x, 4);
        assert_eq!(select_target(&kps(6), &learned(1)).unwrap().x, 0);
    }

    #[test]
    fn short_list_is_out_of_range() {
        assert_eq!(
            select_target(&kps(3), &learned(5)),
            Err(LocatorError::TargetOutOfRange {
                index: 5,
                available: 3
            })
        );
        assert!(select_target(&kps(3), &learned(0)).is_err());
    }

    #[test]
    fn empty_list_is_out_of_range() {
        assert_eq!(
            select_target(&[], &TunableParameters::default()),
            Err(LocatorError::TargetOutOfRange {
                index: 1,
                available: 0
            })
        );
    }
}
