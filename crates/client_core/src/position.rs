use shared::domain::PositionKey;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("no representable key fits between the neighbors; the collection needs renormalization")]
    RenormalizationRequired,
}

/// Computes a key for an item inserted between two neighbors. `None` on a
/// side means the item is moving to that edge of the sequence.
///
/// Pure and synchronous; never touches the collection itself.
pub fn allocate(
    lower: Option<PositionKey>,
    upper: Option<PositionKey>,
) -> Result<PositionKey, AllocError> {
    match (lower, upper) {
        (None, None) => Ok(PositionKey::BASE),
        (Some(lower), None) => {
            let key = PositionKey(lower.0 + PositionKey::STEP);
            if !key.is_finite() || key.0 <= lower.0 {
                return Err(AllocError::RenormalizationRequired);
            }
            Ok(key)
        }
        (None, Some(upper)) => {
            let key = PositionKey(upper.0 - PositionKey::STEP);
            if !key.is_finite() || key.0 >= upper.0 {
                return Err(AllocError::RenormalizationRequired);
            }
            Ok(key)
        }
        (Some(lower), Some(upper)) => {
            if !lower.is_finite() || !upper.is_finite() || lower.0 >= upper.0 {
                return Err(AllocError::RenormalizationRequired);
            }
            let mid = lower.midpoint(upper);
            if mid.0 <= lower.0 || mid.0 >= upper.0 {
                return Err(AllocError::RenormalizationRequired);
            }
            Ok(mid)
        }
    }
}

/// Evenly spaced replacement keys for a whole collection, in visible
/// order. Used when `allocate` signals exhaustion.
pub fn evenly_spaced(count: usize) -> Vec<PositionKey> {
    (1..=count)
        .map(|slot| PositionKey(slot as f64 * PositionKey::STEP))
        .collect()
}
