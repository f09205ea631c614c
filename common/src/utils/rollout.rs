use sha2::{Digest, Sha256};

/// Deterministic enrichment rollout: the same `user_id:patient_id` pair
/// always lands in the same bucket, so a partial rollout never flaps
/// between enriched and raw context for one patient.
pub fn enrichment_enabled(user_id: &str, patient_id: &str, rollout_percentage: u8) -> bool {
    if rollout_percentage >= 100 {
        return true;
    }
    if rollout_percentage == 0 {
        return false;
    }

    let digest = Sha256::digest(format!("{user_id}:{patient_id}").as_bytes());
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&digest.as_slice()[..4]);
    let bucket = u32::from_be_bytes(prefix) % 100;

    bucket < u32::from(rollout_percentage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_deterministic() {
        let first = enrichment_enabled("clinician-1", "patient-1", 50);
        for _ in 0..10 {
            assert_eq!(enrichment_enabled("clinician-1", "patient-1", 50), first);
        }
    }

    #[test]
    fn boundaries_are_total() {
        assert!(enrichment_enabled("anyone", "patient", 100));
        assert!(!enrichment_enabled("anyone", "patient", 0));
    }

    #[test]
    fn rollout_fraction_is_roughly_honored() {
        let enabled = (0..1000)
            .filter(|i| enrichment_enabled("user", &format!("patient-{i}"), 30))
            .count();
        // Loose band; the hash is uniform enough for a 30% target.
        assert!((150..=450).contains(&enabled), "got {enabled}");
    }
}
