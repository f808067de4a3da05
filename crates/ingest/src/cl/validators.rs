use std::collections::HashMap;
use tally_types::Validator;

/// A validator set indexed by position and by address.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    height: u64,
    validators: Vec<Validator>,
    by_address: HashMap<String, usize>,
    total_power: u64,
}

impl ValidatorSet {
    /// Indexes the set fetched at `height`. `validators` must be in validator-set order.
    pub fn new(height: u64, validators: Vec<Validator>) -> Self {
        let by_address = validators
            .iter()
            .enumerate()
            .map(|(index, v)| (v.address.to_ascii_uppercase(), index))
            .collect();
        let total_power = validators.iter().map(|v| v.voting_power).sum();
        Self { height, validators, by_address, total_power }
    }

    /// Height the set was fetched at.
    pub const fn height(&self) -> u64 {
        self.height
    }

    /// Sum of all voting powers.
    pub const fn total_power(&self) -> u64 {
        self.total_power
    }

    /// Returns the validator at `index`.
    pub fn at(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// Returns the validator with `address`, compared case-insensitively.
    pub fn get(&self, address: &str) -> Option<&Validator> {
        self.by_address.get(&address.to_ascii_uppercase()).and_then(|&i| self.validators.get(i))
    }

    /// Returns the validators in set order.
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Returns true if the set is due for a refresh before processing `height`.
    pub const fn is_stale(&self, height: u64, refresh_interval: u64) -> bool {
        height.saturating_sub(self.height) >= refresh_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::validator;

    #[test]
    fn test_lookup_by_index_and_address() {
        let set = ValidatorSet::new(
            11,
            vec![validator("AAAA", 100), validator("BBBB", 200), validator("CCCC", 700)],
        );
        assert_eq!(set.total_power(), 1000);
        assert_eq!(set.at(1).map(|v| v.voting_power), Some(200));
        assert_eq!(set.get("cccc").map(|v| v.voting_power), Some(700));
        assert!(set.get("DDDD").is_none());
        assert!(set.at(3).is_none());
    }

    #[test]
    fn test_staleness() {
        let set = ValidatorSet::new(101, vec![validator("AAAA", 1)]);
        assert!(!set.is_stale(100, 1000));
        assert!(!set.is_stale(1100, 1000));
        assert!(set.is_stale(1101, 1000));
    }
}
