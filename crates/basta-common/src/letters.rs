use std::collections::BTreeSet;

use rand::Rng;

/// The playable round alphabet. "K" is excluded by game rule.
pub const ALPHABET: [char; 25] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T',
    'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// Pick a uniformly random letter that has not been drawn this game.
/// Returns `None` when every playable letter has been used, which the
/// room treats the same as reaching the round limit.
pub fn draw_letter(used: &BTreeSet<char>, rng: &mut impl Rng) -> Option<char> {
    let available: Vec<char> = ALPHABET
        .iter()
        .copied()
        .filter(|l| !used.contains(l))
        .collect();
    if available.is_empty() {
        return None;
    }
    Some(available[rng.gen_range(0..available.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_alphabet_excludes_k() {
        assert_eq!(ALPHABET.len(), 25);
        assert!(!ALPHABET.contains(&'K'));
    }

    #[test]
    fn test_draw_skips_used_letters() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut used = BTreeSet::new();
        for _ in 0..25 {
            let letter = draw_letter(&used, &mut rng).unwrap();
            assert!(!used.contains(&letter));
            used.insert(letter);
        }
        assert_eq!(used.len(), 25);
    }

    #[test]
    fn test_draw_exhausted() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let used: BTreeSet<char> = ALPHABET.iter().copied().collect();
        assert_eq!(draw_letter(&used, &mut rng), None);
    }

    #[test]
    fn test_draw_last_remaining_letter() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let used: BTreeSet<char> = ALPHABET.iter().copied().filter(|&l| l != 'Q').collect();
        assert_eq!(draw_letter(&used, &mut rng), Some('Q'));
    }
}
