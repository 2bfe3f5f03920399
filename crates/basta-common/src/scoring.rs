use std::collections::HashMap;

use crate::game::Answer;

pub const UNIQUE_SCORE: u16 = 100;
pub const DUPLICATE_SCORE: u16 = 50;

/// Canonical form of an answer word: trimmed and uppercased.
pub fn normalize(word: &str) -> String {
    word.trim().to_uppercase()
}

/// Recompute the score of every answer in a round.
///
/// An answer scores 0 if invalid or empty, 50 if its normalized word is
/// shared with another valid answer in the same category, and 100 if it
/// is unique in its category. Pure and idempotent: scores are derived
/// only from validity and the multiset of valid words per category.
pub fn score_round(answers: &mut [Answer]) {
    let mut counts: HashMap<(&str, String), u32> = HashMap::new();
    for ans in answers.iter() {
        if !ans.is_valid {
            continue;
        }
        let word = normalize(&ans.content);
        if word.is_empty() {
            continue;
        }
        *counts.entry((ans.category.as_str(), word)).or_insert(0) += 1;
    }

    let scores: Vec<u16> = answers
        .iter()
        .map(|ans| {
            let word = normalize(&ans.content);
            if !ans.is_valid || word.is_empty() {
                return 0;
            }
            match counts.get(&(ans.category.as_str(), word)) {
                Some(&count) if count > 1 => DUPLICATE_SCORE,
                _ => UNIQUE_SCORE,
            }
        })
        .collect();

    for (ans, score) in answers.iter_mut().zip(scores) {
        ans.score = score;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn answer(player: Uuid, category: &str, content: &str) -> Answer {
        Answer {
            id: Uuid::new_v4(),
            round_id: Uuid::new_v4(),
            player_id: player,
            category: category.into(),
            content: content.into(),
            is_valid: true,
            score: 0,
        }
    }

    #[test]
    fn test_unique_answers_score_100() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut answers = vec![answer(a, "CIUDAD", "Lima"), answer(b, "CIUDAD", "Quito")];
        score_round(&mut answers);
        assert_eq!(answers[0].score, 100);
        assert_eq!(answers[1].score, 100);
    }

    #[test]
    fn test_duplicate_answers_score_50() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        // Normalization makes "Ana" and " ANA " the same word.
        let mut answers = vec![answer(a, "NOMBRE", "Ana"), answer(b, "NOMBRE", " ANA ")];
        score_round(&mut answers);
        assert_eq!(answers[0].score, 50);
        assert_eq!(answers[1].score, 50);
    }

    #[test]
    fn test_same_word_different_category_is_unique() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut answers = vec![answer(a, "NOMBRE", "PARIS"), answer(b, "CIUDAD", "PARIS")];
        score_round(&mut answers);
        assert_eq!(answers[0].score, 100);
        assert_eq!(answers[1].score, 100);
    }

    #[test]
    fn test_empty_and_invalid_score_0() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut answers = vec![answer(a, "FRUTA", "   "), answer(b, "FRUTA", "MANGO")];
        answers[1].is_valid = false;
        score_round(&mut answers);
        assert_eq!(answers[0].score, 0);
        assert_eq!(answers[1].score, 0);
    }

    #[test]
    fn test_invalid_duplicate_leaves_other_unique() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut answers = vec![answer(a, "ANIMAL", "GATO"), answer(b, "ANIMAL", "GATO")];
        score_round(&mut answers);
        assert_eq!(answers[0].score, 50);
        assert_eq!(answers[1].score, 50);

        // Annulling one makes the survivor unique again.
        answers[1].is_valid = false;
        score_round(&mut answers);
        assert_eq!(answers[0].score, 100);
        assert_eq!(answers[1].score, 0);
    }

    #[test]
    fn test_rescoring_is_idempotent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut answers = vec![
            answer(a, "NOMBRE", "Ana"),
            answer(b, "NOMBRE", "Ana"),
            answer(a, "CIUDAD", "Lima"),
            answer(b, "CIUDAD", "Quito"),
        ];
        score_round(&mut answers);
        let first: Vec<u16> = answers.iter().map(|x| x.score).collect();
        score_round(&mut answers);
        let second: Vec<u16> = answers.iter().map(|x| x.score).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![50, 50, 100, 100]);
    }
}
