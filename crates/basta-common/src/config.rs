use serde::{Deserialize, Serialize};

use crate::game::GameError;

pub const DEFAULT_CATEGORIES: [&str; 6] =
    ["NOMBRE", "APELLIDO", "CIUDAD", "ANIMAL", "FRUTA", "COSA"];
pub const DEFAULT_MAX_ROUNDS: u32 = 5;
pub const MIN_CUSTOM_CATEGORIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    Classic,
    Custom,
}

/// Room configuration as sent by the client on create_room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfigRequest {
    pub mode: GameMode,
    pub categories: Option<Vec<String>>,
    pub rounds: Option<u32>,
}

/// Validated room configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub mode: GameMode,
    pub categories: Vec<String>,
    pub max_rounds: u32,
}

impl RoomConfig {
    pub fn classic() -> Self {
        Self {
            mode: GameMode::Classic,
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Validate a client-supplied config. Custom mode requires at least
    /// three distinct categories; the round count must be at least 1.
    pub fn from_request(req: &RoomConfigRequest) -> Result<Self, GameError> {
        let mut config = Self::classic();
        config.mode = req.mode;

        if req.mode == GameMode::Custom {
            let raw = req
                .categories
                .as_ref()
                .ok_or_else(|| GameError::InvalidConfig("custom mode requires categories".into()))?;
            let mut categories = Vec::new();
            for cat in raw {
                let name = cat.trim().to_uppercase();
                if !name.is_empty() && !categories.contains(&name) {
                    categories.push(name);
                }
            }
            if categories.len() < MIN_CUSTOM_CATEGORIES {
                return Err(GameError::InvalidConfig(format!(
                    "custom mode requires at least {} distinct categories",
                    MIN_CUSTOM_CATEGORIES
                )));
            }
            config.categories = categories;
        }

        if let Some(rounds) = req.rounds {
            if rounds < 1 {
                return Err(GameError::InvalidConfig("rounds must be at least 1".into()));
            }
            config.max_rounds = rounds;
        }

        Ok(config)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_defaults() {
        let config = RoomConfig::classic();
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.categories.len(), 6);
        assert!(config.has_category("NOMBRE"));
    }

    #[test]
    fn test_custom_requires_three_categories() {
        let req = RoomConfigRequest {
            mode: GameMode::Custom,
            categories: Some(vec!["COLOR".into(), "PAIS".into()]),
            rounds: None,
        };
        assert!(matches!(
            RoomConfig::from_request(&req),
            Err(GameError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_custom_normalizes_and_dedupes() {
        let req = RoomConfigRequest {
            mode: GameMode::Custom,
            categories: Some(vec![
                " color ".into(),
                "COLOR".into(),
                "PAIS".into(),
                "MARCA".into(),
            ]),
            rounds: Some(3),
        };
        let config = RoomConfig::from_request(&req).unwrap();
        assert_eq!(config.categories, vec!["COLOR", "PAIS", "MARCA"]);
        assert_eq!(config.max_rounds, 3);
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let req = RoomConfigRequest {
            mode: GameMode::Classic,
            categories: None,
            rounds: Some(0),
        };
        assert!(RoomConfig::from_request(&req).is_err());
    }

    #[test]
    fn test_classic_ignores_custom_categories() {
        let req = RoomConfigRequest {
            mode: GameMode::Classic,
            categories: Some(vec!["X".into()]),
            rounds: None,
        };
        let config = RoomConfig::from_request(&req).unwrap();
        assert_eq!(config.categories.len(), 6);
    }
}
