use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameId {
    SkyrimSe,
    Skyrim,
    Fallout4,
    FalloutNv,
    Oblivion,
    Starfield,
}

impl Default for GameId {
    fn default() -> Self {
        GameId::SkyrimSe
    }
}

impl GameId {
    pub fn display_name(self) -> &'static str {
        match self {
            GameId::SkyrimSe => "Skyrim Special Edition",
            GameId::Skyrim => "Skyrim",
            GameId::Fallout4 => "Fallout 4",
            GameId::FalloutNv => "Fallout: New Vegas",
            GameId::Oblivion => "Oblivion",
            GameId::Starfield => "Starfield",
        }
    }

    /// Identifier the analyzer backend expects in the `game` field.
    pub fn as_str(self) -> &'static str {
        match self {
            GameId::SkyrimSe => "skyrimse",
            GameId::Skyrim => "skyrim",
            GameId::Fallout4 => "fallout4",
            GameId::FalloutNv => "falloutnv",
            GameId::Oblivion => "oblivion",
            GameId::Starfield => "starfield",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "skyrimse" | "sse" | "skyrimspecialedition" => Some(GameId::SkyrimSe),
            "skyrim" | "skyrimle" | "tesv" => Some(GameId::Skyrim),
            "fallout4" | "fo4" => Some(GameId::Fallout4),
            "falloutnv" | "fnv" | "falloutnewvegas" => Some(GameId::FalloutNv),
            "oblivion" | "tes4" => Some(GameId::Oblivion),
            "starfield" | "sf1" => Some(GameId::Starfield),
            _ => None,
        }
    }
}

pub fn supported_games() -> Vec<GameId> {
    vec![
        GameId::SkyrimSe,
        GameId::Skyrim,
        GameId::Fallout4,
        GameId::FalloutNv,
        GameId::Oblivion,
        GameId::Starfield,
    ]
}
