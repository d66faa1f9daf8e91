use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Configuration of one engine role
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub engine: String,
    pub depth: u8,
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default)]
    pub weights: Option<String>,
    /// Forwarded verbatim as engine options when the engine supports them
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

fn default_threads() -> u32 {
    1
}

impl EngineConfig {
    pub fn default_game() -> Self {
        let mut options = BTreeMap::new();
        options.insert("Contempt".to_string(), Value::from(24));
        options.insert("Ponder".to_string(), Value::from(false));
        options.insert("Skill Level".to_string(), Value::from(20));
        EngineConfig {
            engine: "stockfish".to_string(),
            depth: 5,
            threads: 1,
            weights: None,
            options,
        }
    }

    pub fn default_analysis() -> Self {
        let mut options = BTreeMap::new();
        options.insert("Contempt".to_string(), Value::from(24));
        options.insert("Ponder".to_string(), Value::from(false));
        EngineConfig {
            engine: "stockfish".to_string(),
            depth: 15,
            threads: 1,
            weights: None,
            options,
        }
    }

    /// Option values as the engine protocol expects them
    pub fn option_values(&self) -> Vec<(String, String)> {
        let mut values = vec![("Threads".to_string(), self.threads.to_string())];
        for (name, value) in &self.options {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            values.push((name.clone(), text));
        }
        values
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LedSettings {
    /// Pattern flashed while the engine is thinking
    pub thinking: String,
}

impl Default for LedSettings {
    fn default() -> Self {
        LedSettings {
            thinking: "center".to_string(),
        }
    }
}

/// Contents of `game_settings.json`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GameSettings {
    pub game_engine: EngineConfig,
    pub analysis_engine: EngineConfig,
    #[serde(default)]
    pub led: LedSettings,
}

impl Default for GameSettings {
    fn default() -> Self {
        GameSettings {
            game_engine: EngineConfig::default_game(),
            analysis_engine: EngineConfig::default_analysis(),
            led: LedSettings::default(),
        }
    }
}

/// Contents of `board_settings.json`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BoardSettings {
    #[serde(default)]
    pub address: Option<String>,
    pub connection_method: String,
    #[serde(default)]
    pub remote_control: bool,
}

impl Default for BoardSettings {
    fn default() -> Self {
        BoardSettings {
            address: None,
            connection_method: "websocket".to_string(),
            remote_control: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_values_render_plain_text() {
        let values = EngineConfig::default_game().option_values();
        assert_eq!(values[0], ("Threads".to_string(), "1".to_string()));
        assert!(values.contains(&("Ponder".to_string(), "false".to_string())));
        assert!(values.contains(&("Skill Level".to_string(), "20".to_string())));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"engine":"rom-one","depth":3}"#).unwrap();
        assert_eq!(config.threads, 1);
        assert!(config.options.is_empty());
        let game: GameSettings = serde_json::from_str(
            r#"{"game_engine":{"engine":"a","depth":1},"analysis_engine":{"engine":"b","depth":2}}"#,
        )
        .unwrap();
        assert_eq!(game.led.thinking, "center");
    }
}
