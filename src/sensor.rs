//! Collaborator interfaces of the physical board: piece sensor and LEDs.

use serde::{Deserialize, Serialize};

use crate::error::SensorError;
use crate::game::board::{parse_placement, rotate_placement};
use crate::models::{CalibrationMode, LedCommand};

/// One scan of the physical board, in the board's own orientation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Best guess of the full placement
    pub layout: String,
    /// Placement where squares the board could not read reliably are left out
    pub layout_missing: String,
    pub needs_calibration: bool,
}

impl Reading {
    pub fn new(layout: &str, layout_missing: &str, needs_calibration: bool) -> Result<Self, SensorError> {
        for placement in [layout, layout_missing] {
            parse_placement(placement)
                .map_err(|_| SensorError::Unreadable(placement.to_string()))?;
        }
        Ok(Reading {
            layout: layout.to_string(),
            layout_missing: layout_missing.to_string(),
            needs_calibration,
        })
    }

    /// Layout as seen from the virtual board's orientation
    pub fn oriented(&self, rotate180: bool) -> String {
        if rotate180 {
            rotate_placement(&self.layout)
        } else {
            self.layout.clone()
        }
    }

    pub fn rows(&self) -> Vec<&str> {
        self.layout.split('/').collect()
    }

    pub fn missing_rows(&self) -> Vec<&str> {
        self.layout_missing.split('/').collect()
    }
}

/// Source of physical board readings
pub trait BoardSensor: Send {
    fn read(&mut self) -> Result<Reading, SensorError>;

    /// Runs one calibration step; returns true once calibration is complete
    fn calibrate(&mut self, mode: CalibrationMode, verbose: bool) -> Result<bool, SensorError>;
}

/// Fire-and-forget LED output
pub trait LedActuator: Send {
    fn apply(&mut self, command: &LedCommand);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_validates_layouts() {
        let start = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";
        let reading = Reading::new(start, start, false).unwrap();
        assert_eq!(reading.rows().len(), 8);
        assert_eq!(reading.oriented(true), "RNBKQBNR/PPPPPPPP/8/8/8/8/pppppppp/rnbkqbnr");
        assert!(matches!(
            Reading::new("x", start, false),
            Err(SensorError::Unreadable(_))
        ));
    }
}
