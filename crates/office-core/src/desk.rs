use crate::model::Position;
use std::collections::HashMap;

/// A rectangular block of desks for one team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub origin: Position,
    pub columns: u32,
    pub spacing: i32,
}

impl Zone {
    pub const fn new(x: i32, y: i32) -> Self {
        Self {
            origin: Position::new(x, y),
            columns: 2,
            spacing: 2,
        }
    }

    pub fn slot(&self, ordinal: u32) -> Position {
        let columns = self.columns.max(1);
        let col = (ordinal % columns) as i32;
        let row = (ordinal / columns) as i32;
        Position::new(
            self.origin.x + col * self.spacing,
            self.origin.y + row * self.spacing,
        )
    }
}

/// Team → zone table with a fallback zone for unknown teams.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    zones: HashMap<String, Zone>,
    fallback: Zone,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(Zone::new(8, 8))
            .with_zone("engineering", Zone::new(3, 3))
            .with_zone("design", Zone::new(13, 3))
            .with_zone("qa", Zone::new(13, 10))
            .with_zone("management", Zone::new(3, 11))
    }
}

impl Layout {
    pub fn new(fallback: Zone) -> Self {
        Self {
            zones: HashMap::new(),
            fallback,
        }
    }

    pub fn with_zone(mut self, team: &str, zone: Zone) -> Self {
        self.zones.insert(team_key(team), zone);
        self
    }

    pub fn zone(&self, team: &str) -> Zone {
        self.zones
            .get(&team_key(team))
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Desk for the `ordinal`-th member of `team`. Pure: the same inputs
    /// always produce the same desk.
    pub fn assign_desk(&self, team: &str, ordinal: u32) -> Position {
        self.zone(team).slot(ordinal)
    }
}

pub fn team_key(team: &str) -> String {
    team.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn first_engineering_desks_match_office_layout() {
        let layout = Layout::default();
        assert_eq!(layout.assign_desk("engineering", 0), Position::new(3, 3));
        assert_eq!(layout.assign_desk("engineering", 1), Position::new(5, 3));
        assert_eq!(layout.assign_desk("Engineering", 2), Position::new(3, 5));
        assert_eq!(layout.assign_desk("qa", 1), Position::new(15, 10));
    }

    #[test]
    fn unknown_team_uses_fallback_zone() {
        let layout = Layout::default();
        assert_eq!(layout.assign_desk("marketing", 0), Position::new(8, 8));
        assert_eq!(layout.assign_desk("", 3), Position::new(10, 10));
    }

    #[test]
    fn assignment_is_pure_and_collision_free_within_a_team() {
        let layout = Layout::default();
        let mut seen = HashSet::new();
        for ordinal in 0..32 {
            let desk = layout.assign_desk("design", ordinal);
            assert_eq!(desk, layout.assign_desk("design", ordinal));
            assert!(seen.insert(desk), "desk {desk} assigned twice");
        }
    }

    #[test]
    fn zero_columns_does_not_divide_by_zero() {
        let layout = Layout::new(Zone {
            origin: Position::new(0, 0),
            columns: 0,
            spacing: 3,
        });
        assert_eq!(layout.assign_desk("any", 2), Position::new(0, 6));
    }
}
