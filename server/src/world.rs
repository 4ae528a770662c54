use log::info;
use shared::{GameEvent, PoiData};
use std::collections::BTreeMap;

/// Merged attributes of one POI.
pub type PoiRecord = PoiData;

/// Shared game world: every known POI plus the measurement flag.
///
/// POIs are kept in a `BTreeMap` so a connecting session always receives
/// them in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldState {
    game_type: String,
    pois: BTreeMap<String, PoiRecord>,
    measuring: bool,
    events_recorded: u64,
}

impl WorldState {
    pub fn new(game_type: impl Into<String>) -> Self {
        Self {
            game_type: game_type.into(),
            ..Self::default()
        }
    }

    /// Rebuilds a world from persisted parts. Measurement always starts inactive.
    pub fn restore(game_type: impl Into<String>, pois: BTreeMap<String, PoiRecord>) -> Self {
        Self {
            game_type: game_type.into(),
            pois,
            ..Self::default()
        }
    }

    pub fn game_type(&self) -> &str {
        &self.game_type
    }

    pub fn pois(&self) -> &BTreeMap<String, PoiRecord> {
        &self.pois
    }

    pub fn poi(&self, guid: &str) -> Option<&PoiRecord> {
        self.pois.get(guid)
    }

    pub fn poi_count(&self) -> usize {
        self.pois.len()
    }

    /// Shallow-merges `patch` into the record for `guid`, creating it if needed.
    ///
    /// Fields in the patch overwrite fields of the same name; all other fields
    /// of the existing record are kept. Returns the full merged record.
    pub fn merge_poi(&mut self, guid: &str, patch: PoiData) -> &PoiRecord {
        info!("New POI data for {}: {:?}", guid, patch);

        let record = self.pois.entry(guid.to_string()).or_default();
        record.extend(patch);
        record
    }

    /// Log-only. Events do not change anything that is served to clients.
    pub fn record_event(&mut self, event: &GameEvent) {
        info!(
            "Potentially new event: type={} team={} timestamp={} extra={:?}",
            event.kind, event.team, event.timestamp, event.extra
        );
        self.events_recorded += 1;
    }

    pub fn events_recorded(&self) -> u64 {
        self.events_recorded
    }

    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Sets the measurement flag. Returns false when it already had that value.
    pub fn set_measuring(&mut self, active: bool) -> bool {
        if self.measuring == active {
            return false;
        }
        self.measuring = active;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Number, Value};

    fn patch(value: Value) -> PoiData {
        match value {
            Value::Object(map) => map,
            _ => panic!("patch must be an object"),
        }
    }

    #[test]
    fn test_merge_creates_record() {
        let mut world = WorldState::new("measurement");
        let merged = world
            .merge_poi("g1", patch(json!({"latE6": 1, "lngE6": 2})))
            .clone();

        assert_eq!(Value::Object(merged), json!({"latE6": 1, "lngE6": 2}));
        assert_eq!(world.poi_count(), 1);
    }

    #[test]
    fn test_merge_is_shallow_last_write_wins() {
        let mut world = WorldState::new("measurement");
        world.merge_poi("g1", patch(json!({"latE6": 1, "lngE6": 2})));
        let merged = world.merge_poi("g1", patch(json!({"lngE6": 3}))).clone();

        assert_eq!(Value::Object(merged), json!({"latE6": 1, "lngE6": 3}));
    }

    #[test]
    fn test_merge_replaces_nested_values_whole() {
        let mut world = WorldState::new("measurement");
        world.merge_poi("g1", patch(json!({"owner": {"team": "red", "level": 3}})));
        world.merge_poi("g1", patch(json!({"owner": {"team": "blue"}})));

        assert_eq!(
            world.poi("g1").and_then(|record| record.get("owner")),
            Some(&json!({"team": "blue"}))
        );
    }

    #[test]
    fn test_merge_sequence_matches_fold() {
        let patches = vec![
            json!({"latE6": 10, "lngE6": 20, "title": "Fountain"}),
            json!({"title": "Old Fountain", "team": "red"}),
            json!({"latE6": 11}),
            json!({"team": "blue", "health": 80}),
        ];

        let mut world = WorldState::new("measurement");
        let mut expected = PoiData::new();
        for p in &patches {
            world.merge_poi("g1", patch(p.clone()));
            for (key, value) in patch(p.clone()) {
                expected.insert(key, value);
            }
        }

        assert_eq!(world.poi("g1"), Some(&expected));
    }

    #[test]
    fn test_merge_keeps_other_pois_untouched() {
        let mut world = WorldState::new("measurement");
        world.merge_poi("g1", patch(json!({"latE6": 1, "lngE6": 2})));
        world.merge_poi("g2", patch(json!({"latE6": 5, "lngE6": 6})));
        world.merge_poi("g2", patch(json!({"latE6": 7})));

        assert_eq!(
            world.poi("g1").map(|r| Value::Object(r.clone())),
            Some(json!({"latE6": 1, "lngE6": 2}))
        );
    }

    #[test]
    fn test_measuring_toggle() {
        let mut world = WorldState::new("measurement");
        assert!(!world.is_measuring());
        assert!(world.set_measuring(true));
        assert!(!world.set_measuring(true));
        assert!(world.is_measuring());
        assert!(world.set_measuring(false));
        assert!(!world.is_measuring());
    }

    #[test]
    fn test_record_event_leaves_pois_alone() {
        let mut world = WorldState::new("measurement");
        world.merge_poi("g1", patch(json!({"latE6": 1, "lngE6": 2})));
        let before = world.pois().clone();

        world.record_event(&GameEvent {
            kind: "capture".to_string(),
            timestamp: Number::from(1),
            team: "red".to_string(),
            extra: PoiData::new(),
        });

        assert_eq!(world.pois(), &before);
        assert_eq!(world.events_recorded(), 1);
    }

    #[test]
    fn test_restore_starts_without_measurement() {
        let mut pois = BTreeMap::new();
        pois.insert("g1".to_string(), patch(json!({"latE6": 1, "lngE6": 2})));
        let world = WorldState::restore("capture", pois);

        assert_eq!(world.game_type(), "capture");
        assert_eq!(world.poi_count(), 1);
        assert!(!world.is_measuring());
    }
}
