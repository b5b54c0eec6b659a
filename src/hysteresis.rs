//! power presence tracking with asymmetric debounce.
//!
//! losing power needs `offline_debounce` consecutive readings before it is
//! believed; power coming back is believed on the first reading.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Presence {
    #[default]
    Unset,
    Online,
    Offline,
}

/// a confirmed presence flip, to be turned into a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerEvent {
    pub online: bool,
    pub battery_percent: i32,
    pub input_watts: i32,
}

impl PowerEvent {
    pub fn message(&self) -> String {
        if self.online {
            format!("⚡ Power is back (+{}W, battery {}%)", self.input_watts, self.battery_percent)
        } else {
            format!("🪫 Power lost (battery {}%)", self.battery_percent)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceTracker {
    state: Presence,
    opposite_readings: u32,
    offline_debounce: u32,
}

impl PresenceTracker {
    pub fn new(offline_debounce: u32) -> Self {
        Self {
            state: Presence::Unset,
            opposite_readings: 0,
            offline_debounce: offline_debounce.max(1),
        }
    }

    pub fn state(&self) -> Presence {
        self.state
    }

    pub fn opposite_readings(&self) -> u32 {
        self.opposite_readings
    }

    /// feed one cycle's reading; returns an event on a confirmed flip
    pub fn observe(
        &mut self,
        has_power: bool,
        battery_percent: i32,
        input_watts: i32,
    ) -> Option<PowerEvent> {
        let event = PowerEvent { online: has_power, battery_percent, input_watts };

        match (self.state, has_power) {
            (Presence::Unset, true) => {
                self.state = Presence::Online;
                None
            }
            (Presence::Unset, false) => {
                self.state = Presence::Offline;
                None
            }
            (Presence::Online, true) | (Presence::Offline, false) => {
                self.opposite_readings = 0;
                None
            }
            (Presence::Offline, true) => {
                self.state = Presence::Online;
                self.opposite_readings = 0;
                Some(event)
            }
            (Presence::Online, false) => {
                self.opposite_readings += 1;
                if self.opposite_readings < self.offline_debounce {
                    return None;
                }
                self.state = Presence::Offline;
                self.opposite_readings = 0;
                Some(event)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tracker: &mut PresenceTracker, readings: &[bool]) -> Vec<PowerEvent> {
        readings
            .iter()
            .filter_map(|&on| tracker.observe(on, 50, if on { 600 } else { 0 }))
            .collect()
    }

    #[test]
    fn first_reading_initialises_silently() {
        let mut t = PresenceTracker::new(2);
        assert!(t.observe(true, 50, 600).is_none());
        assert_eq!(t.state(), Presence::Online);

        let mut t = PresenceTracker::new(2);
        assert!(t.observe(false, 50, 0).is_none());
        assert_eq!(t.state(), Presence::Offline);
    }

    #[test]
    fn single_dropout_is_ignored() {
        let mut t = PresenceTracker::new(2);
        let events = feed(&mut t, &[true, false, true, true]);
        assert!(events.is_empty());
        assert_eq!(t.state(), Presence::Online);
        assert_eq!(t.opposite_readings(), 0);
    }

    #[test]
    fn two_offline_readings_emit_once() {
        let mut t = PresenceTracker::new(2);
        let events = feed(&mut t, &[true, false, false, false, false]);
        assert_eq!(events.len(), 1);
        assert!(!events[0].online);
        assert_eq!(events[0].battery_percent, 50);
        assert_eq!(t.state(), Presence::Offline);
    }

    #[test]
    fn power_return_is_immediate() {
        let mut t = PresenceTracker::new(2);
        feed(&mut t, &[false]);
        let event = t.observe(true, 42, 700).expect("online event");
        assert!(event.online);
        assert_eq!(event.input_watts, 700);
        assert_eq!(event.battery_percent, 42);
    }

    #[test]
    fn dropout_counter_does_not_survive_confirmation() {
        let mut t = PresenceTracker::new(2);
        // dropout, recovery, dropout: never two in a row
        let events = feed(&mut t, &[true, false, true, false, true, false]);
        assert!(events.is_empty());
    }

    #[test]
    fn messages_mention_battery() {
        let lost = PowerEvent { online: false, battery_percent: 73, input_watts: 0 };
        assert!(lost.message().contains("73%"));
        let back = PowerEvent { online: true, battery_percent: 12, input_watts: 480 };
        assert!(back.message().contains("480W"));
    }
}
