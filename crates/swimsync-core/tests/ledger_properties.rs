//! Property tests for the lap ledger and message classification
//!
//! These drive the deterministic core with randomized event sequences and
//! assert the invariants that hold regardless of sensor noise.

use proptest::prelude::*;
use serde_json::{json, Value};

use swimsync_core::config::AggregatorConfig;
use swimsync_core::ledger::LapLedger;
use swimsync_core::message::{Payload, PeerMessage};
use swimsync_core::types::{TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Test Clock
// ----------------------------------------------------------------------------

#[derive(Clone)]
struct StepClock(std::rc::Rc<std::cell::Cell<u64>>);

impl StepClock {
    fn new() -> Self {
        Self(std::rc::Rc::new(std::cell::Cell::new(0)))
    }

    fn advance(&self, millis: u64) {
        self.0.set(self.0.get() + millis);
    }
}

impl TimeSource for StepClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.0.get())
    }
}

// ----------------------------------------------------------------------------
// Ledger Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum LedgerEvent {
    Strokes(u32),
    HeartRate(f64),
    Boundary(u32),
    Advance(u64),
}

fn ledger_event() -> impl Strategy<Value = LedgerEvent> {
    prop_oneof![
        (0u32..500).prop_map(LedgerEvent::Strokes),
        (40.0f64..220.0).prop_map(LedgerEvent::HeartRate),
        (1u32..20).prop_map(LedgerEvent::Boundary),
        (0u64..10_000).prop_map(LedgerEvent::Advance),
    ]
}

proptest! {
    /// The tracked cumulative value never decreases, lap numbers stay
    /// strictly increasing, and no delta ever underflows, no matter how the
    /// platform reorders or redelivers.
    #[test]
    fn ledger_invariants_hold_under_noise(events in prop::collection::vec(ledger_event(), 0..200)) {
        let clock = StepClock::new();
        let mut ledger = LapLedger::new(&AggregatorConfig::default(), clock.clone());
        let mut last_cumulative = 0u32;

        for event in events {
            match event {
                LedgerEvent::Strokes(total) => {
                    ledger.record_strokes(total);
                    prop_assert!(ledger.cumulative_strokes() >= last_cumulative);
                    last_cumulative = ledger.cumulative_strokes();
                }
                LedgerEvent::HeartRate(bpm) => ledger.record_heart_rate(bpm),
                LedgerEvent::Boundary(index) => {
                    ledger.lap_boundary(index);
                }
                LedgerEvent::Advance(millis) => clock.advance(millis),
            }
        }
        ledger.finalize();

        let laps = ledger.laps();
        for pair in laps.windows(2) {
            prop_assert!(pair[0].lap_number < pair[1].lap_number);
        }
        for lap in laps {
            prop_assert!(lap.heart_rate >= 0.0);
            prop_assert!(lap.distance > 0.0);
        }
    }

    /// Classification is total: arbitrary maps never panic, and maps with no
    /// recognizable shape come back as Unclassified.
    #[test]
    fn classification_is_total(entries in prop::collection::vec(("[a-zA-Z]{1,12}", any::<i64>()), 0..8)) {
        let payload: Payload = entries
            .into_iter()
            .map(|(k, v)| (k, json!(v)))
            .collect();
        let message = PeerMessage::classify(&payload);
        // whatever came back has a kind; Unclassified keeps the original map
        if let PeerMessage::Unclassified(map) = &message {
            prop_assert_eq!(map, &payload);
        }
    }

    /// A round trip through the wire encoding preserves the message for
    /// every value the protocol can carry.
    #[test]
    fn heart_rate_round_trip(bpm in 0u32..260) {
        let message = PeerMessage::HeartRate { bpm };
        let payload = message.clone().into_payload();
        prop_assert_eq!(PeerMessage::classify(&payload), message);
    }
}

// ----------------------------------------------------------------------------
// Non-property checks on awkward payload shapes
// ----------------------------------------------------------------------------

#[test]
fn classification_tolerates_wrong_value_types() {
    let mut payload = Payload::new();
    payload.insert("poolSize".into(), Value::String("not a number".into()));
    assert!(matches!(
        PeerMessage::classify(&payload),
        PeerMessage::Unclassified(_)
    ));

    let mut payload = Payload::new();
    payload.insert("heartRate".into(), json!(-4));
    assert!(matches!(
        PeerMessage::classify(&payload),
        PeerMessage::Unclassified(_)
    ));
}
