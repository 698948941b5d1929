//! The execution deck — terminal hop of every default route.

use evdeck_core::{prefix, Deck, EntryHandle, Event, Outcome, ResultPayload};

/// Terminal deck at prefix 0.
///
/// Accepts every event type and ends the route, completing with whatever
/// result earlier hops attached (it contributes none of its own). Routes
/// are zero-padded, so an event that finishes its explicit hops lands
/// here for free.
pub struct ExecutionDeck;

impl Deck for ExecutionDeck {
    fn prefix(&self) -> u8 {
        prefix::EXECUTION
    }

    fn name(&self) -> &'static str {
        "execution"
    }

    fn process(&self, _event: &Event, _handle: EntryHandle) -> Outcome {
        Outcome::Terminal(ResultPayload::None)
    }
}
