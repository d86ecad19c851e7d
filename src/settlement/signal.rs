use serde::Serialize;

/// Completion signal for a settlement intent.
///
/// Variants are declared in priority order, so merging is `max`:
/// destination fulfillment > bridge-reported fulfillment > quorum execution > pending.
/// Fulfillment outranks execution because it means funds actually arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Pending,
    Executed,
    Fulfilled,
    FulfilledOnDestination,
}

impl Signal {
    pub fn merge(self, other: Signal) -> Signal {
        self.max(other)
    }

    pub fn is_resolved(&self) -> bool {
        *self != Signal::Pending
    }
}

/// Raw flags observed during one poll tick. `None` means the read failed or was not made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub executed: Option<bool>,
    pub fulfilled: Option<bool>,
    pub destination_fulfilled: Option<bool>,
}

impl Observation {
    pub fn signal(&self) -> Signal {
        let executed = match self.executed {
            Some(true) => Signal::Executed,
            _ => Signal::Pending,
        };
        let fulfilled = match self.fulfilled {
            Some(true) => Signal::Fulfilled,
            _ => Signal::Pending,
        };
        let destination = match self.destination_fulfilled {
            Some(true) => Signal::FulfilledOnDestination,
            _ => Signal::Pending,
        };

        executed.merge(fulfilled).merge(destination)
    }
}
