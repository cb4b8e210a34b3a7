//! Device identity allocation.
//!
//! Two schemes, depending on the backend:
//! - **Fixed slots** ([`SlotTable`]): the driver exposes [`SLOT_COUNT`]
//!   pre-configured devices that must be claimed and given back. The table
//!   scans slots in ascending order and claims the first one the driver
//!   reports free. "No free slot" ([`ControllerError::Exhausted`]) and "slot
//!   looked free but the claim failed" ([`ControllerError::AcquireFailed`])
//!   are different errors: the second usually means another process raced us.
//! - **Dynamic** ([`DynamicIds`]): devices are created on demand and get the
//!   next value of a counter. Destroying a device never renumbers the others.

use crate::device::DeviceId;
use crate::error::ControllerError;
use tracing::{debug, warn};

/// Capacity of fixed-slot drivers.
pub const SLOT_COUNT: usize = 16;

/// What we know about one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Claimable.
    Free,
    /// Claimed by this process.
    Owned,
    /// Missing, busy in another process, or in an unknown state.
    Unavailable,
}

/// Driver side of a fixed-slot scheme. Slots are 0-based here.
pub trait SlotDriver {
    /// Driver-reported state. `Owned` means owned by *this* process.
    fn slot_state(&self, slot: u32) -> SlotState;

    /// Claim a slot. `false` if the driver refused.
    fn acquire(&mut self, slot: u32) -> bool;

    /// Give a slot back.
    fn relinquish(&mut self, slot: u32);
}

/// Fixed-capacity slot table.
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: [SlotState; SLOT_COUNT],
}

impl Default for SlotTable {
    fn default() -> Self {
        Self {
            slots: [SlotState::Free; SLOT_COUNT],
        }
    }
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the lowest free slot.
    pub fn allocate<D: SlotDriver + ?Sized>(&mut self, driver: &mut D) -> Result<u32, ControllerError> {
        for (idx, local) in self.slots.iter_mut().enumerate() {
            if *local == SlotState::Owned {
                continue;
            }
            let slot = idx as u32;
            match driver.slot_state(slot) {
                SlotState::Free => {}
                // Owned by this process but not through this table.
                SlotState::Owned | SlotState::Unavailable => {
                    *local = SlotState::Unavailable;
                    continue;
                }
            }
            if !driver.acquire(slot) {
                warn!(slot, "slot reported free but acquisition failed");
                *local = SlotState::Unavailable;
                return Err(ControllerError::AcquireFailed { slot });
            }
            debug!(slot, "slot acquired");
            *local = SlotState::Owned;
            return Ok(slot);
        }
        Err(ControllerError::Exhausted(SLOT_COUNT))
    }

    /// Return a slot we own. Releasing a slot we do not own does nothing.
    pub fn release<D: SlotDriver + ?Sized>(&mut self, slot: u32, driver: &mut D) {
        let Some(local) = self.slots.get_mut(slot as usize) else {
            return;
        };
        if *local == SlotState::Owned {
            driver.relinquish(slot);
            *local = SlotState::Free;
            debug!(slot, "slot released");
        }
    }

    pub fn state(&self, slot: u32) -> Option<SlotState> {
        self.slots.get(slot as usize).copied()
    }

    pub fn owned(&self) -> usize {
        self.slots.iter().filter(|s| **s == SlotState::Owned).count()
    }
}

/// Counter-based identities for backends that create devices on demand.
#[derive(Debug, Default)]
pub struct DynamicIds {
    next: u32,
}

impl DynamicIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next device will get, without consuming it.
    pub fn peek(&self) -> DeviceId {
        DeviceId(self.next)
    }

    /// Consume the current id.
    pub fn advance(&mut self) -> DeviceId {
        let id = DeviceId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Driver {
        states: [Option<SlotState>; SLOT_COUNT],
        refuse: Vec<u32>,
        acquired: Vec<u32>,
        relinquished: Vec<u32>,
    }

    impl SlotDriver for Driver {
        fn slot_state(&self, slot: u32) -> SlotState {
            self.states[slot as usize].unwrap_or(SlotState::Free)
        }
        fn acquire(&mut self, slot: u32) -> bool {
            if self.refuse.contains(&slot) {
                return false;
            }
            self.acquired.push(slot);
            self.states[slot as usize] = Some(SlotState::Owned);
            true
        }
        fn relinquish(&mut self, slot: u32) {
            self.relinquished.push(slot);
            self.states[slot as usize] = Some(SlotState::Free);
        }
    }

    #[test]
    fn sixteen_then_exhausted() {
        let mut table = SlotTable::new();
        let mut driver = Driver::default();
        for expected in 0..SLOT_COUNT as u32 {
            assert_eq!(table.allocate(&mut driver).unwrap(), expected);
        }
        let err = table.allocate(&mut driver).unwrap_err();
        assert!(matches!(err, ControllerError::Exhausted(16)));
    }

    #[test]
    fn skips_slots_held_elsewhere() {
        let mut table = SlotTable::new();
        let mut driver = Driver::default();
        driver.states[0] = Some(SlotState::Unavailable);
        driver.states[1] = Some(SlotState::Owned);
        assert_eq!(table.allocate(&mut driver).unwrap(), 2);
        assert_eq!(table.state(0), Some(SlotState::Unavailable));
    }

    #[test]
    fn failed_claim_is_not_exhaustion() {
        let mut table = SlotTable::new();
        let mut driver = Driver {
            refuse: vec![0],
            ..Default::default()
        };
        let err = table.allocate(&mut driver).unwrap_err();
        assert!(matches!(err, ControllerError::AcquireFailed { slot: 0 }));
        assert_eq!(table.owned(), 0);
    }

    #[test]
    fn released_slot_is_reused_lowest_first() {
        let mut table = SlotTable::new();
        let mut driver = Driver::default();
        for _ in 0..3 {
            table.allocate(&mut driver).unwrap();
        }
        table.release(1, &mut driver);
        table.release(1, &mut driver);
        assert_eq!(driver.relinquished, vec![1]);
        assert_eq!(table.allocate(&mut driver).unwrap(), 1);
    }

    #[test]
    fn dynamic_ids_never_repeat() {
        let mut ids = DynamicIds::new();
        assert_eq!(ids.peek(), DeviceId(0));
        assert_eq!(ids.advance(), DeviceId(0));
        assert_eq!(ids.advance(), DeviceId(1));
        assert_eq!(ids.peek(), DeviceId(2));
    }
}
