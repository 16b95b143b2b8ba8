//! # Frame Synchronizer
//!
//! Frame indices are 16-bit and wrap, so "newer than" is decided on the
//! signed distance `incoming - head` taken modulo 2^16, never on `<`/`>`.
//!
//! With `N` decoder slots:
//!
//! | distance `d`                  | action                      |
//! |-------------------------------|-----------------------------|
//! | no head yet                   | [`SyncAction::Initialize`]  |
//! | `0`, `-(N-1)..=-1`            | [`SyncAction::Route`]       |
//! | `1..=N-1`                     | [`SyncAction::Advance`]     |
//! | `N..=32767`                   | [`SyncAction::Resync`]      |
//! | `-(32768-N)+1..=-N`           | [`SyncAction::Ignore`]      |
//! | `..=-(32768-N)`               | [`SyncAction::Resync`]      |

/// Half of the 16-bit frame index space.
const HALF_SPACE: i32 = 1 << 15;

/// Signed wraparound distance from `head` to `incoming`.
///
/// Positive when `incoming` is newer than `head`.
#[inline]
pub fn frame_distance(head: u16, incoming: u16) -> i32 {
    incoming.wrapping_sub(head) as i16 as i32
}

/// Whether `a` is strictly newer than `b` in wraparound order.
#[inline]
pub fn is_newer(a: u16, b: u16) -> bool {
    frame_distance(b, a) > 0
}

/// What to do with a block, given its frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// First block ever seen: adopt its frame as head and reset everything.
    Initialize,
    /// A newer frame within the pool: `slots` slots (from `head + 1` up to
    /// the incoming frame) are finalized and voided before it is stored.
    Advance { slots: usize },
    /// Loss of synchronization: reset every slot and the read cursor.
    Resync { distance: i32 },
    /// The frame is the head or still inside the pool.
    Route,
    /// A stale frame whose slot already belongs to a newer frame.
    Ignore,
}

/// Tracks the newest frame index seen.
#[derive(Debug, Clone)]
pub struct FrameSync {
    head: Option<u16>,
    slot_count: usize,
}

impl FrameSync {
    /// `slot_count` must be in `2..=32767`.
    pub fn new(slot_count: usize) -> Self {
        debug_assert!(slot_count >= 2 && (slot_count as i32) < HALF_SPACE);
        FrameSync {
            head: None,
            slot_count,
        }
    }

    /// Classify an incoming frame index without changing state.
    pub fn classify(&self, incoming: u16) -> SyncAction {
        let head = match self.head {
            Some(h) => h,
            None => return SyncAction::Initialize,
        };
        let n = self.slot_count as i32;
        let d = frame_distance(head, incoming);

        if d == 0 {
            SyncAction::Route
        } else if d > 0 {
            if d < n {
                SyncAction::Advance { slots: d as usize }
            } else {
                SyncAction::Resync { distance: d }
            }
        } else if d > -n {
            SyncAction::Route
        } else if d > -(HALF_SPACE - n) {
            SyncAction::Ignore
        } else {
            SyncAction::Resync { distance: d }
        }
    }

    /// Classify `incoming` and apply the head update it implies.
    pub fn observe(&mut self, incoming: u16) -> SyncAction {
        let action = self.classify(incoming);
        match action {
            SyncAction::Initialize | SyncAction::Advance { .. } | SyncAction::Resync { .. } => {
                self.head = Some(incoming)
            }
            SyncAction::Ignore | SyncAction::Route => {}
        }
        action
    }

    /// Slot owned by a frame index.
    #[inline]
    pub fn slot_of(&self, frame_index: u16) -> usize {
        frame_index as usize % self.slot_count
    }

    pub fn head(&self) -> Option<u16> {
        self.head
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }
}
