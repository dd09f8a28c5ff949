//! Urgency/importance classification.
//!
//! [`classify`] places a task in one of the four matrix quadrants or the
//! backlog. [`Quadrant::placement`] is the inverse used by moves: the
//! attribute values a task receives when dropped into a quadrant.

use std::fmt;
use std::str::FromStr;

use eisen_proto::task::{Schedule, Task};

/// Highest priority still counted as urgent.
pub const URGENT_PRIORITY_MAX: u8 = 2;

/// Where a task sits in the matrix.
///
/// Variant order is display order, so a `BTreeMap<Quadrant, _>` iterates
/// Do, Schedule, Delegate, Eliminate, Backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quadrant {
    /// Urgent and important: do now.
    UrgentImportant,
    /// Important, not urgent: schedule.
    NotUrgentImportant,
    /// Urgent, not important: delegate.
    UrgentNotImportant,
    /// Neither: eliminate.
    NotUrgentNotImportant,
    /// Scheduled for tomorrow.
    Backlog,
}

impl Quadrant {
    /// All quadrants in display order.
    pub const ALL: [Self; 5] = [
        Self::UrgentImportant,
        Self::NotUrgentImportant,
        Self::UrgentNotImportant,
        Self::NotUrgentNotImportant,
        Self::Backlog,
    ];

    /// Stable identifier, e.g. `urgent-important`.
    #[must_use]
    pub const fn as_id(self) -> &'static str {
        match self {
            Self::UrgentImportant => "urgent-important",
            Self::NotUrgentImportant => "not-urgent-important",
            Self::UrgentNotImportant => "urgent-not-important",
            Self::NotUrgentNotImportant => "not-urgent-not-important",
            Self::Backlog => "backlog",
        }
    }

    /// Human-readable name used in history entries.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::UrgentImportant => "Do",
            Self::NotUrgentImportant => "Schedule",
            Self::UrgentNotImportant => "Delegate",
            Self::NotUrgentNotImportant => "Eliminate",
            Self::Backlog => "Backlog",
        }
    }

    /// Attribute values a task takes when moved here.
    #[must_use]
    pub const fn placement(self) -> Placement {
        match self {
            Self::UrgentImportant => Placement {
                priority: 1,
                important: Some(true),
                scheduled_for: Schedule::Today,
            },
            Self::NotUrgentImportant => Placement {
                priority: 3,
                important: Some(true),
                scheduled_for: Schedule::Today,
            },
            Self::UrgentNotImportant => Placement {
                priority: 2,
                important: Some(false),
                scheduled_for: Schedule::Today,
            },
            Self::NotUrgentNotImportant => Placement {
                priority: 4,
                important: Some(false),
                scheduled_for: Schedule::Today,
            },
            Self::Backlog => Placement {
                priority: 5,
                important: None,
                scheduled_for: Schedule::Tomorrow,
            },
        }
    }
}

impl fmt::Display for Quadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_id())
    }
}

/// Unrecognised quadrant identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quadrant: {0}")]
pub struct UnknownQuadrant(pub String);

impl FromStr for Quadrant {
    type Err = UnknownQuadrant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "urgent-important" | "do" => Ok(Self::UrgentImportant),
            "not-urgent-important" | "schedule" => Ok(Self::NotUrgentImportant),
            "urgent-not-important" | "delegate" => Ok(Self::UrgentNotImportant),
            "not-urgent-not-important" | "eliminate" => Ok(Self::NotUrgentNotImportant),
            "backlog" | "tomorrow" => Ok(Self::Backlog),
            _ => Err(UnknownQuadrant(s.to_string())),
        }
    }
}

/// Attributes assigned by a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// New priority.
    pub priority: u8,
    /// `Some(true)` adds the `important` tag, `Some(false)` removes it,
    /// `None` leaves tags alone.
    pub important: Option<bool>,
    /// New schedule.
    pub scheduled_for: Schedule,
}

/// Classifies a task.
///
/// Tomorrow always means backlog. Otherwise priority 1-2 is urgent and the
/// `important` tag marks importance.
#[must_use]
pub fn classify(task: &Task) -> Quadrant {
    if task.scheduled_for == Schedule::Tomorrow {
        return Quadrant::Backlog;
    }
    let urgent = task.priority <= URGENT_PRIORITY_MAX;
    match (urgent, task.is_important()) {
        (true, true) => Quadrant::UrgentImportant,
        (false, true) => Quadrant::NotUrgentImportant,
        (true, false) => Quadrant::UrgentNotImportant,
        (false, false) => Quadrant::NotUrgentNotImportant,
    }
}
