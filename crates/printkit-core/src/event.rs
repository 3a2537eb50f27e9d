//! Event system for controller observers
//!
//! Provides:
//! - Event types for notable orchestrator state changes
//! - Event dispatcher publishing events to any number of subscribers
//!
//! Publishing never blocks the orchestrator; events sent while nobody is
//! subscribed are dropped.

use crate::error::ControllerError;
use tokio::sync::broadcast;

/// Which command source an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Interactive line channel
    Serial,
    /// Storage-backed stream
    SdCard,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Serial => write!(f, "serial"),
            ChannelKind::SdCard => write!(f, "sdcard"),
        }
    }
}

/// Printer event types
#[derive(Debug, Clone, PartialEq)]
pub enum PrinterEvent {
    /// Boot banner was emitted
    Booted,
    /// A channel finished its current command
    CommandFinished(ChannelKind),
    /// All axes of a homing session are referenced
    HomingFinished,
    /// A probe point was measured
    ProbeHeight {
        /// Index of the probe point
        point: usize,
        /// Measured height
        height: f64,
    },
    /// Storage finished initializing
    StorageMounted {
        /// Capacity in 512-byte blocks
        blocks: u32,
    },
    /// The stored program ended
    StorageEof,
    /// The planner ran out of buffered steps
    PlannerUnderrun(u32),
    /// Stepper drivers were disabled after inactivity
    SteppersDisabled,
    /// A collaborator reported a failure
    Fault(ControllerError),
}

impl std::fmt::Display for PrinterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrinterEvent::Booted => write!(f, "Booted"),
            PrinterEvent::CommandFinished(ch) => write!(f, "Command finished on {}", ch),
            PrinterEvent::HomingFinished => write!(f, "Homing finished"),
            PrinterEvent::ProbeHeight { point, height } => {
                write!(f, "Probe point {}: {}", point, height)
            }
            PrinterEvent::StorageMounted { blocks } => write!(f, "Storage mounted ({} blocks)", blocks),
            PrinterEvent::StorageEof => write!(f, "Storage EOF"),
            PrinterEvent::PlannerUnderrun(count) => write!(f, "Planner underrun #{}", count),
            PrinterEvent::SteppersDisabled => write!(f, "Steppers disabled"),
            PrinterEvent::Fault(err) => write!(f, "Fault: {}", err),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for printer events.
    tx: broadcast::Sender<PrinterEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: PrinterEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!("No subscribers for event: {}", event);
                0
            }
        }
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
