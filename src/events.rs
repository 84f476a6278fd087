use std::path::PathBuf;

use crate::tasks::buttons::BusyGuard;

/// A discrete press delivered by the button source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Next,
    Previous,
    CycleColorMode,
    ResetColorMode,
}

/// Emitted by the file watcher for every image that appears in the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoCreated(pub PathBuf);

/// Work items for the frame task, which is the only owner of the controller.
#[derive(Debug)]
pub enum FrameCommand {
    /// A button press. The guard keeps further presses out until the command
    /// has been handled.
    Button {
        event: ButtonEvent,
        guard: Option<BusyGuard>,
    },
    /// Show a freshly ingested photo right away.
    DisplayNew(PathBuf),
    /// Queue a freshly ingested photo for the regular rotation.
    Enqueue(PathBuf),
}
