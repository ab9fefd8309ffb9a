//! Gesture-driven send trigger
//!
//! A remote gesture detector publishes `GRAB`/`DROP` events into the room.
//! The sending client feeds them here; a `DROP` while holding a selected
//! file over an open channel yields exactly one send.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::transfer::SelectedFile;

/// Which side of the transfer this client plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// Displayed hand state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GestureState {
    #[default]
    Open,
    Grab,
    Push,
    Release,
}

/// A gesture as carried in the `value` field of a gesture envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Open,
    Grab,
    Push,
    Drop,
}

impl Gesture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gesture::Open => "OPEN",
            Gesture::Grab => "GRAB",
            Gesture::Push => "PUSH",
            Gesture::Drop => "DROP",
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown gesture: {0}")]
pub struct UnknownGesture(pub String);

impl FromStr for Gesture {
    type Err = UnknownGesture;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Gesture::Open),
            "GRAB" => Ok(Gesture::Grab),
            "PUSH" => Ok(Gesture::Push),
            "DROP" => Ok(Gesture::Drop),
            _ => Err(UnknownGesture(s.to_string())),
        }
    }
}

/// Why a DROP did not start a transfer. Checked in declaration order.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DropPrecondition {
    #[error("No file selected")]
    NoFile,
    #[error("No file grabbed")]
    NotHolding,
    #[error("Peer channel not ready")]
    ChannelNotReady,
    #[error("Transfer already in progress")]
    TransferInProgress,
}

/// What the caller should do after a gesture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Receiver role; nothing changed
    Ignored,
    /// Only the displayed state changed
    Display,
    /// The file is now held
    Held,
    /// Send this file, once
    Send(SelectedFile),
    Rejected(DropPrecondition),
}

pub struct GestureTrigger {
    role: Role,
    state: GestureState,
    holding: bool,
    sending: bool,
    file: Option<SelectedFile>,
}

impl GestureTrigger {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: GestureState::default(),
            holding: false,
            sending: false,
            file: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    /// True from a `Send` decision until `transfer_finished`
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn selected_file(&self) -> Option<&SelectedFile> {
        self.file.as_ref()
    }

    /// Attach the file a later DROP will send
    pub fn select_file(&mut self, file: SelectedFile) {
        info!("Selected file: {}", file.metadata().name);
        self.file = Some(file);
    }

    /// The send started by the last `Send` decision is over, whatever its outcome
    pub fn transfer_finished(&mut self) {
        self.sending = false;
    }

    pub fn on_gesture(&mut self, gesture: Gesture, channel_open: bool) -> TriggerDecision {
        if self.role != Role::Sender {
            debug!("Ignoring {} gesture as {}", gesture, self.role);
            return TriggerDecision::Ignored;
        }

        match gesture {
            Gesture::Open => {
                self.state = GestureState::Open;
                TriggerDecision::Display
            }
            Gesture::Push => {
                self.state = GestureState::Push;
                TriggerDecision::Display
            }
            Gesture::Grab => {
                self.state = GestureState::Grab;
                self.holding = true;
                debug!("File grabbed");
                TriggerDecision::Held
            }
            Gesture::Drop => {
                self.state = GestureState::Release;
                match self.check_drop(channel_open) {
                    Ok(file) => {
                        self.holding = false;
                        self.sending = true;
                        info!("Drop: sending {}", file.metadata().name);
                        TriggerDecision::Send(file)
                    }
                    Err(reason) => {
                        warn!("Drop ignored: {}", reason);
                        TriggerDecision::Rejected(reason)
                    }
                }
            }
        }
    }

    fn check_drop(&self, channel_open: bool) -> Result<SelectedFile, DropPrecondition> {
        let file = self.file.as_ref().ok_or(DropPrecondition::NoFile)?;
        if !self.holding {
            return Err(DropPrecondition::NotHolding);
        }
        if !channel_open {
            return Err(DropPrecondition::ChannelNotReady);
        }
        if self.sending {
            return Err(DropPrecondition::TransferInProgress);
        }
        Ok(file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn selected(temp_dir: &TempDir) -> SelectedFile {
        let path = temp_dir.path().join("photo.png");
        std::fs::write(&path, b"png").unwrap();
        SelectedFile::open(&path).await.unwrap()
    }

    #[test]
    fn test_parse_gesture() {
        assert_eq!("GRAB".parse::<Gesture>(), Ok(Gesture::Grab));
        assert_eq!("DROP".parse::<Gesture>(), Ok(Gesture::Drop));
        assert_eq!("OPEN".parse::<Gesture>(), Ok(Gesture::Open));
        assert_eq!("PUSH".parse::<Gesture>(), Ok(Gesture::Push));
        assert!("WAVE".parse::<Gesture>().is_err());
        assert_eq!(
            "drop".parse::<Gesture>(),
            Err(UnknownGesture("drop".to_string()))
        );
        assert!("Grab".parse::<Gesture>().is_err());
        assert!(" GRAB".parse::<Gesture>().is_err());
        assert_eq!(Gesture::Drop.to_string(), "DROP");
    }

    #[tokio::test]
    async fn test_drop_without_grab_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut trigger = GestureTrigger::new(Role::Sender);
        trigger.select_file(selected(&temp_dir).await);

        assert_eq!(
            trigger.on_gesture(Gesture::Drop, true),
            TriggerDecision::Rejected(DropPrecondition::NotHolding)
        );
        assert_eq!(trigger.state(), GestureState::Release);
    }

    #[tokio::test]
    async fn test_grab_then_drop_sends_once() {
        let temp_dir = TempDir::new().unwrap();
        let file = selected(&temp_dir).await;
        let mut trigger = GestureTrigger::new(Role::Sender);
        trigger.select_file(file.clone());

        assert_eq!(trigger.on_gesture(Gesture::Grab, true), TriggerDecision::Held);
        assert_eq!(trigger.on_gesture(Gesture::Grab, true), TriggerDecision::Held);
        assert!(trigger.is_holding());

        assert_eq!(trigger.on_gesture(Gesture::Drop, true), TriggerDecision::Send(file));
        assert!(!trigger.is_holding());

        // A second drop has nothing held
        assert_eq!(
            trigger.on_gesture(Gesture::Drop, true),
            TriggerDecision::Rejected(DropPrecondition::NotHolding)
        );
    }

    #[tokio::test]
    async fn test_failed_drop_keeps_holding() {
        let temp_dir = TempDir::new().unwrap();
        let mut trigger = GestureTrigger::new(Role::Sender);
        trigger.select_file(selected(&temp_dir).await);

        trigger.on_gesture(Gesture::Grab, false);
        assert_eq!(
            trigger.on_gesture(Gesture::Drop, false),
            TriggerDecision::Rejected(DropPrecondition::ChannelNotReady)
        );
        assert_eq!(trigger.state(), GestureState::Release);
        assert!(trigger.is_holding());

        assert!(matches!(
            trigger.on_gesture(Gesture::Drop, true),
            TriggerDecision::Send(_)
        ));
    }

    #[tokio::test]
    async fn test_drop_during_transfer_keeps_grab() {
        let temp_dir = TempDir::new().unwrap();
        let file = selected(&temp_dir).await;
        let mut trigger = GestureTrigger::new(Role::Sender);
        trigger.select_file(file.clone());

        trigger.on_gesture(Gesture::Grab, true);
        assert_eq!(trigger.on_gesture(Gesture::Drop, true), TriggerDecision::Send(file.clone()));
        assert!(trigger.is_sending());

        // grab and drop again while the first send is still running
        trigger.on_gesture(Gesture::Grab, true);
        assert_eq!(
            trigger.on_gesture(Gesture::Drop, true),
            TriggerDecision::Rejected(DropPrecondition::TransferInProgress)
        );
        assert!(trigger.is_holding());
        assert!(trigger.is_sending());

        trigger.transfer_finished();
        assert!(!trigger.is_sending());
        assert_eq!(trigger.on_gesture(Gesture::Drop, true), TriggerDecision::Send(file));
    }

    #[test]
    fn test_preconditions_checked_in_order() {
        let mut trigger = GestureTrigger::new(Role::Sender);
        // No file, not holding, channel closed: the file is reported first
        assert_eq!(
            trigger.on_gesture(Gesture::Drop, false),
            TriggerDecision::Rejected(DropPrecondition::NoFile)
        );
        trigger.on_gesture(Gesture::Grab, false);
        assert_eq!(
            trigger.on_gesture(Gesture::Drop, false),
            TriggerDecision::Rejected(DropPrecondition::NoFile)
        );
        assert!(trigger.is_holding());
    }

    #[test]
    fn test_open_and_push_only_update_display() {
        let mut trigger = GestureTrigger::new(Role::Sender);
        assert_eq!(trigger.on_gesture(Gesture::Push, true), TriggerDecision::Display);
        assert_eq!(trigger.state(), GestureState::Push);
        assert_eq!(trigger.on_gesture(Gesture::Open, true), TriggerDecision::Display);
        assert_eq!(trigger.state(), GestureState::Open);
        assert!(!trigger.is_holding());
    }

    #[tokio::test]
    async fn test_receiver_never_sends() {
        let temp_dir = TempDir::new().unwrap();
        let mut trigger = GestureTrigger::new(Role::Receiver);
        trigger.select_file(selected(&temp_dir).await);

        for gesture in [Gesture::Grab, Gesture::Drop, Gesture::Grab, Gesture::Drop] {
            assert_eq!(trigger.on_gesture(gesture, true), TriggerDecision::Ignored);
        }
        assert_eq!(trigger.state(), GestureState::Open);
        assert!(!trigger.is_holding());
    }
}
