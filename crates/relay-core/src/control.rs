use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFlag {
    Forward,
    Backward,
    Left,
    Right,
    Jump,
}

impl ControlFlag {
    pub const ALL: [ControlFlag; 5] = [
        ControlFlag::Forward,
        ControlFlag::Backward,
        ControlFlag::Left,
        ControlFlag::Right,
        ControlFlag::Jump,
    ];

    /// Maps a DOM-style physical key code (`KeyW`, `ArrowUp`, `Space`, ...).
    pub fn from_key_code(code: &str) -> Option<Self> {
        match code {
            "KeyW" | "ArrowUp" => Some(ControlFlag::Forward),
            "KeyS" | "ArrowDown" => Some(ControlFlag::Backward),
            "KeyA" | "ArrowLeft" => Some(ControlFlag::Left),
            "KeyD" | "ArrowRight" => Some(ControlFlag::Right),
            "Space" => Some(ControlFlag::Jump),
            _ => None,
        }
    }
}

/// Full control snapshot. Always serialized whole so the receiver never has to
/// merge partial updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
}

/// Result of applying one physical transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// The flag flipped; the snapshot must be sent.
    Changed,
    /// Release of a flag that was already released. Still sent.
    Reasserted,
    /// Press of a flag that was already pressed (key repeat). Nothing to send.
    Ignored,
}

impl EdgeOutcome {
    pub fn should_send(self) -> bool {
        !matches!(self, EdgeOutcome::Ignored)
    }
}

impl ControlState {
    pub fn get(&self, flag: ControlFlag) -> bool {
        match flag {
            ControlFlag::Forward => self.forward,
            ControlFlag::Backward => self.backward,
            ControlFlag::Left => self.left,
            ControlFlag::Right => self.right,
            ControlFlag::Jump => self.jump,
        }
    }

    fn slot_mut(&mut self, flag: ControlFlag) -> &mut bool {
        match flag {
            ControlFlag::Forward => &mut self.forward,
            ControlFlag::Backward => &mut self.backward,
            ControlFlag::Left => &mut self.left,
            ControlFlag::Right => &mut self.right,
            ControlFlag::Jump => &mut self.jump,
        }
    }

    pub fn apply_edge(&mut self, flag: ControlFlag, pressed: bool) -> EdgeOutcome {
        let slot = self.slot_mut(flag);
        match (pressed, *slot) {
            (true, true) => EdgeOutcome::Ignored,
            (true, false) => {
                *slot = true;
                EdgeOutcome::Changed
            }
            (false, true) => {
                *slot = false;
                EdgeOutcome::Changed
            }
            (false, false) => EdgeOutcome::Reasserted,
        }
    }

    pub fn any_pressed(&self) -> bool {
        ControlFlag::ALL.iter().any(|flag| self.get(*flag))
    }

    pub fn pressed(&self) -> impl Iterator<Item = ControlFlag> + '_ {
        ControlFlag::ALL
            .into_iter()
            .filter(move |flag| self.get(*flag))
    }
}
