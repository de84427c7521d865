//! Hotkey interception
//!
//! Session chords (new task, cycle focus, close focused) are recognized
//! here before an event reaches the router. Modifier state is tracked
//! across events so hosts that report modifier keys separately still work.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, ModifierKeyCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HotkeyConfig;
use crate::core::event::Event;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

impl Modifiers {
    fn from_modifier_key(key: ModifierKeyCode) -> Option<Self> {
        match key {
            ModifierKeyCode::LeftShift | ModifierKeyCode::RightShift => Some(Modifiers::SHIFT),
            ModifierKeyCode::LeftControl | ModifierKeyCode::RightControl => Some(Modifiers::CTRL),
            ModifierKeyCode::LeftAlt | ModifierKeyCode::RightAlt => Some(Modifiers::ALT),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChordError {
    #[error("Empty chord")]
    Empty,

    #[error("Unknown modifier: {0}")]
    UnknownModifier(String),

    #[error("Unknown key: {0}")]
    UnknownKey(String),
}

/// A modifier set plus one key, written like `ctrl+t` or `alt+shift+left`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chord {
    pub modifiers: Modifiers,
    pub code: KeyCode,
}

impl Chord {
    pub fn new(modifiers: Modifiers, code: KeyCode) -> Self {
        Self {
            modifiers,
            code: normalize(code),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ChordError> {
        let parts: Vec<String> = text
            .split('+')
            .map(|p| p.trim().to_lowercase())
            .collect();
        let Some((key, mods)) = parts.split_last() else {
            return Err(ChordError::Empty);
        };
        if key.is_empty() {
            return Err(ChordError::Empty);
        }

        let mut modifiers = Modifiers::empty();
        for m in mods {
            modifiers |= match m.as_str() {
                "ctrl" | "control" => Modifiers::CTRL,
                "alt" | "meta" => Modifiers::ALT,
                "shift" => Modifiers::SHIFT,
                other => return Err(ChordError::UnknownModifier(other.to_string())),
            };
        }

        Ok(Self::new(modifiers, parse_key(key)?))
    }

    /// Whether a key press with `held` modifiers triggers this chord
    pub fn matches(&self, held: Modifiers, code: KeyCode) -> bool {
        self.modifiers == held && self.code == normalize(code)
    }
}

fn parse_key(key: &str) -> Result<KeyCode, ChordError> {
    let code = match key {
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "esc" | "escape" => KeyCode::Esc,
        "backspace" => KeyCode::Backspace,
        "delete" | "del" => KeyCode::Delete,
        "insert" | "ins" => KeyCode::Insert,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "pageup" => KeyCode::PageUp,
        "pagedown" => KeyCode::PageDown,
        "space" => KeyCode::Char(' '),
        _ => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                (Some('f'), Some(_)) => key[1..]
                    .parse::<u8>()
                    .ok()
                    .filter(|n| (1..=12).contains(n))
                    .map(KeyCode::F)
                    .ok_or_else(|| ChordError::UnknownKey(key.to_string()))?,
                _ => return Err(ChordError::UnknownKey(key.to_string())),
            }
        }
    };
    Ok(code)
}

/// Letters compare case-insensitively; shift is a modifier, not a case
fn normalize(code: KeyCode) -> KeyCode {
    match code {
        KeyCode::Char(c) => KeyCode::Char(c.to_ascii_lowercase()),
        other => other,
    }
}

/// Session-level actions bound to chords
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HotkeyAction {
    NewTask,
    FocusNext,
    FocusPrev,
    CloseFocused,
}

/// Outcome of offering one event to the interceptor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intercept {
    /// Not a session chord; route it to tasks
    Pass,
    /// Swallowed without an action (release of a chord key)
    Consumed,
    /// A chord was pressed
    Action(HotkeyAction),
}

pub struct HotkeyInterceptor {
    bindings: Vec<(Chord, HotkeyAction)>,
    /// Modifiers reported as separate key events
    held: Modifiers,
    /// Chord keys whose release must not leak to tasks
    swallowed: Vec<KeyCode>,
}

impl Default for HotkeyInterceptor {
    fn default() -> Self {
        Self::new(vec![
            (Chord::new(Modifiers::CTRL, KeyCode::Char('t')), HotkeyAction::NewTask),
            (Chord::new(Modifiers::CTRL, KeyCode::Right), HotkeyAction::FocusNext),
            (Chord::new(Modifiers::CTRL, KeyCode::Left), HotkeyAction::FocusPrev),
            (Chord::new(Modifiers::CTRL, KeyCode::Char('w')), HotkeyAction::CloseFocused),
        ])
    }
}

impl HotkeyInterceptor {
    pub fn new(bindings: Vec<(Chord, HotkeyAction)>) -> Self {
        Self {
            bindings,
            held: Modifiers::empty(),
            swallowed: Vec::new(),
        }
    }

    /// Build from configuration, keeping the default for any chord that
    /// fails to parse
    pub fn from_config(config: &HotkeyConfig) -> Self {
        let defaults = Self::default();
        let bindings = defaults
            .bindings
            .iter()
            .map(|(fallback, action)| {
                let text = match action {
                    HotkeyAction::NewTask => &config.new_task,
                    HotkeyAction::FocusNext => &config.focus_next,
                    HotkeyAction::FocusPrev => &config.focus_prev,
                    HotkeyAction::CloseFocused => &config.close_focused,
                };
                let chord = Chord::parse(text).unwrap_or_else(|e| {
                    warn!("Invalid hotkey {:?} for {:?}: {}", text, action, e);
                    fallback.clone()
                });
                (chord, *action)
            })
            .collect();
        Self::new(bindings)
    }

    pub fn bindings(&self) -> &[(Chord, HotkeyAction)] {
        &self.bindings
    }

    pub fn intercept(&mut self, event: &Event) -> Intercept {
        let Event::Key(key) = event else {
            return Intercept::Pass;
        };

        if let KeyCode::Modifier(modifier) = key.code {
            if let Some(flag) = Modifiers::from_modifier_key(modifier) {
                if key.kind == KeyEventKind::Release {
                    self.held.remove(flag);
                } else {
                    self.held.insert(flag);
                }
            }
            return Intercept::Pass;
        }

        let code = normalize(key.code);
        if key.kind == KeyEventKind::Release {
            return match self.swallowed.iter().position(|&c| c == code) {
                Some(pos) => {
                    self.swallowed.remove(pos);
                    Intercept::Consumed
                }
                None => Intercept::Pass,
            };
        }

        match self.lookup(key) {
            Some(action) => {
                if !self.swallowed.contains(&code) {
                    self.swallowed.push(code);
                }
                debug!("Hotkey {:?}", action);
                Intercept::Action(action)
            }
            None => Intercept::Pass,
        }
    }

    fn lookup(&self, key: &KeyEvent) -> Option<HotkeyAction> {
        let held = self.held | Modifiers::from(key.modifiers);
        self.bindings
            .iter()
            .find(|(chord, _)| chord.matches(held, key.code))
            .map(|(_, action)| *action)
    }
}
