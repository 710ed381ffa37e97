//! HID and media command vocabulary.

use companion_core::Value;

/// Physical-button intents with their stable HID codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidButton {
    Up,
    Down,
    Left,
    Right,
    Menu,
    Select,
    Home,
    VolumeUp,
    VolumeDown,
    Siri,
    Screensaver,
    Sleep,
    Wake,
    PlayPause,
    ChannelIncrement,
    ChannelDecrement,
    Guide,
    PageUp,
    PageDown,
}

impl HidButton {
    /// Wire code carried in `_hidC`.
    pub fn code(&self) -> i64 {
        match self {
            Self::Up => 1,
            Self::Down => 2,
            Self::Left => 3,
            Self::Right => 4,
            Self::Menu => 5,
            Self::Select => 6,
            Self::Home => 7,
            Self::VolumeUp => 8,
            Self::VolumeDown => 9,
            Self::Siri => 10,
            Self::Screensaver => 11,
            Self::Sleep => 12,
            Self::Wake => 13,
            Self::PlayPause => 14,
            Self::ChannelIncrement => 15,
            Self::ChannelDecrement => 16,
            Self::Guide => 17,
            Self::PageUp => 18,
            Self::PageDown => 19,
        }
    }
}

/// How a button press is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    /// Press, 50 ms, release.
    Tap,
    /// Two taps separated by 100 ms.
    DoubleTap,
    /// Press, 1 s dwell, release.
    Hold,
}

/// Media-control commands with their stable `_mcc` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCommand {
    Play,
    Pause,
    NextTrack,
    PreviousTrack,
    GetVolume,
    SetVolume,
    SkipBy,
    FastForwardBegin,
    FastForwardEnd,
    RewindBegin,
    RewindEnd,
    GetCaptionSettings,
    SetCaptionSettings,
}

impl MediaCommand {
    /// Wire code carried in `_mcc`.
    pub fn code(&self) -> i64 {
        match self {
            Self::Play => 1,
            Self::Pause => 2,
            Self::NextTrack => 3,
            Self::PreviousTrack => 4,
            Self::GetVolume => 5,
            Self::SetVolume => 6,
            Self::SkipBy => 7,
            Self::FastForwardBegin => 8,
            Self::FastForwardEnd => 9,
            Self::RewindBegin => 10,
            Self::RewindEnd => 11,
            Self::GetCaptionSettings => 12,
            Self::SetCaptionSettings => 13,
        }
    }
}

/// Payload for one half of a button press.
pub(crate) fn button_payload(button: HidButton, pressed: bool) -> Value {
    Value::dict([
        ("_hBtS", Value::Int(if pressed { 1 } else { 0 })),
        ("_hidC", Value::Int(button.code())),
    ])
}

/// Payload for a media-control request.
pub(crate) fn media_payload(
    command: MediaCommand,
    params: impl IntoIterator<Item = (String, Value)>,
) -> Value {
    let mut entries: std::collections::BTreeMap<String, Value> =
        params.into_iter().collect();
    entries.insert("_mcc".to_string(), Value::Int(command.code()));
    Value::Dict(entries)
}
