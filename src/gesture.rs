use serde::Serialize;

/// Classified button interaction.
/// Idle -> PressedShort -> ReleasedShort -> Idle
/// Idle -> PressedShort -> PressedLong -> ReleasedLong -> Idle
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gesture {
    #[default]
    Idle,
    /// Held, shorter than the long press threshold so far.
    PressedShort,
    /// Held past the long press threshold.
    PressedLong,
    /// Released while still short. Lasts a single sample.
    ReleasedShort,
    /// Released after the threshold was crossed. Lasts a single sample.
    ReleasedLong,
}

impl Gesture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gesture::Idle => "IDLE",
            Gesture::PressedShort => "PRESSED_SHORT",
            Gesture::PressedLong => "PRESSED_LONG",
            Gesture::ReleasedShort => "RELEASED_SHORT",
            Gesture::ReleasedLong => "RELEASED_LONG",
        }
    }
}

/// Turns a sampled digital input into gestures using edge detection and the
/// held duration. Callers must sample often (every loop iteration); there is
/// no debounce timer here.
#[derive(Debug)]
pub struct GestureClassifier {
    long_press_ms: u64,
    last_pressed: bool,
    press_start: u64,
    last_gesture: Gesture,
}

impl GestureClassifier {
    pub fn new(long_press_ms: u64) -> Self {
        Self {
            long_press_ms,
            last_pressed: false,
            press_start: 0,
            last_gesture: Gesture::Idle,
        }
    }

    pub fn set_long_press(&mut self, long_press_ms: u64) {
        self.long_press_ms = long_press_ms;
    }

    pub fn gesture(&self) -> Gesture {
        self.last_gesture
    }

    /// Take one sample. Returns the gesture and whether it differs from the
    /// previous sample's gesture.
    pub fn sample(&mut self, pressed: bool, now: u64) -> (Gesture, bool) {
        if pressed && !self.last_pressed {
            self.press_start = now;
        }

        let gesture = if pressed {
            if now.saturating_sub(self.press_start) > self.long_press_ms {
                Gesture::PressedLong
            } else {
                Gesture::PressedShort
            }
        } else if self.last_pressed {
            // Classify by what was observed while held.
            if self.last_gesture == Gesture::PressedShort {
                Gesture::ReleasedShort
            } else {
                Gesture::ReleasedLong
            }
        } else {
            Gesture::Idle
        };

        self.last_pressed = pressed;
        let changed = gesture != self.last_gesture;
        self.last_gesture = gesture;
        (gesture, changed)
    }
}
