//! Character-driven lip-sync
//!
//! Each animation frame estimates which letter is being spoken from the
//! playback progress, looks up its mouth shape and eases the displayed shape
//! toward it. When the real audio amplitude is known it dominates the mouth
//! opening.

/// Weight of the new target when easing between frames
pub const SMOOTHING: f32 = 0.3;

/// Share of the mouth opening taken from audio amplitude
pub const AMPLITUDE_BLEND: f32 = 0.6;

/// Amplitude is scaled by this before blending
pub const AMPLITUDE_SCALE: f32 = 0.8;

/// Mouth shape: opening and width, both in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viseme {
    pub mouth_open: f32,
    pub mouth_width: f32,
}

impl Viseme {
    pub const fn new(mouth_open: f32, mouth_width: f32) -> Self {
        Self {
            mouth_open,
            mouth_width,
        }
    }

    pub const SILENCE: Viseme = Viseme::new(0.0, 0.5);
}

impl Default for Viseme {
    fn default() -> Self {
        Viseme::SILENCE
    }
}

/// Phoneme classes with a fixed mouth shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phoneme {
    Silence,
    Aa,
    Ae,
    Ah,
    Ao,
    Eh,
    Ih,
    Iy,
    Ow,
    Uh,
    Uw,
    B,
    M,
    P,
    F,
    V,
    Th,
    W,
    R,
    S,
    Sh,
    Ch,
    Other,
}

impl Phoneme {
    pub fn shape(&self) -> Viseme {
        match self {
            Phoneme::Silence => Viseme::SILENCE,
            Phoneme::Aa => Viseme::new(0.9, 0.6),
            Phoneme::Ae => Viseme::new(0.7, 0.7),
            Phoneme::Ah => Viseme::new(0.6, 0.5),
            Phoneme::Ao => Viseme::new(0.8, 0.4),
            Phoneme::Eh => Viseme::new(0.5, 0.7),
            Phoneme::Ih => Viseme::new(0.3, 0.6),
            Phoneme::Iy => Viseme::new(0.2, 0.8),
            Phoneme::Ow => Viseme::new(0.7, 0.3),
            Phoneme::Uh => Viseme::new(0.4, 0.4),
            Phoneme::Uw => Viseme::new(0.3, 0.2),
            Phoneme::B => Viseme::new(0.1, 0.5),
            Phoneme::M => Viseme::new(0.05, 0.5),
            Phoneme::P => Viseme::new(0.1, 0.5),
            Phoneme::F => Viseme::new(0.15, 0.6),
            Phoneme::V => Viseme::new(0.15, 0.6),
            Phoneme::Th => Viseme::new(0.2, 0.6),
            Phoneme::W => Viseme::new(0.3, 0.2),
            Phoneme::R => Viseme::new(0.35, 0.4),
            Phoneme::S => Viseme::new(0.15, 0.65),
            Phoneme::Sh => Viseme::new(0.25, 0.35),
            Phoneme::Ch => Viseme::new(0.3, 0.35),
            Phoneme::Other => Viseme::new(0.4, 0.5),
        }
    }

    /// Approximate phoneme for a written character
    pub fn of_char(c: char) -> Self {
        match c.to_ascii_lowercase() {
            'a' => Phoneme::Aa,
            'e' => Phoneme::Eh,
            'i' => Phoneme::Ih,
            'o' => Phoneme::Ow,
            'u' => Phoneme::Uh,
            'b' => Phoneme::B,
            'm' | 'n' => Phoneme::M,
            'p' => Phoneme::P,
            'f' => Phoneme::F,
            'v' => Phoneme::V,
            'w' => Phoneme::W,
            'r' | 'l' => Phoneme::R,
            's' | 'z' => Phoneme::S,
            'c' | 'j' | 'k' | 'g' => Phoneme::Ch,
            'd' | 't' => Phoneme::Th,
            c if c.is_ascii_alphabetic() => Phoneme::Other,
            _ => Phoneme::Silence,
        }
    }
}

/// One computed animation frame
#[derive(Debug, Clone, PartialEq)]
pub struct LipFrame {
    pub viseme: Viseme,
    pub current_word: String,
}

/// Per-playback lip-sync track
#[derive(Debug, Clone)]
pub struct LipSync {
    letters: Vec<char>,
    words: Vec<String>,
    last: Viseme,
}

impl LipSync {
    pub fn new(text: &str) -> Self {
        Self {
            letters: text
                .chars()
                .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace())
                .collect(),
            words: text.split(' ').map(str::to_string).collect(),
            last: Viseme::SILENCE,
        }
    }

    /// Compute the frame for `progress` in [0, 1]
    pub fn frame(&mut self, progress: f32, amplitude: Option<f32>) -> LipFrame {
        let progress = progress.clamp(0.0, 1.0);

        let target = pick(&self.letters, progress)
            .map(|c| Phoneme::of_char(*c))
            .unwrap_or(Phoneme::Silence)
            .shape();

        let eased_open = self.last.mouth_open + (target.mouth_open - self.last.mouth_open) * SMOOTHING;
        let eased_width =
            self.last.mouth_width + (target.mouth_width - self.last.mouth_width) * SMOOTHING;

        let open = match amplitude {
            Some(amp) => {
                eased_open * (1.0 - AMPLITUDE_BLEND) + amp.clamp(0.0, 1.0) * AMPLITUDE_SCALE * AMPLITUDE_BLEND
            }
            None => eased_open,
        };

        self.last = Viseme::new(open, eased_width);

        LipFrame {
            viseme: Viseme::new(open.clamp(0.0, 1.0), eased_width.clamp(0.2, 1.0)),
            current_word: pick(&self.words, progress).cloned().unwrap_or_default(),
        }
    }

    /// Close the mouth, as when playback ends
    pub fn reset(&mut self) {
        self.last = Viseme::SILENCE;
    }
}

fn pick<T>(items: &[T], progress: f32) -> Option<&T> {
    if items.is_empty() {
        return None;
    }
    let index = ((progress * items.len() as f32).floor() as usize).min(items.len() - 1);
    items.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_char_table() {
        assert_eq!(Phoneme::of_char('A'), Phoneme::Aa);
        assert_eq!(Phoneme::of_char('n'), Phoneme::M);
        assert_eq!(Phoneme::of_char('x'), Phoneme::Other);
        assert_eq!(Phoneme::of_char(' '), Phoneme::Silence);
        assert_eq!(Phoneme::of_char('7'), Phoneme::Silence);
    }

    #[test]
    fn test_frames_ease_toward_target() {
        let mut sync = LipSync::new("aaaa");
        let first = sync.frame(0.1, None);
        // 0 + (0.9 - 0) * 0.3
        assert!(close(first.viseme.mouth_open, 0.27));
        // 0.5 + (0.6 - 0.5) * 0.3
        assert!(close(first.viseme.mouth_width, 0.53));

        let second = sync.frame(0.2, None);
        assert!(close(second.viseme.mouth_open, 0.27 + (0.9 - 0.27) * 0.3));
    }

    #[test]
    fn test_amplitude_blend() {
        let mut sync = LipSync::new("aaaa");
        let frame = sync.frame(0.1, Some(1.0));
        // 0.4 * 0.27 + 0.6 * 0.8
        assert!(close(frame.viseme.mouth_open, 0.4 * 0.27 + 0.48));
    }

    #[test]
    fn test_width_clamped() {
        let mut sync = LipSync::new("wwwwwwww");
        let mut frame = sync.frame(0.0, None);
        for _ in 0..50 {
            frame = sync.frame(0.5, None);
        }
        // Table width for 'w' is 0.2, the floor
        assert!(frame.viseme.mouth_width >= 0.2);
        assert!(close(frame.viseme.mouth_width, 0.2));
    }

    #[test]
    fn test_current_word_tracks_progress() {
        let mut sync = LipSync::new("The price is high");
        assert_eq!(sync.frame(0.0, None).current_word, "The");
        assert_eq!(sync.frame(0.3, None).current_word, "price");
        assert_eq!(sync.frame(1.0, None).current_word, "high");
    }

    #[test]
    fn test_empty_text_stays_closed() {
        let mut sync = LipSync::new("");
        let frame = sync.frame(0.5, None);
        assert_eq!(frame.viseme.mouth_open, 0.0);
        assert_eq!(frame.current_word, "");
    }
}
