use std::{fmt, str::FromStr, time::Duration, time::Instant};

use anyhow::anyhow;

/// Channel depth of every frame handed to the inference engine (RGB).
pub const FRAME_DEPTH: u32 = 3;

/// Shortest cycle we are willing to divide by when deriving a frame rate.
pub const MIN_CYCLE_ELAPSED: Duration = Duration::from_micros(100);

/// A single RGB camera buffer. Owned by the frame loop between `next_frame`
/// and `release`.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn shape(&self) -> OutputShape {
        OutputShape::new(self.width, self.height)
    }
}

/// Size of the buffer the frame source should produce for the next cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputShape {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl OutputShape {
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: FRAME_DEPTH,
        }
    }

    pub const fn swapped(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
            depth: self.depth,
        }
    }

    /// Number of bytes a frame of this shape occupies.
    pub fn byte_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.depth as usize)
    }
}

impl fmt::Display for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Orientation {
    PortraitUp,
    PortraitDown,
    LandscapeLeft,
    LandscapeRight,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::PortraitUp,
        Orientation::PortraitDown,
        Orientation::LandscapeLeft,
        Orientation::LandscapeRight,
    ];

    pub fn is_portrait(self) -> bool {
        matches!(self, Orientation::PortraitUp | Orientation::PortraitDown)
    }

    pub fn label(self) -> &'static str {
        match self {
            Orientation::PortraitUp => "portrait-up",
            Orientation::PortraitDown => "portrait-down",
            Orientation::LandscapeLeft => "landscape-left",
            Orientation::LandscapeRight => "landscape-right",
        }
    }

    pub(crate) fn to_bits(self) -> u8 {
        match self {
            Orientation::PortraitUp => 0,
            Orientation::PortraitDown => 1,
            Orientation::LandscapeLeft => 2,
            Orientation::LandscapeRight => 3,
        }
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Orientation::PortraitDown,
            2 => Orientation::LandscapeLeft,
            3 => Orientation::LandscapeRight,
            _ => Orientation::PortraitUp,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Orientation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Orientation::ALL
            .into_iter()
            .find(|o| o.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("unknown orientation '{s}'"))
    }
}

/// Flattened output of one inference call. Shared read-only with the metrics
/// sink and replaced wholesale by the next successful cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceResult {
    pub values: Vec<f32>,
    pub shape: Vec<usize>,
}

impl InferenceResult {
    pub fn new(values: Vec<f32>, shape: Vec<usize>) -> Self {
        Self { values, shape }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Instantaneous frame rate of the last cycle. No smoothing.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct FpsSample(f64);

impl FpsSample {
    pub fn from_elapsed(elapsed: Duration) -> Self {
        let elapsed_ms = elapsed.max(MIN_CYCLE_ELAPSED).as_secs_f64() * 1000.0;
        FpsSample(1000.0 / elapsed_ms)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Whole frames per second, rounded down for display.
    pub fn whole(self) -> u32 {
        self.0.floor() as u32
    }
}

impl fmt::Display for FpsSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_is_inverse_of_elapsed_millis() {
        let fps = FpsSample::from_elapsed(Duration::from_millis(20));
        assert!((fps.value() - 50.0).abs() < 1e-9);
        assert_eq!(fps.whole(), 50);
    }

    #[test]
    fn fps_whole_rounds_down() {
        let fps = FpsSample::from_elapsed(Duration::from_millis(30));
        assert_eq!(fps.whole(), 33);
    }

    #[test]
    fn zero_elapsed_is_clamped() {
        let fps = FpsSample::from_elapsed(Duration::ZERO);
        assert!(fps.value().is_finite());
        assert_eq!(fps, FpsSample::from_elapsed(MIN_CYCLE_ELAPSED));
    }

    #[test]
    fn orientation_parses_labels() {
        for orientation in Orientation::ALL {
            assert_eq!(orientation.label().parse::<Orientation>().unwrap(), orientation);
            assert_eq!(Orientation::from_bits(orientation.to_bits()), orientation);
        }
        assert!("sideways".parse::<Orientation>().is_err());
    }

    #[test]
    fn shape_byte_len_counts_depth() {
        assert_eq!(OutputShape::new(4, 2).byte_len(), 24);
        assert_eq!(OutputShape::new(4, 2).swapped(), OutputShape::new(2, 4));
    }
}
