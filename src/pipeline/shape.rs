use std::str::FromStr;

use anyhow::anyhow;

use crate::types::{Orientation, OutputShape};

/// Aspect convention of the camera preview on a platform family. Fixed per
/// build target, never changed at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    /// The preview keeps the nominal aspect in every orientation.
    PortraitBiased,
    /// The preview rotates with the device, so landscape needs the shape swapped.
    LandscapeBiased,
}

impl PlatformFamily {
    pub const ALL: [PlatformFamily; 2] = [
        PlatformFamily::PortraitBiased,
        PlatformFamily::LandscapeBiased,
    ];

    pub fn host() -> Self {
        if cfg!(any(target_os = "ios", target_os = "macos")) {
            PlatformFamily::LandscapeBiased
        } else {
            PlatformFamily::PortraitBiased
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PlatformFamily::PortraitBiased => "portrait",
            PlatformFamily::LandscapeBiased => "landscape",
        }
    }
}

impl FromStr for PlatformFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "portrait" | "portrait-biased" | "android" => Ok(PlatformFamily::PortraitBiased),
            "landscape" | "landscape-biased" | "ios" => Ok(PlatformFamily::LandscapeBiased),
            other => Err(anyhow!("unknown platform family '{other}'")),
        }
    }
}

/// Shape the frame source should resize the next frame to.
///
/// Landscape orientation on a landscape-biased platform swaps width and height
/// so the tensor keeps the preview's native aspect instead of stretching it.
pub fn resolve(
    orientation: Orientation,
    platform: PlatformFamily,
    nominal: OutputShape,
) -> OutputShape {
    if orientation.is_portrait() || platform == PlatformFamily::PortraitBiased {
        nominal
    } else {
        nominal.swapped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: OutputShape = OutputShape::new(224, 224);
    const WIDE: OutputShape = OutputShape::new(224, 160);

    #[test]
    fn portrait_on_portrait_platform_is_nominal() {
        assert_eq!(
            resolve(Orientation::PortraitUp, PlatformFamily::PortraitBiased, SQUARE),
            OutputShape::new(224, 224)
        );
    }

    #[test]
    fn landscape_on_landscape_platform_swaps() {
        assert_eq!(
            resolve(Orientation::LandscapeLeft, PlatformFamily::LandscapeBiased, SQUARE),
            SQUARE
        );
        assert_eq!(
            resolve(Orientation::LandscapeLeft, PlatformFamily::LandscapeBiased, WIDE),
            OutputShape::new(160, 224)
        );
        assert_eq!(
            resolve(Orientation::LandscapeRight, PlatformFamily::LandscapeBiased, WIDE),
            OutputShape::new(160, 224)
        );
    }

    #[test]
    fn portrait_platform_never_swaps() {
        for orientation in Orientation::ALL {
            assert_eq!(resolve(orientation, PlatformFamily::PortraitBiased, WIDE), WIDE);
        }
    }

    #[test]
    fn result_is_nominal_or_swapped_and_stable() {
        for orientation in Orientation::ALL {
            for platform in PlatformFamily::ALL {
                let first = resolve(orientation, platform, WIDE);
                assert!(first == WIDE || first == WIDE.swapped());
                assert_eq!(first.depth, 3);
                assert_eq!(resolve(orientation, platform, WIDE), first);
            }
        }
    }

    #[test]
    fn platform_parses_aliases() {
        assert_eq!("ios".parse::<PlatformFamily>().unwrap(), PlatformFamily::LandscapeBiased);
        assert_eq!("Portrait".parse::<PlatformFamily>().unwrap(), PlatformFamily::PortraitBiased);
        assert!("desktop".parse::<PlatformFamily>().is_err());
    }
}
