//! Target device descriptors: cell geometry, grid size and palette.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::color::Color;
use crate::ParseNameError;

/// Supported display targets. Every variant shows two colors per
/// character cell (background and foreground).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    OcTier1,
    OcTier2,
    #[default]
    OcTier3,
    Cc,
    CcPaletted,
    Zxspectrum,
    ZxspectrumDark,
}

/// ComputerCraft terminal colors, white through black.
const CC_COLORS: [u32; 16] = [
    0xf0f0f0, 0xf2b233, 0xe57fd8, 0x99b2f2, 0xdede6c, 0x7fcc19, 0xf2b2cc, 0x4c4c4c,
    0x999999, 0x4c99b2, 0xb266e5, 0x3366cc, 0x7f664c, 0x57a64e, 0xcc4c4c, 0x111111,
];

impl Platform {
    pub const ALL: [Platform; 7] = [
        Self::OcTier1,
        Self::OcTier2,
        Self::OcTier3,
        Self::Cc,
        Self::CcPaletted,
        Self::Zxspectrum,
        Self::ZxspectrumDark,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::OcTier1 => "oc-tier1",
            Self::OcTier2 => "oc-tier2",
            Self::OcTier3 => "oc-tier3",
            Self::Cc => "cc",
            Self::CcPaletted => "cc-paletted",
            Self::Zxspectrum => "zxspectrum",
            Self::ZxspectrumDark => "zxspectrum-dark",
        }
    }

    /// Platform family id written to the CTIF header.
    pub fn id(self) -> u16 {
        match self {
            Self::OcTier1 | Self::OcTier2 | Self::OcTier3 => 1,
            Self::Cc | Self::CcPaletted => 2,
            Self::Zxspectrum | Self::ZxspectrumDark => 3,
        }
    }

    /// Variant within the platform family.
    pub fn variant(self) -> u8 {
        match self {
            Self::OcTier1 | Self::Cc | Self::Zxspectrum => 0,
            Self::OcTier2 | Self::CcPaletted | Self::ZxspectrumDark => 1,
            Self::OcTier3 => 2,
        }
    }

    pub fn char_width(self) -> u32 {
        match self {
            Self::OcTier1 | Self::OcTier2 | Self::OcTier3 => 2,
            Self::Cc | Self::CcPaletted => 2,
            Self::Zxspectrum | Self::ZxspectrumDark => 8,
        }
    }

    pub fn char_height(self) -> u32 {
        match self {
            Self::OcTier1 | Self::OcTier2 | Self::OcTier3 => 4,
            Self::Cc | Self::CcPaletted => 3,
            Self::Zxspectrum | Self::ZxspectrumDark => 8,
        }
    }

    pub fn width_chars(self) -> u32 {
        match self {
            Self::OcTier1 => 50,
            Self::OcTier2 => 80,
            Self::OcTier3 => 160,
            Self::Cc | Self::CcPaletted => 51,
            Self::Zxspectrum | Self::ZxspectrumDark => 32,
        }
    }

    pub fn height_chars(self) -> u32 {
        match self {
            Self::OcTier1 => 16,
            Self::OcTier2 => 25,
            Self::OcTier3 => 50,
            Self::Cc | Self::CcPaletted => 19,
            Self::Zxspectrum | Self::ZxspectrumDark => 24,
        }
    }

    pub fn width_px(self) -> u32 {
        self.width_chars() * self.char_width()
    }

    pub fn height_px(self) -> u32 {
        self.height_chars() * self.char_height()
    }

    /// Total pixel budget of the screen.
    pub fn chars_px(self) -> u32 {
        self.width_chars() * self.height_chars() * self.char_width() * self.char_height()
    }

    /// Number of leading palette slots that may be redefined.
    pub fn custom_color_count(self) -> usize {
        match self {
            Self::OcTier2 | Self::OcTier3 | Self::CcPaletted => 16,
            _ => 0,
        }
    }

    /// The device's built-in colors. Never shorter than
    /// [`Platform::custom_color_count`].
    pub fn base_palette(self) -> Vec<Color> {
        match self {
            Self::OcTier1 => vec![Color::new(0, 0, 0), Color::new(255, 255, 255)],
            Self::OcTier2 => oc_greys().collect(),
            Self::OcTier3 => oc_greys()
                .chain((0..240u32).map(|i| {
                    Color::new(
                        ((i / 40) % 6 * 255 / 5) as u8,
                        ((i / 5) % 8 * 255 / 7) as u8,
                        (i % 5 * 255 / 4) as u8,
                    )
                }))
                .collect(),
            Self::Cc | Self::CcPaletted => CC_COLORS.iter().map(|&c| Color::from_rgb24(c)).collect(),
            Self::Zxspectrum => zx_colors(0xd7).chain(zx_colors(0xff)).collect(),
            Self::ZxspectrumDark => zx_colors(0xd7).collect(),
        }
    }

    /// Whether two palette entries may share a cell. The ZX Spectrum
    /// BRIGHT attribute applies to both colors of a cell.
    pub fn allows_pair(self, a: usize, b: usize) -> bool {
        match self {
            Self::Zxspectrum => (a < 8) == (b < 8),
            _ => true,
        }
    }

    /// The entry closest to `index` that may share a cell with `partner`.
    pub fn pair_equivalent(self, index: usize, partner: usize) -> usize {
        match self {
            Self::Zxspectrum => index % 8 + partner / 8 * 8,
            _ => index,
        }
    }
}

fn oc_greys() -> impl Iterator<Item = Color> {
    (0..16u8).map(|i| Color::new(17 * i, 17 * i, 17 * i))
}

/// ZX Spectrum order: black, blue, red, magenta, green, cyan, yellow, white.
fn zx_colors(level: u8) -> impl Iterator<Item = Color> {
    (0..8u8).map(move |i| {
        let on = |bit: u8| if i & bit != 0 { level } else { 0 };
        Color::new(on(2), on(4), on(1))
    })
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or(ParseNameError { kind: "platform", name: s })
    }
}
