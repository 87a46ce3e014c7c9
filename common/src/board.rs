use std::str::FromStr;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, PartialEq)]
pub enum BoardError {
    #[error("board needs at least 2x2 squares, got {0}x{1}")]
    TooSmall(u8, u8),

    #[error("marker length {marker} must be positive and shorter than square length {square}")]
    MarkerSize { marker: f64, square: f64 },

    #[error("board needs {needed} markers but {dictionary} only has {available}")]
    DictionaryTooSmall {
        dictionary: Dictionary,
        needed: usize,
        available: usize,
    },

    #[error("unknown dictionary `{0}`")]
    UnknownDictionary(String),

    #[error("unknown paper format `{0}`")]
    UnknownPaper(String),

    #[error("print size must be positive, got {0}x{1} px")]
    EmptyPrint(i32, i32),
}

/// The predefined ArUco dictionaries the tools accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dictionary {
    Dict4x4_50,
    Dict4x4_100,
    Dict4x4_250,
    Dict5x5_50,
    Dict5x5_100,
    Dict6x6_50,
    Dict6x6_100,
    Dict6x6_250,
}

impl Dictionary {
    const ALL: [(Dictionary, &'static str); 8] = [
        (Dictionary::Dict4x4_50, "DICT_4X4_50"),
        (Dictionary::Dict4x4_100, "DICT_4X4_100"),
        (Dictionary::Dict4x4_250, "DICT_4X4_250"),
        (Dictionary::Dict5x5_50, "DICT_5X5_50"),
        (Dictionary::Dict5x5_100, "DICT_5X5_100"),
        (Dictionary::Dict6x6_50, "DICT_6X6_50"),
        (Dictionary::Dict6x6_100, "DICT_6X6_100"),
        (Dictionary::Dict6x6_250, "DICT_6X6_250"),
    ];

    pub fn name(&self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(d, _)| d == self)
            .map(|(_, n)| *n)
            .unwrap_or("DICT_UNKNOWN")
    }

    pub fn size(&self) -> usize {
        use Dictionary::*;

        match self {
            Dict4x4_50 | Dict5x5_50 | Dict6x6_50 => 50,
            Dict4x4_100 | Dict5x5_100 | Dict6x6_100 => 100,
            Dict4x4_250 | Dict6x6_250 => 250,
        }
    }
}

impl std::fmt::Display for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dictionary {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .find(|(_, n)| *n == wanted)
            .map(|(d, _)| *d)
            .ok_or_else(|| BoardError::UnknownDictionary(s.to_string()))
    }
}

/// ChArUco board geometry, lengths in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardSpec {
    pub squares_x: u8,
    pub squares_y: u8,
    pub square_length: f64,
    pub marker_length: f64,
    pub dictionary: Dictionary,
}

impl BoardSpec {
    /// Markers sit on every other square.
    pub fn marker_count(&self) -> usize {
        (self.squares_x as usize * self.squares_y as usize) / 2
    }

    /// Inner chessboard corners.
    pub fn corner_count(&self) -> usize {
        (self.squares_x as usize - 1) * (self.squares_y as usize - 1)
    }

    pub fn validate(&self) -> Result<(), BoardError> {
        if self.squares_x < 2 || self.squares_y < 2 {
            return Err(BoardError::TooSmall(self.squares_x, self.squares_y));
        }

        if !(self.marker_length > 0. && self.marker_length < self.square_length) {
            return Err(BoardError::MarkerSize {
                marker: self.marker_length,
                square: self.square_length,
            });
        }

        if self.marker_count() > self.dictionary.size() {
            return Err(BoardError::DictionaryTooSmall {
                dictionary: self.dictionary,
                needed: self.marker_count(),
                available: self.dictionary.size(),
            });
        }

        Ok(())
    }
}

/// Paper sheet in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperFormat {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl PaperFormat {
    pub const A3: Self = Self::new(297., 420.);
    pub const A4: Self = Self::new(210., 297.);
    pub const LETTER: Self = Self::new(215.9, 279.4);

    pub const fn new(width_mm: f64, height_mm: f64) -> Self {
        Self {
            width_mm,
            height_mm,
        }
    }

    /// Truncated pixel size at `dpi`.
    pub fn pixels(&self, dpi: u32) -> (i32, i32) {
        let px = |mm: f64| (mm / 25.4 * dpi as f64) as i32;
        (px(self.width_mm), px(self.height_mm))
    }
}

impl FromStr for PaperFormat {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a3" => Ok(Self::A3),
            "a4" => Ok(Self::A4),
            "letter" => Ok(Self::LETTER),
            _ => Err(BoardError::UnknownPaper(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintLayout {
    pub paper: PaperFormat,
    pub dpi: u32,
    /// px
    pub margin: u16,
    pub border_bits: u8,
}

impl PrintLayout {
    pub fn size(&self) -> Result<(i32, i32), BoardError> {
        match self.paper.pixels(self.dpi) {
            (w, h) if w > 0 && h > 0 => Ok((w, h)),
            (w, h) => Err(BoardError::EmptyPrint(w, h)),
        }
    }
}
