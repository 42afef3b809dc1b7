//! Named color palette for the sign.
//!
//! Effect requests name their color (`"red"`, `"purple"`, ...). Lookup is
//! case-insensitive and never fails: unknown names fall back to blue.

use rgb::RGB8;
use serde::Serialize;

pub const RED: RGB8 = RGB8 { r: 255, g: 0, b: 0 };
pub const GREEN: RGB8 = RGB8 { r: 0, g: 255, b: 0 };
pub const BLUE: RGB8 = RGB8 { r: 0, g: 0, b: 255 };
pub const YELLOW: RGB8 = RGB8 { r: 255, g: 255, b: 0 };
pub const PURPLE: RGB8 = RGB8 { r: 128, g: 0, b: 128 };
pub const CYAN: RGB8 = RGB8 { r: 0, g: 255, b: 255 };
pub const WHITE: RGB8 = RGB8 { r: 255, g: 255, b: 255 };
pub const OFF: RGB8 = RGB8 { r: 0, g: 0, b: 0 };

/// A color from the sign's fixed palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NamedColor {
    Red,
    Green,
    Blue,
    Yellow,
    Purple,
    Cyan,
    White,
    Off,
}

/// Color used when a request names no color or an unknown one.
pub const DEFAULT_COLOR: NamedColor = NamedColor::Blue;

impl NamedColor {
    pub const ALL: [NamedColor; 8] = [
        NamedColor::Red,
        NamedColor::Green,
        NamedColor::Blue,
        NamedColor::Yellow,
        NamedColor::Purple,
        NamedColor::Cyan,
        NamedColor::White,
        NamedColor::Off,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NamedColor::Red => "red",
            NamedColor::Green => "green",
            NamedColor::Blue => "blue",
            NamedColor::Yellow => "yellow",
            NamedColor::Purple => "purple",
            NamedColor::Cyan => "cyan",
            NamedColor::White => "white",
            NamedColor::Off => "off",
        }
    }

    pub fn rgb(self) -> RGB8 {
        match self {
            NamedColor::Red => RED,
            NamedColor::Green => GREEN,
            NamedColor::Blue => BLUE,
            NamedColor::Yellow => YELLOW,
            NamedColor::Purple => PURPLE,
            NamedColor::Cyan => CYAN,
            NamedColor::White => WHITE,
            NamedColor::Off => OFF,
        }
    }
}

/// Look up a palette entry by name (case-insensitive, surrounding whitespace ignored).
pub fn parse_named(name: &str) -> Option<NamedColor> {
    let name = name.trim().to_lowercase();
    NamedColor::ALL.into_iter().find(|c| c.name() == name)
}

/// Resolve a color name to RGB, falling back to [`DEFAULT_COLOR`].
pub fn resolve(name: &str) -> RGB8 {
    parse_named(name).unwrap_or(DEFAULT_COLOR).rgb()
}

/// Format a color as `#RRGGBB`.
pub fn format_hex(c: RGB8) -> String {
    format!("#{:02X}{:02X}{:02X}", c.r, c.g, c.b)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_named ──

    #[test]
    fn parse_every_palette_name() {
        for color in NamedColor::ALL {
            assert_eq!(parse_named(color.name()), Some(color));
        }
    }

    #[test]
    fn parse_case_insensitive() {
        assert_eq!(parse_named("RED"), Some(NamedColor::Red));
        assert_eq!(parse_named("Purple"), Some(NamedColor::Purple));
        assert_eq!(parse_named("  cyan  "), Some(NamedColor::Cyan));
    }

    #[test]
    fn parse_unknown_is_none() {
        assert_eq!(parse_named("chartreuse"), None);
        assert_eq!(parse_named(""), None);
        assert_eq!(parse_named("#FF0000"), None);
    }

    // ── resolve ──

    #[test]
    fn resolve_known_colors() {
        assert_eq!(resolve("red"), RGB8::new(255, 0, 0));
        assert_eq!(resolve("purple"), RGB8::new(128, 0, 128));
        assert_eq!(resolve("off"), RGB8::new(0, 0, 0));
    }

    #[test]
    fn resolve_unknown_falls_back_to_blue() {
        assert_eq!(resolve("octarine"), BLUE);
        assert_eq!(resolve(""), BLUE);
    }

    // ── format_hex ──

    #[test]
    fn format_palette() {
        assert_eq!(format_hex(RED), "#FF0000");
        assert_eq!(format_hex(PURPLE), "#800080");
        assert_eq!(format_hex(OFF), "#000000");
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&NamedColor::Yellow).unwrap();
        assert_eq!(json, "\"yellow\"");
    }
}
