//! `colors` subcommand — list the named colors effects accept.

use super::led::color::{DEFAULT_COLOR, NamedColor};
use super::{ColorJson, Result, kv, kv_width, led, print_json};

pub(super) fn cmd_colors(json: bool) -> Result<()> {
    if json {
        let colors: Vec<ColorJson> = NamedColor::ALL
            .iter()
            .map(|c| {
                let rgb = c.rgb();
                ColorJson {
                    name: c.name(),
                    rgb: [rgb.r, rgb.g, rgb.b],
                    hex: led::format_hex(rgb),
                    default: *c == DEFAULT_COLOR,
                }
            })
            .collect();
        return print_json(&colors);
    }

    let names: Vec<String> = NamedColor::ALL
        .iter()
        .map(|c| format!("{}:", c.name()))
        .collect();
    let keys: Vec<&str> = names.iter().map(String::as_str).collect();
    let w = kv_width(&keys, &[]);
    for (c, key) in NamedColor::ALL.iter().zip(&keys) {
        let rgb = c.rgb();
        let suffix = if *c == DEFAULT_COLOR { "  (default)" } else { "" };
        kv(
            key,
            format_args!("{}  ({}, {}, {}){suffix}", led::format_hex(rgb), rgb.r, rgb.g, rgb.b),
            w,
        );
    }
    println!();
    println!("Unknown names fall back to {}.", DEFAULT_COLOR.name());
    Ok(())
}
