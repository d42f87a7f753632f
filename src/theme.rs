//! Light chart theme shared by rendered charts and the HTML index.

/// Series colours, in the order they are assigned.
pub const COLOR_PALETTE: [&str; 6] = [
    "#2563eb", // blue
    "#059669", // emerald
    "#d97706", // amber
    "#dc2626", // red
    "#7c3aed", // violet
    "#0891b2", // cyan
];

pub const FONT_FAMILY: &str = "sans-serif";
pub const CSS_FONT_STACK: &str = "Noto Sans JP, Inter, sans-serif";
pub const TITLE_COLOR: &str = "#1a1a2e";
pub const TEXT_COLOR: &str = "#64748b";
pub const GRID_COLOR: &str = "#e2e8f0";
pub const TITLE_FONT_SIZE: u32 = 18;
pub const FONT_SIZE: u32 = 12;

/// Parse `#rrggbb`.
pub fn hex_to_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// Colour of the `index`-th series; the palette repeats.
pub fn series_color(index: usize) -> (u8, u8, u8) {
    hex_to_rgb(COLOR_PALETTE[index % COLOR_PALETTE.len()]).unwrap_or((0, 0, 0))
}

#[cfg(feature = "web")]
pub fn rgb(hex: &str) -> plotters::style::RGBColor {
    let (r, g, b) = hex_to_rgb(hex).unwrap_or((0, 0, 0));
    plotters::style::RGBColor(r, g, b)
}

#[cfg(feature = "web")]
pub fn series_rgb(index: usize) -> plotters::style::RGBColor {
    let (r, g, b) = series_color(index);
    plotters::style::RGBColor(r, g, b)
}
