//! Natural advance widths for the standard-14 Helvetica font.
//!
//! The overlay draws with the base Helvetica font and no embedded font
//! program, so every viewer uses these AFM widths. Measuring with the same
//! table is what lets the horizontal scale stretch a word to its box
//! exactly.

/// Glyph widths (1/1000 em) for ASCII 0x20..=0x7E.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

/// Width used for characters outside the ASCII table.
const FALLBACK_WIDTH: u16 = 556;

/// Width of a single character in 1/1000 em.
pub fn helvetica_char_width(c: char) -> u16 {
    match c as u32 {
        code @ 0x20..=0x7E => HELVETICA_ASCII[(code - 0x20) as usize],
        // no-break space
        0xA0 => 278,
        _ => win_ansi_punctuation_width(c).unwrap_or(FALLBACK_WIDTH),
    }
}

/// Widths of the glyphs WinAnsi places in 0x80..=0x9F.
fn win_ansi_punctuation_width(c: char) -> Option<u16> {
    let width = match c {
        '\u{2018}' | '\u{2019}' | '‚' => 222,
        '\u{201C}' | '\u{201D}' | '„' | 'ˆ' | '˜' | '‹' | '›' => 333,
        '•' => 350,
        'š' | 'ž' => 500,
        '€' | 'ƒ' | '†' | '‡' | '\u{2013}' => 556,
        'Ž' => 611,
        'Š' | 'Ÿ' => 667,
        'œ' => 944,
        '\u{2014}' | '…' | '‰' | 'Œ' | '™' => 1000,
        _ => return None,
    };
    Some(width)
}

/// Natural width of `text` set in Helvetica at `font_size`, in the same
/// units as `font_size`.
pub fn helvetica_width(text: &str, font_size: f64) -> f64 {
    let units: u32 = text.chars().map(|c| u32::from(helvetica_char_width(c))).sum();
    f64::from(units) * font_size / 1000.0
}
