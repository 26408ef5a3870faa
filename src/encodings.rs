//! Single-byte font encodings and glyph-name lookup.

use encoding_rs::UTF_16BE;
use unicode_normalization::UnicodeNormalization;

use crate::error::{ConvertError, ConvertResult};

pub(crate) const PDF_DOC_ENCODING: &[u16] = &[
    0x0000, 0x0001, 0x0002, 0x0003, 0x0004, 0x0005, 0x0006, 0x0007, 0x0008,
    0x0009, 0x000a, 0x000b, 0x000c, 0x000d, 0x000e, 0x000f, 0x0010, 0x0011,
    0x0012, 0x0013, 0x0014, 0x0015, 0x0016, 0x0017, 0x02d8, 0x02c7, 0x02c6,
    0x02d9, 0x02dd, 0x02db, 0x02da, 0x02dc, 0x0020, 0x0021, 0x0022, 0x0023,
    0x0024, 0x0025, 0x0026, 0x0027, 0x0028, 0x0029, 0x002a, 0x002b, 0x002c,
    0x002d, 0x002e, 0x002f, 0x0030, 0x0031, 0x0032, 0x0033, 0x0034, 0x0035,
    0x0036, 0x0037, 0x0038, 0x0039, 0x003a, 0x003b, 0x003c, 0x003d, 0x003e,
    0x003f, 0x0040, 0x0041, 0x0042, 0x0043, 0x0044, 0x0045, 0x0046, 0x0047,
    0x0048, 0x0049, 0x004a, 0x004b, 0x004c, 0x004d, 0x004e, 0x004f, 0x0050,
    0x0051, 0x0052, 0x0053, 0x0054, 0x0055, 0x0056, 0x0057, 0x0058, 0x0059,
    0x005a, 0x005b, 0x005c, 0x005d, 0x005e, 0x005f, 0x0060, 0x0061, 0x0062,
    0x0063, 0x0064, 0x0065, 0x0066, 0x0067, 0x0068, 0x0069, 0x006a, 0x006b,
    0x006c, 0x006d, 0x006e, 0x006f, 0x0070, 0x0071, 0x0072, 0x0073, 0x0074,
    0x0075, 0x0076, 0x0077, 0x0078, 0x0079, 0x007a, 0x007b, 0x007c, 0x007d,
    0x007e, 0x0000, 0x2022, 0x2020, 0x2021, 0x2026, 0x2014, 0x2013, 0x0192,
    0x2044, 0x2039, 0x203a, 0x2212, 0x2030, 0x201e, 0x201c, 0x201d, 0x2018,
    0x2019, 0x201a, 0x2122, 0xfb01, 0xfb02, 0x0141, 0x0152, 0x0160, 0x0178,
    0x017d, 0x0131, 0x0142, 0x0153, 0x0161, 0x017e, 0x0000, 0x20ac, 0x00a1,
    0x00a2, 0x00a3, 0x00a4, 0x00a5, 0x00a6, 0x00a7, 0x00a8, 0x00a9, 0x00aa,
    0x00ab, 0x00ac, 0x0000, 0x00ae, 0x00af, 0x00b0, 0x00b1, 0x00b2, 0x00b3,
    0x00b4, 0x00b5, 0x00b6, 0x00b7, 0x00b8, 0x00b9, 0x00ba, 0x00bb, 0x00bc,
    0x00bd, 0x00be, 0x00bf, 0x00c0, 0x00c1, 0x00c2, 0x00c3, 0x00c4, 0x00c5,
    0x00c6, 0x00c7, 0x00c8, 0x00c9, 0x00ca, 0x00cb, 0x00cc, 0x00cd, 0x00ce,
    0x00cf, 0x00d0, 0x00d1, 0x00d2, 0x00d3, 0x00d4, 0x00d5, 0x00d6, 0x00d7,
    0x00d8, 0x00d9, 0x00da, 0x00db, 0x00dc, 0x00dd, 0x00de, 0x00df, 0x00e0,
    0x00e1, 0x00e2, 0x00e3, 0x00e4, 0x00e5, 0x00e6, 0x00e7, 0x00e8, 0x00e9,
    0x00ea, 0x00eb, 0x00ec, 0x00ed, 0x00ee, 0x00ef, 0x00f0, 0x00f1, 0x00f2,
    0x00f3, 0x00f4, 0x00f5, 0x00f6, 0x00f7, 0x00f8, 0x00f9, 0x00fa, 0x00fb,
    0x00fc, 0x00fd, 0x00fe, 0x00ff
];

// 0x80..=0x9F; the rest of WinAnsi matches Latin-1.
const WIN_ANSI_HIGH: [u16; 32] = [
    0x20ac, 0x0000, 0x201a, 0x0192, 0x201e, 0x2026, 0x2020, 0x2021,
    0x02c6, 0x2030, 0x0160, 0x2039, 0x0152, 0x0000, 0x017d, 0x0000,
    0x0000, 0x2018, 0x2019, 0x201c, 0x201d, 0x2022, 0x2013, 0x2014,
    0x02dc, 0x2122, 0x0161, 0x203a, 0x0153, 0x0000, 0x017e, 0x0178,
];

// 0x80..=0xFF
const MAC_ROMAN_HIGH: [u16; 128] = [
    0x00c4, 0x00c5, 0x00c7, 0x00c9, 0x00d1, 0x00d6, 0x00dc, 0x00e1,
    0x00e0, 0x00e2, 0x00e4, 0x00e3, 0x00e5, 0x00e7, 0x00e9, 0x00e8,
    0x00ea, 0x00eb, 0x00ed, 0x00ec, 0x00ee, 0x00ef, 0x00f1, 0x00f3,
    0x00f2, 0x00f4, 0x00f6, 0x00f5, 0x00fa, 0x00f9, 0x00fb, 0x00fc,
    0x2020, 0x00b0, 0x00a2, 0x00a3, 0x00a7, 0x2022, 0x00b6, 0x00df,
    0x00ae, 0x00a9, 0x2122, 0x00b4, 0x00a8, 0x2260, 0x00c6, 0x00d8,
    0x221e, 0x00b1, 0x2264, 0x2265, 0x00a5, 0x00b5, 0x2202, 0x2211,
    0x220f, 0x03c0, 0x222b, 0x00aa, 0x00ba, 0x03a9, 0x00e6, 0x00f8,
    0x00bf, 0x00a1, 0x00ac, 0x221a, 0x0192, 0x2248, 0x2206, 0x00ab,
    0x00bb, 0x2026, 0x00a0, 0x00c0, 0x00c3, 0x00d5, 0x0152, 0x0153,
    0x2013, 0x2014, 0x201c, 0x201d, 0x2018, 0x2019, 0x00f7, 0x25ca,
    0x00ff, 0x0178, 0x2044, 0x20ac, 0x2039, 0x203a, 0xfb01, 0xfb02,
    0x2021, 0x00b7, 0x201a, 0x201e, 0x2030, 0x00c2, 0x00ca, 0x00c1,
    0x00cb, 0x00c8, 0x00cd, 0x00ce, 0x00cf, 0x00cc, 0x00d3, 0x00d4,
    0xf8ff, 0x00d2, 0x00da, 0x00db, 0x00d9, 0x0131, 0x02c6, 0x02dc,
    0x00af, 0x02d8, 0x02d9, 0x02da, 0x00b8, 0x02dd, 0x02db, 0x02c7,
];

const STANDARD_HIGH: &[(u8, u16)] = &[
    (0xa1, 0x00a1), (0xa2, 0x00a2), (0xa3, 0x00a3), (0xa4, 0x2044),
    (0xa5, 0x00a5), (0xa6, 0x0192), (0xa7, 0x00a7), (0xa8, 0x00a4),
    (0xa9, 0x0027), (0xaa, 0x201c), (0xab, 0x00ab), (0xac, 0x2039),
    (0xad, 0x203a), (0xae, 0xfb01), (0xaf, 0xfb02), (0xb1, 0x2013),
    (0xb2, 0x2020), (0xb3, 0x2021), (0xb4, 0x00b7), (0xb6, 0x00b6),
    (0xb7, 0x2022), (0xb8, 0x201a), (0xb9, 0x201e), (0xba, 0x201d),
    (0xbb, 0x00bb), (0xbc, 0x2026), (0xbd, 0x2030), (0xbf, 0x00bf),
    (0xc1, 0x0060), (0xc2, 0x00b4), (0xc3, 0x02c6), (0xc4, 0x02dc),
    (0xc5, 0x00af), (0xc6, 0x02d8), (0xc7, 0x02d9), (0xc8, 0x00a8),
    (0xca, 0x02da), (0xcb, 0x00b8), (0xcd, 0x02dd), (0xce, 0x02db),
    (0xcf, 0x02c7), (0xd0, 0x2014), (0xe1, 0x00c6), (0xe3, 0x00aa),
    (0xe8, 0x0141), (0xe9, 0x00d8), (0xea, 0x0152), (0xeb, 0x00ba),
    (0xf1, 0x00e6), (0xf5, 0x0131), (0xf8, 0x0142), (0xf9, 0x00f8),
    (0xfa, 0x0153), (0xfb, 0x00df),
];

fn ascii_base() -> Vec<u16> {
    (0u16..256).map(|c| if (0x20..0x7f).contains(&c) { c } else { 0 }).collect()
}

pub(crate) fn win_ansi() -> Vec<u16> {
    let mut table = ascii_base();
    for (i, &u) in WIN_ANSI_HIGH.iter().enumerate() {
        table[0x80 + i] = u;
    }
    for c in 0xa0..=0xff {
        table[c] = c as u16;
    }
    table
}

pub(crate) fn mac_roman() -> Vec<u16> {
    let mut table = ascii_base();
    for (i, &u) in MAC_ROMAN_HIGH.iter().enumerate() {
        table[0x80 + i] = u;
    }
    table
}

pub(crate) fn standard() -> Vec<u16> {
    let mut table = ascii_base();
    table[0x27] = 0x2019;
    table[0x60] = 0x2018;
    for &(code, u) in STANDARD_HIGH {
        table[code as usize] = u;
    }
    table
}

/// Named base encoding of a simple font.
pub(crate) fn encoding_to_unicode_table(name: &[u8]) -> ConvertResult<Vec<u16>> {
    match name {
        b"WinAnsiEncoding" => Ok(win_ansi()),
        b"MacRomanEncoding" => Ok(mac_roman()),
        b"StandardEncoding" => Ok(standard()),
        b"PDFDocEncoding" => Ok(Vec::from(PDF_DOC_ENCODING)),
        _ => Err(ConvertError::Encoding(format!(
            "Unknown encoding: {}",
            String::from_utf8_lossy(name)
        ))),
    }
}

/// Convert a PDF text string (UTF-16BE with BOM or PDFDocEncoding) to UTF-8.
pub fn pdf_to_utf8(s: &[u8]) -> ConvertResult<String> {
    to_utf8(PDF_DOC_ENCODING, s)
}

/// Convert to UTF-8 using a specific single-byte encoding table.
pub fn to_utf8(encoding: &[u16], s: &[u8]) -> ConvertResult<String> {
    if s.len() >= 2 && s[0] == 0xfe && s[1] == 0xff {
        return UTF_16BE
            .decode_without_bom_handling_and_without_replacement(&s[2..])
            .map(|s| s.to_string())
            .ok_or_else(|| ConvertError::Encoding("Invalid UTF-16BE".to_string()));
    }
    let utf16_bytes: Vec<u8> = s
        .iter()
        .flat_map(|&x| {
            let k = encoding.get(x as usize).copied().unwrap_or(0);
            [(k >> 8) as u8, k as u8]
        })
        .collect();

    UTF_16BE
        .decode_without_bom_handling_and_without_replacement(&utf16_bytes)
        .map(|s| s.to_string())
        .ok_or_else(|| ConvertError::Encoding("Invalid encoding".to_string()))
}

const GLYPH_NAMES: &[(&str, char)] = &[
    ("space", ' '), ("exclam", '!'), ("quotedbl", '"'), ("numbersign", '#'),
    ("dollar", '$'), ("percent", '%'), ("ampersand", '&'), ("quotesingle", '\''),
    ("quoteright", '\u{2019}'), ("parenleft", '('), ("parenright", ')'), ("asterisk", '*'),
    ("plus", '+'), ("comma", ','), ("hyphen", '-'), ("period", '.'), ("slash", '/'),
    ("zero", '0'), ("one", '1'), ("two", '2'), ("three", '3'), ("four", '4'),
    ("five", '5'), ("six", '6'), ("seven", '7'), ("eight", '8'), ("nine", '9'),
    ("colon", ':'), ("semicolon", ';'), ("less", '<'), ("equal", '='), ("greater", '>'),
    ("question", '?'), ("at", '@'), ("bracketleft", '['), ("backslash", '\\'),
    ("bracketright", ']'), ("asciicircum", '^'), ("underscore", '_'), ("grave", '`'),
    ("quoteleft", '\u{2018}'), ("braceleft", '{'), ("bar", '|'), ("braceright", '}'),
    ("asciitilde", '~'), ("exclamdown", '¡'), ("cent", '¢'), ("sterling", '£'),
    ("fraction", '\u{2044}'), ("yen", '¥'), ("florin", 'ƒ'), ("section", '§'),
    ("currency", '¤'), ("quotedblleft", '\u{201c}'), ("quotedblright", '\u{201d}'),
    ("guillemotleft", '«'), ("guillemotright", '»'), ("guilsinglleft", '‹'),
    ("guilsinglright", '›'), ("fi", 'ﬁ'), ("fl", 'ﬂ'), ("ff", 'ﬀ'), ("ffi", 'ﬃ'),
    ("ffl", 'ﬄ'), ("endash", '–'), ("emdash", '—'), ("dagger", '†'), ("daggerdbl", '‡'),
    ("periodcentered", '·'), ("paragraph", '¶'), ("bullet", '•'),
    ("quotesinglbase", '‚'), ("quotedblbase", '„'), ("ellipsis", '…'),
    ("perthousand", '‰'), ("questiondown", '¿'), ("acute", '´'), ("circumflex", 'ˆ'),
    ("tilde", '˜'), ("macron", '¯'), ("breve", '˘'), ("dotaccent", '˙'),
    ("dieresis", '¨'), ("ring", '˚'), ("cedilla", '¸'), ("hungarumlaut", '˝'),
    ("ogonek", '˛'), ("caron", 'ˇ'), ("AE", 'Æ'), ("ae", 'æ'), ("OE", 'Œ'), ("oe", 'œ'),
    ("ordfeminine", 'ª'), ("ordmasculine", 'º'), ("Lslash", 'Ł'), ("lslash", 'ł'),
    ("Oslash", 'Ø'), ("oslash", 'ø'), ("dotlessi", 'ı'), ("germandbls", 'ß'),
    ("Eth", 'Ð'), ("eth", 'ð'), ("Thorn", 'Þ'), ("thorn", 'þ'), ("copyright", '©'),
    ("registered", '®'), ("trademark", '™'), ("degree", '°'), ("plusminus", '±'),
    ("multiply", '×'), ("divide", '÷'), ("logicalnot", '¬'), ("brokenbar", '¦'),
    ("mu", 'µ'), ("onehalf", '½'), ("onequarter", '¼'), ("threequarters", '¾'),
    ("onesuperior", '¹'), ("twosuperior", '²'), ("threesuperior", '³'),
    ("minus", '−'), ("Euro", '€'), ("nbspace", '\u{a0}'), ("nonbreakingspace", '\u{a0}'),
    ("sfthyphen", '\u{ad}'), ("notequal", '≠'), ("lessequal", '≤'),
    ("greaterequal", '≥'), ("infinity", '∞'), ("partialdiff", '∂'), ("summation", '∑'),
    ("product", '∏'), ("pi", 'π'), ("integral", '∫'), ("Omega", 'Ω'), ("radical", '√'),
    ("approxequal", '≈'), ("Delta", '∆'), ("lozenge", '◊'), ("arrowright", '→'),
    ("arrowleft", '←'), ("checkmark", '✓'),
];

const ACCENTS: &[(&str, char)] = &[
    ("acute", '\u{301}'), ("grave", '\u{300}'), ("circumflex", '\u{302}'),
    ("tilde", '\u{303}'), ("dieresis", '\u{308}'), ("ring", '\u{30a}'),
    ("cedilla", '\u{327}'), ("caron", '\u{30c}'), ("macron", '\u{304}'),
    ("breve", '\u{306}'), ("dotaccent", '\u{307}'), ("ogonek", '\u{328}'),
    ("hungarumlaut", '\u{30b}'), ("commaaccent", '\u{326}'),
];

fn hex_chars(hex: &str, width: usize) -> Option<String> {
    if hex.is_empty() || hex.len() % width != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    (0..hex.len())
        .step_by(width)
        .map(|i| u32::from_str_radix(&hex[i..i + width], 16).ok().and_then(char::from_u32))
        .collect()
}

fn single_glyph(name: &str) -> Option<String> {
    if name.len() == 1 && name.as_bytes()[0].is_ascii_alphabetic() {
        return Some(name.to_string());
    }
    if let Some(&(_, c)) = GLYPH_NAMES.iter().find(|(n, _)| *n == name) {
        return Some(c.to_string());
    }
    if let Some(hex) = name.strip_prefix("uni") {
        return hex_chars(hex, 4);
    }
    if let Some(hex) = name.strip_prefix('u').filter(|hex| (4..=6).contains(&hex.len())) {
        if let Some(s) = hex_chars(hex, hex.len()) {
            return Some(s);
        }
    }
    // Accented Latin letters: base letter followed by an accent name.
    let mut chars = name.chars();
    let base = chars.next().filter(char::is_ascii_alphabetic)?;
    let rest = chars.as_str();
    let (_, mark) = ACCENTS.iter().find(|(accent, _)| *accent == rest)?;
    let composed: String = [base, *mark].iter().collect::<String>().nfc().collect();
    (composed.chars().count() == 1).then_some(composed)
}

/// Map an Adobe glyph name to its Unicode text.
///
/// Handles the standard Latin glyph set, `uniXXXX` and `uXXXX[XX]` names,
/// accented letters, `_`-joined ligature names and `.suffix` variants.
pub fn glyph_name_to_unicode(name: &str) -> Option<String> {
    let name = name.split('.').next().unwrap_or(name);
    if name.is_empty() {
        return None;
    }
    if name.contains('_') {
        return name.split('_').map(single_glyph).collect();
    }
    single_glyph(name)
}
