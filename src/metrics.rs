//! Advance widths for the standard fonts a PDF may reference without
//! embedding them or giving `/Widths`.
//!
//! Only printable ASCII and the curly single quotes are tabulated; other
//! characters fall back to the font's average advance.

/// Helvetica, U+0020 through U+007E.
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // space - slash
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // digits
    278, 278, 584, 584, 584, 556, 1015, // colon - at
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A - M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N - Z
    278, 278, 278, 469, 556, 333, // bracketleft - grave
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a - m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n - z
    334, 260, 334, 584, // braceleft - asciitilde
];

/// Times-Roman, U+0020 through U+007E.
const TIMES_ROMAN: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333, 250, 278, // space - slash
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, // digits
    278, 278, 564, 564, 564, 444, 921, // colon - at
    722, 667, 667, 722, 611, 556, 722, 722, 333, 389, 722, 611, 889, // A - M
    722, 722, 556, 722, 667, 556, 611, 722, 722, 944, 722, 722, 611, // N - Z
    333, 278, 333, 469, 500, 333, // bracketleft - grave
    444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500, 278, 778, // a - m
    500, 500, 500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444, // n - z
    480, 200, 480, 541, // braceleft - asciitilde
];

enum Family {
    Helvetica,
    TimesRoman,
    Courier,
}

fn family(base_name: &str) -> Option<Family> {
    // drop a subset tag such as "ABCDEF+"
    let name = base_name.split_once('+').map_or(base_name, |(_, rest)| rest);
    match name {
        "Helvetica" | "Helvetica-Oblique" | "Arial" | "ArialMT" | "Arial,Italic" | "Arial-ItalicMT" => {
            Some(Family::Helvetica)
        }
        "Times-Roman" | "TimesNewRoman" | "TimesNewRomanPSMT" => Some(Family::TimesRoman),
        _ if name.starts_with("Courier") => Some(Family::Courier),
        _ => None,
    }
}

/// Advance width of `ch` in thousandths of an em, when `base_name` is a
/// standard font whose metrics are known.
pub(crate) fn core_width(base_name: &str, ch: char) -> Option<f64> {
    let family = family(base_name)?;
    let table = match family {
        Family::Courier => return matches!(ch, ' '..='~' | '\u{2018}' | '\u{2019}').then_some(600.0),
        Family::Helvetica => &HELVETICA,
        Family::TimesRoman => &TIMES_ROMAN,
    };
    match ch {
        ' '..='~' => Some(table[ch as usize - 0x20] as f64),
        '\u{2018}' | '\u{2019}' => Some(match family {
            Family::Helvetica => 222.0,
            _ => 333.0,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_widths_follow_the_font() {
        assert_eq!(core_width("Helvetica", 'W'), Some(944.0));
        assert_eq!(core_width("Helvetica", 'i'), Some(222.0));
        assert_eq!(core_width("Times-Roman", 'a'), Some(444.0));
        assert_eq!(core_width("Times-Roman", '~'), Some(541.0));
        assert_eq!(core_width("Courier-Bold", 'm'), Some(600.0));
    }

    #[test]
    fn subset_tags_and_aliases_are_recognised() {
        assert_eq!(core_width("ABCDEF+ArialMT", '@'), Some(1015.0));
        assert_eq!(core_width("Helvetica-Oblique", '\u{2019}'), Some(222.0));
        assert_eq!(core_width("Times-Roman", '\u{2018}'), Some(333.0));
    }

    #[test]
    fn unknown_fonts_and_characters_have_no_width() {
        assert_eq!(core_width("Helvetica", 'é'), None);
        assert_eq!(core_width("Helvetica-Bold", 'a'), None);
        assert_eq!(core_width("Garamond", 'a'), None);
    }
}
