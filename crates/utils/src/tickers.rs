/// Bloomberg futures month letters, January first.
const MONTH_CODES: [char; 12] = ['F', 'G', 'H', 'J', 'K', 'M', 'N', 'Q', 'U', 'V', 'X', 'Z'];

const MONTH_ABBREVS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Month (1-12) to Bloomberg month letter.
pub fn month_code(month: u32) -> Option<char> {
    let idx = usize::try_from(month).ok()?.checked_sub(1)?;
    MONTH_CODES.get(idx).copied()
}

/// Three-letter English month ("JAN".."DEC", any case) to Bloomberg month letter.
pub fn month_code_from_abbrev(abbrev: &str) -> Option<char> {
    let upper = abbrev.trim().to_ascii_uppercase();
    let idx = MONTH_ABBREVS.iter().position(|m| *m == upper)?;
    Some(MONTH_CODES[idx])
}

/// Builds a futures ticker such as `HIZ8 Index` or `S K4 Comdty`.
///
/// `prefix` is used verbatim, so two-character roots padded with a space
/// ("S ", "W ") keep their padding.
pub fn futures_ticker(prefix: &str, month: char, year_digits: &str, yellow_key: &str) -> String {
    format!("{}{}{} {}", prefix, month, year_digits, yellow_key)
}
