/// Ctrl-C.
pub const INTR: u8 = 0x03;
/// Ctrl-D.
pub const EOF: u8 = 0x04;

/// Map a control mnemonic to its control byte.
///
/// Letters map case-insensitively to 1–26. The remaining control codes are
/// reached through their punctuation mnemonics.
pub fn control_byte(letter: char) -> Option<u8> {
    let lower = letter.to_ascii_lowercase();
    if lower.is_ascii_lowercase() {
        return Some(lower as u8 - b'a' + 1);
    }
    match lower {
        '@' | '`' => Some(0),
        '[' | '{' => Some(27),
        '\\' | '|' => Some(28),
        ']' | '}' => Some(29),
        '^' | '~' => Some(30),
        '_' => Some(31),
        '?' => Some(127),
        _ => None,
    }
}
