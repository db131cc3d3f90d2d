use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

// Space and newline delimit fields on the scanner side; colon separates header keys.
const WIRE: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b':');

/// Escape a value for a COMMANDS line or a scanner request.
pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, WIRE).to_string()
}

/// Reverse `%XX` escapes from a RESULTS field. Invalid UTF-8 is replaced.
pub fn percent_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_characters_are_escaped() {
        assert_eq!(percent_encode("a b:c\nd%"), "a%20b%3Ac%0Ad%25");
        assert_eq!(percent_encode("plain@example.com"), "plain@example.com");
    }

    #[test]
    fn test_non_ascii_escaped_bytewise() {
        assert_eq!(percent_encode("é"), "%C3%A9");
        assert_eq!(percent_decode("%C3%A9"), "é");
    }

    #[test]
    fn test_decode_leaves_literal_text() {
        assert_eq!(percent_decode("550 spam rejected"), "550 spam rejected");
        assert_eq!(percent_decode("X-Spam%20Score"), "X-Spam Score");
        assert_eq!(percent_decode("100%"), "100%");
    }
}
