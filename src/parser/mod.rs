pub mod agenda;
pub mod speech;

/// Collapse every run of whitespace to a single space and trim the ends.
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_newlines_and_nbsp() {
        assert_eq!(normalize_ws("  Temat:\n\t X \u{a0} Y "), "Temat: X Y");
        assert_eq!(normalize_ws(" \n "), "");
    }
}
