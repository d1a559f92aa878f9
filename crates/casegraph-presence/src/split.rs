//! Splits a message's `Recipients` cell into individual participant tokens
//! (`spec.md §4.7`: `Split(recipients, {,;|\n\r})`).

const SEPARATORS: &[char] = &[',', ';', '|', '\n', '\r'];

/// Split `recipients` on any of `{,;|\n\r}`, trimming and dropping empty
/// tokens.
pub(crate) fn split_recipients(recipients: &str) -> Vec<&str> {
    recipients
        .split(SEPARATORS)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_every_separator() {
        assert_eq!(split_recipients("a@x.com, b@x.com;c@x.com|d@x.com"), vec!["a@x.com", "b@x.com", "c@x.com", "d@x.com"]);
    }

    #[test]
    fn drops_empty_tokens_and_trims_whitespace() {
        assert_eq!(split_recipients(" a@x.com ,, \n b@x.com \r"), vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn single_recipient_with_no_separator() {
        assert_eq!(split_recipients("a@x.com"), vec!["a@x.com"]);
    }
}
