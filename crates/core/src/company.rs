//! # Company Identity
//!
//! Deterministic normalization of company names into a `company_key`.
//! Reports and compare sessions are keyed by this value so "Stripe",
//! "Stripe, Inc." and "stripe inc" all resolve to the same account.

/// Legal suffixes that never disambiguate a company.
const LEGAL_SUFFIXES: &[&str] = &[
    "inc",
    "incorporated",
    "corp",
    "corporation",
    "co",
    "company",
    "llc",
    "llp",
    "ltd",
    "limited",
    "plc",
    "gmbh",
    "ag",
    "sa",
    "bv",
    "nv",
    "pvt",
    "pte",
    "oy",
    "ab",
];

/// Normalize a company name into a stable lookup key.
///
/// Lowercases, splits on non-alphanumerics, strips trailing legal
/// suffixes, and joins with `-`. Returns an empty string for input with
/// no alphanumeric content; callers treat that as an invalid request.
pub fn company_key(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    // Keep at least one token so "Co" alone still yields a key.
    while tokens.len() > 1 {
        let last = tokens[tokens.len() - 1];
        if LEGAL_SUFFIXES.contains(&last) {
            tokens.pop();
        } else {
            break;
        }
    }

    tokens.join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_punctuation_collapse() {
        assert_eq!(company_key("Stripe"), "stripe");
        assert_eq!(company_key("Stripe, Inc."), "stripe");
        assert_eq!(company_key("  stripe INC "), "stripe");
    }

    #[test]
    fn test_multi_word_names() {
        assert_eq!(company_key("Palo Alto Networks"), "palo-alto-networks");
        assert_eq!(
            company_key("Razorpay Software Pvt. Ltd."),
            "razorpay-software"
        );
    }

    #[test]
    fn test_suffix_only_name_keeps_a_token() {
        assert_eq!(company_key("Co"), "co");
    }

    #[test]
    fn test_empty_input_yields_empty_key() {
        assert_eq!(company_key("  ...  "), "");
    }

    #[test]
    fn test_same_key_for_variant_spellings() {
        assert_eq!(company_key("ACME Corp"), company_key("acme corporation"));
    }
}
