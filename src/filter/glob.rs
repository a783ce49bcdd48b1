use regex::Regex;

/// A set of shell-style entity id globs compiled into one anchored regex.
///
/// `*` matches any run of characters (dots included) and `?` matches exactly
/// one character. Everything else is literal.
#[derive(Debug, Clone)]
pub struct GlobSet {
    regex: Regex,
}

impl GlobSet {
    /// Compile `patterns`. Returns `Ok(None)` for an empty list so callers can
    /// skip matching entirely.
    pub fn new<I, S>(patterns: I) -> Result<Option<Self>, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        if patterns.is_empty() {
            return Ok(None);
        }

        let alternatives: Vec<String> = patterns.iter().map(|p| glob_to_regex(p)).collect();
        let regex = Regex::new(&format!("^(?:{})$", alternatives.join("|")))?;
        Ok(Some(Self { regex }))
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    let mut buf = [0u8; 4];
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("sensor.*", "sensor.kitchen", true)]
    #[case("sensor.*", "binary_sensor.kitchen", false)]
    #[case("*.kitchen", "light.kitchen", true)]
    #[case("*.kitchen", "light.kitchen_2", false)]
    #[case("sensor.temp_?", "sensor.temp_1", true)]
    #[case("sensor.temp_?", "sensor.temp_12", false)]
    #[case("sensor.a+b", "sensor.a+b", true)]
    #[case("sensor.a+b", "sensor.aab", false)]
    #[case("*", "anything.at_all", true)]
    fn test_glob_matching(#[case] glob: &str, #[case] value: &str, #[case] expected: bool) {
        let set = GlobSet::new([glob]).unwrap().unwrap();
        assert_eq!(set.is_match(value), expected, "{glob} vs {value}");
    }

    #[test]
    fn test_multiple_patterns() {
        let set = GlobSet::new(["sensor.*", "*.garage"]).unwrap().unwrap();
        assert!(set.is_match("sensor.x"));
        assert!(set.is_match("light.garage"));
        assert!(!set.is_match("light.kitchen"));
    }

    #[test]
    fn test_empty_set() {
        assert!(GlobSet::new(Vec::<String>::new()).unwrap().is_none());
    }
}
