use std::fmt::Display;

use random_string::charsets::ALPHA;

/// The length of the label generated when no name is given to a node or tensor.
const LABEL_LENGTH: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label {
    label: String,
}

impl Label {
    pub fn new() -> Self {
        let label = random_string::generate(LABEL_LENGTH, ALPHA);
        Self { label }
    }

    pub fn value(&self) -> &str {
        &self.label
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.label
    }
}

impl<'a> From<&'a str> for Label {
    fn from(label: &'a str) -> Self {
        Self { label: label.into() }
    }
}

impl From<String> for Label {
    fn from(label: String) -> Self {
        Self { label }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_alphabetic_label_of_fixed_length() {
        let label = Label::new();
        assert_eq!(label.value().len(), LABEL_LENGTH);
        assert!(label.value().chars().all(|c| c.is_alphabetic()));
    }

    #[test]
    fn from_str_roundtrips() {
        let label: Label = "conv1".into();
        assert_eq!(label.value(), "conv1");
        assert_eq!(label.to_string(), "conv1");
    }
}
