/// One row of the keyword table: a line containing `pattern` moves the
/// install to `percentage` with `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRule {
    pub pattern: String,
    pub percentage: u8,
    pub message: String,
}

impl PhaseRule {
    pub fn new(pattern: impl Into<String>, percentage: u8, message: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            percentage: percentage.min(100),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseUpdate {
    pub percentage: u8,
    pub message: String,
}

const DEFAULT_PHASES: [(&str, u8, &str); 5] = [
    ("Downloading", 30, "downloading phase"),
    ("Extracting", 50, "extracting phase"),
    ("Installing", 70, "installing phase"),
    ("Configuring", 90, "configuring phase"),
    ("Rebooting", 95, "rebooting phase"),
];

/// Maps script output lines to coarse progress. Rules are tried in order,
/// matching is a case-sensitive substring test, and the first hit wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputClassifier {
    rules: Vec<PhaseRule>,
}

impl OutputClassifier {
    pub fn new(rules: Vec<PhaseRule>) -> Self {
        Self { rules }
    }

    pub fn classify(&self, line: &str) -> Option<PhaseUpdate> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        self.rules
            .iter()
            .find(|rule| line.contains(rule.pattern.as_str()))
            .map(|rule| PhaseUpdate {
                percentage: rule.percentage,
                message: rule.message.clone(),
            })
    }

    /// Classify a block of text that may hold several lines.
    pub fn classify_chunk(&self, text: &str) -> Vec<PhaseUpdate> {
        text.split('\n')
            .filter_map(|line| self.classify(line))
            .collect()
    }
}

impl Default for OutputClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_PHASES
                .iter()
                .map(|(pattern, percentage, message)| PhaseRule::new(*pattern, *percentage, *message))
                .collect(),
        )
    }
}
