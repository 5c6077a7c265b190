//! User-visible result lines and batch summaries.

use std::fmt;

/// Final status of one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioStatus {
    /// Every step passed or failed as expected.
    Successful,
    /// At least one step failed, or the scenario aborted.
    Failed,
    /// Not run because an earlier scenario failed in fail-hard mode or the
    /// run aborted.
    Skipped,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Successful => write!(f, "successful"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Collects the harness's result lines, echoing them to stdout unless quiet.
#[derive(Debug, Default)]
pub struct Report {
    lines: Vec<String>,
    echo: bool,
}

impl Report {
    /// A report that prints lines as they are recorded when `echo` is set.
    #[must_use]
    pub fn new(echo: bool) -> Self {
        Self {
            lines: Vec::new(),
            echo,
        }
    }

    /// Record one line.
    pub fn line(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.echo {
            println!("{text}");
        }
        self.lines.push(text);
    }

    /// Every line recorded so far.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Per-scenario results of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    results: Vec<(String, ScenarioStatus)>,
}

impl BatchReport {
    /// Record the status of a scenario.
    pub fn push(&mut self, name: impl Into<String>, status: ScenarioStatus) {
        self.results.push((name.into(), status));
    }

    /// Results in run order.
    #[must_use]
    pub fn results(&self) -> &[(String, ScenarioStatus)] {
        &self.results
    }

    fn count(&self, status: ScenarioStatus) -> usize {
        self.results.iter().filter(|(_, s)| *s == status).count()
    }

    /// Whether every scenario succeeded.
    #[must_use]
    pub fn all_successful(&self) -> bool {
        self.count(ScenarioStatus::Successful) == self.results.len()
    }

    /// Process exit code: 0 iff every scenario succeeded.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.all_successful())
    }

    /// Summary block printed at the end of a batch.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec!["Test summary".to_string()];
        lines.extend(
            self.results
                .iter()
                .map(|(name, status)| format!("{name} ... {status}")),
        );
        lines.push(format!(
            "{} of {} tests successful ({} skipped)",
            self.count(ScenarioStatus::Successful),
            self.results.len(),
            self.count(ScenarioStatus::Skipped)
        ));
        lines
    }
}
