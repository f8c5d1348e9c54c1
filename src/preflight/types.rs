//! Preflight check types and report.

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// The command would fail if run now.
    Fail,
    Warn,
    /// Not applicable to this target.
    Skip,
}

impl CheckStatus {
    fn marker(self) -> &'static str {
        match self {
            Self::Pass => "✓ [PASS]",
            Self::Fail => "✗ [FAIL]",
            Self::Warn => "⚠ [WARN]",
            Self::Skip => "○ [SKIP]",
        }
    }
}

impl std::fmt::Display for CheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.marker(), self.name)?;
        match &self.details {
            Some(details) => write!(f, ": {}", details),
            None => Ok(()),
        }
    }
}

impl CheckResult {
    pub fn pass(name: &str) -> Self {
        Self::new(name, CheckStatus::Pass, None)
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Pass, Some(details))
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Fail, Some(details))
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Warn, Some(details))
    }

    pub fn skip(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Skip, Some(details))
    }

    fn new(name: &str, status: CheckStatus, details: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.map(str::to_string),
        }
    }

    /// Downgrade a failure to a warning (optional tools).
    pub fn or_warn(mut self) -> Self {
        if self.status == CheckStatus::Fail {
            self.status = CheckStatus::Warn;
        }
        self
    }
}

/// Every check run for one target, in order.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Warnings and skips do not count against the report.
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// One-line summary, e.g. `9/11 passed, 1 failed, 1 warning(s)`.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}/{} passed",
            self.count(CheckStatus::Pass),
            self.checks.len()
        );
        if self.fail_count() > 0 {
            line.push_str(&format!(", {} failed", self.fail_count()));
        }
        if self.warn_count() > 0 {
            line.push_str(&format!(", {} warning(s)", self.warn_count()));
        }
        line
    }

    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");
        for check in &self.checks {
            println!("  {}", check);
        }
        println!("\nSummary: {}", self.summary());
    }
}
