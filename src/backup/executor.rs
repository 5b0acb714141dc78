use crate::actions::{Action, Errors};

/// Performs `action`, retrying up to `retries` times after failed attempts.
///
/// Every attempt runs the whole lifecycle of the action again. Only the
/// errors of the last attempt are returned.
pub fn execute(action: &dyn Action, retries: u32, dry_run: bool) -> Errors {
    let attempts = retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        let errors = action.perform(dry_run);
        if errors.is_empty() {
            if attempt > 1 {
                log::info!(target: "backup::executor", "'{}' succeeded on attempt {attempt}", action.kind());
            }
            return errors;
        }
        if attempt >= attempts {
            if attempts > 1 {
                log::error!(target: "backup::executor", "'{}' failed {attempts} times, giving up", action.kind());
            }
            return errors;
        }
        log::warn!(
            target: "backup::executor",
            "Attempt {attempt} of {attempts} of '{}' failed with {} error(s), retrying",
            action.kind(),
            errors.len()
        );
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::actions::{ActionError, Capability};

    /// Fails until its `succeed_on`-th attempt.
    struct Flaky {
        succeed_on: Option<u32>,
        attempts: Cell<u32>,
    }

    impl Flaky {
        fn new(succeed_on: Option<u32>) -> Self {
            Self {
                succeed_on,
                attempts: Cell::new(0),
            }
        }
    }

    impl Action for Flaky {
        fn kind(&self) -> &'static str {
            "Flaky"
        }

        fn capabilities(&self) -> &'static [Capability] {
            &[Capability::Do]
        }

        fn perform(&self, dry_run: bool) -> Errors {
            if dry_run {
                return Vec::new();
            }
            let attempt = self.attempts.get() + 1;
            self.attempts.set(attempt);
            match self.succeed_on {
                Some(succeed_on) if attempt >= succeed_on => Vec::new(),
                _ => vec![ActionError::MissingFile {
                    file: format!("attempt-{attempt}"),
                    target: "localhost".to_string(),
                }],
            }
        }
    }

    #[test]
    fn stops_after_first_success() {
        for retries in 0..4 {
            for k in 1..=retries + 1 {
                let action = Flaky::new(Some(k));

                let errors = execute(&action, retries, false);

                assert!(errors.is_empty(), "retries={retries} k={k}");
                assert_eq!(action.attempts.get(), k);
            }
        }
    }

    #[test]
    fn returns_errors_of_last_attempt_only() {
        for retries in 0..4 {
            let action = Flaky::new(None);

            let errors = execute(&action, retries, false);

            assert_eq!(action.attempts.get(), retries + 1);
            assert_eq!(errors.len(), 1);
            assert!(errors[0]
                .to_string()
                .contains(&format!("attempt-{}", retries + 1)));
        }
    }

    #[test]
    fn success_beyond_budget_is_not_reached() {
        let action = Flaky::new(Some(3));

        let errors = execute(&action, 1, false);

        assert_eq!(action.attempts.get(), 2);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn dry_run_is_a_single_successful_attempt() {
        let action = Flaky::new(None);

        assert!(execute(&action, 3, true).is_empty());
        assert_eq!(action.attempts.get(), 0);
    }
}
