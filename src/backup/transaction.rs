use crate::actions::{Action, ActionError, Errors, TRANSACTIONAL};

/// Runs `actions` all-or-nothing.
///
/// All actions are prepared in order. Only if every preparation succeeded
/// are they committed, again in order. Otherwise every action whose
/// preparation was started is rolled back. Once a preparation failed no
/// further preparation is started.
///
/// Rollback errors are logged but not returned; the failed preparation is
/// what is reported.
pub fn run_all_or_nothing(actions: &[&dyn Action], dry_run: bool) -> Errors {
    let mut errors = Errors::new();
    let mut prepared: Vec<&dyn Action> = Vec::with_capacity(actions.len());

    for &action in actions {
        if let Some(&missing) = TRANSACTIONAL
            .iter()
            .find(|&&capability| !action.supports(capability))
        {
            log::error!(
                target: "backup::transaction",
                "'{}' can't be part of an all-or-nothing group, it doesn't support '{missing}'",
                action.kind()
            );
            errors.push(ActionError::unsupported(action.kind(), missing));
            continue;
        }

        if !errors.is_empty() {
            log::info!(target: "backup::transaction", "Skipping preparation of '{}' after earlier failure", action.kind());
            continue;
        }

        log::debug!(target: "backup::transaction", "Preparing '{}'", action.kind());
        prepared.push(action);
        errors.extend(action.prepare(dry_run));
    }

    if errors.is_empty() {
        for action in &prepared {
            log::debug!(target: "backup::transaction", "Committing '{}'", action.kind());
            errors.extend(action.commit(dry_run));
        }
    } else {
        log::error!(
            target: "backup::transaction",
            "Preparation failed, rolling back {} action(s)",
            prepared.len()
        );
        for action in &prepared {
            for error in action.rollback(dry_run) {
                log::error!(target: "backup::transaction", "Rollback of '{}' failed: {error}", action.kind());
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::actions::Capability;

    type Journal = RefCell<Vec<(usize, Capability)>>;

    struct Scripted<'a> {
        id: usize,
        journal: &'a Journal,
        prepare_fails: bool,
        commit_fails: bool,
        rollback_fails: bool,
        transactional: bool,
    }

    impl<'a> Scripted<'a> {
        fn new(id: usize, journal: &'a Journal) -> Self {
            Self {
                id,
                journal,
                prepare_fails: false,
                commit_fails: false,
                rollback_fails: false,
                transactional: true,
            }
        }

        fn record(&self, capability: Capability, fails: bool) -> Errors {
            self.journal.borrow_mut().push((self.id, capability));
            if fails {
                vec![ActionError::MissingFile {
                    file: format!("{}-{capability}", self.id),
                    target: "localhost".to_string(),
                }]
            } else {
                Vec::new()
            }
        }
    }

    impl Action for Scripted<'_> {
        fn kind(&self) -> &'static str {
            "Scripted"
        }

        fn capabilities(&self) -> &'static [Capability] {
            if self.transactional {
                &TRANSACTIONAL
            } else {
                &[Capability::Do]
            }
        }

        fn prepare(&self, _dry_run: bool) -> Errors {
            self.record(Capability::Prepare, self.prepare_fails)
        }

        fn commit(&self, _dry_run: bool) -> Errors {
            self.record(Capability::Commit, self.commit_fails)
        }

        fn rollback(&self, _dry_run: bool) -> Errors {
            self.record(Capability::Rollback, self.rollback_fails)
        }
    }

    fn names(errors: &Errors) -> Vec<String> {
        errors.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn failed_preparation_rolls_back_everything_prepared() {
        let journal = Journal::default();
        let first = Scripted::new(1, &journal);
        let second = Scripted {
            prepare_fails: true,
            ..Scripted::new(2, &journal)
        };
        let third = Scripted::new(3, &journal);

        let errors = run_all_or_nothing(&[&first, &second, &third], false);

        assert_eq!(errors.len(), 1);
        assert_eq!(
            *journal.borrow(),
            vec![
                (1, Capability::Prepare),
                (2, Capability::Prepare),
                (1, Capability::Rollback),
                (2, Capability::Rollback),
            ]
        );
    }

    #[test]
    fn successful_preparation_commits_in_order() {
        let journal = Journal::default();
        let first = Scripted {
            commit_fails: true,
            ..Scripted::new(1, &journal)
        };
        let second = Scripted::new(2, &journal);
        let third = Scripted {
            commit_fails: true,
            ..Scripted::new(3, &journal)
        };

        let errors = run_all_or_nothing(&[&first, &second, &third], false);

        assert_eq!(
            *journal.borrow(),
            vec![
                (1, Capability::Prepare),
                (2, Capability::Prepare),
                (3, Capability::Prepare),
                (1, Capability::Commit),
                (2, Capability::Commit),
                (3, Capability::Commit),
            ]
        );
        assert_eq!(
            names(&errors),
            vec![
                "File '1-commit' doesn't exist on localhost",
                "File '3-commit' doesn't exist on localhost"
            ]
        );
    }

    #[test]
    fn rollback_errors_are_not_returned() {
        let journal = Journal::default();
        let first = Scripted {
            rollback_fails: true,
            ..Scripted::new(1, &journal)
        };
        let second = Scripted {
            prepare_fails: true,
            ..Scripted::new(2, &journal)
        };

        let errors = run_all_or_nothing(&[&first, &second], false);

        assert_eq!(
            names(&errors),
            vec!["File '2-prepare' doesn't exist on localhost"]
        );
    }

    #[test]
    fn non_transactional_action_fails_the_group() {
        let journal = Journal::default();
        let first = Scripted::new(1, &journal);
        let second = Scripted {
            transactional: false,
            ..Scripted::new(2, &journal)
        };
        let third = Scripted::new(3, &journal);

        let errors = run_all_or_nothing(&[&first, &second, &third], false);

        assert!(matches!(
            errors.as_slice(),
            [ActionError::Unsupported {
                capability: Capability::Prepare,
                ..
            }]
        ));
        assert_eq!(
            *journal.borrow(),
            vec![(1, Capability::Prepare), (1, Capability::Rollback)]
        );
    }

    #[test]
    fn empty_group_succeeds() {
        assert!(run_all_or_nothing(&[], false).is_empty());
    }
}
