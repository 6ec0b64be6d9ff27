//! Multi-step writes with compensation.
//!
//! A [`Saga`] runs its steps in order. When a step fails, every step that
//! already succeeded is compensated in reverse order and the failure is
//! reported as a [`SagaError`].

use std::fmt;

type Action<'a, C, E> = Box<dyn FnOnce(&mut C) -> Result<(), E> + 'a>;

struct Step<'a, C, E> {
    name: &'static str,
    forward: Action<'a, C, E>,
    compensate: Action<'a, C, E>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationFailure {
    pub step: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("step {step} failed: {cause}")]
pub struct SagaError<E: fmt::Debug + fmt::Display> {
    pub step: &'static str,
    pub cause: E,
    /// Steps whose compensation ran cleanly, most recent first.
    pub unwound: Vec<&'static str>,
    pub compensation_failures: Vec<CompensationFailure>,
}

impl<E: fmt::Debug + fmt::Display> SagaError<E> {
    /// True when nothing had been applied before the failing step.
    pub fn is_clean_first_step(&self) -> bool {
        self.unwound.is_empty() && self.compensation_failures.is_empty()
    }
}

pub struct Saga<'a, C, E> {
    name: &'static str,
    steps: Vec<Step<'a, C, E>>,
}

impl<'a, C, E: fmt::Debug + fmt::Display> Saga<'a, C, E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn step<F, G>(mut self, name: &'static str, forward: F, compensate: G) -> Self
    where
        F: FnOnce(&mut C) -> Result<(), E> + 'a,
        G: FnOnce(&mut C) -> Result<(), E> + 'a,
    {
        self.steps.push(Step {
            name,
            forward: Box::new(forward),
            compensate: Box::new(compensate),
        });
        self
    }

    pub fn run(self, ctx: &mut C) -> Result<(), SagaError<E>> {
        let mut applied: Vec<(&'static str, Action<'a, C, E>)> = Vec::new();
        for step in self.steps {
            log::trace!("saga {}: {}", self.name, step.name);
            match (step.forward)(ctx) {
                Ok(()) => applied.push((step.name, step.compensate)),
                Err(cause) => {
                    log::warn!("saga {} failed at {}: {}", self.name, step.name, cause);
                    let mut unwound = Vec::new();
                    let mut compensation_failures = Vec::new();
                    while let Some((name, compensate)) = applied.pop() {
                        match compensate(ctx) {
                            Ok(()) => unwound.push(name),
                            Err(e) => {
                                log::error!(
                                    "saga {}: compensation for {} failed: {}",
                                    self.name,
                                    name,
                                    e
                                );
                                compensation_failures.push(CompensationFailure {
                                    step: name,
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                    return Err(SagaError {
                        step: step.name,
                        cause,
                        unwound,
                        compensation_failures,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        applied: Vec<&'static str>,
        compensated: Vec<&'static str>,
    }

    const NAMES: [&str; 3] = ["identity", "user", "profile"];

    fn three_steps<'a>(fail_at: Option<usize>, broken_compensation: Option<usize>) -> Saga<'a, Log, String> {
        let mut saga = Saga::new("test");
        for (i, name) in NAMES.iter().copied().enumerate() {
            saga = saga.step(
                name,
                move |log: &mut Log| {
                    if fail_at == Some(i) {
                        return Err(format!("{} exploded", name));
                    }
                    log.applied.push(name);
                    Ok(())
                },
                move |log: &mut Log| {
                    if broken_compensation == Some(i) {
                        return Err(format!("cannot undo {}", name));
                    }
                    log.compensated.push(name);
                    Ok(())
                },
            );
        }
        saga
    }

    #[test]
    fn all_steps_succeed_without_compensation() {
        let mut log = Log::default();
        three_steps(None, None).run(&mut log).expect("saga");
        assert_eq!(log.applied, NAMES.to_vec());
        assert!(log.compensated.is_empty());
    }

    #[test]
    fn failure_at_each_step_unwinds_prior_steps_in_reverse() {
        for fail_at in 0..NAMES.len() {
            let mut log = Log::default();
            let e = three_steps(Some(fail_at), None)
                .run(&mut log)
                .expect_err("should fail");
            assert_eq!(e.step, NAMES[fail_at]);
            assert_eq!(e.cause, format!("{} exploded", NAMES[fail_at]));

            let mut expected: Vec<&str> = NAMES[..fail_at].to_vec();
            expected.reverse();
            assert_eq!(log.compensated, expected);
            assert_eq!(e.unwound, expected);
            assert!(e.compensation_failures.is_empty());
            assert_eq!(e.is_clean_first_step(), fail_at == 0);
        }
    }

    #[test]
    fn compensation_failures_are_reported_and_unwinding_continues() {
        let mut log = Log::default();
        let e = three_steps(Some(2), Some(1))
            .run(&mut log)
            .expect_err("should fail");
        assert_eq!(e.step, "profile");
        assert_eq!(e.unwound, vec!["identity"]);
        assert_eq!(
            e.compensation_failures,
            vec![CompensationFailure {
                step: "user",
                message: "cannot undo user".into()
            }]
        );
        assert_eq!(log.compensated, vec!["identity"]);
        assert_eq!(e.to_string(), "step profile failed: profile exploded");
    }
}
