//! Bounded retry combinator.
//!
//! # Invariants
//! - The operation runs at most `max_attempts` times.
//! - Only errors accepted by the `retryable` predicate trigger another
//!   attempt; anything else is returned immediately as `Fatal`.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure of a bounded retry loop.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; carries the last one.
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error stopped the loop early.
    Fatal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Fatal(err) => err,
        }
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            Self::Fatal(err) => write!(f, "{err}"),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Fatal(err) => Some(err),
        }
    }
}

/// Runs `op` with a zero-based attempt index until it succeeds, fails with a
/// non-retryable error, or `max_attempts` is reached.
///
/// `max_attempts == 0` is treated as a single attempt.
pub fn retry_bounded<T, E>(
    max_attempts: u32,
    retryable: impl Fn(&E) -> bool,
    mut op: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, RetryError<E>> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if !retryable(&err) => return Err(RetryError::Fatal(err)),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
            }
        }
    }
}
