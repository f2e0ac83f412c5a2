use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Budget for a bounded fixed-interval poll: up to `max_attempts` probe
/// evaluations, `delay` between consecutive ones. Worst-case wall time is
/// `delay * (max_attempts - 1)` plus the probe calls themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl PollSettings {
    pub const fn new(delay: Duration, max_attempts: u32) -> Self {
        Self { delay, max_attempts }
    }

    pub const fn seconds(delay_secs: u64, max_attempts: u32) -> Self {
        Self::new(Duration::from_secs(delay_secs), max_attempts)
    }
}

/// Re-evaluate `probe` until it reports readiness or the attempt budget runs
/// out. A probe error is treated the same as "not ready yet": logged and
/// retried, never propagated mid-poll. Probes must be read-only checks.
pub async fn poll_until<F, Fut>(settings: PollSettings, condition: &str, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match probe().await {
            Ok(true) => {
                debug!("'{condition}' met after {attempts} attempt(s)");
                return Ok(());
            }
            Ok(false) => {
                debug!(
                    "'{condition}' not met (attempt {attempts}/{})",
                    settings.max_attempts
                );
            }
            Err(error) => {
                warn!(
                    "probe for '{condition}' failed (attempt {attempts}/{}): {error}",
                    settings.max_attempts
                );
            }
        }
        if attempts >= settings.max_attempts {
            return Err(Error::NotReady {
                condition: condition.to_string(),
                attempts,
            });
        }
        tokio::time::sleep(settings.delay).await;
    }
}

/// Poll until `probe` yields a value equal to `expected`.
pub async fn poll_until_eq<T, F, Fut>(
    settings: PollSettings,
    condition: &str,
    expected: T,
    mut probe: F,
) -> Result<()>
where
    T: PartialEq + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match probe().await {
            Ok(observed) if observed == expected => {
                debug!("'{condition}' reached {expected:?} after {attempts} attempt(s)");
                return Ok(());
            }
            Ok(observed) => {
                debug!(
                    "'{condition}' is {observed:?}, want {expected:?} (attempt {attempts}/{})",
                    settings.max_attempts
                );
            }
            Err(error) => {
                warn!(
                    "probe for '{condition}' failed (attempt {attempts}/{}): {error}",
                    settings.max_attempts
                );
            }
        }
        if attempts >= settings.max_attempts {
            return Err(Error::NotReady {
                condition: condition.to_string(),
                attempts,
            });
        }
        tokio::time::sleep(settings.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    const SETTINGS: PollSettings = PollSettings::seconds(7, 5);

    fn count(calls: &Cell<u32>) -> u32 {
        calls.set(calls.get() + 1);
        calls.get()
    }

    #[tokio::test(start_paused = true)]
    async fn ready_probe_returns_immediately() {
        let calls = Cell::new(0u32);
        let start = Instant::now();
        poll_until(SETTINGS, "always ready", || {
            count(&calls);
            async { Ok(true) }
        })
        .await
        .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Re-polling a met condition is just as cheap.
        poll_until(SETTINGS, "always ready", || async { Ok(true) })
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_attempt_k_sleeps_k_minus_one_times() {
        let calls = Cell::new(0u32);
        let start = Instant::now();
        poll_until(SETTINGS, "ready on third probe", || {
            let ready = count(&calls) >= 3;
            async move { Ok(ready) }
        })
        .await
        .unwrap();
        assert_eq!(calls.get(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2 * 7));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_fails_after_exactly_max_attempts() {
        let calls = Cell::new(0u32);
        let start = Instant::now();
        let err = poll_until(SETTINGS, "never ready", || {
            count(&calls);
            async { Ok(false) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.get(), 5);
        // n evaluations, n-1 sleeps
        assert_eq!(start.elapsed(), Duration::from_secs(4 * 7));
        match err {
            Error::NotReady { condition, attempts } => {
                assert_eq!(condition, "never ready");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_behave_like_not_ready() {
        let calls = Cell::new(0u32);
        let start = Instant::now();
        poll_until(SETTINGS, "flaky probe", || {
            let attempt = count(&calls);
            async move {
                if attempt < 3 {
                    Err(Error::KubeExecError("connection refused".to_string()))
                } else {
                    Ok(true)
                }
            }
        })
        .await
        .unwrap();
        // identical schedule to a false-false-true probe
        assert_eq!(calls.get(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2 * 7));
    }

    #[tokio::test(start_paused = true)]
    async fn all_errors_still_exhaust_the_budget() {
        let calls = Cell::new(0u32);
        let err = poll_until(SETTINGS, "broken probe", || {
            count(&calls);
            async { Err::<bool, _>(Error::KubeExecError("boom".to_string())) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.get(), 5);
        assert!(matches!(err, Error::NotReady { attempts: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_budget_never_sleeps() {
        let settings = PollSettings::seconds(60, 1);
        let start = Instant::now();
        let err = poll_until(settings, "one shot", || async { Ok(false) })
            .await
            .unwrap_err();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(err, Error::NotReady { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn eq_variant_waits_for_the_expected_value() {
        let calls = Cell::new(0u32);
        let start = Instant::now();
        poll_until_eq(SETTINGS, "counter reaches three", 3u32, || {
            let observed = count(&calls);
            async move { Ok(observed) }
        })
        .await
        .unwrap();
        assert_eq!(calls.get(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2 * 7));
    }

    #[tokio::test(start_paused = true)]
    async fn eq_variant_exhausts_like_the_boolean_one() {
        let err = poll_until_eq(SETTINGS, "stuck at zero", 3u32, || async { Ok(0u32) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotReady { attempts: 5, .. }));
    }
}
