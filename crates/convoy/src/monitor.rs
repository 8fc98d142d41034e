//! Registry propagation monitor.
//!
//! After a publish the registry needs time to make the new version visible.
//! `wait_for` polls availability with growing delays: each sleep carries 10%
//! uniform positive jitter, and after every attempt the delay is multiplied
//! by 1.5 up to `max_delay`. The wait aborts on a wall-clock timeout, an
//! attempt budget, or cancellation.

use std::thread;
use std::time::{Duration, Instant};

use semver::Version;

use crate::engine::Reporter;
use crate::error::{ErrorKind, StepError};
use crate::ops::RegistryOps;
use crate::types::{CancelToken, MonitorOptions};

/// What a successful wait looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    pub attempts: u32,
    pub waited: Duration,
}

/// Block until `name@version` is visible on the registry.
///
/// Polling errors read as "not yet available": a flaky poll must not fail a
/// publish that already succeeded. Persistent unavailability still surfaces
/// through the timeout or the attempt budget.
pub fn wait_for(
    registry: &dyn RegistryOps,
    name: &str,
    version: &Version,
    opts: &MonitorOptions,
    cancel: &CancelToken,
    reporter: &mut dyn Reporter,
) -> Result<WaitOutcome, StepError> {
    let start = Instant::now();
    let mut delay = opts.initial_delay;
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(StepError::new(
                ErrorKind::Cancelled,
                format!("cancelled while waiting for {name}@{version}"),
            ));
        }

        attempts += 1;
        let available = registry.is_available(name, version).unwrap_or(false);
        if available {
            let waited = start.elapsed();
            reporter.info(&format!(
                "{name}@{version}: visible on registry after {attempts} checks ({})",
                humantime::format_duration(Duration::from_secs(waited.as_secs()))
            ));
            return Ok(WaitOutcome { attempts, waited });
        }

        if attempts >= opts.max_attempts {
            return Err(StepError::new(
                ErrorKind::RegistryTimeout,
                format!(
                    "{name}@{version} not visible on registry after {attempts} checks"
                ),
            ));
        }

        let sleep = jittered(delay);
        if start.elapsed() + sleep > opts.timeout {
            return Err(StepError::new(
                ErrorKind::RegistryTimeout,
                format!(
                    "{name}@{version} not visible on registry within {}",
                    humantime::format_duration(opts.timeout)
                ),
            ));
        }

        reporter.info(&format!(
            "{name}@{version}: not visible yet; next check in {}",
            humantime::format_duration(Duration::from_millis(sleep.as_millis() as u64))
        ));
        thread::sleep(sleep);

        delay = delay.mul_f64(1.5).min(opts.max_delay);
    }
}

/// 10% uniform positive jitter: delay * (1.0 ..= 1.1).
fn jittered(delay: Duration) -> Duration {
    let factor = 1.0 + rand::random::<f64>() * 0.1;
    delay.mul_f64(factor)
}
