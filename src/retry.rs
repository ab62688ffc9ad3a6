//! Retry policy for failed fetches.

use std::time::Duration;

use serde::Deserialize;

/// How a failed fetch is retried before the failure is surfaced.
///
/// `attempts` counts retries, not the first call: `Fixed { attempts: 2, .. }`
/// makes at most three calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
  /// Surface the first failure
  #[default]
  None,
  /// Wait the same delay before every retry
  Fixed { attempts: u32, delay_ms: u64 },
  /// Double the delay after every retry, up to `max_delay_ms`
  Exponential {
    attempts: u32,
    delay_ms: u64,
    max_delay_ms: u64,
  },
}

impl RetryPolicy {
  /// Delay before the next call, given how many calls have failed so far.
  ///
  /// Returns `None` once the retry budget is spent.
  pub fn delay_for(&self, failures: u32) -> Option<Duration> {
    if failures == 0 {
      return Some(Duration::ZERO);
    }

    match *self {
      RetryPolicy::None => None,
      RetryPolicy::Fixed { attempts, delay_ms } => {
        (failures <= attempts).then(|| Duration::from_millis(delay_ms))
      }
      RetryPolicy::Exponential {
        attempts,
        delay_ms,
        max_delay_ms,
      } => {
        if failures > attempts {
          return None;
        }
        let factor = 1u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
        let delay = delay_ms.saturating_mul(factor).min(max_delay_ms);
        Some(Duration::from_millis(delay))
      }
    }
  }
}
