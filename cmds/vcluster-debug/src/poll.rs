//! Interval polling with an overall deadline.

use std::{future::Future, time::Duration};

/// Poll `condition` immediately and then every `interval` until it reports
/// `true`, returns an error, or `timeout` elapses.
///
/// Returns `Ok(true)` once the condition holds and `Ok(false)` on timeout. A
/// condition that is still running when the deadline passes is dropped.
pub async fn poll_until<F, Fut, E>(
	interval: Duration,
	timeout: Duration,
	mut condition: F,
) -> Result<bool, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<bool, E>>,
{
	let polling = async {
		let mut ticker = tokio::time::interval(interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			ticker.tick().await;
			if condition().await? {
				return Ok::<(), E>(());
			}
		}
	};

	match tokio::time::timeout(timeout, polling).await {
		Ok(Ok(())) => Ok(true),
		Ok(Err(e)) => Err(e),
		Err(_elapsed) => Ok(false),
	}
}

#[cfg(test)]
mod tests {
	use std::{
		convert::Infallible,
		sync::atomic::{AtomicUsize, Ordering},
	};

	use super::*;

	#[tokio::test]
	async fn test_immediate_success_does_not_wait() {
		let started = tokio::time::Instant::now();
		let done = poll_until(Duration::from_secs(10), Duration::from_secs(30), || async {
			Ok::<_, Infallible>(true)
		})
		.await
		.unwrap();

		assert!(done);
		assert!(started.elapsed() < Duration::from_secs(1));
	}

	#[tokio::test(start_paused = true)]
	async fn test_succeeds_after_some_attempts() {
		let attempts = AtomicUsize::new(0);
		let done = poll_until(Duration::from_secs(1), Duration::from_secs(30), || {
			let attempt = attempts.fetch_add(1, Ordering::SeqCst);
			async move { Ok::<_, Infallible>(attempt >= 3) }
		})
		.await
		.unwrap();

		assert!(done);
		assert_eq!(attempts.load(Ordering::SeqCst), 4);
	}

	#[tokio::test(start_paused = true)]
	async fn test_times_out() {
		let done = poll_until(Duration::from_secs(1), Duration::from_secs(30), || async {
			Ok::<_, Infallible>(false)
		})
		.await
		.unwrap();

		assert!(!done);
	}

	#[tokio::test(start_paused = true)]
	async fn test_hanging_condition_times_out() {
		let done = poll_until(Duration::from_millis(200), Duration::from_secs(3), || {
			std::future::pending::<Result<bool, Infallible>>()
		})
		.await
		.unwrap();

		assert!(!done);
	}

	#[tokio::test]
	async fn test_condition_error_is_returned() {
		let result = poll_until(Duration::from_millis(10), Duration::from_secs(1), || async {
			Err::<bool, _>("boom")
		})
		.await;

		assert_eq!(result, Err("boom"));
	}
}
