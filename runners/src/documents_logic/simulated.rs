use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, ensure};
use http::StatusCode;
use lib_reqflow::{Outcome, Payload, TransportSender};
use rand::Rng;

const REJECTION_STATUSES: [StatusCode; 4] = [
    StatusCode::BAD_REQUEST,
    StatusCode::CONFLICT,
    StatusCode::UNPROCESSABLE_ENTITY,
    StatusCode::SERVICE_UNAVAILABLE,
];

/// # Simulated Sender
///
/// A dry-run transport: waits for a fixed latency and answers `201 Created`,
/// or a random rejection for the configured share of requests.
#[derive(Debug)]
pub struct SimulatedSender {
    reject_ratio: f64,
    latency: Duration,
    expected: StatusCode,
    sent: AtomicU64,
}

impl SimulatedSender {
    pub fn new(reject_ratio: f64, latency: Duration) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&reject_ratio),
            "simulated reject ratio {reject_ratio} is outside [0, 1]"
        );
        Ok(Self {
            reject_ratio,
            latency,
            expected: StatusCode::CREATED,
            sent: AtomicU64::new(0),
        })
    }

    fn answer(&self) -> Outcome {
        let mut rng = rand::rng();
        if rng.random_bool(self.reject_ratio) {
            let status = REJECTION_STATUSES[rng.random_range(0..REJECTION_STATUSES.len())];
            Outcome::rejected(status, self.expected)
        } else {
            Outcome::Success { status: self.expected }
        }
    }
}

impl<B: Sync> TransportSender<B> for SimulatedSender {
    async fn send(&self, payload: &Payload<B>) -> Result<Outcome> {
        tokio::time::sleep(self.latency).await;
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        let outcome = self.answer();
        log::debug!("Simulated request #{n} for payload {}: {outcome}", payload.id);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_is_validated() {
        assert!(SimulatedSender::new(-0.1, Duration::ZERO).is_err());
        assert!(SimulatedSender::new(1.5, Duration::ZERO).is_err());
        assert!(SimulatedSender::new(1.0, Duration::ZERO).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ratio_always_accepts() {
        let sender = SimulatedSender::new(0.0, Duration::from_millis(50)).unwrap();
        let start = tokio::time::Instant::now();

        for id in 1..=5 {
            let outcome = sender.send(&Payload::new(id, ())).await.unwrap();
            assert!(outcome.is_success());
        }

        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_full_ratio_always_rejects() {
        let sender = SimulatedSender::new(1.0, Duration::ZERO).unwrap();

        for id in 1..=5 {
            match sender.send(&Payload::new(id, ())).await.unwrap() {
                Outcome::Rejected { status, expected, .. } => {
                    assert!(REJECTION_STATUSES.contains(&status));
                    assert_eq!(expected, StatusCode::CREATED);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }
}
