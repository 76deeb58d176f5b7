// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PushError {
    /// The target is gone for good and its subscription should be dropped.
    #[error("push target {0} has expired")]
    Expired(String),

    #[error("push delivery failed: {0}")]
    Failed(#[from] anyhow::Error),
}

/// Delivers a serialized notification to one subscription target.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, target: &str, payload: &str) -> Result<(), PushError>;
}

/// Transport that only logs what would have been delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl PushTransport for LogTransport {
    async fn send(&self, target: &str, payload: &str) -> Result<(), PushError> {
        info!("Push to {}: {}", target, payload);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records deliveries and fails for the targets it is told to.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(String, String)>>,
        pub expired: HashSet<String>,
        pub failing: HashSet<String>,
    }

    impl RecordingTransport {
        pub fn deliveries(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn send(&self, target: &str, payload: &str) -> Result<(), PushError> {
            if self.expired.contains(target) {
                return Err(PushError::Expired(target.to_string()));
            }
            if self.failing.contains(target) {
                return Err(anyhow::anyhow!("connection refused").into());
            }
            self.sent
                .lock()
                .unwrap()
                .push((target.to_string(), payload.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        assert!(LogTransport.send("endpoint", "{}").await.is_ok());
    }

    #[tokio::test]
    async fn test_recording_transport_errors() {
        let transport = RecordingTransport {
            expired: HashSet::from(["old".to_string()]),
            failing: HashSet::from(["down".to_string()]),
            ..Default::default()
        };

        assert!(matches!(
            transport.send("old", "{}").await,
            Err(PushError::Expired(_))
        ));
        let err = transport.send("down", "{}").await.unwrap_err();
        assert_eq!(err.to_string(), "push delivery failed: connection refused");
        transport.send("ok", "{}").await.unwrap();
        assert_eq!(transport.deliveries(), vec![("ok".to_string(), "{}".to_string())]);
    }
}
