//! Liveness probing.

use std::time::Duration;

use crate::session::connection::Connection;

/// Result of probing an existing connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    TimedOut,
}

impl Liveness {
    pub fn is_alive(self) -> bool {
        self == Liveness::Alive
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Liveness::Alive => "alive",
            Liveness::Dead => "dead",
            Liveness::TimedOut => "timed_out",
        }
    }
}

/// Probes a connection under a fixed deadline.
#[derive(Debug, Clone, Copy)]
pub struct LivenessProber {
    deadline: Duration,
}

impl LivenessProber {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn probe(&self, connection: &dyn Connection) -> Liveness {
        if !connection.is_open() {
            return Liveness::Dead;
        }
        match tokio::time::timeout(self.deadline, connection.probe()).await {
            Ok(Ok(())) => Liveness::Alive,
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %connection.id(), error = %e, "Liveness probe failed");
                Liveness::Dead
            }
            Err(_) => Liveness::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::connection::{ConnectionId, ProbeError};
    use async_trait::async_trait;

    struct Fixed {
        id: ConnectionId,
        open: bool,
        answer: Option<Result<(), ProbeError>>,
    }

    #[async_trait]
    impl Connection for Fixed {
        fn id(&self) -> ConnectionId {
            self.id
        }

        async fn probe(&self) -> Result<(), ProbeError> {
            match &self.answer {
                Some(answer) => answer.clone(),
                None => std::future::pending().await,
            }
        }

        async fn close(&self) {}

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn conn(open: bool, answer: Option<Result<(), ProbeError>>) -> Fixed {
        Fixed {
            id: ConnectionId::new(),
            open,
            answer,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_outcomes() {
        let prober = LivenessProber::new(Duration::from_secs(2));
        assert_eq!(prober.probe(&conn(true, Some(Ok(())))).await, Liveness::Alive);
        assert_eq!(
            prober.probe(&conn(true, Some(Err(ProbeError::Closed)))).await,
            Liveness::Dead
        );
        assert_eq!(prober.probe(&conn(false, Some(Ok(())))).await, Liveness::Dead);
        assert_eq!(prober.probe(&conn(true, None)).await, Liveness::TimedOut);
    }
}
