//! Bounded retries for NDP reads.

use crate::ndp::conn::{Conn, Received};
use microra_core::context::{Context, Done};
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("retries exhausted")]
    RetriesExhausted,

    #[error("failed to read NDP message: {0}")]
    Read(#[source] io::Error),
}

impl From<Done> for ReceiveError {
    fn from(done: Done) -> Self {
        match done {
            Done::Canceled => ReceiveError::Canceled,
            Done::DeadlineExceeded => ReceiveError::DeadlineExceeded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Physical reads before giving up.
    pub attempts: u32,
    /// Pause between a transient failure and the next read.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Read one message from `conn`, retrying transient failures.
    ///
    /// `ctx` is checked before every read and raced against every read and
    /// backoff, so cancellation wins over any further I/O.
    pub async fn receive<C: Conn + ?Sized>(
        &self,
        ctx: &Context,
        conn: &mut C,
    ) -> Result<Received, ReceiveError> {
        for attempt in 1..=self.attempts {
            if let Some(done) = ctx.err() {
                return Err(done.into());
            }

            let result = tokio::select! {
                biased;
                done = ctx.done() => return Err(done.into()),
                result = conn.read_from() => result,
            };

            match result {
                Ok(received) => return Ok(received),
                Err(e) if is_transient(&e) => {
                    if attempt == self.attempts {
                        break;
                    }
                    ctx.sleep(self.backoff).await?;
                }
                Err(e) => return Err(ReceiveError::Read(e)),
            }
        }

        Err(ReceiveError::RetriesExhausted)
    }
}

/// [`RetryPolicy::receive`] with the default policy.
pub async fn receive_with_retry<C: Conn + ?Sized>(
    ctx: &Context,
    conn: &mut C,
) -> Result<Received, ReceiveError> {
    RetryPolicy::default().receive(ctx, conn).await
}

/// Timeouts and interruptions are worth another read; anything else is not.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndp::conn::ControlMessage;
    use crate::ndp::message::{Message, RouterAdvertisement};
    use async_trait::async_trait;
    use std::net::Ipv6Addr;
    use tokio::time::Instant;

    type ReadFn = Box<dyn FnMut(usize) -> io::Result<Received> + Send>;

    /// Conn double whose reads are answered by a script; counts reads.
    struct ScriptedConn {
        reads: usize,
        read: ReadFn,
    }

    impl ScriptedConn {
        fn new(read: impl FnMut(usize) -> io::Result<Received> + Send + 'static) -> Self {
            Self {
                reads: 0,
                read: Box::new(read),
            }
        }
    }

    #[async_trait]
    impl Conn for ScriptedConn {
        async fn read_from(&mut self) -> io::Result<Received> {
            let n = self.reads;
            self.reads += 1;
            (self.read)(n)
        }

        fn set_read_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
            Ok(())
        }

        async fn write_to(
            &mut self,
            _msg: &Message,
            _cm: Option<&ControlMessage>,
            _dst: Ipv6Addr,
        ) -> io::Result<()> {
            Ok(())
        }
    }

    fn canned() -> Received {
        (
            Message::RouterAdvertisement(RouterAdvertisement::default()),
            ControlMessage::default(),
            Ipv6Addr::LOCALHOST,
        )
    }

    fn timeout() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "i/o timeout")
    }

    #[tokio::test]
    async fn test_receive_canceled_before_read() {
        let (ctx, tx) = Context::with_cancel();
        tx.send(true).unwrap();

        let mut conn = ScriptedConn::new(|_| Ok(canned()));
        let err = receive_with_retry(&ctx, &mut conn).await.unwrap_err();
        assert!(matches!(err, ReceiveError::Canceled));
        assert_eq!(conn.reads, 0);
    }

    #[tokio::test]
    async fn test_receive_fatal_error() {
        let mut conn = ScriptedConn::new(|_| Err(io::Error::new(io::ErrorKind::Other, "fatal error")));
        let err = receive_with_retry(&Context::background(), &mut conn)
            .await
            .unwrap_err();
        match err {
            ReceiveError::Read(e) => assert_eq!(e.to_string(), "fatal error"),
            other => panic!("expected read error, got {other:?}"),
        }
        assert_eq!(conn.reads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_backoff_success() {
        let mut conn = ScriptedConn::new(|n| if n == 0 { Err(timeout()) } else { Ok(canned()) });
        let start = Instant::now();
        let (msg, _, from) = receive_with_retry(&Context::background(), &mut conn)
            .await
            .unwrap();
        assert!(matches!(msg, Message::RouterAdvertisement(_)));
        assert_eq!(from, Ipv6Addr::LOCALHOST);
        assert_eq!(conn.reads, 2);

        // Exactly one 50ms backoff between the two reads.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(50), "{waited:?}");
        assert!(waited < Duration::from_millis(100), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_backoff_failure() {
        let mut conn = ScriptedConn::new(|_| Err(timeout()));
        let start = Instant::now();
        let err = receive_with_retry(&Context::background(), &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::RetriesExhausted));
        assert_eq!(conn.reads, 5);

        // Four backoffs: none after the fifth read.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(200), "{waited:?}");
        assert!(waited < Duration::from_millis(250), "{waited:?}");
    }

    #[tokio::test]
    async fn test_receive_backoff_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(25));
        let mut conn = ScriptedConn::new(|_| Err(timeout()));
        let err = receive_with_retry(&ctx, &mut conn).await.unwrap_err();
        assert!(matches!(err, ReceiveError::DeadlineExceeded));
        assert_eq!(conn.reads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_canceled_during_backoff() {
        let (ctx, tx) = Context::with_cancel();
        let policy = RetryPolicy {
            attempts: 5,
            backoff: Duration::from_secs(10),
        };
        let mut conn = ScriptedConn::new(|_| Err(timeout()));

        let canceler = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(true).unwrap();
            tx
        });

        let start = Instant::now();
        let err = policy.receive(&ctx, &mut conn).await.unwrap_err();
        assert!(matches!(err, ReceiveError::Canceled));
        assert_eq!(conn.reads, 1);
        assert!(start.elapsed() < Duration::from_secs(10));
        canceler.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_no_backoff_after_last_attempt() {
        let policy = RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(200),
        };
        let mut conn = ScriptedConn::new(|_| {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "try again"))
        });

        let start = Instant::now();
        let err = policy
            .receive(&Context::background(), &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::RetriesExhausted));
        assert_eq!(conn.reads, 2);
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&timeout()));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
