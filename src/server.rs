use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::{CapacityGuard, GuardError};
use crate::limits::MAX_REQUEST_LINE_LEN;
use crate::model::{AvailabilityRequest, ReserveRequest};

/// One request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Reserve(ReserveRequest),
    CheckAvailability(AvailabilityRequest),
}

/// One reply line: the hotel ids of the result, or an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Hotels { hotel_ids: Vec<String> },
    Error { error: ErrorBody },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl Reply {
    fn error(kind: &str, message: impl ToString) -> Self {
        Reply::Error { error: ErrorBody { kind: kind.to_string(), message: message.to_string() } }
    }
}

impl From<GuardError> for Reply {
    fn from(e: GuardError) -> Self {
        Reply::error(e.kind(), &e)
    }
}

/// Serve one connection: read request lines, answer each in order. Returns
/// when the peer hangs up or `shutdown` fires between requests. A request
/// already running when `shutdown` fires is answered; `hard_stop` cancels it.
pub async fn process_connection<S>(
    socket: S,
    guard: Arc<CapacityGuard>,
    shutdown: CancellationToken,
    hard_stop: CancellationToken,
) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_LEN));

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = lines.next() => next,
        };
        let reply = match next {
            None => return Ok(()),
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => handle_line(&guard, &line, &hard_stop).await,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!("request line over {MAX_REQUEST_LINE_LEN} bytes discarded");
                Reply::error("validation", "request line too long")
            }
            Some(Err(e)) => return Err(e),
        };
        let encoded = match serde_json::to_string(&reply) {
            Ok(s) => s,
            Err(e) => serde_json::to_string(&Reply::error("internal", e))
                .unwrap_or_else(|_| r#"{"error":{"kind":"internal","message":"encode"}}"#.into()),
        };
        lines.send(encoded).await?;
    }
}

/// Decode one request line and run it against the guard.
pub async fn handle_line(guard: &CapacityGuard, line: &str, cancel: &CancellationToken) -> Reply {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            debug!("undecodable request: {e}");
            return Reply::error("bad_request", e);
        }
    };
    match request {
        Request::Reserve(req) => match guard.reserve(&req, cancel).await {
            Ok(outcome) => Reply::Hotels { hotel_ids: outcome.hotel_ids() },
            Err(e) => e.into(),
        },
        Request::CheckAvailability(req) => match guard.check_availability(&req, cancel).await {
            Ok(available) => {
                let mut hotel_ids: Vec<String> = available.into_iter().collect();
                hotel_ids.sort();
                Reply::Hotels { hotel_ids }
            }
            Err(e) => e.into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::engine::GuardOptions;
    use crate::error::StorageError;
    use crate::ledger::{DurableStore, NightLedger};
    use crate::model::{BookingRow, Night};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Journal-backed ledger whose counts take `delay`.
    struct SlowLedger {
        inner: Arc<DurableStore>,
        delay: Duration,
    }

    #[async_trait]
    impl NightLedger for SlowLedger {
        async fn count_booked(&self, hotel_id: &str, night: Night) -> Result<u64, StorageError> {
            tokio::time::sleep(self.delay).await;
            self.inner.count_booked(hotel_id, night).await
        }

        async fn insert(&self, row: BookingRow) -> Result<(), StorageError> {
            self.inner.insert(row).await
        }

        async fn insert_all(&self, rows: Vec<BookingRow>) -> Result<(), StorageError> {
            self.inner.insert_all(rows).await
        }
    }

    fn test_journal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_server");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn guard(name: &str) -> Arc<CapacityGuard> {
        let store = Arc::new(DurableStore::open(&test_journal_path(name)).unwrap());
        store.provision("H1", 10).await.unwrap();
        store.provision("H2", 2).await.unwrap();
        Arc::new(CapacityGuard::new(
            Arc::new(MemoryCache::new()),
            store.clone(),
            store,
            GuardOptions::default(),
        ))
    }

    async fn slow_guard(name: &str, delay: Duration) -> Arc<CapacityGuard> {
        let store = Arc::new(DurableStore::open(&test_journal_path(name)).unwrap());
        store.provision("H1", 10).await.unwrap();
        let ledger = Arc::new(SlowLedger { inner: store.clone(), delay });
        Arc::new(CapacityGuard::new(Arc::new(MemoryCache::new()), store, ledger, GuardOptions::default()))
    }

    const SLOW_RESERVE: &str = concat!(
        r#"{"op":"reserve","hotel_id":"H1","customer_name":"ann","in_date":"2024-03-01","out_date":"2024-03-03","room_number":1}"#,
        "\n"
    );

    fn reply(json: &str) -> Reply {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn request_lines_decode() {
        let req: Request = serde_json::from_str(
            r#"{"op":"reserve","hotel_id":"H1","customer_name":"ann","in_date":"2024-01-01","out_date":"2024-01-02","room_number":2}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::Reserve(ref r) if r.room_number == 2));

        let req: Request = serde_json::from_str(
            r#"{"op":"check_availability","hotel_ids":["H1","H2"],"in_date":"2024-01-01","out_date":"2024-01-02","room_number":1}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::CheckAvailability(ref r) if r.hotel_ids.len() == 2));
    }

    #[test]
    fn replies_encode() {
        let ok = Reply::Hotels { hotel_ids: vec!["H1".into()] };
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"hotel_ids":["H1"]}"#);

        let err: Reply = GuardError::UnknownHotel("H9".into()).into();
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"error":{"kind":"unknown_hotel","message":"unknown hotel: H9"}}"#
        );
    }

    #[tokio::test]
    async fn handle_line_runs_requests() {
        let guard = guard("handle_line.journal").await;
        let never = CancellationToken::new();

        let r = handle_line(
            &guard,
            r#"{"op":"reserve","hotel_id":"H2","customer_name":"ann","in_date":"2024-01-01","out_date":"2024-01-03","room_number":2}"#,
            &never,
        )
        .await;
        assert_eq!(r, reply(r#"{"hotel_ids":["H2"]}"#));

        let r = handle_line(
            &guard,
            r#"{"op":"check_availability","hotel_ids":["H2","H1","H3"],"in_date":"2024-01-02","out_date":"2024-01-04","room_number":1}"#,
            &never,
        )
        .await;
        assert_eq!(r, reply(r#"{"hotel_ids":["H1"]}"#));

        let r = handle_line(&guard, r#"{"op":"dance"}"#, &never).await;
        assert!(matches!(r, Reply::Error { ref error } if error.kind == "bad_request"));

        let r = handle_line(
            &guard,
            r#"{"op":"reserve","hotel_id":"H1","customer_name":"ann","in_date":"2024-01-03","out_date":"2024-01-01","room_number":1}"#,
            &never,
        )
        .await;
        assert!(matches!(r, Reply::Error { ref error } if error.kind == "validation"));
    }

    #[tokio::test]
    async fn connection_answers_in_order() {
        let guard = guard("connection.journal").await;
        let (client, server) = tokio::io::duplex(64 * 1024);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(process_connection(server, guard, shutdown.clone(), CancellationToken::new()));

        let (read, mut write) = tokio::io::split(client);
        let mut replies = BufReader::new(read).lines();

        write
            .write_all(
                concat!(
                    r#"{"op":"reserve","hotel_id":"H1","customer_name":"ann","in_date":"2024-02-01","out_date":"2024-02-02","room_number":10}"#,
                    "\n\n",
                    r#"{"op":"reserve","hotel_id":"H1","customer_name":"bo","in_date":"2024-02-01","out_date":"2024-02-02","room_number":1}"#,
                    "\n",
                    "not json\n",
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let first = replies.next_line().await.unwrap().unwrap();
        assert_eq!(first, r#"{"hotel_ids":["H1"]}"#);
        let second = replies.next_line().await.unwrap().unwrap();
        assert_eq!(second, r#"{"hotel_ids":[]}"#);
        let third = replies.next_line().await.unwrap().unwrap();
        assert!(third.contains(r#""kind":"bad_request""#));

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn peer_hangup_ends_connection() {
        let guard = guard("hangup.journal").await;
        let (client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(process_connection(
            server,
            guard,
            CancellationToken::new(),
            CancellationToken::new(),
        ));
        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_lets_running_request_finish() {
        let guard = slow_guard("shutdown_busy.journal", Duration::from_millis(100)).await;
        let (client, server) = tokio::io::duplex(1024);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(process_connection(server, guard, shutdown.clone(), CancellationToken::new()));

        let (read, mut write) = tokio::io::split(client);
        let mut replies = BufReader::new(read).lines();
        write.write_all(SLOW_RESERVE.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let answer = replies.next_line().await.unwrap().unwrap();
        assert_eq!(answer, r#"{"hotel_ids":["H1"]}"#);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn hard_stop_cancels_running_request() {
        let guard = slow_guard("hard_stop.journal", Duration::from_secs(30)).await;
        let (client, server) = tokio::io::duplex(1024);
        let shutdown = CancellationToken::new();
        let hard_stop = CancellationToken::new();
        let task = tokio::spawn(process_connection(server, guard, shutdown.clone(), hard_stop.clone()));

        let (read, mut write) = tokio::io::split(client);
        let mut replies = BufReader::new(read).lines();
        write.write_all(SLOW_RESERVE.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        hard_stop.cancel();

        let answer = tokio::time::timeout(Duration::from_secs(5), replies.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(answer.contains(r#""kind":"cancelled""#), "{answer}");
        task.await.unwrap().unwrap();
    }
}
