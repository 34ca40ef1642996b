//! Notification Dispatcher (component C8) — the worker-pool side.
//!
//! A bounded `mpsc` queue drained by a small pool of `tokio::spawn`ed
//! workers, mirroring the teacher's background-task pattern in
//! `start_mempool_revocation_watcher`. Each worker retries a failed send
//! with bounded backoff; a digest batch is only marked SENT once, never
//! re-sent.

use courtcard_core::notify::{MailTransport, Notification};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

const MAX_SEND_RETRIES: u32 = 3;

/// Spawn `worker_count` tasks pulling from `rx` and sending through
/// `transport`. The queue is a single `mpsc::Receiver`; Tokio's mpsc
/// doesn't support multiple consumers directly, so workers share the
/// receiver behind a `tokio::sync::Mutex` and take turns.
pub fn spawn_workers(
    rx: Receiver<Notification>,
    transport: Arc<dyn MailTransport>,
    worker_count: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    (0..worker_count.max(1))
        .map(|worker_id| {
            let rx = rx.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                info!(worker_id, "notification worker started");
                loop {
                    let notification = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(notification) = notification else {
                        info!(worker_id, "notification queue closed, worker exiting");
                        break;
                    };
                    send_with_retry(transport.as_ref(), &notification).await;
                }
            })
        })
        .collect()
}

async fn send_with_retry(transport: &dyn MailTransport, notification: &Notification) {
    let mut attempt = 0;
    loop {
        match transport.send(notification).await {
            Ok(()) => return,
            Err(err) if attempt < MAX_SEND_RETRIES => {
                attempt += 1;
                warn!(attempt, error = %err, "notification send failed, retrying");
                let backoff_ms = 200u64 * 2u64.pow(attempt);
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            }
            Err(err) => {
                warn!(error = %err, "notification send failed after retries, dropping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MailTransport for CountingTransport {
        async fn send(&self, _notification: &Notification) -> Result<(), String> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn workers_drain_the_queue() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let sent = Arc::new(AtomicUsize::new(0));
        let transport: Arc<dyn MailTransport> = Arc::new(CountingTransport { sent: sent.clone() });
        let handles = spawn_workers(rx, transport, 2);

        for _ in 0..5 {
            tx.send(courtcard_core::notify::Notification::OfficerDigest {
                digest: courtcard_core::model::DigestBatch {
                    id: uuid::Uuid::new_v4(),
                    officer_id: uuid::Uuid::new_v4(),
                    date: chrono::Utc::now().date_naive(),
                    session_ids: vec![],
                    status: courtcard_core::model::DigestStatus::Pending,
                    sent_at: None,
                    attempts: 0,
                },
                officer_email: "o@court.gov".into(),
                card_numbers: vec![],
            })
            .await
            .unwrap();
        }
        drop(tx);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(sent.load(Ordering::SeqCst), 5);
    }
}
