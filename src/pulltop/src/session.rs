// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The lifecycle of the subscription owned by a `pulltop` run.
//!
//! A run creates one subscription, prints every message it receives, and
//! deletes the subscription when the run ends. The subscription is held by a
//! [SubscriptionContext], which is the only place that knows whether there is
//! anything to delete.

use crate::error::Error;
use crate::service::{Delivery, FlowControl, Service, SubscriptionRequest};
use futures::StreamExt as _;
use std::future::Future;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// The reason a session ended without a fatal error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// The message stream ended.
    Exit,
    /// The process received SIGINT.
    Interrupt,
    /// The process received SIGTERM.
    Terminate,
}

impl Trigger {
    /// The process exit code for this trigger.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Exit => 0,
            Self::Interrupt | Self::Terminate => 1,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exit => write!(f, "end of stream"),
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// The outcome of [SubscriptionContext::shutdown].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cleanup {
    /// There was no subscription to delete.
    Idle,
    /// The subscription was deleted.
    Deleted,
    /// The subscription could not be deleted. A warning was logged.
    Failed,
}

/// Holds the subscription created by this process, if any.
#[derive(Debug)]
pub struct SubscriptionContext<'a, S: ?Sized> {
    service: &'a S,
    delete_timeout: Duration,
    held: Mutex<Option<String>>,
}

impl<'a, S> SubscriptionContext<'a, S>
where
    S: Service + ?Sized,
{
    pub fn new(service: &'a S, delete_timeout: Duration) -> Self {
        Self {
            service,
            delete_timeout,
            held: Mutex::new(None),
        }
    }

    #[cfg(test)]
    /// The name of the subscription held by this context.
    fn subscription(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Creates the subscription and holds on to it.
    pub async fn create(&self, request: &SubscriptionRequest) -> Result<(), Error> {
        tracing::info!(
            "creating subscription {} on {}",
            request.subscription,
            request.topic
        );
        self.service
            .create_subscription(request)
            .await
            .map_err(|source| Error::Create {
                subscription: request.subscription.clone(),
                source,
            })?;
        let previous = self.lock().replace(request.subscription.clone());
        debug_assert!(previous.is_none(), "{previous:?} was never deleted");
        Ok(())
    }

    /// Deletes the subscription, if one is held.
    ///
    /// Only the first call after a successful [create][Self::create] sends a
    /// delete request, any other call is a no-op. Failures are logged and
    /// never retried.
    pub async fn shutdown(&self) -> Cleanup {
        let Some(subscription) = self.lock().take() else {
            return Cleanup::Idle;
        };
        let delete = self.service.delete_subscription(&subscription);
        match tokio::time::timeout(self.delete_timeout, delete).await {
            Ok(Ok(())) => {
                tracing::info!("deleted subscription {subscription}");
                Cleanup::Deleted
            }
            Ok(Err(e)) => {
                tracing::warn!("could not delete subscription {subscription}: {e}");
                Cleanup::Failed
            }
            Err(e) => {
                tracing::warn!("could not delete subscription {subscription}: {e}");
                Cleanup::Failed
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        // The guarded value is always consistent, a poisoned lock is usable.
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Runs a session: create the subscription, print its messages to `out`
/// until `shutdown` resolves or the stream ends, then delete the
/// subscription.
///
/// The subscription is deleted on every path where it was created,
/// including stream errors.
pub async fn run<S, W, F>(
    context: &SubscriptionContext<'_, S>,
    request: &SubscriptionRequest,
    flow: &FlowControl,
    mut out: W,
    shutdown: F,
) -> Result<Trigger, Error>
where
    S: Service + ?Sized,
    W: Write,
    F: Future<Output = Trigger>,
{
    tokio::pin!(shutdown);
    let create = context.create(request);
    tokio::pin!(create);

    let early = tokio::select! {
        created = &mut create => {
            created?;
            None
        }
        trigger = &mut shutdown => Some(trigger),
    };
    if let Some(trigger) = early {
        // The service may create the subscription even if we stop waiting.
        tracing::info!(
            "{trigger} received while creating {}, waiting for the request to complete",
            request.subscription
        );
        return match tokio::time::timeout(context.delete_timeout, create).await {
            Ok(created) => {
                context.shutdown().await;
                created.map(|_| trigger)
            }
            Err(e) => {
                tracing::warn!(
                    "could not delete subscription {}: the create request did not complete: {e}",
                    request.subscription
                );
                Ok(trigger)
            }
        };
    }

    let subscription = &request.subscription;
    let mut stream = context.service.streaming_pull(subscription, flow);
    let mut count = 0_u64;
    let outcome = loop {
        tokio::select! {
            trigger = &mut shutdown => break Ok(trigger),
            item = stream.next() => match item {
                None => break Ok(Trigger::Exit),
                Some(Ok(delivery)) => {
                    deliver(&mut out, delivery);
                    count += 1;
                }
                Some(Err(source)) => {
                    break Err(Error::Stream {
                        subscription: subscription.clone(),
                        source,
                    })
                }
            },
        }
    };
    drop(stream);
    match &outcome {
        Ok(trigger) => tracing::info!("{trigger} after receiving {count} messages"),
        Err(_) => tracing::info!("stream error after receiving {count} messages"),
    }

    context.shutdown().await;
    outcome
}

/// Prints a message payload, followed by a newline, and acknowledges it.
///
/// The message is acknowledged even if writing fails.
pub fn deliver<W: Write>(out: &mut W, delivery: Delivery) {
    if let Err(e) = write_line(out, &delivery.data) {
        tracing::warn!("cannot write message to standard output: {e}");
    }
    delivery.ack();
}

fn write_line<W: Write>(out: &mut W, data: &[u8]) -> std::io::Result<()> {
    out.write_all(data)?;
    out.write_all(b"\n")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MessageStream;
    use crate::service::tests::{MockService, counted, service_error};
    use google_cloud_gax::Result as GaxResult;
    use google_cloud_gax::error::rpc::Code;
    use std::future::{pending, ready};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOPIC: &str = "projects/p/topics/t";
    const SUBSCRIPTION: &str = "projects/p/subscriptions/alice-t-1234";
    const DELETE_TIMEOUT: Duration = Duration::from_secs(5);

    fn request() -> SubscriptionRequest {
        SubscriptionRequest {
            topic: TOPIC.to_string(),
            subscription: SUBSCRIPTION.to_string(),
            ack_deadline: Duration::from_secs(30),
        }
    }

    fn flow() -> FlowControl {
        FlowControl {
            max_outstanding_messages: 100,
            ack_deadline: Duration::from_secs(30),
        }
    }

    fn expect_create(mock: &mut MockService) {
        mock.expect_create_subscription()
            .withf(|r| *r == request())
            .times(1)
            .returning(|_| Ok(()));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Trigger::Exit.exit_code(), 0);
        assert_eq!(Trigger::Interrupt.exit_code(), 1);
        assert_eq!(Trigger::Terminate.exit_code(), 1);
        assert_eq!(Trigger::Interrupt.to_string(), "SIGINT");
        assert_eq!(Trigger::Terminate.to_string(), "SIGTERM");
    }

    #[tokio::test]
    async fn messages_in_order() -> anyhow::Result<()> {
        let acks = Arc::new(AtomicUsize::new(0));
        let messages: Vec<GaxResult<Delivery>> = vec![
            Ok(counted("a", &acks)),
            Ok(counted("b", &acks)),
            Ok(counted("c", &acks)),
        ];

        let mut mock = MockService::new();
        expect_create(&mut mock);
        mock.expect_streaming_pull()
            .withf(|s, f| s == SUBSCRIPTION && *f == flow())
            .times(1)
            .return_once(move |_, _| futures::stream::iter(messages).boxed());
        mock.expect_delete_subscription()
            .withf(|s| s == SUBSCRIPTION)
            .times(1)
            .returning(|_| Ok(()));

        let context = SubscriptionContext::new(&mock, DELETE_TIMEOUT);
        let mut out = Vec::new();
        let got = run(&context, &request(), &flow(), &mut out, pending()).await?;
        assert_eq!(got, Trigger::Exit);
        assert_eq!(String::from_utf8(out)?, "a\nb\nc\n");
        assert_eq!(acks.load(Ordering::SeqCst), 3);
        assert_eq!(context.subscription(), None);
        Ok(())
    }

    #[tokio::test]
    async fn create_error() -> anyhow::Result<()> {
        let mut mock = MockService::new();
        mock.expect_create_subscription()
            .times(1)
            .returning(|_| Err(service_error(Code::NotFound, "topic not found")));
        mock.expect_streaming_pull().never();
        mock.expect_delete_subscription().never();

        let context = SubscriptionContext::new(&mock, DELETE_TIMEOUT);
        let mut out = Vec::new();
        let got = run(&context, &request(), &flow(), &mut out, pending()).await;
        assert!(
            matches!(&got, Err(Error::Create { subscription, .. }) if subscription == SUBSCRIPTION),
            "{got:?}"
        );
        assert!(out.is_empty(), "{out:?}");
        assert_eq!(context.subscription(), None);
        assert_eq!(context.shutdown().await, Cleanup::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn stream_error_deletes_subscription() -> anyhow::Result<()> {
        let acks = Arc::new(AtomicUsize::new(0));
        let messages: Vec<GaxResult<Delivery>> = vec![
            Ok(counted("a", &acks)),
            Err(service_error(Code::Unavailable, "stream closed")),
            Ok(counted("b", &acks)),
        ];

        let mut mock = MockService::new();
        expect_create(&mut mock);
        mock.expect_streaming_pull()
            .times(1)
            .return_once(move |_, _| futures::stream::iter(messages).boxed());
        mock.expect_delete_subscription()
            .withf(|s| s == SUBSCRIPTION)
            .times(1)
            .returning(|_| Ok(()));

        let context = SubscriptionContext::new(&mock, DELETE_TIMEOUT);
        let mut out = Vec::new();
        let got = run(&context, &request(), &flow(), &mut out, pending()).await;
        let err = got.expect_err("stream errors are fatal");
        assert!(matches!(err, Error::Stream { .. }), "{err:?}");
        assert_eq!(err.exit_code(), 1);
        assert_eq!(String::from_utf8(out)?, "a\n");
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(context.subscription(), None);
        Ok(())
    }

    #[tokio::test]
    async fn interrupt() -> anyhow::Result<()> {
        let mut mock = MockService::new();
        expect_create(&mut mock);
        // The signal may win the race with the create request, in which case
        // no stream is started.
        mock.expect_streaming_pull()
            .times(0..=1)
            .returning(|_, _| futures::stream::pending().boxed());
        mock.expect_delete_subscription()
            .withf(|s| s == SUBSCRIPTION)
            .times(1)
            .returning(|_| Ok(()));

        let context = SubscriptionContext::new(&mock, DELETE_TIMEOUT);
        let mut out = Vec::new();
        let got = run(
            &context,
            &request(),
            &flow(),
            &mut out,
            ready(Trigger::Interrupt),
        )
        .await?;
        assert_eq!(got, Trigger::Interrupt);
        assert_eq!(got.exit_code(), 1);
        assert_eq!(context.subscription(), None);
        Ok(())
    }

    #[tokio::test]
    async fn delete_failure_keeps_exit_code() -> anyhow::Result<()> {
        let mut mock = MockService::new();
        expect_create(&mut mock);
        mock.expect_streaming_pull()
            .times(1)
            .returning(|_, _| futures::stream::empty().boxed());
        mock.expect_delete_subscription()
            .times(1)
            .returning(|_| Err(service_error(Code::PermissionDenied, "denied")));

        let context = SubscriptionContext::new(&mock, DELETE_TIMEOUT);
        let mut out = Vec::new();
        let got = run(&context, &request(), &flow(), &mut out, pending()).await?;
        assert_eq!(got, Trigger::Exit);
        assert_eq!(got.exit_code(), 0);
        assert_eq!(context.subscription(), None);
        assert_eq!(context.shutdown().await, Cleanup::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() -> anyhow::Result<()> {
        let mut mock = MockService::new();
        expect_create(&mut mock);
        mock.expect_delete_subscription()
            .withf(|s| s == SUBSCRIPTION)
            .times(1)
            .returning(|_| Ok(()));

        let context = SubscriptionContext::new(&mock, DELETE_TIMEOUT);
        assert_eq!(context.shutdown().await, Cleanup::Idle);
        context.create(&request()).await?;
        assert_eq!(context.subscription().as_deref(), Some(SUBSCRIPTION));
        assert_eq!(context.shutdown().await, Cleanup::Deleted);
        assert_eq!(context.shutdown().await, Cleanup::Idle);
        assert_eq!(context.subscription(), None);
        Ok(())
    }

    #[tokio::test]
    async fn failed_delete_is_not_retried() -> anyhow::Result<()> {
        let mut mock = MockService::new();
        expect_create(&mut mock);
        mock.expect_delete_subscription()
            .times(1)
            .returning(|_| Err(service_error(Code::Unavailable, "try again")));

        let context = SubscriptionContext::new(&mock, DELETE_TIMEOUT);
        context.create(&request()).await?;
        assert_eq!(context.shutdown().await, Cleanup::Failed);
        assert_eq!(context.shutdown().await, Cleanup::Idle);
        Ok(())
    }

    /// A service with slow operations, for tests that depend on timing.
    #[derive(Debug, Default)]
    struct Slow {
        create_delay: Duration,
        hang_on_delete: bool,
        pulls: AtomicUsize,
        deletes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Service for Slow {
        async fn create_subscription(&self, _request: &SubscriptionRequest) -> GaxResult<()> {
            tokio::time::sleep(self.create_delay).await;
            Ok(())
        }

        fn streaming_pull(&self, _subscription: &str, _flow: &FlowControl) -> MessageStream {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            futures::stream::pending().boxed()
        }

        async fn delete_subscription(&self, _subscription: &str) -> GaxResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.hang_on_delete {
                pending::<()>().await;
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delete_timeout() -> anyhow::Result<()> {
        let service = Slow {
            hang_on_delete: true,
            ..Default::default()
        };
        let context = SubscriptionContext::new(&service, DELETE_TIMEOUT);
        context.create(&request()).await?;

        let start = tokio::time::Instant::now();
        assert_eq!(context.shutdown().await, Cleanup::Failed);
        assert!(start.elapsed() >= DELETE_TIMEOUT, "{:?}", start.elapsed());
        assert_eq!(service.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(context.subscription(), None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn signal_during_create() -> anyhow::Result<()> {
        let service = Slow {
            create_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let context = SubscriptionContext::new(&service, DELETE_TIMEOUT);
        let mut out = Vec::new();
        let got = run(
            &context,
            &request(),
            &flow(),
            &mut out,
            ready(Trigger::Terminate),
        )
        .await?;
        assert_eq!(got, Trigger::Terminate);
        assert_eq!(service.pulls.load(Ordering::SeqCst), 0);
        assert_eq!(service.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(context.subscription(), None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn signal_during_slow_create() -> anyhow::Result<()> {
        let service = Slow {
            create_delay: Duration::from_secs(3600),
            ..Default::default()
        };
        let context = SubscriptionContext::new(&service, DELETE_TIMEOUT);
        let mut out = Vec::new();
        let start = tokio::time::Instant::now();
        let got = run(
            &context,
            &request(),
            &flow(),
            &mut out,
            ready(Trigger::Interrupt),
        )
        .await?;
        assert_eq!(got, Trigger::Interrupt);
        let elapsed = start.elapsed();
        assert!(elapsed >= DELETE_TIMEOUT, "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3600), "{elapsed:?}");
        assert_eq!(service.pulls.load(Ordering::SeqCst), 0);
        assert_eq!(service.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(context.subscription(), None);
        Ok(())
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn deliver_acks_on_write_failure() {
        let acks = Arc::new(AtomicUsize::new(0));
        deliver(&mut BrokenPipe, counted("lost", &acks));
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deliver_binary_payload() {
        let acks = Arc::new(AtomicUsize::new(0));
        let data = bytes::Bytes::from_static(&[0xff, 0x00, 0x41]);
        let delivery = {
            let acks = acks.clone();
            Delivery::new(data, move || {
                acks.fetch_add(1, Ordering::SeqCst);
            })
        };
        let mut out = Vec::new();
        deliver(&mut out, delivery);
        assert_eq!(out, vec![0xff, 0x00, 0x41, b'\n']);
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }
}
