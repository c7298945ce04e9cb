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

//! Implements [Service] using the Cloud Pub/Sub client library.

use crate::error::Error;
use crate::service::{Delivery, FlowControl, MessageStream, Service, SubscriptionRequest};
use futures::StreamExt as _;
use google_cloud_gax::Result;
use google_cloud_pubsub::client::{Subscriber, SubscriptionAdmin};
use google_cloud_pubsub::model::ExpirationPolicy;
use std::time::Duration;

/// Identifies subscriptions created by this tool.
const CREATED_BY: (&str, &str) = ("created-by", "pulltop");

/// Subscriptions left behind by a failed delete expire after a day without
/// activity. This is the shortest TTL the service accepts.
const EXPIRATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A [Service] backed by Cloud Pub/Sub.
///
/// `SubscriptionAdmin` creates and deletes the subscription, `Subscriber`
/// runs the streaming pull.
#[derive(Clone, Debug)]
pub struct CloudPubSub {
    admin: SubscriptionAdmin,
    subscriber: Subscriber,
}

impl CloudPubSub {
    /// Creates the clients using Application Default Credentials.
    pub async fn new() -> std::result::Result<Self, Error> {
        let admin = SubscriptionAdmin::builder()
            .with_tracing()
            .build()
            .await
            .map_err(Error::Connect)?;
        let subscriber = Subscriber::builder()
            .build()
            .await
            .map_err(Error::Connect)?;
        Ok(Self { admin, subscriber })
    }
}

#[async_trait::async_trait]
impl Service for CloudPubSub {
    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<()> {
        let expiration = ExpirationPolicy::new().set_ttl(google_cloud_wkt::Duration::clamp(
            EXPIRATION_TTL.as_secs() as i64,
            0,
        ));
        let subscription = self
            .admin
            .create_subscription()
            .set_name(&request.subscription)
            .set_topic(&request.topic)
            .set_ack_deadline_seconds(seconds(request.ack_deadline))
            .set_labels([CREATED_BY])
            .set_expiration_policy(expiration)
            .send()
            .await?;
        tracing::debug!("create_subscription returned {subscription:?}");
        Ok(())
    }

    fn streaming_pull(&self, subscription: &str, flow: &FlowControl) -> MessageStream {
        let session = self
            .subscriber
            .streaming_pull(subscription)
            .set_ack_deadline_seconds(seconds(flow.ack_deadline))
            .set_max_outstanding_messages(flow.max_outstanding_messages)
            .start();
        session
            .into_stream()
            .map(|item| {
                item.map(|(message, handler)| Delivery::new(message.data, move || handler.ack()))
            })
            .boxed()
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<()> {
        self.admin
            .delete_subscription()
            .set_subscription(subscription)
            .send()
            .await?;
        Ok(())
    }
}

/// Converts a deadline to the whole seconds used in the Pub/Sub API.
fn seconds(d: Duration) -> i32 {
    i32::try_from(d.as_secs()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Duration::from_secs(10), 10)]
    #[test_case(Duration::from_secs(30), 30)]
    #[test_case(Duration::from_millis(30_999), 30)]
    #[test_case(Duration::from_secs(600), 600)]
    #[test_case(Duration::from_secs(u64::MAX), i32::MAX)]
    fn deadline_seconds(input: Duration, want: i32) {
        assert_eq!(seconds(input), want);
    }

    #[test]
    fn expiration() {
        // The service rejects expiration policies shorter than a day.
        assert!(EXPIRATION_TTL >= Duration::from_secs(86_400));
        assert_eq!(CREATED_BY.1, env!("CARGO_PKG_NAME"));
    }
}
