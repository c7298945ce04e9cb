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

//! The seam between the session logic and the Pub/Sub service.
//!
//! The session only needs three operations from the service: create a
//! subscription, stream its messages, and delete it. Keeping them behind a
//! trait lets the unit tests drive the session with a mock.

use bytes::Bytes;
use futures::stream::BoxStream;
use google_cloud_gax::Result;
use std::time::Duration;

/// A stream of messages from a subscription.
///
/// The stream stays open until it is dropped, or until the service reports a
/// permanent error.
pub type MessageStream = BoxStream<'static, Result<Delivery>>;

/// The parameters to create a subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionRequest {
    /// The fully qualified topic name, `projects/{project}/topics/{topic}`.
    pub topic: String,
    /// The fully qualified subscription name,
    /// `projects/{project}/subscriptions/{subscription}`.
    pub subscription: String,
    /// How long the service waits for an ack before redelivering a message.
    pub ack_deadline: Duration,
}

/// Flow control for a streaming pull.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowControl {
    /// The maximum number of messages delivered but not yet acknowledged.
    pub max_outstanding_messages: i64,
    /// The ack deadline requested for the stream.
    pub ack_deadline: Duration,
}

/// A message payload and the means to acknowledge it.
pub struct Delivery {
    pub data: Bytes,
    ack: Box<dyn FnOnce() + Send>,
}

impl Delivery {
    pub fn new<D, F>(data: D, ack: F) -> Self
    where
        D: Into<Bytes>,
        F: FnOnce() + Send + 'static,
    {
        Self {
            data: data.into(),
            ack: Box::new(ack),
        }
    }

    /// Acknowledges the message.
    ///
    /// The acknowledgement is best effort, the service may still redeliver
    /// the message.
    pub fn ack(self) {
        (self.ack)()
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

/// The operations `pulltop` needs from Pub/Sub.
#[async_trait::async_trait]
pub trait Service: std::fmt::Debug + Send + Sync {
    /// Creates a pull subscription.
    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<()>;

    /// Starts receiving messages from `subscription`.
    ///
    /// Errors opening the stream are reported as the first item.
    fn streaming_pull(&self, subscription: &str, flow: &FlowControl) -> MessageStream;

    /// Deletes `subscription`.
    async fn delete_subscription(&self, subscription: &str) -> Result<()>;
}
