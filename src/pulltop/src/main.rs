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

//! Stream messages from a Cloud Pub/Sub topic to standard output.

mod args;
mod error;
mod names;
mod pubsub;
mod service;
mod session;
mod signals;

use args::Args;
use clap::Parser;
use error::Error;
use names::Topic;
use service::{FlowControl, SubscriptionRequest};
use session::{SubscriptionContext, Trigger};
use signals::Signals;
use std::process::ExitCode;
use std::time::Duration;

/// The maximum number of messages received but not yet acknowledged.
const MAX_OUTSTANDING_MESSAGES: i64 = 100;

/// How long the service waits for an acknowledgement before it redelivers a
/// message.
const ACK_DEADLINE: Duration = Duration::from_secs(30);

/// How long to wait for the subscription to be deleted on exit.
const DELETE_TIMEOUT: Duration = Duration::from_secs(5);

const DESCRIPTION: &str = concat!(
    "Creates a temporary subscription on a Cloud Pub/Sub topic and prints the",
    " data of each message it receives to standard output, one message per line.",
    " Messages are acknowledged as soon as they are printed.",
    " The subscription is deleted when the program exits, or when it receives",
    " SIGINT or SIGTERM."
);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(parse_error_exit_code(&e));
        }
    };
    enable_tracing();

    match pulltop(args).await {
        Ok(trigger) => ExitCode::from(trigger.exit_code()),
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn pulltop(args: Args) -> Result<Trigger, Error> {
    args.validate().map_err(|e| Error::Config(e.to_string()))?;
    tracing::info!("Configuration: {args:?}");

    let topic = Topic::resolve(&args.topic, args.project.as_deref())?;
    let id = names::subscription_id(&names::current_user(), &args.topic);
    let request = SubscriptionRequest {
        subscription: topic.subscription_name(&id),
        topic: topic.name,
        ack_deadline: ACK_DEADLINE,
    };
    let flow = FlowControl {
        max_outstanding_messages: MAX_OUTSTANDING_MESSAGES,
        ack_deadline: ACK_DEADLINE,
    };

    let mut signals = Signals::register().map_err(Error::Signals)?;
    let service = pubsub::CloudPubSub::new().await?;
    let context = SubscriptionContext::new(&service, DELETE_TIMEOUT);
    let outcome = session::run(
        &context,
        &request,
        &flow,
        std::io::stdout(),
        signals.recv(),
    )
    .await;
    // The exit path. A no-op when `run()` already deleted the subscription.
    context.shutdown().await;
    outcome
}

/// The exit code when the command-line arguments cannot be parsed.
///
/// Usage errors exit with 1, instead of clap's default of 2. `--help` and
/// `--version` are reported as errors by clap, but they exit with 0.
fn parse_error_exit_code(e: &clap::Error) -> u8 {
    if e.use_stderr() { 1 } else { 0 }
}

fn enable_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::filter::LevelFilter;

    // Standard output is reserved for message payloads.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_level(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
