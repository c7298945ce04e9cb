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

//! Errors that terminate a `pulltop` session.
//!
//! Errors reported by the client libraries are kept as the `source()` of
//! these errors, they are not translated.

/// The fatal errors in a `pulltop` run.
///
/// Failing to delete the subscription is not represented here: deletion is
/// best-effort and its outcome never changes how the process exits. See
/// [Cleanup][crate::session::Cleanup].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The command-line arguments or the environment are incomplete.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The SIGINT or SIGTERM handlers could not be installed.
    #[error("cannot install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    /// The client libraries could not be initialized.
    #[error("cannot initialize the Pub/Sub clients: {0}")]
    Connect(#[source] google_cloud_gax::client_builder::Error),

    /// The service rejected, or we could not send, the create request.
    #[error("cannot create subscription {subscription}: {source}")]
    Create {
        subscription: String,
        #[source]
        source: google_cloud_gax::error::Error,
    },

    /// The streaming pull on an active subscription failed.
    #[error("error receiving messages from {subscription}: {source}")]
    Stream {
        subscription: String,
        #[source]
        source: google_cloud_gax::error::Error,
    },
}

impl Error {
    /// The process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }
}
