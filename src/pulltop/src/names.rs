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

//! Resource names used by `pulltop`.

use crate::error::Error;
use uuid::Uuid;

/// The user name used when the environment does not provide one.
pub const DEFAULT_USER: &str = "pulltop";

/// Returns the name of the invoking user.
///
/// The user name has no access-control meaning, it only makes subscription
/// names easier to trace back to whoever created them.
pub fn current_user() -> String {
    user_from(|name| std::env::var(name).ok())
}

fn user_from<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ["USER", "USERNAME"]
        .into_iter()
        .filter_map(lookup)
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string())
}

/// Generates a new subscription id for `user` reading from `topic`.
///
/// The id has the form `{user}-{topic}-{uuid}`, where any `/` in the topic
/// name is replaced by `-`. The random component makes concurrent runs for
/// the same user and topic use different subscriptions.
pub fn subscription_id(user: &str, topic: &str) -> String {
    subscription_id_with(user, topic, Uuid::new_v4())
}

fn subscription_id_with(user: &str, topic: &str, id: Uuid) -> String {
    format!("{user}-{}-{id}", topic.replace('/', "-"))
}

/// A topic and the project that owns it.
#[derive(Clone, Debug, PartialEq)]
pub struct Topic {
    pub project: String,
    /// The fully qualified name, `projects/{project}/topics/{topic}`.
    pub name: String,
}

impl Topic {
    /// Resolves a topic argument.
    ///
    /// Names starting with `projects/` are used as-is, the service reports
    /// any other problem with them. Their project is the first path segment,
    /// or `project` if that segment is empty. Short topic ids are qualified
    /// with `project`.
    pub fn resolve(topic: &str, project: Option<&str>) -> Result<Self, Error> {
        let project = project.filter(|p| !p.is_empty());
        if let Some(rest) = topic.strip_prefix("projects/") {
            let owner = rest.split('/').next().filter(|p| !p.is_empty());
            return match owner.or(project) {
                Some(p) => Ok(Self {
                    project: p.to_string(),
                    name: topic.to_string(),
                }),
                None => Err(Error::Config(format!(
                    "no project in topic name `{topic}`, use --project or set GOOGLE_CLOUD_PROJECT"
                ))),
            };
        }
        match project {
            Some(p) => Ok(Self {
                project: p.to_string(),
                name: format!("projects/{p}/topics/{topic}"),
            }),
            None => Err(Error::Config(format!(
                "no project for topic `{topic}`, use a fully qualified topic name, --project, or set GOOGLE_CLOUD_PROJECT"
            ))),
        }
    }

    /// The fully qualified name of subscription `id` in the topic's project.
    pub fn subscription_name(&self, id: &str) -> String {
        format!("projects/{}/subscriptions/{id}", self.project)
    }
}
