//! ClickUp REST API client.
//!
//! Creates tasks in a fixed list, optionally creates reminders, and fetches
//! the list's member roster for assignee resolution. The member roster is
//! cached on disk with a TTL so hourly runs do not hammer the endpoint.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::assignees::normalize_name;
use crate::domain::TaskCandidate;
use crate::duedate::to_epoch_millis;
use crate::error::ClientError;
use crate::retry::RetryPolicy;
use crate::state::atomic_write;

use super::{ensure_success, TaskSink};

/// Create-task request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub name: String,
    pub description: String,
    pub priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<i64>,
}

/// Build the create-task payload from a validated candidate
pub fn build_task_payload(candidate: &TaskCandidate, utc_offset_hours: i32) -> TaskPayload {
    let name = if candidate.title.trim().is_empty() {
        "Untitled".to_string()
    } else {
        candidate.title.clone()
    };

    TaskPayload {
        name,
        description: candidate.description.clone(),
        priority: candidate.priority.as_u8(),
        due_date: candidate
            .due_date
            .map(|d| to_epoch_millis(d, utc_offset_hours)),
        assignees: candidate.assignee_ids.clone(),
    }
}

/// ClickUp API client
pub struct ClickUpClient {
    token: String,
    list_id: String,
    team_id: Option<String>,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    /// Member cache location; `None` disables caching
    cache_path: Option<PathBuf>,
    cache_ttl_hours: u32,
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    id: Option<String>,
    task: Option<CreatedTaskRef>,
}

#[derive(Debug, Deserialize)]
struct CreatedTaskRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    members: Vec<ListMember>,
}

#[derive(Debug, Deserialize)]
struct ListMember {
    user: Option<MemberUser>,
}

#[derive(Debug, Deserialize)]
struct MemberUser {
    id: Option<i64>,
    username: Option<String>,
    email: Option<String>,
    initials: Option<String>,
    profile: Option<MemberProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct MemberProfile {
    first_name: Option<String>,
    last_name: Option<String>,
    full_name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemberCacheFile {
    #[serde(default)]
    lists: HashMap<String, MemberCacheRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemberCacheRecord {
    fetched_at: DateTime<Utc>,
    members: HashMap<String, Vec<i64>>,
}

impl ClickUpClient {
    pub fn new(
        token: String,
        list_id: String,
        team_id: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            token,
            list_id,
            team_id,
            base_url: "https://api.clickup.com/api/v2".to_string(),
            client: reqwest::Client::new(),
            retry,
            cache_path: None,
            cache_ttl_hours: 0,
        }
    }

    /// Override the API base URL (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Enable the on-disk member cache
    pub fn with_member_cache(mut self, path: PathBuf, ttl_hours: u32) -> Self {
        self.cache_path = Some(path);
        self.cache_ttl_hours = ttl_hours;
        self
    }

    fn load_cached_members(&self) -> Option<HashMap<String, Vec<i64>>> {
        let path = self.cache_path.as_ref()?;
        if self.cache_ttl_hours == 0 {
            return None;
        }

        let content = std::fs::read_to_string(path).ok()?;
        let cache: MemberCacheFile = serde_json::from_str(&content).ok()?;
        let record = cache.lists.get(&self.list_id)?;

        let age = Utc::now() - record.fetched_at;
        if age > Duration::hours(self.cache_ttl_hours as i64) {
            return None;
        }

        debug!(list_id = %self.list_id, "Using cached ClickUp member map");
        Some(record.members.clone())
    }

    fn save_cached_members(&self, members: &HashMap<String, Vec<i64>>) {
        let Some(path) = self.cache_path.as_ref() else {
            return;
        };
        if self.cache_ttl_hours == 0 {
            return;
        }

        // Preserve records for other lists
        let mut cache: MemberCacheFile = std::fs::read_to_string(path)
            .ok()
            .and_then(|c| serde_json::from_str(&c).ok())
            .unwrap_or_default();

        cache.lists.insert(
            self.list_id.clone(),
            MemberCacheRecord {
                fetched_at: Utc::now(),
                members: members.clone(),
            },
        );

        match serde_json::to_string_pretty(&cache) {
            Ok(content) => {
                if let Err(err) = atomic_write(path, &content) {
                    warn!(path = %path.display(), error = %err, "Failed to save member cache");
                }
            }
            Err(err) => warn!(error = %err, "Failed to serialize member cache"),
        }
    }

    async fn fetch_members(&self) -> Result<HashMap<String, Vec<i64>>, ClientError> {
        let url = format!("{}/list/{}", self.base_url, self.list_id);

        let response: ListResponse = self
            .retry
            .call("clickup list members", || {
                let request = self
                    .client
                    .get(&url)
                    .header("Authorization", self.token.as_str());
                async move {
                    let response = ensure_success(request.send().await?).await?;
                    Ok(response.json::<ListResponse>().await?)
                }
            })
            .await?;

        Ok(build_member_map(response))
    }
}

fn build_member_map(response: ListResponse) -> HashMap<String, Vec<i64>> {
    let mut map: HashMap<String, Vec<i64>> = HashMap::new();

    for member in response.members {
        let Some(user) = member.user else { continue };
        let Some(id) = user.id else { continue };

        let profile = user.profile.unwrap_or_default();
        let candidates = [
            user.username,
            user.email,
            user.initials,
            profile.first_name,
            profile.last_name,
            profile.full_name,
        ];

        for candidate in candidates.into_iter().flatten() {
            let normalized = normalize_name(&candidate);
            if normalized.is_empty() {
                continue;
            }
            let ids = map.entry(normalized).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    map
}

#[async_trait]
impl TaskSink for ClickUpClient {
    async fn create_task(&self, payload: &TaskPayload) -> Result<String, ClientError> {
        let url = format!("{}/list/{}/task", self.base_url, self.list_id);

        let response: CreateTaskResponse = self
            .retry
            .call("clickup create task", || {
                let request = self
                    .client
                    .post(&url)
                    .header("Authorization", self.token.as_str())
                    .json(payload);
                async move {
                    let response = ensure_success(request.send().await?).await?;
                    Ok(response.json::<CreateTaskResponse>().await?)
                }
            })
            .await?;

        response
            .id
            .or(response.task.map(|t| t.id))
            .ok_or_else(|| ClientError::Validation("task created without an id".to_string()))
    }

    async fn create_reminder(
        &self,
        task_id: &str,
        remind_at_ms: i64,
        assignee: Option<i64>,
    ) -> Result<(), ClientError> {
        let Some(team_id) = self.team_id.as_ref() else {
            return Err(ClientError::Validation(
                "reminder creation requires a team id".to_string(),
            ));
        };

        let url = format!("{}/team/{}/reminder", self.base_url, team_id);
        let mut body = serde_json::json!({
            "task_id": task_id,
            "remind_at": remind_at_ms,
        });
        if let Some(assignee) = assignee {
            body["assignee"] = serde_json::json!(assignee);
        }

        self.retry
            .call("clickup create reminder", || {
                let request = self
                    .client
                    .post(&url)
                    .header("Authorization", self.token.as_str())
                    .json(&body);
                async move {
                    ensure_success(request.send().await?).await?;
                    Ok(())
                }
            })
            .await
    }

    async fn member_map(&self) -> Result<HashMap<String, Vec<i64>>, ClientError> {
        if self.list_id.is_empty() {
            return Ok(HashMap::new());
        }

        if let Some(cached) = self.load_cached_members() {
            return Ok(cached);
        }

        // A missing member map only degrades assignee resolution, so
        // fetch failures are downgraded to an empty map.
        match self.fetch_members().await {
            Ok(members) => {
                self.save_cached_members(&members);
                Ok(members)
            }
            Err(err) => {
                warn!(error = %err, "Failed to fetch ClickUp members, continuing without them");
                Ok(HashMap::new())
            }
        }
    }
}
