//! Linear GraphQL client.
//!
//! Team ids, team members and label ids are looked up lazily and cached for
//! the lifetime of the client (one run).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::TrackerError;
use crate::tracker::{Assignee, Issue, IssueLabel, IssueState, IssueTracker};

/// Issues per page when listing the triage queue.
const PAGE_SIZE: u32 = 50;

/// Colour for labels this client creates.
const LABEL_COLOR: &str = "#f59e0b";

/// Spreadsheet spelling → Linear display name, for owners whose table entry
/// drops diacritics.
pub const DEFAULT_OWNER_ALIASES: &[(&str, &str)] = &[
    ("Vladimir Krska", "Vladimír Kriška"),
    ("Zuzana Bednarova", "Zuzana Bednářová"),
    ("Jiri Zavora", "Jiří Závora"),
];

const ISSUE_FIELDS: &str = r#"
fragment IssueFields on Issue {
    id
    identifier
    title
    description
    url
    team { id }
    state { name type }
    assignee { id name }
    labels { nodes { id name } }
}
"#;

const TEAM_QUERY: &str = r#"
query TeamByKey($key: String!) {
    teams(filter: { key: { eq: $key } }) {
        nodes { id key name }
    }
}
"#;

const TRIAGE_ISSUES_QUERY: &str = r#"
query TriageIssues($teamId: String!, $first: Int!, $after: String) {
    team(id: $teamId) {
        issues(first: $first, after: $after, filter: { state: { type: { eq: "triage" } } }) {
            nodes { ...IssueFields }
            pageInfo { hasNextPage endCursor }
        }
    }
}
"#;

const ISSUE_SEARCH_QUERY: &str = r#"
query SearchIssue($filter: IssueFilter!) {
    issues(filter: $filter, first: 1) {
        nodes { ...IssueFields }
    }
}
"#;

const MEMBERS_QUERY: &str = r#"
query TeamMembers($teamId: String!) {
    team(id: $teamId) {
        members(first: 250) {
            nodes { id name displayName }
        }
    }
}
"#;

const LABEL_QUERY: &str = r#"
query LabelByName($name: String!) {
    issueLabels(filter: { name: { eqIgnoreCase: $name } }) {
        nodes { id team { id } }
    }
}
"#;

const CREATE_LABEL_MUTATION: &str = r#"
mutation CreateLabel($teamId: String!, $name: String!, $color: String!) {
    issueLabelCreate(input: { teamId: $teamId, name: $name, color: $color }) {
        success
        issueLabel { id name }
    }
}
"#;

const UPDATE_ISSUE_MUTATION: &str = r#"
mutation UpdateIssue($id: String!, $input: IssueUpdateInput!) {
    issueUpdate(id: $id, input: $input) {
        success
    }
}
"#;

const COMMENT_MUTATION: &str = r#"
mutation AddComment($issueId: String!, $body: String!) {
    commentCreate(input: { issueId: $issueId, body: $body }) {
        success
    }
}
"#;

/// A team member that issues can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Linear API client.
pub struct LinearClient {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    owner_aliases: HashMap<String, String>,
    /// team key → team id
    teams: Mutex<HashMap<String, String>>,
    /// team id → members
    members: Mutex<HashMap<String, Vec<Member>>>,
    /// (team id, lowercased label name) → label id
    labels: Mutex<HashMap<(String, String), String>>,
}

impl LinearClient {
    pub fn new(
        api_key: SecretString,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let owner_aliases = DEFAULT_OWNER_ALIASES
            .iter()
            .map(|(from, to)| (from.to_lowercase(), to.to_string()))
            .collect();

        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.into(),
            owner_aliases,
            teams: Mutex::new(HashMap::new()),
            members: Mutex::new(HashMap::new()),
            labels: Mutex::new(HashMap::new()),
        })
    }

    /// Add or replace an owner alias (table spelling → Linear name).
    pub fn with_owner_alias(mut self, from: &str, to: &str) -> Self {
        self.owner_aliases.insert(from.to_lowercase(), to.to_string());
        self
    }

    /// Execute a GraphQL document and decode `data`.
    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, TrackerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", self.api_key.expose_secret())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: GraphQlResponse<T> = response.json().await?;
        envelope.into_data()
    }

    async fn team_id(&self, team_key: &str) -> Result<String, TrackerError> {
        let key = team_key.to_uppercase();
        if let Some(id) = self.teams.lock().await.get(&key) {
            return Ok(id.clone());
        }

        let data: TeamsData = self.execute(TEAM_QUERY, json!({ "key": key })).await?;
        let team = data
            .teams
            .nodes
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::NotFound {
                entity: "Team".into(),
                id: key.clone(),
            })?;

        debug!(team = %team.key, id = %team.id, name = %team.name, "Resolved team");
        self.teams.lock().await.insert(key, team.id.clone());
        Ok(team.id)
    }

    async fn team_members(&self, team_id: &str) -> Result<Vec<Member>, TrackerError> {
        if let Some(members) = self.members.lock().await.get(team_id) {
            return Ok(members.clone());
        }

        let data: MembersData = self
            .execute(MEMBERS_QUERY, json!({ "teamId": team_id }))
            .await?;
        let members = data.team.members.nodes;
        debug!(team_id, count = members.len(), "Loaded team members");

        self.members
            .lock()
            .await
            .insert(team_id.to_string(), members.clone());
        Ok(members)
    }

    async fn label_id(&self, team_id: &str, name: &str) -> Result<String, TrackerError> {
        let cache_key = (team_id.to_string(), name.to_lowercase());
        if let Some(id) = self.labels.lock().await.get(&cache_key) {
            return Ok(id.clone());
        }

        let data: LabelsData = self.execute(LABEL_QUERY, json!({ "name": name })).await?;
        let existing = data.issue_labels.nodes.into_iter().find(|l| match &l.team {
            Some(team) => team.id == team_id,
            None => true, // workspace label
        });

        let id = match existing {
            Some(label) => label.id,
            None => {
                let data: CreateLabelData = self
                    .execute(
                        CREATE_LABEL_MUTATION,
                        json!({ "teamId": team_id, "name": name, "color": LABEL_COLOR }),
                    )
                    .await?;
                let payload = data.issue_label_create;
                let label = payload
                    .issue_label
                    .filter(|_| payload.success)
                    .ok_or_else(|| TrackerError::MutationRejected("issueLabelCreate".into()))?;
                info!(label = %name, team_id, "Created label");
                label.id
            }
        };

        self.labels.lock().await.insert(cache_key, id.clone());
        Ok(id)
    }

    async fn label_set_with(
        &self,
        issue: &Issue,
        wanted: &[&str],
    ) -> Result<Option<Vec<String>>, TrackerError> {
        let mut added = Vec::new();
        for name in wanted.iter().filter(|name| !issue.has_label(name)) {
            added.push(self.label_id(&issue.team_id, name).await?);
        }
        Ok(merged_label_ids(issue, added))
    }

    async fn update_issue(&self, issue_id: &str, input: Value) -> Result<(), TrackerError> {
        let data: UpdateIssueData = self
            .execute(UPDATE_ISSUE_MUTATION, json!({ "id": issue_id, "input": input }))
            .await?;
        if !data.issue_update.success {
            return Err(TrackerError::MutationRejected("issueUpdate".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for LinearClient {
    async fn list_triage_issues(&self, team_key: &str) -> Result<Vec<Issue>, TrackerError> {
        let team_id = self.team_id(team_key).await?;

        let mut issues = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let document = format!("{TRIAGE_ISSUES_QUERY}{ISSUE_FIELDS}");
            let data: TeamIssuesData = self
                .execute(
                    &document,
                    json!({ "teamId": team_id, "first": PAGE_SIZE, "after": after }),
                )
                .await?;

            let page = data.team.issues;
            issues.extend(page.nodes.into_iter().map(Issue::from));

            match page.page_info {
                Some(info) if info.has_next_page && info.end_cursor.is_some() => {
                    after = info.end_cursor;
                }
                _ => break,
            }
        }

        debug!(team = team_key, count = issues.len(), "Listed triage issues");
        Ok(issues)
    }

    async fn get_issue(&self, identifier: &str) -> Result<Issue, TrackerError> {
        let (team_key, number) = parse_identifier(identifier)?;
        let document = format!("{ISSUE_SEARCH_QUERY}{ISSUE_FIELDS}");
        let filter = json!({
            "team": { "key": { "eq": team_key } },
            "number": { "eq": number },
        });

        let data: IssuesData = self.execute(&document, json!({ "filter": filter })).await?;
        data.issues
            .nodes
            .into_iter()
            .next()
            .map(Issue::from)
            .ok_or_else(|| TrackerError::NotFound {
                entity: "Issue".into(),
                id: identifier.to_string(),
            })
    }

    async fn set_assignee(
        &self,
        issue: &Issue,
        owner: &str,
        labels: &[&str],
    ) -> Result<(), TrackerError> {
        let members = self.team_members(&issue.team_id).await?;
        let member = find_member(&members, owner, &self.owner_aliases)
            .ok_or_else(|| TrackerError::UnknownMember(owner.to_string()))?;

        let mut input = json!({ "assigneeId": member.id });
        if let Some(label_ids) = self.label_set_with(issue, labels).await? {
            input["labelIds"] = json!(label_ids);
        }
        self.update_issue(&issue.id, input).await
    }

    async fn add_comment(&self, issue: &Issue, body: &str) -> Result<(), TrackerError> {
        let data: CommentData = self
            .execute(COMMENT_MUTATION, json!({ "issueId": issue.id, "body": body }))
            .await?;
        if !data.comment_create.success {
            return Err(TrackerError::MutationRejected("commentCreate".into()));
        }
        Ok(())
    }

    async fn add_label(&self, issue: &Issue, label: &str) -> Result<(), TrackerError> {
        match self.label_set_with(issue, &[label]).await? {
            Some(label_ids) => {
                self.update_issue(&issue.id, json!({ "labelIds": label_ids }))
                    .await
            }
            None => Ok(()),
        }
    }
}

/// Label ids after adding `added` to the issue's current set. `None` when
/// nothing is added. `issueUpdate` replaces the label set, so the result is
/// always the union.
fn merged_label_ids(issue: &Issue, added: Vec<String>) -> Option<Vec<String>> {
    if added.is_empty() {
        return None;
    }
    let mut ids: Vec<String> = issue.labels.iter().map(|l| l.id.clone()).collect();
    for id in added {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Some(ids)
}

/// Split "PROF-23" into ("PROF", 23).
pub fn parse_identifier(identifier: &str) -> Result<(String, u32), TrackerError> {
    let invalid = || TrackerError::InvalidIdentifier(identifier.to_string());

    let (team, number) = identifier.trim().rsplit_once('-').ok_or_else(invalid)?;
    if team.is_empty() || !team.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }
    let number: u32 = number.parse().map_err(|_| invalid())?;
    if number == 0 {
        return Err(invalid());
    }
    Ok((team.to_uppercase(), number))
}

/// Match an owner name against members, by name or display name, falling
/// back to the alias table.
fn find_member<'a>(
    members: &'a [Member],
    owner: &str,
    aliases: &HashMap<String, String>,
) -> Option<&'a Member> {
    let matches = |wanted: &str| {
        let wanted = wanted.trim().to_lowercase();
        members.iter().find(|m| {
            m.name.to_lowercase() == wanted
                || m
                    .display_name
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase() == wanted)
        })
    };

    matches(owner).or_else(|| {
        aliases
            .get(&owner.trim().to_lowercase())
            .and_then(|alias| matches(alias))
    })
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorItem>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorItem {
    message: String,
}

impl<T> GraphQlResponse<T> {
    fn into_data(self) -> Result<T, TrackerError> {
        if !self.errors.is_empty() {
            let messages: Vec<String> = self.errors.into_iter().map(|e| e.message).collect();
            return Err(TrackerError::GraphQl(messages.join("; ")));
        }
        self.data
            .ok_or_else(|| TrackerError::GraphQl("response carried no data".into()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    nodes: Vec<T>,
    #[serde(default)]
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdNode {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TeamNode {
    id: String,
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct StateNode {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct IssueNode {
    id: String,
    identifier: String,
    title: String,
    description: Option<String>,
    url: Option<String>,
    team: IdNode,
    state: Option<StateNode>,
    assignee: Option<Assignee>,
    labels: Connection<IssueLabel>,
}

impl From<IssueNode> for Issue {
    fn from(node: IssueNode) -> Self {
        Self {
            id: node.id,
            identifier: node.identifier,
            title: node.title,
            description: node.description,
            url: node.url,
            team_id: node.team.id,
            state: node.state.map(|s| IssueState {
                name: s.name,
                kind: s.kind,
            }),
            assignee: node.assignee,
            labels: node.labels.nodes,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TeamsData {
    teams: Connection<TeamNode>,
}

#[derive(Debug, Deserialize)]
struct TeamIssues {
    issues: Connection<IssueNode>,
}

#[derive(Debug, Deserialize)]
struct TeamIssuesData {
    team: TeamIssues,
}

#[derive(Debug, Deserialize)]
struct IssuesData {
    issues: Connection<IssueNode>,
}

#[derive(Debug, Deserialize)]
struct TeamMembers {
    members: Connection<Member>,
}

#[derive(Debug, Deserialize)]
struct MembersData {
    team: TeamMembers,
}

#[derive(Debug, Deserialize)]
struct LabelNode {
    id: String,
    team: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelsData {
    issue_labels: Connection<LabelNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLabelPayload {
    success: bool,
    issue_label: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLabelData {
    issue_label_create: CreateLabelPayload,
}

#[derive(Debug, Deserialize)]
struct SuccessPayload {
    success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateIssueData {
    issue_update: SuccessPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentData {
    comment_create: SuccessPayload,
}
