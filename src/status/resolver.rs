use super::Status;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Last known status per group, in first-seen order. Never shrinks.
#[derive(Debug, Clone, Default)]
pub struct GroupStatusTable {
    entries: IndexMap<String, Status>,
}

impl GroupStatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a group's status. Returns the previous value.
    pub fn update(&mut self, group: &str, status: Status) -> Option<Status> {
        self.entries.insert(group.to_string(), status)
    }

    pub fn get(&self, group: &str) -> Option<Status> {
        self.entries.get(group).copied()
    }

    pub fn contains(&self, group: &str) -> bool {
        self.entries.contains_key(group)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Status)> {
        self.entries.iter().map(|(g, s)| (g.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Groups that count toward this user's overall status.
#[derive(Debug, Clone, Default)]
pub struct UserGroupSet {
    groups: HashSet<String>,
}

impl UserGroupSet {
    /// Memberships plus the user's personal channel.
    pub fn new<I, S>(memberships: I, username: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut groups: HashSet<String> = memberships.into_iter().map(Into::into).collect();
        if !username.is_empty() {
            groups.insert(username.to_string());
        }
        Self { groups }
    }

    pub fn from_groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Collapse per-group statuses into one overall status.
///
/// The most severe status among the user's groups wins. Among equally severe
/// groups the first one in table order wins. With no relevant groups the
/// result is `Normal`.
pub fn resolve(table: &GroupStatusTable, user_groups: &UserGroupSet) -> Status {
    let mut best: Option<Status> = None;
    for (group, status) in table.iter() {
        if !user_groups.contains(group) {
            continue;
        }
        match best {
            Some(current) if status.severity() <= current.severity() => {}
            _ => best = Some(status),
        }
    }
    best.unwrap_or(Status::Normal)
}

/// Owns the group table and remembers the last overall status it reported.
#[derive(Debug, Default)]
pub struct StatusAggregator {
    table: GroupStatusTable,
    user_groups: UserGroupSet,
    last_emitted: Option<Status>,
}

impl StatusAggregator {
    pub fn new(user_groups: UserGroupSet) -> Self {
        Self {
            table: GroupStatusTable::new(),
            user_groups,
            last_emitted: None,
        }
    }

    /// Record a group's new status. Returns the new overall status only when
    /// it differs from the one last returned.
    pub fn on_group_update(&mut self, group: &str, status: Status) -> Option<Status> {
        self.table.update(group, status);
        if !self.user_groups.contains(group) {
            return None;
        }

        let overall = resolve(&self.table, &self.user_groups);
        if self.last_emitted == Some(overall) {
            return None;
        }
        self.last_emitted = Some(overall);
        Some(overall)
    }

    /// Overall status as last reported, `Normal` before any update.
    pub fn overall(&self) -> Status {
        self.last_emitted.unwrap_or(Status::Normal)
    }

    pub fn table(&self) -> &GroupStatusTable {
        &self.table
    }

    pub fn is_user_group(&self, group: &str) -> bool {
        self.user_groups.contains(group)
    }
}
