//! Notification feed shown by the notifications widget.

use serde::{Deserialize, Serialize};

use crate::sidecar::SidecarNotification;

pub const MAX_NOTIFICATIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSource {
    Whatsapp,
    Gmail,
    Twitter,
    Teams,
    Outlook,
    Slack,
    Discord,
}

impl NotificationSource {
    /// Classify by the reporting app's display name. Unrecognised apps land
    /// under Outlook.
    pub fn from_app_name(app_name: &str) -> Self {
        let lower = app_name.to_lowercase();
        let has = |needle: &str| lower.contains(needle);
        if has("whatsapp") {
            Self::Whatsapp
        } else if has("slack") {
            Self::Slack
        } else if has("discord") {
            Self::Discord
        } else if has("teams") {
            Self::Teams
        } else if has("outlook") || has("mail") {
            Self::Outlook
        } else if has("gmail") || has("chrome") || has("edge") {
            Self::Gmail
        } else if has("twitter") || has(" x ") {
            Self::Twitter
        } else {
            Self::Outlook
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Whatsapp => "WhatsApp",
            Self::Gmail => "Gmail",
            Self::Twitter => "X",
            Self::Teams => "Teams",
            Self::Outlook => "Outlook",
            Self::Slack => "Slack",
            Self::Discord => "Discord",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedNotification {
    pub id: String,
    pub source: NotificationSource,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub timestamp: i64,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationGroup<'a> {
    pub source: NotificationSource,
    pub notifications: Vec<&'a FeedNotification>,
    pub unread_count: usize,
    pub latest_timestamp: i64,
}

/// Newest-first list of notifications, capped at [`MAX_NOTIFICATIONS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationFeed {
    items: Vec<FeedNotification>,
}

impl NotificationFeed {
    /// Add a sidecar notification. Returns `false` for a duplicate.
    pub fn ingest(&mut self, n: &SidecarNotification) -> bool {
        let id = format!("sys-{}", n.id);
        if self.items.iter().any(|item| item.id == id) {
            return false;
        }
        self.items.insert(
            0,
            FeedNotification {
                id,
                source: NotificationSource::from_app_name(&n.app_name),
                title: n.title.clone(),
                message: n.message.clone(),
                sender: Some(n.app_name.clone()),
                timestamp: n.timestamp,
                read: false,
            },
        );
        self.items.truncate(MAX_NOTIFICATIONS);
        true
    }

    pub fn items(&self) -> &[FeedNotification] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_source_read(&mut self, source: NotificationSource) {
        self.items.iter_mut().filter(|n| n.source == source).for_each(|n| n.read = true);
    }

    pub fn mark_all_read(&mut self) {
        self.items.iter_mut().for_each(|n| n.read = true);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        self.items.len() != before
    }

    pub fn clear_source(&mut self, source: NotificationSource) {
        self.items.retain(|n| n.source != source);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Notifications grouped by source, most recently active source first.
    pub fn grouped(&self) -> Vec<NotificationGroup<'_>> {
        let mut groups: Vec<NotificationGroup<'_>> = Vec::new();
        for n in &self.items {
            let idx = match groups.iter().position(|g| g.source == n.source) {
                Some(idx) => idx,
                None => {
                    groups.push(NotificationGroup {
                        source: n.source,
                        notifications: Vec::new(),
                        unread_count: 0,
                        latest_timestamp: 0,
                    });
                    groups.len() - 1
                }
            };
            let group = &mut groups[idx];
            group.notifications.push(n);
            if !n.read {
                group.unread_count += 1;
            }
            group.latest_timestamp = group.latest_timestamp.max(n.timestamp);
        }
        groups.sort_by(|a, b| b.latest_timestamp.cmp(&a.latest_timestamp));
        groups
    }
}
