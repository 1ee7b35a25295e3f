//! Maps configured group names and contact numbers to bridge chat ids.

use std::collections::HashSet;

use anyhow::Result;

use crate::bridge::{ChatBackend, ChatSummary};

#[derive(Debug, Clone, Default)]
pub struct ChatSelectors {
    pub group_names: Vec<String>,
    pub contact_numbers: Vec<String>,
    /// Suffix after `@` in one-to-one chat ids, e.g. `s.whatsapp.net`.
    pub contact_domain: String,
}

impl ChatSelectors {
    pub fn is_empty(&self) -> bool {
        self.group_names.is_empty() && self.contact_numbers.is_empty()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Chats matching any selector, in bridge order, each once.
///
/// With no selectors at all every chat is targeted.
pub fn select_chats(chats: &[ChatSummary], selectors: &ChatSelectors) -> Vec<String> {
    let group_names: HashSet<String> = selectors
        .group_names
        .iter()
        .map(|g| normalize_name(g))
        .filter(|g| !g.is_empty())
        .collect();
    let contact_prefixes: Vec<String> = selectors
        .contact_numbers
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| format!("{}@{}", c, selectors.contact_domain))
        .collect();
    let select_all = group_names.is_empty() && contact_prefixes.is_empty();

    let mut seen = HashSet::new();
    chats
        .iter()
        .filter(|chat| {
            select_all
                || group_names.contains(&normalize_name(&chat.display_name))
                || contact_prefixes.iter().any(|p| chat.id.starts_with(p.as_str()))
        })
        .filter(|chat| seen.insert(chat.id.clone()))
        .map(|chat| chat.id.clone())
        .collect()
}

/// Enumerate the bridge once and resolve the target chats.
/// An empty result is returned as-is; callers decide whether that is fatal.
pub async fn resolve_target_chats(
    backend: &dyn ChatBackend,
    selectors: &ChatSelectors,
) -> Result<Vec<String>> {
    let chats = backend.list_chats().await?;
    let targets = select_chats(&chats, selectors);
    if selectors.is_empty() {
        tracing::info!("No chat selectors configured, replying in all {} chat(s)", targets.len());
    } else {
        tracing::info!(
            "Resolved {} of {} chat(s) from {} group name(s) and {} contact number(s)",
            targets.len(),
            chats.len(),
            selectors.group_names.len(),
            selectors.contact_numbers.len()
        );
    }
    Ok(targets)
}
