use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;

use crate::session::ConnectionState;

pub mod tui;

pub const CHAT_LOG_CAP: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Chat,
    System,
    Input,
}

/// One entry of the chat/system side channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEntry {
    pub kind: ChatKind,
    pub sender: Option<String>,
    pub text: String,
}

impl ChatEntry {
    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: ChatKind::Chat,
            sender: Some(sender.into()),
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: ChatKind::System,
            sender: None,
            text: text.into(),
        }
    }

    pub fn input(text: impl Into<String>) -> Self {
        Self {
            kind: ChatKind::Input,
            sender: None,
            text: text.into(),
        }
    }
}

/// Bounded chat history; the oldest entry falls out once the cap is hit.
pub struct ChatLog {
    entries: VecDeque<ChatEntry>,
    cap: usize,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::with_cap(CHAT_LOG_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, entry: ChatEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ChatEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}

static PARTICIPANT_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"총 (\d+)명 접속중").expect("static pattern"));

/// Extract the participant count from a server system notice, e.g.
/// "👋 bob님이 나갔습니다. (총 2명 접속중)". Notices without the phrase
/// carry no count.
pub fn participant_count(notice: &str) -> Option<u32> {
    PARTICIPANT_COUNT
        .captures(notice)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Presentation boundary. The session core pushes everything user-visible
/// through this trait; the bundled TUI is one implementation, tests use
/// recording fakes.
pub trait SessionView: Send + Sync {
    fn connection_changed(&self, state: ConnectionState);
    fn chat_entry(&self, entry: ChatEntry);
    fn participant_count(&self, count: u32);
    fn scrollback_changed(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_log_evicts_oldest_one_at_a_time() {
        let mut log = ChatLog::with_cap(3);
        for i in 0..5 {
            log.push(ChatEntry::system(format!("notice {i}")));
        }
        assert_eq!(log.len(), 3);
        let texts: Vec<&str> = log.entries().map(|entry| entry.text.as_str()).collect();
        assert_eq!(texts, vec!["notice 2", "notice 3", "notice 4"]);
    }

    #[test]
    fn chat_log_default_cap_is_one_hundred() {
        let mut log = ChatLog::new();
        for i in 0..101 {
            log.push(ChatEntry::system(format!("{i}")));
        }
        assert_eq!(log.len(), 100);
        assert_eq!(log.entries().next().unwrap().text, "1");
    }

    #[test]
    fn participant_count_reads_the_localized_phrase() {
        assert_eq!(participant_count("총 3명 접속중"), Some(3));
        assert_eq!(
            participant_count("🎉 alice님이 참가했습니다! (총 12명 접속중)"),
            Some(12)
        );
        assert_eq!(participant_count("shell restarted"), None);
        assert_eq!(participant_count(""), None);
    }
}
