//! Polling waits
//!
//! Helpers that park until the target reaches some observable state. They
//! poll rather than trust a single snapshot, because targets reload, log
//! buffers lag behind, and elements mount late.

use std::collections::VecDeque;
use std::time::Duration;

use regex::Regex;
use tokio::time::{interval, sleep_until, timeout, Instant};
use tracing::debug;

use leash_hierarchy::HierarchyNode;
use leash_protocol::{LogEvent, LogRecord};
use leash_utils::{LeashError, Result};

use crate::client::Client;

/// Default deadline for the wait helpers
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the wait helpers re-poll the target
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What counts as a match when waiting for a log line
///
/// Plain strings match as case-sensitive substrings; a [`Regex`] matches
/// anywhere in the message.
#[derive(Debug, Clone)]
pub enum LogPattern {
    Substring(String),
    Pattern(Regex),
}

impl LogPattern {
    pub fn matches(&self, message: &str) -> bool {
        match self {
            LogPattern::Substring(needle) => message.contains(needle.as_str()),
            LogPattern::Pattern(regex) => regex.is_match(message),
        }
    }

    fn describe(&self) -> String {
        match self {
            LogPattern::Substring(needle) => format!("log containing '{needle}'"),
            LogPattern::Pattern(regex) => format!("log matching /{regex}/"),
        }
    }
}

impl From<&str> for LogPattern {
    fn from(needle: &str) -> Self {
        LogPattern::Substring(needle.to_string())
    }
}

impl From<String> for LogPattern {
    fn from(needle: String) -> Self {
        LogPattern::Substring(needle)
    }
}

impl From<Regex> for LogPattern {
    fn from(regex: Regex) -> Self {
        LogPattern::Pattern(regex)
    }
}

impl Client {
    /// Wait until the target emits a log line matching `pattern`
    pub async fn wait_for_log(
        &self,
        project: &str,
        pattern: impl Into<LogPattern>,
    ) -> Result<LogEvent> {
        self.wait_for_log_with(project, pattern, DEFAULT_WAIT_TIMEOUT)
            .await
    }

    /// Wait for a matching log line with an explicit deadline
    ///
    /// Two paths race. A live subscription catches lines as they stream
    /// in, and a once-a-second poll of the buffered console logs catches
    /// lines emitted before the subscription was armed, or by targets
    /// that do not stream at all. The first match wins and both paths are
    /// torn down before this returns.
    pub async fn wait_for_log_with(
        &self,
        project: &str,
        pattern: impl Into<LogPattern>,
        deadline: Duration,
    ) -> Result<LogEvent> {
        let pattern = pattern.into();
        let until = Instant::now() + deadline;

        let mut subscription = self.subscribe_logs(project).await;
        let mut poll = tokio::spawn(poll_buffered_logs(
            self.clone(),
            project.to_string(),
            pattern.clone(),
        ));

        let result = loop {
            tokio::select! {
                pushed = subscription.recv() => {
                    match pushed {
                        Some(event) if pattern.matches(&event.message) => break Ok(event),
                        Some(_) => {}
                        // Stream gone means the client disconnected
                        None => break Err(LeashError::ConnectionClosed),
                    }
                }

                polled = &mut poll => {
                    break match polled {
                        Ok(event) => Ok(event),
                        Err(e) => Err(LeashError::internal(format!("log poll task failed: {e}"))),
                    };
                }

                _ = sleep_until(until) => {
                    break Err(LeashError::wait_timed_out(
                        pattern.describe(),
                        deadline.as_millis() as u64,
                    ));
                }
            }
        };

        poll.abort();
        result
    }

    /// Wait until the UI tree satisfies `predicate`, re-fetching once a
    /// second
    pub async fn wait_for_condition<F>(&self, project: &str, predicate: F) -> Result<HierarchyNode>
    where
        F: FnMut(&HierarchyNode) -> bool,
    {
        self.wait_for_condition_with(project, predicate, DEFAULT_WAIT_TIMEOUT)
            .await
    }

    /// Wait for a UI condition with an explicit deadline
    ///
    /// Fetch failures are swallowed and retried; only the deadline ends
    /// the wait. The hierarchy that satisfied the predicate is returned.
    pub async fn wait_for_condition_with<F>(
        &self,
        project: &str,
        mut predicate: F,
        deadline: Duration,
    ) -> Result<HierarchyNode>
    where
        F: FnMut(&HierarchyNode) -> bool,
    {
        let poll = async {
            let mut tick = interval(DEFAULT_POLL_INTERVAL);
            loop {
                tick.tick().await;
                match self.get_view_hierarchy(project).await {
                    Ok(hierarchy) if predicate(&hierarchy) => return hierarchy,
                    Ok(_) => {}
                    Err(e) => debug!("Hierarchy poll for '{}' failed: {}", project, e),
                }
            }
        };

        match timeout(deadline, poll).await {
            Ok(hierarchy) => Ok(hierarchy),
            Err(_) => Err(LeashError::wait_timed_out(
                format!("condition on '{project}' hierarchy"),
                deadline.as_millis() as u64,
            )),
        }
    }

    /// Wait until an element with `test_id` is mounted and return it
    pub async fn wait_for_element(&self, project: &str, test_id: &str) -> Result<HierarchyNode> {
        self.wait_for_element_with(project, test_id, DEFAULT_WAIT_TIMEOUT)
            .await
    }

    /// Wait for an element with an explicit deadline
    ///
    /// The tree is searched breadth first, so when a testID appears more
    /// than once the shallowest occurrence is returned.
    pub async fn wait_for_element_with(
        &self,
        project: &str,
        test_id: &str,
        deadline: Duration,
    ) -> Result<HierarchyNode> {
        let poll = async {
            let mut tick = interval(DEFAULT_POLL_INTERVAL);
            loop {
                tick.tick().await;
                match self.get_view_hierarchy(project).await {
                    Ok(hierarchy) => {
                        if let Some(node) = find_breadth_first(&hierarchy, test_id) {
                            return node.clone();
                        }
                    }
                    Err(e) => debug!("Hierarchy poll for '{}' failed: {}", project, e),
                }
            }
        };

        match timeout(deadline, poll).await {
            Ok(node) => Ok(node),
            Err(_) => Err(LeashError::wait_timed_out(
                format!("element '{test_id}' in '{project}'"),
                deadline.as_millis() as u64,
            )),
        }
    }
}

/// Scan the buffered console logs until one matches
async fn poll_buffered_logs(client: Client, project: String, pattern: LogPattern) -> LogEvent {
    let mut tick = interval(DEFAULT_POLL_INTERVAL);
    loop {
        tick.tick().await;
        match client.get_logs(&project).await {
            Ok(records) => {
                let hit = records
                    .into_iter()
                    .find(|record| pattern.matches(record.message()));
                if let Some(record) = hit {
                    return buffered_event(&project, record);
                }
            }
            // Transient failures must not kill the wait; the deadline
            // still bounds it
            Err(e) => debug!("Buffered-log poll for '{}' failed: {}", project, e),
        }
    }
}

/// Shape a buffered record like a streamed event
fn buffered_event(project: &str, record: LogRecord) -> LogEvent {
    match record {
        LogRecord::Entry(entry) => LogEvent::from_entry(project, entry),
        LogRecord::Text(message) => LogEvent {
            project: project.to_string(),
            level: "log".to_string(),
            message,
            timestamp: 0,
        },
    }
}

fn find_breadth_first<'a>(root: &'a HierarchyNode, test_id: &str) -> Option<&'a HierarchyNode> {
    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        if node.test_id.as_deref() == Some(test_id) {
            return Some(node);
        }
        queue.extend(node.children.iter());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Pattern Tests ====================

    #[test]
    fn test_substring_pattern_is_case_sensitive() {
        let pattern = LogPattern::from("Ready");
        assert!(pattern.matches("App Ready in 120ms"));
        assert!(!pattern.matches("app ready in 120ms"));
    }

    #[test]
    fn test_regex_pattern_matches_anywhere() {
        let pattern = LogPattern::from(Regex::new(r"ready in \d+ms").unwrap());
        assert!(pattern.matches("app ready in 120ms"));
        assert!(!pattern.matches("app ready eventually"));
    }

    #[test]
    fn test_pattern_from_owned_string() {
        let pattern: LogPattern = String::from("boot").into();
        assert!(pattern.matches("boot sequence"));
    }

    // ==================== Buffered Record Tests ====================

    #[test]
    fn test_buffered_entry_keeps_level_and_timestamp() {
        let record = LogRecord::Entry(leash_protocol::LogEntry {
            level: "warn".to_string(),
            message: "low memory".to_string(),
            timestamp: 99,
        });
        let event = buffered_event("demo", record);
        assert_eq!(event.project, "demo");
        assert_eq!(event.level, "warn");
        assert_eq!(event.timestamp, 99);
    }

    #[test]
    fn test_buffered_text_gets_default_level() {
        let event = buffered_event("demo", LogRecord::Text("plain".to_string()));
        assert_eq!(event.level, "log");
        assert_eq!(event.message, "plain");
        assert_eq!(event.timestamp, 0);
    }

    // ==================== Breadth-First Search Tests ====================

    fn tree_with_duplicate_test_id() -> HierarchyNode {
        // Pre-order would visit wrapper/inner first; breadth first must
        // prefer the shallower sibling
        HierarchyNode::new("App").with_children(vec![
            HierarchyNode::new("Wrapper").with_children(vec![HierarchyNode::new("Inner")
                .with_test_id("save-button")
                .with_text("deep")]),
            HierarchyNode::new("Toolbar")
                .with_test_id("save-button")
                .with_text("shallow"),
        ])
    }

    #[test]
    fn test_breadth_first_prefers_shallowest_match() {
        let root = tree_with_duplicate_test_id();
        let node = find_breadth_first(&root, "save-button").unwrap();
        assert_eq!(node.text.as_deref(), Some("shallow"));
    }

    #[test]
    fn test_breadth_first_misses_absent_test_id() {
        let root = tree_with_duplicate_test_id();
        assert!(find_breadth_first(&root, "delete-button").is_none());
    }

    #[test]
    fn test_breadth_first_finds_root_itself() {
        let root = HierarchyNode::new("App").with_test_id("root");
        let node = find_breadth_first(&root, "root").unwrap();
        assert_eq!(node.name, "App");
    }
}
