use std::sync::{Arc, RwLock};

use log::warn;

use crate::DeviceId;

/// A rule that starts an automation when a matching status or text arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRule {
    /// Status code to match, compared case-insensitively.
    pub status: Option<String>,
    /// Literal text to match.
    pub text: Option<String>,
    /// Sender ISSIs allowed to fire the rule. Empty allows everyone.
    pub issis: Vec<String>,
    /// Device the message must arrive on.
    pub source_device: DeviceId,
    /// Name of the automation profile to run.
    pub automation: String,
    /// Device the automation runs on.
    pub target_device: DeviceId,
}

/// An automation selected by a matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerAction {
    pub automation: String,
    pub target_device: DeviceId,
}

/// The incoming message a rule is matched against.
#[derive(Debug, Clone, Copy)]
pub struct TriggerInput<'a> {
    pub status: Option<&'a str>,
    pub text: Option<&'a str>,
    pub sender: Option<&'a str>,
    pub device: DeviceId,
}

impl TriggerRule {
    pub fn matches(&self, input: &TriggerInput<'_>) -> bool {
        let status_match = match (non_empty(self.status.as_deref()), non_empty(input.status)) {
            (Some(rule), Some(event)) => rule.eq_ignore_ascii_case(event),
            _ => false,
        };
        let text_match = match (non_empty(self.text.as_deref()), non_empty(input.text)) {
            (Some(rule), Some(event)) => rule == event,
            _ => false,
        };
        let issi_match = self.issis.is_empty()
            || input
                .sender
                .is_some_and(|sender| self.issis.iter().any(|issi| issi == sender));

        (status_match || text_match) && self.source_device == input.device && issi_match
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

/// Shared, replaceable set of trigger rules.
///
/// Clones share the same underlying rules, so a reload through one handle is
/// seen by every engine holding another.
#[derive(Debug, Clone, Default)]
pub struct TriggerRules {
    rules: Arc<RwLock<Vec<TriggerRule>>>,
}

impl TriggerRules {
    pub fn new(rules: Vec<TriggerRule>) -> Self {
        Self {
            rules: Arc::new(RwLock::new(rules)),
        }
    }

    /// Swap in a new rule set.
    pub fn replace(&self, rules: Vec<TriggerRule>) {
        match self.rules.write() {
            Ok(mut guard) => *guard = rules,
            Err(poisoned) => {
                warn!("trigger rule lock poisoned, replacing anyway");
                *poisoned.into_inner() = rules;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read(|rules| rules.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every rule that matches `input`, in rule-set order.
    pub fn matching(&self, input: &TriggerInput<'_>) -> Vec<TriggerAction> {
        self.read(|rules| {
            rules
                .iter()
                .filter(|rule| rule.matches(input))
                .map(|rule| TriggerAction {
                    automation: rule.automation.clone(),
                    target_device: rule.target_device,
                })
                .collect()
        })
    }

    fn read<T>(&self, f: impl FnOnce(&[TriggerRule]) -> T) -> T {
        match self.rules.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}
