use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::DeviceId;

/// Talk-groups shown on the operator console by default.
pub const DEFAULT_TALK_GROUPS: [&str; 7] = ["1", "2", "3", "4", "91102", "262", "26200"];

/// Activity seen on a known talk-group.
///
/// Consumers treat this as a pulse, not as a lasting state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupActivity {
    pub talk_group: String,
    /// ISSI of the talking terminal, when the line carried one.
    pub issi: Option<String>,
    pub device: DeviceId,
}

/// State kept for one call reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEntry {
    pub talk_group: String,
    pub issi: Option<String>,
}

/// Tracks call references of one device and reports talk-group activity.
///
/// Fed with every raw line, independent of SDS reassembly:
///
/// - `+CTICN: <ref>,...,<issi>,...,<tg>,<x>` call setup
/// - `+CTGS: <ref>,<tg>` group select
/// - `+CTXG: <ref>,...,<issi>` transmission grant on an existing call
/// - `+CTCR: <ref>,...` call release
#[derive(Debug)]
pub struct CallCorrelator {
    device: DeviceId,
    known_talk_groups: HashSet<String>,
    calls: HashMap<String, CallEntry>,
}

impl CallCorrelator {
    pub fn new(device: DeviceId, known_talk_groups: impl IntoIterator<Item = String>) -> Self {
        Self {
            device,
            known_talk_groups: known_talk_groups.into_iter().collect(),
            calls: HashMap::new(),
        }
    }

    /// Process one line. Returns an activity event if the line resolved to a
    /// known talk-group.
    pub fn feed(&mut self, line: &str) -> Option<GroupActivity> {
        let (prefix, rest) = line.split_once(':')?;
        let fields: Vec<&str> = rest.split(',').map(str::trim).collect();

        let (talk_group, issi) = match prefix.trim() {
            "+CTICN" if fields.len() >= 6 => {
                let call_ref = fields[0];
                let issi = fields[4].to_string();
                let talk_group = fields[fields.len() - 2].to_string();
                trace!("call {call_ref} set up on TG {talk_group} by {issi}");
                self.calls.insert(
                    call_ref.to_string(),
                    CallEntry {
                        talk_group: talk_group.clone(),
                        issi: Some(issi.clone()),
                    },
                );
                (talk_group, Some(issi))
            }
            "+CTGS" if fields.len() >= 2 => {
                let talk_group = fields[1].to_string();
                self.calls.insert(
                    fields[0].to_string(),
                    CallEntry {
                        talk_group: talk_group.clone(),
                        issi: None,
                    },
                );
                (talk_group, None)
            }
            "+CTXG" if fields.len() >= 6 => {
                let issi = fields[5].to_string();
                let Some(entry) = self.calls.get_mut(fields[0]) else {
                    debug!("transmission grant for unknown call {}", fields[0]);
                    return None;
                };
                entry.issi = Some(issi.clone());
                (entry.talk_group.clone(), Some(issi))
            }
            "+CTCR" => {
                if self.calls.remove(fields[0]).is_none() {
                    debug!("release of unknown call {}", fields[0]);
                }
                return None;
            }
            _ => return None,
        };

        if !self.known_talk_groups.contains(&talk_group) {
            return None;
        }
        Some(GroupActivity {
            talk_group,
            issi,
            device: self.device,
        })
    }

    /// Look up the state of a call reference.
    pub fn call(&self, call_ref: &str) -> Option<&CallEntry> {
        self.calls.get(call_ref)
    }

    /// Number of tracked call references.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
