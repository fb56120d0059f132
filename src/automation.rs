use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::warn;

use tetra_protocol::Command;

/// Shared, replaceable set of automation profiles.
///
/// A profile is a named list of AT commands. Clones share the same profiles,
/// so a reload is seen by every device task.
#[derive(Debug, Clone, Default)]
pub struct Profiles {
    profiles: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl Profiles {
    pub fn new(profiles: HashMap<String, Vec<String>>) -> Self {
        Self {
            profiles: Arc::new(RwLock::new(profiles)),
        }
    }

    pub fn replace(&self, profiles: HashMap<String, Vec<String>>) {
        match self.profiles.write() {
            Ok(mut guard) => *guard = profiles,
            Err(poisoned) => *poisoned.into_inner() = profiles,
        }
    }

    /// Commands of the named profile, one per AT line. `None` if no such
    /// profile exists.
    pub fn commands(&self, name: &str) -> Option<Vec<Command>> {
        let profiles = match self.profiles.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("profile lock poisoned");
                poisoned.into_inner()
            }
        };
        profiles.get(name).map(|lines| {
            lines
                .iter()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty())
                .map(|line| Command::Raw(line.to_string()))
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        self.profiles.read().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm() -> HashMap<String, Vec<String>> {
        HashMap::from([(
            "alarm".to_string(),
            vec!["AT+CTGS=1,262".to_string(), "  ".to_string(), " ATI ".to_string()],
        )])
    }

    #[test]
    fn test_profile_commands() {
        let profiles = Profiles::new(alarm());
        assert_eq!(
            profiles.commands("alarm").unwrap(),
            vec![
                Command::Raw("AT+CTGS=1,262".to_string()),
                Command::Raw("ATI".to_string())
            ]
        );
        assert_eq!(profiles.commands("missing"), None);
    }

    #[test]
    fn test_replace_is_shared() {
        let profiles = Profiles::default();
        let device_view = profiles.clone();
        assert!(device_view.is_empty());
        profiles.replace(alarm());
        assert_eq!(device_view.len(), 1);
        assert!(device_view.commands("alarm").is_some());
    }
}
