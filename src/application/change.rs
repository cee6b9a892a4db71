use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::domain::SessionId;

/// Remembers a content hash per session so unchanged captures can skip a repaint. A hash
/// collision costs one missed repaint, nothing more.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    digests: HashMap<SessionId, u64>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_changed(&mut self, session_id: &SessionId, sanitized_content: &str) -> bool {
        let digest = content_hash(sanitized_content);
        match self.digests.insert(session_id.clone(), digest) {
            Some(previous) => previous != digest,
            None => true,
        }
    }

    pub fn forget(&mut self, session_id: &SessionId) {
        self.digests.remove(session_id);
    }

    pub fn retain_sessions(&mut self, keep: impl Fn(&SessionId) -> bool) {
        self.digests.retain(|session_id, _| keep(session_id));
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.digests.len()
    }
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
