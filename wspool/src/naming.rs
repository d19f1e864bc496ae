use std::collections::HashSet;
use std::sync::Mutex;

use uuid::Uuid;

/// Source of workspace names.
pub trait NameGenerator: Send + Sync {
    /// Produce a name starting with `prefix`, never returned before by this generator.
    fn generate(&self, prefix: &str) -> String;
}

/// `prefix` followed by random lowercase alphanumerics, e.g. `workspacek3x9qa`.
///
/// Issued names are remembered, so a generator must not outlive its suffix
/// space (36^len names per prefix).
pub struct RandomNames {
    suffix_len: usize,
    issued: Mutex<HashSet<String>>,
}

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

impl RandomNames {
    pub fn new(suffix_len: usize) -> Self {
        Self {
            suffix_len: suffix_len.max(1),
            issued: Mutex::new(HashSet::new()),
        }
    }

    fn suffix(&self) -> String {
        let mut out = String::with_capacity(self.suffix_len);
        while out.len() < self.suffix_len {
            for byte in Uuid::new_v4().as_bytes() {
                if out.len() == self.suffix_len {
                    break;
                }
                out.push(ALPHABET[*byte as usize % ALPHABET.len()] as char);
            }
        }
        out
    }
}

impl Default for RandomNames {
    fn default() -> Self {
        Self::new(6)
    }
}

impl NameGenerator for RandomNames {
    fn generate(&self, prefix: &str) -> String {
        let mut issued = self.issued.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            let name = format!("{}{}", prefix, self.suffix());
            if issued.insert(name.clone()) {
                return name;
            }
        }
    }
}
