use std::collections::HashMap;

use super::Terminal;

/// Table of fixed terminal symbols keyed by their surface text. Supports
/// prefix queries so the lexer can keep extending a match while another,
/// longer terminal is still reachable.
#[derive(Debug, Clone, Default)]
pub struct LexMap {
    map: HashMap<&'static str, Terminal>,
}

impl LexMap {
    pub fn insert(&mut self, key: &'static str, value: Terminal) {
        self.map.insert(key, value);
    }

    pub fn can_match(&self, key: &str) -> bool {
        self.map.keys().any(|map_key| map_key.starts_with(key))
    }

    pub fn get(&self, key: &str) -> Option<Terminal> {
        self.map.get(key).copied()
    }
}
