//! The applied key–value state machine.

use crate::log::Command;
use std::collections::HashMap;

/// The applied key→value mapping. Applying a command is idempotent against
/// repeated replay from the same (index, term) because the resulting map
/// depends only on the committed prefix.
#[derive(Debug, Default)]
pub struct StateMachine {
    kv: HashMap<String, String>,
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine { kv: HashMap::new() }
    }

    pub fn apply(&mut self, command: &Command) {
        self.kv.insert(command.key.clone(), command.value.clone());
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.kv.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_sets_value() {
        let mut sm = StateMachine::new();
        sm.apply(&Command {
            key: "a".into(),
            value: "1".into(),
        });
        assert_eq!(sm.get("a").map(String::as_str), Some("1"));
        assert_eq!(sm.get("z"), None);
    }

    #[test]
    fn apply_is_idempotent_under_replay() {
        let cmd = Command {
            key: "a".into(),
            value: "1".into(),
        };
        let mut sm1 = StateMachine::new();
        sm1.apply(&cmd);
        sm1.apply(&cmd);

        let mut sm2 = StateMachine::new();
        sm2.apply(&cmd);

        assert_eq!(sm1.get("a"), sm2.get("a"));
    }

    #[test]
    fn later_write_overwrites_earlier() {
        let mut sm = StateMachine::new();
        sm.apply(&Command {
            key: "a".into(),
            value: "1".into(),
        });
        sm.apply(&Command {
            key: "a".into(),
            value: "2".into(),
        });
        assert_eq!(sm.get("a").map(String::as_str), Some("2"));
    }
}
