use netsplit_rules::Rule;

/// The rules currently applied by a manager, in insertion order.
///
/// Every entry is live in the packet filter. Reverting replays the recorded rule, never a
/// re-derived one.
#[derive(Debug, Clone, Default)]
pub struct RuleLedger {
    rules: Vec<Rule>,
}

impl RuleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an applied rule.
    pub fn record(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// The most recently applied rule.
    pub fn last(&self) -> Option<&Rule> {
        self.rules.last()
    }

    /// Forgets the most recently applied rule.
    pub fn pop(&mut self) -> Option<Rule> {
        self.rules.pop()
    }

    /// Forgets the entry at `index`.
    pub fn remove_at(&mut self, index: usize) -> Option<Rule> {
        (index < self.rules.len()).then(|| self.rules.remove(index))
    }

    /// Returns the index of the first entry equal to `rule`.
    pub fn position(&self, rule: &Rule) -> Option<usize> {
        self.rules.iter().position(|r| r == rule)
    }

    /// Forgets the first entry equal to `rule`, returning `false` if there is none.
    pub fn remove(&mut self, rule: &Rule) -> bool {
        match self.position(rule) {
            Some(index) => {
                self.rules.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
