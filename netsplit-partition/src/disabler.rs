use netsplit_rules::Rule;
use tracing::error;

use crate::{endpoint::Endpoint, manager::PartitionManager, Result};

/// Temporarily lifts every rule of a [`PartitionManager`].
///
/// Creating the disabler reverts the rules of the manager; dropping it reapplies them in their
/// original order. Use [`PartitionManagerDisabler::restore`] to observe errors on reapplication.
#[derive(Debug)]
pub struct PartitionManagerDisabler<'a, E: Endpoint + Clone> {
    manager: &'a mut PartitionManager<E>,
    /// `None` once restored.
    suspended: Option<Vec<Rule>>,
}

impl<'a, E: Endpoint + Clone> PartitionManagerDisabler<'a, E> {
    pub fn new(manager: &'a mut PartitionManager<E>) -> Result<Self> {
        let suspended = manager.pop_rules()?;
        tracing::debug!(rules = suspended.len(), "suspended partition rules");

        Ok(Self { manager, suspended: Some(suspended) })
    }

    /// The rules that will be reapplied.
    pub fn suspended(&self) -> &[Rule] {
        self.suspended.as_deref().unwrap_or_default()
    }

    /// The underlying manager. Rules added through it while disabled are kept on restore.
    pub fn manager(&mut self) -> &mut PartitionManager<E> {
        self.manager
    }

    /// Reapplies the suspended rules.
    pub fn restore(mut self) -> Result<()> {
        match self.suspended.take() {
            Some(rules) => self.manager.push_rules(rules),
            None => Ok(()),
        }
    }
}

impl<E: Endpoint + Clone> Drop for PartitionManagerDisabler<'_, E> {
    fn drop(&mut self) {
        if let Some(rules) = self.suspended.take() {
            if let Err(e) = self.manager.push_rules(rules) {
                error!(error = %e, "failed to restore partition rules");
            }
        }
    }
}
