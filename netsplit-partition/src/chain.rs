use std::sync::Arc;

use netsplit_rules::{AddressFamily, Rule, RuleCompiler};
use netsplit_sandbox::ExecutionContext;
use tracing::{debug, info};

use crate::Result;

/// Upper bound on the rules removed by a sweep, in case deleting the head never fails.
const SWEEP_LIMIT: usize = 1000;

/// The user chain of the host packet filter, driven through an [`ExecutionContext`].
#[derive(Debug, Clone)]
pub struct UserChain {
    context: Arc<ExecutionContext>,
    compiler: RuleCompiler,
}

impl UserChain {
    pub fn new(context: Arc<ExecutionContext>, compiler: RuleCompiler) -> Self {
        Self { context, compiler }
    }

    pub fn compiler(&self) -> &RuleCompiler {
        &self.compiler
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Inserts `rule` at the head of the chain.
    pub fn apply(&self, rule: &Rule) -> Result<()> {
        if rule.family() == AddressFamily::V6 {
            self.ensure(AddressFamily::V6)?;
        }

        debug!(%rule, "applying rule");
        self.context.exec(&self.compiler.insert(rule))?;
        Ok(())
    }

    /// Deletes the first rule of the chain matching `rule` exactly.
    pub fn revert(&self, rule: &Rule) -> Result<()> {
        debug!(%rule, "reverting rule");
        self.context.exec(&self.compiler.delete(rule))?;
        Ok(())
    }

    /// Returns `true` if the saved ruleset of `family` declares the chain.
    pub fn exists(&self, family: AddressFamily) -> Result<bool> {
        let saved = self.context.exec(&self.compiler.save(family))?;
        let declaration = format!(":{}", self.compiler.chain());

        Ok(saved.lines().any(|line| line.split_whitespace().next() == Some(declaration.as_str())))
    }

    /// Creates the chain for `family` and hooks it into `FORWARD`, unless it already exists.
    pub fn ensure(&self, family: AddressFamily) -> Result<()> {
        if self.exists(family)? {
            return Ok(());
        }

        info!(chain = self.compiler.chain(), %family, "creating user chain");
        for cmd in self.compiler.chain_setup(family) {
            self.context.exec(&cmd)?;
        }

        Ok(())
    }

    /// Returns the listing of the chain for `family`. The IPv6 chain may not have been created
    /// yet, in which case the listing is empty. Never modifies the packet filter.
    pub fn list(&self, family: AddressFamily) -> Result<String> {
        if family == AddressFamily::V6 && !self.exists(family)? {
            return Ok(String::new());
        }

        Ok(self.context.exec(&self.compiler.list(family))?)
    }

    /// The IPv4 listing followed by the IPv6 listing.
    pub fn dump(&self) -> Result<String> {
        let mut dump = self.list(AddressFamily::V4)?;
        dump.push_str(&self.list(AddressFamily::V6)?);
        Ok(dump)
    }

    /// Deletes the head of the chain until that fails, returning how many rules were removed.
    /// Only a failing deletion ends the sweep; sandbox errors are propagated.
    pub fn sweep(&self, family: AddressFamily) -> Result<usize> {
        let cmd = self.compiler.delete_head(family);

        for removed in 0..SWEEP_LIMIT {
            match self.context.exec(&cmd) {
                Ok(_) => {}
                Err(e @ netsplit_sandbox::Error::Execution { .. }) => {
                    info!(%family, removed, last_error = %e, "all user chain rules cleared");
                    return Ok(removed);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(SWEEP_LIMIT)
    }
}

/// Removes every rule from the user chain of both families, including rules leaked by other
/// processes. Meant for process-wide teardown, when no manager is alive anymore.
///
/// Returns the number of rules removed for IPv4 and IPv6 respectively.
pub fn clean_all_user_rules(
    context: Arc<ExecutionContext>,
    compiler: RuleCompiler,
) -> Result<(usize, usize)> {
    let chain = UserChain::new(context, compiler);
    Ok((chain.sweep(AddressFamily::V4)?, chain.sweep(AddressFamily::V6)?))
}
