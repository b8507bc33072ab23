//! Well-known service names and the default registrations behind them.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::coordination::{SharedMutex, WaitManager};
use crate::dependency::DependencyProvider;
use crate::execution::{ProcessExecutor, TokioProcessExecutor};
use crate::models::CoreResult;
use crate::sandbox::{
    ContainerSandboxBuilder, SandboxManager, SelfSandboxBuilder, TerminalSandboxBuilder,
};

pub const PROCESS_EXECUTOR: &str = "ProcessExecutor";
pub const SANDBOX_MANAGER: &str = "SandboxManager";
pub const WAIT_MANAGER: &str = "WaitManager";
pub const SHARED_MUTEX: &str = "SharedMutex";

/// Registers every engine service as a replaceable default. Builders are
/// consulted in the order container, self, terminal.
pub fn register_defaults(provider: &DependencyProvider, config: &EngineConfig) -> CoreResult<()> {
    provider.add_default_service(PROCESS_EXECUTOR, |_| {
        Ok(Arc::new(Arc::new(TokioProcessExecutor) as Arc<dyn ProcessExecutor>))
    })?;

    let container_prefix = config.container_prefix.clone();
    let self_name = config.self_sandbox_name.clone();
    let terminal_name = config.terminal_sandbox_name.clone();
    provider.add_default_service(SANDBOX_MANAGER, move |provider| {
        let executor = process_executor(provider)?;
        let manager = SandboxManager::new();
        manager.add(Arc::new(ContainerSandboxBuilder::new(
            executor.clone(),
            container_prefix.clone(),
        )));
        manager.add(Arc::new(SelfSandboxBuilder::new(self_name.clone())));
        manager.add(Arc::new(TerminalSandboxBuilder::new(
            executor,
            terminal_name.clone(),
        )));
        Ok(Arc::new(manager))
    })?;

    provider.add_default_service(WAIT_MANAGER, |_| Ok(Arc::new(WaitManager::new())))?;
    provider.add_default_service(SHARED_MUTEX, |_| Ok(Arc::new(SharedMutex::new())))?;
    Ok(())
}

pub fn process_executor(provider: &DependencyProvider) -> CoreResult<Arc<dyn ProcessExecutor>> {
    provider
        .get_as::<Arc<dyn ProcessExecutor>>(PROCESS_EXECUTOR)
        .map(|executor| Arc::clone(&*executor))
}

pub fn sandbox_manager(provider: &DependencyProvider) -> CoreResult<Arc<SandboxManager>> {
    provider.get_as(SANDBOX_MANAGER)
}

pub fn wait_manager(provider: &DependencyProvider) -> CoreResult<Arc<WaitManager>> {
    provider.get_as(WAIT_MANAGER)
}

pub fn shared_mutex(provider: &DependencyProvider) -> CoreResult<Arc<SharedMutex>> {
    provider.get_as(SHARED_MUTEX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn defaults_register_every_service_lazily() {
        let provider = DependencyProvider::new();
        register_defaults(&provider, &EngineConfig::default()).expect("defaults should register");

        let all = provider.get_all();
        for name in [PROCESS_EXECUTOR, SANDBOX_MANAGER, WAIT_MANAGER, SHARED_MUTEX] {
            let descriptor = all.get(name).expect("service should be listed");
            assert!(descriptor.is_default);
            assert!(descriptor.is_static);
            assert!(!descriptor.is_built);
        }
    }

    #[test]
    fn static_services_resolve_to_one_instance() {
        let provider = DependencyProvider::new();
        register_defaults(&provider, &EngineConfig::default()).expect("defaults should register");

        let first = wait_manager(&provider).expect("wait manager");
        let second = wait_manager(&provider).expect("wait manager");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn sandbox_manager_orders_builders() {
        let provider = DependencyProvider::new();
        register_defaults(&provider, &EngineConfig::default()).expect("defaults should register");

        let manager = sandbox_manager(&provider).expect("sandbox manager");
        assert_eq!(manager.kinds(), vec!["container", "self", "terminal"]);
    }
}
