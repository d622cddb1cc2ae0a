//! Assembly of the element kinds a server offers.

use circuit_anchor::kind::{
    CHAN, CONTAINER, DOCKER, NAMESERVER, NETWORK, ON_JOIN, ON_LEAVE, POD, PROC, SERVER, VOLUME,
    WASM,
};
use circuit_anchor::{adapter_for, ElementRegistry};
use circuit_container::{ContainerFactory, Noun, ResourceFactory, YContainer, YResource};
use circuit_dns::{DnsFactory, YNameserver};
use circuit_proc::{ProcFactory, YProc};
use circuit_valve::{ChanFactory, YValve};
use circuit_wasm::{WasmFactory, YWasm};

use crate::config::{CircuitConfig, Tools};

/// Every kind identifier a server registers.
pub const KINDS: &[&str] = &[
    SERVER, CHAN, PROC, NAMESERVER, DOCKER, WASM, POD, CONTAINER, NETWORK, VOLUME, ON_JOIN,
    ON_LEAVE,
];

/// A registry with every built-in kind. Container kinds are registered
/// even without a tool so that making one reports the tool as unavailable
/// rather than the kind as unknown.
pub fn registry(config: &CircuitConfig, tools: &Tools) -> ElementRegistry {
    let registry = ElementRegistry::with_builtins();
    registry.register(
        CHAN,
        ChanFactory::new(config.std_buffer),
        adapter_for::<YValve>(),
    );
    registry.register(
        PROC,
        ProcFactory::new(config.std_buffer),
        adapter_for::<YProc>(),
    );
    registry.register(
        NAMESERVER,
        DnsFactory::new(config.dns_bind.clone()),
        adapter_for::<YNameserver>(),
    );
    registry.register(WASM, WasmFactory, adapter_for::<YWasm>());

    registry.register(
        DOCKER,
        ContainerFactory::new(DOCKER, tools.docker.clone()).with_buffer(config.std_buffer),
        adapter_for::<YContainer>(),
    );
    registry.register(
        CONTAINER,
        ContainerFactory::new(CONTAINER, tools.podman.clone()).with_buffer(config.std_buffer),
        adapter_for::<YContainer>(),
    );
    for (kind, noun) in [(POD, Noun::Pod), (NETWORK, Noun::Network), (VOLUME, Noun::Volume)] {
        registry.register(
            kind,
            ResourceFactory::new(kind, noun, tools.podman.clone()),
            adapter_for::<YResource>(),
        );
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_registered() {
        let registry = registry(&CircuitConfig::default(), &Tools::default());
        let mut expected: Vec<String> = KINDS.iter().map(|k| k.to_string()).collect();
        expected.sort();
        assert_eq!(registry.kinds(), expected);
    }
}
