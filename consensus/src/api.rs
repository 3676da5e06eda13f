//! RPC namespaces contributed by an engine.

/// Descriptor of an engine-provided RPC namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineApi {
    pub namespace: &'static str,
    pub version: &'static str,
    pub public: bool,
}
