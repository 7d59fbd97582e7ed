//! Helper registry: maps the fixed helper names the emitter may call by
//! name to the native address implementing each one.

use rustc_hash::FxHashMap;

use jitvm_abi::REQUIRED_HELPERS;

/// A resolved table of helper name → native entry address. Construction
/// never fails on a missing entry — [`Self::missing`] lets a driver
/// surface gaps before compiling anything that would need them.
#[derive(Default)]
pub struct HelperRegistry {
    addresses: FxHashMap<&'static str, usize>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` against `addr`. `name` must be one of
    /// [`REQUIRED_HELPERS`] — anything else indicates the emitter and
    /// this registry have drifted apart, which is a programmer error
    /// rather than a runtime condition, so it panics.
    pub fn register(&mut self, name: &'static str, addr: usize) {
        assert!(
            REQUIRED_HELPERS.contains(&name),
            "'{name}' is not a recognized helper name"
        );
        self.addresses.insert(name, addr);
    }

    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.addresses.get(name).copied()
    }

    pub fn missing(&self) -> Vec<&'static str> {
        REQUIRED_HELPERS
            .iter()
            .copied()
            .filter(|h| !self.addresses.contains_key(h))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_incomplete() {
        let registry = HelperRegistry::new();
        assert!(!registry.is_complete());
        assert_eq!(registry.missing().len(), REQUIRED_HELPERS.len());
    }

    #[test]
    fn registering_every_required_helper_completes_it() {
        let mut registry = HelperRegistry::new();
        for (i, name) in REQUIRED_HELPERS.iter().enumerate() {
            registry.register(name, 0x1000 + i);
        }
        assert!(registry.is_complete());
        assert_eq!(registry.resolve("IsTruthy"), registry.resolve("IsTruthy"));
    }

    #[test]
    #[should_panic(expected = "is not a recognized helper name")]
    fn registering_an_unknown_name_panics() {
        let mut registry = HelperRegistry::new();
        registry.register("NotARealHelper", 0);
    }
}
