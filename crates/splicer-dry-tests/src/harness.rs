// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Install-then-concretize harness over an in-memory store.

use splicer_core::{
    ConcreteSpec, ConcretizeError, Concretizer, InstallStore, MemoryInstallStore, MemoryRepository,
    Policy, RequestError, Resolution, ReusePool,
};

use crate::packages::mock_repository;

/// Installs specs with a plain policy, then concretizes goals against them
/// under a configurable one.
///
/// # Example
///
/// ```
/// use splicer_dry_tests::SpliceHarness;
///
/// let mut harness = SpliceHarness::new().unwrap();
/// harness.install("splice-z@1.0.0+compat").unwrap();
/// harness.non_buildable(&["splice-z"]);
/// let resolution = harness.concretize("splice-z").unwrap();
/// assert_eq!(resolution.reused.len(), 1);
/// ```
pub struct SpliceHarness {
    repo: MemoryRepository,
    store: MemoryInstallStore,
    policy: Policy,
}

impl SpliceHarness {
    /// Harness over the mock repository with an empty store.
    pub fn new() -> Result<Self, RequestError> {
        Ok(Self::with_repository(mock_repository()?))
    }

    /// Harness over `repo` with an empty store.
    pub fn with_repository(repo: MemoryRepository) -> Self {
        Self {
            repo,
            store: MemoryInstallStore::new(),
            policy: Policy::default(),
        }
    }

    /// Concretizes `request` with the default policy against what is already
    /// installed, then installs the result.
    pub fn install(&mut self, request: &str) -> Result<ConcreteSpec, ConcretizeError> {
        let spec = Concretizer::new(&self.repo, Policy::default())
            .concretize_str(request, &self.store.snapshot())?
            .spec;
        self.store.install(&spec);
        Ok(spec)
    }

    /// Installs each request in order.
    pub fn install_all(&mut self, requests: &[&str]) -> Result<Vec<ConcreteSpec>, ConcretizeError> {
        requests.iter().map(|r| self.install(r)).collect()
    }

    /// Marks `packages` non-buildable for subsequent goals.
    pub fn non_buildable(&mut self, packages: &[&str]) -> &mut Self {
        for name in packages {
            self.policy = std::mem::take(&mut self.policy).non_buildable(*name);
        }
        self
    }

    /// Declares an external for `package` for subsequent goals.
    pub fn with_external(&mut self, package: &str, spec: &str, prefix: &str) -> &mut Self {
        self.policy = std::mem::take(&mut self.policy).with_external(package, spec, prefix);
        self
    }

    /// Enables the splice fallback for subsequent goals.
    pub fn enable_splicing(&mut self) -> &mut Self {
        self.policy.splice.automatic = true;
        self
    }

    /// Mutable access to the goal policy.
    pub fn policy_mut(&mut self) -> &mut Policy {
        &mut self.policy
    }

    /// Concretizes `request` under the goal policy.
    pub fn concretize(&self, request: &str) -> Result<Resolution, ConcretizeError> {
        Concretizer::new(&self.repo, self.policy.clone()).concretize_str(request, &self.snapshot())
    }

    /// Current store contents.
    pub fn snapshot(&self) -> ReusePool {
        self.store.snapshot()
    }

    /// The repository.
    pub fn repository(&self) -> &MemoryRepository {
        &self.repo
    }
}
