// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The mock package repository used by splice scenarios.
//!
//! - `splice-z` is a leaf whose newer releases may replace older `+compat`
//!   builds; `splice-h` depends on it; `splice-t` depends on both;
//!   `splice-depends-on-t` sits one level above.
//! - `virtual-abi-1`, `virtual-abi-2` and `virtual-abi-multi` provide
//!   `virtual-with-abi`; `virtual-abi-multi abi=one|two` is interchangeable
//!   with the single-ABI providers in both directions.
//! - `depends-on-abi-consumers` links two separate consumers of
//!   `virtual-with-abi`, which may be wired to different providers.
//! - `manyvariants` exercises `*`, explicit and default variant selectors.

use splicer_core::{DepTypes, MemoryRepository, PackageDef, RequestError, VariantDecl, VariantSelector};

/// Names of every package in [`mock_repository`].
pub const MOCK_PACKAGES: &[&str] = &[
    "splice-z",
    "splice-h",
    "splice-t",
    "splice-depends-on-t",
    "virtual-abi-1",
    "virtual-abi-2",
    "virtual-abi-multi",
    "depends-on-virtual-with-abi",
    "also-depends-on-virtual-with-abi",
    "depends-on-abi-consumers",
    "manyvariants",
    "depends-on-manyvariants",
];

/// Builds the mock repository.
pub fn mock_repository() -> Result<MemoryRepository, RequestError> {
    let repo = MemoryRepository::new()
        .with(splice_z()?)
        .with(splice_h()?)
        .with(
            PackageDef::new("splice-t")
                .version("1.0")?
                .depends_on("splice-h", DepTypes::DEFAULT)?
                .depends_on("splice-z", DepTypes::DEFAULT)?,
        )
        .with(
            PackageDef::new("splice-depends-on-t")
                .version("1.0")?
                .depends_on("splice-t", DepTypes::DEFAULT)?,
        )
        .with(
            PackageDef::new("virtual-abi-1")
                .version("1.0")?
                .provides("virtual-with-abi"),
        )
        .with(
            PackageDef::new("virtual-abi-2")
                .version("1.0")?
                .provides("virtual-with-abi"),
        )
        .with(virtual_abi_multi()?)
        .with(
            PackageDef::new("depends-on-virtual-with-abi")
                .version("1.0")?
                .depends_on("virtual-with-abi", DepTypes::DEFAULT)?,
        )
        .with(
            PackageDef::new("also-depends-on-virtual-with-abi")
                .version("1.0")?
                .depends_on("virtual-with-abi", DepTypes::DEFAULT)?,
        )
        .with(
            PackageDef::new("depends-on-abi-consumers")
                .version("1.0")?
                .depends_on("depends-on-virtual-with-abi", DepTypes::DEFAULT)?
                .depends_on("also-depends-on-virtual-with-abi", DepTypes::DEFAULT)?,
        )
        .with(manyvariants()?)
        .with(
            PackageDef::new("depends-on-manyvariants")
                .version("1.0")?
                .version("2.0")?
                .depends_on_when("manyvariants@1.0", "@1.0", DepTypes::DEFAULT)?
                .depends_on_when("manyvariants@2.0", "@2.0", DepTypes::DEFAULT)?,
        );
    Ok(repo)
}

fn splice_z() -> Result<PackageDef, RequestError> {
    PackageDef::new("splice-z")
        .version("1.0.0")?
        .version("1.0.1")?
        .version("1.0.2")?
        .variant(VariantDecl::boolean("foo", false))
        .variant(VariantDecl::boolean("bar", false))
        .variant(VariantDecl::boolean("compat", true))
        .can_splice("splice-z@1.0.1:1.0.2+compat", "splice-z@1.0.0+compat", None)?
        .can_splice("splice-z@1.0.2+compat", "splice-z@1.0.1+compat", None)
}

fn splice_h() -> Result<PackageDef, RequestError> {
    PackageDef::new("splice-h")
        .version("1.0.0")?
        .version("1.0.1")?
        .version("1.0.2")?
        .variant(VariantDecl::boolean("foo", false))
        .variant(VariantDecl::boolean("compat", true))
        .depends_on("splice-z", DepTypes::DEFAULT)?
        .depends_on_when("splice-z+foo", "+foo", DepTypes::DEFAULT)?
        .can_splice("splice-h@1.0.1:1.0.2+compat", "splice-h@1.0.0+compat", None)?
        .can_splice("splice-h@1.0.2+compat", "splice-h@1.0.1+compat", None)
}

fn virtual_abi_multi() -> Result<PackageDef, RequestError> {
    PackageDef::new("virtual-abi-multi")
        .version("1.0")?
        .variant(VariantDecl::single("abi", "one", ["one", "two"]))
        .provides("virtual-with-abi")
        .can_splice("virtual-abi-multi@1.0 abi=one", "virtual-abi-1@1.0", None)?
        .can_splice("virtual-abi-multi@1.0 abi=two", "virtual-abi-2@1.0", None)?
        .can_splice("virtual-abi-1@1.0", "virtual-abi-multi@1.0 abi=one", None)?
        .can_splice("virtual-abi-2@1.0", "virtual-abi-multi@1.0 abi=two", None)
}

fn manyvariants() -> Result<PackageDef, RequestError> {
    let values = ["v1", "v2", "v3"];
    PackageDef::new("manyvariants")
        .version("1.0.0")?
        .version("1.0.1")?
        .version("2.0.0")?
        .version("2.0.1")?
        .variant(VariantDecl::boolean("a", true))
        .variant(VariantDecl::boolean("b", false))
        .variant(VariantDecl::single("c", "v1", values))
        .variant(VariantDecl::single("d", "v1", values))
        .can_splice("manyvariants@1.0.1", "manyvariants@1.0.0", Some(VariantSelector::All))?
        .can_splice(
            "manyvariants@2.0.1~a+b",
            "manyvariants@2.0.0+a~b",
            Some(VariantSelector::only(["c", "d"])),
        )?
        .can_splice("manyvariants@2.0.1+a+b", "manyvariants@2.0.0 c=v1 d=v1", None)
}
