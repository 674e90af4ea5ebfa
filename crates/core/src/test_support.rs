// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test-only constructors, gated behind `test-support` so downstream crates
//! can build fixtures without duplicating field lists.

use std::collections::BTreeMap;

use crate::agent::Agent;
use crate::image::{Image, ImageId};
use crate::module::ModuleCatalogEntry;

pub fn test_agent(name: &str) -> Agent {
    Agent::new(name)
}

pub fn test_image(name: &str, size: usize) -> Image {
    Image::new(ImageId::new(), name, size)
}

pub fn test_module(name: &str, image_id: ImageId) -> ModuleCatalogEntry {
    ModuleCatalogEntry::new(name, image_id)
}

pub fn test_config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
