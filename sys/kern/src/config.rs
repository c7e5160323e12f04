// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel configuration.
//!
//! The kernel takes a single configuration record at construction. It can be
//! built in code (tests mostly use `KernelConfig::default()`) or parsed from
//! a TOML fragment, which is how a hosting environment would carry it.

use serde::Deserialize;

/// Tunable kernel parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    /// Which process capability bundle to instantiate for new processes.
    /// Checked against the known set at kernel construction; see
    /// [`crate::proc::process::ops_for_kind`].
    pub process_kind: String,
    /// Required suffix of executable names passed to `exec`. Matched
    /// literally against the end of the name, extension separator included
    /// in the file name rather than here.
    pub exe_extension: String,
    /// Number of stack pages given to every process, between the program
    /// image and the argument page.
    pub stack_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            process_kind: "base".to_string(),
            exe_extension: "mno".to_string(),
            stack_pages: 8,
        }
    }
}

impl KernelConfig {
    /// Parses a configuration from TOML text. Missing keys take their
    /// default values; unknown keys are rejected.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
