//! Per-command exit-code interpretation.
//!
//! The governed tool defines what each exit code means per subcommand. Some
//! commands exit 1 to say "completed with findings" while still printing a
//! valid report; for everything else only 0 is success.

use std::collections::BTreeMap;

/// Commands whose exit code 1 still carries a valid report.
const BUILTIN: &[(&str, &[i32])] = &[
    // Findings present.
    ("check", &[0, 1]),
    // At least one self-check warned.
    ("doctor", &[0, 1]),
    // Change is blocked.
    ("preflight", &[0, 1]),
];

/// Lookup table `command → exit codes that are not failures`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPolicy {
    table: BTreeMap<String, Vec<i32>>,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        let table = BUILTIN
            .iter()
            .map(|(command, codes)| ((*command).to_string(), codes.to_vec()))
            .collect();
        Self { table }
    }
}

impl ExitPolicy {
    /// Only exit code 0 is success, for every command.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    /// Replace the success set for `command`.
    #[must_use]
    pub fn with(mut self, command: impl Into<String>, codes: impl Into<Vec<i32>>) -> Self {
        self.table.insert(command.into(), codes.into());
        self
    }

    /// Layer entries over the current table; later entries win.
    #[must_use]
    pub fn extended<'a, I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<i32>)>,
    {
        for (command, codes) in entries {
            self.table.insert(command.clone(), codes.clone());
        }
        self
    }

    #[must_use]
    pub fn success_codes(&self, command: &str) -> &[i32] {
        self.table.get(command).map_or(&[0][..], Vec::as_slice)
    }

    #[must_use]
    pub fn is_success(&self, command: &str, exit_code: i32) -> bool {
        self.success_codes(command).contains(&exit_code)
    }
}
