//! Minimal renaming from donor-string suffixes.
//!
//! Every output type name must be backed by bytes already present in the
//! module's string data, so renaming never grows the string heap: names are
//! suffixes of donor strings (typically external-reference names the heap
//! carries anyway). Donors are consumed in table order; within one donor the
//! suffixes grow leftward from the end, so the shortest names go first.
//!
//! Types are renamed in descending caller-supplied priority (default 0, ties
//! broken by declaration order), letting hot metadata rows take the one-byte
//! names. Injectivity is enforced by a used-name set; a suffix already handed
//! out is skipped, which also covers equal suffixes of different donors.

use std::collections::HashSet;

use tracing::debug;

use crate::{
    graph::{Module, TypeId},
    passes::{LinkContext, ModulePass},
    Error, Result,
};

/// Assigns each retained named type the shortest unused donor suffix.
pub struct RenamePass;

impl Default for RenamePass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenamePass {
    /// Creates the renaming pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for RenamePass {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn description(&self) -> &'static str {
        "Renames retained types to minimal donor-string suffixes"
    }

    fn run(&self, module: &mut Module, ctx: &mut LinkContext) -> Result<bool> {
        let mut order: Vec<TypeId> = module
            .type_list
            .iter()
            .copied()
            .filter(|&t| module.type_def(t).name.is_some())
            .collect();
        // Stable: declaration order breaks priority ties.
        order.sort_by_key(|t| {
            std::cmp::Reverse(ctx.name_priorities.get(t).copied().unwrap_or(0))
        });

        let mut supply = SuffixSupply::new(&module.donor_strings);
        let mut used: HashSet<String> = HashSet::new();
        for &t in &order {
            let name = supply.next_unused(&mut used)?;
            let def = module.type_def_mut(t);
            def.name = Some(name);
            def.namespace = None;
        }

        debug!(renamed = order.len(), "assigned donor-suffix names");
        Ok(!order.is_empty())
    }
}

/// Walks donor suffixes: per donor from the end growing leftward, donors in
/// table order.
struct SuffixSupply {
    donors: Vec<Vec<char>>,
    donor: usize,
    len: usize,
}

impl SuffixSupply {
    fn new(donors: &[String]) -> Self {
        Self {
            donors: donors.iter().map(|d| d.chars().collect()).collect(),
            donor: 0,
            len: 1,
        }
    }

    fn next_unused(&mut self, used: &mut HashSet<String>) -> Result<String> {
        loop {
            let Some(donor) = self.donors.get(self.donor) else {
                return Err(Error::NameExhaustion);
            };
            if self.len > donor.len() {
                self.donor += 1;
                self.len = 1;
                continue;
            }
            let candidate: String = donor[donor.len() - self.len..].iter().collect();
            self.len += 1;
            if used.insert(candidate.clone()) {
                return Ok(candidate);
            }
        }
    }
}
