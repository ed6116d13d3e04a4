//! The one-shot build driver.
//!
//! [`Linker`] owns the module graph for the duration of the build and runs
//! the fixed pass pipeline over it, then serializes the result. The pipeline
//! mutates the graph destructively, so each linker builds exactly once; a
//! second call fails with [`Error::AlreadyBuilt`] before touching anything.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    graph::{Module, TypeId},
    passes::{
        FlattenPass, InlinePass, LinkContext, MergeBlobsPass, MergeStaticsPass, ModulePass,
        PeepholePass, ReachabilityPass, RenamePass, RootSpec, StripAttributesPass, TrimPass,
    },
    verify::verify_module,
    write::{write_module, BinaryImage},
    Error, Result,
};

/// Build inputs: the external contract between the caller and the pipeline.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Members the output must keep and expose (an entry type, exported
    /// methods). The closure grows from these.
    pub roots: Vec<RootSpec>,
    /// Delete types outside the closure (`true`, the default) or keep them
    /// as trimmed shells in the output container.
    pub remove_other_types: bool,
    /// Run the peephole simplification pass.
    pub peephole: bool,
    /// Run the donor-suffix renamer.
    pub rename: bool,
    /// Per-type renaming priority; higher values receive shorter names.
    pub name_priorities: HashMap<TypeId, i32>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            remove_other_types: true,
            peephole: true,
            rename: true,
            name_priorities: HashMap::new(),
        }
    }
}

/// Owns a module graph and minimizes it into a [`BinaryImage`].
///
/// # Examples
///
/// ```rust,no_run
/// use cilshrink::{BuildOptions, Linker, graph::Module};
///
/// let module = Module::new("app");
/// let mut linker = Linker::new(module);
/// let image = linker.build(&BuildOptions::default())?;
/// std::fs::write("app.min.dll", &*image)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Linker {
    module: Module,
    built: bool,
}

impl Linker {
    /// Wraps a loader-populated module graph.
    #[must_use]
    pub fn new(module: Module) -> Self {
        Self {
            module,
            built: false,
        }
    }

    /// Runs the full pipeline and serializes the minimized image.
    ///
    /// The graph is spent afterwards, whether the build succeeded or not.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyBuilt`] on a second call; otherwise whatever a pass
    /// or the serializer reports ([`Error::UnsupportedInline`],
    /// [`Error::NameExhaustion`], [`Error::Verification`],
    /// [`Error::Structural`]).
    pub fn build(&mut self, options: &BuildOptions) -> Result<BinaryImage> {
        if self.built {
            return Err(Error::AlreadyBuilt);
        }
        self.built = true;

        let mut ctx = LinkContext {
            roots: options.roots.clone(),
            remove_other_types: options.remove_other_types,
            name_priorities: options.name_priorities.clone(),
            referenced: Default::default(),
        };

        let mut pipeline: Vec<Box<dyn ModulePass>> = vec![
            Box::new(FlattenPass::new()),
            Box::new(MergeStaticsPass::new()),
            Box::new(StripAttributesPass::new()),
            Box::new(MergeBlobsPass::new()),
            Box::new(InlinePass::new()),
            Box::new(ReachabilityPass::new()),
            Box::new(TrimPass::new()),
        ];
        if options.peephole {
            pipeline.push(Box::new(PeepholePass::new()));
        }
        if options.rename {
            pipeline.push(Box::new(RenamePass::new()));
        }

        for pass in &pipeline {
            let changed = pass.run(&mut self.module, &mut ctx)?;
            debug!(pass = pass.name(), changed, "pass finished");
        }

        verify_module(&self.module)?;
        write_module(&self.module)
    }

    /// The module graph, for post-build inspection.
    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }
}
