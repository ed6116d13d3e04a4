use thiserror::Error;

use crate::graph::{InstrId, MethodId};

macro_rules! structural_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Structural {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Structural {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Why the inliner refused to rewrite a particular call site.
///
/// These are expected, caller-recoverable conditions: the input pattern falls
/// outside what the inliner can rewrite while preserving observational
/// equivalence. The offending method and call site are carried by
/// [`Error::UnsupportedInline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineRejection {
    /// The inline target stores into one of its own parameters.
    ParameterMutation,
    /// The inline target takes the address of a parameter whose argument does
    /// not reduce to a bare local load.
    AddressOfNonLocal,
    /// An instruction inside an argument evaluation window has non-trivial
    /// control flow (anything other than fallthrough or a call).
    BranchInArgument,
    /// The inline target is directly or mutually recursive with another
    /// inline target. Unsupported pending an explicit design.
    RecursiveTarget,
}

impl std::fmt::Display for InlineRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InlineRejection::ParameterMutation => write!(f, "parameter mutation"),
            InlineRejection::AddressOfNonLocal => write!(f, "address-of non-local argument"),
            InlineRejection::BranchInArgument => write!(f, "branch inside argument expression"),
            InlineRejection::RecursiveTarget => write!(f, "recursive inline target"),
        }
    }
}

/// The generic Error type, covering every failure the linker can return.
///
/// All failures are fatal to the build: either a fully valid minimized image
/// is produced, or one of these errors is returned and the module graph must
/// be considered spent. The variants split into two families:
///
/// ## Expected input conditions
/// - [`Error::AlreadyBuilt`] - a second build on a consumed linker
/// - [`Error::UnsupportedInline`] - a call-site pattern the inliner rejects
/// - [`Error::NameExhaustion`] - the renamer ran out of donor string bytes
///
/// ## Invariant violations (defects in a pass, not in the input)
/// - [`Error::Verification`] - a post-pass structural check failed
/// - [`Error::Structural`] - a dangling reference or broken graph invariant
///
/// # Examples
///
/// ```rust,no_run
/// use cilshrink::{Error, Linker, BuildOptions, graph::Module};
///
/// let mut linker = Linker::new(Module::new("app"));
/// match linker.build(&BuildOptions::default()) {
///     Ok(image) => println!("minimized image: {} bytes", image.len()),
///     Err(Error::UnsupportedInline { method, reason, .. }) => {
///         eprintln!("cannot inline {method}: {reason}");
///     }
///     Err(e) => eprintln!("build failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A second build was requested on the same linker.
    ///
    /// The pipeline mutates the module graph destructively, so a build may
    /// run exactly once. The second call is rejected before any mutation.
    #[error("The module has already been built")]
    AlreadyBuilt,

    /// The inliner hit a call-site or argument pattern it cannot safely
    /// rewrite.
    ///
    /// # Fields
    ///
    /// * `method` - The method whose body contains the offending call site
    /// * `site` - The call (or argument) instruction that triggered the rejection
    /// * `reason` - Which precondition was violated
    #[error("Unsupported inline input in {method} at {site}: {reason}")]
    UnsupportedInline {
        /// The method whose body contains the offending call site
        method: MethodId,
        /// The instruction that triggered the rejection
        site: InstrId,
        /// Which inliner precondition was violated
        reason: InlineRejection,
    },

    /// The renamer has no remaining donor string material.
    ///
    /// Every donor string in the module's donor table has been consumed and
    /// at least one retained type is still waiting for a name.
    #[error("Renamer ran out of donor strings")]
    NameExhaustion,

    /// A post-pass structural check failed.
    ///
    /// An unresolved branch label, a negative or residual stack depth, or a
    /// similar inconsistency was found after a transformation pass ran. This
    /// indicates a defect in that pass, not in the input module.
    #[error("Verification failed after pass '{pass}': {detail}")]
    Verification {
        /// Name of the pass whose output failed verification
        pass: &'static str,
        /// Instruction-level context for the failure
        detail: String,
    },

    /// A graph invariant was violated.
    ///
    /// Typically a dangling member reference discovered after the
    /// reachability closure. Unreachable if the passes run in their
    /// contracted order; the source location is captured for debugging.
    #[error("Structural - {file}:{line}: {message}")]
    Structural {
        /// Description of the broken invariant
        message: String,
        /// The source file in which this error was raised
        file: &'static str,
        /// The source line in which this error was raised
        line: u32,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
