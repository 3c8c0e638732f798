//! # `DexVerify`
//!
//! `dexverify` is the main crate of the `DexVerify` Dalvik bytecode verification
//! project. The project is subdivided into multiple crates, `dexverify` acts as
//! entry point by reexporting important structs and functions from those
//! sub-crates. Most of the reexport are done within the `dexverify::prelude`
//! namespace.
//!
//! ## Library basics
//!
//! Methods are handed over already decoded, along with the classes they may refer to.
//! The classes are gathered into a [`Hierarchy`](prelude::Hierarchy), then each method
//! is verified against it:
//!
//! ```rust
//! use dexverify::analysis;
//! use dexverify::dex::classes::ClassFlags;
//! use dexverify::dex::instrs::{Instr, InvokeKind};
//! use dexverify::dex::methods::MethodFlags;
//! use dexverify::dex::registers::Reg;
//! use dexverify::prelude::*;
//!
//! let point = DexType::class("Point");
//! let hierarchy = Hierarchy::from_classes(vec![ClassDef::new(
//!     point.clone(),
//!     ClassFlags::ACC_PUBLIC,
//!     Some(DexType::class("java/lang/Object")),
//! )])?;
//!
//! let v0 = Reg::from(0u8);
//! let init = MethodRef::new(point.clone(), "<init>", vec![], DexType::Void);
//! let code = Code::assemble(
//!     1,
//!     0,
//!     vec![
//!         Instr::NewInstance(v0, point),
//!         Instr::Invoke(InvokeKind::Direct, init, vec![v0]),
//!         Instr::ReturnVoid,
//!     ],
//!     vec![],
//! )?;
//! let method = Method::new(
//!     MethodRef::new(DexType::class("Main"), "main", vec![], DexType::Void),
//!     MethodFlags::ACC_STATIC,
//!     Some(code),
//! );
//!
//! let verification = analysis::verify(&method, &hierarchy, VerifierOptions::default())?;
//! assert!(verification.is_ok());
//! # Ok::<(), DvError>(())
//! ```
//!
//! Whole sets of methods are verified in parallel with [`verify_methods`].
//!
//! ## Sub-crates
//!
//!  - [`dv_dex`] contains the decoded dex data structures (types, method and field
//!    references, instructions, method code, class definitions, source positions),
//!  - [`dv_analysis`] contains the control flow graph construction, the dataflow
//!    framework, the class hierarchy oracle and the register types verifier.

mod batch;
mod errors;

pub use crate::batch::{verify_methods, BatchOptions, BatchReport, MethodReport};
pub use dv_analysis as analysis;
pub use dv_dex as dex;

/// Reexport module of commonly used structures and functions from `DexVerify` project
/// sub-crates:
///
/// ```rust
/// use dexverify::prelude::*;
/// ```
pub mod prelude {
    pub use crate::batch::{verify_methods, BatchOptions, BatchReport};
    pub use crate::errors::{DvError, DvResult};

    pub use dv_analysis::controlflow;
    pub use dv_analysis::hierarchy::{ClassHierarchy, Hierarchy};
    pub use dv_analysis::typing::errors::{Violation, ViolationKind};
    pub use dv_analysis::typing::{RegisterType, Verification, VerifierOptions};

    pub use dv_dex::classes::ClassDef;
    pub use dv_dex::code::Code;
    pub use dv_dex::methods::{Method, MethodRef};
    pub use dv_dex::{Addr, DexType, SourcePosition};

    /// Logging settings.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct LogConfig {
        /// Log at debug level.
        pub debug: bool,
        /// Log at trace level, overrides `debug`.
        pub verbose: bool,
        /// Log records as ECS JSON documents.
        pub ecslog: bool,
    }

    /// Installs the global logger.
    ///
    /// The level defaults to `info` and can be set with the `DV_LOG` environment variable,
    /// unless `config` forces a level. Colors follow `DV_LOG_STYLE`.
    ///
    /// # Errors
    ///
    /// Fails if a global logger is already installed.
    pub fn init_logger(config: &LogConfig) -> DvResult<()> {
        let env = env_logger::Env::new()
            .filter_or("DV_LOG", "info")
            .write_style("DV_LOG_STYLE");

        let mut builder = env_logger::Builder::from_env(env);
        if config.verbose {
            builder.filter_level(log::LevelFilter::Trace);
        } else if config.debug {
            builder.filter_level(log::LevelFilter::Debug);
        }
        if config.ecslog {
            builder.format(ecs_logger::format);
        }
        builder.try_init()?;
        Ok(())
    }
}
