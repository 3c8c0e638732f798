//! Verification of many methods at once.

use crate::errors::DvResult;
use dv_analysis::errors::AnalysisResult;
use dv_analysis::hierarchy::ClassHierarchy;
use dv_analysis::typing::{Verification, VerifierOptions};
use dv_dex::methods::{Method, MethodRef};
use rayon::prelude::*;
use regex::Regex;

/// Selection of the methods to verify, and verifier settings.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Only verify methods of classes whose descriptor matches.
    pub class_filter: Option<Regex>,
    /// Only verify methods whose name matches.
    pub method_filter: Option<Regex>,
    pub verifier: VerifierOptions,
}

impl BatchOptions {
    /// Builds options from optional class and method regex patterns.
    ///
    /// # Errors
    ///
    /// Fails if a pattern is not a valid regex.
    pub fn new(
        class_filter: Option<&str>,
        method_filter: Option<&str>,
        verifier: VerifierOptions,
    ) -> DvResult<Self> {
        Ok(Self {
            class_filter: class_filter.map(Regex::new).transpose()?,
            method_filter: method_filter.map(Regex::new).transpose()?,
            verifier,
        })
    }

    fn selects(&self, method: &Method) -> bool {
        let class_name = method.definer().to_string();
        self.class_filter
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(&class_name))
            && self
                .method_filter
                .as_ref()
                .map_or(true, |pattern| pattern.is_match(method.descriptor().name()))
    }
}

/// Verification outcome of a single method.
#[derive(Debug)]
pub struct MethodReport<'a> {
    pub method: &'a MethodRef,
    pub outcome: AnalysisResult<Verification<'a>>,
}

/// Outcome of a batch verification, in input order.
#[derive(Debug)]
pub struct BatchReport<'a> {
    pub reports: Vec<MethodReport<'a>>,
}

impl<'a> BatchReport<'a> {
    /// Number of methods verified without violation.
    #[must_use]
    pub fn nb_verified(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| matches!(&report.outcome, Ok(v) if v.is_ok()))
            .count()
    }

    /// Number of methods with at least one violation.
    #[must_use]
    pub fn nb_rejected(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| matches!(&report.outcome, Ok(v) if !v.is_ok()))
            .count()
    }

    /// Number of methods that could not be analyzed at all.
    #[must_use]
    pub fn nb_failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.outcome.is_err())
            .count()
    }
}

/// Verifies the selected methods that have code, in parallel.
///
/// Errors raised for a method are stored in its report and do not stop the verification
/// of the other ones.
pub fn verify_methods<'a, H>(
    methods: &'a [Method],
    hierarchy: &'a H,
    options: &BatchOptions,
) -> BatchReport<'a>
where
    H: ClassHierarchy + Sync,
{
    log::debug!(
        "filtering methods on class pattern {:?}, method pattern {:?}",
        options.class_filter,
        options.method_filter
    );

    let reports: Vec<MethodReport<'a>> = methods
        .par_iter()
        .filter(|method| method.code().is_some() && options.selects(method))
        .map(|method| {
            log::info!("verify {}", method.descriptor());
            let outcome = Verification::compute(method, hierarchy, options.verifier);
            match &outcome {
                Ok(verification) => {
                    for violation in verification.violations() {
                        log::error!("{}: {violation}", method.descriptor());
                    }
                }
                Err(err) => log::error!("{}: {err}", method.descriptor()),
            }
            MethodReport {
                method: method.descriptor(),
                outcome,
            }
        })
        .collect();

    let report = BatchReport { reports };
    log::info!(
        "verified methods: {} / {} ({} rejected, {} failed)",
        report.nb_verified(),
        report.reports.len(),
        report.nb_rejected(),
        report.nb_failed()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_analysis::hierarchy::Hierarchy;
    use dv_dex::classes::{ClassDef, ClassFlags};
    use dv_dex::code::Code;
    use dv_dex::instrs::{Instr, InvokeKind};
    use dv_dex::methods::MethodFlags;
    use dv_dex::registers::Reg;
    use dv_dex::DexType;

    fn hierarchy() -> Hierarchy {
        Hierarchy::from_classes(vec![ClassDef::new(
            DexType::class("Point"),
            ClassFlags::ACC_PUBLIC,
            Some(DexType::class("java/lang/Object")),
        )])
        .unwrap()
    }

    fn method(class: &str, name: &str, registers: u16, instrs: Option<Vec<Instr>>) -> Method {
        Method::new(
            MethodRef::new(DexType::class(class), name, vec![], DexType::Void),
            MethodFlags::ACC_STATIC,
            instrs.map(|instrs| Code::assemble(registers, 0, instrs, vec![]).unwrap()),
        )
    }

    fn methods() -> Vec<Method> {
        let v0 = Reg::from(0u8);
        let init = MethodRef::new(DexType::class("Point"), "<init>", vec![], DexType::Void);
        vec![
            method(
                "Main",
                "good",
                1,
                Some(vec![
                    Instr::NewInstance(v0, DexType::class("Point")),
                    Instr::Invoke(InvokeKind::Direct, init, vec![v0]),
                    Instr::ReturnVoid,
                ]),
            ),
            method(
                "Main",
                "leak",
                1,
                Some(vec![
                    Instr::NewInstance(v0, DexType::class("Point")),
                    Instr::ReturnVoid,
                ]),
            ),
            method("Main", "broken", 1, Some(vec![Instr::Goto(dv_dex::Addr(7))])),
            method("Main", "native", 0, None),
            method("Other", "good", 1, Some(vec![Instr::ReturnVoid])),
        ]
    }

    #[test]
    fn counts() {
        let h = hierarchy();
        let methods = methods();
        let report = verify_methods(&methods, &h, &BatchOptions::default());
        assert_eq!(report.reports.len(), 4);
        assert_eq!(report.nb_verified(), 2);
        assert_eq!(report.nb_rejected(), 1);
        assert_eq!(report.nb_failed(), 1);
        let names: Vec<&str> = report.reports.iter().map(|r| r.method.name()).collect();
        assert_eq!(names, vec!["good", "leak", "broken", "good"]);
    }

    #[test]
    fn filters() {
        let h = hierarchy();
        let methods = methods();
        let options = BatchOptions::new(Some("^LMain;$"), Some("^(good|leak)$"), VerifierOptions::default())
            .unwrap();
        let report = verify_methods(&methods, &h, &options);
        assert_eq!(report.reports.len(), 2);
        assert_eq!(report.nb_verified(), 1);
        assert_eq!(report.nb_rejected(), 1);

        assert!(BatchOptions::new(Some("("), None, VerifierOptions::default()).is_err());
    }
}
