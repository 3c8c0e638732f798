//! Classes hierarchy: the assignability oracle consulted by the verifier.

use crate::errors::{AnalysisError, AnalysisResult};
use crate::typing::{JAVA_IO_SERIALIZABLE, JAVA_LANG_CLONEABLE, JAVA_LANG_OBJECT};
use dv_dex::classes::{ClassDef, ClassFlags};
use dv_dex::methods::MethodRef;
use dv_dex::DexType;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::BTreeMap;
use std::fmt;

/// Read-only view over the classes known to the verifier.
///
/// Implementations are shared by every method analysis; when methods are verified in
/// parallel they must also be [`Sync`].
pub trait ClassHierarchy {
    /// Returns the definition of a class, if known.
    fn class_def(&self, class: &DexType) -> Option<&ClassDef>;

    /// Checks if a value of type `from` can be used where a value of type `to` is required.
    fn is_assignable(&self, from: &DexType, to: &DexType) -> bool;

    /// Returns the nearest type both given types are assignable to, if any.
    fn common_supertype(&self, t1: &DexType, t2: &DexType) -> Option<DexType>;

    fn superclass_of(&self, class: &DexType) -> Option<DexType> {
        self.class_def(class).and_then(ClassDef::superclass).cloned()
    }

    /// Checks if `method` is one of the constructors of `class`.
    fn is_constructor_of(&self, method: &MethodRef, class: &DexType) -> bool {
        method.is_constructor()
            && method.definer() == class
            && self
                .class_def(class)
                .map_or(true, |class_def| class_def.declares(method))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Inheritance {
    Extends,
    Implements,
}

impl fmt::Display for Inheritance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Extends => write!(f, "<extends>"),
            Self::Implements => write!(f, "<implements>"),
        }
    }
}

fn is_array_supertype(typ: &DexType) -> bool {
    *typ == *JAVA_LANG_OBJECT || *typ == *JAVA_LANG_CLONEABLE || *typ == *JAVA_IO_SERIALIZABLE
}

/// Classes hierarchy graph.
///
/// Nodes are class definitions, edges go from a class to its superclass and to the
/// interfaces it implements. Every class is linked, directly or not, to `java.lang.Object`.
#[derive(Debug)]
pub struct Hierarchy {
    inner: DiGraph<ClassDef, Inheritance>,
    node_ids: BTreeMap<DexType, NodeIndex>,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl Hierarchy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: DiGraph::new(),
            node_ids: BTreeMap::new(),
        }
    }

    /// Builds a closed hierarchy from the given class definitions.
    ///
    /// # Errors
    ///
    /// Fails if a class is defined twice.
    pub fn from_classes(classes: impl IntoIterator<Item = ClassDef>) -> AnalysisResult<Self> {
        let mut hierarchy = Self::new();
        for class in classes {
            hierarchy.insert_class(class)?;
        }
        hierarchy.close();
        Ok(hierarchy)
    }

    /// Registers a class definition; links are only created when the hierarchy is
    /// [closed](Hierarchy::close).
    ///
    /// # Errors
    ///
    /// Fails if the class is already registered.
    pub fn insert_class(&mut self, class: ClassDef) -> AnalysisResult<()> {
        if self.node_ids.contains_key(class.class()) {
            return Err(AnalysisError::DuplicateClass(class.class().clone()));
        }
        let name = class.class().clone();
        let id = self.inner.add_node(class);
        self.node_ids.insert(name, id);
        Ok(())
    }

    #[must_use]
    pub fn contains_class(&self, class: &DexType) -> bool {
        self.node_ids.contains_key(class)
    }

    pub fn iter_classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.inner.node_weights()
    }

    /// (Re)computes inheritance links between registered classes.
    ///
    /// `java.lang.Object` is added when missing, and classes whose superclass is unknown
    /// are attached to it.
    pub fn close(&mut self) {
        let object = JAVA_LANG_OBJECT.clone();
        if !self.contains_class(&object) {
            let id = self
                .inner
                .add_node(ClassDef::new(object.clone(), ClassFlags::ACC_PUBLIC, None));
            self.node_ids.insert(object.clone(), id);
        }
        self.inner.clear_edges();

        let mut links = Vec::new();
        for (name, id) in &self.node_ids {
            if name == &object {
                continue;
            }
            let class = &self.inner[*id];
            match class.superclass().and_then(|s| self.node_ids.get(s)) {
                Some(super_id) => links.push((*id, *super_id, Inheritance::Extends)),
                None => {
                    log::warn!("add missing java.lang.Object inheritance to {name}");
                    links.push((*id, self.node_ids[&object], Inheritance::Extends));
                }
            }
            for interface in class.interfaces() {
                match self.node_ids.get(interface) {
                    Some(itf_id) => links.push((*id, *itf_id, Inheritance::Implements)),
                    None => log::warn!("unknown interface {interface} implemented by {name}"),
                }
            }
        }
        for (src, dst, link) in links {
            self.inner.add_edge(src, dst, link);
        }
    }

    fn superclass_chain(&self, class: &DexType) -> Vec<DexType> {
        let mut chain = Vec::new();
        let mut current = self.superclass_of(class);
        while let Some(c) = current {
            if chain.contains(&c) {
                log::error!("cyclic inheritance through {c}");
                break;
            }
            current = self.superclass_of(&c);
            chain.push(c);
        }
        chain
    }
}

impl ClassHierarchy for Hierarchy {
    fn class_def(&self, class: &DexType) -> Option<&ClassDef> {
        self.node_ids.get(class).map(|id| &self.inner[*id])
    }

    fn is_assignable(&self, from: &DexType, to: &DexType) -> bool {
        // every type is assignable to itself
        if from == to {
            return true;
        }
        match (from, to) {
            // every class inherits (directly or indirectly) from java.lang.Object
            (DexType::Class(_), _) if *to == *JAVA_LANG_OBJECT => true,
            (DexType::Class(_), DexType::Class(_)) => {
                match (self.node_ids.get(from), self.node_ids.get(to)) {
                    (Some(src), Some(dst)) => has_path_connecting(&self.inner, *src, *dst, None),
                    _ => false,
                }
            }
            (DexType::Array(_, _), DexType::Class(_)) => is_array_supertype(to),
            (DexType::Array(n1, e1), DexType::Array(n2, e2)) => {
                if n1 == n2 {
                    e1.is_reference() && e2.is_reference() && self.is_assignable(e1, e2)
                } else {
                    // the components of the deepest array are arrays themselves
                    n1 > n2 && is_array_supertype(e2)
                }
            }
            _ => false,
        }
    }

    fn common_supertype(&self, t1: &DexType, t2: &DexType) -> Option<DexType> {
        if self.is_assignable(t1, t2) {
            return Some(t2.clone());
        }
        if self.is_assignable(t2, t1) {
            return Some(t1.clone());
        }
        let object = JAVA_LANG_OBJECT.clone();
        match (t1, t2) {
            (DexType::Class(_), DexType::Class(_)) => {
                let lub = self
                    .superclass_chain(t1)
                    .into_iter()
                    .find(|c| self.is_assignable(t2, c));
                if lub.is_none() {
                    log::warn!("no common superclass known for {t1} and {t2}, using {object}");
                }
                Some(lub.unwrap_or(object))
            }
            (DexType::Array(n1, e1), DexType::Array(n2, e2)) => {
                if n1 == n2 && e1.is_reference() && e2.is_reference() {
                    let elem = self.common_supertype(e1, e2)?;
                    Some(DexType::Array(*n1, Box::new(elem)))
                } else {
                    let (dims, elem) = if n1 < n2 { (*n1, e1) } else { (*n2, e2) };
                    let dims = if elem.is_primitive() { dims - 1 } else { dims };
                    if dims == 0 {
                        Some(object)
                    } else {
                        Some(DexType::Array(dims, Box::new(object)))
                    }
                }
            }
            (DexType::Array(_, _), DexType::Class(_)) | (DexType::Class(_), DexType::Array(_, _)) => {
                Some(object)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn class(name: &str, superclass: &DexType) -> ClassDef {
        ClassDef::new(
            DexType::class(name),
            ClassFlags::ACC_PUBLIC,
            Some(superclass.clone()),
        )
    }

    /// Animal <- Dog, Animal <- Cat, Dog <- Puppy, plus Runnable implemented by Dog.
    pub(crate) fn zoo() -> Hierarchy {
        let runnable = ClassDef::new(
            DexType::class("java/lang/Runnable"),
            ClassFlags::ACC_PUBLIC | ClassFlags::ACC_INTERFACE | ClassFlags::ACC_ABSTRACT,
            Some(JAVA_LANG_OBJECT.clone()),
        );
        let t = DexType::class;
        Hierarchy::from_classes(vec![
            class("Animal", &JAVA_LANG_OBJECT),
            class("Dog", &t("Animal")).with_interfaces(vec![DexType::class("java/lang/Runnable")]),
            class("Cat", &t("Animal")),
            class("Puppy", &t("Dog")),
            class("java/lang/String", &JAVA_LANG_OBJECT),
            class("java/lang/Throwable", &JAVA_LANG_OBJECT),
            class("java/lang/Exception", &t("java/lang/Throwable")),
            runnable,
        ])
        .unwrap()
    }

    #[test]
    fn class_assignability() {
        let h = zoo();
        let t = DexType::class;
        assert!(h.is_assignable(&t("Puppy"), &t("Animal")));
        assert!(h.is_assignable(&t("Puppy"), &t("java/lang/Runnable")));
        assert!(h.is_assignable(&t("Cat"), &JAVA_LANG_OBJECT));
        assert!(h.is_assignable(&t("Unknown"), &JAVA_LANG_OBJECT));
        assert!(!h.is_assignable(&t("Animal"), &t("Dog")));
        assert!(!h.is_assignable(&t("Cat"), &t("java/lang/Runnable")));
        assert!(!h.is_assignable(&t("Unknown"), &t("Animal")));
        assert!(!h.is_assignable(&DexType::Int, &JAVA_LANG_OBJECT));
    }

    #[test]
    fn array_assignability() {
        let h = zoo();
        let arr = |n, e| DexType::Array(n, Box::new(e));
        let t = DexType::class;
        assert!(h.is_assignable(&arr(1, t("Dog")), &arr(1, t("Animal"))));
        assert!(!h.is_assignable(&arr(1, t("Animal")), &arr(1, t("Dog"))));
        assert!(h.is_assignable(&arr(1, DexType::Int), &JAVA_LANG_OBJECT));
        assert!(h.is_assignable(&arr(1, DexType::Int), &JAVA_LANG_CLONEABLE));
        assert!(!h.is_assignable(&arr(1, DexType::Int), &arr(1, DexType::Long)));
        assert!(h.is_assignable(&arr(2, DexType::Int), &arr(1, JAVA_LANG_OBJECT.clone())));
        assert!(!h.is_assignable(&arr(1, DexType::Int), &arr(2, JAVA_LANG_OBJECT.clone())));
    }

    #[test]
    fn nearest_common_supertype() {
        let h = zoo();
        let t = DexType::class;
        assert_eq!(h.common_supertype(&t("Dog"), &t("Cat")), Some(t("Animal")));
        assert_eq!(h.common_supertype(&t("Puppy"), &t("Cat")), Some(t("Animal")));
        assert_eq!(h.common_supertype(&t("Puppy"), &t("Dog")), Some(t("Dog")));
        assert_eq!(
            h.common_supertype(&t("Dog"), &t("java/lang/String")),
            Some(JAVA_LANG_OBJECT.clone())
        );
        assert_eq!(h.common_supertype(&DexType::Int, &DexType::Float), None);
    }

    #[test]
    fn array_common_supertype() {
        let h = zoo();
        let arr = |n, e| DexType::Array(n, Box::new(e));
        let t = DexType::class;
        assert_eq!(
            h.common_supertype(&arr(1, t("Dog")), &arr(1, t("Cat"))),
            Some(arr(1, t("Animal")))
        );
        assert_eq!(
            h.common_supertype(&arr(1, DexType::Int), &arr(1, DexType::Float)),
            Some(JAVA_LANG_OBJECT.clone())
        );
        assert_eq!(
            h.common_supertype(&arr(2, DexType::Int), &arr(2, DexType::Float)),
            Some(arr(1, JAVA_LANG_OBJECT.clone()))
        );
        assert_eq!(
            h.common_supertype(&arr(1, DexType::Int), &t("Dog")),
            Some(JAVA_LANG_OBJECT.clone())
        );
    }

    #[test]
    fn duplicate_and_orphans() {
        let mut h = Hierarchy::new();
        h.insert_class(class("A", &DexType::class("Missing"))).unwrap();
        assert!(matches!(
            h.insert_class(class("A", &JAVA_LANG_OBJECT)),
            Err(AnalysisError::DuplicateClass(_))
        ));
        h.close();
        assert!(h.contains_class(&JAVA_LANG_OBJECT));
        assert_eq!(h.iter_classes().count(), 2);
        assert!(h.is_assignable(&DexType::class("A"), &JAVA_LANG_OBJECT));
    }

    #[test]
    fn constructors() {
        let h = zoo();
        let init = MethodRef::new(DexType::class("Dog"), "<init>", vec![], DexType::Void);
        let run = MethodRef::new(DexType::class("Dog"), "run", vec![], DexType::Void);
        assert!(h.is_constructor_of(&init, &DexType::class("Dog")));
        assert!(!h.is_constructor_of(&init, &DexType::class("Animal")));
        assert!(!h.is_constructor_of(&run, &DexType::class("Dog")));
        assert_eq!(
            h.superclass_of(&DexType::class("Puppy")),
            Some(DexType::class("Dog"))
        );
    }
}
