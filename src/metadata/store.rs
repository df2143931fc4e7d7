use super::{
    DispatchKind, MethodDescriptor, MethodId, MethodIndex, TypeDescriptor, TypeId, TypeIndex,
    UnitId,
};

/// Resolution queries the pass issues against the global type/method metadata.
///
/// Implementations hand back owned snapshots. Callers must only invoke these through a
/// [`super::MetadataAccess`] scope.
pub trait TypeResolutionStore {
    /// Look up a type by identity.
    fn type_descriptor(&self, ty: TypeId) -> Option<TypeDescriptor>;

    /// Look up a method by identity.
    fn method_descriptor(&self, method: MethodId) -> Option<MethodDescriptor>;

    /// Resolve a declared call target through the caller unit's reference table.
    fn resolve_method(&self, unit: UnitId, index: MethodIndex) -> Option<MethodDescriptor>;

    /// Find the implementation of `resolved` that a receiver of type `concrete` dispatches to.
    fn find_override(
        &self,
        resolved: &MethodDescriptor,
        concrete: TypeId,
        dispatch: DispatchKind,
    ) -> Option<MethodDescriptor>;

    /// Index of `ty` in the reference table of `unit`, if it can be named from there.
    fn type_index_in(&self, ty: TypeId, unit: UnitId) -> Option<TypeIndex>;

    /// Index of `method` in the reference table of `unit`. `declared` is the index the
    /// call site already uses and is returned as-is when it names `method`.
    fn method_index_in(
        &self,
        method: MethodId,
        unit: UnitId,
        declared: MethodIndex,
    ) -> Option<MethodIndex>;

    /// A final method, or any method of a final type, cannot be overridden.
    fn is_method_or_declaring_type_final(&self, method: &MethodDescriptor) -> bool {
        method.is_final
            || self
                .type_descriptor(method.declaring_type)
                .is_some_and(|owner| owner.is_final)
    }
}

/// Structural flags for a type registered in a [`ClassTable`].
#[derive(Debug, Clone, Default)]
pub struct TypeShape {
    pub superclass: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub is_final: bool,
    pub is_interface: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MethodEntry {
    method: MethodId,
    resolved: bool,
}

/// Per-unit table of the types and methods the unit can name.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    types: Vec<TypeId>,
    methods: Vec<MethodEntry>,
}

impl ReferenceTable {
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

/// In-memory metadata store backed by flat descriptor tables.
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    types: Vec<TypeDescriptor>,
    methods: Vec<MethodDescriptor>,
    units: Vec<ReferenceTable>,
}

impl ClassTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_type(&mut self, name: impl Into<String>, shape: TypeShape) -> TypeId {
        let id = TypeId(index_u32(self.types.len()));
        self.types.push(TypeDescriptor {
            id,
            name: name.into(),
            is_final: shape.is_final,
            is_interface: shape.is_interface,
            superclass: shape.superclass,
            interfaces: shape.interfaces,
            methods: Vec::new(),
        });
        id
    }

    /// Declare a method on `owner`. Returns `None` when `owner` is unknown.
    pub fn define_method(
        &mut self,
        owner: TypeId,
        name: impl Into<String>,
        is_final: bool,
        is_abstract: bool,
    ) -> Option<MethodId> {
        let id = MethodId(index_u32(self.methods.len()));
        let owner_desc = self.types.get_mut(owner.0 as usize)?;
        owner_desc.methods.push(id);
        self.methods.push(MethodDescriptor {
            id,
            name: name.into(),
            declaring_type: owner,
            is_final,
            is_abstract,
        });
        Some(id)
    }

    pub fn add_unit(&mut self) -> UnitId {
        let id = UnitId(index_u32(self.units.len()));
        self.units.push(ReferenceTable::default());
        id
    }

    /// Make `ty` nameable from `unit`. Repeated calls return the existing index.
    pub fn reference_type(&mut self, unit: UnitId, ty: TypeId) -> Option<TypeIndex> {
        let table = self.units.get_mut(unit.0 as usize)?;
        if let Some(pos) = table.types.iter().position(|entry| *entry == ty) {
            return Some(TypeIndex(index_u32(pos)));
        }
        table.types.push(ty);
        Some(TypeIndex(index_u32(table.types.len() - 1)))
    }

    /// Add a resolved method entry to `unit`'s reference table.
    pub fn reference_method(&mut self, unit: UnitId, method: MethodId) -> Option<MethodIndex> {
        self.push_method_entry(unit, method, true)
    }

    /// Add a method entry that the unit names but has not resolved yet.
    pub fn reference_unresolved_method(
        &mut self,
        unit: UnitId,
        method: MethodId,
    ) -> Option<MethodIndex> {
        self.push_method_entry(unit, method, false)
    }

    #[must_use]
    pub fn unit(&self, unit: UnitId) -> Option<&ReferenceTable> {
        self.units.get(unit.0 as usize)
    }

    fn push_method_entry(
        &mut self,
        unit: UnitId,
        method: MethodId,
        resolved: bool,
    ) -> Option<MethodIndex> {
        let table = self.units.get_mut(unit.0 as usize)?;
        table.methods.push(MethodEntry { method, resolved });
        Some(MethodIndex(index_u32(table.methods.len() - 1)))
    }

    fn type_ref(&self, ty: TypeId) -> Option<&TypeDescriptor> {
        self.types.get(ty.0 as usize)
    }

    /// `start` and its superclasses, nearest first. Stops at the first repeated type.
    fn superclass_chain(&self, start: TypeId) -> impl Iterator<Item = &TypeDescriptor> + '_ {
        let mut cursor = self.type_ref(start);
        let mut seen = Vec::new();
        std::iter::from_fn(move || {
            let current = cursor.take()?;
            if seen.contains(&current.id) {
                return None;
            }
            seen.push(current.id);
            cursor = current.superclass.and_then(|next| self.type_ref(next));
            Some(current)
        })
    }

    fn is_subclass_of(&self, ty: TypeId, ancestor: TypeId) -> bool {
        self.superclass_chain(ty).any(|desc| desc.id == ancestor)
    }

    fn implements(&self, ty: TypeId, interface: TypeId) -> bool {
        let mut pending: Vec<TypeId> = self
            .superclass_chain(ty)
            .flat_map(|desc| desc.interfaces.iter().copied())
            .collect();
        let mut seen = Vec::new();
        while let Some(candidate) = pending.pop() {
            if candidate == interface {
                return true;
            }
            if seen.contains(&candidate) {
                continue;
            }
            seen.push(candidate);
            if let Some(desc) = self.type_ref(candidate) {
                pending.extend(desc.interfaces.iter().copied());
            }
        }
        false
    }
}

impl TypeResolutionStore for ClassTable {
    fn type_descriptor(&self, ty: TypeId) -> Option<TypeDescriptor> {
        self.type_ref(ty).cloned()
    }

    fn method_descriptor(&self, method: MethodId) -> Option<MethodDescriptor> {
        self.methods.get(method.0 as usize).cloned()
    }

    fn resolve_method(&self, unit: UnitId, index: MethodIndex) -> Option<MethodDescriptor> {
        let entry = self.unit(unit)?.methods.get(index.0 as usize)?;
        if !entry.resolved {
            return None;
        }
        self.method_descriptor(entry.method)
    }

    fn find_override(
        &self,
        resolved: &MethodDescriptor,
        concrete: TypeId,
        dispatch: DispatchKind,
    ) -> Option<MethodDescriptor> {
        let receiver = self.type_ref(concrete)?;
        if receiver.is_interface {
            return None;
        }
        let conforms = match dispatch {
            DispatchKind::Virtual => self.is_subclass_of(concrete, resolved.declaring_type),
            DispatchKind::Interface => self.implements(concrete, resolved.declaring_type),
        };
        if !conforms {
            return None;
        }
        self.superclass_chain(concrete)
            .flat_map(|desc| desc.methods.iter())
            .filter_map(|method| self.methods.get(method.0 as usize))
            .find(|method| method.name == resolved.name && !method.is_abstract)
            .cloned()
    }

    fn type_index_in(&self, ty: TypeId, unit: UnitId) -> Option<TypeIndex> {
        self.unit(unit)?
            .types
            .iter()
            .position(|entry| *entry == ty)
            .map(|pos| TypeIndex(index_u32(pos)))
    }

    fn method_index_in(
        &self,
        method: MethodId,
        unit: UnitId,
        declared: MethodIndex,
    ) -> Option<MethodIndex> {
        let table = self.unit(unit)?;
        if table
            .methods
            .get(declared.0 as usize)
            .is_some_and(|entry| entry.method == method)
        {
            return Some(declared);
        }
        table
            .methods
            .iter()
            .position(|entry| entry.method == method)
            .map(|pos| MethodIndex(index_u32(pos)))
    }
}

fn index_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hierarchy {
        table: ClassTable,
        unit: UnitId,
        shape: TypeId,
        base: TypeId,
        circle: TypeId,
        square: TypeId,
        shape_area: MethodId,
        base_area: MethodId,
        square_area: MethodId,
    }

    fn hierarchy() -> Hierarchy {
        let mut table = ClassTable::new();
        let shape = table.define_type(
            "Shape",
            TypeShape {
                is_interface: true,
                ..TypeShape::default()
            },
        );
        let base = table.define_type(
            "Base",
            TypeShape {
                interfaces: vec![shape],
                ..TypeShape::default()
            },
        );
        let circle = table.define_type(
            "Circle",
            TypeShape {
                superclass: Some(base),
                is_final: true,
                ..TypeShape::default()
            },
        );
        let square = table.define_type(
            "Square",
            TypeShape {
                superclass: Some(base),
                ..TypeShape::default()
            },
        );
        let shape_area = table.define_method(shape, "area", false, true).unwrap();
        let base_area = table.define_method(base, "area", false, false).unwrap();
        let square_area = table.define_method(square, "area", false, false).unwrap();
        let unit = table.add_unit();
        Hierarchy {
            table,
            unit,
            shape,
            base,
            circle,
            square,
            shape_area,
            base_area,
            square_area,
        }
    }

    #[test]
    fn virtual_override_walks_superclass_chain() {
        let h = hierarchy();
        let base_area = h.table.method_descriptor(h.base_area).unwrap();
        let square = h
            .table
            .find_override(&base_area, h.square, DispatchKind::Virtual)
            .unwrap();
        assert_eq!(square.id, h.square_area);

        let circle = h
            .table
            .find_override(&base_area, h.circle, DispatchKind::Virtual)
            .unwrap();
        assert_eq!(circle.id, h.base_area, "circle inherits Base::area");
    }

    #[test]
    fn virtual_override_rejects_unrelated_receiver() {
        let mut h = hierarchy();
        let other = h.table.define_type("Other", TypeShape::default());
        let base_area = h.table.method_descriptor(h.base_area).unwrap();
        assert!(
            h.table
                .find_override(&base_area, other, DispatchKind::Virtual)
                .is_none()
        );
    }

    #[test]
    fn interface_override_skips_abstract_declaration() {
        let h = hierarchy();
        let shape_area = h.table.method_descriptor(h.shape_area).unwrap();
        let found = h
            .table
            .find_override(&shape_area, h.square, DispatchKind::Interface)
            .unwrap();
        assert_eq!(found.id, h.square_area);
        assert!(
            h.table
                .find_override(&shape_area, h.shape, DispatchKind::Interface)
                .is_none(),
            "interfaces are never concrete receivers"
        );
    }

    #[test]
    fn cyclic_superclass_links_terminate() {
        let mut h = hierarchy();
        let first = TypeId(4);
        let second = TypeId(5);
        let looped = |superclass| TypeShape {
            superclass: Some(superclass),
            ..TypeShape::default()
        };
        assert_eq!(h.table.define_type("Ping", looped(second)), first);
        assert_eq!(h.table.define_type("Pong", looped(first)), second);
        let base_area = h.table.method_descriptor(h.base_area).unwrap();

        assert!(!h.table.is_subclass_of(first, h.base));
        assert!(
            h.table
                .find_override(&base_area, first, DispatchKind::Virtual)
                .is_none()
        );
        let shape_area = h.table.method_descriptor(h.shape_area).unwrap();
        assert!(
            h.table
                .find_override(&shape_area, second, DispatchKind::Interface)
                .is_none()
        );
        assert_eq!(h.table.superclass_chain(first).count(), 2);
    }

    #[test]
    fn final_declaring_type_makes_method_final() {
        let mut h = hierarchy();
        let circle_area = h.table.define_method(h.circle, "area", false, false).unwrap();
        let circle_area = h.table.method_descriptor(circle_area).unwrap();
        let base_area = h.table.method_descriptor(h.base_area).unwrap();
        assert!(h.table.is_method_or_declaring_type_final(&circle_area));
        assert!(!h.table.is_method_or_declaring_type_final(&base_area));
    }

    #[test]
    fn reference_tables_control_representability() {
        let mut h = hierarchy();
        assert_eq!(h.table.type_index_in(h.base, h.unit), None);
        let index = h.table.reference_type(h.unit, h.base).unwrap();
        assert_eq!(h.table.reference_type(h.unit, h.base), Some(index));
        assert_eq!(h.table.type_index_in(h.base, h.unit), Some(index));
    }

    #[test]
    fn unresolved_entries_do_not_resolve_but_remain_nameable() {
        let mut h = hierarchy();
        let declared = h
            .table
            .reference_unresolved_method(h.unit, h.base_area)
            .unwrap();
        assert!(h.table.resolve_method(h.unit, declared).is_none());
        assert_eq!(
            h.table.method_index_in(h.base_area, h.unit, declared),
            Some(declared)
        );
    }

    #[test]
    fn method_index_prefers_declared_slot_then_searches() {
        let mut h = hierarchy();
        let declared = h.table.reference_method(h.unit, h.base_area).unwrap();
        assert_eq!(
            h.table.method_index_in(h.base_area, h.unit, declared),
            Some(declared)
        );
        assert_eq!(h.table.method_index_in(h.square_area, h.unit, declared), None);
        let square = h.table.reference_method(h.unit, h.square_area).unwrap();
        assert_eq!(
            h.table.method_index_in(h.square_area, h.unit, declared),
            Some(square)
        );
    }
}
